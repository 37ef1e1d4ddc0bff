// 标签图 → 目标
//
// 只按标签值分组像素，不做连通域或轮廓分析。

use crate::error::{AppError, AppResult};
use crate::protocol::LabelMask;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 特征名
pub const FEATURE_AREA: &str = "AREA";
pub const FEATURE_RADIUS: &str = "RADIUS";
pub const FEATURE_QUALITY: &str = "QUALITY";

/// 点状目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// 帧内标签值，跨帧无对应关系
    pub label: i16,
    /// 物理坐标 [x, y, z]
    pub position: [f64; 3],
    /// 绝对帧号
    pub frame: i64,
    /// 绝对时间
    pub time: f64,
    pub features: BTreeMap<String, f64>,
}

impl Detection {
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

/// 把单帧标签图转为帧内坐标系下的目标
///
/// 返回的 position 以裁剪窗口原点为零点、已乘标定；frame 与 time 为 0，
/// 由校正器填写。
pub trait LabelObjectExtractor {
    fn extract(&self, mask: &LabelMask, calibration: &[f64; 3]) -> AppResult<Vec<Detection>>;
}

/// 质心提取：每个标签一个目标，面积为像素数 × 像素面积，半径取等面积圆
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidExtractor;

#[derive(Default)]
struct Accumulator {
    count: u64,
    sum_x: f64,
    sum_y: f64,
}

impl LabelObjectExtractor for CentroidExtractor {
    fn extract(&self, mask: &LabelMask, calibration: &[f64; 3]) -> AppResult<Vec<Detection>> {
        let (cx, cy) = (calibration[0], calibration[1]);
        if !(cx.is_finite() && cx > 0.0 && cy.is_finite() && cy > 0.0) {
            return Err(AppError::Extraction(format!("无效的空间标定: {:?}", calibration)));
        }

        let mut objects: BTreeMap<i16, Accumulator> = BTreeMap::new();
        for y in 0..mask.height() {
            for x in 0..mask.width() {
                let label = mask.get(x, y);
                if label <= 0 {
                    continue;
                }
                let acc = objects.entry(label).or_default();
                acc.count += 1;
                acc.sum_x += x as f64;
                acc.sum_y += y as f64;
            }
        }

        let detections = objects
            .into_iter()
            .map(|(label, acc)| {
                let n = acc.count as f64;
                let area = n * cx * cy;
                let mut features = BTreeMap::new();
                features.insert(FEATURE_AREA.to_string(), area);
                features.insert(FEATURE_RADIUS.to_string(), (area / std::f64::consts::PI).sqrt());
                features.insert(FEATURE_QUALITY.to_string(), n);
                Detection {
                    label,
                    position: [acc.sum_x / n * cx, acc.sum_y / n * cy, 0.0],
                    frame: 0,
                    time: 0.0,
                    features,
                }
            })
            .collect();
        Ok(detections)
    }
}

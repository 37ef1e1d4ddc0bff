// 时空校正
//
// 把帧内坐标、帧偏移还原到宿主的绝对标定坐标系与绝对帧号。

use crate::correction::extract::{Detection, LabelObjectExtractor};
use crate::dispatch::{CropWindow, DispatchOutput};
use crate::error::AppResult;
use tracing::debug;

/// 校正单个目标（原地修改）
///
/// 对裁剪窗口中存在的每个空间轴: `pos[d] += crop_min[d] * calibration[d]`；
/// `frame = offset + min_frame`，`time = frame * frame_interval`。
/// 标签值与特征保持不变。
pub fn correct_detection(
    detection: &mut Detection,
    offset: usize,
    crop: &CropWindow,
    calibration: &[f64; 3],
    min_frame: i64,
    frame_interval: f64,
) {
    let origin = crop.spatial_min();
    for d in 0..crop.spatial_dims() {
        detection.position[d] += origin[d] as f64 * calibration[d];
    }
    detection.frame = offset as i64 + min_frame;
    detection.time = detection.frame as f64 * frame_interval;
}

/// 基于标签提取器的结果校正器
pub struct ResultCorrector<E: LabelObjectExtractor> {
    extractor: E,
}

impl<E: LabelObjectExtractor> ResultCorrector<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }

    /// 逐帧提取并校正，结果按帧顺序排列
    pub fn correct(&self, output: &DispatchOutput) -> AppResult<Vec<Detection>> {
        let mut detections = Vec::new();
        for (offset, mask) in output.volume.iter().enumerate() {
            let mut frame_detections = self.extractor.extract(mask, &output.calibration)?;
            for detection in frame_detections.iter_mut() {
                correct_detection(
                    detection,
                    offset,
                    &output.crop,
                    &output.calibration,
                    output.min_frame,
                    output.frame_interval,
                );
            }
            debug!("[CORRECT] 帧偏移 {} 提取到 {} 个目标", offset, frame_detections.len());
            detections.extend(frame_detections);
        }
        Ok(detections)
    }
}

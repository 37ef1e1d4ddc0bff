// 结果校正模块
//
// 子模块：
// - extract: 标签图到点状目标的转换
// - corrector: 把帧内坐标与帧偏移还原为绝对坐标与时间

pub mod extract;
pub mod corrector;

pub use corrector::{correct_detection, ResultCorrector};
pub use extract::{
    CentroidExtractor, Detection, LabelObjectExtractor, FEATURE_AREA, FEATURE_QUALITY,
    FEATURE_RADIUS,
};

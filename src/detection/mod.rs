// 目标检测模块
//
// 对宿主图像逐帧调用 Lacss 推理进程，输出绝对坐标下的点状目标或多帧标签体。
//
// 子模块：
// - detector: 检测入口，组合分发与结果校正

pub mod detector;

pub use detector::{detect_objects, failure_message, DetectionOutput, DetectionResult, DETECTOR_NAME};

// 分发模块
//
// 按时间顺序逐帧把裁剪后的图像送入推理进程，组装多帧标签体。
//
// 子模块：
// - source: 宿主图像源、检测区域与裁剪窗口
// - cancel: 帧边界上检查的取消标志
// - volume: 按帧偏移排列的标签图序列
// - orchestrator: 串行分发循环

pub mod source;
pub mod cancel;
pub mod volume;
pub mod orchestrator;

pub use cancel::CancelFlag;
pub use orchestrator::{DispatchOutput, Dispatcher, ProgressCallback};
pub use source::{
    check_crop, check_input, crop_window, ArrayImage, CropWindow, DetectionRegion, ImageGeometry,
    ImageSource, Span,
};
pub use volume::LabelVolume;

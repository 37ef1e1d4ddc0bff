// lacss-bridge - 逐帧推理管道
//
// 通过一个持久的子进程（stdin/stdout 上的长度前缀 protobuf 帧）调用 Lacss
// 分割引擎，按时间顺序逐帧分发图像，并把返回的标签图还原为绝对坐标下的目标。

pub mod config;
pub mod correction;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AppConfig, InferenceSettings, ResultMode, WorkerConfig};
pub use correction::{CentroidExtractor, Detection, LabelObjectExtractor, ResultCorrector};
pub use detection::{detect_objects, DetectionOutput, DetectionResult};
pub use dispatch::{
    ArrayImage, CancelFlag, DetectionRegion, DispatchOutput, Dispatcher, ImageGeometry,
    ImageSource, LabelVolume, Span,
};
pub use error::{AppError, AppResult};
pub use protocol::{ImageTensor, LabelMask};
pub use worker::{InferenceWorker, WorkerChannel, WorkerProcess};

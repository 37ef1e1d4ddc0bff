// 推理进程模块
//
// 子模块：
// - channel: 一问一答的阻塞通道，分发器只依赖其中的 InferenceWorker
// - process: 启动/探测/结束外部引擎进程

pub mod channel;
pub mod process;

pub use channel::{InferenceWorker, Liveness, WorkerChannel};
pub use process::{resolve_worker_command, WorkerProcess};

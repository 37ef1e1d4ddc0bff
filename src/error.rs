// 错误处理模块

use std::time::Duration;
use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 发送前的本地前置条件不满足（张量尺寸、参数）
    #[error("编码错误: {0}")]
    Encoding(String),

    /// 响应内容可以解析，但尺寸与声明不符
    #[error("解码错误: {0}")]
    Decoding(String),

    /// 帧格式被破坏：流提前关闭、长度异常、负载无法解析
    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("推理进程不可用: {0}")]
    WorkerUnavailable(String),

    #[error("推理进程响应超时 ({0:?})")]
    WorkerTimeout(Duration),

    #[error("标签转换错误: {0}")]
    Extraction(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("无效参数: {0}")]
    InvalidArgument(String),
}

impl AppError {
    /// 取消不是协议失败，调用方据此区分“未完成”和“出错”
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// 该错误发生后通道帧同步状态未知，不应继续复用
    pub fn breaks_channel(&self) -> bool {
        matches!(self, AppError::Protocol(_) | AppError::WorkerTimeout(_))
    }
}

// 实现 Serialize 以便把错误信息原样交给宿主
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

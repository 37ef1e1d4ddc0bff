// 推理进程通道
//
// 一个通道对应一个外部进程的 stdin/stdout。请求与响应严格一问一答，
// call 需要 &mut self，同一通道上不可能出现两个并发请求。

use crate::error::{AppError, AppResult};
use crate::protocol::read_frame;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, error, warn};

/// 分发器依赖的推理端抽象
pub trait InferenceWorker {
    /// 进程是否仍存活
    fn is_alive(&mut self) -> bool;

    /// 发送完整请求帧，阻塞等待一帧响应，返回响应负载
    fn call(&mut self, request: &[u8]) -> AppResult<Vec<u8>>;
}

/// 存活探测，由管理进程的一方提供
pub trait Liveness: Send {
    fn is_alive(&mut self) -> bool;
}

impl<F> Liveness for F
where
    F: FnMut() -> bool + Send,
{
    fn is_alive(&mut self) -> bool {
        self()
    }
}

enum ResponseSource {
    /// 在调用线程上直接阻塞读取
    Direct(Box<dyn Read + Send>),
    /// 由读线程整帧转发，用于超时等待
    Pumped(Receiver<AppResult<Vec<u8>>>),
}

pub struct WorkerChannel {
    writer: Box<dyn Write + Send>,
    responses: ResponseSource,
    liveness: Box<dyn Liveness>,
    timeout: Option<Duration>,
    broken: bool,
    calls: u64,
}

impl WorkerChannel {
    /// 创建通道
    ///
    /// 设置 timeout 时启动一个读线程持有输入流；否则在调用线程上直接读取。
    pub fn new<W, R, L>(writer: W, reader: R, liveness: L, timeout: Option<Duration>) -> AppResult<Self>
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
        L: Liveness + 'static,
    {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        let responses = match timeout {
            Some(_) => ResponseSource::Pumped(spawn_reader(reader)?),
            None => ResponseSource::Direct(reader),
        };

        Ok(Self {
            writer: Box::new(writer),
            responses,
            liveness: Box::new(liveness),
            timeout,
            broken: false,
            calls: 0,
        })
    }

    /// 已完成的请求次数
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// 上一次协议失败或超时后通道不可复用
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn send(&mut self, request: &[u8]) -> AppResult<()> {
        self.writer
            .write_all(request)
            .and_then(|_| self.writer.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::BrokenPipe => AppError::WorkerUnavailable(format!("写入请求时管道已断开: {}", e)),
                _ => AppError::Protocol(format!("写入请求失败: {}", e)),
            })
    }

    fn receive(&mut self) -> AppResult<Vec<u8>> {
        match &mut self.responses {
            ResponseSource::Direct(reader) => read_frame(reader),
            ResponseSource::Pumped(rx) => match self.timeout {
                Some(timeout) => match rx.recv_timeout(timeout) {
                    Ok(frame) => frame,
                    Err(RecvTimeoutError::Timeout) => Err(AppError::WorkerTimeout(timeout)),
                    Err(RecvTimeoutError::Disconnected) => {
                        Err(AppError::Protocol("响应流已关闭".to_string()))
                    }
                },
                None => rx
                    .recv()
                    .unwrap_or_else(|_| Err(AppError::Protocol("响应流已关闭".to_string()))),
            },
        }
    }
}

impl InferenceWorker for WorkerChannel {
    fn is_alive(&mut self) -> bool {
        self.liveness.is_alive()
    }

    fn call(&mut self, request: &[u8]) -> AppResult<Vec<u8>> {
        if !self.liveness.is_alive() {
            return Err(AppError::WorkerUnavailable("推理进程已退出".to_string()));
        }
        if self.broken {
            return Err(AppError::Protocol("通道在上一次失败后处于未定义状态".to_string()));
        }

        debug!("[WORKER] 发送请求 #{} ({} 字节)", self.calls + 1, request.len());
        if let Err(e) = self.send(request) {
            // 请求可能只写了一半，帧边界已不可信
            self.broken = true;
            error!("[WORKER] {}", e);
            return Err(e);
        }

        match self.receive() {
            Ok(payload) => {
                self.calls += 1;
                debug!("[WORKER] 收到响应 #{} ({} 字节)", self.calls, payload.len());
                Ok(payload)
            }
            Err(e) => {
                if e.breaks_channel() {
                    self.broken = true;
                    warn!("[WORKER] 通道已标记为不可用: {}", e);
                }
                Err(e)
            }
        }
    }
}

/// 启动读线程，逐帧转发
///
/// 线程不被 join。它在流关闭、读取出错，或通道释放后再收到一帧时退出；
/// 若输入流既不关闭也不再有数据，线程会比 WorkerChannel 活得更久。
fn spawn_reader(mut reader: Box<dyn Read + Send>) -> AppResult<Receiver<AppResult<Vec<u8>>>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name("lacss-worker-reader".to_string())
        .spawn(move || loop {
            let frame = read_frame(&mut reader);
            let failed = frame.is_err();
            if tx.send(frame).is_err() || failed {
                debug!("[WORKER] 读线程退出");
                break;
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_response, LabelMask};
    use crate::testing::{pipe, spawn_engine, tagged_mask, Reply};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn request_frame(tag: i16) -> Vec<u8> {
        // 通道只搬运字节，这里直接用标签响应帧充当请求
        encode_response(&tagged_mask(2, 2, tag)).unwrap()
    }

    #[test]
    fn test_call_returns_response_payload() {
        let (req_tx, resp_rx, _engine) = spawn_engine(|tensor, _| {
            let tag = tensor.pixel(0, 0, 0) as i16;
            Reply::Send(encode_response(&tagged_mask(tensor.width(), tensor.height(), tag)).unwrap())
        });
        let mut channel = WorkerChannel::new(req_tx, resp_rx, || true, None).unwrap();

        let tensor = crate::protocol::ImageTensor::new(2, 1, 1, vec![9.0, 0.0]).unwrap();
        let request = crate::protocol::encode_request(&tensor, &Default::default()).unwrap();
        let payload = channel.call(&request).unwrap();
        let mask = crate::protocol::parse_response(&payload).unwrap();
        assert_eq!(mask, tagged_mask(2, 1, 9));
        assert_eq!(channel.calls(), 1);
    }

    #[test]
    fn test_dead_worker_fails_immediately() {
        let alive = Arc::new(AtomicBool::new(true));
        let probe = alive.clone();
        let (req_tx, _req_rx) = pipe();
        let (_resp_tx, resp_rx) = pipe();
        let mut channel = WorkerChannel::new(
            req_tx,
            resp_rx,
            move || probe.load(Ordering::SeqCst),
            None,
        )
        .unwrap();

        alive.store(false, Ordering::SeqCst);
        assert!(!channel.is_alive());
        let err = channel.call(&request_frame(1)).unwrap_err();
        assert!(matches!(err, AppError::WorkerUnavailable(_)));
        // 第二次同样立即失败
        assert!(matches!(channel.call(&request_frame(1)), Err(AppError::WorkerUnavailable(_))));
    }

    #[test]
    fn test_closed_response_stream_breaks_channel() {
        let (req_tx, _req_rx) = pipe();
        let (resp_tx, resp_rx) = pipe();
        drop(resp_tx);
        let mut channel = WorkerChannel::new(req_tx, resp_rx, || true, None).unwrap();

        let err = channel.call(&request_frame(1)).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)));
        assert!(channel.is_broken());
        assert!(matches!(channel.call(&request_frame(1)), Err(AppError::Protocol(_))));
    }

    #[test]
    fn test_timeout_when_engine_hangs() {
        let (req_tx, _req_rx) = pipe();
        let (_resp_tx, resp_rx) = pipe();
        let timeout = Duration::from_millis(50);
        let mut channel = WorkerChannel::new(req_tx, resp_rx, || true, Some(timeout)).unwrap();

        let err = channel.call(&request_frame(1)).unwrap_err();
        assert!(matches!(err, AppError::WorkerTimeout(d) if d == timeout));
        assert!(channel.is_broken());
    }

    #[test]
    fn test_reader_thread_exits_after_channel_dropped() {
        let (req_tx, _req_rx) = pipe();
        let (mut resp_tx, resp_rx) = pipe();
        let channel =
            WorkerChannel::new(req_tx, resp_rx, || true, Some(Duration::from_secs(5))).unwrap();
        drop(channel);

        // 读线程收到一帧后发现接收端已释放，随即退出并释放输入流
        let frame = encode_response(&tagged_mask(1, 1, 1)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut released = false;
        while std::time::Instant::now() < deadline {
            if resp_tx.write_all(&frame).is_err() {
                released = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(released);
    }

    #[test]
    fn test_timeout_channel_delivers_in_order() {
        let (req_tx, resp_rx, _engine) = spawn_engine(|tensor, _| {
            let tag = tensor.pixel(0, 0, 0) as i16;
            Reply::Send(encode_response(&tagged_mask(1, 1, tag)).unwrap())
        });
        let mut channel =
            WorkerChannel::new(req_tx, resp_rx, || true, Some(Duration::from_secs(5))).unwrap();

        for tag in 1..=3i16 {
            let tensor = crate::protocol::ImageTensor::new(1, 1, 1, vec![tag as f32]).unwrap();
            let request = crate::protocol::encode_request(&tensor, &Default::default()).unwrap();
            let mask = crate::protocol::parse_response(&channel.call(&request).unwrap()).unwrap();
            assert_eq!(mask.get(0, 0), tag);
        }
        assert_eq!(channel.calls(), 3);
    }

    #[test]
    fn test_write_to_closed_pipe_is_unavailable() {
        let (req_tx, req_rx) = pipe();
        drop(req_rx);
        let (_resp_tx, resp_rx) = pipe();
        let mut channel = WorkerChannel::new(req_tx, resp_rx, || true, None).unwrap();

        let err = channel.call(&request_frame(1)).unwrap_err();
        assert!(matches!(err, AppError::WorkerUnavailable(_)));
        assert!(channel.is_broken());
    }

    #[test]
    fn test_engine_exit_after_response_breaks_next_call() {
        let mut responses = vec![
            encode_response(&LabelMask::new(1, 1, vec![1]).unwrap()).unwrap(),
        ];
        let (req_tx, resp_rx, _engine) = spawn_engine(move |_, _| responses.pop().map_or(Reply::Close, Reply::Send));
        let mut channel = WorkerChannel::new(req_tx, resp_rx, || true, None).unwrap();

        let tensor = crate::protocol::ImageTensor::new(1, 1, 1, vec![0.0]).unwrap();
        let request = crate::protocol::encode_request(&tensor, &Default::default()).unwrap();
        assert!(channel.call(&request).is_ok());
        assert!(!channel.is_broken());

        let err = channel.call(&request).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)));
        assert!(channel.is_broken());
    }
}

// 测试辅助：内存管道与桩引擎

use crate::config::InferenceSettings;
use crate::protocol::{decode_request, ImageTensor, LabelMask};
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read, Write};
use std::thread::JoinHandle;

pub(crate) struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // 写端全部关闭即 EOF
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// 阻塞式单向内存管道
pub(crate) fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        PipeWriter { tx },
        PipeReader { rx, pending: Vec::new(), pos: 0 },
    )
}

/// 所有像素都等于 tag 的标签图
pub(crate) fn tagged_mask(width: usize, height: usize, tag: i16) -> LabelMask {
    LabelMask::new(width, height, vec![tag; width * height]).unwrap()
}

/// 桩引擎对一次请求的处理
pub(crate) enum Reply {
    /// 写出原始字节（可故意构造截断帧）
    Send(Vec<u8>),
    /// 写出后关闭输出流并退出
    SendAndClose(Vec<u8>),
    /// 直接关闭输出流并退出
    Close,
}

/// 启动桩引擎线程
///
/// 返回值: (请求写端, 响应读端, 线程句柄)
pub(crate) fn spawn_engine<F>(mut handler: F) -> (PipeWriter, PipeReader, JoinHandle<()>)
where
    F: FnMut(ImageTensor, InferenceSettings) -> Reply + Send + 'static,
{
    let (req_tx, mut req_rx) = pipe();
    let (mut resp_tx, resp_rx) = pipe();
    let handle = std::thread::spawn(move || {
        while let Ok((tensor, settings)) = decode_request(&mut req_rx) {
            match handler(tensor, settings) {
                Reply::Send(bytes) => {
                    if resp_tx.write_all(&bytes).is_err() {
                        break;
                    }
                }
                Reply::SendAndClose(bytes) => {
                    let _ = resp_tx.write_all(&bytes);
                    break;
                }
                Reply::Close => break,
            }
        }
    });
    (req_tx, resp_rx, handle)
}

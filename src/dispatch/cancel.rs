// 协作式取消标志
//
// 只在帧边界检查：已发出的请求总会等到响应或协议失败后才结束。

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 复用宿主已有的原子标志
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag, reason: Arc::default() }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// 开始新一轮分发前清除
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        *self.reason.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_and_reset() {
        let flag = CancelFlag::new();
        let shared = flag.clone();
        assert!(!flag.is_cancelled());

        shared.cancel("用户停止");
        assert!(flag.is_cancelled());
        assert_eq!(flag.reason().as_deref(), Some("用户停止"));

        flag.reset();
        assert!(!shared.is_cancelled());
        assert_eq!(shared.reason(), None);
    }

    #[test]
    fn test_from_host_flag() {
        let raw = Arc::new(AtomicBool::new(false));
        let flag = CancelFlag::from_flag(raw.clone());
        raw.store(true, Ordering::SeqCst);
        assert!(flag.is_cancelled());
        assert_eq!(flag.reason(), None);
    }
}

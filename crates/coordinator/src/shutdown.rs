use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

struct Inner {
    tx: broadcast::Sender<()>,
    down: AtomicBool,
}

/// 后台循环的协作式停止句柄。
///
/// 布尔标志在休眠前后轮询，广播信号打断休眠本身，保证停止及时；
/// 进行中的操作会先跑完（提交或回滚）再观察到停止。
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                tx,
                down: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.down.load(Ordering::SeqCst)
    }

    /// 触发停止：置位标志并唤醒所有休眠中的循环
    pub fn shutdown(&self) {
        if self.inner.down.swap(true, Ordering::SeqCst) {
            debug!("停止信号已经触发过");
            return;
        }
        info!("触发后台循环停止");
        // 可能没有订阅者，发送失败可以忽略
        let _ = self.inner.tx.send(());
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_sleeping_loop() {
        let handle = ShutdownHandle::new();
        let mut rx = handle.subscribe();
        let waker = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waker.shutdown();
        });
        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::time::sleep(Duration::from_secs(30)) => panic!("停止信号未送达"),
        }
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn test_repeated_shutdown_is_idempotent() {
        let handle = ShutdownHandle::new();
        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shutdown());
    }
}

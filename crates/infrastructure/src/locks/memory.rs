use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use jobstore_domain::ports::{LockManager, LockName};
use jobstore_domain::StoreResult;

/// 进程内命名互斥量。
///
/// 单实例（非集群、不用存储级锁）模式下的锁实现：每个锁名一把
/// tokio 互斥量，锁守卫由管理器代持，`release_lock` 时丢弃。
/// 只在单个进程内有效，多实例共享存储时必须换用存储级行锁。
pub struct InProcessLockManager {
    locks: HashMap<LockName, Arc<Mutex<()>>>,
    held: Mutex<HashMap<LockName, OwnedMutexGuard<()>>>,
}

impl InProcessLockManager {
    pub fn new() -> Self {
        let mut locks = HashMap::new();
        for name in LockName::ALL {
            locks.insert(name, Arc::new(Mutex::new(())));
        }
        Self {
            locks,
            held: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InProcessLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InProcessLockManager {
    async fn obtain_lock(&self, name: LockName) -> StoreResult<()> {
        // LockName::ALL 覆盖全部枚举值，查不到不可能发生
        let mutex = self
            .locks
            .get(&name)
            .expect("lock table covers all lock names")
            .clone();
        let guard = mutex.lock_owned().await;
        debug!("已获得进程内锁 {}", name);
        self.held.lock().await.insert(name, guard);
        Ok(())
    }

    async fn release_lock(&self, name: LockName) -> StoreResult<()> {
        match self.held.lock().await.remove(&name) {
            Some(guard) => {
                drop(guard);
                debug!("已释放进程内锁 {}", name);
            }
            None => {
                warn!("释放未持有的锁 {}，忽略", name);
            }
        }
        Ok(())
    }
}

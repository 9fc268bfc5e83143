use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use jobstore_domain::ports::{LockManager, LockName};
use jobstore_domain::{StoreError, StoreResult};

/// 锁哨兵行所在的表
const LOCK_TABLE: &str = "jobstore_locks";

/// 存储级行锁（集群模式）。
///
/// 对哨兵行执行 `SELECT ... FOR UPDATE`：为每把锁单独从连接池取一个
/// 事务并保持打开，行锁随之持有；`release_lock` 提交该事务释放行锁。
/// 两个实例争同一锁名时由数据库行锁串行化。
pub struct PgRowLockManager {
    pool: PgPool,
    held: Mutex<HashMap<LockName, Transaction<'static, Postgres>>>,
}

impl PgRowLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// 建表并播种全部锁哨兵行，幂等，启动时调用一次
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (lock_name VARCHAR(40) PRIMARY KEY)"
        ))
        .execute(&self.pool)
        .await?;
        for name in LockName::ALL {
            sqlx::query(&format!(
                "INSERT INTO {LOCK_TABLE} (lock_name) VALUES ($1) ON CONFLICT (lock_name) DO NOTHING"
            ))
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LockManager for PgRowLockManager {
    async fn obtain_lock(&self, name: LockName) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::LockUnobtainable {
                lock: name.to_string(),
                reason: format!("无法开启锁事务: {e}"),
            })?;

        // 行锁保持到事务提交，阻塞期间其他实例的同名请求在此排队
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT lock_name FROM {LOCK_TABLE} WHERE lock_name = $1 FOR UPDATE"
        ))
        .bind(name.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::LockUnobtainable {
            lock: name.to_string(),
            reason: e.to_string(),
        })?;

        if row.is_none() {
            // 哨兵行缺失：补种并在同一事务内重新锁定
            warn!("锁哨兵行 {} 缺失，现场补种", name);
            sqlx::query(&format!(
                "INSERT INTO {LOCK_TABLE} (lock_name) VALUES ($1) ON CONFLICT (lock_name) DO NOTHING"
            ))
            .bind(name.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::LockUnobtainable {
                lock: name.to_string(),
                reason: e.to_string(),
            })?;
            sqlx::query(&format!(
                "SELECT lock_name FROM {LOCK_TABLE} WHERE lock_name = $1 FOR UPDATE"
            ))
            .bind(name.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::LockUnobtainable {
                lock: name.to_string(),
                reason: e.to_string(),
            })?;
        }

        debug!("已获得存储级锁 {}", name);
        self.held.lock().await.insert(name, tx);
        Ok(())
    }

    async fn release_lock(&self, name: LockName) -> StoreResult<()> {
        match self.held.lock().await.remove(&name) {
            Some(tx) => {
                tx.commit().await?;
                debug!("已释放存储级锁 {}", name);
            }
            None => {
                warn!("释放未持有的存储级锁 {}，忽略", name);
            }
        }
        Ok(())
    }
}

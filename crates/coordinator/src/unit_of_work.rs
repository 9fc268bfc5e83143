//! 协调操作的工作单元包装
//!
//! 每个公开操作的骨架：取锁 -> begin -> 业务 -> commit/rollback ->
//! 释放锁。锁在包括回滚在内的所有退出路径上都会释放。

use std::future::Future;

use tracing::{error, warn};

use jobstore_domain::ports::{LockManager, LockName, TransactionBoundary};
use jobstore_domain::StoreResult;

/// 在命名锁与事务边界内执行 `work`。
///
/// 提交/回滚规则：成功则提交；失败默认回滚。唯一的例外是
/// `JobDoesNotExist`——触发器已在业务里被置为 ERROR，这个状态写入
/// 必须在错误返回后仍然生效，所以该情形下提交而不回滚。
pub(crate) async fn execute_in_lock<T, F>(
    locks: &dyn LockManager,
    tx: &dyn TransactionBoundary,
    lock: Option<LockName>,
    work: F,
) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    if let Some(name) = lock {
        locks.obtain_lock(name).await?;
    }

    let outcome = match tx.begin().await {
        Err(e) => Err(e),
        Ok(()) => match work.await {
            Ok(value) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(e) => Err(e),
            },
            Err(e) => {
                if e.is_job_missing() {
                    if let Err(ce) = tx.commit().await {
                        warn!("提交 ERROR 状态写入失败: {}", ce);
                    }
                } else if let Err(re) = tx.rollback().await {
                    warn!("回滚失败: {}", re);
                }
                Err(e)
            }
        },
    };

    if let Some(name) = lock {
        if let Err(e) = locks.release_lock(name).await {
            // 释放失败不吞掉业务结果，只留痕
            error!("释放锁 {} 失败: {}", name, e);
        }
    }

    outcome
}

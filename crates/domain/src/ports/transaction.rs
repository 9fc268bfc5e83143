use async_trait::async_trait;

use crate::errors::StoreResult;

/// 工作单元边界。
///
/// 每个公开协调操作包裹在一次工作单元中：取锁 -> begin -> 业务 ->
/// commit/rollback -> 释放锁。两种纪律：自管理（自己提交/回滚）与
/// 外部管理（假定存在环境事务，这里全部为空操作）。
#[async_trait]
pub trait TransactionBoundary: Send + Sync {
    async fn begin(&self) -> StoreResult<()>;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;
}

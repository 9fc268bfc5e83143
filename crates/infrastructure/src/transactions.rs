use async_trait::async_trait;
use tracing::{debug, warn};

use jobstore_domain::ports::TransactionBoundary;
use jobstore_domain::StoreResult;

/// 自管理事务纪律：协调操作自己负责提交/回滚。
///
/// 内存存储即时生效，这里只留下日志痕迹；SQL 网关接入时在此提交
/// 或回滚它的连接事务。
#[derive(Debug, Default)]
pub struct SelfManagedTransactions;

impl SelfManagedTransactions {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransactionBoundary for SelfManagedTransactions {
    async fn begin(&self) -> StoreResult<()> {
        debug!("开启工作单元");
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        debug!("提交工作单元");
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        warn!("回滚工作单元");
        Ok(())
    }
}

/// 外部管理事务纪律：环境事务由容器/调用方持有，
/// 协调操作只负责取锁与释放锁，三个边界动作全部为空操作。
#[derive(Debug, Default)]
pub struct ExternallyManagedTransactions;

impl ExternallyManagedTransactions {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransactionBoundary for ExternallyManagedTransactions {
    async fn begin(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        Ok(())
    }
}

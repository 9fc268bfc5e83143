//! # jobstore-infrastructure
//!
//! 端口抽象的具体实现：进程内/存储级锁管理器、内存持久层、
//! 两种事务纪律。

pub mod locks;
pub mod memory;
pub mod transactions;

pub use locks::{InProcessLockManager, PgRowLockManager};
pub use memory::MemoryGateway;
pub use transactions::{ExternallyManagedTransactions, SelfManagedTransactions};

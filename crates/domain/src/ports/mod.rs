pub mod locking;
pub mod signaler;
pub mod transaction;

pub use locking::{LockManager, LockName};
pub use signaler::SchedulerSignaler;
pub use transaction::TransactionBoundary;

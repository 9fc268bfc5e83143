pub mod memory;
pub mod postgres;

pub use memory::InProcessLockManager;
pub use postgres::PgRowLockManager;

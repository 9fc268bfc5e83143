//! # jobstore-domain
//!
//! 触发器协调核心的领域层：实体、触发器状态机的状态集合、
//! 调度算法、错误分类，以及持久层/锁/信号/事务的端口抽象。

pub mod calendar;
pub mod entities;
pub mod errors;
pub mod ports;
pub mod repositories;
pub mod schedule;

pub use calendar::Calendar;
pub use entities::{
    CompletedExecutionInstruction, FiredInstanceState, FiredTriggerRecord, JobDetail, JobKey,
    SchedulerStateRecord, Trigger, TriggerFiredBundle, TriggerKey, TriggerState,
};
pub use errors::{StoreError, StoreResult};
pub use ports::{LockManager, LockName, SchedulerSignaler, TransactionBoundary};
pub use repositories::{
    CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
    PersistenceGateway, SchedulerStateRepository, TriggerRepository,
};
pub use schedule::{MisfireInstruction, Schedule};

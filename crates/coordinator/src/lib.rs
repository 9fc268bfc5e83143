//! 触发器生命周期协调核心
//!
//! 围绕持久化网关实现触发器状态机、acquire/fire/complete 协议、
//! 哑火扫描、集群签到接管与启动自恢复。

pub mod cluster;
pub mod coordinator;
pub mod misfire;
pub mod recovery;
pub mod shutdown;

mod unit_of_work;

pub use cluster::ClusterMonitor;
pub use coordinator::TriggerCoordinator;
pub use misfire::{MisfireOutcome, MisfireScanner};
pub use recovery::{RecoveryReport, StartupRecovery};
pub use shutdown::ShutdownHandle;

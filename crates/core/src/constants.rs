//! # 系统常量定义
//!
//! 触发器协调核心使用的保留名称与默认参数。

/// 恢复触发器所在的保留组名。
/// 集群故障转移和启动恢复合成的一次性触发器都放在这个组里，
/// 任务可以通过触发器组判断自己正处于恢复执行中。
pub const RECOVERY_TRIGGER_GROUP: &str = "RECOVERING_JOBS";

/// 默认触发器组名
pub const DEFAULT_TRIGGER_GROUP: &str = "DEFAULT";

/// 恢复触发器的任务数据键：原触发器名称
pub const RECOVERY_ORIGINAL_TRIGGER_NAME_KEY: &str = "recovering_trigger_name";

/// 恢复触发器的任务数据键：原触发器组
pub const RECOVERY_ORIGINAL_TRIGGER_GROUP_KEY: &str = "recovering_trigger_group";

/// 恢复触发器的任务数据键：原触发时刻（毫秒时间戳）
pub const RECOVERY_ORIGINAL_FIRE_TIME_KEY: &str = "recovering_fire_time_ms";

/// 非集群部署使用的实例标识
pub const NON_CLUSTERED_INSTANCE_ID: &str = "NON_CLUSTERED";

/// 判定对端实例失联时额外增加的宽限时间（毫秒）
pub const CLUSTER_CHECKIN_SLACK_MS: i64 = 7_500;

/// 默认集群签到间隔（毫秒）
pub const DEFAULT_CLUSTER_CHECKIN_INTERVAL_MS: u64 = 7_500;

/// 默认哑火判定阈值（毫秒）
pub const DEFAULT_MISFIRE_THRESHOLD_MS: u64 = 60_000;

/// 默认单轮哑火处理上限
pub const DEFAULT_MAX_MISFIRES_TO_HANDLE: usize = 20;

/// 数据库故障后的默认重试间隔（毫秒）
pub const DEFAULT_DB_RETRY_INTERVAL_MS: u64 = 10_000;

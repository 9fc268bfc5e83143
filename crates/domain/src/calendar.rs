use chrono::{DateTime, Utc};

/// 命名排除日历。
///
/// 协调核心只把它当作不透明的时刻过滤器消费：调度算法在推进
/// `next_fire_time` 时跳过被日历排除的时刻。具体的节假日/时段
/// 语义由调用方提供的实现决定。
pub trait Calendar: Send + Sync {
    /// 给定时刻是否允许触发
    fn is_time_included(&self, instant: DateTime<Utc>) -> bool;
}

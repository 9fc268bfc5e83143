use std::fmt;

use async_trait::async_trait;

use crate::errors::StoreResult;

/// 命名锁的封闭集合，每把锁对应一类资源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    TriggerAccess,
    StateAccess,
    CalendarAccess,
    /// 保留，默认未使用
    JobAccess,
    /// 保留，默认未使用
    MisfireAccess,
}

impl LockName {
    pub const ALL: [LockName; 5] = [
        LockName::TriggerAccess,
        LockName::StateAccess,
        LockName::CalendarAccess,
        LockName::JobAccess,
        LockName::MisfireAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::TriggerAccess => "TRIGGER_ACCESS",
            LockName::StateAccess => "STATE_ACCESS",
            LockName::CalendarAccess => "CALENDAR_ACCESS",
            LockName::JobAccess => "JOB_ACCESS",
            LockName::MisfireAccess => "MISFIRE_ACCESS",
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 跨实例互斥原语。
///
/// `obtain_lock` 阻塞直到持有该命名锁；拿不到锁是调用操作的致命
/// 错误（`StoreError::LockUnobtainable`），这里不做静默超时，重试
/// 策略归调用方。单实例模式退化为进程内互斥量；集群模式必须是
/// 所有实例可见的存储级行锁。
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn obtain_lock(&self, name: LockName) -> StoreResult<()>;

    async fn release_lock(&self, name: LockName) -> StoreResult<()>;
}

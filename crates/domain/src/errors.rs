use thiserror::Error;

use crate::entities::{JobKey, TriggerKey};

/// 存储/协调错误类型定义
#[derive(Debug, Error)]
pub enum StoreError {
    /// 无法获得命名锁——对调用操作是致命的，事务回滚后向上传播
    #[error("无法获得锁 {lock}: {reason}")]
    LockUnobtainable { lock: String, reason: String },

    /// 拿不到存储连接
    #[error("存储连接不可用: {0}")]
    ConnectionUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 触发器引用的任务不存在。可恢复：触发器已被置为 ERROR，
    /// 调用方应跳过本次触发而不是中止整批操作。
    #[error("任务不存在: {0}")]
    JobDoesNotExist(JobKey),

    #[error("触发器不存在: {0}")]
    TriggerDoesNotExist(TriggerKey),

    #[error("日历不存在: {0}")]
    CalendarDoesNotExist(String),

    /// 日历仍被触发器引用，拒绝删除
    #[error("日历仍被触发器引用: {0}")]
    CalendarInUse(String),

    #[error("对象已存在: {0}")]
    ObjectAlreadyExists(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 其他存储失败，带上下文包装后回滚重抛
    #[error("存储错误: {0}")]
    Persistence(String),
}

impl StoreError {
    /// 是否属于致命的持久层失败（拿不到连接或锁）
    pub fn is_persistence_critical(&self) -> bool {
        matches!(
            self,
            StoreError::LockUnobtainable { .. }
                | StoreError::ConnectionUnavailable(_)
                | StoreError::Database(_)
        )
    }

    /// 是否为"任务不存在"这一可恢复情形
    pub fn is_job_missing(&self) -> bool {
        matches!(self, StoreError::JobDoesNotExist(_))
    }
}

/// 统一的Result类型
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let lock = StoreError::LockUnobtainable {
            lock: "TRIGGER_ACCESS".to_string(),
            reason: "connection closed".to_string(),
        };
        assert!(lock.is_persistence_critical());
        assert!(!lock.is_job_missing());

        let missing = StoreError::JobDoesNotExist(JobKey::new("j", "g"));
        assert!(missing.is_job_missing());
        assert!(!missing.is_persistence_critical());

        let generic = StoreError::Persistence("boom".to_string());
        assert!(!generic.is_persistence_critical());
        assert!(!generic.is_job_missing());
    }
}

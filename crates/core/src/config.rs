//! 协调核心的配置模型
//!
//! 配置来源优先级：显式 TOML 文件 -> 环境变量覆盖 -> 内置默认值。
//! 集群模式下 `use_db_locks` 会在归一化时被强制打开。

use std::env;
use std::path::Path;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_CLUSTER_CHECKIN_INTERVAL_MS, DEFAULT_DB_RETRY_INTERVAL_MS,
    DEFAULT_MAX_MISFIRES_TO_HANDLE, DEFAULT_MISFIRE_THRESHOLD_MS, NON_CLUSTERED_INSTANCE_ID,
};

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件读取失败: {0}")]
    File(#[from] std::io::Error),

    #[error("配置解析失败: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("配置校验失败: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 协调核心配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// 实例标识，集群内必须唯一
    pub instance_id: String,
    /// 是否集群部署（多个实例共享同一个存储）
    pub is_clustered: bool,
    /// 是否使用存储级行锁；集群模式下强制为 true
    pub use_db_locks: bool,
    /// 哑火判定阈值（毫秒），同时驱动哑火扫描的空闲休眠间隔
    pub misfire_threshold_ms: u64,
    /// 集群签到间隔（毫秒）
    pub cluster_checkin_interval_ms: u64,
    /// 单轮哑火处理上限
    pub max_misfires_to_handle_at_a_time: usize,
    /// 存储故障后的退避重试间隔（毫秒）
    pub db_retry_interval_ms: u64,
    /// 插入触发器/任务时是否先取锁
    pub lock_on_insert: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_id: NON_CLUSTERED_INSTANCE_ID.to_string(),
            is_clustered: false,
            use_db_locks: false,
            misfire_threshold_ms: DEFAULT_MISFIRE_THRESHOLD_MS,
            cluster_checkin_interval_ms: DEFAULT_CLUSTER_CHECKIN_INTERVAL_MS,
            max_misfires_to_handle_at_a_time: DEFAULT_MAX_MISFIRES_TO_HANDLE,
            db_retry_interval_ms: DEFAULT_DB_RETRY_INTERVAL_MS,
            lock_on_insert: true,
        }
    }
}

impl CoordinatorConfig {
    /// 从 TOML 文件加载配置，随后应用环境变量覆盖并归一化
    pub fn load(path: Option<&str>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)?
            }
            Some(p) => {
                return Err(ConfigError::Validation(format!("配置文件不存在: {p}")));
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// 应用环境变量覆盖（JOBSTORE_INSTANCE_ID / JOBSTORE_CLUSTERED）
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = env::var("JOBSTORE_INSTANCE_ID") {
            self.instance_id = id;
        }
        if let Ok(clustered) = env::var("JOBSTORE_CLUSTERED") {
            self.is_clustered = matches!(clustered.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// 归一化：集群模式必须使用存储级锁
    pub fn normalize(&mut self) {
        if self.is_clustered {
            self.use_db_locks = true;
        }
    }

    /// 校验配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::Validation("instance_id 不能为空".to_string()));
        }
        if self.misfire_threshold_ms == 0 {
            return Err(ConfigError::Validation(
                "misfire_threshold_ms 必须大于 0".to_string(),
            ));
        }
        if self.cluster_checkin_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "cluster_checkin_interval_ms 必须大于 0".to_string(),
            ));
        }
        if self.max_misfires_to_handle_at_a_time == 0 {
            return Err(ConfigError::Validation(
                "max_misfires_to_handle_at_a_time 必须大于 0".to_string(),
            ));
        }
        if self.is_clustered && !self.use_db_locks {
            return Err(ConfigError::Validation(
                "集群模式必须启用 use_db_locks".to_string(),
            ));
        }
        Ok(())
    }

    pub fn misfire_threshold(&self) -> Duration {
        Duration::milliseconds(self.misfire_threshold_ms as i64)
    }

    pub fn cluster_checkin_interval(&self) -> Duration {
        Duration::milliseconds(self.cluster_checkin_interval_ms as i64)
    }

    pub fn db_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.db_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instance_id, NON_CLUSTERED_INSTANCE_ID);
        assert!(!config.is_clustered);
        assert!(config.lock_on_insert);
        assert_eq!(config.max_misfires_to_handle_at_a_time, 20);
    }

    #[test]
    fn test_normalize_forces_db_locks_when_clustered() {
        let mut config = CoordinatorConfig {
            is_clustered: true,
            use_db_locks: false,
            ..Default::default()
        };
        config.normalize();
        assert!(config.use_db_locks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_misfire_threshold_rejected() {
        let config = CoordinatorConfig {
            misfire_threshold_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_instance_id_rejected() {
        let config = CoordinatorConfig {
            instance_id: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let toml_text = r#"
            instance_id = "node-1"
            is_clustered = true
            misfire_threshold_ms = 5000
        "#;
        let mut config: CoordinatorConfig = toml::from_str(toml_text).unwrap();
        config.normalize();
        assert_eq!(config.instance_id, "node-1");
        assert!(config.is_clustered);
        assert!(config.use_db_locks);
        assert_eq!(config.misfire_threshold(), Duration::milliseconds(5000));
        // 未出现的键保持默认值
        assert_eq!(config.db_retry_interval_ms, 10_000);
    }
}

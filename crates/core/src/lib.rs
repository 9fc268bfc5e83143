//! # jobstore-core
//!
//! 协调核心的配置面与共享常量。

pub mod config;
pub mod constants;

pub use config::{ConfigError, ConfigResult, CoordinatorConfig};

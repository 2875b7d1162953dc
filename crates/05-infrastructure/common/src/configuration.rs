//! 生命周期调度配置

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 生命周期调度配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// 等待 fork 任务超过该时长（毫秒）时输出警告
    pub join_warning_threshold_ms: u64,
    /// 停止时等待单个 fork 任务的最长时长（毫秒），超时后分离该任务；`None` 表示一直等待
    pub stop_join_timeout_ms: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            join_warning_threshold_ms: 5_000,
            stop_join_timeout_ms: None,
        }
    }
}

impl LifecycleConfig {
    /// 警告阈值
    pub fn join_warning_threshold(&self) -> Duration {
        Duration::from_millis(self.join_warning_threshold_ms)
    }

    /// 停止等待超时
    pub fn stop_join_timeout(&self) -> Option<Duration> {
        self.stop_join_timeout_ms.map(Duration::from_millis)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_warning_threshold_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "join_warning_threshold_ms 必须大于 0".to_string(),
            });
        }
        if self.stop_join_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "stop_join_timeout_ms 必须大于 0".to_string(),
            });
        }
        Ok(())
    }
}

//! 容器配置源
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//!
//! 1. 结构体默认值
//! 2. 可选的配置文件（按扩展名识别 TOML / JSON / YAML）
//! 3. 环境变量，例如 `LORN_CONTAINER__LIFECYCLE__STOP_JOIN_TIMEOUT_MS=2000`

use infrastructure_common::{ConfigError, ConfigResult, LifecycleConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// 默认的环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "LORN_CONTAINER";

/// 环境变量的层级分隔符
pub const ENV_SEPARATOR: &str = "__";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 日志过滤指令，例如 `info` 或 `info,di_impl=debug`
    pub level: String,
    /// 是否显示目标
    pub show_target: bool,
    /// 是否显示线程ID
    pub show_thread_ids: bool,
    /// 是否显示文件名
    pub show_file: bool,
    /// 是否显示行号
    pub show_line_number: bool,
    /// 是否使用 JSON 格式
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: false,
        }
    }
}

impl LoggingSettings {
    /// 创建开发环境日志配置
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            show_target: true,
            show_thread_ids: true,
            show_file: true,
            show_line_number: true,
            json_format: false,
        }
    }

    /// 创建生产环境日志配置
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: true,
        }
    }

    /// 解析日志过滤指令
    pub fn filter(&self) -> ConfigResult<EnvFilter> {
        EnvFilter::try_new(&self.level).map_err(|e| ConfigError::ValidationError {
            message: format!("日志级别无效: {} ({})", self.level, e),
        })
    }
}

/// 容器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// 应用名称，作为根作用域名称
    pub application_name: String,
    /// 生命周期调度配置
    pub lifecycle: LifecycleConfig,
    /// 日志配置
    pub logging: LoggingSettings,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            application_name: "application".to_string(),
            lifecycle: LifecycleConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ContainerSettings {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.application_name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "application_name 不能为空".to_string(),
            });
        }
        self.lifecycle.validate()?;
        self.logging.filter()?;
        Ok(())
    }
}

/// 配置加载器
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    /// 创建只读取默认值与环境变量的加载器
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
        }
    }

    /// 添加配置文件，文件必须存在
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// 使用自定义环境变量前缀
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// 不读取环境变量
    pub fn without_environment(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// 加载并验证配置
    pub fn load(&self) -> ConfigResult<ContainerSettings> {
        let mut builder = config::Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            debug!("添加配置文件: {}", path.display());
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        if let Some(prefix) = &self.env_prefix {
            debug!("添加环境变量配置源，前缀: {}", prefix);
            builder = builder.add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let settings: ContainerSettings = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ConfigError::ParseError {
                source: Box::new(e),
            })?;

        settings.validate()?;
        info!("容器配置加载完成: {}", settings.application_name);
        Ok(settings)
    }
}

//! 容器构建器

use crate::bootstrapper::Bootstrapper;
use crate::config_sources::{ContainerSettings, LoggingSettings, SettingsLoader};
use crate::infrastructure::Application;
use di_abstractions::{ComponentSource, Extension, StaticSource};
use infrastructure_common::{InfrastructureError, InfrastructureResult, ScopeDescriptor};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// 容器构建器
///
/// 使用建造者模式组装配置、组件来源与扩展，构建可运行的 [`Application`]
pub struct ContainerBuilder {
    /// 配置加载器
    loader: SettingsLoader,
    /// 直接给定的配置，优先于加载器
    settings: Option<ContainerSettings>,
    /// 组件来源列表
    sources: Vec<Box<dyn ComponentSource>>,
    /// 扩展列表
    extensions: Vec<Arc<dyn Extension>>,
    /// 是否启用日志初始化
    logging_enabled: bool,
    /// 覆盖配置中的日志设置
    logging: Option<LoggingSettings>,
}

impl ContainerBuilder {
    /// 创建新的容器构建器
    pub fn new() -> Self {
        Self {
            loader: SettingsLoader::new(),
            settings: None,
            sources: Vec::new(),
            extensions: Vec::new(),
            logging_enabled: false, // 默认不启用日志初始化
            logging: None,
        }
    }

    /// 添加配置文件
    pub fn with_settings_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        info!("添加配置文件: {}", path.as_ref().display());
        self.loader = self.loader.with_file(path);
        self
    }

    /// 设置环境变量前缀
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.loader = self.loader.with_env_prefix(prefix);
        self
    }

    /// 不读取环境变量
    pub fn without_environment(mut self) -> Self {
        self.loader = self.loader.without_environment();
        self
    }

    /// 直接使用给定配置，不再加载配置源
    pub fn with_settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// 添加组件来源
    pub fn add_source<T: ComponentSource + 'static>(mut self, source: T) -> Self {
        debug!("添加组件来源: {}", source.name());
        self.sources.push(Box::new(source));
        self
    }

    /// 添加固定的作用域描述符
    pub fn add_descriptor(self, descriptor: ScopeDescriptor) -> Self {
        self.add_source(StaticSource::new(descriptor))
    }

    /// 添加扩展
    pub fn add_extension<T: Extension + 'static>(mut self, extension: T) -> Self {
        info!("添加扩展: {}", extension.name());
        self.extensions.push(Arc::new(extension));
        self
    }

    /// 配置日志
    pub fn with_logging(mut self, logging: LoggingSettings) -> Self {
        self.logging = Some(logging);
        self.logging_enabled = true;
        self
    }

    /// 使用配置中的日志设置初始化日志
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// 构建应用
    pub async fn build(self) -> InfrastructureResult<Application> {
        let settings = match self.settings {
            Some(settings) => {
                settings.validate()?;
                settings
            }
            None => self.loader.load()?,
        };

        // 只有在明确要求时才初始化日志，避免测试中重复初始化
        if self.logging_enabled {
            let logging = self.logging.as_ref().unwrap_or(&settings.logging);
            initialize_logging(logging)?;
        }

        info!("开始构建应用: {}", settings.application_name);
        let template = Bootstrapper::new(self.sources, self.extensions.clone())
            .bootstrap(&settings)
            .await?;
        let lifetime = template.instantiate().with_extensions(self.extensions);

        info!("应用构建完成");
        Ok(Application::new(settings, template, lifetime))
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先于配置中的日志级别。全局订阅者已存在时保持不变。
pub fn initialize_logging(settings: &LoggingSettings) -> InfrastructureResult<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => settings.filter()?,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(settings.show_target)
        .with_thread_ids(settings.show_thread_ids)
        .with_file(settings.show_file)
        .with_line_number(settings.show_line_number);

    let result = if settings.json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    match result {
        Ok(()) => {
            info!("日志系统初始化完成");
            Ok(())
        }
        Err(e) if tracing::dispatcher::has_been_set() => {
            debug!("日志系统已初始化, 跳过: {}", e);
            Ok(())
        }
        Err(e) => Err(InfrastructureError::BootstrapFailed {
            message: format!("日志初始化失败: {}", e),
        }),
    }
}

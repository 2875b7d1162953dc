//! # 容器组合层
//!
//! 把配置加载、组件来源扫描、扩展分派与生命周期实例组合成一个
//! 可运行的 [`Application`]。
//!
//! ## 主要功能
//!
//! - **容器构建器**: 使用构建者模式组装组件来源与扩展
//! - **配置源管理**: 默认值、配置文件与环境变量分层叠加
//! - **启动器**: 扫描来源并把成员注解分派给扩展
//! - **应用入口**: 启动、停止与服务查找
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use infrastructure_composition::Application;
//! use infrastructure_common::ScopeDescriptor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let application = Application::builder()
//!         .with_settings_file("container.toml")
//!         .add_descriptor(ScopeDescriptor::new("orders"))
//!         .enable_logging(true)
//!         .build()
//!         .await?;
//!
//!     application
//!         .run_until(async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bootstrapper;
pub mod builder;
pub mod config_sources;
pub mod infrastructure;

// 重新导出主要类型
pub use bootstrapper::Bootstrapper;
pub use builder::{initialize_logging, ContainerBuilder};
pub use config_sources::{ContainerSettings, LoggingSettings, SettingsLoader};
pub use infrastructure::{Application, ApplicationMetrics};

// 重新导出错误类型
pub use infrastructure_common::InfrastructureError;

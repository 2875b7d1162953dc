//! # Dependency Injection Abstractions
//!
//! 容器核心在各个接缝处的抽象接口。
//!
//! ## 核心接口
//!
//! - [`ComponentSource`] - 产生作用域描述符的外部扫描器
//! - [`Registrar`] - 构建期注册接口
//! - [`Extension`] - 解释成员注解并参与进程启停的扩展
//! - [`LifetimeControl`] - 生命周期实例的迁移入口
//! - [`ServiceLocator`] - 初始化后的服务查找

pub mod container;
pub mod extension;
pub mod registry;
pub mod resolver;
pub mod scanner;

pub use container::*;
pub use extension::*;
pub use registry::*;
pub use resolver::*;
pub use scanner::*;

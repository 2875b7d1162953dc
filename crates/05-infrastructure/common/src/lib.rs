//! # Infrastructure Common
//!
//! 这个 crate 提供了组件容器核心共享的基础类型。
//!
//! ## 核心组件
//!
//! - [`Key`] / [`DependencyDescriptor`] - 服务键与依赖描述
//! - [`ComponentDescriptor`] / [`ScopeDescriptor`] - 外部扫描器产生的声明式描述
//! - [`InvocationTarget`] - 工厂与生命周期回调的调用目标
//! - [`LifecycleState`] / [`LifecyclePhase`] - 生命周期状态机与操作阶段
//! - [`BuildError`] / [`LifecycleError`] - 构建期与运行期错误
//!
//! ## 设计原则
//!
//! - 描述符由外部产生，容器核心不做运行时类型内省
//! - 异步优先的调用目标
//! - 无全局状态

pub mod component;
pub mod configuration;
pub mod errors;
pub mod key;
pub mod lifecycle;
pub mod metadata;

pub use component::*;
pub use configuration::*;
pub use errors::*;
pub use key::*;
pub use lifecycle::*;
pub use metadata::*;

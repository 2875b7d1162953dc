//! # 依赖注入具体实现
//!
//! 提供构建上下文、依赖解析器、常量池以及生命周期调度器的实现。
//!
//! ## 使用流程
//!
//! 1. 通过 [`BuildContext`]（实现了 [`di_abstractions::Registrar`]）登记作用域、组件与操作
//! 2. [`BuildContext::build`] 完成解析，得到不可变的 [`ApplicationTemplate`]
//! 3. [`ApplicationTemplate::instantiate`] 创建 [`Lifetime`]，依次执行 initialize / start / stop
//!
//! ```rust,ignore
//! let mut context = BuildContext::new("app");
//! // ... 登记组件 ...
//! let template = context.build(LifecycleConfig::default())?;
//! let lifetime = template.instantiate();
//! lifetime.start().await?;
//! lifetime.stop().await?;
//! ```

pub mod build;
pub mod lifetime;
pub mod plan;
pub mod pool;
pub mod registry;
pub mod resolver;
mod scheduler;
mod task_group;
pub mod template;

pub use build::{BuildContext, PendingMember};
pub use lifetime::{Lifetime, LifetimeMetrics, StateChange};
pub use plan::InvocationPlan;
pub use pool::{ConstantPool, ConstantPoolTemplate, PoolSlot};
pub use registry::{EntryId, EntrySource, Provider, RegistrySet, ServiceContract, ServiceEntry, ServiceRegistry};
pub use resolver::DependencyGraph;
pub use template::{ApplicationTemplate, ComponentTemplate};

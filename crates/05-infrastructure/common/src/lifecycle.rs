//! 组件生命周期定义
//!
//! 包括实例化模式、生命周期状态机、操作阶段以及 fork/join 选项。

use crate::component::InvocationTarget;
use crate::key::DependencyDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 组件实例化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InstantiationMode {
    /// 单例模式 - 在初始化阶段构造，存放在常量池中
    #[default]
    Singleton,
    /// 延迟模式 - 首次使用时构造，每个生命周期实例只构造一次
    Lazy,
    /// 原型模式 - 每次注入都构造新实例
    Prototype,
}

/// 生命周期状态
///
/// 生命周期实例与每个组件共用该状态机：
/// `Uninitialized → Initializing → Initialized → Starting → Running → Stopping → Terminated`，
/// `Failed` 是可以从 `Initializing`、`Starting`、`Stopping` 进入的吸收状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// 未初始化
    #[default]
    Uninitialized,
    /// 初始化中
    Initializing,
    /// 已初始化
    Initialized,
    /// 启动中
    Starting,
    /// 运行中
    Running,
    /// 停止中
    Stopping,
    /// 已终止
    Terminated,
    /// 失败
    Failed,
}

impl LifecycleState {
    /// 状态机是否允许迁移到目标状态
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Terminated)
                | (Initializing, Initialized)
                | (Initialized, Starting)
                | (Initialized, Stopping)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Terminated)
                | (Initializing, Failed)
                | (Starting, Failed)
                | (Stopping, Failed)
        )
    }

    /// 组件是否处于需要停止的存活状态
    pub fn is_live(self) -> bool {
        matches!(self, Self::Initialized | Self::Starting | Self::Running)
    }

    /// 是否为终态
    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 生命周期迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// 初始化
    Initialize,
    /// 启动
    Start,
    /// 停止
    Stop,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// 操作相对于依赖方的顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationOrder {
    /// 依赖方之前执行（拓扑顺序）
    BeforeDependants,
    /// 所有依赖方之后执行（逆拓扑顺序）
    AfterDependants,
}

/// 生命周期操作阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// 构造实例
    Factory,
    /// 注入
    Inject,
    /// 初始化（依赖方之前）
    InitializePre,
    /// 初始化（依赖方之后）
    InitializePost,
    /// 启动（依赖方之前）
    StartPre,
    /// 启动（依赖方之后）
    StartPost,
    /// 停止（依赖方之前）
    StopPre,
    /// 停止（依赖方之后）
    StopPost,
}

impl LifecyclePhase {
    /// 阶段所属的迁移
    pub fn transition(self) -> Transition {
        match self {
            Self::Factory | Self::Inject | Self::InitializePre | Self::InitializePost => {
                Transition::Initialize
            }
            Self::StartPre | Self::StartPost => Transition::Start,
            Self::StopPre | Self::StopPost => Transition::Stop,
        }
    }

    /// 阶段的执行顺序
    pub fn order(self) -> OperationOrder {
        match self {
            Self::InitializePost | Self::StartPost | Self::StopPost => {
                OperationOrder::AfterDependants
            }
            _ => OperationOrder::BeforeDependants,
        }
    }

    /// 构造类阶段（FACTORY / INJECT）
    pub fn is_construction(self) -> bool {
        matches!(self, Self::Factory | Self::Inject)
    }
}

/// fork 任务的等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JoinPolicy {
    /// 在依赖方的操作执行前等待
    BeforeDependants,
    /// 在依赖方的操作执行后（当前遍历结束时）等待
    AfterDependants,
    /// 在生命周期进入就绪状态前等待
    #[default]
    BeforeReady,
}

/// fork 选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkOptions {
    /// 等待策略
    pub join: JoinPolicy,
    /// 保持运行：任务组关闭时不等待，任务被分离
    pub keep_running: bool,
}

impl ForkOptions {
    /// 使用指定等待策略
    pub fn join(join: JoinPolicy) -> Self {
        Self {
            join,
            keep_running: false,
        }
    }

    /// 保持运行的后台任务
    pub fn keep_running() -> Self {
        Self {
            join: JoinPolicy::BeforeReady,
            keep_running: true,
        }
    }
}

/// 生命周期操作句柄
///
/// 由扫描器创建，调度器在每次生命周期迁移中恰好消费一次。
#[derive(Debug, Clone)]
pub struct LifecycleOperation {
    /// 阶段
    pub phase: LifecyclePhase,
    /// 除组件自身外的依赖
    pub dependencies: Vec<DependencyDescriptor>,
    /// 调用目标
    pub target: InvocationTarget,
    /// fork 选项，`None` 表示同步执行
    pub fork: Option<ForkOptions>,
    /// 停止时是否中断仍在运行的启动任务
    pub interrupt_on_stopping: bool,
    /// 失败时是否停止整个生命周期
    pub stop_on_failure: bool,
}

impl LifecycleOperation {
    /// 创建指定阶段的操作
    pub fn new(phase: LifecyclePhase, target: InvocationTarget) -> Self {
        Self {
            phase,
            dependencies: Vec::new(),
            target,
            fork: None,
            interrupt_on_stopping: true,
            stop_on_failure: true,
        }
    }

    /// 注入操作
    pub fn inject(target: InvocationTarget) -> Self {
        Self::new(LifecyclePhase::Inject, target)
    }

    /// 初始化操作（默认在依赖方之前）
    pub fn initialize(target: InvocationTarget) -> Self {
        Self::new(LifecyclePhase::InitializePre, target)
    }

    /// 启动操作（默认在依赖方之前）
    pub fn start(target: InvocationTarget) -> Self {
        Self::new(LifecyclePhase::StartPre, target)
    }

    /// 停止操作（默认在依赖方之后）
    pub fn stop(target: InvocationTarget) -> Self {
        Self::new(LifecyclePhase::StopPost, target)
    }

    /// 调整为依赖方之后执行
    pub fn after_dependants(mut self) -> Self {
        self.phase = match self.phase {
            LifecyclePhase::InitializePre => LifecyclePhase::InitializePost,
            LifecyclePhase::StartPre => LifecyclePhase::StartPost,
            LifecyclePhase::StopPre => LifecyclePhase::StopPost,
            other => other,
        };
        self
    }

    /// 调整为依赖方之前执行
    pub fn before_dependants(mut self) -> Self {
        self.phase = match self.phase {
            LifecyclePhase::InitializePost => LifecyclePhase::InitializePre,
            LifecyclePhase::StartPost => LifecyclePhase::StartPre,
            LifecyclePhase::StopPost => LifecyclePhase::StopPre,
            other => other,
        };
        self
    }

    /// 添加依赖
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 以 fork 方式执行
    pub fn forked(mut self, options: ForkOptions) -> Self {
        self.fork = Some(options);
        self
    }

    /// 设置失败时是否停止生命周期
    pub fn with_stop_on_failure(mut self, stop_on_failure: bool) -> Self {
        self.stop_on_failure = stop_on_failure;
        self
    }

    /// 设置停止时是否中断启动任务
    pub fn with_interrupt_on_stopping(mut self, interrupt: bool) -> Self {
        self.interrupt_on_stopping = interrupt;
        self
    }

    /// 操作名称
    pub fn name(&self) -> &str {
        &self.target.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> InvocationTarget {
        InvocationTarget::from_fn(name, 0, |_| Ok(None))
    }

    #[test]
    fn test_state_machine_transitions() {
        use LifecycleState::*;
        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Failed));
        assert!(Starting.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Initializing));
        assert!(!Terminated.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Failed));
    }

    #[test]
    fn test_phase_defaults() {
        assert_eq!(LifecycleOperation::initialize(noop("a")).phase, LifecyclePhase::InitializePre);
        assert_eq!(LifecycleOperation::start(noop("a")).phase, LifecyclePhase::StartPre);
        assert_eq!(LifecycleOperation::stop(noop("a")).phase, LifecyclePhase::StopPost);
        assert_eq!(
            LifecycleOperation::stop(noop("a")).before_dependants().phase,
            LifecyclePhase::StopPre
        );
        assert_eq!(LifecyclePhase::StopPost.order(), OperationOrder::AfterDependants);
        assert_eq!(LifecyclePhase::Inject.transition(), Transition::Initialize);
    }

    #[test]
    fn test_operation_flags_default_true() {
        let op = LifecycleOperation::start(noop("serve"));
        assert!(op.interrupt_on_stopping);
        assert!(op.stop_on_failure);
        assert!(op.fork.is_none());
        assert_eq!(op.name(), "serve");
    }
}

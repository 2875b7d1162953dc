//! 错误类型定义

use crate::key::Key;
use crate::lifecycle::{LifecyclePhase, LifecycleState, Transition};
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    #[error("配置解析失败: {source}")]
    ParseError {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("配置验证失败: {message}")]
    ValidationError { message: String },
}

/// 组件错误类型
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("组件扫描失败: {message}")]
    ScanError { message: String },

    #[error("组件描述无效: {name}, 原因: {message}")]
    InvalidDescriptor { name: String, message: String },
}

impl ComponentError {
    /// 创建扫描错误
    pub fn scan_error(message: impl Into<String>) -> Self {
        Self::ScanError {
            message: message.into(),
        }
    }
}

/// 构建期错误
///
/// 构建期错误总是致命的，构建中止且不返回任何部分结果。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("重复的服务提供者: {key}, 注册位置: {first} 与 {second}")]
    DuplicateProvider {
        key: Key,
        first: String,
        second: String,
    },

    #[error("无法解析依赖: 组件 {component} 的操作 {operation} 第 {index} 个参数需要 {key}")]
    UnresolvedDependency {
        component: String,
        operation: String,
        index: usize,
        key: Key,
    },

    #[error("检测到循环依赖: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("重复导出: {key} 同时由作用域 {first_scope} 与 {second_scope} 导出")]
    DuplicateExport {
        key: Key,
        first_scope: String,
        second_scope: String,
    },

    #[error("作用域 {scope} 导出了不可见的服务 {key}")]
    UnknownExport { scope: String, key: Key },

    #[error("参数个数不匹配: {operation} 声明 {arity} 个参数, 但有 {dependencies} 个依赖")]
    ArityMismatch {
        operation: String,
        arity: usize,
        dependencies: usize,
    },

    #[error("无效的操作: 组件 {component} 的 {operation}, 原因: {reason}")]
    InvalidOperation {
        component: String,
        operation: String,
        reason: String,
    },

    #[error("无效的引用: {message}")]
    InvalidReference { message: String },
}

/// 常量池错误
///
/// 这些错误意味着调度存在缺陷，而不是用户错误。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantPoolError {
    #[error("常量池槽位 {slot} 已被写入")]
    SlotAlreadyWritten { slot: usize },

    #[error("常量池槽位 {slot} 尚未写入")]
    SlotNotWritten { slot: usize },

    #[error("常量池槽位 {slot} 写入了空值")]
    NullValue { slot: usize },

    #[error("常量池槽位 {slot} 越界 (长度 {len})")]
    SlotOutOfRange { slot: usize, len: usize },
}

/// 运行期生命周期错误
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("生命周期操作失败: 组件 {bean} 在 {phase:?} 阶段执行 {operation} 失败: {cause}")]
    OperationFailure {
        phase: LifecyclePhase,
        bean: String,
        operation: String,
        cause: anyhow::Error,
        /// 失败后执行停止时收集到的错误
        suppressed: Vec<LifecycleError>,
    },

    #[error("停止时中断: 组件 {bean} 的任务 {operation} 被中断后失败: {message}")]
    InterruptedWhileStopping {
        bean: String,
        operation: String,
        message: String,
    },

    #[error("非法状态: 无法在 {state} 状态下执行 {transition}")]
    IllegalState {
        transition: Transition,
        state: LifecycleState,
    },

    #[error("停止过程中有 {} 个错误", .failures.len())]
    StopFailed { failures: Vec<LifecycleError> },

    #[error("{transition} 被中止: {reason}")]
    TransitionAborted {
        transition: Transition,
        reason: String,
    },

    #[error("内部调度错误: 组件 {bean}: {source}")]
    Internal {
        bean: String,
        #[source]
        source: ConstantPoolError,
    },
}

impl LifecycleError {
    /// 创建操作失败错误
    pub fn operation_failure(
        phase: LifecyclePhase,
        bean: impl Into<String>,
        operation: impl Into<String>,
        cause: anyhow::Error,
    ) -> Self {
        Self::OperationFailure {
            phase,
            bean: bean.into(),
            operation: operation.into(),
            cause,
            suppressed: Vec::new(),
        }
    }

    /// 出错的组件名称
    pub fn bean(&self) -> Option<&str> {
        match self {
            Self::OperationFailure { bean, .. }
            | Self::InterruptedWhileStopping { bean, .. }
            | Self::Internal { bean, .. } => Some(bean),
            _ => None,
        }
    }

    /// 出错的阶段
    pub fn phase(&self) -> Option<LifecyclePhase> {
        match self {
            Self::OperationFailure { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// 基础设施错误类型
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("配置错误: {source}")]
    ConfigError {
        #[from]
        source: ConfigError,
    },

    #[error("组件错误: {source}")]
    ComponentError {
        #[from]
        source: ComponentError,
    },

    #[error("构建错误: {source}")]
    BuildError {
        #[from]
        source: BuildError,
    },

    #[error("生命周期错误: {source}")]
    LifecycleError {
        #[from]
        source: LifecycleError,
    },

    #[error("基础设施启动失败: {message}")]
    BootstrapFailed { message: String },
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type BuildResult<T> = Result<T, BuildError>;
pub type LifecycleResult<T> = Result<T, LifecycleError>;
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;

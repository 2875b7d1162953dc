//! 生命周期控制接口

use async_trait::async_trait;
use infrastructure_common::{LifecycleResult, LifecycleState};

/// 生命周期控制 trait
///
/// 同一实例上的迁移是串行的。
#[async_trait]
pub trait LifetimeControl: Send + Sync {
    /// 初始化：构造、注入并初始化所有单例组件
    async fn initialize(&self) -> LifecycleResult<()>;

    /// 启动；尚未初始化时先执行初始化
    async fn start(&self) -> LifecycleResult<()>;

    /// 停止；停止期间的错误会被收集，不会中途放弃
    async fn stop(&self) -> LifecycleResult<()>;

    /// 当前状态
    fn state(&self) -> LifecycleState;
}

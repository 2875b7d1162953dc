//! 调用计划
//!
//! 每个操作节点在构建期编译为一个 [`InvocationPlan`]：一组参数提供闭包加上调用目标。
//! 运行期由 [`LifetimeContext`] 求值，闭包只捕获槽位与下标，不持有任何全局状态。

use crate::pool::{ConstantPool, PoolSlot};
use crate::registry::Provider;
use crate::template::ApplicationTemplate;
use futures::future::BoxFuture;
use infrastructure_common::{
    Arguments, ComponentId, ConstantPoolError, ForkOptions, InvocationTarget, LifecycleError,
    LifecyclePhase, LifecycleResult, NodeId, OperationFuture, Value,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 参数求值的 future
pub(crate) type ArgumentFuture = BoxFuture<'static, LifecycleResult<Option<Value>>>;

/// 参数提供闭包
pub(crate) type ArgumentProvider =
    Arc<dyn Fn(&Arc<LifetimeContext>) -> ArgumentFuture + Send + Sync>;

/// 把提供者编译为参数提供闭包
pub(crate) fn compile_argument(provider: &Provider) -> ArgumentProvider {
    match provider.clone() {
        Provider::Constant { slot, component } => Arc::new(move |ctx: &Arc<LifetimeContext>| -> ArgumentFuture {
            let value = ctx.read_slot(slot, component).map(Some);
            Box::pin(async move { value })
        }),
        Provider::Lazy { cell, component } => Arc::new(move |ctx: &Arc<LifetimeContext>| -> ArgumentFuture {
            let ctx = ctx.clone();
            Box::pin(async move { ctx.lazy(cell, component).await.map(Some) })
        }),
        Provider::Prototype { component } => Arc::new(move |ctx: &Arc<LifetimeContext>| -> ArgumentFuture {
            let construction = ctx.construct(component);
            Box::pin(async move { construction.await.map(Some) })
        }),
        Provider::Instance(value) => Arc::new(move |_: &Arc<LifetimeContext>| -> ArgumentFuture {
            let value = value.clone();
            Box::pin(async move { Ok(Some(value)) })
        }),
        Provider::Sidecar(supplier) => Arc::new(move |_: &Arc<LifetimeContext>| -> ArgumentFuture {
            let value = supplier();
            Box::pin(async move { Ok(Some(value)) })
        }),
        Provider::Absent(kind) => Arc::new(move |_: &Arc<LifetimeContext>| -> ArgumentFuture {
            Box::pin(async move { Ok(kind.absent_value()) })
        }),
    }
}

/// 调用计划
pub struct InvocationPlan {
    /// 操作节点
    pub node: NodeId,
    /// 所属组件
    pub component: ComponentId,
    /// 所属组件名称
    pub bean: String,
    /// 操作名称
    pub name: String,
    /// 阶段
    pub phase: LifecyclePhase,
    /// fork 选项
    pub fork: Option<ForkOptions>,
    /// 停止时是否中断启动任务
    pub interrupt_on_stopping: bool,
    /// 失败时是否停止生命周期
    pub stop_on_failure: bool,
    providers: Vec<Provider>,
    arguments: Vec<ArgumentProvider>,
    target: InvocationTarget,
}

impl InvocationPlan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node: NodeId,
        component: ComponentId,
        bean: String,
        name: String,
        phase: LifecyclePhase,
        fork: Option<ForkOptions>,
        interrupt_on_stopping: bool,
        stop_on_failure: bool,
        providers: Vec<Provider>,
        target: InvocationTarget,
    ) -> Self {
        let arguments = providers.iter().map(compile_argument).collect();
        Self {
            node,
            component,
            bean,
            name,
            phase,
            fork,
            interrupt_on_stopping,
            stop_on_failure,
            providers,
            arguments,
            target,
        }
    }

    /// 解析后的依赖提供者
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// 在编排序列上求值全部参数
    pub(crate) async fn resolve_arguments(
        &self,
        ctx: &Arc<LifetimeContext>,
    ) -> LifecycleResult<Vec<Option<Value>>> {
        let mut values = Vec::with_capacity(self.arguments.len());
        for argument in &self.arguments {
            values.push(argument(ctx).await?);
        }
        Ok(values)
    }

    /// 调用目标
    pub(crate) fn call(
        &self,
        bean: Option<Value>,
        values: Vec<Option<Value>>,
        interrupt: CancellationToken,
    ) -> OperationFuture {
        self.target.invoke(Arguments::new(bean, values, interrupt))
    }

    /// fork 调用：同步目标交给阻塞线程池，不占用编排序列
    pub(crate) fn call_forked(
        &self,
        bean: Option<Value>,
        values: Vec<Option<Value>>,
        interrupt: CancellationToken,
    ) -> OperationFuture {
        let args = Arguments::new(bean, values, interrupt);
        match self.target.blocking() {
            Some(invoker) => Box::pin(async move {
                tokio::task::spawn_blocking(move || invoker(args))
                    .await
                    .map_err(|e| anyhow::anyhow!("同步任务异常终止: {}", e))?
            }),
            None => self.target.invoke(args),
        }
    }

    /// 包装调用失败
    pub(crate) fn failure(&self, cause: anyhow::Error) -> LifecycleError {
        LifecycleError::operation_failure(self.phase, self.bean.clone(), self.name.clone(), cause)
    }
}

impl fmt::Debug for InvocationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationPlan")
            .field("node", &self.node)
            .field("bean", &self.bean)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("fork", &self.fork)
            .field("providers", &self.providers)
            .finish()
    }
}

/// 一个生命周期实例的运行期求值环境
pub(crate) struct LifetimeContext {
    pub(crate) template: Arc<ApplicationTemplate>,
    pub(crate) pool: ConstantPool,
    lazy: Box<[tokio::sync::OnceCell<Value>]>,
    operations: AtomicU64,
}

impl LifetimeContext {
    pub(crate) fn new(template: Arc<ApplicationTemplate>) -> Self {
        let pool = template.pool().instantiate();
        let lazy = (0..template.lazy_cell_count())
            .map(|_| tokio::sync::OnceCell::new())
            .collect();
        Self {
            template,
            pool,
            lazy,
            operations: AtomicU64::new(0),
        }
    }

    /// 已执行的操作数
    pub(crate) fn operations_executed(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub(crate) fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    fn bean_name(&self, component: ComponentId) -> String {
        self.template
            .component(component)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    pub(crate) fn read_slot(&self, slot: PoolSlot, component: ComponentId) -> LifecycleResult<Value> {
        self.pool.read(slot).map_err(|source| LifecycleError::Internal {
            bean: self.bean_name(component),
            source,
        })
    }

    /// 单例组件的实例
    pub(crate) fn bean(&self, component: ComponentId) -> LifecycleResult<Option<Value>> {
        match self.template.component(component).and_then(|c| c.slot) {
            Some(slot) => self.read_slot(slot, component).map(Some),
            None => Ok(None),
        }
    }

    /// 延迟组件：首次使用时构造，之后复用
    pub(crate) async fn lazy(self: Arc<Self>, cell: usize, component: ComponentId) -> LifecycleResult<Value> {
        let slot = self.lazy.get(cell).ok_or_else(|| LifecycleError::Internal {
            bean: self.bean_name(component),
            source: ConstantPoolError::SlotOutOfRange {
                slot: cell,
                len: self.lazy.len(),
            },
        })?;
        slot.get_or_try_init(|| self.construct(component))
            .await
            .cloned()
    }

    /// 构造组件：工厂，写入单例槽位，然后执行注入操作
    pub(crate) fn construct(self: &Arc<Self>, component: ComponentId) -> BoxFuture<'static, LifecycleResult<Value>> {
        let ctx = self.clone();
        Box::pin(async move {
            let template = ctx.template.clone();
            let descriptor = template.component(component).ok_or_else(|| LifecycleError::Internal {
                bean: format!("{:?}", component),
                source: ConstantPoolError::SlotOutOfRange {
                    slot: component.index(),
                    len: template.components().len(),
                },
            })?;

            let factory = template.plan(descriptor.factory);
            let values = factory.resolve_arguments(&ctx).await?;
            debug!("构造组件: {} ({:?})", descriptor.name, descriptor.mode);
            let value = factory
                .call(None, values, CancellationToken::new())
                .await
                .map_err(|cause| factory.failure(cause))?
                .ok_or_else(|| factory.failure(anyhow::anyhow!("工厂返回空值")))?;
            ctx.record_operation();

            if let Some(slot) = descriptor.slot {
                ctx.pool
                    .write(slot, Some(value.clone()))
                    .map_err(|source| LifecycleError::Internal {
                        bean: descriptor.name.clone(),
                        source,
                    })?;
            }

            for node in &descriptor.injects {
                let inject = template.plan(*node);
                let values = inject.resolve_arguments(&ctx).await?;
                debug!("注入: {}.{}", descriptor.name, inject.name);
                inject
                    .call(Some(value.clone()), values, CancellationToken::new())
                    .await
                    .map_err(|cause| inject.failure(cause))?;
                ctx.record_operation();
            }

            Ok(value)
        })
    }

    /// 求值单个提供者
    pub(crate) fn provide(self: &Arc<Self>, provider: &Provider) -> ArgumentFuture {
        compile_argument(provider)(self)
    }
}

impl fmt::Debug for LifetimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeContext")
            .field("pool", &self.pool)
            .field("lazy", &self.lazy.len())
            .field("operations", &self.operations_executed())
            .finish()
    }
}

//! 组件描述符与调用目标
//!
//! 外部扫描器产生的声明式描述：组件、作用域、预构建实例以及调用目标。
//! 容器核心从不做运行时类型内省，只消费这里的描述。

use crate::key::{DependencyDescriptor, Key};
use crate::lifecycle::{InstantiationMode, LifecycleOperation};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 容器中流转的值
pub type Value = Arc<dyn Any + Send + Sync>;

/// 调用目标返回的 future
pub type OperationFuture = BoxFuture<'static, anyhow::Result<Option<Value>>>;

/// 异步调用函数
pub type Invoker = Arc<dyn Fn(Arguments) -> OperationFuture + Send + Sync>;

/// 同步调用函数，fork 时在阻塞线程池上执行
pub type BlockingInvoker = Arc<dyn Fn(Arguments) -> anyhow::Result<Option<Value>> + Send + Sync>;

#[derive(Clone)]
enum Callable {
    Async(Invoker),
    Blocking(BlockingInvoker),
}

/// 侧车提供函数，作用域内的兜底提供者
pub type SidecarSupplier = Arc<dyn Fn() -> Value + Send + Sync>;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl $name {
            /// 在所属 arena 中的下标
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(
    /// 组件句柄
    ComponentId
);
arena_id!(
    /// 作用域句柄
    ScopeId
);
arena_id!(
    /// 操作节点句柄
    NodeId
);

/// 调用参数
///
/// 参数顺序与依赖描述符列表一致；缺失的可选依赖为 `None`。
pub struct Arguments {
    bean: Option<Value>,
    values: Vec<Option<Value>>,
    interrupt: CancellationToken,
}

impl Arguments {
    /// 创建调用参数
    pub fn new(bean: Option<Value>, values: Vec<Option<Value>>, interrupt: CancellationToken) -> Self {
        Self {
            bean,
            values,
            interrupt,
        }
    }

    /// 参数个数（不含组件自身）
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否没有参数
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 操作所属的组件实例
    pub fn bean<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        let bean = self
            .bean
            .clone()
            .ok_or_else(|| anyhow::anyhow!("操作没有所属组件实例"))?;
        bean.downcast::<T>()
            .map_err(|_| anyhow::anyhow!("组件实例不是 {}", std::any::type_name::<T>()))
    }

    /// 必需参数
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        self.optional::<T>(index)?
            .ok_or_else(|| anyhow::anyhow!("参数 {} 缺失", index))
    }

    /// 可选参数
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Option<Arc<T>>> {
        let slot = self
            .values
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("参数下标越界: {} >= {}", index, self.values.len()))?;
        match slot {
            Some(value) => value
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| anyhow::anyhow!("参数 {} 不是 {}", index, std::any::type_name::<T>())),
            None => Ok(None),
        }
    }

    /// 未经类型转换的参数
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// 协作式中断令牌
    pub fn interruption(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// 是否已请求中断
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("has_bean", &self.bean.is_some())
            .field("len", &self.values.len())
            .field("interrupted", &self.interrupt.is_cancelled())
            .finish()
    }
}

/// 调用目标：可调用对象 + 参数个数
#[derive(Clone)]
pub struct InvocationTarget {
    /// 目标名称
    pub name: String,
    /// 参数个数，必须与依赖描述符个数一致
    pub arity: usize,
    callable: Callable,
}

impl InvocationTarget {
    /// 创建异步调用目标
    pub fn new<F, Fut>(name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            arity,
            callable: Callable::Async(Arc::new(move |args| -> OperationFuture { Box::pin(f(args)) })),
        }
    }

    /// 创建同步调用目标
    pub fn from_fn<F>(name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            callable: Callable::Blocking(Arc::new(f)),
        }
    }

    /// 调用
    ///
    /// 同步目标在返回的 future 被轮询时才执行。
    pub fn invoke(&self, args: Arguments) -> OperationFuture {
        match &self.callable {
            Callable::Async(invoker) => invoker(args),
            Callable::Blocking(invoker) => {
                let invoker = invoker.clone();
                Box::pin(async move { invoker(args) })
            }
        }
    }

    /// 同步目标的调用函数
    pub fn blocking(&self) -> Option<BlockingInvoker> {
        match &self.callable {
            Callable::Blocking(invoker) => Some(invoker.clone()),
            Callable::Async(_) => None,
        }
    }
}

impl fmt::Debug for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationTarget")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("blocking", &matches!(self.callable, Callable::Blocking(_)))
            .finish()
    }
}

/// 成员种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// 字段
    Field,
    /// 方法
    Method,
}

/// 带注解的成员位置，交由扩展解释
#[derive(Debug, Clone)]
pub struct MemberSite {
    /// 成员种类
    pub kind: MemberKind,
    /// 成员名称
    pub name: String,
    /// 注解名称
    pub annotations: Vec<String>,
    /// 成员的依赖（如注入字段的键）
    pub dependencies: Vec<DependencyDescriptor>,
    /// 成员对应的调用目标（字段为 setter，方法为方法本身）
    pub target: Option<InvocationTarget>,
}

impl MemberSite {
    /// 字段
    pub fn field(name: impl Into<String>) -> Self {
        Self::new(MemberKind::Field, name)
    }

    /// 方法
    pub fn method(name: impl Into<String>) -> Self {
        Self::new(MemberKind::Method, name)
    }

    fn new(kind: MemberKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            annotations: Vec::new(),
            dependencies: Vec::new(),
            target: None,
        }
    }

    /// 添加注解
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    /// 添加依赖
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 设置调用目标
    pub fn with_target(mut self, target: InvocationTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// 是否带有指定注解
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }
}

/// 组件描述符
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    /// 组件名称
    pub name: String,
    /// 实例化模式
    pub mode: InstantiationMode,
    /// 组件以哪些键提供服务
    pub provides: Vec<Key>,
    /// 组件描述
    pub description: Option<String>,
    /// 工厂依赖
    pub dependencies: Vec<DependencyDescriptor>,
    /// 工厂
    pub factory: InvocationTarget,
    /// 生命周期操作
    pub operations: Vec<LifecycleOperation>,
    /// 交给扩展处理的成员
    pub members: Vec<MemberSite>,
}

impl ComponentDescriptor {
    /// 创建新的组件描述符
    pub fn new(name: impl Into<String>, factory: InvocationTarget) -> Self {
        Self {
            name: name.into(),
            mode: InstantiationMode::Singleton,
            provides: Vec::new(),
            description: None,
            dependencies: Vec::new(),
            factory,
            operations: Vec::new(),
            members: Vec::new(),
        }
    }

    /// 设置实例化模式
    pub fn with_mode(mut self, mode: InstantiationMode) -> Self {
        self.mode = mode;
        self
    }

    /// 以指定键提供服务
    pub fn provides(mut self, key: Key) -> Self {
        self.provides.push(key);
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 添加工厂依赖
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 添加生命周期操作
    pub fn with_operation(mut self, operation: LifecycleOperation) -> Self {
        self.operations.push(operation);
        self
    }

    /// 添加成员
    pub fn with_member(mut self, member: MemberSite) -> Self {
        self.members.push(member);
        self
    }
}

/// 预构建的服务实例
#[derive(Clone)]
pub struct ServiceInstance {
    /// 服务键
    pub key: Key,
    /// 实例
    pub value: Value,
    /// 注册位置
    pub origin: String,
    /// 描述
    pub description: Option<String>,
}

impl ServiceInstance {
    /// 创建服务实例
    pub fn new<T: Any + Send + Sync>(key: Key, value: T, origin: impl Into<String>) -> Self {
        Self {
            key,
            value: Arc::new(value),
            origin: origin.into(),
            description: None,
        }
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("key", &self.key)
            .field("origin", &self.origin)
            .field("description", &self.description)
            .finish()
    }
}

/// 服务的来源
#[derive(Clone)]
pub enum ProvisionSource {
    /// 由组件提供
    Component(ComponentId),
    /// 预构建的实例
    Instance(Value),
}

impl fmt::Debug for ProvisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(id) => f.debug_tuple("Component").field(id).finish(),
            Self::Instance(_) => f.write_str("Instance(<value>)"),
        }
    }
}

/// 服务注册请求
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    /// 来源
    pub source: ProvisionSource,
    /// 注册位置，用于重复提供者报告
    pub origin: String,
    /// 描述
    pub description: Option<String>,
}

impl ServiceRegistration {
    /// 由组件提供的服务
    pub fn component(component: ComponentId, origin: impl Into<String>) -> Self {
        Self {
            source: ProvisionSource::Component(component),
            origin: origin.into(),
            description: None,
        }
    }

    /// 预构建实例
    pub fn instance(value: Value, origin: impl Into<String>) -> Self {
        Self {
            source: ProvisionSource::Instance(value),
            origin: origin.into(),
            description: None,
        }
    }

    /// 设置描述
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// 侧车提供者描述
#[derive(Clone)]
pub struct SidecarDescriptor {
    /// 服务键
    pub key: Key,
    /// 提供函数
    pub supplier: SidecarSupplier,
}

impl SidecarDescriptor {
    /// 创建侧车提供者
    pub fn new<F>(key: Key, supplier: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            key,
            supplier: Arc::new(supplier),
        }
    }
}

impl fmt::Debug for SidecarDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidecarDescriptor")
            .field("key", &self.key)
            .finish()
    }
}

/// 作用域描述符
#[derive(Debug, Clone, Default)]
pub struct ScopeDescriptor {
    /// 作用域名称
    pub name: String,
    /// 组件
    pub components: Vec<ComponentDescriptor>,
    /// 预构建实例
    pub instances: Vec<ServiceInstance>,
    /// 侧车提供者
    pub sidecars: Vec<SidecarDescriptor>,
    /// 向父作用域导出的键
    pub exports: Vec<Key>,
    /// 子作用域
    pub children: Vec<ScopeDescriptor>,
}

impl ScopeDescriptor {
    /// 创建作用域描述符
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 添加组件
    pub fn with_component(mut self, component: ComponentDescriptor) -> Self {
        self.components.push(component);
        self
    }

    /// 添加预构建实例
    pub fn with_instance(mut self, instance: ServiceInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// 添加侧车提供者
    pub fn with_sidecar(mut self, sidecar: SidecarDescriptor) -> Self {
        self.sidecars.push(sidecar);
        self
    }

    /// 导出键
    pub fn exporting(mut self, key: Key) -> Self {
        self.exports.push(key);
        self
    }

    /// 添加子作用域
    pub fn with_child(mut self, child: ScopeDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// 递归统计组件数量
    pub fn component_count(&self) -> usize {
        self.components.len()
            + self
                .children
                .iter()
                .map(ScopeDescriptor::component_count)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_target_invocation() {
        let target = InvocationTarget::from_fn("double", 1, |args| {
            let n = args.get::<i32>(0)?;
            Ok(Some(Arc::new(*n * 2) as Value))
        });
        let args = Arguments::new(None, vec![Some(Arc::new(21_i32) as Value)], CancellationToken::new());

        let value = target.invoke(args).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_sync_target_runs_when_polled() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let target = InvocationTarget::from_fn("count", 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        assert!(target.blocking().is_some());

        let pending = target.invoke(Arguments::new(None, Vec::new(), CancellationToken::new()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pending.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let async_target = InvocationTarget::new("noop", 0, |_| async { Ok(None) });
        assert!(async_target.blocking().is_none());
    }

    #[test]
    fn test_arguments_type_mismatch_and_optional() {
        let args = Arguments::new(
            None,
            vec![Some(Arc::new("text".to_string()) as Value), None],
            CancellationToken::new(),
        );

        assert!(args.get::<i32>(0).is_err());
        assert_eq!(args.get::<String>(0).unwrap().as_str(), "text");
        assert!(args.optional::<String>(1).unwrap().is_none());
        assert!(args.get::<String>(1).is_err());
        assert!(args.optional::<String>(5).is_err());
        assert!(args.bean::<String>().is_err());
    }

    #[test]
    fn test_scope_descriptor_counts_nested_components() {
        let factory = InvocationTarget::from_fn("new", 0, |_| Ok(None));
        let scope = ScopeDescriptor::new("root")
            .with_component(ComponentDescriptor::new("a", factory.clone()))
            .with_child(
                ScopeDescriptor::new("child")
                    .with_component(ComponentDescriptor::new("b", factory)),
            );
        assert_eq!(scope.component_count(), 2);
    }
}

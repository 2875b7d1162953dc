//! 构建期注册接口

use infrastructure_common::{
    BuildResult, ComponentId, DependencyDescriptor, InstantiationMode, InvocationTarget, Key,
    LifecycleOperation, NodeId, ScopeId, ServiceRegistration, SidecarDescriptor,
};

/// 注册器 trait
///
/// 构建是单线程的，注册器以 `&mut` 方式独占使用。扩展通过它登记
/// 额外的提供者与生命周期操作。
pub trait Registrar {
    /// 根作用域
    fn root_scope(&self) -> ScopeId;

    /// 在父作用域下创建子作用域
    fn create_scope(&mut self, parent: ScopeId, name: &str) -> BuildResult<ScopeId>;

    /// 在作用域中登记组件
    fn register_component(
        &mut self,
        scope: ScopeId,
        name: &str,
        mode: InstantiationMode,
    ) -> BuildResult<ComponentId>;

    /// 以指定键登记服务提供者
    fn register_provider(
        &mut self,
        scope: ScopeId,
        key: Key,
        registration: ServiceRegistration,
    ) -> BuildResult<()>;

    /// 登记组件的工厂（可注入的构造函数）
    fn register_injectable(
        &mut self,
        component: ComponentId,
        name: &str,
        dependencies: Vec<DependencyDescriptor>,
        target: InvocationTarget,
    ) -> BuildResult<NodeId>;

    /// 登记组件的生命周期操作
    fn register_lifecycle_op(
        &mut self,
        component: ComponentId,
        operation: LifecycleOperation,
    ) -> BuildResult<NodeId>;

    /// 将作用域内可见的服务导出到父作用域
    fn export(&mut self, scope: ScopeId, key: Key) -> BuildResult<()>;

    /// 登记作用域内的侧车提供者
    fn register_sidecar(&mut self, scope: ScopeId, sidecar: SidecarDescriptor) -> BuildResult<()>;

    /// 组件所在的作用域
    fn scope_of(&self, component: ComponentId) -> Option<ScopeId>;

    /// 组件名称
    fn component_name(&self, component: ComponentId) -> Option<&str>;
}

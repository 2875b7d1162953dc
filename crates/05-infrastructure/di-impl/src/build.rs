//! 构建上下文
//!
//! [`BuildContext`] 是单线程的 arena：作用域、组件与操作节点按登记顺序存放，
//! 以 [`ScopeId`]、[`ComponentId`]、[`NodeId`] 寻址。构建成功得到
//! [`ApplicationTemplate`]，失败则返回 [`BuildError`]，不产生任何部分结果。

use crate::resolver::Resolver;
use crate::template::ApplicationTemplate;
use di_abstractions::Registrar;
use infrastructure_common::{
    BuildError, BuildResult, ComponentId, DependencyDescriptor, ForkOptions, InstantiationMode,
    InvocationTarget, Key, LifecycleConfig, LifecycleOperation, LifecyclePhase, MemberSite, NodeId,
    ProvisionSource, ScopeDescriptor, ScopeId, ServiceRegistration, SidecarDescriptor,
};
use std::sync::Arc;
use tracing::{debug, info};

/// 作用域节点
#[derive(Debug, Clone)]
pub(crate) struct ScopeNode {
    pub(crate) name: String,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) registrations: Vec<(Key, ServiceRegistration)>,
    pub(crate) exports: Vec<Key>,
    pub(crate) sidecars: Vec<SidecarDescriptor>,
}

/// 组件节点
#[derive(Debug, Clone)]
pub(crate) struct ComponentNode {
    pub(crate) name: String,
    pub(crate) scope: ScopeId,
    pub(crate) mode: InstantiationMode,
    pub(crate) factory: Option<NodeId>,
    pub(crate) operations: Vec<NodeId>,
}

/// 操作节点：工厂、注入或生命周期回调
#[derive(Debug, Clone)]
pub(crate) struct OperationNode {
    pub(crate) component: ComponentId,
    pub(crate) phase: LifecyclePhase,
    pub(crate) name: String,
    pub(crate) dependencies: Vec<DependencyDescriptor>,
    pub(crate) target: InvocationTarget,
    pub(crate) fork: Option<ForkOptions>,
    pub(crate) interrupt_on_stopping: bool,
    pub(crate) stop_on_failure: bool,
}

/// 等待扩展处理的成员
#[derive(Debug, Clone)]
pub struct PendingMember {
    /// 所属组件
    pub component: ComponentId,
    /// 成员
    pub member: MemberSite,
}

/// 构建上下文
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub(crate) scopes: Vec<ScopeNode>,
    pub(crate) components: Vec<ComponentNode>,
    pub(crate) nodes: Vec<OperationNode>,
}

impl BuildContext {
    /// 创建只有根作用域的构建上下文
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            scopes: vec![ScopeNode {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
                registrations: Vec::new(),
                exports: Vec::new(),
                sidecars: Vec::new(),
            }],
            components: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// 由作用域描述符创建构建上下文，忽略成员
    pub fn from_descriptor(descriptor: &ScopeDescriptor) -> BuildResult<Self> {
        let mut context = Self::new(descriptor.name.clone());
        let root = context.root_scope();
        context.ingest(root, descriptor)?;
        Ok(context)
    }

    /// 组件数
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// 作用域数
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// 将描述符内容登记到指定作用域，子描述符成为子作用域
    ///
    /// 返回需要交给扩展处理的成员。
    pub fn ingest(
        &mut self,
        scope: ScopeId,
        descriptor: &ScopeDescriptor,
    ) -> BuildResult<Vec<PendingMember>> {
        let mut pending = Vec::new();
        self.ingest_into(scope, descriptor, &mut pending)?;
        Ok(pending)
    }

    fn ingest_into(
        &mut self,
        scope: ScopeId,
        descriptor: &ScopeDescriptor,
        pending: &mut Vec<PendingMember>,
    ) -> BuildResult<()> {
        let scope_name = self.scope(scope)?.name.clone();

        for component in &descriptor.components {
            let id = self.register_component(scope, &component.name, component.mode)?;
            let origin = format!("{}/{}", scope_name, component.name);
            for key in &component.provides {
                let registration = ServiceRegistration::component(id, origin.clone())
                    .with_description(component.description.clone());
                self.register_provider(scope, key.clone(), registration)?;
            }
            self.register_injectable(
                id,
                &component.factory.name,
                component.dependencies.clone(),
                component.factory.clone(),
            )?;
            for operation in &component.operations {
                self.register_lifecycle_op(id, operation.clone())?;
            }
            pending.extend(component.members.iter().map(|member| PendingMember {
                component: id,
                member: member.clone(),
            }));
        }

        for instance in &descriptor.instances {
            let registration = ServiceRegistration::instance(
                instance.value.clone(),
                format!("{}/{}", scope_name, instance.origin),
            )
            .with_description(instance.description.clone());
            self.register_provider(scope, instance.key.clone(), registration)?;
        }

        for sidecar in &descriptor.sidecars {
            self.register_sidecar(scope, sidecar.clone())?;
        }

        for key in &descriptor.exports {
            self.export(scope, key.clone())?;
        }

        for child in &descriptor.children {
            let child_scope = self.create_scope(scope, &child.name)?;
            self.ingest_into(child_scope, child, pending)?;
        }

        Ok(())
    }

    /// 解析依赖、检测循环并生成应用模板
    pub fn build(self, config: LifecycleConfig) -> BuildResult<Arc<ApplicationTemplate>> {
        info!(
            "开始构建应用模板: {} 个作用域, {} 个组件, {} 个操作",
            self.scopes.len(),
            self.components.len(),
            self.nodes.len()
        );
        let resolution = Resolver::new(&self).resolve()?;
        let template = ApplicationTemplate::compile(self, resolution, config)?;
        info!(
            "应用模板构建完成: {} 个常量池槽位",
            template.pool().len()
        );
        Ok(Arc::new(template))
    }

    pub(crate) fn scope(&self, scope: ScopeId) -> BuildResult<&ScopeNode> {
        self.scopes
            .get(scope.index())
            .ok_or_else(|| BuildError::InvalidReference {
                message: format!("作用域 {:?} 不存在", scope),
            })
    }

    fn scope_mut(&mut self, scope: ScopeId) -> BuildResult<&mut ScopeNode> {
        self.scopes
            .get_mut(scope.index())
            .ok_or_else(|| BuildError::InvalidReference {
                message: format!("作用域 {:?} 不存在", scope),
            })
    }

    pub(crate) fn component(&self, component: ComponentId) -> BuildResult<&ComponentNode> {
        self.components
            .get(component.index())
            .ok_or_else(|| BuildError::InvalidReference {
                message: format!("组件 {:?} 不存在", component),
            })
    }

    fn push_node(&mut self, node: OperationNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
}

fn check_arity(target: &InvocationTarget, dependencies: &[DependencyDescriptor]) -> BuildResult<()> {
    if target.arity != dependencies.len() {
        return Err(BuildError::ArityMismatch {
            operation: target.name.clone(),
            arity: target.arity,
            dependencies: dependencies.len(),
        });
    }
    Ok(())
}

impl Registrar for BuildContext {
    fn root_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    fn create_scope(&mut self, parent: ScopeId, name: &str) -> BuildResult<ScopeId> {
        self.scope(parent)?;
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            registrations: Vec::new(),
            exports: Vec::new(),
            sidecars: Vec::new(),
        });
        self.scope_mut(parent)?.children.push(id);
        debug!("创建作用域: {} (父作用域 {:?})", name, parent);
        Ok(id)
    }

    fn register_component(
        &mut self,
        scope: ScopeId,
        name: &str,
        mode: InstantiationMode,
    ) -> BuildResult<ComponentId> {
        self.scope(scope)?;
        let id = ComponentId(self.components.len());
        self.components.push(ComponentNode {
            name: name.to_string(),
            scope,
            mode,
            factory: None,
            operations: Vec::new(),
        });
        debug!("登记组件: {} ({:?})", name, mode);
        Ok(id)
    }

    fn register_provider(
        &mut self,
        scope: ScopeId,
        key: Key,
        registration: ServiceRegistration,
    ) -> BuildResult<()> {
        if let ProvisionSource::Component(component) = &registration.source {
            self.component(*component)?;
        }
        debug!("登记服务提供者: {} <- {}", key, registration.origin);
        self.scope_mut(scope)?.registrations.push((key, registration));
        Ok(())
    }

    fn register_injectable(
        &mut self,
        component: ComponentId,
        name: &str,
        dependencies: Vec<DependencyDescriptor>,
        target: InvocationTarget,
    ) -> BuildResult<NodeId> {
        let owner = self.component(component)?;
        if owner.factory.is_some() {
            return Err(BuildError::InvalidOperation {
                component: owner.name.clone(),
                operation: name.to_string(),
                reason: "组件已有工厂".to_string(),
            });
        }
        check_arity(&target, &dependencies)?;

        let id = self.push_node(OperationNode {
            component,
            phase: LifecyclePhase::Factory,
            name: name.to_string(),
            dependencies,
            target,
            fork: None,
            interrupt_on_stopping: true,
            stop_on_failure: true,
        });
        self.components[component.index()].factory = Some(id);
        Ok(id)
    }

    fn register_lifecycle_op(
        &mut self,
        component: ComponentId,
        operation: LifecycleOperation,
    ) -> BuildResult<NodeId> {
        let owner = self.component(component)?;
        let invalid = |reason: &str| BuildError::InvalidOperation {
            component: owner.name.clone(),
            operation: operation.name().to_string(),
            reason: reason.to_string(),
        };

        if operation.phase == LifecyclePhase::Factory {
            return Err(invalid("工厂必须通过 register_injectable 登记"));
        }
        if operation.phase.is_construction() && operation.fork.is_some() {
            return Err(invalid("构造阶段的操作不能 fork"));
        }
        if owner.mode != InstantiationMode::Singleton && !operation.phase.is_construction() {
            return Err(invalid("只有单例组件可以拥有生命周期操作"));
        }
        check_arity(&operation.target, &operation.dependencies)?;

        let name = operation.name().to_string();
        let id = self.push_node(OperationNode {
            component,
            phase: operation.phase,
            name,
            dependencies: operation.dependencies,
            target: operation.target,
            fork: operation.fork,
            interrupt_on_stopping: operation.interrupt_on_stopping,
            stop_on_failure: operation.stop_on_failure,
        });
        self.components[component.index()].operations.push(id);
        Ok(id)
    }

    fn export(&mut self, scope: ScopeId, key: Key) -> BuildResult<()> {
        let node = self.scope_mut(scope)?;
        if !node.exports.contains(&key) {
            node.exports.push(key);
        }
        Ok(())
    }

    fn register_sidecar(&mut self, scope: ScopeId, sidecar: SidecarDescriptor) -> BuildResult<()> {
        let node = self.scope_mut(scope)?;
        if node.sidecars.iter().any(|existing| existing.key == sidecar.key) {
            return Err(BuildError::DuplicateProvider {
                key: sidecar.key,
                first: format!("{}/sidecar", node.name),
                second: format!("{}/sidecar", node.name),
            });
        }
        node.sidecars.push(sidecar);
        Ok(())
    }

    fn scope_of(&self, component: ComponentId) -> Option<ScopeId> {
        self.components.get(component.index()).map(|c| c.scope)
    }

    fn component_name(&self, component: ComponentId) -> Option<&str> {
        self.components
            .get(component.index())
            .map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::{ComponentDescriptor, ForkOptions, JoinPolicy};

    fn target(name: &str, arity: usize) -> InvocationTarget {
        InvocationTarget::from_fn(name, arity, |_| Ok(None))
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let mut context = BuildContext::new("root");
        let root = context.root_scope();
        let id = context
            .register_component(root, "a", InstantiationMode::Singleton)
            .unwrap();

        let error = context
            .register_injectable(id, "new", Vec::new(), target("new", 1))
            .unwrap_err();
        assert_eq!(
            error,
            BuildError::ArityMismatch {
                operation: "new".to_string(),
                arity: 1,
                dependencies: 0
            }
        );
    }

    #[test]
    fn test_forked_construction_rejected() {
        let mut context = BuildContext::new("root");
        let root = context.root_scope();
        let id = context
            .register_component(root, "a", InstantiationMode::Singleton)
            .unwrap();

        let operation = LifecycleOperation::inject(target("wire", 0))
            .forked(ForkOptions::join(JoinPolicy::BeforeReady));
        assert!(matches!(
            context.register_lifecycle_op(id, operation),
            Err(BuildError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_lifecycle_ops_only_on_singletons() {
        let mut context = BuildContext::new("root");
        let root = context.root_scope();
        let lazy = context
            .register_component(root, "lazy", InstantiationMode::Lazy)
            .unwrap();

        assert!(context
            .register_lifecycle_op(lazy, LifecycleOperation::inject(target("wire", 0)))
            .is_ok());
        assert!(matches!(
            context.register_lifecycle_op(lazy, LifecycleOperation::start(target("run", 0))),
            Err(BuildError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_invalid_references() {
        let mut context = BuildContext::new("root");
        assert!(matches!(
            context.create_scope(ScopeId(9), "nowhere"),
            Err(BuildError::InvalidReference { .. })
        ));
        assert!(matches!(
            context.register_lifecycle_op(ComponentId(3), LifecycleOperation::start(target("run", 0))),
            Err(BuildError::InvalidReference { .. })
        ));
        assert_eq!(context.scope_of(ComponentId(3)), None);
    }

    #[test]
    fn test_ingest_collects_members_and_scopes() {
        let descriptor = ScopeDescriptor::new("app")
            .with_component(
                ComponentDescriptor::new("a", target("new", 0))
                    .provides(Key::named("app::A"))
                    .with_member(MemberSite::method("tick").with_annotation("scheduled")),
            )
            .with_child(
                ScopeDescriptor::new("child")
                    .with_component(ComponentDescriptor::new("b", target("new", 0))),
            );

        let mut context = BuildContext::new("app");
        let root = context.root_scope();
        let pending = context.ingest(root, &descriptor).unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].member.name, "tick");
        assert_eq!(context.component_count(), 2);
        assert_eq!(context.scope_count(), 2);
        assert_eq!(context.scope_of(ComponentId(1)), Some(ScopeId(1)));
        assert_eq!(context.component_name(ComponentId(0)), Some("a"));
    }
}

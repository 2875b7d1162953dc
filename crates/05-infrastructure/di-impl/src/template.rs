//! 应用模板
//!
//! 成功构建的不可变结果：组件、调用计划、拓扑顺序、注册表与常量池布局。
//! 一个模板可以实例化出多个互相独立的生命周期实例。

use crate::build::BuildContext;
use crate::lifetime::Lifetime;
use crate::plan::InvocationPlan;
use crate::pool::{ConstantPoolTemplate, PoolSlot};
use crate::registry::{Provider, RegistrySet, ServiceContract};
use crate::resolver::{DependencyGraph, Resolution};
use infrastructure_common::{
    BuildError, BuildResult, ComponentId, InstantiationMode, Key, LifecycleConfig, LifecyclePhase,
    NodeId, ScopeId, Transition,
};
use std::sync::Arc;

/// 组件模板
#[derive(Debug, Clone)]
pub struct ComponentTemplate {
    /// 组件名称
    pub name: String,
    /// 实例化模式
    pub mode: InstantiationMode,
    /// 所在作用域
    pub scope: ScopeId,
    /// 工厂节点
    pub factory: NodeId,
    /// 注入节点
    pub injects: Vec<NodeId>,
    /// 生命周期操作节点（登记顺序）
    pub operations: Vec<NodeId>,
    /// 单例槽位
    pub slot: Option<PoolSlot>,
    /// 延迟单元
    pub lazy_cell: Option<usize>,
    /// 停止时是否中断该组件仍在运行的启动任务
    pub interrupt_on_stopping: bool,
}

/// 应用模板
#[derive(Debug)]
pub struct ApplicationTemplate {
    name: String,
    components: Vec<ComponentTemplate>,
    plans: Vec<InvocationPlan>,
    graph: DependencyGraph,
    lifecycle_order: Vec<ComponentId>,
    registries: RegistrySet,
    pool: ConstantPoolTemplate,
    lazy_cells: usize,
    config: LifecycleConfig,
}

impl ApplicationTemplate {
    pub(crate) fn compile(
        context: BuildContext,
        resolution: Resolution,
        config: LifecycleConfig,
    ) -> BuildResult<Self> {
        let Resolution {
            registries,
            pool,
            slots,
            lazy_cells,
            providers,
            graph,
        } = resolution;

        let plans = context
            .nodes
            .into_iter()
            .zip(providers)
            .enumerate()
            .map(|(index, (node, providers))| {
                let bean = context.components[node.component.index()].name.clone();
                InvocationPlan::new(
                    NodeId(index),
                    node.component,
                    bean,
                    node.name,
                    node.phase,
                    node.fork,
                    node.interrupt_on_stopping,
                    node.stop_on_failure,
                    providers,
                    node.target,
                )
            })
            .collect::<Vec<_>>();

        let mut components = Vec::with_capacity(context.components.len());
        for (index, component) in context.components.into_iter().enumerate() {
            let factory = component.factory.ok_or_else(|| BuildError::InvalidOperation {
                component: component.name.clone(),
                operation: "factory".to_string(),
                reason: "组件没有工厂".to_string(),
            })?;
            let (injects, operations): (Vec<NodeId>, Vec<NodeId>) = component
                .operations
                .iter()
                .copied()
                .partition(|node| plans[node.index()].phase == LifecyclePhase::Inject);
            let stops: Vec<&InvocationPlan> = operations
                .iter()
                .map(|node| &plans[node.index()])
                .filter(|plan| plan.phase.transition() == Transition::Stop)
                .collect();
            let interrupt_on_stopping =
                stops.is_empty() || stops.iter().any(|plan| plan.interrupt_on_stopping);

            components.push(ComponentTemplate {
                name: component.name,
                mode: component.mode,
                scope: component.scope,
                factory,
                injects,
                operations,
                slot: slots[index],
                lazy_cell: lazy_cells[index],
                interrupt_on_stopping,
            });
        }

        let lifecycle_order = graph
            .order()
            .iter()
            .copied()
            .filter(|id| components[id.index()].mode == InstantiationMode::Singleton)
            .collect();
        let lazy_count = lazy_cells.iter().flatten().count();
        let name = context
            .scopes
            .first()
            .map(|scope| scope.name.clone())
            .unwrap_or_default();

        Ok(Self {
            name,
            components,
            plans,
            graph,
            lifecycle_order,
            registries,
            pool,
            lazy_cells: lazy_count,
            config,
        })
    }

    /// 根作用域名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 组件
    pub fn component(&self, id: ComponentId) -> Option<&ComponentTemplate> {
        self.components.get(id.index())
    }

    /// 按名称查找组件
    pub fn component_named(&self, name: &str) -> Option<(ComponentId, &ComponentTemplate)> {
        self.components
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
            .map(|(index, c)| (ComponentId(index), c))
    }

    /// 所有组件
    pub fn components(&self) -> &[ComponentTemplate] {
        &self.components
    }

    /// 调用计划
    pub fn plan(&self, node: NodeId) -> &InvocationPlan {
        &self.plans[node.index()]
    }

    /// 组件在指定阶段的操作，按登记顺序
    pub fn operations(&self, component: ComponentId, phase: LifecyclePhase) -> Vec<&InvocationPlan> {
        self.component(component)
            .map(|c| {
                c.operations
                    .iter()
                    .map(|node| &self.plans[node.index()])
                    .filter(|plan| plan.phase == phase)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 依赖图
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 参与生命周期的单例组件，按拓扑顺序
    pub fn lifecycle_order(&self) -> &[ComponentId] {
        &self.lifecycle_order
    }

    /// 拓扑顺序中的组件名称
    pub fn order_names(&self) -> Vec<&str> {
        self.graph
            .order()
            .iter()
            .filter_map(|id| self.component(*id))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// 注册表
    pub fn registries(&self) -> &RegistrySet {
        &self.registries
    }

    /// 作用域的服务契约
    pub fn contract(&self, scope_name: &str) -> Option<&ServiceContract> {
        self.registries
            .registry_named(scope_name)
            .map(|registry| registry.contract())
    }

    /// 根作用域中键的提供者
    pub(crate) fn root_provider(&self, key: &Key) -> Option<&Provider> {
        let registry = self.registries.registry(ScopeId(0))?;
        let entry = registry.entry(key)?;
        self.registries.entry(entry)?.provider()
    }

    /// 常量池布局
    pub fn pool(&self) -> &ConstantPoolTemplate {
        &self.pool
    }

    pub(crate) fn lazy_cell_count(&self) -> usize {
        self.lazy_cells
    }

    /// 调度配置
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// 创建新的生命周期实例
    pub fn instantiate(self: &Arc<Self>) -> Lifetime {
        Lifetime::new(self.clone())
    }
}

//! 依赖解析
//!
//! 解析分四步：
//!
//! 1. 收集：子作用域先于父作用域，登记本地条目与子作用域导出的条目，并附加提供者；
//! 2. 连接：每个依赖先查本地，再查侧车，再沿父作用域链向上查找；
//! 3. 循环检测：只在必需边上做深度优先遍历；
//! 4. 拓扑排序：在所有存在的边上再做一次遍历，闭合环的可选边降级为缺失。
//!
//! 组件按登记顺序、依赖按声明顺序遍历，排序结果是确定的。

use crate::build::{BuildContext, ComponentNode, OperationNode};
use crate::pool::{ConstantPoolTemplate, PoolSlot};
use crate::registry::{
    EntryId, EntrySource, Lookup, Provider, RegistrySet, ServiceEntry, ServiceRegistry,
};
use infrastructure_common::{
    BuildError, BuildResult, ComponentId, InstantiationMode, Key, LifecyclePhase, NodeId,
    ProvisionSource, ScopeId,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

/// 组件之间的一条依赖边
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    to: ComponentId,
    node: NodeId,
    index: usize,
    required: bool,
}

/// 解析后的组件依赖图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<ComponentId>,
    direct: Vec<BTreeSet<ComponentId>>,
    closure: Vec<BTreeSet<ComponentId>>,
}

impl DependencyGraph {
    /// 拓扑顺序：依赖总在依赖方之前
    pub fn order(&self) -> &[ComponentId] {
        &self.order
    }

    /// 直接依赖
    pub fn direct_dependencies(&self, component: ComponentId) -> impl Iterator<Item = ComponentId> + '_ {
        self.direct
            .get(component.index())
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// `component` 是否（传递地）依赖 `dependency`
    pub fn depends_on(&self, component: ComponentId, dependency: ComponentId) -> bool {
        self.closure
            .get(component.index())
            .map(|set| set.contains(&dependency))
            .unwrap_or(false)
    }
}

/// 解析结果
#[derive(Debug)]
pub(crate) struct Resolution {
    pub(crate) registries: RegistrySet,
    pub(crate) pool: ConstantPoolTemplate,
    pub(crate) slots: Vec<Option<PoolSlot>>,
    pub(crate) lazy_cells: Vec<Option<usize>>,
    pub(crate) providers: Vec<Vec<Provider>>,
    pub(crate) graph: DependencyGraph,
}

/// 依赖解析器
pub(crate) struct Resolver<'a> {
    context: &'a BuildContext,
    registries: RegistrySet,
    pool: ConstantPoolTemplate,
    slots: Vec<Option<PoolSlot>>,
    lazy_cells: Vec<Option<usize>>,
    lazy_count: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(context: &'a BuildContext) -> Self {
        let registries = context
            .scopes
            .iter()
            .enumerate()
            .map(|(index, scope)| ServiceRegistry::new(ScopeId(index), scope.name.clone(), scope.parent))
            .collect();
        Self {
            context,
            registries: RegistrySet::new(registries),
            pool: ConstantPoolTemplate::new(),
            slots: vec![None; context.components.len()],
            lazy_cells: vec![None; context.components.len()],
            lazy_count: 0,
        }
    }

    pub(crate) fn resolve(mut self) -> BuildResult<Resolution> {
        self.check_factories()?;
        self.collect(ScopeId(0))?;
        self.allocate_remaining_singletons()?;
        let mut providers = self.wire()?;
        let edges = self.edges(&providers)?;
        self.detect_cycles(&edges)?;
        let graph = self.order(&edges, &mut providers)?;

        debug!(
            "依赖解析完成: {} 个服务条目, 拓扑顺序 {:?}",
            self.registries.entry_count(),
            graph
                .order()
                .iter()
                .map(|c| self.name(*c))
                .collect::<Vec<_>>()
        );

        Ok(Resolution {
            registries: self.registries,
            pool: self.pool,
            slots: self.slots,
            lazy_cells: self.lazy_cells,
            providers,
            graph,
        })
    }

    fn name(&self, component: ComponentId) -> &str {
        self.context
            .components
            .get(component.index())
            .map(|c| c.name.as_str())
            .unwrap_or("<unknown>")
    }

    fn check_factories(&self) -> BuildResult<()> {
        for component in &self.context.components {
            if component.factory.is_none() {
                return Err(BuildError::InvalidOperation {
                    component: component.name.clone(),
                    operation: "factory".to_string(),
                    reason: "组件没有工厂".to_string(),
                });
            }
        }
        Ok(())
    }

    fn factory_of(&self, component: ComponentId) -> BuildResult<(&'a ComponentNode, NodeId)> {
        let context: &'a BuildContext = self.context;
        let node = context.component(component)?;
        let factory = node.factory.ok_or_else(|| BuildError::InvalidReference {
            message: format!("组件 {} 没有工厂", node.name),
        })?;
        Ok((node, factory))
    }

    /// 为组件创建提供者；同一组件的多个键共享同一个提供者
    fn provider_for(&mut self, component: ComponentId) -> BuildResult<Provider> {
        let (node, factory) = self.factory_of(component)?;
        let provider = match node.mode {
            InstantiationMode::Singleton => {
                let slot = self.pool.allocate(factory);
                self.slots[component.index()] = Some(slot);
                Provider::Constant { slot, component }
            }
            InstantiationMode::Lazy => {
                let cell = match self.lazy_cells[component.index()] {
                    Some(cell) => cell,
                    None => {
                        let cell = self.lazy_count;
                        self.lazy_count += 1;
                        self.lazy_cells[component.index()] = Some(cell);
                        cell
                    }
                };
                Provider::Lazy { cell, component }
            }
            InstantiationMode::Prototype => Provider::Prototype { component },
        };
        Ok(provider)
    }

    fn collect(&mut self, scope: ScopeId) -> BuildResult<()> {
        let context = self.context;
        let node = context.scope(scope)?;

        for child in &node.children {
            self.collect(*child)?;
        }

        let mut local: BTreeMap<Key, EntryId> = BTreeMap::new();
        for (key, registration) in &node.registrations {
            if let Some(existing) = local.get(key) {
                let first = self
                    .registries
                    .entry(*existing)
                    .map(|e| e.origin.clone())
                    .unwrap_or_default();
                return Err(duplicate_provider(key, first, registration.origin.clone()));
            }

            let (source, mode, provider) = match &registration.source {
                ProvisionSource::Component(component) => {
                    let mode = context.component(*component)?.mode;
                    let provider = self.provider_for(*component)?;
                    (EntrySource::Component(*component), mode, provider)
                }
                ProvisionSource::Instance(value) => (
                    EntrySource::Instance(value.clone()),
                    InstantiationMode::Singleton,
                    Provider::Instance(value.clone()),
                ),
            };

            let mut entry = ServiceEntry::new(
                key.clone(),
                mode,
                registration.origin.clone(),
                registration.description.clone(),
                source,
                scope,
            );
            entry.attach(provider);
            let id = self.registries.push_entry(entry);
            local.insert(key.clone(), id);
            self.registry_mut(scope)?.insert_local(key.clone(), id);
        }

        for child in &node.children {
            let child_node = context.scope(*child)?;
            for key in &child_node.exports {
                let entry = self
                    .registries
                    .registry(*child)
                    .and_then(|r| r.entry(key))
                    .ok_or_else(|| BuildError::UnknownExport {
                        scope: child_node.name.clone(),
                        key: key.clone(),
                    })?;

                if let Some(existing) = local.get(key) {
                    let first = self.origin(*existing);
                    let second = self.origin(entry);
                    return Err(duplicate_provider(key, first, second));
                }
                if let Some(sibling) = self.registry_mut(scope)?.exported_by(key) {
                    return Err(BuildError::DuplicateExport {
                        key: key.clone(),
                        first_scope: context.scope(sibling)?.name.clone(),
                        second_scope: child_node.name.clone(),
                    });
                }
                self.registry_mut(scope)?.insert_export(key.clone(), entry, *child);
                debug!("作用域 {} 导出 {} 到 {}", child_node.name, key, node.name);
            }
        }

        for key in &node.exports {
            if self.registries.registry(scope).and_then(|r| r.entry(key)).is_none() {
                return Err(BuildError::UnknownExport {
                    scope: node.name.clone(),
                    key: key.clone(),
                });
            }
            self.registry_mut(scope)?
                .contract_mut()
                .provides
                .insert(key.clone());
        }

        for sidecar in &node.sidecars {
            let registry = self.registry_mut(scope)?;
            if !registry.add_sidecar(sidecar.key.clone(), sidecar.supplier.clone()) {
                return Err(duplicate_provider(
                    &sidecar.key,
                    format!("{}/sidecar", node.name),
                    format!("{}/sidecar", node.name),
                ));
            }
        }

        Ok(())
    }

    fn origin(&self, entry: EntryId) -> String {
        self.registries
            .entry(entry)
            .map(|e| e.origin.clone())
            .unwrap_or_default()
    }

    fn registry_mut(&mut self, scope: ScopeId) -> BuildResult<&mut ServiceRegistry> {
        self.registries
            .registry_mut(scope)
            .ok_or_else(|| BuildError::InvalidReference {
                message: format!("作用域 {:?} 不存在", scope),
            })
    }

    /// 不以任何键提供服务的单例同样需要槽位
    fn allocate_remaining_singletons(&mut self) -> BuildResult<()> {
        for index in 0..self.context.components.len() {
            let component = ComponentId(index);
            if self.context.components[index].mode == InstantiationMode::Singleton
                && self.slots[index].is_none()
            {
                self.provider_for(component)?;
            }
        }
        Ok(())
    }

    fn wire(&mut self) -> BuildResult<Vec<Vec<Provider>>> {
        let context = self.context;
        let mut providers = Vec::with_capacity(context.nodes.len());

        for node in &context.nodes {
            let owner = context.component(node.component)?;
            let mut resolved = Vec::with_capacity(node.dependencies.len());

            for (index, dependency) in node.dependencies.iter().enumerate() {
                let (provider, through) = match self.registries.lookup(owner.scope, &dependency.key) {
                    Lookup::Entry {
                        entry,
                        imported_through,
                    } => {
                        let provider = self
                            .registries
                            .entry(entry)
                            .and_then(|e| e.provider().cloned())
                            .ok_or_else(|| BuildError::InvalidReference {
                                message: format!("服务条目 {} 没有提供者", dependency.key),
                            })?;
                        (provider, imported_through)
                    }
                    Lookup::Sidecar {
                        supplier,
                        imported_through,
                    } => (Provider::Sidecar(supplier), imported_through),
                    Lookup::Missing { searched } => {
                        if dependency.is_required() {
                            return Err(BuildError::UnresolvedDependency {
                                component: owner.name.clone(),
                                operation: node.name.clone(),
                                index,
                                key: dependency.key.clone(),
                            });
                        }
                        debug!(
                            "可选依赖缺失: {} 的 {} 第 {} 个参数 {}",
                            owner.name, node.name, index, dependency.key
                        );
                        (Provider::Absent(dependency.kind), searched)
                    }
                };

                for scope in through {
                    let registry = self.registry_mut(scope)?;
                    if registry.parent.is_none() {
                        continue;
                    }
                    let contract = registry.contract_mut();
                    if dependency.is_required() {
                        contract.requires.insert(dependency.key.clone());
                    } else {
                        contract.requires_optionally.insert(dependency.key.clone());
                    }
                }
                resolved.push(provider);
            }
            providers.push(resolved);
        }

        Ok(providers)
    }

    /// 组件级依赖边，按工厂、再按操作登记顺序排列
    fn edges(&self, providers: &[Vec<Provider>]) -> BuildResult<Vec<Vec<Edge>>> {
        let context = self.context;
        let mut edges = vec![Vec::new(); context.components.len()];

        for (index, component) in context.components.iter().enumerate() {
            let owner = ComponentId(index);
            let node_ids = component.factory.into_iter().chain(component.operations.iter().copied());
            for node_id in node_ids {
                let node = operation(context, node_id)?;
                for (position, provider) in providers[node_id.index()].iter().enumerate() {
                    let Some(to) = provider.component() else {
                        continue;
                    };
                    if to == owner && !constructs_self(component, node) {
                        continue;
                    }
                    edges[index].push(Edge {
                        to,
                        node: node_id,
                        index: position,
                        required: node.dependencies[position].is_required(),
                    });
                }
            }
        }

        Ok(edges)
    }

    fn detect_cycles(&self, edges: &[Vec<Edge>]) -> BuildResult<()> {
        let mut color = vec![Color::White; edges.len()];

        for root in 0..edges.len() {
            if color[root] != Color::White {
                continue;
            }
            color[root] = Color::Gray;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(&(current, next)) = stack.last() {
                let top = stack.len() - 1;
                let Some(edge) = edges[current].get(next) else {
                    color[current] = Color::Black;
                    stack.pop();
                    continue;
                };
                stack[top].1 += 1;
                if !edge.required {
                    continue;
                }

                let to = edge.to.index();
                match color[to] {
                    Color::White => {
                        color[to] = Color::Gray;
                        stack.push((to, 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|(c, _)| *c == to).unwrap_or(0);
                        let path = stack[start..]
                            .iter()
                            .map(|(c, _)| self.name(ComponentId(*c)).to_string())
                            .collect();
                        return Err(BuildError::DependencyCycle { path });
                    }
                    Color::Black => {}
                }
            }
        }

        Ok(())
    }

    /// 在所有存在的边上求拓扑顺序；闭合环的可选边降级为缺失
    fn order(
        &self,
        edges: &[Vec<Edge>],
        providers: &mut [Vec<Provider>],
    ) -> BuildResult<DependencyGraph> {
        let mut removed: HashSet<(NodeId, usize)> = HashSet::new();

        let order = loop {
            match topological_sort(edges, &removed) {
                Ok(order) => break order,
                Err(cycle) => {
                    let Some(edge) = cycle.iter().rev().find(|e| !e.required).copied() else {
                        return Err(BuildError::DependencyCycle {
                            path: cycle
                                .iter()
                                .map(|e| self.name(e.to).to_string())
                                .collect(),
                        });
                    };
                    let node = operation(self.context, edge.node)?;
                    let dependency = &node.dependencies[edge.index];
                    warn!(
                        "可选依赖会形成循环, 按缺失处理: {} 的 {} 第 {} 个参数 {}",
                        self.name(node.component),
                        node.name,
                        edge.index,
                        dependency.key
                    );
                    providers[edge.node.index()][edge.index] = Provider::Absent(dependency.kind);
                    removed.insert((edge.node, edge.index));
                }
            }
        };

        let mut direct = vec![BTreeSet::new(); edges.len()];
        for (index, list) in edges.iter().enumerate() {
            for edge in list {
                if edge.to.index() != index && !removed.contains(&(edge.node, edge.index)) {
                    direct[index].insert(edge.to);
                }
            }
        }

        let mut closure: Vec<BTreeSet<ComponentId>> = vec![BTreeSet::new(); edges.len()];
        for component in &order {
            let mut reachable = BTreeSet::new();
            for dependency in &direct[component.index()] {
                reachable.insert(*dependency);
                reachable.extend(closure[dependency.index()].iter().copied());
            }
            closure[component.index()] = reachable;
        }

        Ok(DependencyGraph {
            order,
            direct,
            closure,
        })
    }
}

fn operation(context: &BuildContext, node: NodeId) -> BuildResult<&OperationNode> {
    context
        .nodes
        .get(node.index())
        .ok_or_else(|| BuildError::InvalidReference {
            message: format!("操作节点 {:?} 不存在", node),
        })
}

/// 组件自身的依赖只有在构造自身时才构成边
fn constructs_self(component: &ComponentNode, node: &OperationNode) -> bool {
    match node.phase {
        LifecyclePhase::Factory => true,
        LifecyclePhase::Inject => component.mode != InstantiationMode::Singleton,
        _ => false,
    }
}

fn duplicate_provider(key: &Key, first: String, second: String) -> BuildError {
    let (first, second) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    BuildError::DuplicateProvider {
        key: key.clone(),
        first,
        second,
    }
}

/// 深度优先后序；遇到回边时返回构成环的边
fn topological_sort(
    edges: &[Vec<Edge>],
    removed: &HashSet<(NodeId, usize)>,
) -> Result<Vec<ComponentId>, Vec<Edge>> {
    let mut color = vec![Color::White; edges.len()];
    let mut order = Vec::with_capacity(edges.len());

    for root in 0..edges.len() {
        if color[root] != Color::White {
            continue;
        }
        color[root] = Color::Gray;
        // (组件, 下一条边, 进入该组件的边)
        let mut stack: Vec<(usize, usize, Option<Edge>)> = vec![(root, 0, None)];

        while let Some(&(current, next, _)) = stack.last() {
            let top = stack.len() - 1;
            let Some(edge) = edges[current].get(next).copied() else {
                color[current] = Color::Black;
                order.push(ComponentId(current));
                stack.pop();
                continue;
            };
            stack[top].1 += 1;
            if removed.contains(&(edge.node, edge.index)) {
                continue;
            }

            let to = edge.to.index();
            match color[to] {
                Color::White => {
                    color[to] = Color::Gray;
                    stack.push((to, 0, Some(edge)));
                }
                Color::Gray => {
                    let start = stack.iter().position(|(c, _, _)| *c == to).unwrap_or(0);
                    let mut cycle: Vec<Edge> = stack[start + 1..]
                        .iter()
                        .filter_map(|(_, _, incoming)| *incoming)
                        .collect();
                    cycle.push(edge);
                    return Err(cycle);
                }
                Color::Black => {}
            }
        }
    }

    Ok(order)
}

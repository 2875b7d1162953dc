//! 服务注册表
//!
//! 每个作用域一个 [`ServiceRegistry`]，把键映射到服务条目；子作用域通过导出
//! 把条目暴露给父作用域，父作用域满足子作用域的导入。

use crate::pool::PoolSlot;
use infrastructure_common::{
    ComponentId, DependencyKind, InstantiationMode, Key, ScopeId, SidecarSupplier, Value,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 服务条目句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

/// 依赖的提供者
///
/// 每个服务条目在收集阶段恰好附加一次提供者；解析后每个依赖都对应一个提供者。
#[derive(Clone)]
pub enum Provider {
    /// 单例：常量池槽位
    Constant {
        /// 槽位
        slot: PoolSlot,
        /// 提供组件
        component: ComponentId,
    },
    /// 延迟：每个生命周期实例一个单元
    Lazy {
        /// 延迟单元下标
        cell: usize,
        /// 提供组件
        component: ComponentId,
    },
    /// 原型：每次注入都构造
    Prototype {
        /// 提供组件
        component: ComponentId,
    },
    /// 预构建实例
    Instance(Value),
    /// 作用域侧车提供者
    Sidecar(SidecarSupplier),
    /// 缺失的可选依赖
    Absent(DependencyKind),
}

impl Provider {
    /// 提供该依赖的组件（实例、侧车与缺失依赖没有组件）
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Self::Constant { component, .. }
            | Self::Lazy { component, .. }
            | Self::Prototype { component } => Some(*component),
            _ => None,
        }
    }

    /// 是否为缺失的可选依赖
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent(_))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { slot, component } => f
                .debug_struct("Constant")
                .field("slot", slot)
                .field("component", component)
                .finish(),
            Self::Lazy { cell, component } => f
                .debug_struct("Lazy")
                .field("cell", cell)
                .field("component", component)
                .finish(),
            Self::Prototype { component } => f
                .debug_struct("Prototype")
                .field("component", component)
                .finish(),
            Self::Instance(_) => f.write_str("Instance(<value>)"),
            Self::Sidecar(_) => f.write_str("Sidecar(<supplier>)"),
            Self::Absent(kind) => f.debug_tuple("Absent").field(kind).finish(),
        }
    }
}

/// 条目来源
#[derive(Clone)]
pub enum EntrySource {
    /// 组件
    Component(ComponentId),
    /// 预构建实例
    Instance(Value),
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(id) => f.debug_tuple("Component").field(id).finish(),
            Self::Instance(_) => f.write_str("Instance(<value>)"),
        }
    }
}

/// 服务条目
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// 服务键
    pub key: Key,
    /// 实例化模式，预构建实例视为单例
    pub mode: InstantiationMode,
    /// 注册位置
    pub origin: String,
    /// 描述
    pub description: Option<String>,
    /// 来源
    pub source: EntrySource,
    /// 登记所在作用域
    pub scope: ScopeId,
    provider: Option<Provider>,
}

impl ServiceEntry {
    pub(crate) fn new(
        key: Key,
        mode: InstantiationMode,
        origin: String,
        description: Option<String>,
        source: EntrySource,
        scope: ScopeId,
    ) -> Self {
        Self {
            key,
            mode,
            origin,
            description,
            source,
            scope,
            provider: None,
        }
    }

    /// 附加的提供者
    pub fn provider(&self) -> Option<&Provider> {
        self.provider.as_ref()
    }

    /// 附加提供者；返回是否为首次附加
    pub(crate) fn attach(&mut self, provider: Provider) -> bool {
        if self.provider.is_some() {
            return false;
        }
        self.provider = Some(provider);
        true
    }
}

/// 作用域的服务契约
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceContract {
    /// 从祖先作用域导入的必需服务
    pub requires: BTreeSet<Key>,
    /// 从祖先作用域导入（或缺失）的可选服务
    pub requires_optionally: BTreeSet<Key>,
    /// 导出给父作用域的服务
    pub provides: BTreeSet<Key>,
}

/// 单个作用域的服务注册表
#[derive(Clone)]
pub struct ServiceRegistry {
    /// 作用域
    pub scope: ScopeId,
    /// 作用域名称
    pub name: String,
    /// 父作用域
    pub parent: Option<ScopeId>,
    resolved: BTreeMap<Key, EntryId>,
    exported_by: BTreeMap<Key, ScopeId>,
    sidecars: BTreeMap<Key, SidecarSupplier>,
    contract: ServiceContract,
}

impl ServiceRegistry {
    pub(crate) fn new(scope: ScopeId, name: String, parent: Option<ScopeId>) -> Self {
        Self {
            scope,
            name,
            parent,
            resolved: BTreeMap::new(),
            exported_by: BTreeMap::new(),
            sidecars: BTreeMap::new(),
            contract: ServiceContract::default(),
        }
    }

    /// 作用域中可见的条目
    pub fn entry(&self, key: &Key) -> Option<EntryId> {
        self.resolved.get(key).copied()
    }

    /// 服务契约
    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    /// 键是否由子作用域导出而来
    pub fn exported_by(&self, key: &Key) -> Option<ScopeId> {
        self.exported_by.get(key).copied()
    }

    pub(crate) fn insert_local(&mut self, key: Key, entry: EntryId) -> Option<EntryId> {
        self.resolved.insert(key, entry)
    }

    pub(crate) fn insert_export(&mut self, key: Key, entry: EntryId, child: ScopeId) {
        self.exported_by.insert(key.clone(), child);
        self.resolved.insert(key, entry);
    }

    pub(crate) fn add_sidecar(&mut self, key: Key, supplier: SidecarSupplier) -> bool {
        if self.sidecars.contains_key(&key) {
            return false;
        }
        self.sidecars.insert(key, supplier);
        true
    }

    pub(crate) fn sidecar(&self, key: &Key) -> Option<&SidecarSupplier> {
        self.sidecars.get(key)
    }

    pub(crate) fn contract_mut(&mut self) -> &mut ServiceContract {
        &mut self.contract
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("resolved", &self.resolved)
            .field("sidecars", &self.sidecars.keys().collect::<Vec<_>>())
            .field("contract", &self.contract)
            .finish()
    }
}

/// 查找结果
pub(crate) enum Lookup {
    /// 找到条目；`imported_through` 为沿途缺少该键而向上查找的作用域
    Entry {
        entry: EntryId,
        imported_through: Vec<ScopeId>,
    },
    /// 由侧车提供
    Sidecar {
        supplier: SidecarSupplier,
        imported_through: Vec<ScopeId>,
    },
    /// 整个作用域链中都不存在
    Missing { searched: Vec<ScopeId> },
}

/// 全部作用域的注册表与条目 arena
#[derive(Debug, Clone, Default)]
pub struct RegistrySet {
    registries: Vec<ServiceRegistry>,
    entries: Vec<ServiceEntry>,
}

impl RegistrySet {
    pub(crate) fn new(registries: Vec<ServiceRegistry>) -> Self {
        Self {
            registries,
            entries: Vec::new(),
        }
    }

    /// 作用域的注册表
    pub fn registry(&self, scope: ScopeId) -> Option<&ServiceRegistry> {
        self.registries.get(scope.index())
    }

    /// 按名称查找注册表
    pub fn registry_named(&self, name: &str) -> Option<&ServiceRegistry> {
        self.registries.iter().find(|r| r.name == name)
    }

    /// 条目
    pub fn entry(&self, id: EntryId) -> Option<&ServiceEntry> {
        self.entries.get(id.0)
    }

    /// 所有注册表
    pub fn registries(&self) -> &[ServiceRegistry] {
        &self.registries
    }

    /// 条目数
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn registry_mut(&mut self, scope: ScopeId) -> Option<&mut ServiceRegistry> {
        self.registries.get_mut(scope.index())
    }

    pub(crate) fn push_entry(&mut self, entry: ServiceEntry) -> EntryId {
        self.entries.push(entry);
        EntryId(self.entries.len() - 1)
    }

    /// 沿作用域链查找：本地条目，然后侧车，然后父作用域
    pub(crate) fn lookup(&self, scope: ScopeId, key: &Key) -> Lookup {
        let mut current = Some(scope);
        let mut searched = Vec::new();
        while let Some(id) = current {
            let Some(registry) = self.registry(id) else {
                break;
            };
            if let Some(entry) = registry.entry(key) {
                return Lookup::Entry {
                    entry,
                    imported_through: searched,
                };
            }
            if let Some(supplier) = registry.sidecar(key) {
                return Lookup::Sidecar {
                    supplier: supplier.clone(),
                    imported_through: searched,
                };
            }
            searched.push(id);
            current = registry.parent;
        }
        Lookup::Missing { searched }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(key: &Key, scope: ScopeId) -> ServiceEntry {
        ServiceEntry::new(
            key.clone(),
            InstantiationMode::Singleton,
            "test".to_string(),
            None,
            EntrySource::Component(ComponentId(0)),
            scope,
        )
    }

    #[test]
    fn test_lookup_walks_parent_chain() {
        let root = ScopeId(0);
        let child = ScopeId(1);
        let mut set = RegistrySet::new(vec![
            ServiceRegistry::new(root, "root".to_string(), None),
            ServiceRegistry::new(child, "child".to_string(), Some(root)),
        ]);
        let key = Key::named("app::Clock");
        let id = set.push_entry(entry(&key, root));
        set.registry_mut(root).unwrap().insert_local(key.clone(), id);

        match set.lookup(child, &key) {
            Lookup::Entry {
                entry,
                imported_through,
            } => {
                assert_eq!(entry, id);
                assert_eq!(imported_through, vec![child]);
            }
            _ => panic!("expected entry"),
        }

        match set.lookup(child, &Key::named("app::Missing")) {
            Lookup::Missing { searched } => assert_eq!(searched, vec![child, root]),
            _ => panic!("expected missing"),
        }
    }

    #[test]
    fn test_local_entry_shadows_sidecar() {
        let root = ScopeId(0);
        let mut set = RegistrySet::new(vec![ServiceRegistry::new(root, "root".to_string(), None)]);
        let key = Key::named("app::Clock");
        let supplier: SidecarSupplier = Arc::new(|| Arc::new(0_u32) as Value);
        assert!(set.registry_mut(root).unwrap().add_sidecar(key.clone(), supplier.clone()));
        assert!(!set.registry_mut(root).unwrap().add_sidecar(key.clone(), supplier));
        assert!(matches!(set.lookup(root, &key), Lookup::Sidecar { .. }));

        let id = set.push_entry(entry(&key, root));
        set.registry_mut(root).unwrap().insert_local(key.clone(), id);
        assert!(matches!(set.lookup(root, &key), Lookup::Entry { .. }));
    }

    #[test]
    fn test_provider_attached_once() {
        let key = Key::named("app::Clock");
        let mut entry = entry(&key, ScopeId(0));
        assert!(entry.attach(Provider::Prototype {
            component: ComponentId(0)
        }));
        assert!(!entry.attach(Provider::Absent(DependencyKind::Optional)));
        assert_eq!(entry.provider().and_then(Provider::component), Some(ComponentId(0)));
    }
}

//! 常量池
//!
//! 构建期为每个单例工厂分配槽位（[`ConstantPoolTemplate`]），每个生命周期实例
//! 持有一份运行期存储（[`ConstantPool`]），每个槽位最多写入一次，读取无锁。

use infrastructure_common::{ConstantPoolError, NodeId, Value};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;

/// 常量池槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolSlot(usize);

impl PoolSlot {
    /// 槽位下标
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 构建期槽位分配
#[derive(Debug, Default, Clone)]
pub struct ConstantPoolTemplate {
    assignments: HashMap<NodeId, PoolSlot>,
    owners: Vec<NodeId>,
}

impl ConstantPoolTemplate {
    /// 创建空的槽位分配
    pub fn new() -> Self {
        Self::default()
    }

    /// 为节点分配槽位；同一节点重复分配返回同一槽位
    pub fn allocate(&mut self, node: NodeId) -> PoolSlot {
        if let Some(slot) = self.assignments.get(&node) {
            return *slot;
        }
        let slot = PoolSlot(self.owners.len());
        self.owners.push(node);
        self.assignments.insert(node, slot);
        slot
    }

    /// 节点的槽位
    pub fn slot_of(&self, node: NodeId) -> Option<PoolSlot> {
        self.assignments.get(&node).copied()
    }

    /// 槽位的所属节点
    pub fn owner(&self, slot: PoolSlot) -> Option<NodeId> {
        self.owners.get(slot.0).copied()
    }

    /// 已分配的槽位数
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// 是否没有分配任何槽位
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// 为一个生命周期实例创建运行期存储
    pub fn instantiate(&self) -> ConstantPool {
        ConstantPool {
            slots: (0..self.owners.len()).map(|_| OnceCell::new()).collect(),
        }
    }
}

/// 运行期常量池
pub struct ConstantPool {
    slots: Box<[OnceCell<Value>]>,
}

impl ConstantPool {
    fn cell(&self, slot: PoolSlot) -> Result<&OnceCell<Value>, ConstantPoolError> {
        self.slots.get(slot.0).ok_or(ConstantPoolError::SlotOutOfRange {
            slot: slot.0,
            len: self.slots.len(),
        })
    }

    /// 写入槽位；重复写入或写入空值均为错误
    pub fn write(&self, slot: PoolSlot, value: Option<Value>) -> Result<(), ConstantPoolError> {
        let cell = self.cell(slot)?;
        let value = value.ok_or(ConstantPoolError::NullValue { slot: slot.0 })?;
        cell.set(value)
            .map_err(|_| ConstantPoolError::SlotAlreadyWritten { slot: slot.0 })
    }

    /// 读取槽位
    pub fn read(&self, slot: PoolSlot) -> Result<Value, ConstantPoolError> {
        self.cell(slot)?
            .get()
            .cloned()
            .ok_or(ConstantPoolError::SlotNotWritten { slot: slot.0 })
    }

    /// 槽位是否已写入
    pub fn is_written(&self, slot: PoolSlot) -> bool {
        self.slots
            .get(slot.0)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false)
    }

    /// 槽位数
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否没有槽位
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 已写入的槽位数
    pub fn written(&self) -> usize {
        self.slots.iter().filter(|cell| cell.get().is_some()).count()
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantPool")
            .field("len", &self.slots.len())
            .field("written", &self.written())
            .finish()
    }
}

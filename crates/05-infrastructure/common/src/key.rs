//! 服务键与依赖描述符
//!
//! [`Key`] 是整个容器中唯一的服务身份标识；[`DependencyDescriptor`] 描述
//! 单个依赖的形状（键 + 可选性），由外部扫描器创建一次后不再修改。

use crate::component::Value;
use crate::metadata::TypeInfo;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// 服务键：类型 + 可选限定符
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    type_info: TypeInfo,
    qualifier: Option<String>,
}

impl Key {
    /// 由 Rust 类型创建键
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifier: None,
        }
    }

    /// 由类型名称创建键
    pub fn named(type_name: &str) -> Self {
        Self {
            type_info: TypeInfo::from_name(type_name),
            qualifier: None,
        }
    }

    /// 附加限定符
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// 类型信息
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// 限定符
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}@{}", self.type_info, qualifier),
            None => write!(f, "{}", self.type_info),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 原始类型可选依赖的种类，缺失时注入该类型的零值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f64`
    Double,
    /// `bool`
    Bool,
}

impl PrimitiveKind {
    /// 该原始类型的零值
    pub fn zero_value(self) -> Value {
        match self {
            Self::Int => Arc::new(0_i32),
            Self::Long => Arc::new(0_i64),
            Self::Double => Arc::new(0.0_f64),
            Self::Bool => Arc::new(false),
        }
    }
}

/// 依赖的可选性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DependencyKind {
    /// 必需依赖，无法解析即构建失败
    #[default]
    Required,
    /// 可选依赖，缺失时注入 `None`
    Optional,
    /// 可空依赖，缺失时注入 `None`
    OptionalNullable,
    /// 原始类型可选依赖，缺失时注入零值
    OptionalPrimitive(PrimitiveKind),
}

impl DependencyKind {
    /// 是否为必需依赖
    pub fn is_required(self) -> bool {
        matches!(self, Self::Required)
    }

    /// 依赖缺失时注入的值
    pub fn absent_value(self) -> Option<Value> {
        match self {
            Self::OptionalPrimitive(kind) => Some(kind.zero_value()),
            _ => None,
        }
    }
}

/// 依赖描述符
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyDescriptor {
    /// 依赖的服务键
    pub key: Key,
    /// 可选性
    pub kind: DependencyKind,
    /// 来源变量（参数名、字段名等），用于错误报告
    pub variable: String,
}

impl DependencyDescriptor {
    /// 创建依赖描述符
    pub fn new(key: Key, kind: DependencyKind, variable: impl Into<String>) -> Self {
        Self {
            key,
            kind,
            variable: variable.into(),
        }
    }

    /// 必需依赖
    pub fn required(key: Key) -> Self {
        let variable = key.to_string();
        Self::new(key, DependencyKind::Required, variable)
    }

    /// 可选依赖
    pub fn optional(key: Key) -> Self {
        let variable = key.to_string();
        Self::new(key, DependencyKind::Optional, variable)
    }

    /// 可空依赖
    pub fn nullable(key: Key) -> Self {
        let variable = key.to_string();
        Self::new(key, DependencyKind::OptionalNullable, variable)
    }

    /// 原始类型可选依赖
    pub fn primitive(key: Key, kind: PrimitiveKind) -> Self {
        let variable = key.to_string();
        Self::new(key, DependencyKind::OptionalPrimitive(kind), variable)
    }

    /// 设置来源变量名
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = variable.into();
        self
    }

    /// 是否为必需依赖
    pub fn is_required(&self) -> bool {
        self.kind.is_required()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Clock;

    #[test]
    fn test_key_equality_uses_type_and_qualifier() {
        let plain = Key::of::<Clock>();
        let qualified = Key::of::<Clock>().with_qualifier("utc");

        assert_ne!(plain, qualified);
        assert_eq!(qualified, Key::of::<Clock>().with_qualifier("utc"));

        let set: HashSet<Key> = [plain.clone(), qualified.clone(), plain].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_key_display_and_serialize() {
        let key = Key::named("app::Cache").with_qualifier("primary");
        assert_eq!(key.to_string(), "Cache@primary");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"Cache@primary\"");
    }

    #[test]
    fn test_absent_values() {
        assert!(DependencyKind::Optional.absent_value().is_none());
        assert!(DependencyKind::OptionalNullable.absent_value().is_none());

        let zero = DependencyKind::OptionalPrimitive(PrimitiveKind::Long)
            .absent_value()
            .unwrap();
        assert_eq!(*zero.downcast::<i64>().unwrap(), 0);
        assert!(DependencyKind::Required.is_required());
    }
}

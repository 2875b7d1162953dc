//! 元数据定义
//!
//! 提供服务键所使用的类型信息

use std::any::TypeId;
use std::fmt;

/// 类型信息
///
/// 相等性由类型ID与完整类型路径共同决定。通过名称构造的类型信息（由外部扫描器提供）
/// 共享同一个占位类型ID，因此依靠完整路径区分。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeInfo {
    /// 类型名称
    pub name: String,
    /// 类型ID
    pub id: TypeId,
    /// 模块路径
    pub module_path: String,
}

impl TypeInfo {
    /// 从类型获取类型信息
    pub fn of<T: ?Sized + 'static>() -> Self {
        let full_name = std::any::type_name::<T>();
        Self {
            name: short_type_name(full_name).to_string(),
            id: TypeId::of::<T>(),
            module_path: full_name.to_string(),
        }
    }

    /// 从类型名称创建类型信息（用于外部扫描器生成的描述符）
    pub fn from_name(name: &str) -> Self {
        Self {
            name: short_type_name(name).to_string(),
            id: TypeId::of::<()>(),
            module_path: name.to_string(),
        }
    }

    /// 获取简短的类型名称（不包含模块路径）
    pub fn short_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 去掉模块路径，保留泛型参数
fn short_type_name(full_name: &str) -> &str {
    let head = full_name.split('<').next().unwrap_or(full_name);
    match head.rfind("::") {
        Some(pos) => &full_name[pos + 2..],
        None => full_name,
    }
}

//! 服务查找接口

use async_trait::async_trait;
use infrastructure_common::{Key, LifecycleResult, Value};

/// 服务定位器 trait
///
/// 在生命周期实例初始化之后按键查找根作用域中可见的服务。
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// 查找服务；未提供时返回 `None`
    ///
    /// 延迟服务在首次查找时构造，原型服务每次查找都构造新实例。
    async fn service(&self, key: &Key) -> LifecycleResult<Option<Value>>;

    /// 根作用域是否提供该键
    fn provides(&self, key: &Key) -> bool;
}

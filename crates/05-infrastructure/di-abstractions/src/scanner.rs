//! 组件来源抽象接口
//!
//! 注解扫描、反射等发现机制都在容器核心之外，它们只需产生作用域描述符树。

use async_trait::async_trait;
use infrastructure_common::{ComponentError, ScopeDescriptor};

/// 组件来源 trait
///
/// 用于向容器提供声明式的组件描述
#[async_trait]
pub trait ComponentSource: Send + Sync {
    /// 产生作用域描述符树
    async fn scan(&self) -> Result<ScopeDescriptor, ComponentError>;

    /// 获取来源名称
    fn name(&self) -> &str;
}

/// 固定描述符来源，直接返回构造时给定的描述符
#[derive(Debug, Clone)]
pub struct StaticSource {
    descriptor: ScopeDescriptor,
}

impl StaticSource {
    /// 创建固定描述符来源
    pub fn new(descriptor: ScopeDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl ComponentSource for StaticSource {
    async fn scan(&self) -> Result<ScopeDescriptor, ComponentError> {
        Ok(self.descriptor.clone())
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }
}

//! 扩展接口
//!
//! 扩展解释组件成员上的注解，通过 [`Registrar`] 登记额外的提供者与
//! 生命周期操作，并在进程启停时得到回调。

use crate::registry::Registrar;
use crate::resolver::ServiceLocator;
use async_trait::async_trait;
use infrastructure_common::{BuildResult, ComponentId, MemberSite};

/// 扩展 trait
#[async_trait]
pub trait Extension: Send + Sync {
    /// 扩展名称
    fn name(&self) -> &str;

    /// 是否处理该注解
    fn handles(&self, annotation: &str) -> bool;

    /// 处理带注解的字段
    fn on_field(
        &self,
        _registrar: &mut dyn Registrar,
        _component: ComponentId,
        _member: &MemberSite,
    ) -> BuildResult<()> {
        Ok(())
    }

    /// 处理带注解的方法
    fn on_method(
        &self,
        _registrar: &mut dyn Registrar,
        _component: ComponentId,
        _member: &MemberSite,
    ) -> BuildResult<()> {
        Ok(())
    }

    /// 生命周期进入运行状态前调用
    async fn on_process_start(&self, _services: &dyn ServiceLocator) -> anyhow::Result<()> {
        Ok(())
    }

    /// 生命周期停止结束时调用
    async fn on_process_stop(&self, _services: &dyn ServiceLocator) -> anyhow::Result<()> {
        Ok(())
    }
}

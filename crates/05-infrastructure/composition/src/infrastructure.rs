//! 应用主入口

use crate::builder::ContainerBuilder;
use crate::config_sources::ContainerSettings;
use di_impl::{ApplicationTemplate, Lifetime, LifetimeMetrics};
use infrastructure_common::{InfrastructureResult, Key, LifecycleState, Value};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// 应用
///
/// 持有构建好的应用模板与一个生命周期实例，提供启停与服务查找
pub struct Application {
    /// 配置
    settings: ContainerSettings,
    /// 应用模板
    template: Arc<ApplicationTemplate>,
    /// 生命周期实例
    lifetime: Arc<Lifetime>,
}

impl Application {
    /// 创建容器构建器
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// 内部构造函数
    pub(crate) fn new(settings: ContainerSettings, template: Arc<ApplicationTemplate>, lifetime: Lifetime) -> Self {
        Self {
            settings,
            template,
            lifetime: Arc::new(lifetime),
        }
    }

    /// 启动应用
    pub async fn start(&self) -> InfrastructureResult<()> {
        info!("启动应用: {}", self.settings.application_name);
        self.lifetime.start().await.map_err(|e| {
            error!("应用启动失败: {}", e);
            e
        })?;
        info!("应用启动完成");
        Ok(())
    }

    /// 停止应用
    pub async fn stop(&self) -> InfrastructureResult<()> {
        info!("停止应用: {}", self.settings.application_name);
        self.lifetime.stop().await?;
        info!("应用停止完成");
        Ok(())
    }

    /// 启动应用，等待关闭信号后停止
    pub async fn run_until<F>(&self, shutdown: F) -> InfrastructureResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(e) = self.start().await {
            // 启动被中止时仍需停止已启动的组件
            if let Err(stop_error) = self.lifetime.stop().await {
                error!("启动失败后停止出错: {}", stop_error);
            }
            return Err(e);
        }
        shutdown.await;
        info!("收到关闭信号");
        self.stop().await
    }

    /// 按键查找服务
    pub async fn service(&self, key: &Key) -> InfrastructureResult<Option<Value>> {
        Ok(self.lifetime.service(key).await?)
    }

    /// 按类型查找服务
    pub async fn get<T: Any + Send + Sync>(&self) -> InfrastructureResult<Option<Arc<T>>> {
        Ok(self.lifetime.get::<T>().await?)
    }

    /// 获取运行状态
    pub fn status(&self) -> LifecycleState {
        self.lifetime.state()
    }

    /// 获取统计信息
    pub fn metrics(&self) -> ApplicationMetrics {
        ApplicationMetrics {
            lifetime: self.lifetime.metrics(),
            components: self.template.components().len(),
            scopes: self.template.registries().registries().len(),
            pool_slots: self.template.pool().len(),
        }
    }

    /// 获取配置
    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// 获取应用模板
    pub fn template(&self) -> &Arc<ApplicationTemplate> {
        &self.template
    }

    /// 获取生命周期实例
    pub fn lifetime(&self) -> &Arc<Lifetime> {
        &self.lifetime
    }
}

/// 应用统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationMetrics {
    /// 生命周期指标
    pub lifetime: LifetimeMetrics,
    /// 组件数量
    pub components: usize,
    /// 作用域数量
    pub scopes: usize,
    /// 常量池槽位数量
    pub pool_slots: usize,
}

impl ApplicationMetrics {
    /// 计算运行时间
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match (self.lifetime.started_at, self.lifetime.stopped_at) {
            (Some(start), Some(stop)) => Some(stop - start),
            (Some(start), None) => Some(chrono::Utc::now() - start),
            _ => None,
        }
    }
}

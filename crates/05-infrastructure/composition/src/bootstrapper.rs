//! 容器启动器

use crate::config_sources::ContainerSettings;
use di_abstractions::{ComponentSource, Extension, Registrar};
use di_impl::{ApplicationTemplate, BuildContext, PendingMember};
use infrastructure_common::{BuildResult, InfrastructureResult, MemberKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 容器启动器
///
/// 负责扫描组件来源、登记描述符、把带注解的成员分派给扩展，最后构建应用模板
pub struct Bootstrapper {
    /// 组件来源列表
    sources: Vec<Box<dyn ComponentSource>>,
    /// 扩展列表
    extensions: Vec<Arc<dyn Extension>>,
}

impl Bootstrapper {
    /// 创建新的启动器
    pub fn new(sources: Vec<Box<dyn ComponentSource>>, extensions: Vec<Arc<dyn Extension>>) -> Self {
        Self {
            sources,
            extensions,
        }
    }

    /// 构建应用模板
    pub async fn bootstrap(&self, settings: &ContainerSettings) -> InfrastructureResult<Arc<ApplicationTemplate>> {
        info!("开始构建容器: {}", settings.application_name);

        let mut context = BuildContext::new(settings.application_name.clone());
        let root = context.root_scope();
        let mut pending = Vec::new();

        // 第一步：扫描并登记组件来源
        for source in &self.sources {
            info!("扫描组件来源: {}", source.name());
            let descriptor = source.scan().await?;
            debug!(
                "组件来源 {} 提供 {} 个组件",
                source.name(),
                descriptor.component_count()
            );
            pending.extend(context.ingest(root, &descriptor)?);
        }

        // 第二步：扩展处理成员注解
        self.dispatch(&mut context, pending)?;

        // 第三步：解析依赖并生成模板
        let template = context.build(settings.lifecycle.clone())?;
        info!(
            "容器构建完成: {} 个组件",
            template.components().len()
        );
        Ok(template)
    }

    /// 把成员分派给声明处理其注解的扩展
    fn dispatch(&self, context: &mut BuildContext, pending: Vec<PendingMember>) -> BuildResult<()> {
        for PendingMember { component, member } in pending {
            let mut handled = false;
            for extension in &self.extensions {
                if !member.annotations.iter().any(|a| extension.handles(a)) {
                    continue;
                }
                debug!("扩展 {} 处理成员 {}", extension.name(), member.name);
                match member.kind {
                    MemberKind::Field => extension.on_field(context, component, &member)?,
                    MemberKind::Method => extension.on_method(context, component, &member)?,
                }
                handled = true;
            }
            if !handled {
                warn!(
                    "成员 {} 的注解 {:?} 没有扩展处理",
                    member.name, member.annotations
                );
            }
        }
        Ok(())
    }
}

//! 生命周期实例
//!
//! [`Lifetime`] 是应用模板的一次运行：拥有自己的常量池、延迟单元与 fork 任务。
//! 同一实例上的迁移由异步互斥锁串行化；`stop` 会先发出停止请求，
//! 使正在进行的启动在下一个组件边界处中止。

use crate::scheduler::{ExecutionState, Scheduler};
use crate::template::ApplicationTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di_abstractions::{Extension, LifetimeControl, ServiceLocator};
use infrastructure_common::{
    Key, LifecycleError, LifecyclePhase, LifecycleResult, LifecycleState, Transition, Value,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 状态变更记录
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    /// 原状态
    pub from: LifecycleState,
    /// 新状态
    pub to: LifecycleState,
    /// 变更时间
    pub at: DateTime<Utc>,
}

/// 生命周期指标快照
#[derive(Debug, Clone, Serialize)]
pub struct LifetimeMetrics {
    /// 实例 ID
    pub id: Uuid,
    /// 应用名称
    pub application: String,
    /// 当前状态
    pub state: LifecycleState,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 初始化完成时间
    pub initialized_at: Option<DateTime<Utc>>,
    /// 启动完成时间
    pub started_at: Option<DateTime<Utc>>,
    /// 停止完成时间
    pub stopped_at: Option<DateTime<Utc>>,
    /// 已执行的操作数（含 fork）
    pub operations_executed: u64,
    /// fork 出的任务数
    pub forked_tasks: u64,
    /// 仍在后台运行的任务数
    pub background_tasks: usize,
    /// 已记录但未中止迁移的失败数
    pub recorded_failures: usize,
    /// 状态变更历史
    pub history: Vec<StateChange>,
}

#[derive(Debug)]
struct Timeline {
    state: LifecycleState,
    created_at: DateTime<Utc>,
    initialized_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    history: Vec<StateChange>,
}

/// 生命周期实例
pub struct Lifetime {
    id: Uuid,
    template: Arc<ApplicationTemplate>,
    execution: ExecutionState,
    timeline: Mutex<Timeline>,
    transition: tokio::sync::Mutex<()>,
    stop_requested: CancellationToken,
    extensions: Vec<Arc<dyn Extension>>,
    extensions_started: AtomicBool,
}

impl Lifetime {
    pub(crate) fn new(template: Arc<ApplicationTemplate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution: ExecutionState::new(template.clone()),
            template,
            timeline: Mutex::new(Timeline {
                state: LifecycleState::Uninitialized,
                created_at: Utc::now(),
                initialized_at: None,
                started_at: None,
                stopped_at: None,
                history: Vec::new(),
            }),
            transition: tokio::sync::Mutex::new(()),
            stop_requested: CancellationToken::new(),
            extensions: Vec::new(),
            extensions_started: AtomicBool::new(false),
        }
    }

    /// 附加扩展，在进程启停时回调
    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn Extension>>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    /// 实例标识
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 所属模板
    pub fn template(&self) -> &Arc<ApplicationTemplate> {
        &self.template
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.timeline.lock().state
    }

    /// 组件状态
    pub fn bean_state(&self, name: &str) -> Option<LifecycleState> {
        self.template
            .component_named(name)
            .map(|(id, _)| self.execution.bean_state(id))
    }

    /// 已记录但未中止迁移的失败
    pub fn recorded_failures(&self) -> Vec<String> {
        self.execution.recorded_failures()
    }

    /// 取出已记录的失败
    pub fn take_recorded_failures(&self) -> Vec<LifecycleError> {
        self.execution.take_recorded_failures()
    }

    /// 指标快照
    pub fn metrics(&self) -> LifetimeMetrics {
        let timeline = self.timeline.lock();
        LifetimeMetrics {
            id: self.id,
            application: self.template.name().to_string(),
            state: timeline.state,
            created_at: timeline.created_at,
            initialized_at: timeline.initialized_at,
            started_at: timeline.started_at,
            stopped_at: timeline.stopped_at,
            operations_executed: self.execution.ctx.operations_executed(),
            forked_tasks: self.execution.forked_tasks(),
            background_tasks: self.execution.background_len(),
            recorded_failures: self.execution.recorded_failures().len(),
            history: timeline.history.clone(),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        let mut timeline = self.timeline.lock();
        let previous = timeline.state;
        if !previous.can_transition_to(next) {
            warn!("非预期的状态变更: {} -> {}", previous, next);
        }
        let now = Utc::now();
        match next {
            LifecycleState::Initialized => timeline.initialized_at = Some(now),
            LifecycleState::Running => timeline.started_at = Some(now),
            LifecycleState::Terminated | LifecycleState::Failed => timeline.stopped_at = Some(now),
            _ => {}
        }
        timeline.state = next;
        timeline.history.push(StateChange {
            from: previous,
            to: next,
            at: now,
        });
        debug!("生命周期 {}: {} -> {}", self.id, previous, next);
    }

    /// 初始化所有单例组件
    pub async fn initialize(&self) -> LifecycleResult<()> {
        let _guard = self.transition.lock().await;
        self.initialize_locked().await
    }

    async fn initialize_locked(&self) -> LifecycleResult<()> {
        let state = self.state();
        if state != LifecycleState::Uninitialized {
            return Err(LifecycleError::IllegalState {
                transition: Transition::Initialize,
                state,
            });
        }

        self.set_state(LifecycleState::Initializing);
        info!(
            "初始化 {}: {} 个组件",
            self.template.name(),
            self.template.lifecycle_order().len()
        );

        let mut scheduler = Scheduler::new(&self.execution, Transition::Initialize, None);
        let span = info_span!("initialize", application = %self.template.name(), lifetime = %self.id);
        match scheduler.initialize().instrument(span).await {
            Ok(()) => {
                self.set_state(LifecycleState::Initialized);
                Ok(())
            }
            Err(failure) => {
                scheduler.detach_remaining();
                Err(self.fail(failure).await)
            }
        }
    }

    /// 启动；尚未初始化时先初始化
    pub async fn start(&self) -> LifecycleResult<()> {
        let _guard = self.transition.lock().await;
        if self.stop_requested.is_cancelled() {
            return Err(LifecycleError::TransitionAborted {
                transition: Transition::Start,
                reason: "已请求停止".to_string(),
            });
        }
        if self.state() == LifecycleState::Uninitialized {
            self.initialize_locked().await?;
        }
        let state = self.state();
        if state != LifecycleState::Initialized {
            return Err(LifecycleError::IllegalState {
                transition: Transition::Start,
                state,
            });
        }

        self.set_state(LifecycleState::Starting);
        info!("启动 {}", self.template.name());

        let mut scheduler = Scheduler::new(
            &self.execution,
            Transition::Start,
            Some(self.stop_requested.clone()),
        );
        let span = info_span!("start", application = %self.template.name(), lifetime = %self.id);
        match scheduler.start().instrument(span).await {
            Ok(()) => {}
            Err(aborted @ LifecycleError::TransitionAborted { .. }) => {
                scheduler.detach_remaining();
                warn!("启动被中止: {}", aborted);
                return Err(aborted);
            }
            Err(failure) => {
                scheduler.detach_remaining();
                return Err(self.fail(failure).await);
            }
        }

        if let Err(failure) = self.start_extensions().await {
            return Err(self.fail(failure).await);
        }

        self.execution.mark_running();
        self.set_state(LifecycleState::Running);
        info!("{} 已就绪", self.template.name());
        Ok(())
    }

    /// 停止；收集所有错误
    pub async fn stop(&self) -> LifecycleResult<()> {
        self.stop_requested.cancel();
        let _guard = self.transition.lock().await;

        match self.state() {
            LifecycleState::Uninitialized => {
                self.set_state(LifecycleState::Terminated);
                Ok(())
            }
            LifecycleState::Terminated | LifecycleState::Failed => Ok(()),
            _ => {
                self.set_state(LifecycleState::Stopping);
                info!("停止 {}", self.template.name());
                let failures = self.stop_pass().await;
                if failures.is_empty() {
                    self.set_state(LifecycleState::Terminated);
                    Ok(())
                } else {
                    self.set_state(LifecycleState::Failed);
                    Err(LifecycleError::StopFailed { failures })
                }
            }
        }
    }

    /// 致命失败：进入失败状态，停止所有存活组件
    async fn fail(&self, mut failure: LifecycleError) -> LifecycleError {
        error!("{} 失败: {}", self.template.name(), failure);
        self.set_state(LifecycleState::Failed);

        let failures = self.stop_pass().await;
        match &mut failure {
            LifecycleError::OperationFailure { suppressed, .. } => suppressed.extend(failures),
            _ => {
                for suppressed in failures {
                    warn!("失败后停止时的错误: {}", suppressed);
                }
            }
        }
        failure
    }

    async fn stop_pass(&self) -> Vec<LifecycleError> {
        let span = info_span!("stop", application = %self.template.name(), lifetime = %self.id);
        let mut failures = Scheduler::new(&self.execution, Transition::Stop, None)
            .stop()
            .instrument(span)
            .await;

        if self.extensions_started.swap(false, Ordering::SeqCst) {
            for extension in &self.extensions {
                if let Err(cause) = extension.on_process_stop(self).await {
                    failures.push(LifecycleError::operation_failure(
                        LifecyclePhase::StopPost,
                        extension.name(),
                        "on_process_stop",
                        cause,
                    ));
                }
            }
        }
        failures
    }

    async fn start_extensions(&self) -> LifecycleResult<()> {
        self.extensions_started.store(true, Ordering::SeqCst);
        for extension in &self.extensions {
            debug!("扩展启动回调: {}", extension.name());
            extension.on_process_start(self).await.map_err(|cause| {
                LifecycleError::operation_failure(
                    LifecyclePhase::StartPre,
                    extension.name(),
                    "on_process_start",
                    cause,
                )
            })?;
        }
        Ok(())
    }

    /// 按键查找服务
    pub async fn service(&self, key: &Key) -> LifecycleResult<Option<Value>> {
        let state = self.state();
        if matches!(
            state,
            LifecycleState::Uninitialized | LifecycleState::Initializing
        ) {
            return Err(LifecycleError::IllegalState {
                transition: Transition::Initialize,
                state,
            });
        }
        match self.template.root_provider(key) {
            Some(provider) => self.execution.ctx.provide(provider).await,
            None => Ok(None),
        }
    }

    /// 按类型查找服务
    pub async fn get<T: Any + Send + Sync>(&self) -> LifecycleResult<Option<Arc<T>>> {
        let key = Key::of::<T>();
        let value = self.service(&key).await?;
        Ok(value.and_then(|value| match value.downcast::<T>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                warn!("服务 {} 的实际类型不匹配", key);
                None
            }
        }))
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.id)
            .field("application", &self.template.name())
            .field("state", &self.state())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

#[async_trait]
impl LifetimeControl for Lifetime {
    async fn initialize(&self) -> LifecycleResult<()> {
        Lifetime::initialize(self).await
    }

    async fn start(&self) -> LifecycleResult<()> {
        Lifetime::start(self).await
    }

    async fn stop(&self) -> LifecycleResult<()> {
        Lifetime::stop(self).await
    }

    fn state(&self) -> LifecycleState {
        Lifetime::state(self)
    }
}

#[async_trait]
impl ServiceLocator for Lifetime {
    async fn service(&self, key: &Key) -> LifecycleResult<Option<Value>> {
        Lifetime::service(self, key).await
    }

    fn provides(&self, key: &Key) -> bool {
        self.template
            .root_provider(key)
            .is_some_and(|provider| !provider.is_absent())
    }
}

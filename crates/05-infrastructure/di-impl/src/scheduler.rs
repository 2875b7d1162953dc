//! 生命周期调度器
//!
//! 每次迁移由两次遍历组成：正向遍历按拓扑顺序执行 `*Pre` 阶段，
//! 反向遍历按逆拓扑顺序执行 `*Post` 阶段。fork 出的任务按各自的等待策略
//! 在遍历中被等待，迁移结束前任务组被关闭。
//!
//! 初始化与启动遇到致命失败时立即返回；停止会收集所有错误并继续。

use crate::plan::{InvocationPlan, LifetimeContext};
use crate::task_group::{ForkedTask, JoinOptions, JoinOutcome, TaskGroup, TaskInfo};
use crate::template::ApplicationTemplate;
use infrastructure_common::{
    ComponentId, JoinPolicy, LifecycleError, LifecyclePhase, LifecycleResult, LifecycleState,
    Transition,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 一个生命周期实例的共享运行状态
#[derive(Debug)]
pub(crate) struct ExecutionState {
    pub(crate) ctx: Arc<LifetimeContext>,
    beans: Mutex<Vec<LifecycleState>>,
    background: Mutex<Vec<ForkedTask>>,
    recorded: Mutex<Vec<LifecycleError>>,
    forked: AtomicU64,
}

impl ExecutionState {
    pub(crate) fn new(template: Arc<ApplicationTemplate>) -> Self {
        let beans = vec![LifecycleState::Uninitialized; template.components().len()];
        Self {
            ctx: Arc::new(LifetimeContext::new(template)),
            beans: Mutex::new(beans),
            background: Mutex::new(Vec::new()),
            recorded: Mutex::new(Vec::new()),
            forked: AtomicU64::new(0),
        }
    }

    pub(crate) fn bean_state(&self, component: ComponentId) -> LifecycleState {
        self.beans
            .lock()
            .get(component.index())
            .copied()
            .unwrap_or_default()
    }

    fn set_bean(&self, component: ComponentId, state: LifecycleState) {
        if let Some(slot) = self.beans.lock().get_mut(component.index()) {
            *slot = state;
        }
    }

    /// 启动完成：所有启动中的组件进入运行状态
    pub(crate) fn mark_running(&self) {
        for state in self.beans.lock().iter_mut() {
            if *state == LifecycleState::Starting {
                *state = LifecycleState::Running;
            }
        }
    }

    fn push_background(&self, tasks: impl IntoIterator<Item = ForkedTask>) {
        self.background.lock().extend(tasks);
    }

    fn take_background(&self) -> Vec<ForkedTask> {
        std::mem::take(&mut *self.background.lock())
    }

    /// 仍在后台运行的任务数
    pub(crate) fn background_len(&self) -> usize {
        self.background.lock().len()
    }

    fn record(&self, failure: LifecycleError) {
        self.recorded.lock().push(failure);
    }

    /// 已记录但未中止迁移的失败
    pub(crate) fn recorded_failures(&self) -> Vec<String> {
        self.recorded.lock().iter().map(|e| e.to_string()).collect()
    }

    pub(crate) fn take_recorded_failures(&self) -> Vec<LifecycleError> {
        std::mem::take(&mut *self.recorded.lock())
    }

    pub(crate) fn forked_tasks(&self) -> u64 {
        self.forked.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// 单次迁移的调度器
pub(crate) struct Scheduler<'a> {
    state: &'a ExecutionState,
    template: Arc<ApplicationTemplate>,
    transition: Transition,
    abort: Option<CancellationToken>,
    group: TaskGroup,
    pass: usize,
    failures: Vec<LifecycleError>,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(
        state: &'a ExecutionState,
        transition: Transition,
        abort: Option<CancellationToken>,
    ) -> Self {
        Self {
            template: state.ctx.template.clone(),
            state,
            transition,
            abort,
            group: TaskGroup::new(),
            pass: 0,
            failures: Vec::new(),
        }
    }

    /// 初始化：构造、注入、执行初始化操作
    pub(crate) async fn initialize(&mut self) -> LifecycleResult<()> {
        let order = self.template.lifecycle_order().to_vec();

        for &component in &order {
            self.join_before_dependants(component, Direction::Forward)
                .await?;
            self.state.set_bean(component, LifecycleState::Initializing);
            if let Err(failure) = self.state.ctx.construct(component).await {
                return self.failed(component, failure, true);
            }
            self.run_phase(component, LifecyclePhase::InitializePre)
                .await?;
            self.state.set_bean(component, LifecycleState::Initialized);
        }
        self.finish_pass().await?;

        for &component in order.iter().rev() {
            self.join_before_dependants(component, Direction::Reverse)
                .await?;
            self.run_phase(component, LifecyclePhase::InitializePost)
                .await?;
        }
        self.finish_pass().await?;

        self.close().await
    }

    /// 启动：收到停止请求时在组件边界处中止
    pub(crate) async fn start(&mut self) -> LifecycleResult<()> {
        let order = self.template.lifecycle_order().to_vec();

        for &component in &order {
            self.check_abort()?;
            self.join_before_dependants(component, Direction::Forward)
                .await?;
            self.state.set_bean(component, LifecycleState::Starting);
            self.run_phase(component, LifecyclePhase::StartPre).await?;
        }
        self.finish_pass().await?;

        for &component in order.iter().rev() {
            self.check_abort()?;
            self.join_before_dependants(component, Direction::Reverse)
                .await?;
            self.run_phase(component, LifecyclePhase::StartPost).await?;
        }
        self.finish_pass().await?;

        self.close().await
    }

    /// 停止所有存活组件，返回收集到的错误
    pub(crate) async fn stop(mut self) -> Vec<LifecycleError> {
        let live: Vec<ComponentId> = self
            .template
            .lifecycle_order()
            .iter()
            .copied()
            .filter(|component| self.state.bean_state(*component).is_live())
            .collect();

        let background = self.state.take_background();
        // 只中断启动阶段留下的任务
        for task in &background {
            let interrupt = task.info.phase.transition() == Transition::Start
                && self
                    .template
                    .component(task.info.component)
                    .is_some_and(|c| c.interrupt_on_stopping);
            if interrupt {
                debug!("中断任务: {}.{}", task.info.bean, task.info.operation);
                task.interrupt();
            }
        }

        for &component in &live {
            let joined = self
                .join_before_dependants(component, Direction::Forward)
                .await;
            self.collect(joined);
            self.state.set_bean(component, LifecycleState::Stopping);
            let result = self.run_phase(component, LifecyclePhase::StopPre).await;
            self.collect(result);
        }
        let finished = self.finish_pass().await;
        self.collect(finished);

        for &component in live.iter().rev() {
            let joined = self
                .join_before_dependants(component, Direction::Reverse)
                .await;
            self.collect(joined);
            let result = self.run_phase(component, LifecyclePhase::StopPost).await;
            self.collect(result);
        }
        let finished = self.finish_pass().await;
        self.collect(finished);

        let closed = self.close().await;
        self.collect(closed);
        let joined = self.join_all(background).await;
        self.collect(joined);

        for &component in &live {
            if self.state.bean_state(component) == LifecycleState::Stopping {
                self.state.set_bean(component, LifecycleState::Terminated);
            }
        }

        info!("停止完成: {} 个组件, {} 个错误", live.len(), self.failures.len());
        self.failures
    }

    /// 把未等待的任务移交给后台，由停止过程处理
    pub(crate) fn detach_remaining(&mut self) {
        let remaining = self.group.take_all();
        if !remaining.is_empty() {
            debug!("{} 个任务移交后台", remaining.len());
            self.state.push_background(remaining);
        }
    }

    fn collect(&mut self, result: LifecycleResult<()>) {
        if let Err(failure) = result {
            self.failures.push(failure);
        }
    }

    fn aborted(&self) -> LifecycleError {
        LifecycleError::TransitionAborted {
            transition: self.transition,
            reason: "收到停止请求".to_string(),
        }
    }

    fn check_abort(&self) -> LifecycleResult<()> {
        match &self.abort {
            Some(token) if token.is_cancelled() => Err(self.aborted()),
            _ => Ok(()),
        }
    }

    async fn run_phase(&mut self, component: ComponentId, phase: LifecyclePhase) -> LifecycleResult<()> {
        let template = self.template.clone();
        for plan in template.operations(component, phase) {
            self.run(plan).await?;
        }
        Ok(())
    }

    async fn run(&mut self, plan: &InvocationPlan) -> LifecycleResult<()> {
        self.check_abort()?;

        let ctx = self.state.ctx.clone();
        let prepared = match ctx.bean(plan.component) {
            Ok(bean) => plan
                .resolve_arguments(&ctx)
                .await
                .map(|values| (bean, values)),
            Err(failure) => Err(failure),
        };
        let (bean, values) = match prepared {
            Ok(prepared) => prepared,
            Err(failure) => return self.failed(plan.component, failure, true),
        };
        ctx.record_operation();

        match plan.fork {
            None => {
                debug!("执行 {:?}: {}.{}", plan.phase, plan.bean, plan.name);
                match plan.call(bean, values, CancellationToken::new()).await {
                    Ok(_) => Ok(()),
                    Err(cause) => {
                        self.failed(plan.component, plan.failure(cause), plan.stop_on_failure)
                    }
                }
            }
            Some(options) => {
                let token = CancellationToken::new();
                let future = plan.call_forked(bean, values, token.clone());
                let info = TaskInfo {
                    component: plan.component,
                    bean: plan.bean.clone(),
                    operation: plan.name.clone(),
                    phase: plan.phase,
                    join: options.join,
                    keep_running: options.keep_running,
                    stop_on_failure: plan.stop_on_failure,
                    pass: self.pass,
                };
                debug!(
                    "fork {:?}: {}.{} (join={:?}, keep_running={})",
                    plan.phase, plan.bean, plan.name, options.join, options.keep_running
                );
                let task = ForkedTask::spawn(info, future, token);
                self.state.forked.fetch_add(1, Ordering::Relaxed);
                if options.keep_running {
                    self.state.push_background([task]);
                } else {
                    self.group.push(task);
                }
                Ok(())
            }
        }
    }

    /// 处理失败：停止时收集；否则致命失败立即返回，其余记录后继续
    fn failed(
        &mut self,
        component: ComponentId,
        failure: LifecycleError,
        stop_on_failure: bool,
    ) -> LifecycleResult<()> {
        if self.transition == Transition::Stop {
            error!("停止过程中出错: {}", failure);
            self.state.set_bean(component, LifecycleState::Failed);
            self.failures.push(failure);
            return Ok(());
        }

        let fatal = stop_on_failure || failure.phase().map_or(true, |p| p.is_construction());
        if fatal {
            error!("{} 失败: {}", self.transition, failure);
            self.state.set_bean(component, LifecycleState::Failed);
            Err(failure)
        } else {
            warn!("{} 中的失败已记录, 继续执行: {}", self.transition, failure);
            self.state.record(failure);
            Ok(())
        }
    }

    async fn join_before_dependants(
        &mut self,
        component: ComponentId,
        direction: Direction,
    ) -> LifecycleResult<()> {
        let graph = self.template.graph();
        let pass = self.pass;
        let tasks = self.group.take(|info| {
            info.join == JoinPolicy::BeforeDependants
                && info.pass == pass
                && info.component != component
                && match direction {
                    Direction::Forward => graph.depends_on(component, info.component),
                    Direction::Reverse => graph.depends_on(info.component, component),
                }
        });
        self.join_all(tasks).await
    }

    async fn finish_pass(&mut self) -> LifecycleResult<()> {
        let pass = self.pass;
        let tasks = self
            .group
            .take(|info| info.join == JoinPolicy::AfterDependants && info.pass == pass);
        self.pass += 1;
        self.join_all(tasks).await
    }

    /// 关闭任务组：等待其余全部任务
    async fn close(&mut self) -> LifecycleResult<()> {
        let tasks = self.group.take_all();
        if !tasks.is_empty() {
            debug!("{}: 等待 {} 个任务", self.transition, tasks.len());
        }
        self.join_all(tasks).await
    }

    fn join_options(&self) -> JoinOptions {
        let config = self.template.config();
        JoinOptions {
            warn_after: Some(config.join_warning_threshold()),
            timeout: match self.transition {
                Transition::Stop => config.stop_join_timeout(),
                _ => None,
            },
            abort: self.abort.clone(),
        }
    }

    async fn join_all(&mut self, tasks: Vec<ForkedTask>) -> LifecycleResult<()> {
        let mut pending = tasks.into_iter();
        while let Some(task) = pending.next() {
            match task.join(self.join_options()).await {
                JoinOutcome::Finished {
                    info,
                    interrupted,
                    result: Ok(()),
                } => {
                    debug!(
                        "任务完成: {}.{} (interrupted={})",
                        info.bean, info.operation, interrupted
                    );
                }
                JoinOutcome::Finished {
                    info,
                    interrupted,
                    result: Err(cause),
                } => {
                    let failure = if interrupted {
                        LifecycleError::InterruptedWhileStopping {
                            bean: info.bean.clone(),
                            operation: info.operation.clone(),
                            message: cause.to_string(),
                        }
                    } else {
                        LifecycleError::operation_failure(
                            info.phase,
                            info.bean.clone(),
                            info.operation.clone(),
                            cause,
                        )
                    };
                    if let Err(failure) = self.failed(info.component, failure, info.stop_on_failure) {
                        self.group.extend(pending);
                        return Err(failure);
                    }
                }
                JoinOutcome::Aborted(task) => {
                    self.group.push(task);
                    self.group.extend(pending);
                    return Err(self.aborted());
                }
                JoinOutcome::TimedOut(task) => {
                    warn!(
                        "等待任务 {}.{} 超时, 任务已分离",
                        task.info.bean, task.info.operation
                    );
                }
            }
        }
        Ok(())
    }
}

//! fork 任务组
//!
//! 每次生命周期迁移拥有一个 [`TaskGroup`]。任务只能被协作式中断，从不被强制取消；
//! 等待超时的任务会被分离。

use infrastructure_common::{ComponentId, JoinPolicy, LifecyclePhase, OperationFuture, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 任务元数据
#[derive(Debug, Clone)]
pub(crate) struct TaskInfo {
    pub(crate) component: ComponentId,
    pub(crate) bean: String,
    pub(crate) operation: String,
    pub(crate) phase: LifecyclePhase,
    pub(crate) join: JoinPolicy,
    pub(crate) keep_running: bool,
    pub(crate) stop_on_failure: bool,
    /// 任务所属的遍历序号
    pub(crate) pass: usize,
}

/// 已 fork 的任务
#[derive(Debug)]
pub(crate) struct ForkedTask {
    pub(crate) info: TaskInfo,
    token: CancellationToken,
    handle: JoinHandle<anyhow::Result<Option<Value>>>,
    spawned_at: Instant,
}

/// 等待选项
#[derive(Debug, Clone, Default)]
pub(crate) struct JoinOptions {
    /// 超过该时长仍未完成时输出警告
    pub(crate) warn_after: Option<Duration>,
    /// 超过该时长后分离任务
    pub(crate) timeout: Option<Duration>,
    /// 等待期间该令牌被取消时放弃等待
    pub(crate) abort: Option<CancellationToken>,
}

/// 等待结果
#[derive(Debug)]
pub(crate) enum JoinOutcome {
    /// 任务结束
    Finished {
        info: TaskInfo,
        interrupted: bool,
        result: anyhow::Result<()>,
    },
    /// 放弃等待，任务原样返回
    Aborted(ForkedTask),
    /// 等待超时，任务原样返回
    TimedOut(ForkedTask),
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl ForkedTask {
    /// 在 tokio 运行时上启动任务
    pub(crate) fn spawn(info: TaskInfo, future: OperationFuture, token: CancellationToken) -> Self {
        Self {
            info,
            token,
            handle: tokio::spawn(future),
            spawned_at: Instant::now(),
        }
    }

    /// 请求协作式中断
    pub(crate) fn interrupt(&self) {
        self.token.cancel();
    }

    /// 是否已请求中断
    pub(crate) fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待任务结束
    pub(crate) async fn join(mut self, options: JoinOptions) -> JoinOutcome {
        let abort = options.abort.unwrap_or_default();
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut warn_at = options.warn_after.map(|after| Instant::now() + after);

        loop {
            let next = match (warn_at, deadline) {
                (Some(w), Some(d)) => Some(w.min(d)),
                (w, d) => w.or(d),
            };

            tokio::select! {
                result = &mut self.handle => {
                    let result = match result {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(cause)) => Err(cause),
                        Err(join_error) => Err(anyhow::anyhow!("任务异常终止: {}", join_error)),
                    };
                    return JoinOutcome::Finished {
                        interrupted: self.token.is_cancelled(),
                        info: self.info,
                        result,
                    };
                }
                _ = abort.cancelled() => return JoinOutcome::Aborted(self),
                _ = wait_until(next) => {
                    let now = Instant::now();
                    if warn_at.is_some_and(|at| now >= at) {
                        warn!(
                            "等待任务 {}.{} 已超过 {:?}",
                            self.info.bean,
                            self.info.operation,
                            now.duration_since(self.spawned_at)
                        );
                        warn_at = None;
                    }
                    if deadline.is_some_and(|at| now >= at) {
                        return JoinOutcome::TimedOut(self);
                    }
                }
            }
        }
    }
}

/// 一次迁移的任务组
#[derive(Debug, Default)]
pub(crate) struct TaskGroup {
    tasks: Vec<ForkedTask>,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: ForkedTask) {
        self.tasks.push(task);
    }

    pub(crate) fn extend(&mut self, tasks: impl IntoIterator<Item = ForkedTask>) {
        self.tasks.extend(tasks);
    }

    /// 取出满足条件的任务，保持 fork 顺序
    pub(crate) fn take(&mut self, predicate: impl Fn(&TaskInfo) -> bool) -> Vec<ForkedTask> {
        let (taken, kept) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| predicate(&task.info));
        self.tasks = kept;
        taken
    }

    /// 取出全部任务
    pub(crate) fn take_all(&mut self) -> Vec<ForkedTask> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(component: usize, join: JoinPolicy) -> TaskInfo {
        TaskInfo {
            component: ComponentId(component),
            bean: format!("bean{}", component),
            operation: "run".to_string(),
            phase: LifecyclePhase::StartPre,
            join,
            keep_running: false,
            stop_on_failure: true,
            pass: 0,
        }
    }

    #[tokio::test]
    async fn test_join_reports_failure() {
        let task = ForkedTask::spawn(
            info(0, JoinPolicy::BeforeReady),
            Box::pin(async { Err(anyhow::anyhow!("boom")) }),
            CancellationToken::new(),
        );

        match task.join(JoinOptions::default()).await {
            JoinOutcome::Finished {
                result, interrupted, ..
            } => {
                assert!(!interrupted);
                assert_eq!(result.unwrap_err().to_string(), "boom");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interrupted_task_observes_token() {
        let token = CancellationToken::new();
        let observed = token.clone();
        let task = ForkedTask::spawn(
            info(0, JoinPolicy::BeforeReady),
            Box::pin(async move {
                observed.cancelled().await;
                Ok(None)
            }),
            token,
        );

        task.interrupt();
        assert!(task.is_interrupted());
        match task.join(JoinOptions::default()).await {
            JoinOutcome::Finished {
                result, interrupted, ..
            } => {
                assert!(interrupted);
                assert!(result.is_ok());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abort_and_timeout_return_task() {
        let abort = CancellationToken::new();
        abort.cancel();
        let task = ForkedTask::spawn(
            info(0, JoinPolicy::BeforeReady),
            Box::pin(std::future::pending()),
            CancellationToken::new(),
        );
        let task = match task
            .join(JoinOptions {
                abort: Some(abort),
                ..JoinOptions::default()
            })
            .await
        {
            JoinOutcome::Aborted(task) => task,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let outcome = task
            .join(JoinOptions {
                warn_after: Some(Duration::from_millis(1)),
                timeout: Some(Duration::from_millis(20)),
                abort: None,
            })
            .await;
        assert!(matches!(outcome, JoinOutcome::TimedOut(_)));
    }

    #[test]
    fn test_take_preserves_order() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let mut group = TaskGroup::new();
        for (component, join) in [
            (0, JoinPolicy::BeforeDependants),
            (1, JoinPolicy::AfterDependants),
            (2, JoinPolicy::BeforeDependants),
        ] {
            group.push(ForkedTask::spawn(
                info(component, join),
                Box::pin(async { Ok(None) }),
                CancellationToken::new(),
            ));
        }

        let taken = group.take(|info| info.join == JoinPolicy::BeforeDependants);
        let components: Vec<usize> = taken.iter().map(|t| t.info.component.index()).collect();
        assert_eq!(components, vec![0, 2]);
        assert_eq!(group.len(), 1);
        assert_eq!(group.take_all().len(), 1);
        assert!(group.is_empty());
    }
}

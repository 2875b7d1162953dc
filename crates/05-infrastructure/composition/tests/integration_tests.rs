//! 组合层集成测试

use async_trait::async_trait;
use di_abstractions::{Extension, Registrar, ServiceLocator};
use infrastructure_common::{
    BuildError, BuildResult, ComponentDescriptor, ComponentId, DependencyDescriptor,
    InfrastructureError, InvocationTarget, Key, LifecycleOperation, LifecycleState, MemberSite,
    ScopeDescriptor, ServiceInstance, Value,
};
use infrastructure_composition::{Application, ContainerSettings};
use std::io::Write;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct Greeter {
    greeting: String,
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn snapshot(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn greeter_scope(log: &Log) -> ScopeDescriptor {
    let factory = InvocationTarget::from_fn("Greeter::new", 1, |args| {
        let greeting = args.get::<String>(0)?;
        Ok(Some(Arc::new(Greeter {
            greeting: greeting.as_str().to_string(),
        }) as Value))
    });
    let start_log = log.clone();
    let start = InvocationTarget::from_fn("Greeter::start", 0, move |args| {
        let greeter = args.bean::<Greeter>()?;
        push(&start_log, format!("start {}", greeter.greeting));
        Ok(None)
    });

    ScopeDescriptor::new("greetings")
        .with_instance(ServiceInstance::new(
            Key::named("greeting"),
            "hello".to_string(),
            "greeting",
        ))
        .with_component(
            ComponentDescriptor::new("greeter", factory)
                .provides(Key::of::<Greeter>())
                .with_dependency(DependencyDescriptor::required(Key::named("greeting")))
                .with_operation(LifecycleOperation::start(start)),
        )
}

fn quiet_settings(name: &str) -> ContainerSettings {
    ContainerSettings {
        application_name: name.to_string(),
        ..ContainerSettings::default()
    }
}

/// 把 `scheduled` 注解的方法登记为启动操作
struct ScheduledExtension {
    log: Log,
}

#[async_trait]
impl Extension for ScheduledExtension {
    fn name(&self) -> &str {
        "scheduled"
    }

    fn handles(&self, annotation: &str) -> bool {
        annotation == "scheduled"
    }

    fn on_method(
        &self,
        registrar: &mut dyn Registrar,
        component: ComponentId,
        member: &MemberSite,
    ) -> BuildResult<()> {
        if let Some(target) = &member.target {
            let mut operation = LifecycleOperation::start(target.clone());
            for dependency in &member.dependencies {
                operation = operation.with_dependency(dependency.clone());
            }
            registrar.register_lifecycle_op(component, operation)?;
        }
        let owner = registrar.component_name(component).unwrap_or("?").to_string();
        push(&self.log, format!("registered {}::{}", owner, member.name));
        Ok(())
    }

    async fn on_process_start(&self, services: &dyn ServiceLocator) -> anyhow::Result<()> {
        let greeter = services.service(&Key::of::<Greeter>()).await?;
        push(&self.log, format!("process start, greeter present: {}", greeter.is_some()));
        Ok(())
    }

    async fn on_process_stop(&self, _services: &dyn ServiceLocator) -> anyhow::Result<()> {
        push(&self.log, "process stop");
        Ok(())
    }
}

#[tokio::test]
async fn test_builder_with_descriptor_runs_lifecycle() {
    let log = new_log();
    let application = Application::builder()
        .with_settings(quiet_settings("greetings-app"))
        .add_descriptor(greeter_scope(&log))
        .build()
        .await
        .unwrap();

    assert_eq!(application.status(), LifecycleState::Uninitialized);
    application.start().await.unwrap();
    assert_eq!(application.status(), LifecycleState::Running);
    assert_eq!(snapshot(&log), vec!["start hello"]);

    let greeter = application.get::<Greeter>().await.unwrap().unwrap();
    assert_eq!(greeter.greeting, "hello");
    let greeting = application.service(&Key::named("greeting")).await.unwrap();
    assert!(greeting.is_some());

    application.stop().await.unwrap();
    assert_eq!(application.status(), LifecycleState::Terminated);
}

#[tokio::test]
async fn test_extension_registers_annotated_members() {
    let log = new_log();
    let tick_log = log.clone();
    let tick = InvocationTarget::from_fn("Greeter::tick", 1, move |args| {
        let greeter = args.bean::<Greeter>()?;
        let greeting = args.get::<String>(0)?;
        push(&tick_log, format!("tick {} {}", greeter.greeting, greeting));
        Ok(None)
    });

    let mut scope = greeter_scope(&log);
    scope.components[0] = scope.components[0].clone().with_member(
        MemberSite::method("tick")
            .with_annotation("scheduled")
            .with_dependency(DependencyDescriptor::required(Key::named("greeting")))
            .with_target(tick),
    );

    let application = Application::builder()
        .with_settings(quiet_settings("scheduled-app"))
        .add_descriptor(scope)
        .add_extension(ScheduledExtension { log: log.clone() })
        .build()
        .await
        .unwrap();
    assert_eq!(snapshot(&log), vec!["registered greeter::tick"]);

    application.start().await.unwrap();
    application.stop().await.unwrap();

    assert_eq!(
        snapshot(&log),
        vec![
            "registered greeter::tick",
            "start hello",
            "tick hello hello",
            "process start, greeter present: true",
            "process stop",
        ]
    );
}

#[tokio::test]
async fn test_unhandled_annotation_is_ignored() {
    let log = new_log();
    let mut scope = greeter_scope(&log);
    scope.components[0] = scope.components[0]
        .clone()
        .with_member(MemberSite::field("cache").with_annotation("unknown"));

    let application = Application::builder()
        .with_settings(quiet_settings("plain-app"))
        .add_descriptor(scope)
        .build()
        .await
        .unwrap();
    application.start().await.unwrap();
    application.stop().await.unwrap();
    assert_eq!(snapshot(&log), vec!["start hello"]);
}

#[tokio::test]
async fn test_duplicate_provider_across_sources_fails_build() {
    let log = new_log();
    let result = Application::builder()
        .with_settings(quiet_settings("dup-app"))
        .add_descriptor(greeter_scope(&log))
        .add_descriptor(greeter_scope(&log))
        .build()
        .await;

    match result {
        Err(InfrastructureError::BuildError {
            source: BuildError::DuplicateProvider { .. },
        }) => {}
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("duplicate providers must be rejected"),
    }
}

#[tokio::test]
async fn test_settings_file_names_application() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(
        b"application_name = \"from-file\"\n[lifecycle]\nstop_join_timeout_ms = 100\n",
    )
    .unwrap();

    let application = Application::builder()
        .without_environment()
        .with_settings_file(file.path())
        .add_descriptor(ScopeDescriptor::new("empty"))
        .build()
        .await
        .unwrap();

    assert_eq!(application.settings().application_name, "from-file");
    assert_eq!(application.template().config().stop_join_timeout_ms, Some(100));
}

#[tokio::test]
async fn test_invalid_settings_fail_build() {
    let mut settings = quiet_settings("broken");
    settings.lifecycle.join_warning_threshold_ms = 0;

    let result = Application::builder().with_settings(settings).build().await;
    assert!(matches!(result, Err(InfrastructureError::ConfigError { .. })));
}

#[tokio::test]
async fn test_run_until_stops_after_shutdown_signal() {
    let log = new_log();
    let application = Application::builder()
        .with_settings(quiet_settings("run-app"))
        .add_descriptor(greeter_scope(&log))
        .build()
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tx.send(()).unwrap();
    application
        .run_until(async {
            rx.await.ok();
        })
        .await
        .unwrap();

    assert_eq!(application.status(), LifecycleState::Terminated);
    assert_eq!(snapshot(&log), vec!["start hello"]);
}

#[tokio::test]
async fn test_run_until_returns_start_failure_without_waiting() {
    let log = new_log();
    let listen = InvocationTarget::from_fn("Listener::listen", 0, |_| {
        Err(anyhow::anyhow!("address in use"))
    });
    let scope = greeter_scope(&log).with_component(
        ComponentDescriptor::new(
            "listener",
            InvocationTarget::from_fn("Listener::new", 1, |_| Ok(Some(Arc::new(()) as Value))),
        )
        .with_dependency(DependencyDescriptor::required(Key::of::<Greeter>()))
        .with_operation(LifecycleOperation::start(listen)),
    );
    let application = Application::builder()
        .with_settings(quiet_settings("failing-app"))
        .add_descriptor(scope)
        .build()
        .await
        .unwrap();

    let waited = Arc::new(Mutex::new(false));
    let flag = waited.clone();
    let result = application
        .run_until(async move {
            *flag.lock().unwrap() = true;
        })
        .await;

    assert!(matches!(result, Err(InfrastructureError::LifecycleError { .. })));
    assert!(!*waited.lock().unwrap());
    assert_eq!(application.status(), LifecycleState::Failed);
    assert_eq!(snapshot(&log), vec!["start hello"]);

    // 失败后的停止为空操作
    application.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_report_template_and_lifetime() {
    let log = new_log();
    let application = Application::builder()
        .with_settings(quiet_settings("metrics-app"))
        .add_descriptor(greeter_scope(&log))
        .build()
        .await
        .unwrap();

    assert!(application.metrics().uptime().is_none());
    application.start().await.unwrap();

    let metrics = application.metrics();
    assert_eq!(metrics.components, 1);
    assert_eq!(metrics.scopes, 1);
    assert_eq!(metrics.lifetime.state, LifecycleState::Running);
    assert!(metrics.uptime().is_some());

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["components"], 1);
    assert_eq!(json["lifetime"]["application"], "metrics-app");

    application.stop().await.unwrap();
}

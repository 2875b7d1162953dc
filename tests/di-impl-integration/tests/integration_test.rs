//! di-impl 的随机化集成测试
//!
//! 以固定种子生成随机依赖图，检查构造顺序、参数可见性以及前后阶段的执行顺序。

use di_impl::{ApplicationTemplate, BuildContext};
use infrastructure_common::{
    BuildError, ComponentDescriptor, DependencyDescriptor, ForkOptions, InvocationTarget,
    JoinPolicy, Key, LifecycleConfig, LifecycleOperation, LifecycleState, ScopeDescriptor,
    ServiceInstance, Value,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

const SEEDS: u64 = 24;

/// 组件实例，记录自身编号
#[derive(Debug)]
struct Node {
    id: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Event {
    New(usize),
    Begin(usize),
    Done(usize),
    Stop(usize),
    Started,
}

#[derive(Clone, Default)]
struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn position(&self, event: Event) -> usize {
        let events = self.events.lock();
        events
            .iter()
            .position(|e| *e == event)
            .unwrap_or_else(|| panic!("事件 {:?} 不存在: {:?}", event, events))
    }
}

/// 随机生成的组件
#[derive(Debug, Clone)]
struct Blueprint {
    id: usize,
    dependencies: Vec<usize>,
    fork: Option<(JoinPolicy, u64)>,
}

fn name(id: usize) -> String {
    format!("c{}", id)
}

fn key(id: usize) -> Key {
    Key::named(&name(id))
}

/// 组件 i 只依赖编号更小的组件，保证无环
fn random_graph(rng: &mut StdRng) -> Vec<Blueprint> {
    let count = rng.gen_range(4..12);
    (0..count)
        .map(|id| {
            let mut dependencies: Vec<usize> = (0..id).filter(|_| rng.gen_bool(0.3)).collect();
            dependencies.shuffle(rng);
            dependencies.truncate(3);
            let fork = if rng.gen_bool(0.5) {
                let join = *[
                    JoinPolicy::BeforeDependants,
                    JoinPolicy::AfterDependants,
                    JoinPolicy::BeforeReady,
                ]
                .choose(rng)
                .unwrap();
                Some((join, rng.gen_range(0..4)))
            } else {
                None
            };
            Blueprint {
                id,
                dependencies,
                fork,
            }
        })
        .collect()
}

fn check_node(value: Option<&Value>, expected: usize) -> anyhow::Result<()> {
    let node = value
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("参数缺失"))?
        .downcast::<Node>()
        .map_err(|_| anyhow::anyhow!("参数类型错误"))?;
    anyhow::ensure!(node.id == expected, "期望 c{}, 实际 c{}", expected, node.id);
    Ok(())
}

fn descriptor(blueprint: &Blueprint, journal: &Journal) -> ComponentDescriptor {
    let id = blueprint.id;

    let factory_journal = journal.clone();
    let expected = blueprint.dependencies.clone();
    let factory = InvocationTarget::from_fn(format!("{}::new", name(id)), expected.len(), move |args| {
        for (index, dependency) in expected.iter().enumerate() {
            check_node(args.raw(index), *dependency)?;
        }
        factory_journal.record(Event::New(id));
        Ok(Some(Arc::new(Node { id }) as Value))
    });

    let mut component = ComponentDescriptor::new(name(id), factory).provides(key(id));
    for dependency in &blueprint.dependencies {
        component = component.with_dependency(DependencyDescriptor::required(key(*dependency)));
    }

    // 启动操作读取第一个依赖，检查写后读
    let reads = blueprint.dependencies.first().copied();
    let start = match blueprint.fork {
        Some((join, delay)) => {
            let journal = journal.clone();
            let target = InvocationTarget::new(
                format!("{}::start", name(id)),
                usize::from(reads.is_some()),
                move |args| {
                    let journal = journal.clone();
                    async move {
                        journal.record(Event::Begin(id));
                        if let Some(dependency) = reads {
                            check_node(args.raw(0), dependency)?;
                        }
                        anyhow::ensure!(args.bean::<Node>()?.id == id, "组件实例错误");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        journal.record(Event::Done(id));
                        Ok(None)
                    }
                },
            );
            LifecycleOperation::start(target).forked(ForkOptions::join(join))
        }
        None => {
            let journal = journal.clone();
            let target = InvocationTarget::from_fn(
                format!("{}::start", name(id)),
                usize::from(reads.is_some()),
                move |args| {
                    journal.record(Event::Begin(id));
                    if let Some(dependency) = reads {
                        check_node(args.raw(0), dependency)?;
                    }
                    journal.record(Event::Done(id));
                    Ok(None)
                },
            );
            LifecycleOperation::start(target)
        }
    };
    let start = match reads {
        Some(dependency) => start.with_dependency(DependencyDescriptor::required(key(dependency))),
        None => start,
    };

    let stop_journal = journal.clone();
    let stop = InvocationTarget::from_fn(format!("{}::stop", name(id)), 0, move |_| {
        stop_journal.record(Event::Stop(id));
        Ok(None)
    });

    component
        .with_operation(start)
        .with_operation(LifecycleOperation::stop(stop))
}

fn build(blueprints: &[Blueprint], journal: &Journal, rng: &mut StdRng) -> Arc<ApplicationTemplate> {
    let mut order: Vec<&Blueprint> = blueprints.iter().collect();
    order.shuffle(rng);

    let scope = order
        .into_iter()
        .fold(ScopeDescriptor::new("fuzz"), |scope, blueprint| {
            scope.with_component(descriptor(blueprint, journal))
        });
    BuildContext::from_descriptor(&scope)
        .unwrap()
        .build(LifecycleConfig::default())
        .unwrap()
}

/// 所有依赖边 (依赖方, 被依赖方)，含传递闭包
fn closure(blueprints: &[Blueprint]) -> Vec<(usize, usize)> {
    let mut reach: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for blueprint in blueprints {
        let mut set = BTreeSet::new();
        for dependency in &blueprint.dependencies {
            set.insert(*dependency);
            set.extend(reach[dependency].iter().copied());
        }
        reach.insert(blueprint.id, set);
    }
    reach
        .into_iter()
        .flat_map(|(from, set)| set.into_iter().map(move |to| (from, to)))
        .collect()
}

#[tokio::test]
async fn test_random_graphs_respect_dependency_order() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let blueprints = random_graph(&mut rng);
        let journal = Journal::default();
        let template = build(&blueprints, &journal, &mut rng);

        let lifetime = template.instantiate();
        lifetime
            .start()
            .await
            .unwrap_or_else(|e| panic!("seed {}: 启动失败: {}", seed, e));
        journal.record(Event::Started);
        assert_eq!(lifetime.state(), LifecycleState::Running, "seed {}", seed);
        lifetime.stop().await.unwrap();
        assert_eq!(lifetime.state(), LifecycleState::Terminated, "seed {}", seed);

        let started = journal.position(Event::Started);
        for blueprint in &blueprints {
            // 所有 fork 任务都在启动返回前完成
            assert!(journal.position(Event::Done(blueprint.id)) < started, "seed {}", seed);
            assert!(journal.position(Event::Stop(blueprint.id)) > started, "seed {}", seed);
        }

        for (dependant, dependency) in closure(&blueprints) {
            let context = format!("seed {}: c{} 依赖 c{}", seed, dependant, dependency);
            assert!(
                journal.position(Event::New(dependency)) < journal.position(Event::New(dependant)),
                "{}",
                context
            );
            assert!(
                journal.position(Event::Stop(dependant)) < journal.position(Event::Stop(dependency)),
                "{}",
                context
            );
            let joined_early = blueprints[dependency]
                .fork
                .map_or(true, |(join, _)| join == JoinPolicy::BeforeDependants);
            if joined_early {
                assert!(
                    journal.position(Event::Done(dependency)) < journal.position(Event::Begin(dependant)),
                    "{}",
                    context
                );
            }
        }
    }
}

#[test]
fn test_lifecycle_order_is_topological() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let blueprints = random_graph(&mut rng);
        let template = build(&blueprints, &Journal::default(), &mut rng);

        let order = template.order_names();
        assert_eq!(order.len(), blueprints.len(), "seed {}", seed);
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        for blueprint in &blueprints {
            for dependency in &blueprint.dependencies {
                assert!(
                    position[name(*dependency).as_str()] < position[name(blueprint.id).as_str()],
                    "seed {}: {:?}",
                    seed,
                    order
                );
            }
        }
    }
}

#[test]
fn test_random_back_edge_reports_cycle() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let length = rng.gen_range(1..6);
        let factory = InvocationTarget::from_fn("new", 1, |_| Ok(None));

        // c0 <- c1 <- ... <- c{length}，再让 c0 依赖 c{length}
        let mut components: Vec<ComponentDescriptor> = (0..=length)
            .map(|id| {
                let upstream = if id == 0 { length } else { id - 1 };
                ComponentDescriptor::new(name(id), factory.clone())
                    .provides(key(id))
                    .with_dependency(DependencyDescriptor::required(key(upstream)))
            })
            .collect();
        components.shuffle(&mut rng);
        let scope = components
            .into_iter()
            .fold(ScopeDescriptor::new("cycle"), ScopeDescriptor::with_component);

        let error = BuildContext::from_descriptor(&scope)
            .unwrap()
            .build(LifecycleConfig::default())
            .unwrap_err();
        match error {
            BuildError::DependencyCycle { path } => {
                let members: BTreeSet<String> = path.into_iter().collect();
                let expected: BTreeSet<String> = (0..=length).map(name).collect();
                assert_eq!(members, expected, "seed {}", seed);
            }
            other => panic!("seed {}: 期望循环依赖, 实际 {}", seed, other),
        }
    }
}

#[test]
fn test_duplicate_provider_report_ignores_registration_order() {
    for seed in 0..SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let blueprints = random_graph(&mut rng);
        let duplicated = rng.gen_range(0..blueprints.len());
        let journal = Journal::default();

        let mut reports = Vec::new();
        for _ in 0..2 {
            let mut scope = ScopeDescriptor::new("dup")
                .with_instance(ServiceInstance::new(key(duplicated), Node { id: duplicated }, "instance"));
            let mut order: Vec<&Blueprint> = blueprints.iter().collect();
            order.shuffle(&mut rng);
            for blueprint in order {
                scope = scope.with_component(descriptor(blueprint, &journal));
            }

            let error = BuildContext::from_descriptor(&scope)
                .unwrap()
                .build(LifecycleConfig::default())
                .unwrap_err();
            reports.push(error);
        }

        assert!(
            matches!(&reports[0], BuildError::DuplicateProvider { key: k, .. } if *k == key(duplicated)),
            "seed {}: {}",
            seed,
            reports[0]
        );
        assert_eq!(reports[0], reports[1], "seed {}", seed);
    }
}

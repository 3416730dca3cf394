//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "tests"
//! ea_type: "source"
//! ea_scope: "test"
//! ea_description: "End-to-end reconcile cycles against an in-process fake device."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use edge_agent_common::config::AgentConfig;
use edge_agent_common::time::{Clock, ManualClock};
use edge_agent_core::{
    Agent, CancellationToken, Command, CommandError, CommandExecutor, CommandKind,
    EnvironmentError, Environment, FileRestartStateStore, HealthRestartPlanner, ImagePullPolicy,
    Module, ModuleConfig, ModuleIdentities, ModuleIdentity, ModuleSet, Plan, PlanRunner,
    ReportError, ReportingExecutor, RestartPolicyManager, RestartStateStore, RuntimeInfo,
    RuntimeObservation, RuntimeStatus, StatePatch, StateSink,
};
use edge_agent_metrics::{new_registry, render, ReconcileMetrics};
use parking_lot::Mutex;
use tempfile::tempdir;

/// In-process device: applies commands to its module table and logs them.
#[derive(Debug)]
struct FakeDevice {
    modules: Mutex<BTreeMap<String, Module>>,
    log: Mutex<Vec<(CommandKind, String)>>,
    clock: Arc<ManualClock>,
    fail_start: Option<String>,
}

impl FakeDevice {
    fn new(clock: Arc<ManualClock>, modules: Vec<Module>) -> Self {
        Self {
            modules: Mutex::new(modules.into_iter().map(|m| (m.name.clone(), m)).collect()),
            log: Mutex::new(Vec::new()),
            clock,
            fail_start: None,
        }
    }

    fn log(&self) -> Vec<(CommandKind, String)> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Environment for FakeDevice {
    async fn get_modules(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<ModuleSet, EnvironmentError> {
        ModuleSet::new(self.modules.lock().values().cloned())
            .map_err(|err| EnvironmentError::Unavailable(err.to_string()))
    }
}

#[async_trait]
impl CommandExecutor for FakeDevice {
    async fn execute(
        &self,
        command: &Command,
        _cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let name = command.module_name().to_owned();
        self.log.lock().push((command.kind(), name.clone()));
        let now = self.clock.now();
        let mut modules = self.modules.lock();
        match command {
            Command::Pull { .. } => {}
            Command::Create { module, .. } => {
                modules.insert(
                    name,
                    module
                        .clone()
                        .with_runtime(RuntimeObservation::new(RuntimeStatus::Stopped)),
                );
            }
            Command::Update { desired, .. } => {
                modules.insert(
                    name,
                    desired
                        .clone()
                        .with_runtime(RuntimeObservation::new(RuntimeStatus::Stopped)),
                );
            }
            Command::Remove { .. } => {
                modules.remove(&name);
            }
            Command::Start { .. } => {
                if self.fail_start.as_deref() == Some(name.as_str()) {
                    return Err(CommandError::failed(
                        command.describe(),
                        "image entrypoint missing",
                    ));
                }
                if let Some(module) = modules.get_mut(&name) {
                    let runtime = module
                        .runtime
                        .clone()
                        .unwrap_or_else(|| RuntimeObservation::new(RuntimeStatus::Stopped));
                    let mut runtime = runtime.started_at(now);
                    runtime.runtime_status = RuntimeStatus::Running;
                    module.runtime = Some(runtime);
                }
            }
            Command::Stop { .. } => {
                if let Some(runtime) = modules.get_mut(&name).and_then(|m| m.runtime.as_mut()) {
                    runtime.runtime_status = RuntimeStatus::Stopped;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CollectingSink {
    patches: Mutex<Vec<StatePatch>>,
}

#[async_trait]
impl StateSink for CollectingSink {
    async fn report(&self, patch: StatePatch) -> Result<(), ReportError> {
        self.patches.lock().push(patch);
        Ok(())
    }
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 6, 30, 0).unwrap()
}

fn planner(clock: Arc<ManualClock>) -> HealthRestartPlanner {
    let manager = RestartPolicyManager::new(5, Duration::from_secs(10), Duration::from_secs(600));
    HealthRestartPlanner::new(Arc::new(manager), clock, "edgeAgent")
}

fn identities(names: &[&str]) -> ModuleIdentities {
    names
        .iter()
        .map(|name| (name.to_string(), ModuleIdentity::new(*name, "sas")))
        .collect()
}

#[tokio::test]
async fn config_change_runs_update_then_start_in_order() {
    let clock = Arc::new(ManualClock::new(t0()));
    let current = Module::new("A", ModuleConfig::new("sensor:v1"))
        .with_runtime(RuntimeObservation::new(RuntimeStatus::Running).started_at(t0()));
    let device = Arc::new(FakeDevice::new(clock.clone(), vec![current.clone()]));
    let desired = ModuleSet::new(vec![Module::new("A", ModuleConfig::new("sensor:v2"))
        .with_image_pull_policy(ImagePullPolicy::Never)])
    .unwrap();

    let plan = planner(clock).plan(
        &desired,
        &ModuleSet::new(vec![current]).unwrap(),
        &RuntimeInfo::default(),
        &identities(&["A"]),
    );
    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan.chain("A").unwrap().kinds(),
        vec![CommandKind::Update, CommandKind::Start]
    );

    let runner = PlanRunner::new(device.clone());
    let outcome = runner.execute(1, &plan, &CancellationToken::new()).await;
    assert!(outcome.into_result().is_ok());
    assert_eq!(
        device.log(),
        vec![
            (CommandKind::Update, "A".to_owned()),
            (CommandKind::Start, "A".to_owned()),
        ]
    );
}

#[tokio::test]
async fn agent_converges_and_then_idles() {
    let clock = Arc::new(ManualClock::new(t0()));
    let device = Arc::new(FakeDevice::new(
        clock.clone(),
        vec![Module::new("legacy", ModuleConfig::new("legacy:1"))
            .with_runtime(RuntimeObservation::new(RuntimeStatus::Running).started_at(t0()))],
    ));
    let agent = Agent::new(
        device.clone(),
        planner(clock),
        PlanRunner::new(device.clone()),
        4,
    );
    let desired = ModuleSet::new(vec![
        Module::new("edgeHub", ModuleConfig::new("hub:1.4")),
        Module::new("sensor", ModuleConfig::new("sensor:2")),
    ])
    .unwrap();
    let ids = identities(&["edgeHub", "sensor"]);
    let cancel = CancellationToken::new();

    let first = agent
        .reconcile(&desired, &RuntimeInfo::default(), &ids, &cancel)
        .await
        .unwrap();
    assert!(first.is_success());
    assert_eq!(first.plan.len(), 3);
    let current = device.get_modules(&cancel).await.unwrap();
    assert!(!current.contains("legacy"));
    assert_eq!(
        current.get("sensor").and_then(Module::runtime_status),
        Some(RuntimeStatus::Running)
    );

    let second = agent
        .reconcile(&desired, &RuntimeInfo::default(), &ids, &cancel)
        .await
        .unwrap();
    assert!(second.plan.is_empty());
    assert_eq!(second.cycle, 2);
}

#[tokio::test]
async fn failed_chain_is_reported_and_others_complete() {
    let clock = Arc::new(ManualClock::new(t0()));
    let mut device = FakeDevice::new(clock.clone(), Vec::new());
    device.fail_start = Some("broken".into());
    let device = Arc::new(device);
    let agent = Agent::new(
        device.clone(),
        planner(clock),
        PlanRunner::new(device.clone()),
        2,
    );
    let desired = ModuleSet::new(vec![
        Module::new("broken", ModuleConfig::new("broken:1")),
        Module::new("fine", ModuleConfig::new("fine:1")),
    ])
    .unwrap();

    let report = agent
        .reconcile(
            &desired,
            &RuntimeInfo::default(),
            &identities(&["broken", "fine"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!report.is_success());
    assert!(report.outcome.chain("fine").unwrap().is_success());
    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("broken"));
}

#[tokio::test]
async fn shutdown_stops_all_but_agent() {
    let clock = Arc::new(ManualClock::new(t0()));
    let running = || RuntimeObservation::new(RuntimeStatus::Running).started_at(t0());
    let device = Arc::new(FakeDevice::new(
        clock.clone(),
        vec![
            Module::new("edgeAgent", ModuleConfig::new("agent:1")).with_runtime(running()),
            Module::new("sensor", ModuleConfig::new("sensor:1")).with_runtime(running()),
        ],
    ));
    let agent = Agent::new(device.clone(), planner(clock), PlanRunner::new(device.clone()), 1);
    let report = agent.shutdown(&CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(device.log(), vec![(CommandKind::Stop, "sensor".to_owned())]);
}

#[tokio::test]
async fn restart_history_survives_agent_restart() {
    let dir = tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.restart.state_path = Some(dir.path().join("restart-state.json"));

    let clock = Arc::new(ManualClock::new(t0()));
    let crashed = Module::new("sensor", ModuleConfig::new("sensor:1")).with_runtime(
        RuntimeObservation::new(RuntimeStatus::Backoff)
            .started_at(t0() - chrono::Duration::seconds(40))
            .exited_at(t0() - chrono::Duration::seconds(30), 2),
    );
    let desired =
        ModuleSet::new(vec![Module::new("sensor", ModuleConfig::new("sensor:1"))]).unwrap();

    {
        let device = Arc::new(FakeDevice::new(clock.clone(), vec![crashed.clone()]));
        let agent = Agent::from_config(&config, device.clone(), device.clone(), clock.clone(), None)
            .unwrap();
        let report = agent
            .reconcile(
                &desired,
                &RuntimeInfo::default(),
                &ModuleIdentities::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            report.plan.chain("sensor").unwrap().kinds(),
            vec![CommandKind::Stop, CommandKind::Start]
        );
    }

    let store = FileRestartStateStore::open(dir.path().join("restart-state.json")).unwrap();
    let state = store.get("sensor").unwrap().unwrap();
    assert_eq!(state.restart_count, 1);
    assert_eq!(state.last_restart_time, Some(t0()));

    // Persisted count 1 means a 20s backoff from the crash, which has not elapsed yet.
    let mut again = crashed;
    if let Some(runtime) = again.runtime.as_mut() {
        runtime.last_exit_time = Some(t0());
    }
    let device = Arc::new(FakeDevice::new(clock.clone(), vec![again]));
    let agent =
        Agent::from_config(&config, device.clone(), device.clone(), clock.clone(), None).unwrap();
    clock.advance(Duration::from_secs(15));
    let report = agent
        .reconcile(
            &desired,
            &RuntimeInfo::default(),
            &ModuleIdentities::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(report.plan.is_empty());
}

#[tokio::test]
async fn reporting_decorator_publishes_patches_during_reconcile() {
    let clock = Arc::new(ManualClock::new(t0()));
    let device = Arc::new(FakeDevice::new(clock.clone(), Vec::new()));
    let sink = Arc::new(CollectingSink::default());
    let executor = ReportingExecutor::new(device.clone(), device.clone(), sink.clone());
    let registry = new_registry();
    let metrics = ReconcileMetrics::new(registry.clone()).unwrap();

    let agent = Agent::from_config(
        &AgentConfig::default(),
        device.clone(),
        executor,
        clock,
        Some(metrics),
    )
    .unwrap();
    let desired =
        ModuleSet::new(vec![Module::new("sensor", ModuleConfig::new("sensor:1"))]).unwrap();
    let report = agent
        .reconcile(
            &desired,
            &RuntimeInfo::default(),
            &identities(&["sensor"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(report.is_success());
    agent.runner().executor().flush().await;

    let patches = sink.patches.lock();
    // Create and start change the device; pull does not.
    assert_eq!(patches.len(), 2);
    assert!(patches.iter().all(|patch| patch.updated.contains_key("sensor")));

    let text = render(&registry).unwrap();
    assert!(text.contains("edge_agent_commands_total"));
    assert!(text.contains("edge_agent_plans_total 1"));
}

#[tokio::test]
async fn empty_plan_executes_nothing() {
    let clock = Arc::new(ManualClock::new(t0()));
    let device = Arc::new(FakeDevice::new(clock, Vec::new()));
    let outcome = PlanRunner::new(device.clone())
        .execute(4, &Plan::empty(), &CancellationToken::new())
        .await;
    assert!(outcome.is_success());
    assert!(device.log().is_empty());
}

//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "tests"
//! ea_type: "source"
//! ea_scope: "test"
//! ea_description: "Planner behaviour across status, policy, and diff combinations."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use edge_agent_common::time::ManualClock;
use edge_agent_core::{
    ChainReason, CommandKind, DesiredStatus, HealthRestartPlanner, ImagePullPolicy, Module,
    ModuleConfig, ModuleIdentities, ModuleIdentity, ModuleSet, RestartPolicy,
    RestartPolicyManager, RuntimeInfo, RuntimeObservation, RuntimeStatus,
};
use serde_json::json;

const STATUSES: [RuntimeStatus; 5] = [
    RuntimeStatus::Running,
    RuntimeStatus::Backoff,
    RuntimeStatus::Unhealthy,
    RuntimeStatus::Stopped,
    RuntimeStatus::Failed,
];

const POLICIES: [RestartPolicy; 4] = [
    RestartPolicy::Always,
    RestartPolicy::OnUnhealthy,
    RestartPolicy::OnFailure,
    RestartPolicy::Never,
];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
}

fn planner_at(clock: Arc<ManualClock>) -> HealthRestartPlanner {
    let manager = RestartPolicyManager::new(5, Duration::from_secs(10), Duration::from_secs(600));
    HealthRestartPlanner::new(Arc::new(manager), clock, "edgeAgent")
}

fn planner() -> HealthRestartPlanner {
    planner_at(Arc::new(ManualClock::new(t0())))
}

fn identities(names: &[&str]) -> ModuleIdentities {
    names
        .iter()
        .map(|name| (name.to_string(), ModuleIdentity::new(*name, "sas-token")))
        .collect()
}

fn config(version: &str) -> ModuleConfig {
    ModuleConfig::new(format!("registry/sensor:{version}"))
        .with_create_options(json!({ "HostConfig": { "Privileged": false } }))
}

fn observed(status: RuntimeStatus) -> RuntimeObservation {
    RuntimeObservation::new(status)
        .started_at(t0() - chrono::Duration::seconds(120))
        .exited_at(t0() - chrono::Duration::seconds(5), 1)
}

fn set(modules: Vec<Module>) -> ModuleSet {
    ModuleSet::new(modules).unwrap()
}

#[test]
fn diff_of_identical_sets_is_empty() {
    let modules = set(vec![
        Module::new("a", config("1")),
        Module::new("b", config("2")).with_desired_status(DesiredStatus::Stopped),
    ]);
    assert!(modules.diff(&modules).is_empty());
}

#[test]
fn diff_partitions_added_updated_removed() {
    let desired = set(vec![
        Module::new("added", config("1")),
        Module::new("changed", config("2")),
        Module::new("same", config("1")),
    ]);
    let current = set(vec![
        Module::new("changed", config("1")),
        Module::new("same", config("1")).with_runtime(observed(RuntimeStatus::Running)),
        Module::new("gone", config("1")),
    ]);
    let diff = desired.diff(&current);
    let names = |modules: &[Module]| modules.iter().map(|m| m.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&diff.added), vec!["added"]);
    assert_eq!(names(&diff.updated), vec!["changed"]);
    assert_eq!(diff.removed, vec!["gone".to_owned()]);
}

#[test]
fn removed_modules_are_stopped_then_removed() {
    for status in STATUSES {
        for policy in POLICIES {
            let current = set(vec![Module::new("old", config("1"))
                .with_restart_policy(policy)
                .with_runtime(observed(status))]);
            let plan = planner().plan(
                &ModuleSet::empty(),
                &current,
                &RuntimeInfo::default(),
                &ModuleIdentities::new(),
            );
            let chain = plan.chain("old").unwrap();
            assert_eq!(chain.kinds(), vec![CommandKind::Stop, CommandKind::Remove]);
            assert_eq!(chain.reason(), ChainReason::Remove);
        }
    }
}

#[test]
fn added_module_is_created_and_started() {
    let desired = set(vec![
        Module::new("a", config("1")).with_image_pull_policy(ImagePullPolicy::Never),
        Module::new("b", config("1"))
            .with_image_pull_policy(ImagePullPolicy::Never)
            .with_desired_status(DesiredStatus::Stopped),
    ]);
    let plan = planner().plan(
        &desired,
        &ModuleSet::empty(),
        &RuntimeInfo::default(),
        &identities(&["a", "b"]),
    );
    assert_eq!(
        plan.chain("a").unwrap().kinds(),
        vec![CommandKind::Create, CommandKind::Start]
    );
    assert_eq!(plan.chain("b").unwrap().kinds(), vec![CommandKind::Create]);
}

#[test]
fn config_change_redeploys_for_every_status_and_policy() {
    for status in STATUSES {
        for policy in POLICIES {
            let desired = set(vec![Module::new("m", config("2"))
                .with_restart_policy(policy)
                .with_image_pull_policy(ImagePullPolicy::Never)]);
            let current = set(vec![Module::new("m", config("1"))
                .with_restart_policy(policy)
                .with_runtime(observed(status))]);
            let plan = planner().plan(
                &desired,
                &current,
                &RuntimeInfo::default(),
                &identities(&["m"]),
            );
            let chain = plan.chain("m").unwrap_or_else(|| panic!("{status}/{policy}: no chain"));
            assert_eq!(
                chain.kinds(),
                vec![CommandKind::Update, CommandKind::Start],
                "{status}/{policy}"
            );
            assert_eq!(chain.reason(), ChainReason::Update);
        }
    }
}

#[test]
fn config_change_for_stopped_module_updates_without_starting() {
    for status in STATUSES {
        let desired = set(vec![Module::new("m", config("2"))
            .with_desired_status(DesiredStatus::Stopped)
            .with_image_pull_policy(ImagePullPolicy::Never)]);
        let current = set(vec![
            Module::new("m", config("1")).with_runtime(observed(status))
        ]);
        let plan = planner().plan(&desired, &current, &RuntimeInfo::default(), &identities(&["m"]));
        let chain = plan.chain("m").unwrap_or_else(|| panic!("{status}: no chain"));
        assert_eq!(chain.kinds(), vec![CommandKind::Update], "{status}");
        assert_eq!(chain.reason(), ChainReason::Update);
    }
}

#[test]
fn config_change_with_pull_policy_pulls_first() {
    let desired = set(vec![Module::new("m", config("2"))]);
    let current = set(vec![
        Module::new("m", config("1")).with_runtime(observed(RuntimeStatus::Running))
    ]);
    let plan = planner().plan(&desired, &current, &RuntimeInfo::default(), &identities(&["m"]));
    assert_eq!(
        plan.chain("m").unwrap().kinds(),
        vec![CommandKind::Pull, CommandKind::Update, CommandKind::Start]
    );
}

#[test]
fn status_only_changes_emit_a_single_command() {
    let cases = [
        (DesiredStatus::Stopped, RuntimeStatus::Running, Some(CommandKind::Stop)),
        (DesiredStatus::Stopped, RuntimeStatus::Backoff, Some(CommandKind::Stop)),
        (DesiredStatus::Stopped, RuntimeStatus::Unhealthy, Some(CommandKind::Stop)),
        (DesiredStatus::Stopped, RuntimeStatus::Stopped, None),
        (DesiredStatus::Stopped, RuntimeStatus::Failed, None),
        (DesiredStatus::Running, RuntimeStatus::Stopped, Some(CommandKind::Start)),
        (DesiredStatus::Running, RuntimeStatus::Running, None),
        (DesiredStatus::Running, RuntimeStatus::Unhealthy, None),
        (DesiredStatus::Running, RuntimeStatus::Failed, None),
    ];
    for (desired_status, runtime_status, expected) in cases {
        let desired = set(vec![
            Module::new("m", config("1")).with_desired_status(desired_status)
        ]);
        let current = set(vec![
            Module::new("m", config("1")).with_runtime(observed(runtime_status))
        ]);
        let plan = planner().plan(&desired, &current, &RuntimeInfo::default(), &identities(&[]));
        let kinds = plan.chain("m").map(|chain| chain.kinds());
        assert_eq!(
            kinds,
            expected.map(|kind| vec![kind]),
            "{desired_status}/{runtime_status}"
        );
    }
}

#[test]
fn backoff_gates_restart_until_delay_elapses() {
    let exited = t0();
    let current = set(vec![Module::new("m", config("1")).with_runtime(
        RuntimeObservation::new(RuntimeStatus::Backoff)
            .started_at(exited - chrono::Duration::seconds(20))
            .exited_at(exited, 1)
            .with_restart_count(3),
    )]);
    let desired = set(vec![Module::new("m", config("1"))]);

    let clock = Arc::new(ManualClock::new(exited));
    let planner = planner_at(clock.clone());

    clock.advance(Duration::from_secs(40));
    let early = planner.plan(&desired, &current, &RuntimeInfo::default(), &identities(&[]));
    assert!(early.is_empty(), "40s is below the 80s backoff");

    clock.set(exited + chrono::Duration::seconds(80));
    let due = planner.plan(&desired, &current, &RuntimeInfo::default(), &identities(&[]));
    let chain = due.chain("m").unwrap();
    assert_eq!(chain.kinds(), vec![CommandKind::Stop, CommandKind::Start]);
    assert_eq!(chain.reason(), ChainReason::Restart);
}

#[test]
fn first_start_overrides_never_policy() {
    let desired = set(vec![
        Module::new("m", config("1")).with_restart_policy(RestartPolicy::Never)
    ]);
    let never_started = set(vec![Module::new("m", config("1"))
        .with_restart_policy(RestartPolicy::Never)
        .with_runtime(RuntimeObservation::new(RuntimeStatus::Stopped))]);
    let plan = planner().plan(
        &desired,
        &never_started,
        &RuntimeInfo::default(),
        &identities(&[]),
    );
    assert_eq!(plan.chain("m").unwrap().kinds(), vec![CommandKind::Start]);

    let ran_before = set(vec![Module::new("m", config("1"))
        .with_restart_policy(RestartPolicy::Never)
        .with_runtime(observed(RuntimeStatus::Stopped))]);
    let plan = planner().plan(&desired, &ran_before, &RuntimeInfo::default(), &identities(&[]));
    assert!(plan.is_empty());
}

#[test]
fn env_or_version_changes_alone_do_not_redeploy() {
    let desired = set(vec![Module::new("m", config("1")).with_env("LOG_LEVEL", "debug")]);
    let mut running = Module::new("m", config("1")).with_runtime(observed(RuntimeStatus::Running));
    running.version = "0.9".into();
    let plan = planner().plan(
        &desired,
        &set(vec![running]),
        &RuntimeInfo::default(),
        &identities(&["m"]),
    );
    assert!(plan.is_empty());
}

#[test]
fn shutdown_plan_stops_everything_but_the_agent() {
    let current = set(vec![
        Module::new("edgeAgent", config("1")).with_runtime(observed(RuntimeStatus::Running)),
        Module::new("edgeHub", config("1")).with_runtime(observed(RuntimeStatus::Running)),
        Module::new("sensor", config("1")).with_runtime(observed(RuntimeStatus::Backoff)),
    ]);
    let plan = planner().create_shutdown_plan(&current);
    let names: Vec<_> = plan.chains().iter().map(|chain| chain.module()).collect();
    assert_eq!(names, vec!["edgeHub", "sensor"]);
    assert!(plan
        .chains()
        .iter()
        .all(|chain| chain.kinds() == vec![CommandKind::Stop]));
}

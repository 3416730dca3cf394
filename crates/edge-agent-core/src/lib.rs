//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Reconciliation core of the edge agent.
//!
//! Given the desired module set from a deployment and the module set observed
//! on the device, [`HealthRestartPlanner`] computes a [`Plan`] of per-module
//! command chains and [`PlanRunner`] executes it with bounded parallelism.
//! Restart eligibility and exponential backoff live in [`RestartPolicyManager`].

pub mod agent;
pub mod command;
pub mod environment;
pub mod error;
pub mod module;
pub mod module_set;
pub mod plan;
pub mod planner;
pub mod reporting;
pub mod restart_policy;
pub mod restart_store;
pub mod runner;

pub use agent::{Agent, Deployment, ReconcileReport};
pub use command::{Command, CommandExecutor, CommandKind};
pub use environment::{Environment, StatePatch, StateSink};
pub use error::{CommandError, EnvironmentError, ReconcileError, ReportError, StoreError};
pub use module::{
    ConfigurationInfo, DesiredStatus, ImagePullPolicy, Module, ModuleConfig, ModuleIdentities,
    ModuleIdentity, RestartPolicy, RuntimeInfo, RuntimeObservation, RuntimeStatus,
};
pub use module_set::{Diff, ModuleSet, ModuleSetError};
pub use plan::{Chain, ChainReason, Plan};
pub use planner::HealthRestartPlanner;
pub use reporting::ReportingExecutor;
pub use restart_policy::RestartPolicyManager;
pub use restart_store::{
    FileRestartStateStore, InMemoryRestartStateStore, RestartState, RestartStateStore,
};
pub use runner::{ChainOutcome, ChainStatus, PlanOutcome, PlanRunner};

pub use tokio_util::sync::CancellationToken;

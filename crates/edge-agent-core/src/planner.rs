//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Turns a desired/current module diff plus runtime health into a [`Plan`].
//!
//! Per module, the first matching rule wins:
//!
//! 1. removed modules are stopped then removed;
//! 2. added modules are pulled (per pull policy), created, and started if desired running;
//! 3. modules whose configuration changed are pulled, updated, and started if desired
//!    running, whatever their runtime status;
//! 4. a module desired stopped that is still active is stopped;
//! 5. a stopped module desired running is started if its restart policy allows it
//!    or it has never been started;
//! 6. a module in backoff is stopped and started once its backoff delay elapsed;
//! 7. anything else is left alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use edge_agent_common::time::SharedClock;
use edge_agent_metrics::ReconcileMetrics;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::module::{
    DesiredStatus, ImagePullPolicy, Module, ModuleIdentities, RestartPolicy, RuntimeInfo,
    RuntimeStatus,
};
use crate::module_set::ModuleSet;
use crate::plan::{Chain, ChainReason, Plan};
use crate::restart_policy::RestartPolicyManager;

/// Planner combining configuration diffs with restart-policy decisions.
#[derive(Debug, Clone)]
pub struct HealthRestartPlanner {
    restart_manager: Arc<RestartPolicyManager>,
    clock: SharedClock,
    agent_module: String,
    metrics: Option<ReconcileMetrics>,
}

impl HealthRestartPlanner {
    /// `agent_module` names the agent's own module, which shutdown plans leave running.
    pub fn new(
        restart_manager: Arc<RestartPolicyManager>,
        clock: SharedClock,
        agent_module: impl Into<String>,
    ) -> Self {
        Self {
            restart_manager,
            clock,
            agent_module: agent_module.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn restart_manager(&self) -> &Arc<RestartPolicyManager> {
        &self.restart_manager
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Compute the chains converging `current` to `desired`.
    ///
    /// Modules that cannot be planned (invalid definition, missing identity)
    /// are logged and skipped; the rest of the plan is unaffected.
    pub fn plan(
        &self,
        desired: &ModuleSet,
        current: &ModuleSet,
        runtime_info: &RuntimeInfo,
        identities: &ModuleIdentities,
    ) -> Plan {
        let now = self.clock.now();
        let diff = desired.diff(current);
        let mut chains = Vec::with_capacity(desired.len() + diff.removed.len());

        for name in &diff.removed {
            if let Some(module) = current.get(name) {
                chains.push(Chain::new(
                    name.clone(),
                    ChainReason::Remove,
                    vec![Command::stop(module), Command::remove(module)],
                ));
            }
        }

        for module in &diff.added {
            let Some(identity) = self.plannable_identity(module, identities) else {
                continue;
            };
            let mut commands = pull_commands(module);
            commands.push(Command::create(module, identity, runtime_info));
            if module.desired_status == DesiredStatus::Running {
                commands.push(Command::start(module));
            }
            chains.push(Chain::new(module.name.clone(), ChainReason::Add, commands));
        }

        for module in &diff.updated {
            let Some(existing) = current.get(&module.name) else {
                continue;
            };
            let Some(identity) = self.plannable_identity(module, identities) else {
                continue;
            };
            let mut commands = pull_commands(module);
            commands.push(Command::update(existing, module, identity, runtime_info));
            if module.desired_status == DesiredStatus::Running {
                commands.push(Command::start(module));
            }
            chains.push(Chain::new(module.name.clone(), ChainReason::Update, commands));
        }

        for module in desired.iter() {
            let Some(existing) = current.get(&module.name) else {
                continue;
            };
            if !module.same_config(existing) {
                continue;
            }
            if let Some(chain) = self.reconcile_status(module, existing, now) {
                chains.push(chain);
            }
        }

        let plan = Plan::new(chains);
        if let Some(metrics) = &self.metrics {
            metrics.observe_plan(plan.len());
        }
        if plan.is_empty() {
            debug!(desired = desired.len(), current = current.len(), "module sets converged");
        } else {
            info!(
                chains = plan.len(),
                commands = plan.command_count(),
                added = diff.added.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "reconciliation plan computed"
            );
        }
        plan
    }

    /// Stop every module except the agent itself.
    pub fn create_shutdown_plan(&self, current: &ModuleSet) -> Plan {
        let plan = Plan::new(
            current
                .iter()
                .filter(|module| module.name != self.agent_module)
                .map(|module| {
                    Chain::new(
                        module.name.clone(),
                        ChainReason::Shutdown,
                        vec![Command::stop(module)],
                    )
                }),
        );
        info!(chains = plan.len(), agent = %self.agent_module, "shutdown plan computed");
        plan
    }

    fn plannable_identity<'a>(
        &self,
        module: &Module,
        identities: &'a ModuleIdentities,
    ) -> Option<&'a crate::module::ModuleIdentity> {
        if let Err(reason) = module.validate() {
            warn!(module = %module.name, %reason, "skipping invalid module");
            return None;
        }
        let identity = identities.get(&module.name);
        if identity.is_none() {
            warn!(module = %module.name, "no identity available; skipping module");
        }
        identity
    }

    fn reconcile_status(
        &self,
        desired: &Module,
        current: &Module,
        now: DateTime<Utc>,
    ) -> Option<Chain> {
        let Some(runtime) = current.runtime.as_ref() else {
            debug!(module = %desired.name, "no runtime information; status left as is");
            return None;
        };
        let name = desired.name.clone();
        match (desired.desired_status, runtime.runtime_status) {
            (DesiredStatus::Stopped, status) if status.is_active() => Some(Chain::new(
                name,
                ChainReason::DesiredStatus,
                vec![Command::stop(current)],
            )),
            (DesiredStatus::Stopped, _) => None,
            (DesiredStatus::Running, RuntimeStatus::Stopped) => {
                let observed = desired.clone().with_runtime(runtime.clone());
                if desired.restart_policy != RestartPolicy::Never
                    || RestartPolicyManager::is_first_start(&observed)
                {
                    Some(Chain::new(
                        name,
                        ChainReason::DesiredStatus,
                        vec![Command::start(desired)],
                    ))
                } else {
                    debug!(module = %name, "stopped module with restart policy never left stopped");
                    None
                }
            }
            (DesiredStatus::Running, RuntimeStatus::Backoff) => {
                let observed = desired.clone().with_runtime(runtime.clone());
                if self.restart_manager.should_restart(&observed, now) {
                    Some(Chain::new(
                        name,
                        ChainReason::Restart,
                        vec![Command::stop(current), Command::start(desired)],
                    ))
                } else {
                    debug!(module = %name, "module still cooling off");
                    None
                }
            }
            (DesiredStatus::Running, _) => None,
        }
    }
}

fn pull_commands(module: &Module) -> Vec<Command> {
    match module.image_pull_policy {
        ImagePullPolicy::OnCreate => vec![Command::pull(module)],
        ImagePullPolicy::Never => Vec::new(),
    }
}

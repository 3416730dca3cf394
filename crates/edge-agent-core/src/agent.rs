//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! One reconciliation cycle: snapshot, plan, execute, bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_agent_common::config::AgentConfig;
use edge_agent_common::time::SharedClock;
use edge_agent_metrics::ReconcileMetrics;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::command::{CommandExecutor, CommandKind};
use crate::environment::Environment;
use crate::error::{ReconcileError, StoreError};
use crate::module::{ModuleIdentities, RuntimeInfo};
use crate::module_set::ModuleSet;
use crate::plan::{ChainReason, Plan};
use crate::planner::HealthRestartPlanner;
use crate::restart_policy::RestartPolicyManager;
use crate::restart_store::{FileRestartStateStore, InMemoryRestartStateStore, RestartStateStore};
use crate::runner::{ChainOutcome, ChainStatus, PlanOutcome, PlanRunner};

/// Everything a cycle needs from the latest deployment.
#[derive(Debug, Clone, Default)]
pub struct Deployment {
    pub modules: ModuleSet,
    pub runtime_info: RuntimeInfo,
    pub identities: ModuleIdentities,
}

/// Result of one cycle. Chain failures are kept here and retried next cycle.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub cycle: u64,
    pub plan: Plan,
    pub outcome: PlanOutcome,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn into_result(self) -> Result<(), ReconcileError> {
        self.outcome.into_result()
    }
}

pub struct Agent<E> {
    environment: Arc<dyn Environment>,
    planner: HealthRestartPlanner,
    runner: PlanRunner<E>,
    max_parallelism: usize,
    cycles: AtomicU64,
}

impl<E> std::fmt::Debug for Agent<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("planner", &self.planner)
            .field("max_parallelism", &self.max_parallelism)
            .field("cycles", &self.cycles.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<E: CommandExecutor> Agent<E> {
    pub fn new(
        environment: Arc<dyn Environment>,
        planner: HealthRestartPlanner,
        runner: PlanRunner<E>,
        max_parallelism: usize,
    ) -> Self {
        Self {
            environment,
            planner,
            runner,
            max_parallelism: max_parallelism.max(1),
            cycles: AtomicU64::new(0),
        }
    }

    /// Wire an agent from configuration. Opens the file-backed restart store
    /// when `restart.state_path` is set.
    pub fn from_config(
        config: &AgentConfig,
        environment: Arc<dyn Environment>,
        executor: E,
        clock: SharedClock,
        metrics: Option<ReconcileMetrics>,
    ) -> Result<Self, StoreError> {
        let store: Arc<dyn RestartStateStore> = match &config.restart.state_path {
            Some(path) => Arc::new(FileRestartStateStore::open(path)?),
            None => Arc::new(InMemoryRestartStateStore::new()),
        };
        let mut manager = RestartPolicyManager::from_config(&config.restart).with_store(store);
        let mut planner_metrics = None;
        let mut runner = PlanRunner::new(executor);
        if let Some(metrics) = metrics {
            manager = manager.with_metrics(metrics.clone());
            runner = runner.with_metrics(metrics.clone());
            planner_metrics = Some(metrics);
        }
        let mut planner =
            HealthRestartPlanner::new(Arc::new(manager), clock, config.agent.module_name.clone());
        if let Some(metrics) = planner_metrics {
            planner = planner.with_metrics(metrics);
        }
        Ok(Self::new(
            environment,
            planner,
            runner,
            config.runner.max_parallelism,
        ))
    }

    pub fn planner(&self) -> &HealthRestartPlanner {
        &self.planner
    }

    pub fn runner(&self) -> &PlanRunner<E> {
        &self.runner
    }

    /// Converge the device towards `desired`.
    pub async fn reconcile(
        &self,
        desired: &ModuleSet,
        runtime_info: &RuntimeInfo,
        identities: &ModuleIdentities,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, ReconcileError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            let current = self.environment.get_modules(cancel).await?;
            let plan = self.planner.plan(desired, &current, runtime_info, identities);
            let outcome = self.runner.execute(self.max_parallelism, &plan, cancel).await;
            self.update_bookkeeping(&current, &outcome);
            if outcome.is_success() {
                debug!(chains = plan.len(), "cycle complete");
            } else {
                warn!(
                    failed = outcome.failures().len(),
                    chains = plan.len(),
                    "cycle complete with failed chains"
                );
            }
            Ok::<_, ReconcileError>(ReconcileReport {
                cycle,
                plan,
                outcome,
            })
        }
        .instrument(info_span!("reconcile", cycle))
        .await
    }

    /// Stop every module except the agent's own.
    pub async fn shutdown(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, ReconcileError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            let current = self.environment.get_modules(cancel).await?;
            let plan = self.planner.create_shutdown_plan(&current);
            let outcome = self.runner.execute(self.max_parallelism, &plan, cancel).await;
            info!(stopped = plan.len(), success = outcome.is_success(), "shutdown plan executed");
            Ok::<_, ReconcileError>(ReconcileReport {
                cycle,
                plan,
                outcome,
            })
        }
        .instrument(info_span!("shutdown", cycle))
        .await
    }

    /// Reconcile on every tick of `period` and whenever a new deployment is
    /// published, until `cancel` fires or the sender is dropped. Cycles never
    /// overlap.
    pub async fn run(
        &self,
        mut deployments: watch::Receiver<Deployment>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconcile loop cancelled");
                    break;
                }
                changed = deployments.changed() => {
                    if changed.is_err() {
                        debug!("deployment source closed; reconcile loop exiting");
                        break;
                    }
                    debug!("deployment changed");
                }
                _ = ticker.tick() => {}
            }
            let deployment = deployments.borrow_and_update().clone();
            if let Err(err) = self
                .reconcile(
                    &deployment.modules,
                    &deployment.runtime_info,
                    &deployment.identities,
                    &cancel,
                )
                .await
            {
                warn!(error = %err, "reconcile cycle failed; retrying next tick");
            }
        }
    }

    fn update_bookkeeping(&self, current: &ModuleSet, outcome: &PlanOutcome) {
        let manager = self.planner.restart_manager();
        let now = self.planner.clock().now();
        for chain in &outcome.chains {
            let result = match chain.reason {
                ChainReason::Restart if restart_attempted(chain) => {
                    match current.get(&chain.module) {
                        Some(module) => manager.record_restart(module, now).map(|_| ()),
                        None => Ok(()),
                    }
                }
                ChainReason::Remove | ChainReason::Update if chain.is_success() => {
                    manager.forget(&chain.module)
                }
                _ => Ok(()),
            };
            if let Err(err) = result {
                warn!(module = %chain.module, error = %err, "restart bookkeeping failed");
            }
        }
    }
}

// A restart counts once the stop went through, whether or not the start did.
fn restart_attempted(chain: &ChainOutcome) -> bool {
    chain
        .completed
        .iter()
        .any(|command| command.kind() == CommandKind::Stop)
        || matches!(chain.status, ChainStatus::Failed { .. })
}

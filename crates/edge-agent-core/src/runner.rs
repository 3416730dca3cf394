//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Plan execution with bounded parallelism across chains.

use std::time::Instant;

use edge_agent_metrics::ReconcileMetrics;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::command::{Command, CommandExecutor};
use crate::error::{CommandError, ReconcileError};
use crate::plan::{Chain, ChainReason, Plan};

/// Terminal state of one chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStatus {
    Completed,
    /// `command` failed; later commands of the chain were skipped.
    Failed { command: Command, error: CommandError },
    /// Cancellation was observed before `remaining` commands could run.
    Cancelled { remaining: usize, error: CommandError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub module: String,
    pub reason: ChainReason,
    /// Commands that ran successfully, in execution order.
    pub completed: Vec<Command>,
    pub status: ChainStatus,
}

impl ChainOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ChainStatus::Completed
    }

    pub fn error(&self) -> Option<&CommandError> {
        match &self.status {
            ChainStatus::Completed => None,
            ChainStatus::Failed { error, .. } | ChainStatus::Cancelled { error, .. } => Some(error),
        }
    }
}

/// Per-chain results of a plan run, sorted by module name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub chains: Vec<ChainOutcome>,
}

impl PlanOutcome {
    pub fn is_success(&self) -> bool {
        self.chains.iter().all(ChainOutcome::is_success)
    }

    pub fn chain(&self, module: &str) -> Option<&ChainOutcome> {
        self.chains.iter().find(|outcome| outcome.module == module)
    }

    pub fn failures(&self) -> Vec<(String, CommandError)> {
        self.chains
            .iter()
            .filter_map(|outcome| {
                outcome
                    .error()
                    .map(|error| (outcome.module.clone(), error.clone()))
            })
            .collect()
    }

    pub fn into_result(self) -> Result<(), ReconcileError> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::ChainsFailed { failures })
        }
    }
}

/// Runs plans against a [`CommandExecutor`].
///
/// Chains for different modules run concurrently, at most `max_parallelism`
/// at a time. Commands inside a chain run strictly in order and the chain
/// stops at its first failure; other chains are unaffected.
#[derive(Debug)]
pub struct PlanRunner<E> {
    executor: E,
    metrics: Option<ReconcileMetrics>,
}

impl<E: CommandExecutor> PlanRunner<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub async fn execute(
        &self,
        max_parallelism: usize,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> PlanOutcome {
        if plan.is_empty() {
            return PlanOutcome::default();
        }
        let limit = max_parallelism.max(1);
        info!(chains = plan.len(), limit, "executing plan");

        let pending: Vec<_> = plan
            .chains()
            .iter()
            .map(|chain| self.run_chain(chain, cancel))
            .collect();
        let mut chains: Vec<ChainOutcome> = stream::iter(pending)
            .buffer_unordered(limit)
            .collect()
            .await;
        chains.sort_by(|a, b| a.module.cmp(&b.module));

        let outcome = PlanOutcome { chains };
        if !outcome.is_success() {
            warn!(failed = outcome.failures().len(), "plan finished with failures");
        }
        outcome
    }

    /// Revert the completed commands of a chain, newest first.
    ///
    /// Keeps going past individual failures and returns the first one.
    /// Stops before the next inverse once `cancel` fires.
    pub async fn undo(
        &self,
        outcome: &ChainOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let mut first_error = None;
        for command in outcome.completed.iter().rev() {
            if cancel.is_cancelled() {
                warn!(module = %outcome.module, command = %command, "undo cancelled");
                return Err(CommandError::Cancelled {
                    command: command.describe(),
                });
            }
            if let Err(err) = self.executor.undo(command, cancel).await {
                warn!(module = %outcome.module, command = %command, error = %err, "undo failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_chain<'a>(
        &'a self,
        chain: &'a Chain,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ChainOutcome> {
        let span = info_span!("chain", module = %chain.module(), reason = %chain.reason());
        async move {
            let started = Instant::now();
            let mut completed = Vec::with_capacity(chain.len());
            let mut status = ChainStatus::Completed;

            for (index, command) in chain.commands().iter().enumerate() {
                if cancel.is_cancelled() {
                    status = cancelled(chain, index, command);
                    break;
                }
                debug!(command = %command, "executing command");
                match self.executor.execute(command, cancel).await {
                    Ok(()) => {
                        self.record(command, true);
                        completed.push(command.clone());
                    }
                    Err(err @ CommandError::Cancelled { .. }) => {
                        self.record(command, false);
                        warn!(command = %command, "command cancelled");
                        status = ChainStatus::Cancelled {
                            remaining: chain.len() - index,
                            error: err,
                        };
                        break;
                    }
                    Err(err) => {
                        self.record(command, false);
                        error!(
                            command = %command,
                            error = %err,
                            "command failed; abandoning chain"
                        );
                        status = ChainStatus::Failed {
                            command: command.clone(),
                            error: err,
                        };
                        break;
                    }
                }
            }

            if let Some(metrics) = &self.metrics {
                metrics.observe_chain(chain.module(), started.elapsed());
            }
            ChainOutcome {
                module: chain.module().to_owned(),
                reason: chain.reason(),
                completed,
                status,
            }
        }
        .instrument(span)
        .boxed()
    }

    fn record(&self, command: &Command, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_command(command.kind().as_ref(), success);
        }
    }
}

fn cancelled(chain: &Chain, index: usize, next: &Command) -> ChainStatus {
    let remaining = chain.len() - index;
    warn!(remaining, "cancellation requested; chain stopped");
    ChainStatus::Cancelled {
        remaining,
        error: CommandError::Cancelled {
            command: next.describe(),
        },
    }
}

//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{Command, CommandExecutor};
use crate::environment::{Environment, StatePatch, StateSink};
use crate::error::CommandError;
use crate::module_set::ModuleSet;

/// Executor decorator reporting module-set changes around every command.
///
/// Reports are delivered on background tasks. Snapshot and delivery failures
/// are logged and never affect the result of the wrapped command.
pub struct ReportingExecutor<E> {
    inner: E,
    environment: Arc<dyn Environment>,
    sink: Arc<dyn StateSink>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<E> std::fmt::Debug for ReportingExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingExecutor")
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl<E: CommandExecutor> ReportingExecutor<E> {
    pub fn new(inner: E, environment: Arc<dyn Environment>, sink: Arc<dyn StateSink>) -> Self {
        Self {
            inner,
            environment,
            sink,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Wait for every report spawned so far.
    pub async fn flush(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "state report task aborted");
            }
        }
    }

    async fn snapshot(&self, cancel: &CancellationToken) -> Option<ModuleSet> {
        match self.environment.get_modules(cancel).await {
            Ok(modules) => Some(modules),
            Err(err) => {
                warn!(error = %err, "environment snapshot failed; skipping state report");
                None
            }
        }
    }

    fn spawn_report(&self, command: &Command, before: &ModuleSet, after: &ModuleSet) {
        let patch = StatePatch::between(before, after);
        if patch.is_empty() {
            debug!(command = %command, "no module changes to report");
            return;
        }
        let sink = Arc::clone(&self.sink);
        let description = command.describe();
        let handle = tokio::spawn(async move {
            let changed = patch.updated.len() + patch.removed.len();
            match sink.report(patch).await {
                Ok(()) => debug!(command = %description, changed, "reported module state"),
                Err(err) => warn!(command = %description, error = %err, "state report failed"),
            }
        });
        let mut pending = self.pending.lock();
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }
}

#[async_trait]
impl<E: CommandExecutor> CommandExecutor for ReportingExecutor<E> {
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let before = self.snapshot(cancel).await;
        let result = self.inner.execute(command, cancel).await;
        if let Some(before) = before {
            if let Some(after) = self.snapshot(cancel).await {
                self.spawn_report(command, &before, &after);
            }
        }
        result
    }

    async fn undo(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let before = self.snapshot(cancel).await;
        let result = self.inner.undo(command, cancel).await;
        if let Some(before) = before {
            if let Some(after) = self.snapshot(cancel).await {
                self.spawn_report(command, &before, &after);
            }
        }
        result
    }
}

//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Restart eligibility and exponential backoff.
//!
//! Only modules the runtime reports as [`RuntimeStatus::Backoff`] are candidates
//! for a policy-driven restart. Unhealthy, stopped, and failed modules are left
//! to the desired-status path of the planner or to the runtime's health monitor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use edge_agent_common::config::RestartConfig;
use edge_agent_metrics::ReconcileMetrics;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::module::{DesiredStatus, Module, RestartPolicy, RuntimeObservation, RuntimeStatus};
use crate::restart_store::{RestartState, RestartStateStore};

/// Clock-driven restart decisions plus restart-count bookkeeping.
#[derive(Debug, Clone)]
pub struct RestartPolicyManager {
    max_restart_count: u32,
    cool_off_time_unit: Duration,
    intensive_care_time: Duration,
    store: Option<Arc<dyn RestartStateStore>>,
    metrics: Option<ReconcileMetrics>,
}

impl RestartPolicyManager {
    pub fn new(
        max_restart_count: u32,
        cool_off_time_unit: Duration,
        intensive_care_time: Duration,
    ) -> Self {
        Self {
            max_restart_count,
            cool_off_time_unit,
            intensive_care_time,
            store: None,
            metrics: None,
        }
    }

    pub fn from_config(config: &RestartConfig) -> Self {
        Self::new(
            config.max_restart_count,
            config.cool_off_time_unit,
            config.intensive_care_time,
        )
    }

    /// Persist restart bookkeeping through `store`.
    pub fn with_store(mut self, store: Arc<dyn RestartStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `cool_off_time_unit * 2^min(restart_count, max_restart_count)`.
    pub fn backoff_delay(&self, restart_count: u32) -> Duration {
        let exponent = restart_count.min(self.max_restart_count).min(31);
        self.cool_off_time_unit.saturating_mul(1u32 << exponent)
    }

    /// Whether a module that has been started before may be restarted now.
    ///
    /// Store failures fail closed: the module is treated as still cooling off.
    pub fn should_restart(&self, module: &Module, now: DateTime<Utc>) -> bool {
        if module.restart_policy == RestartPolicy::Never {
            return false;
        }
        let Some(runtime) = module.runtime.as_ref() else {
            return false;
        };
        if runtime.runtime_status != RuntimeStatus::Backoff {
            return false;
        }

        let state = match self.effective_state(&module.name, runtime) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    module = %module.name,
                    error = %err,
                    "restart state unavailable; deferring restart"
                );
                return false;
            }
        };

        let delay = self.backoff_delay(state.restart_count);
        let Some(exited_at) = runtime.last_exit_time.or(state.last_restart_time) else {
            return true;
        };
        let eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| exited_at.checked_add_signed(delay));
        let eligible = match eligible_at {
            Some(eligible_at) => now >= eligible_at,
            None => false,
        };
        debug!(
            module = %module.name,
            restart_count = state.restart_count,
            delay_secs = delay.as_secs(),
            eligible,
            "evaluated backoff"
        );
        eligible
    }

    /// A module that should run but has never been started must be started,
    /// whatever its restart policy.
    pub fn is_first_start(module: &Module) -> bool {
        module.desired_status == DesiredStatus::Running
            && module
                .runtime
                .as_ref()
                .map_or(true, |runtime| !runtime.has_started())
    }

    /// Restart bookkeeping for `name` after applying persisted state and the
    /// intensive-care reset.
    pub fn effective_state(
        &self,
        name: &str,
        runtime: &RuntimeObservation,
    ) -> Result<RestartState, StoreError> {
        let mut state = RestartState {
            restart_count: runtime.restart_count,
            last_restart_time: runtime.last_restart_time,
        };
        if let Some(store) = &self.store {
            if let Some(stored) = store.get(name)? {
                state = stored;
            }
        }
        if self.survived_intensive_care(runtime) {
            state.restart_count = 0;
        }
        Ok(state)
    }

    /// Count a restart issued for `module` at `now` and persist the result.
    pub fn record_restart(
        &self,
        module: &Module,
        now: DateTime<Utc>,
    ) -> Result<RestartState, StoreError> {
        let reset = module
            .runtime
            .as_ref()
            .is_some_and(|runtime| self.survived_intensive_care(runtime));
        let observed = module
            .runtime
            .as_ref()
            .map_or(0, |runtime| runtime.restart_count);

        let mut next = |previous: Option<RestartState>| {
            let count = if reset {
                0
            } else {
                previous.map_or(observed, |state| state.restart_count)
            };
            RestartState {
                restart_count: count.saturating_add(1),
                last_restart_time: Some(now),
            }
        };

        let state = match &self.store {
            Some(store) => store.update(&module.name, &mut next)?,
            None => next(None),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_restart(&module.name);
        }
        debug!(module = %module.name, restart_count = state.restart_count, "restart recorded");
        Ok(state)
    }

    /// Drop bookkeeping for a module that no longer exists.
    pub fn forget(&self, name: &str) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.remove(name),
            None => Ok(()),
        }
    }

    // A module that ran longer than the intensive-care window before its last
    // exit starts its restart history over.
    fn survived_intensive_care(&self, runtime: &RuntimeObservation) -> bool {
        let (Some(started), Some(exited)) = (runtime.last_start_time, runtime.last_exit_time)
        else {
            return false;
        };
        if exited < started {
            return false;
        }
        match (exited - started).to_std() {
            Ok(uptime) => uptime > self.intensive_care_time,
            Err(_) => false,
        }
    }
}

//! ---
//! ea_section: "03-observability"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Metrics collection utilities."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Prometheus registry plumbing and the reconciler metric families.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

/// Metrics recorded by the planner, plan runner, and restart bookkeeping.
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: SharedRegistry,
    plans_total: IntCounter,
    plan_chains: Histogram,
    commands_total: IntCounterVec,
    restarts_total: IntCounterVec,
    chain_duration_seconds: HistogramVec,
}

impl ReconcileMetrics {
    /// Register the reconciler metric families against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let plans_total = IntCounter::with_opts(Opts::new(
            "edge_agent_plans_total",
            "Total number of reconciliation plans computed",
        ))?;
        registry.register(Box::new(plans_total.clone()))?;

        let plan_chains = Histogram::with_opts(
            HistogramOpts::new(
                "edge_agent_plan_chains",
                "Number of module command chains contained in each plan",
            )
            .buckets(prometheus::linear_buckets(0.0, 2.0, 16)?),
        )?;
        registry.register(Box::new(plan_chains.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new(
                "edge_agent_commands_total",
                "Lifecycle commands executed, by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new(
                "edge_agent_restarts_total",
                "Backoff-driven restarts issued per module",
            ),
            &["module"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "edge_agent_chain_duration_seconds",
            "Wall time spent executing a module command chain",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 16)?);
        let chain_duration_seconds = HistogramVec::new(histogram_opts, &["module"])?;
        registry.register(Box::new(chain_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            plans_total,
            plan_chains,
            commands_total,
            restarts_total,
            chain_duration_seconds,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Record a freshly computed plan with `chains` module chains.
    pub fn observe_plan(&self, chains: usize) {
        self.plans_total.inc();
        self.plan_chains.observe(chains as f64);
    }

    /// Record the outcome of a single command execution.
    pub fn record_command(&self, kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.commands_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Count a restart issued for `module`.
    pub fn record_restart(&self, module: &str) {
        self.restarts_total.with_label_values(&[module]).inc();
    }

    /// Observe how long a module chain took to run.
    pub fn observe_chain(&self, module: &str, duration: Duration) {
        self.chain_duration_seconds
            .with_label_values(&[module])
            .observe(duration.as_secs_f64());
    }
}

impl std::fmt::Debug for ReconcileMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

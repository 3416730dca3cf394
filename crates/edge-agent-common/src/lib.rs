//! ---
//! ea_section: "01-core-functionality"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Shared primitives and utilities for the agent runtime."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Shared primitives for the edge agent workspace.
//! This crate exposes configuration loading, logging bootstrap, and the
//! clock abstraction consumed by the restart scheduler.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AgentConfig, AgentSection, LoadedAgentConfig, LoggingConfig, MetricsConfig, ReconcileConfig,
    RestartConfig, RunnerConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};

//! ---
//! ea_section: "01-core-functionality"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Shared primitives and utilities for the agent runtime."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_module_name() -> String {
    "edgeAgent".to_owned()
}

fn default_max_restart_count() -> u32 {
    5
}

fn default_cool_off_time_unit() -> Duration {
    Duration::from_secs(10)
}

fn default_intensive_care_time() -> Duration {
    Duration::from_secs(600)
}

fn default_max_parallelism() -> usize {
    4
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_to_file() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the agent runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AgentConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAgentConfig {
    pub config: AgentConfig,
    pub source: PathBuf,
}

impl AgentConfig {
    pub const ENV_CONFIG_PATH: &'static str = "EDGE_AGENT_CONFIG";

    /// Load configuration from disk, respecting the `EDGE_AGENT_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAgentConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAgentConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAgentConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Load and validate a single file, ignoring the environment override.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AgentConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.agent.module_name.trim().is_empty() {
            return Err(anyhow!("agent.module_name must not be empty"));
        }
        self.restart.validate()?;
        self.runner.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AgentConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AgentConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity of the agent itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Name of the agent's own module; never stopped by a shutdown plan.
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            module_name: default_module_name(),
        }
    }
}

/// Backoff parameters for the restart policy manager.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Cap on the backoff exponent. Restarts continue past this count.
    #[serde(default = "default_max_restart_count")]
    pub max_restart_count: u32,
    #[serde(default = "default_cool_off_time_unit")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cool_off_time_unit: Duration,
    #[serde(default = "default_intensive_care_time")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub intensive_care_time: Duration,
    /// Optional JSON file backing the restart-state store.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restart_count: default_max_restart_count(),
            cool_off_time_unit: default_cool_off_time_unit(),
            intensive_care_time: default_intensive_care_time(),
            state_path: None,
        }
    }
}

impl RestartConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cool_off_time_unit.is_zero() {
            return Err(anyhow!("restart.cool_off_time_unit must be greater than zero"));
        }
        // 2^max must stay representable when scaling the cool-off unit.
        if self.max_restart_count > 30 {
            return Err(anyhow!(
                "restart.max_restart_count {} exceeds the supported maximum of 30",
                self.max_restart_count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 {
            return Err(anyhow!("runner.max_parallelism must be at least 1"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: default_reconcile_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write the rolling JSON file next to stdout output.
    #[serde(default = "default_log_to_file")]
    pub file: bool,
    /// Level for the reconciliation crates when no env filter is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log every command the runner executes, not only failures.
    #[serde(default)]
    pub command_trace: bool,
    /// Emit an event when a `reconcile` or `chain` span closes, with its busy time.
    #[serde(default)]
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: default_log_to_file(),
            level: default_log_level(),
            command_trace: false,
            span_timings: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

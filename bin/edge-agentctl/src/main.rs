//! ---
//! ea_section: "03-operator-tooling"
//! ea_subsection: "binary"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Operator CLI for dry-running the edge agent planner."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edge_agent_common::config::AgentConfig;
use edge_agent_common::logging::init_tracing;
use edge_agent_common::time::{ManualClock, SharedClock, SystemClock};
use edge_agent_core::{
    CancellationToken, ChainStatus, Diff, HealthRestartPlanner, Plan, PlanOutcome, PlanRunner,
    RestartPolicyManager,
};
use edge_agent_metrics::{new_registry, render, ReconcileMetrics};
use tracing::{info, warn};

mod dry_run;
mod snapshot;

use dry_run::DryRunExecutor;

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["edge-agent.toml", "/etc/edge-agent/config.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Edge agent reconciliation planner CLI",
    long_about = None
)]
struct Cli {
    /// Configuration file. Defaults to EDGE_AGENT_CONFIG, then the standard locations.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute the reconciliation plan between two module snapshots.
    Plan(PlanArgs),
    /// Compute the plan stopping every module except the agent.
    ShutdownPlan {
        #[arg(long, value_name = "FILE")]
        current: PathBuf,
    },
    /// Show added, updated, and removed modules.
    Diff {
        #[arg(long, value_name = "FILE")]
        desired: PathBuf,
        #[arg(long, value_name = "FILE")]
        current: PathBuf,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// JSON array of desired modules.
    #[arg(long, value_name = "FILE")]
    desired: PathBuf,
    /// JSON array of current modules, including runtime observations.
    #[arg(long, value_name = "FILE")]
    current: PathBuf,
    /// JSON object of module identities keyed by module name.
    #[arg(long, value_name = "FILE")]
    identities: Option<PathBuf>,
    /// JSON runtime settings passed to create and update commands.
    #[arg(long, value_name = "FILE")]
    runtime_info: Option<PathBuf>,
    /// Evaluate backoff as of this RFC 3339 instant instead of the system clock.
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<String>,
    /// Run the plan through a logging executor.
    #[arg(long)]
    execute: bool,
    /// Print Prometheus metrics after planning.
    #[arg(long)]
    print_metrics: bool,
}

fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    if let Some(path) = path {
        return AgentConfig::from_path(path);
    }
    let env_set = std::env::var_os(AgentConfig::ENV_CONFIG_PATH).is_some_and(|v| !v.is_empty());
    if env_set
        || DEFAULT_CONFIG_CANDIDATES
            .iter()
            .any(|candidate| Path::new(candidate).exists())
    {
        return AgentConfig::load(&DEFAULT_CONFIG_CANDIDATES[..]);
    }
    Ok(AgentConfig::default())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn summarize(outcome: &PlanOutcome) {
    for chain in &outcome.chains {
        match &chain.status {
            ChainStatus::Completed => {
                println!("{}: ok ({} commands)", chain.module, chain.completed.len())
            }
            ChainStatus::Failed { command, error } => {
                println!("{}: failed at {command}: {error}", chain.module)
            }
            ChainStatus::Cancelled { remaining, .. } => {
                println!("{}: cancelled, {remaining} commands skipped", chain.module)
            }
        }
    }
}

async fn run_plan(config: &AgentConfig, args: PlanArgs) -> Result<()> {
    let desired = snapshot::load_modules(&args.desired)?;
    let current = snapshot::load_modules(&args.current)?;
    let identities = snapshot::load_identities(args.identities.as_deref(), &desired)?;
    let runtime_info = snapshot::load_runtime_info(args.runtime_info.as_deref())?;
    let clock: SharedClock = match args.now.as_deref() {
        Some(now) => Arc::new(ManualClock::new(snapshot::parse_timestamp(now)?)),
        None => Arc::new(SystemClock),
    };

    let metrics = if config.metrics.enabled || args.print_metrics {
        Some(ReconcileMetrics::new(new_registry())?)
    } else {
        None
    };

    let mut manager = RestartPolicyManager::from_config(&config.restart);
    let mut planner_metrics = None;
    if let Some(metrics) = &metrics {
        manager = manager.with_metrics(metrics.clone());
        planner_metrics = Some(metrics.clone());
    }
    let mut planner =
        HealthRestartPlanner::new(Arc::new(manager), clock, config.agent.module_name.clone());
    if let Some(metrics) = planner_metrics {
        planner = planner.with_metrics(metrics);
    }

    let plan = planner.plan(&desired, &current, &runtime_info, &identities);
    print_json(&plan)?;

    if args.execute {
        execute(config, &plan, metrics.clone()).await?;
    }
    if args.print_metrics {
        if let Some(metrics) = &metrics {
            print!("{}", render(&metrics.registry())?);
        }
    }
    Ok(())
}

async fn execute(
    config: &AgentConfig,
    plan: &Plan,
    metrics: Option<ReconcileMetrics>,
) -> Result<()> {
    let mut runner = PlanRunner::new(DryRunExecutor);
    if let Some(metrics) = metrics {
        runner = runner.with_metrics(metrics);
    }
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling plan");
                cancel.cancel();
            }
        })
    };
    let outcome = runner
        .execute(config.runner.max_parallelism, plan, &cancel)
        .await;
    ctrl_c.abort();
    summarize(&outcome);
    outcome.into_result().context("dry run reported failed chains")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing("edge-agentctl", &config.logging)?;

    match cli.command {
        Commands::Plan(args) => run_plan(&config, args).await?,
        Commands::ShutdownPlan { current } => {
            let current = snapshot::load_modules(&current)?;
            let manager = RestartPolicyManager::from_config(&config.restart);
            let planner = HealthRestartPlanner::new(
                Arc::new(manager),
                Arc::new(SystemClock),
                config.agent.module_name.clone(),
            );
            print_json(&planner.create_shutdown_plan(&current))?;
        }
        Commands::Diff { desired, current } => {
            let desired = snapshot::load_modules(&desired)?;
            let current = snapshot::load_modules(&current)?;
            let diff = Diff::compute(&desired, &current);
            info!(
                added = diff.added.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "diff computed"
            );
            print_json(&diff)?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

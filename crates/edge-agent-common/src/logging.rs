//! ---
//! ea_section: "01-core-functionality"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Shared primitives and utilities for the agent runtime."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "EDGE_AGENT_LOG";

/// Crates whose level follows `logging.level`; everything else stays at `warn`.
const AGENT_TARGETS: [&str; 3] = ["edge_agent_core", "edge_agent_common", "edge_agentctl"];

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Filter used when neither `EDGE_AGENT_LOG` nor `RUST_LOG` is set.
///
/// Dependencies log at `warn`; the agent's own crates at `logging.level`.
/// `command_trace` lifts the runner to `debug` so each executed command is logged.
pub fn default_directives(config: &LoggingConfig) -> String {
    let mut directives = vec!["warn".to_owned()];
    directives.extend(
        AGENT_TARGETS
            .iter()
            .map(|target| format!("{target}={}", config.level)),
    );
    if config.command_trace {
        directives.push("edge_agent_core::runner=debug".to_owned());
    }
    directives.join(",")
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let fallback = || {
        EnvFilter::try_new(default_directives(config)).unwrap_or_else(|err| {
            eprintln!(
                "invalid logging.level {:?} ({err}); defaulting to info",
                config.level
            );
            EnvFilter::new("info")
        })
    };
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using configured levels");
            fallback()
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
    }
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.span_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

fn stdout_layer<S>(config: &LoggingConfig, guards: &mut Vec<WorkerGuard>) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_span_events(span_events(config))
        .with_writer(writer);
    match config.format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer<S>(
    service_name: &str,
    config: &LoggingConfig,
    guards: &mut Vec<WorkerGuard>,
) -> Result<Option<BoxedLayer<S>>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    if !config.file {
        return Ok(None);
    }
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let appender = daily(&config.directory, format!("{prefix}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    Ok(Some(
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_span_events(span_events(config))
            .json()
            .with_writer(writer)
            .boxed(),
    ))
}

/// Install the global subscriber for an agent process.
///
/// `EDGE_AGENT_LOG` wins over `RUST_LOG`, which wins over [`default_directives`].
/// Calling this twice keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let mut guards = Vec::new();
    let file = file_layer(service_name, config, &mut guards)?;
    let stdout = stdout_layer(config, &mut guards);

    let installed = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stdout)
        .with(file)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set(guards);
        info!(
            service = %service_name,
            format = ?config.format,
            file = config.file,
            span_timings = config.span_timings,
            "tracing initialised"
        );
    }
    Ok(())
}

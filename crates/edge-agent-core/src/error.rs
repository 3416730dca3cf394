//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use thiserror::Error;

/// Failures raised by restart-state persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("restart state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("restart state serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("restart state store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single lifecycle command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} failed: {reason}")]
    Failed { command: String, reason: String },
    #[error("{command} cancelled")]
    Cancelled { command: String },
}

impl CommandError {
    pub fn failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to snapshot the modules running on the device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("environment unavailable: {0}")]
    Unavailable(String),
    #[error("environment snapshot cancelled")]
    Cancelled,
}

/// Failure to deliver reported state. Always swallowed by the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("state sink rejected patch: {0}")]
    Rejected(String),
    #[error("state sink unreachable: {0}")]
    Unreachable(String),
}

/// Errors surfaced to callers of a reconciliation cycle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("{} module chain(s) failed: {}", .failures.len(), join_failures(.failures))]
    ChainsFailed {
        failures: Vec<(String, CommandError)>,
    },
}

fn join_failures(failures: &[(String, CommandError)]) -> String {
    failures
        .iter()
        .map(|(module, err)| format!("{module}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_failed_lists_each_module() {
        let err = ReconcileError::ChainsFailed {
            failures: vec![
                ("a".into(), CommandError::failed("start module a", "boom")),
                ("b".into(), CommandError::Cancelled {
                    command: "stop module b".into(),
                }),
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 module chain(s) failed: a: start module a failed: boom; b: stop module b cancelled"
        );
    }
}

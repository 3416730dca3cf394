//! ---
//! ea_section: "03-operator-tooling"
//! ea_subsection: "binary"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Operator CLI for dry-running the edge agent planner."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use async_trait::async_trait;
use edge_agent_core::{CancellationToken, Command, CommandError, CommandExecutor};
use tracing::info;

/// Executor that only logs what it would do.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                command: command.describe(),
            });
        }
        info!(module = %command.module_name(), kind = %command.kind(), "dry run: {command}");
        Ok(())
    }
}

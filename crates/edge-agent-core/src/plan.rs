//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::command::{Command, CommandKind};

/// Why the planner produced a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChainReason {
    /// Module absent from the desired set.
    Remove,
    /// Module absent from the current set.
    Add,
    /// Configuration changed.
    Update,
    /// Desired status differs from the runtime status.
    DesiredStatus,
    /// Backoff elapsed for a crashed module.
    Restart,
    /// Agent shutting down.
    Shutdown,
}

/// Ordered commands for a single module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chain {
    module: String,
    reason: ChainReason,
    commands: Vec<Command>,
}

impl Chain {
    pub fn new(module: impl Into<String>, reason: ChainReason, commands: Vec<Command>) -> Self {
        Self {
            module: module.into(),
            reason,
            commands,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn reason(&self) -> ChainReason {
        self.reason
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.commands.iter().map(Command::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Independent per-module command chains, sorted by module name.
///
/// Chains may run concurrently; commands within a chain run in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    chains: Vec<Chain>,
}

impl Plan {
    /// Build a plan. Empty chains are dropped.
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        let mut chains: Vec<Chain> = chains.into_iter().filter(|c| !c.is_empty()).collect();
        chains.sort_by(|a, b| a.module.cmp(&b.module));
        Self { chains }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn chain(&self, module: &str) -> Option<&Chain> {
        self.chains.iter().find(|chain| chain.module == module)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Total number of commands across all chains.
    pub fn command_count(&self) -> usize {
        self.chains.iter().map(Chain::len).sum()
    }
}

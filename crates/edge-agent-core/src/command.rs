//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Lifecycle commands as plain data.
//!
//! The planner only builds [`Command`] values. A [`CommandExecutor`] supplied by
//! the runtime adapter interprets them, which keeps planning free of I/O.

use async_trait::async_trait;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;
use crate::module::{Module, ModuleIdentity, RuntimeInfo};

/// Discriminant of a [`Command`], used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandKind {
    Pull,
    Create,
    Update,
    Remove,
    Start,
    Stop,
}

/// A single lifecycle operation against one module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Command {
    Pull {
        module: Module,
    },
    Create {
        module: Module,
        identity: ModuleIdentity,
        runtime: RuntimeInfo,
    },
    Update {
        current: Module,
        desired: Module,
        identity: ModuleIdentity,
        runtime: RuntimeInfo,
    },
    Remove {
        module: Module,
    },
    Start {
        module: Module,
    },
    Stop {
        module: Module,
    },
}

impl Command {
    pub fn pull(module: &Module) -> Self {
        Command::Pull {
            module: module.clone(),
        }
    }

    pub fn create(module: &Module, identity: &ModuleIdentity, runtime: &RuntimeInfo) -> Self {
        Command::Create {
            module: module.clone(),
            identity: identity.clone(),
            runtime: runtime.clone(),
        }
    }

    pub fn update(
        current: &Module,
        desired: &Module,
        identity: &ModuleIdentity,
        runtime: &RuntimeInfo,
    ) -> Self {
        Command::Update {
            current: current.clone(),
            desired: desired.clone(),
            identity: identity.clone(),
            runtime: runtime.clone(),
        }
    }

    pub fn remove(module: &Module) -> Self {
        Command::Remove {
            module: module.clone(),
        }
    }

    pub fn start(module: &Module) -> Self {
        Command::Start {
            module: module.clone(),
        }
    }

    pub fn stop(module: &Module) -> Self {
        Command::Stop {
            module: module.clone(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Pull { .. } => CommandKind::Pull,
            Command::Create { .. } => CommandKind::Create,
            Command::Update { .. } => CommandKind::Update,
            Command::Remove { .. } => CommandKind::Remove,
            Command::Start { .. } => CommandKind::Start,
            Command::Stop { .. } => CommandKind::Stop,
        }
    }

    /// The module this command acts on. For updates, the desired module.
    pub fn module(&self) -> &Module {
        match self {
            Command::Pull { module }
            | Command::Create { module, .. }
            | Command::Remove { module }
            | Command::Start { module }
            | Command::Stop { module } => module,
            Command::Update { desired, .. } => desired,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module().name
    }

    /// Human readable summary, e.g. `update module tempSensor (sensor:1.0 -> sensor:1.1)`.
    pub fn describe(&self) -> String {
        match self {
            Command::Pull { module } => {
                format!("pull image {} for module {}", module.config.image, module.name)
            }
            Command::Update {
                current, desired, ..
            } => format!(
                "update module {} ({} -> {})",
                desired.name, current.config.image, desired.config.image
            ),
            other => format!("{} module {}", other.kind(), other.module_name()),
        }
    }

    /// Command that reverts this one, if the operation can be reverted.
    pub fn inverse(&self) -> Option<Command> {
        match self {
            Command::Create { module, .. } => Some(Command::remove(module)),
            Command::Start { module } => Some(Command::stop(module)),
            Command::Stop { module } => Some(Command::start(module)),
            Command::Update {
                current,
                desired,
                identity,
                runtime,
            } => Some(Command::update(desired, current, identity, runtime)),
            Command::Pull { .. } | Command::Remove { .. } => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Interprets commands against the container runtime.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError>;

    /// Revert a previously executed command. Irreversible commands are a no-op.
    async fn undo(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        match command.inverse() {
            Some(inverse) => self.execute(&inverse, cancel).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<E> CommandExecutor for std::sync::Arc<E>
where
    E: CommandExecutor + ?Sized,
{
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        (**self).execute(command, cancel).await
    }

    async fn undo(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        (**self).undo(command, cancel).await
    }
}

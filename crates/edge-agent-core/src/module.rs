//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Value types describing workload modules.
//!
//! A [`Module`] is the desired-state record produced from a deployment. When a
//! module comes from a runtime snapshot it also carries a [`RuntimeObservation`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Lifecycle state requested by the deployment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DesiredStatus {
    #[default]
    Running,
    Stopped,
}

/// Lifecycle state reported by the runtime adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuntimeStatus {
    Running,
    Backoff,
    Unhealthy,
    Stopped,
    Failed,
}

impl RuntimeStatus {
    /// Whether the runtime still holds the module in an active state that a stop must end.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RuntimeStatus::Running | RuntimeStatus::Backoff | RuntimeStatus::Unhealthy
        )
    }
}

/// When a module is restarted after it has been started at least once.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    OnUnhealthy,
    #[default]
    Always,
}

/// Whether the image is pulled before the module container is created or updated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ImagePullPolicy {
    #[default]
    OnCreate,
    Never,
}

/// Provenance of the deployment manifest a module was read from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    #[serde(default)]
    pub id: String,
}

/// Runtime configuration of a module. Compared by value to detect redeploys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub image: String,
    #[serde(default)]
    pub create_options: serde_json::Value,
}

impl ModuleConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            create_options: serde_json::Value::Null,
        }
    }

    pub fn with_create_options(mut self, options: serde_json::Value) -> Self {
        self.create_options = options;
        self
    }
}

/// Observed runtime state attached to modules read from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeObservation {
    pub runtime_status: RuntimeStatus,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub status_description: Option<String>,
    /// `None` means the module has never been started.
    #[serde(default)]
    pub last_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub last_restart_time: Option<DateTime<Utc>>,
}

impl RuntimeObservation {
    pub fn new(runtime_status: RuntimeStatus) -> Self {
        Self {
            runtime_status,
            exit_code: None,
            status_description: None,
            last_start_time: None,
            last_exit_time: None,
            restart_count: 0,
            last_restart_time: None,
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_start_time = Some(at);
        self
    }

    pub fn exited_at(mut self, at: DateTime<Utc>, exit_code: i64) -> Self {
        self.last_exit_time = Some(at);
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_restart_count(mut self, restart_count: u32) -> Self {
        self.restart_count = restart_count;
        self
    }

    pub fn has_started(&self) -> bool {
        self.last_start_time.is_some()
    }
}

/// A workload module. Immutable once built; replaced wholesale on redeploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default = "default_module_type")]
    pub module_type: String,
    #[serde(default)]
    pub desired_status: DesiredStatus,
    pub config: ModuleConfig,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub image_pull_policy: ImagePullPolicy,
    #[serde(default)]
    pub configuration_info: ConfigurationInfo,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeObservation>,
}

fn default_module_type() -> String {
    "docker".to_owned()
}

impl Module {
    pub fn new(name: impl Into<String>, config: ModuleConfig) -> Self {
        Self {
            name: name.into(),
            version: "1.0".to_owned(),
            module_type: default_module_type(),
            desired_status: DesiredStatus::Running,
            config,
            restart_policy: RestartPolicy::default(),
            image_pull_policy: ImagePullPolicy::default(),
            configuration_info: ConfigurationInfo::default(),
            env: BTreeMap::new(),
            runtime: None,
        }
    }

    pub fn with_desired_status(mut self, status: DesiredStatus) -> Self {
        self.desired_status = status;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn with_image_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.image_pull_policy = policy;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeObservation) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn has_runtime_info(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn runtime_status(&self) -> Option<RuntimeStatus> {
        self.runtime.as_ref().map(|runtime| runtime.runtime_status)
    }

    /// Two modules describe the same deployment when their configurations are equal.
    pub fn same_config(&self, other: &Module) -> bool {
        self.config == other.config
    }

    /// Reasons this module cannot be planned, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("module name is empty".to_owned());
        }
        if self.config.image.trim().is_empty() {
            return Err(format!("module {} has no image", self.name));
        }
        Ok(())
    }
}

/// Credentials issued to a module by the identity lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub module_id: String,
    #[serde(default)]
    pub generation_id: String,
    pub credentials: String,
}

impl ModuleIdentity {
    pub fn new(module_id: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            generation_id: String::new(),
            credentials: credentials.into(),
        }
    }
}

/// Module name to identity.
pub type ModuleIdentities = BTreeMap<String, ModuleIdentity>;

/// Settings of the container runtime, passed through to create and update commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    #[serde(rename = "type")]
    pub runtime_type: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self {
            runtime_type: default_module_type(),
            settings: serde_json::Value::Null,
        }
    }
}

//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
//! Seams towards the container runtime and the reported-state channel.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{EnvironmentError, ReportError};
use crate::module::Module;
use crate::module_set::{Diff, ModuleSet};

/// Source of the module set currently present on the device.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn get_modules(&self, cancel: &CancellationToken) -> Result<ModuleSet, EnvironmentError>;
}

/// Destination for reported-state patches.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn report(&self, patch: StatePatch) -> Result<(), ReportError>;
}

/// Changes between two environment snapshots.
///
/// `updated` holds added and changed modules; `removed` the names that vanished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub updated: BTreeMap<String, Module>,
    pub removed: BTreeSet<String>,
}

impl StatePatch {
    /// Build a patch from `before` to `after`, comparing modules field by field
    /// so that runtime status changes are reported too.
    pub fn between(before: &ModuleSet, after: &ModuleSet) -> Self {
        Self::from_diff(Diff::compute_with(after, before, |a, b| a == b))
    }

    pub fn from_diff(diff: Diff) -> Self {
        let updated = diff
            .added
            .into_iter()
            .chain(diff.updated)
            .map(|module| (module.name.clone(), module))
            .collect();
        Self {
            updated,
            removed: diff.removed.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }

    /// Merge-patch document: `{"modules": {name: module | null}}`.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut modules = Map::new();
        for (name, module) in &self.updated {
            modules.insert(name.clone(), serde_json::to_value(module)?);
        }
        for name in &self.removed {
            modules.insert(name.clone(), Value::Null);
        }
        let mut root = Map::new();
        root.insert("modules".to_owned(), Value::Object(modules));
        Ok(Value::Object(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleConfig, RuntimeObservation, RuntimeStatus};

    #[test]
    fn patch_reports_status_changes_and_removals() {
        let running = Module::new("a", ModuleConfig::new("img"))
            .with_runtime(RuntimeObservation::new(RuntimeStatus::Running));
        let before = ModuleSet::new(vec![
            running.clone(),
            Module::new("gone", ModuleConfig::new("img")),
        ])
        .unwrap();
        let after = ModuleSet::new(vec![running
            .clone()
            .with_runtime(RuntimeObservation::new(RuntimeStatus::Stopped))])
        .unwrap();

        let patch = StatePatch::between(&before, &after);
        assert_eq!(patch.updated.len(), 1);
        assert_eq!(
            patch.updated["a"].runtime_status(),
            Some(RuntimeStatus::Stopped)
        );
        assert!(patch.removed.contains("gone"));

        let json = patch.to_json().unwrap();
        assert!(json["modules"]["gone"].is_null());
        assert_eq!(json["modules"]["a"]["name"], "a");
    }

    #[test]
    fn identical_snapshots_yield_empty_patch() {
        let set = ModuleSet::new(vec![Module::new("a", ModuleConfig::new("img"))]).unwrap();
        assert!(StatePatch::between(&set, &set).is_empty());
    }
}

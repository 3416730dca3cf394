//! ---
//! ea_section: "02-reconciliation"
//! ea_subsection: "module"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Reconciliation planner and restart-policy scheduler."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::Module;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleSetError {
    #[error("duplicate module name {0}")]
    DuplicateName(String),
}

/// Immutable, name-keyed collection of modules.
///
/// Backed by a sorted map so iteration, diffing, and planning are deterministic.
/// Cloning is cheap and the set can be shared freely across tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Module>", into = "Vec<Module>")]
pub struct ModuleSet {
    modules: Arc<BTreeMap<String, Module>>,
}

impl ModuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate names.
    pub fn new(modules: impl IntoIterator<Item = Module>) -> Result<Self, ModuleSetError> {
        let mut map = BTreeMap::new();
        for module in modules {
            if map.contains_key(&module.name) {
                return Err(ModuleSetError::DuplicateName(module.name));
            }
            map.insert(module.name.clone(), module);
        }
        Ok(Self {
            modules: Arc::new(map),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Diff `self` as the desired set against `current`, comparing configurations.
    pub fn diff(&self, current: &ModuleSet) -> Diff {
        Diff::compute(self, current)
    }
}

impl TryFrom<Vec<Module>> for ModuleSet {
    type Error = ModuleSetError;

    fn try_from(modules: Vec<Module>) -> Result<Self, Self::Error> {
        Self::new(modules)
    }
}

impl From<ModuleSet> for Vec<Module> {
    fn from(set: ModuleSet) -> Self {
        set.modules.values().cloned().collect()
    }
}

/// Partition of two module sets. Every list is sorted by module name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diff {
    /// Present in desired, absent in current.
    pub added: Vec<Module>,
    /// Present in both with a changed configuration, holding the desired value.
    pub updated: Vec<Module>,
    /// Names present in current, absent in desired.
    pub removed: Vec<String>,
}

impl Diff {
    /// Config-based diff used for planning.
    pub fn compute(desired: &ModuleSet, current: &ModuleSet) -> Self {
        Self::compute_with(desired, current, Module::same_config)
    }

    /// Diff with a caller-supplied notion of "unchanged".
    pub fn compute_with<F>(desired: &ModuleSet, current: &ModuleSet, unchanged: F) -> Self
    where
        F: Fn(&Module, &Module) -> bool,
    {
        let mut diff = Diff::default();
        for module in desired.iter() {
            match current.get(&module.name) {
                None => diff.added.push(module.clone()),
                Some(existing) if !unchanged(module, existing) => {
                    diff.updated.push(module.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = current
            .names()
            .filter(|name| !desired.contains(name))
            .map(str::to_owned)
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{DesiredStatus, ModuleConfig, RuntimeObservation, RuntimeStatus};

    fn module(name: &str, image: &str) -> Module {
        Module::new(name, ModuleConfig::new(image))
    }

    fn set(modules: Vec<Module>) -> ModuleSet {
        ModuleSet::new(modules).unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ModuleSet::new(vec![module("a", "x"), module("a", "y")]).unwrap_err();
        assert_eq!(err, ModuleSetError::DuplicateName("a".into()));
    }

    #[test]
    fn diff_with_self_is_empty() {
        let desired = set(vec![module("a", "x"), module("b", "y")]);
        assert!(desired.diff(&desired).is_empty());
        assert!(ModuleSet::empty().diff(&ModuleSet::empty()).is_empty());
    }

    #[test]
    fn diff_partitions_added_updated_removed() {
        let desired = set(vec![module("a", "x:2"), module("b", "y"), module("c", "z")]);
        let current = set(vec![module("a", "x:1"), module("b", "y"), module("d", "w")]);

        let diff = desired.diff(&current);
        assert_eq!(diff.added, vec![module("c", "z")]);
        assert_eq!(diff.updated, vec![module("a", "x:2")]);
        assert_eq!(diff.removed, vec!["d".to_owned()]);
    }

    #[test]
    fn status_and_runtime_changes_are_not_updates() {
        let desired = set(vec![module("a", "x").with_desired_status(DesiredStatus::Stopped)]);
        let current = set(vec![
            module("a", "x").with_runtime(RuntimeObservation::new(RuntimeStatus::Running))
        ]);
        assert!(desired.diff(&current).is_empty());
    }

    #[test]
    fn diff_is_insensitive_to_insertion_order() {
        let a = set(vec![module("a", "1"), module("b", "2")]);
        let b = set(vec![module("b", "2"), module("a", "1")]);
        let current = set(vec![module("c", "3")]);
        assert_eq!(a.diff(&current), b.diff(&current));
        assert_eq!(a, b);
    }

    #[test]
    fn custom_equality_detects_status_changes() {
        let before = set(vec![
            module("a", "x").with_runtime(RuntimeObservation::new(RuntimeStatus::Running))
        ]);
        let after = set(vec![
            module("a", "x").with_runtime(RuntimeObservation::new(RuntimeStatus::Stopped))
        ]);
        let diff = Diff::compute_with(&after, &before, |a, b| a == b);
        assert_eq!(diff.updated.len(), 1);
        assert!(after.diff(&before).is_empty());
    }

    #[test]
    fn json_round_trip_rejects_duplicates() {
        let json = serde_json::json!([
            { "name": "a", "config": { "image": "x" } },
            { "name": "a", "config": { "image": "y" } }
        ]);
        assert!(serde_json::from_value::<ModuleSet>(json).is_err());
    }
}

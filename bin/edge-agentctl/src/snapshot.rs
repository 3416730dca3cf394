//! ---
//! ea_section: "03-operator-tooling"
//! ea_subsection: "binary"
//! ea_type: "source"
//! ea_scope: "code"
//! ea_description: "Operator CLI for dry-running the edge agent planner."
//! ea_version: "v0.0.0-prealpha"
//! ea_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use edge_agent_core::{ModuleIdentities, ModuleIdentity, ModuleSet, RuntimeInfo};
use serde::de::DeserializeOwned;
use tracing::debug;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read {what} file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {what} file {}", path.display()))
}

/// Module set stored as a JSON array of modules.
pub fn load_modules(path: &Path) -> Result<ModuleSet> {
    let modules: ModuleSet = read_json(path, "module set")?;
    debug!(path = %path.display(), modules = modules.len(), "module set loaded");
    Ok(modules)
}

pub fn load_runtime_info(path: Option<&Path>) -> Result<RuntimeInfo> {
    match path {
        Some(path) => read_json(path, "runtime info"),
        None => Ok(RuntimeInfo::default()),
    }
}

/// Identities from a JSON object keyed by module name. Without a file every
/// desired module gets a placeholder identity so the plan can be inspected.
pub fn load_identities(path: Option<&Path>, desired: &ModuleSet) -> Result<ModuleIdentities> {
    match path {
        Some(path) => read_json(path, "identities"),
        None => Ok(desired
            .names()
            .map(|name| (name.to_owned(), ModuleIdentity::new(name, "")))
            .collect()),
    }
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid RFC 3339 timestamp {value:?}"))?;
    Ok(parsed.with_timezone(&Utc))
}

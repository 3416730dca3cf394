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
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Restart bookkeeping persisted per module name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestartState {
    pub restart_count: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
}

/// Key-value persistence for restart bookkeeping, keyed by module name.
pub trait RestartStateStore: Send + Sync + Debug {
    fn contains(&self, name: &str) -> Result<bool, StoreError>;

    fn get(&self, name: &str) -> Result<Option<RestartState>, StoreError>;

    fn put(&self, name: &str, state: RestartState) -> Result<(), StoreError>;

    fn remove(&self, name: &str) -> Result<(), StoreError>;

    /// Read-modify-write the entry for `name` atomically with respect to other callers.
    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(Option<RestartState>) -> RestartState,
    ) -> Result<RestartState, StoreError>;
}

/// Volatile store used when no state path is configured.
#[derive(Debug, Default)]
pub struct InMemoryRestartStateStore {
    entries: Mutex<BTreeMap<String, RestartState>>,
}

impl InMemoryRestartStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RestartStateStore for InMemoryRestartStateStore {
    fn contains(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().contains_key(name))
    }

    fn get(&self, name: &str) -> Result<Option<RestartState>, StoreError> {
        Ok(self.entries.lock().get(name).copied())
    }

    fn put(&self, name: &str, state: RestartState) -> Result<(), StoreError> {
        self.entries.lock().insert(name.to_owned(), state);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(name);
        Ok(())
    }

    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(Option<RestartState>) -> RestartState,
    ) -> Result<RestartState, StoreError> {
        let mut entries = self.entries.lock();
        let next = apply(entries.get(name).copied());
        entries.insert(name.to_owned(), next);
        Ok(next)
    }
}

/// JSON-file backed store. The whole document is rewritten through a temporary
/// file and renamed into place on every mutation.
#[derive(Debug)]
pub struct FileRestartStateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, RestartState>>,
}

impl FileRestartStateStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "restart state store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, RestartState>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, entries)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RestartStateStore for FileRestartStateStore {
    fn contains(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().contains_key(name))
    }

    fn get(&self, name: &str) -> Result<Option<RestartState>, StoreError> {
        Ok(self.entries.lock().get(name).copied())
    }

    fn put(&self, name: &str, state: RestartState) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(name.to_owned(), state);
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(name.to_owned(), previous),
                None => entries.remove(name),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let Some(previous) = entries.remove(name) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries) {
            entries.insert(name.to_owned(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(Option<RestartState>) -> RestartState,
    ) -> Result<RestartState, StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.get(name).copied();
        let next = apply(previous);
        entries.insert(name.to_owned(), next);
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(name.to_owned(), previous),
                None => entries.remove(name),
            };
            return Err(err);
        }
        Ok(next)
    }
}

//! Nameservice contract and the in-process implementations.
//!
//! The nameservice persists virtual-graph records and owns the artifact
//! prefix `virtual-graphs/<alias>/`. Production deployments plug in their
//! own backend; [`MemoryNameservice`] serves tests and embedded use,
//! [`DirNameservice`] persists JSON records in a directory tree.

use crate::error::{VgError, VgResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// A published virtual-graph record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VgRecord {
    #[serde(rename = "vg-name")]
    pub vg_name: String,
    #[serde(rename = "vg-type")]
    pub vg_type: String,
    /// type-specific configuration; may be stored as a JSON string payload
    pub config: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Storage contract for virtual-graph records and artifacts
pub trait Nameservice: Send + Sync {
    /// Publish a new record; fails with `AlreadyExists` for a known alias
    fn publish(&self, record: &VgRecord) -> VgResult<()>;

    fn lookup(&self, alias: &str) -> VgResult<Option<VgRecord>>;

    /// Remove a record; absent aliases are not an error
    fn retract(&self, alias: &str) -> VgResult<()>;

    fn list(&self) -> VgResult<Vec<String>>;

    /// Does a source ledger exist under this alias?
    fn has_ledger(&self, alias: &str) -> VgResult<bool>;

    /// Best-effort recursive deletion of `virtual-graphs/<alias>/`;
    /// backends that cannot list recursively skip with a warning
    fn delete_artifacts(&self, alias: &str) -> VgResult<()>;
}

/// In-memory nameservice for tests and embedded use
#[derive(Default)]
pub struct MemoryNameservice {
    records: Mutex<HashMap<String, VgRecord>>,
    ledgers: Mutex<HashSet<String>>,
}

impl MemoryNameservice {
    pub fn new() -> Self {
        MemoryNameservice::default()
    }

    /// Test helper: make a source ledger visible to dependency checks
    pub fn register_ledger(&self, alias: &str) {
        self.ledgers.lock().insert(alias.to_string());
    }
}

impl Nameservice for MemoryNameservice {
    fn publish(&self, record: &VgRecord) -> VgResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&record.vg_name) {
            return Err(VgError::AlreadyExists(record.vg_name.clone()));
        }
        records.insert(record.vg_name.clone(), record.clone());
        Ok(())
    }

    fn lookup(&self, alias: &str) -> VgResult<Option<VgRecord>> {
        Ok(self.records.lock().get(alias).cloned())
    }

    fn retract(&self, alias: &str) -> VgResult<()> {
        self.records.lock().remove(alias);
        Ok(())
    }

    fn list(&self) -> VgResult<Vec<String>> {
        let mut names: Vec<String> = self.records.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn has_ledger(&self, alias: &str) -> VgResult<bool> {
        Ok(self.ledgers.lock().contains(alias))
    }

    fn delete_artifacts(&self, _alias: &str) -> VgResult<()> {
        Ok(())
    }
}

/// Directory-backed nameservice: one JSON record per virtual graph under
/// `<root>/virtual-graphs/<alias>/record.json`, ledgers as directories
/// under `<root>/ledgers/`.
pub struct DirNameservice {
    root: PathBuf,
}

impl DirNameservice {
    pub fn new(root: impl Into<PathBuf>) -> VgResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("virtual-graphs"))?;
        fs::create_dir_all(root.join("ledgers"))?;
        Ok(DirNameservice { root })
    }

    fn vg_dir(&self, alias: &str) -> PathBuf {
        self.root.join("virtual-graphs").join(alias)
    }

    fn record_path(&self, alias: &str) -> PathBuf {
        self.vg_dir(alias).join("record.json")
    }

    /// Test helper: make a source ledger visible to dependency checks
    pub fn register_ledger(&self, alias: &str) -> VgResult<()> {
        fs::create_dir_all(self.root.join("ledgers").join(alias))?;
        Ok(())
    }
}

impl Nameservice for DirNameservice {
    fn publish(&self, record: &VgRecord) -> VgResult<()> {
        let path = self.record_path(&record.vg_name);
        if path.exists() {
            return Err(VgError::AlreadyExists(record.vg_name.clone()));
        }
        fs::create_dir_all(self.vg_dir(&record.vg_name))?;
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, record)?;
        Ok(())
    }

    fn lookup(&self, alias: &str) -> VgResult<Option<VgRecord>> {
        let path = self.record_path(alias);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path)?;
        Ok(Some(serde_json::from_reader(file)?))
    }

    fn retract(&self, alias: &str) -> VgResult<()> {
        let path = self.record_path(alias);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list(&self) -> VgResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join("virtual-graphs"))? {
            let entry = entry?;
            if entry.path().join("record.json").exists() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn has_ledger(&self, alias: &str) -> VgResult<bool> {
        Ok(self.root.join("ledgers").join(alias).exists())
    }

    fn delete_artifacts(&self, alias: &str) -> VgResult<()> {
        let dir = self.vg_dir(alias);
        if !dir.exists() {
            return Ok(());
        }
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(alias, error = %e, "skipping artifact cleanup");
        }
        Ok(())
    }
}

//! # VG Registry & Lifecycle
//!
//! Validates and persists virtual-graph definitions, loads them lazily on
//! first query reference, and drops them with best-effort artifact
//! cleanup. Create/drop serialize on a single lock; loaded graphs are
//! read lock-free from a concurrent map.

pub mod alias;
pub mod nameservice;

pub use alias::{normalize_alias, parse_query_alias, ParsedAlias, DEFAULT_BRANCH};
pub use nameservice::{DirNameservice, MemoryNameservice, Nameservice, VgRecord};

use crate::error::{VgError, VgResult};
use crate::vg::{Bm25Config, Bm25Graph, GraphSettings, IcebergConfig, IcebergDatabase, VgType, VirtualGraph};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A create request as submitted by the caller
#[derive(Debug, Clone)]
pub struct CreateVg {
    pub name: String,
    pub vg_type: String,
    pub config: serde_json::Value,
    pub dependencies: Vec<String>,
}

/// What `create` returns: the normalized identity of the new graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgDescriptor {
    pub alias: String,
    pub vg_type: VgType,
    pub dependencies: Vec<String>,
}

/// Outcome of `drop_vg`; dropping an absent graph also succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
}

/// Process-wide virtual-graph registry
pub struct VgRegistry {
    ns: Arc<dyn Nameservice>,
    loaded: DashMap<String, Arc<VirtualGraph>>,
    /// ledger alias → virtual graphs subscribed to its changes
    subscriptions: DashMap<String, Vec<String>>,
    settings: GraphSettings,
    /// serializes create/drop; loads and reads stay lock-free
    create_lock: Mutex<()>,
}

impl VgRegistry {
    pub fn new(ns: Arc<dyn Nameservice>, settings: GraphSettings) -> Self {
        VgRegistry {
            ns,
            loaded: DashMap::new(),
            subscriptions: DashMap::new(),
            settings,
            create_lock: Mutex::new(()),
        }
    }

    /// Validate and persist a virtual-graph definition.
    ///
    /// Stateful types (BM25) initialize eagerly and subscribe to their
    /// source ledgers; tabular types construct lazily on first query.
    pub fn create(&self, req: CreateVg) -> VgResult<VgDescriptor> {
        let _guard = self.create_lock.lock();

        let alias = normalize_alias(&req.name)?;
        let vg_type = VgType::parse(&req.vg_type).ok_or_else(|| VgError::InvalidConfig {
            field: "type".to_string(),
            reason: format!("unknown virtual-graph type '{}'", req.vg_type),
        })?;

        let dependencies = req
            .dependencies
            .iter()
            .map(|d| normalize_alias(d))
            .collect::<VgResult<Vec<_>>>()?;

        self.validate_config(vg_type, &req.config, &dependencies, &alias)?;

        if self.ns.lookup(&alias)?.is_some() {
            return Err(VgError::AlreadyExists(alias));
        }
        for dependency in &dependencies {
            if !self.ns.has_ledger(dependency)? {
                return Err(VgError::MissingDependency {
                    vg: alias.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let record = VgRecord {
            vg_name: alias.clone(),
            vg_type: vg_type.as_str().to_string(),
            config: req.config,
            dependencies: dependencies.clone(),
        };
        self.ns.publish(&record)?;
        info!(alias = %alias, vg_type = %vg_type, "created virtual graph");

        if vg_type.is_stateful() {
            let vg = Arc::new(self.construct(&record)?);
            vg.initialize()?;
            for dependency in &dependencies {
                self.subscriptions
                    .entry(dependency.clone())
                    .or_default()
                    .push(alias.clone());
            }
            self.loaded.insert(alias.clone(), vg);
        }

        Ok(VgDescriptor {
            alias,
            vg_type,
            dependencies,
        })
    }

    fn validate_config(
        &self,
        vg_type: VgType,
        config: &serde_json::Value,
        dependencies: &[String],
        alias: &str,
    ) -> VgResult<()> {
        match vg_type {
            VgType::Bm25 => {
                if dependencies.len() != 1 {
                    return Err(VgError::InvalidConfig {
                        field: "dependencies".to_string(),
                        reason: format!(
                            "bm25 requires exactly one source ledger, found {} for '{alias}'",
                            dependencies.len()
                        ),
                    });
                }
                Bm25Config::deserialize_value(config)?;
                Ok(())
            }
            VgType::Iceberg => parse_iceberg_config(config)?.validate(false),
            VgType::R2rml => parse_iceberg_config(config)?.validate(true),
        }
    }

    /// Drop a virtual graph and its artifacts. Idempotent: dropping an
    /// absent alias still returns `Dropped`.
    pub fn drop_vg(&self, name: &str) -> VgResult<DropOutcome> {
        let _guard = self.create_lock.lock();
        let alias = normalize_alias(name)?;

        if let Some((_, vg)) = self.loaded.remove(&alias) {
            vg.close()?;
        }
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().retain(|a| a != &alias);
        }

        self.ns.retract(&alias)?;
        self.ns.delete_artifacts(&alias)?;
        info!(alias = %alias, "dropped virtual graph");
        Ok(DropOutcome::Dropped)
    }

    /// Fetch a loaded graph, or construct it from its nameservice record
    pub fn load(&self, name: &str) -> VgResult<Arc<VirtualGraph>> {
        let alias = normalize_alias(name)?;
        if let Some(vg) = self.loaded.get(&alias) {
            return Ok(Arc::clone(vg.value()));
        }

        let record = self
            .ns
            .lookup(&alias)?
            .ok_or_else(|| VgError::NotFound(alias.clone()))?;
        // a dependency gone missing fails this query but leaves the
        // record registered
        for dependency in &record.dependencies {
            if !self.ns.has_ledger(dependency)? {
                return Err(VgError::MissingDependency {
                    vg: alias.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        debug!(alias = %alias, "loading virtual graph");
        let vg = Arc::new(self.construct(&record)?);
        vg.initialize()?;
        self.loaded.insert(alias.clone(), Arc::clone(&vg));
        Ok(vg)
    }

    /// Resolve a query-time alias (`FROM` clause), applying any
    /// `@t:`/`@iso:` time-travel suffix.
    pub fn resolve(&self, query_alias: &str) -> VgResult<Arc<VirtualGraph>> {
        let parsed = parse_query_alias(query_alias)?;
        let vg = self.load(&parsed.normalized())?;
        match parsed.t {
            Some(t) => Ok(Arc::new(vg.with_time_travel(t)?)),
            None => Ok(vg),
        }
    }

    pub fn list(&self) -> VgResult<Vec<String>> {
        self.ns.list()
    }

    /// Propagate a source-ledger change to subscribed (stateful) graphs
    pub fn notify_ledger_change(&self, ledger: &str) -> VgResult<()> {
        let ledger = normalize_alias(ledger)?;
        let Some(subscribers) = self.subscriptions.get(&ledger) else {
            return Ok(());
        };
        for alias in subscribers.value() {
            if let Some(vg) = self.loaded.get(alias) {
                vg.upsert()?;
            }
        }
        Ok(())
    }

    fn construct(&self, record: &VgRecord) -> VgResult<VirtualGraph> {
        let vg_type = VgType::parse(&record.vg_type).ok_or_else(|| VgError::InvalidConfig {
            field: "type".to_string(),
            reason: format!("unknown virtual-graph type '{}'", record.vg_type),
        })?;

        match vg_type {
            VgType::Bm25 => {
                let config = Bm25Config::deserialize_value(&record.config)?;
                let ledger = record.dependencies.first().cloned().ok_or_else(|| {
                    VgError::InvalidConfig {
                        field: "dependencies".to_string(),
                        reason: "bm25 record has no source ledger".to_string(),
                    }
                })?;
                Ok(VirtualGraph::Bm25(Bm25Graph::new(
                    record.vg_name.clone(),
                    ledger,
                    config,
                )))
            }
            VgType::Iceberg => {
                let config = parse_iceberg_config(&record.config)?;
                let db =
                    IcebergDatabase::open(record.vg_name.clone(), &config, self.settings.clone())?;
                Ok(VirtualGraph::Iceberg(db))
            }
            VgType::R2rml => {
                let config = parse_iceberg_config(&record.config)?;
                let db =
                    IcebergDatabase::open(record.vg_name.clone(), &config, self.settings.clone())?;
                Ok(VirtualGraph::R2rml(db))
            }
        }
    }
}

/// Config payloads may arrive as a JSON object or as a string-encoded
/// JSON document (older nameservice records)
fn parse_iceberg_config(value: &serde_json::Value) -> VgResult<IcebergConfig> {
    let value = unwrap_string_payload(value)?;
    Ok(serde_json::from_value(value)?)
}

fn unwrap_string_payload(value: &serde_json::Value) -> VgResult<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => Ok(serde_json::from_str(s)?),
        other => Ok(other.clone()),
    }
}

impl Bm25Config {
    fn deserialize_value(value: &serde_json::Value) -> VgResult<Bm25Config> {
        let value = unwrap_string_payload(value)?;
        Ok(serde_json::from_value(value)?)
    }
}

//! Iceberg-backed virtual graph.
//!
//! An `IcebergDatabase` owns its source adapters, parsed mappings,
//! routing index, and join graph; query execution borrows them read-only.
//! Per-query state (the planner's [`QueryContext`]) lives in an atomic
//! slot: `reorder` resets and republishes it, `finalize` swaps it out
//! exactly once. Slots are never shared across queries.

use crate::error::{VgError, VgResult};
use crate::exec::{self, ExecOptions, GraphContext, IoPool, QueryDeadline, SolutionStream};
use crate::mapping::{parse_mapping, MappingSet};
use crate::planner::{Planner, QueryContext};
use crate::query::{SelectQuery, TriplePattern, WherePattern};
use crate::routing::{JoinGraph, RoutingIndex};
use crate::source::{
    FileTable, PushdownPredicate, ScanOptions, TableSchema, TableSource, TimeTravel,
    WarehouseTable,
};
use crate::term::Solution;
use arc_swap::ArcSwapOption;
use std::fmt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// REST catalog connection settings (registration contract; resolution is
/// delegated to the deployment's catalog connector)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestCatalogConfig {
    #[serde(rename = "type")]
    pub catalog_type: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, rename = "auth-token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, String>>,
}

/// Persisted configuration of an `iceberg` / `r2rml` virtual graph.
///
/// Exactly one of `warehouse-path`, `store`, or `catalog` selects the
/// backend; exactly one of `mapping` / `mappingInline` supplies the R2RML
/// document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcebergConfig {
    #[serde(default, rename = "warehouse-path", skip_serializing_if = "Option::is_none")]
    pub warehouse_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<RestCatalogConfig>,
    #[serde(default, rename = "metadata-location", skip_serializing_if = "Option::is_none")]
    pub metadata_location: Option<String>,
    /// plain-parquet data directory (`r2rml` virtual graphs)
    #[serde(default, rename = "data-dir", skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<PathBuf>,
    #[serde(default, rename = "mappingInline", skip_serializing_if = "Option::is_none")]
    pub mapping_inline: Option<String>,
}

impl IcebergConfig {
    /// Create-time validation of backend and mapping fields
    pub fn validate(&self, for_r2rml: bool) -> VgResult<()> {
        if for_r2rml {
            if self.data_dir.is_none() {
                return Err(VgError::InvalidConfig {
                    field: "data-dir".to_string(),
                    reason: "r2rml virtual graphs require a data directory".to_string(),
                });
            }
        } else {
            let backends = [
                self.warehouse_path.is_some(),
                self.store.is_some(),
                self.catalog.is_some(),
            ]
            .iter()
            .filter(|b| **b)
            .count();
            if backends != 1 {
                return Err(VgError::InvalidConfig {
                    field: "warehouse-path|store|catalog".to_string(),
                    reason: format!("exactly one backend must be set, found {backends}"),
                });
            }
        }
        match (&self.mapping, &self.mapping_inline) {
            (None, None) => Err(VgError::InvalidConfig {
                field: "mapping".to_string(),
                reason: "one of mapping or mappingInline is required".to_string(),
            }),
            (Some(_), Some(_)) => Err(VgError::InvalidConfig {
                field: "mapping".to_string(),
                reason: "mapping and mappingInline are mutually exclusive".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn mapping_text(&self) -> VgResult<String> {
        if let Some(inline) = &self.mapping_inline {
            return Ok(inline.clone());
        }
        if let Some(path) = &self.mapping {
            return Ok(std::fs::read_to_string(path)?);
        }
        Err(VgError::InvalidConfig {
            field: "mapping".to_string(),
            reason: "one of mapping or mappingInline is required".to_string(),
        })
    }
}

/// Runtime settings a virtual graph inherits from the engine configuration
#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub exec: ExecOptions,
    pub query_timeout: Option<Duration>,
    /// disable pushdown analysis (testing / benchmarking)
    pub pushdown: bool,
    /// blocking-I/O worker threads (minimum 2)
    pub io_threads: usize,
}

impl GraphSettings {
    pub fn standard() -> Self {
        GraphSettings {
            exec: ExecOptions::default(),
            query_timeout: Some(Duration::from_secs(60)),
            pushdown: true,
            io_threads: 2,
        }
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        GraphSettings::standard()
    }
}

/// A registered tabular virtual graph (backing for the `iceberg` and
/// `r2rml` types)
pub struct IcebergDatabase {
    // NOTE: Debug is implemented manually below (see impl fmt::Debug)
    // because several fields (trait objects, IoPool) are not Debug.
    alias: String,
    mappings: MappingSet,
    routing: RoutingIndex,
    join_graph: JoinGraph,
    sources: HashMap<String, Arc<dyn TableSource>>,
    schemas: HashMap<String, TableSchema>,
    settings: GraphSettings,
    time_travel: Option<TimeTravel>,
    io_pool: Arc<IoPool>,
    /// per-query slot: reset by `reorder`, consumed once by `finalize`
    slot: ArcSwapOption<QueryContext>,
}

impl fmt::Debug for IcebergDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcebergDatabase")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl IcebergDatabase {
    /// Construct from a validated config: parse the mapping, build the
    /// routing index and join graph, open one source per mapped table.
    pub fn open(alias: String, config: &IcebergConfig, settings: GraphSettings) -> VgResult<Self> {
        let mappings = parse_mapping(&config.mapping_text()?)?;
        let routing = RoutingIndex::build(&mappings);
        let join_graph = JoinGraph::from_mappings(&mappings)?;

        let mut sources: HashMap<String, Arc<dyn TableSource>> = HashMap::new();
        for table in mappings.keys() {
            let source: Arc<dyn TableSource> = if let Some(warehouse) = &config.warehouse_path {
                Arc::new(WarehouseTable::open(warehouse, table)?)
            } else if let Some(data_dir) = &config.data_dir {
                let file = data_dir.join(format!("{table}.parquet"));
                let path = if file.exists() {
                    file
                } else {
                    data_dir.join(table)
                };
                Arc::new(FileTable::open(table, &path)?)
            } else {
                return Err(VgError::InvalidConfig {
                    field: "warehouse-path".to_string(),
                    reason: "store and REST catalog backends require a catalog connector"
                        .to_string(),
                });
            };
            sources.insert(table.clone(), source);
        }

        let mut schemas = HashMap::new();
        for (table, source) in &sources {
            schemas.insert(table.clone(), source.get_schema(&ScanOptions::default())?);
        }

        let io_pool = Arc::new(IoPool::new(settings.io_threads));
        Ok(IcebergDatabase {
            alias,
            mappings,
            routing,
            join_graph,
            sources,
            schemas,
            settings,
            time_travel: None,
            io_pool,
            slot: ArcSwapOption::empty(),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn mappings(&self) -> &MappingSet {
        &self.mappings
    }

    pub fn join_graph(&self) -> &JoinGraph {
        &self.join_graph
    }

    pub fn routing(&self) -> &RoutingIndex {
        &self.routing
    }

    pub fn source(&self, table: &str) -> Option<&Arc<dyn TableSource>> {
        self.sources.get(table)
    }

    fn graph_context(&self) -> GraphContext<'_> {
        GraphContext {
            mappings: &self.mappings,
            routing: &self.routing,
            join_graph: &self.join_graph,
            sources: &self.sources,
            time_travel: self.time_travel,
        }
    }

    fn deadline(&self) -> QueryDeadline {
        QueryDeadline::new(self.settings.query_timeout)
    }

    /// Pin every scan of this database to a snapshot or instant.
    ///
    /// Validated eagerly through `get_statistics`: an unknown snapshot is
    /// a terminal `InvalidTimeTravel` before any row is scanned.
    pub fn with_time_travel(&self, t: TimeTravel) -> VgResult<IcebergDatabase> {
        let opts = ScanOptions {
            time_travel: Some(t),
            ..Default::default()
        };
        for source in self.sources.values() {
            source.get_statistics(&opts).map_err(|e| match e {
                VgError::InvalidTimeTravel { .. } => VgError::InvalidTimeTravel {
                    alias: self.alias.clone(),
                    requested: t.to_string(),
                },
                other => other,
            })?;
        }

        Ok(IcebergDatabase {
            alias: self.alias.clone(),
            mappings: self.mappings.clone(),
            routing: self.routing.clone(),
            join_graph: self.join_graph.clone(),
            sources: self.sources.clone(),
            schemas: self.schemas.clone(),
            settings: self.settings.clone(),
            time_travel: Some(t),
            io_pool: Arc::clone(&self.io_pool),
            slot: ArcSwapOption::empty(),
        })
    }

    /// Plan-time rewrite: resets the per-query slot, analyzes pushdown,
    /// captures modifiers/anti-joins/paths, republishes the context.
    pub fn reorder(&self, query: SelectQuery) -> VgResult<SelectQuery> {
        self.slot.store(None);
        let planner = Planner::new(&self.routing, &self.mappings, &self.schemas)
            .with_pushdown(self.settings.pushdown);
        let (rewritten, ctx) = planner.reorder(query)?;
        self.slot.store(Some(Arc::new(ctx)));
        Ok(rewritten)
    }

    /// Execute the reordered query. The slot is consumed exactly once;
    /// its contents are copied for the query's lifetime.
    pub fn finalize(&self, query: &SelectQuery) -> VgResult<Vec<Solution>> {
        let ctx = match self.slot.swap(None) {
            Some(ctx) => ctx,
            None => Arc::new(QueryContext::default()),
        };
        debug!(alias = %self.alias, pushdowns = ctx.pushdowns.len(), "finalize");
        exec::execute(
            &self.graph_context(),
            query,
            &ctx,
            &self.settings.exec,
            &self.deadline(),
        )
    }

    /// Reorder + finalize in one call
    pub fn query(&self, query: SelectQuery) -> VgResult<Vec<Solution>> {
        let rewritten = self.reorder(query)?;
        self.finalize(&rewritten)
    }

    /// Streaming finalize: the query runs on the blocking-I/O pool and
    /// solutions arrive over a bounded channel with a dedicated error
    /// channel beside it. Dropping the stream cancels the query.
    pub fn finalize_stream(&self, query: SelectQuery) -> SolutionStream {
        let ctx = match self.slot.swap(None) {
            Some(ctx) => ctx,
            None => Arc::new(QueryContext::default()),
        };
        let state = OwnedGraphState {
            mappings: self.mappings.clone(),
            routing: self.routing.clone(),
            join_graph: self.join_graph.clone(),
            sources: self.sources.clone(),
            time_travel: self.time_travel,
        };
        let exec_options = self.settings.exec.clone();
        let deadline = self.deadline();

        let worker_deadline = deadline.clone();
        SolutionStream::spawn_on(&self.io_pool, deadline, move |sink| {
            let solutions = exec::execute(
                &state.context(),
                &query,
                &ctx,
                &exec_options,
                &worker_deadline,
            )?;
            for solution in solutions {
                sink.send(solution)?;
            }
            Ok(())
        })
    }

    /// Match a single triple pattern
    pub fn match_triple(&self, pattern: TriplePattern) -> VgResult<Vec<Solution>> {
        let query = SelectQuery {
            patterns: vec![WherePattern::Triple(pattern)],
            ..Default::default()
        };
        let ctx = QueryContext::default();
        exec::execute(
            &self.graph_context(),
            &query,
            &ctx,
            &self.settings.exec,
            &self.deadline(),
        )
    }

    /// Match all instances of a class
    pub fn match_class(&self, class_iri: &str, var: &str) -> VgResult<Vec<Solution>> {
        let pattern = TriplePattern::new(
            crate::query::TermPattern::var(var),
            crate::query::TermPattern::iri(crate::query::RDF_TYPE),
            crate::query::TermPattern::iri(class_iri),
        );
        self.match_triple(pattern)
    }

    /// Routed plan as a debug structure (no rows are scanned)
    pub fn explain(&self, query: SelectQuery) -> VgResult<ExplainPlan> {
        let planner = Planner::new(&self.routing, &self.mappings, &self.schemas)
            .with_pushdown(self.settings.pushdown);
        let (rewritten, ctx) = planner.reorder(query)?;

        let triples: Vec<TriplePattern> = rewritten
            .patterns
            .iter()
            .filter_map(|p| match p {
                WherePattern::Triple(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        let gc = self.graph_context();
        let groups = exec::rowjoin::group_patterns(&gc, &triples)?;

        let mut report_groups = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut pushdowns: Vec<PushdownPredicate> = Vec::new();
            for pattern in &group.patterns {
                pushdowns.extend(ctx.pushdowns_for(pattern.id).iter().cloned());
            }
            report_groups.push(ExplainGroup {
                table: group.table.clone(),
                patterns: group.patterns.len(),
                pushdowns,
            });
        }

        let mut joins = Vec::new();
        for window in 1..groups.len() {
            let right = &groups[window];
            let edge = groups[..window]
                .iter()
                .find_map(|left| exec::rowjoin::traversed_edge(&gc, left, right));
            joins.push(match edge {
                Some(edge) => ExplainJoin {
                    left: edge.child_table.clone(),
                    right: edge.parent_table.clone(),
                    kind: "hash-join".to_string(),
                    predicate: Some(edge.predicate.clone()),
                },
                None => ExplainJoin {
                    left: groups[window - 1].table.clone(),
                    right: right.table.clone(),
                    kind: "cartesian".to_string(),
                    predicate: None,
                },
            });
        }

        Ok(ExplainPlan {
            alias: self.alias.clone(),
            mode: if self.settings.exec.columnar {
                "columnar"
            } else {
                "row"
            },
            time_travel: self.time_travel.map(|t| t.to_string()),
            residual_filters: ctx.residual_filters.len(),
            groups: report_groups,
            joins,
        })
    }
}

/// Owned snapshot of the registration state, movable into a stream worker
struct OwnedGraphState {
    mappings: MappingSet,
    routing: RoutingIndex,
    join_graph: JoinGraph,
    sources: HashMap<String, Arc<dyn TableSource>>,
    time_travel: Option<TimeTravel>,
}

impl OwnedGraphState {
    fn context(&self) -> GraphContext<'_> {
        GraphContext {
            mappings: &self.mappings,
            routing: &self.routing,
            join_graph: &self.join_graph,
            sources: &self.sources,
            time_travel: self.time_travel,
        }
    }
}

/// Plan report emitted by `explain`
#[derive(Debug, Clone, Serialize)]
pub struct ExplainPlan {
    pub alias: String,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_travel: Option<String>,
    pub residual_filters: usize,
    pub groups: Vec<ExplainGroup>,
    pub joins: Vec<ExplainJoin>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainGroup {
    pub table: String,
    pub patterns: usize,
    pub pushdowns: Vec<PushdownPredicate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainJoin {
    pub left: String,
    pub right: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

//! # vgraph
//!
//! A virtual-graph engine: federates tabular sources (Iceberg-style
//! warehouse tables, R2RML-mapped parquet files) behind a SPARQL-shaped
//! graph query surface.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Parsed query (host engine)
//!     ↓
//! [Registry]           → resolve FROM alias, load virtual graph,
//!                        apply @t:/@iso: time travel
//!     ↓
//! [Planner: reorder]   → route patterns, push FILTER/VALUES into the
//!                        source, capture modifiers / anti-joins / paths
//!                        into the per-query context
//!     ↓
//! [Executor: finalize] → scan groups (row or Arrow-columnar), hash-join
//!                        on join-graph edges, bounded Cartesian fallback
//!     ↓
//! [Finalize chain]     → BIND → residual FILTER → anti-joins →
//!                        aggregation → DISTINCT → ORDER BY → OFFSET →
//!                        LIMIT
//!     ↓
//! Solutions
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vgraph::{CreateVg, MemoryNameservice, VgRegistry};
//! use std::sync::Arc;
//!
//! let registry = VgRegistry::new(
//!     Arc::new(MemoryNameservice::new()),
//!     vgraph::GraphSettings::standard(),
//! );
//!
//! registry.create(CreateVg {
//!     name: "sales-vg".to_string(),
//!     vg_type: "iceberg".to_string(),
//!     config: serde_json::json!({
//!         "warehouse-path": "/wh",
//!         "mappingInline": "...R2RML turtle..."
//!     }),
//!     dependencies: vec![],
//! })?;
//!
//! let vg = registry.resolve("sales-vg@t:12345")?;
//! let solutions = vg.query(parsed_query)?;
//! ```

// Error taxonomy
pub mod error;

// Value model: RDF terms, scalars, solutions, the coercion table
pub mod term;

// Parsed-query algebra (contract with the host engine's parser)
pub mod query;

// R2RML mapping model and document reader
pub mod mapping;

// Routing index & join graph, built once at registration
pub mod routing;

// Table source adapters (warehouse tables, plain parquet files)
pub mod source;

// Pushdown analyzer and per-query context
pub mod planner;

// Row and columnar executors, finalize chain, pipeline plumbing
pub mod exec;

// Virtual-graph types and capability surface
pub mod vg;

// Registry, nameservice, alias handling
pub mod registry;

// Configuration system
pub mod config;

// Re-export the error types
pub use error::{VgError, VgResult};

// Re-export the value model
pub use term::{coerce, CoercionError, DataType, Row, Scalar, Solution, Term};

// Re-export the query algebra
pub use query::{
    AggFunc, AntiJoinKind, CmpOp, Expr, OrderKey, PathMod, SelectQuery, Selector, TermPattern,
    TriplePattern, WherePattern, RDF_TYPE,
};

// Re-export mapping types
pub use mapping::{parse_mapping, MappingSet, ObjectMap, RefObjectMap, Template, TriplesMapping};

// Re-export routing structures
pub use routing::{JoinEdge, JoinGraph, RoutingIndex};

// Re-export source contract and adapters
pub use source::{
    BatchScan, ColumnInfo, FileTable, PlannedFile, PredOp, PushdownPredicate, RowScan,
    ScanOptions, TableSchema, TableSource, TableStatistics, TableWriter, TimeTravel,
    WarehouseTable,
};

// Re-export planner surface
pub use planner::{
    AntiJoinSpec, BindSpec, ModifierSpec, Planner, QueryContext, TransitiveSpec,
};

// Re-export execution engine
pub use exec::{
    CancelHandle, ExecOptions, GraphContext, IoPool, QueryDeadline, SolutionStream,
};

// Re-export virtual graphs
pub use vg::{
    Bm25Config, Bm25Graph, ExplainPlan, GraphSettings, IcebergConfig, IcebergDatabase, VgType,
    VirtualGraph,
};

// Re-export registry & lifecycle
pub use registry::{
    normalize_alias, parse_query_alias, CreateVg, DirNameservice, DropOutcome, MemoryNameservice,
    Nameservice, ParsedAlias, VgDescriptor, VgRecord, VgRegistry,
};

// Re-export configuration
pub use config::{init_logging, Config, EngineConfig, LoggingConfig};

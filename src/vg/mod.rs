//! # Virtual Graphs
//!
//! Every virtual-graph type implements one capability surface
//! (initialize, upsert, close, match-triple, match-class, reorder,
//! finalize, explain, aliases) behind a tagged enum with per-variant
//! state. The `iceberg` and `r2rml` types share the tabular
//! [`IcebergDatabase`] backing; `bm25` carries its own index state.

pub mod bm25;
pub mod iceberg;

pub use bm25::{Bm25Config, Bm25Graph};
pub use iceberg::{
    ExplainGroup, ExplainJoin, ExplainPlan, GraphSettings, IcebergConfig, IcebergDatabase,
    RestCatalogConfig,
};

use crate::error::{VgError, VgResult};
use crate::query::{SelectQuery, TriplePattern};
use crate::source::TimeTravel;
use crate::term::Solution;
use std::fmt;

/// Registered virtual-graph types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VgType {
    Bm25,
    R2rml,
    Iceberg,
}

impl VgType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fidx:BM25" | "bm25" => Some(VgType::Bm25),
            "fidx:R2RML" | "r2rml" => Some(VgType::R2rml),
            "fidx:Iceberg" | "iceberg" => Some(VgType::Iceberg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VgType::Bm25 => "fidx:BM25",
            VgType::R2rml => "fidx:R2RML",
            VgType::Iceberg => "fidx:Iceberg",
        }
    }

    /// Stateful types are constructed eagerly at create time; stateless
    /// ones lazily on first query reference.
    pub fn is_stateful(&self) -> bool {
        matches!(self, VgType::Bm25)
    }
}

impl fmt::Display for VgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded virtual graph
#[derive(Debug)]
pub enum VirtualGraph {
    Bm25(Bm25Graph),
    R2rml(IcebergDatabase),
    Iceberg(IcebergDatabase),
}

impl VirtualGraph {
    pub fn vg_type(&self) -> VgType {
        match self {
            VirtualGraph::Bm25(_) => VgType::Bm25,
            VirtualGraph::R2rml(_) => VgType::R2rml,
            VirtualGraph::Iceberg(_) => VgType::Iceberg,
        }
    }

    pub fn aliases(&self) -> Vec<String> {
        match self {
            VirtualGraph::Bm25(g) => vec![g.alias().to_string()],
            VirtualGraph::R2rml(db) | VirtualGraph::Iceberg(db) => {
                vec![db.alias().to_string()]
            }
        }
    }

    pub fn initialize(&self) -> VgResult<()> {
        match self {
            VirtualGraph::Bm25(g) => g.initialize(),
            // tabular graphs validate their sources at open time
            VirtualGraph::R2rml(_) | VirtualGraph::Iceberg(_) => Ok(()),
        }
    }

    /// Source-ledger change notification
    pub fn upsert(&self) -> VgResult<()> {
        match self {
            VirtualGraph::Bm25(g) => g.upsert(),
            // tabular sources re-resolve snapshots on every scan
            VirtualGraph::R2rml(_) | VirtualGraph::Iceberg(_) => Ok(()),
        }
    }

    pub fn close(&self) -> VgResult<()> {
        match self {
            VirtualGraph::Bm25(g) => g.close(),
            VirtualGraph::R2rml(_) | VirtualGraph::Iceberg(_) => Ok(()),
        }
    }

    fn tabular(&self, op: &str) -> VgResult<&IcebergDatabase> {
        match self {
            VirtualGraph::R2rml(db) | VirtualGraph::Iceberg(db) => Ok(db),
            VirtualGraph::Bm25(g) => Err(VgError::NoMapping(format!(
                "bm25 virtual graph '{}' does not support {op}",
                g.alias()
            ))),
        }
    }

    pub fn reorder(&self, query: SelectQuery) -> VgResult<SelectQuery> {
        self.tabular("reorder")?.reorder(query)
    }

    pub fn finalize(&self, query: &SelectQuery) -> VgResult<Vec<Solution>> {
        self.tabular("finalize")?.finalize(query)
    }

    pub fn query(&self, query: SelectQuery) -> VgResult<Vec<Solution>> {
        self.tabular("query")?.query(query)
    }

    /// Streaming variant of `finalize`; see
    /// [`IcebergDatabase::finalize_stream`]
    pub fn finalize_stream(&self, query: SelectQuery) -> VgResult<crate::exec::SolutionStream> {
        Ok(self.tabular("finalize")?.finalize_stream(query))
    }

    pub fn match_triple(&self, pattern: TriplePattern) -> VgResult<Vec<Solution>> {
        self.tabular("match-triple")?.match_triple(pattern)
    }

    pub fn match_class(&self, class_iri: &str, var: &str) -> VgResult<Vec<Solution>> {
        self.tabular("match-class")?.match_class(class_iri, var)
    }

    pub fn explain(&self, query: SelectQuery) -> VgResult<ExplainPlan> {
        self.tabular("explain")?.explain(query)
    }

    /// Time-travel pinned copy (tabular graphs only)
    pub fn with_time_travel(&self, t: TimeTravel) -> VgResult<VirtualGraph> {
        match self {
            VirtualGraph::Iceberg(db) => Ok(VirtualGraph::Iceberg(db.with_time_travel(t)?)),
            VirtualGraph::R2rml(db) => Ok(VirtualGraph::R2rml(db.with_time_travel(t)?)),
            VirtualGraph::Bm25(g) => Err(VgError::InvalidTimeTravel {
                alias: g.alias().to_string(),
                requested: t.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vg_type_parse() {
        assert_eq!(VgType::parse("fidx:BM25"), Some(VgType::Bm25));
        assert_eq!(VgType::parse("iceberg"), Some(VgType::Iceberg));
        assert_eq!(VgType::parse("r2rml"), Some(VgType::R2rml));
        assert_eq!(VgType::parse("unknown"), None);
    }

    #[test]
    fn test_stateful_types() {
        assert!(VgType::Bm25.is_stateful());
        assert!(!VgType::Iceberg.is_stateful());
        assert!(!VgType::R2rml.is_stateful());
    }
}

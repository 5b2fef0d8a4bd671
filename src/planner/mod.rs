//! # Planner
//!
//! `reorder` transforms the WHERE clause handed over by the host engine:
//! pushable FILTER and VALUES constraints become source-native predicates,
//! aggregation and solution modifiers are captured for `finalize`, and
//! anti-join / transitive / BIND patterns move into per-query slots so the
//! executor sees a plain conjunction of routed triple patterns.
//!
//! `reorder` produces exactly one [`QueryContext`], consumed exactly once
//! by `finalize`; contexts are never shared across queries.

pub mod expr;
pub mod pushdown;

pub use pushdown::Planner;

use crate::query::{
    AntiJoinKind, Expr, OrderKey, PathMod, Selector, TriplePattern, WherePattern,
};
use crate::source::PushdownPredicate;
use std::collections::HashMap;

/// A BIND assignment, applied in declaration order
#[derive(Debug, Clone)]
pub struct BindSpec {
    pub var: String,
    pub expr: Expr,
}

/// An EXISTS / NOT EXISTS / MINUS group lifted out of the WHERE clause
#[derive(Debug, Clone)]
pub struct AntiJoinSpec {
    pub kind: AntiJoinKind,
    pub patterns: Vec<WherePattern>,
}

/// A transitive-path pattern lifted out of the WHERE clause
#[derive(Debug, Clone)]
pub struct TransitiveSpec {
    pub pattern: TriplePattern,
    pub kind: PathMod,
}

/// Aggregation and solution modifiers captured at plan time.
///
/// The SELECT clause is rewritten to plain variables so the host engine
/// does not re-apply any of these; `finalize` applies them once.
#[derive(Debug, Clone)]
pub struct ModifierSpec {
    pub selectors: Vec<Selector>,
    pub distinct: bool,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Per-query mutable state produced by `reorder`.
///
/// Lives in the virtual graph behind an atomic slot so it survives host
/// optimization passes that strip pattern metadata; `finalize` snapshots
/// it exactly once.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Pattern id → pushdown predicates for the scan serving that pattern
    pub pushdowns: HashMap<usize, Vec<PushdownPredicate>>,
    /// Filters evaluated after the scan
    pub residual_filters: Vec<Expr>,
    pub binds: Vec<BindSpec>,
    pub anti_joins: Vec<AntiJoinSpec>,
    pub transitive: Vec<TransitiveSpec>,
    pub modifiers: Option<ModifierSpec>,
}

impl QueryContext {
    pub fn pushdowns_for(&self, pattern_id: usize) -> &[PushdownPredicate] {
        self.pushdowns
            .get(&pattern_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

//! # Execution Engine
//!
//! Two-mode executor over routed pattern groups: the row-oriented
//! hash-join engine is the default; the columnar Arrow engine is opt-in
//! and falls back to the row engine when its plan does not compile. Both
//! modes produce identical solution multisets on valid inputs.
//!
//! `execute` applies the finalize chain after the joins, in order:
//! BIND → residual FILTER → anti-joins → aggregation (GROUP BY + HAVING)
//! → DISTINCT → ORDER BY → OFFSET → LIMIT.

pub mod aggregate;
pub mod antijoin;
pub mod columnar;
pub mod pipeline;
pub mod rowjoin;
pub mod transitive;

pub use pipeline::{CancelHandle, IoPool, QueryDeadline, SolutionSink, SolutionStream};
pub use rowjoin::TableGroup;

use crate::error::VgResult;
use crate::mapping::MappingSet;
use crate::planner::expr::{eval, eval_filter};
use crate::planner::QueryContext;
use crate::query::{CmpOp, Expr, SelectQuery, TriplePattern, WherePattern};
use crate::routing::{JoinGraph, RoutingIndex};
use crate::source::{TableSource, TimeTravel};
use crate::term::{Solution, Term};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of one virtual graph's registration state, borrowed by
/// query execution.
pub struct GraphContext<'a> {
    pub mappings: &'a MappingSet,
    pub routing: &'a RoutingIndex,
    pub join_graph: &'a JoinGraph,
    pub sources: &'a HashMap<String, Arc<dyn TableSource>>,
    pub time_travel: Option<TimeTravel>,
}

/// Execution knobs resolved from engine configuration
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// `None` disables the Cartesian product cap
    pub cartesian_cap: Option<usize>,
    pub columnar: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            cartesian_cap: Some(100_000),
            columnar: false,
        }
    }
}

/// Run a reordered query against the graph, consuming its plan context
pub fn execute(
    gc: &GraphContext<'_>,
    query: &SelectQuery,
    ctx: &QueryContext,
    opts: &ExecOptions,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    let triples: Vec<TriplePattern> = query
        .patterns
        .iter()
        .filter_map(|p| match p {
            WherePattern::Triple(t) => Some(t.clone()),
            _ => None,
        })
        .collect();

    let mut solutions = base_match(gc, &triples, ctx, opts, deadline)?;

    for spec in &ctx.transitive {
        solutions = transitive::apply_transitive(gc, solutions, spec, deadline)?;
    }

    // BIND: evaluation errors leave the variable unbound
    for bind in &ctx.binds {
        for solution in &mut solutions {
            if let Some(value) = eval(&bind.expr, solution) {
                solution.bind(bind.var.clone(), Term::Literal(value));
            }
        }
    }

    solutions.retain(|s| ctx.residual_filters.iter().all(|f| eval_filter(f, s)));

    if !ctx.anti_joins.is_empty() {
        let exec_inner = |patterns: &[WherePattern], outer: &Solution| {
            execute_inner(gc, patterns, outer, opts, deadline)
        };
        solutions = antijoin::apply_anti_joins(solutions, &ctx.anti_joins, &exec_inner)?;
    }

    match &ctx.modifiers {
        Some(spec) => aggregate::apply_modifiers(solutions, spec),
        None => {
            let projection = query.projection();
            if projection.is_empty() {
                Ok(solutions)
            } else {
                Ok(solutions
                    .into_iter()
                    .map(|s| s.project(&projection))
                    .collect())
            }
        }
    }
}

/// Match the base triple patterns, columnar when enabled and compilable
fn base_match(
    gc: &GraphContext<'_>,
    triples: &[TriplePattern],
    ctx: &QueryContext,
    opts: &ExecOptions,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    if triples.is_empty() {
        return Ok(vec![Solution::new()]);
    }
    let groups = rowjoin::group_patterns(gc, triples)?;
    if opts.columnar {
        if let Some(solutions) = columnar::try_execute(gc, &groups, ctx, deadline)? {
            return Ok(solutions);
        }
    }
    rowjoin::join_groups(gc, &groups, ctx, deadline, opts.cartesian_cap)
}

/// Recursive entry point for anti-join inner groups.
///
/// Executes the (already grounded) inner patterns without plan-time
/// pushdown, merges each inner solution with the outer bindings so
/// filters can see them, and applies nested constructs recursively.
fn execute_inner(
    gc: &GraphContext<'_>,
    patterns: &[WherePattern],
    outer: &Solution,
    opts: &ExecOptions,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    let mut triples = Vec::new();
    let mut ctx = QueryContext::default();

    for pattern in patterns {
        match pattern {
            WherePattern::Triple(t) => match t.path {
                Some(path) => ctx.transitive.push(crate::planner::TransitiveSpec {
                    pattern: t.clone(),
                    kind: path,
                }),
                None => triples.push(t.clone()),
            },
            WherePattern::Filter(e) => ctx.residual_filters.push(e.clone()),
            WherePattern::Values { var, values } => {
                let disjuncts = values
                    .iter()
                    .map(|v| {
                        Expr::cmp(CmpOp::Eq, Expr::Var(var.clone()), Expr::Const(v.clone()))
                    })
                    .collect();
                ctx.residual_filters.push(Expr::Or(disjuncts));
            }
            WherePattern::Bind { var, expr } => ctx.binds.push(crate::planner::BindSpec {
                var: var.clone(),
                expr: expr.clone(),
            }),
            WherePattern::Exists(inner) => ctx.anti_joins.push(crate::planner::AntiJoinSpec {
                kind: crate::query::AntiJoinKind::Exists,
                patterns: inner.clone(),
            }),
            WherePattern::NotExists(inner) => ctx.anti_joins.push(crate::planner::AntiJoinSpec {
                kind: crate::query::AntiJoinKind::NotExists,
                patterns: inner.clone(),
            }),
            WherePattern::Minus(inner) => ctx.anti_joins.push(crate::planner::AntiJoinSpec {
                kind: crate::query::AntiJoinKind::Minus,
                patterns: inner.clone(),
            }),
        }
    }

    let solutions = base_match(gc, &triples, &ctx, opts, deadline)?;

    // merge outer bindings; incompatible solutions drop here
    let mut merged: Vec<Solution> = solutions
        .into_iter()
        .filter_map(|s| s.merged(outer))
        .collect();

    for spec in &ctx.transitive {
        merged = transitive::apply_transitive(gc, merged, spec, deadline)?;
    }
    for bind in &ctx.binds {
        for solution in &mut merged {
            if let Some(value) = eval(&bind.expr, solution) {
                solution.bind(bind.var.clone(), Term::Literal(value));
            }
        }
    }
    merged.retain(|s| ctx.residual_filters.iter().all(|f| eval_filter(f, s)));

    if !ctx.anti_joins.is_empty() {
        let exec_nested = |patterns: &[WherePattern], outer: &Solution| {
            execute_inner(gc, patterns, outer, opts, deadline)
        };
        merged = antijoin::apply_anti_joins(merged, &ctx.anti_joins, &exec_nested)?;
    }
    Ok(merged)
}

//! Anti-joins: EXISTS, NOT EXISTS, and MINUS.
//!
//! EXISTS / NOT EXISTS ground the inner patterns with the outer solution's
//! bindings and re-enter the executor; MINUS evaluates its inner patterns
//! once, independently, then removes outer solutions compatible with some
//! inner row (sharing at least one variable and agreeing on all shared).

use crate::error::VgResult;
use crate::planner::AntiJoinSpec;
use crate::query::{AntiJoinKind, TermPattern, WherePattern};
use crate::term::{Solution, Term};

/// Re-enters the executor for a nested pattern group: `(patterns, outer)`
/// → solutions of the inner group merged with the outer bindings.
pub type InnerExec<'f> = dyn Fn(&[WherePattern], &Solution) -> VgResult<Vec<Solution>> + 'f;

pub fn apply_anti_joins(
    mut outer: Vec<Solution>,
    specs: &[AntiJoinSpec],
    exec_inner: &InnerExec<'_>,
) -> VgResult<Vec<Solution>> {
    for spec in specs {
        outer = apply_one(outer, spec, exec_inner)?;
    }
    Ok(outer)
}

fn apply_one(
    outer: Vec<Solution>,
    spec: &AntiJoinSpec,
    exec_inner: &InnerExec<'_>,
) -> VgResult<Vec<Solution>> {
    match spec.kind {
        AntiJoinKind::Exists | AntiJoinKind::NotExists => {
            let want_match = spec.kind == AntiJoinKind::Exists;
            let mut kept = Vec::with_capacity(outer.len());
            for solution in outer {
                let grounded = ground_patterns(&spec.patterns, &solution);
                let inner = exec_inner(&grounded, &solution)?;
                if inner.is_empty() != want_match {
                    kept.push(solution);
                }
            }
            Ok(kept)
        }
        AntiJoinKind::Minus => {
            // the inner group is independent of the outer bindings
            let inner = exec_inner(&spec.patterns, &Solution::new())?;
            Ok(outer
                .into_iter()
                .filter(|solution| !inner.iter().any(|i| minus_compatible(solution, i)))
                .collect())
        }
    }
}

/// MINUS removal test: at least one shared variable, agreeing on all
fn minus_compatible(outer: &Solution, inner: &Solution) -> bool {
    let shared = outer.shared_vars(inner);
    if shared.is_empty() {
        return false;
    }
    shared.iter().all(|v| outer.get(v) == inner.get(v))
}

/// Substitute outer bindings into inner patterns as ground terms
fn ground_patterns(patterns: &[WherePattern], outer: &Solution) -> Vec<WherePattern> {
    patterns
        .iter()
        .map(|p| match p {
            WherePattern::Triple(t) => {
                let mut t = t.clone();
                t.subject = ground_term(t.subject, outer);
                t.predicate = ground_term(t.predicate, outer);
                t.object = ground_term(t.object, outer);
                WherePattern::Triple(t)
            }
            other => other.clone(),
        })
        .collect()
}

fn ground_term(term: TermPattern, outer: &Solution) -> TermPattern {
    let TermPattern::Var(v) = &term else {
        return term;
    };
    match outer.get(v) {
        Some(Term::Iri(iri)) => TermPattern::Iri(iri.clone()),
        Some(Term::Literal(s)) => TermPattern::Literal(s.clone()),
        // blank nodes cannot be written back as ground terms
        Some(Term::Blank(_)) | None => term,
    }
}

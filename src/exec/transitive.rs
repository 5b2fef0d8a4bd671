//! Transitive property paths (`p+`, `p*`) evaluated by BFS with a visited
//! set. `p+` requires at least one hop; `p*` also emits the zero-step
//! identity binding.

use super::pipeline::QueryDeadline;
use super::rowjoin::{group_patterns, scan_group};
use super::GraphContext;
use crate::error::VgResult;
use crate::planner::{QueryContext, TransitiveSpec};
use crate::query::{PathMod, TermPattern, TriplePattern};
use crate::term::{Solution, Term};
use std::collections::{HashSet, VecDeque};

const STEP_VAR: &str = "__step";

pub fn apply_transitive(
    gc: &GraphContext<'_>,
    solutions: Vec<Solution>,
    spec: &TransitiveSpec,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    let mut out = Vec::new();
    for solution in solutions {
        expand_solution(gc, &solution, spec, deadline, &mut out)?;
    }
    Ok(out)
}

fn expand_solution(
    gc: &GraphContext<'_>,
    outer: &Solution,
    spec: &TransitiveSpec,
    deadline: &QueryDeadline,
    out: &mut Vec<Solution>,
) -> VgResult<()> {
    let pattern = &spec.pattern;
    let start = resolve(&pattern.subject, outer);
    let target = resolve(&pattern.object, outer);
    let include_zero = spec.kind == PathMod::ZeroOrMore;

    match (start, target) {
        (Some(start), target) => {
            let reachable = bfs(gc, pattern, &start, deadline, include_zero, false)?;
            emit_forward(outer, pattern, &start, target.as_ref(), reachable, out);
        }
        (None, Some(target)) => {
            // reverse BFS towards the grounded object
            let reachable = bfs(gc, pattern, &target, deadline, include_zero, true)?;
            let Some(subject_var) = pattern.subject.as_var() else {
                return Ok(());
            };
            for term in reachable {
                let mut solution = outer.clone();
                solution.bind(subject_var.to_string(), term);
                out.push(solution);
            }
        }
        (None, None) => {
            // fully unbound: enumerate all single steps, then close over
            // every distinct source
            let edges = all_steps(gc, pattern, deadline)?;
            let mut nodes: Vec<Term> = Vec::new();
            let mut seen = HashSet::new();
            for (from, to) in &edges {
                if seen.insert(from.clone()) {
                    nodes.push(from.clone());
                }
                if seen.insert(to.clone()) {
                    nodes.push(to.clone());
                }
            }
            for node in nodes {
                deadline.check()?;
                let reachable = bfs(gc, pattern, &node, deadline, include_zero, false)?;
                emit_forward(outer, pattern, &node, None, reachable, out);
            }
        }
    }
    Ok(())
}

fn emit_forward(
    outer: &Solution,
    pattern: &TriplePattern,
    start: &Term,
    target: Option<&Term>,
    reachable: Vec<Term>,
    out: &mut Vec<Solution>,
) {
    for term in reachable {
        if let Some(target) = target {
            if &term != target {
                continue;
            }
        }
        let mut solution = outer.clone();
        if let Some(var) = pattern.subject.as_var() {
            solution.bind(var.to_string(), start.clone());
        }
        if let Some(var) = pattern.object.as_var() {
            if target.is_none() {
                solution.bind(var.to_string(), term);
            }
        }
        out.push(solution);
    }
}

/// Closure of single steps from `origin`; the visited set guarantees
/// termination on cyclic graphs.
fn bfs(
    gc: &GraphContext<'_>,
    pattern: &TriplePattern,
    origin: &Term,
    deadline: &QueryDeadline,
    include_zero: bool,
    reverse: bool,
) -> VgResult<Vec<Term>> {
    let mut visited: HashSet<Term> = HashSet::new();
    let mut frontier: VecDeque<Term> = VecDeque::new();
    let mut reachable: Vec<Term> = Vec::new();

    if include_zero {
        reachable.push(origin.clone());
    }
    visited.insert(origin.clone());
    frontier.push_back(origin.clone());

    while let Some(current) = frontier.pop_front() {
        deadline.check()?;
        for next in single_step(gc, pattern, &current, reverse, deadline)? {
            if visited.insert(next.clone()) {
                reachable.push(next.clone());
                frontier.push_back(next);
            } else if !include_zero && next == *origin && !reachable.contains(&next) {
                // a cycle back to the origin still satisfies p+
                reachable.push(next);
            }
        }
    }
    Ok(reachable)
}

/// One hop of the path predicate from (or, reversed, into) `node`
fn single_step(
    gc: &GraphContext<'_>,
    pattern: &TriplePattern,
    node: &Term,
    reverse: bool,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Term>> {
    let Some(bound) = term_to_pattern(node) else {
        return Ok(Vec::new());
    };
    let step = if reverse {
        TriplePattern::new(
            TermPattern::var(STEP_VAR),
            pattern.predicate.clone(),
            bound,
        )
    } else {
        TriplePattern::new(bound, pattern.predicate.clone(), TermPattern::var(STEP_VAR))
    };

    let step_solutions = match_pattern(gc, step, deadline)?;
    Ok(step_solutions
        .into_iter()
        .filter_map(|s| s.get(STEP_VAR).cloned())
        .collect())
}

fn all_steps(
    gc: &GraphContext<'_>,
    pattern: &TriplePattern,
    deadline: &QueryDeadline,
) -> VgResult<Vec<(Term, Term)>> {
    let step = TriplePattern::new(
        TermPattern::var("__from"),
        pattern.predicate.clone(),
        TermPattern::var("__to"),
    );
    let solutions = match_pattern(gc, step, deadline)?;
    Ok(solutions
        .into_iter()
        .filter_map(|s| {
            Some((s.get("__from")?.clone(), s.get("__to")?.clone()))
        })
        .collect())
}

fn match_pattern(
    gc: &GraphContext<'_>,
    pattern: TriplePattern,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    let empty_ctx = QueryContext::default();
    let groups = group_patterns(gc, std::slice::from_ref(&pattern))?;
    let mut solutions = Vec::new();
    for group in &groups {
        solutions.extend(scan_group(gc, group, &empty_ctx, deadline)?);
    }
    Ok(solutions)
}

/// A pattern endpoint as a concrete term: ground in the pattern itself, or
/// bound by the outer solution
fn resolve(tp: &TermPattern, outer: &Solution) -> Option<Term> {
    match tp {
        TermPattern::Iri(iri) => Some(Term::Iri(iri.clone())),
        TermPattern::Literal(s) => Some(Term::Literal(s.clone())),
        TermPattern::Var(v) => outer.get(v).cloned(),
    }
}

fn term_to_pattern(term: &Term) -> Option<TermPattern> {
    match term {
        Term::Iri(iri) => Some(TermPattern::Iri(iri.clone())),
        Term::Literal(s) => Some(TermPattern::Literal(s.clone())),
        Term::Blank(_) => None,
    }
}

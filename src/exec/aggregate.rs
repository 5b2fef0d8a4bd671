//! Aggregation and solution modifiers, applied by `finalize` after joins.
//!
//! Order: aggregation (GROUP BY + HAVING) → DISTINCT → ORDER BY → OFFSET →
//! LIMIT, then projection to the captured SELECT clause. Aggregation is
//! two-pass: partition solutions by group key, fold each group through
//! accumulators, emit one solution per group in group-key order.

use crate::error::VgResult;
use crate::planner::expr::eval_filter;
use crate::planner::ModifierSpec;
use crate::query::{AggFunc, Selector};
use crate::term::{Scalar, Solution, Term};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Apply the captured modifier spec to the joined solution set
pub fn apply_modifiers(solutions: Vec<Solution>, spec: &ModifierSpec) -> VgResult<Vec<Solution>> {
    let has_aggregates = spec
        .selectors
        .iter()
        .any(|s| matches!(s, Selector::Aggregate { .. }));

    let mut solutions = if has_aggregates || !spec.group_by.is_empty() {
        aggregate(solutions, spec)
    } else {
        solutions
    };

    if let Some(having) = &spec.having {
        solutions.retain(|s| eval_filter(having, s));
    }

    if spec.distinct {
        solutions = distinct(solutions);
    }

    if !spec.order_by.is_empty() {
        solutions.sort_by(|a, b| {
            for key in &spec.order_by {
                let ord = compare_bindings(a.get(&key.var), b.get(&key.var));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let offset = spec.offset.unwrap_or(0);
    let solutions: Vec<Solution> = match spec.limit {
        Some(limit) => solutions.into_iter().skip(offset).take(limit).collect(),
        None => solutions.into_iter().skip(offset).collect(),
    };

    // project to the SELECT outputs captured at plan time
    if spec.selectors.is_empty() {
        return Ok(solutions);
    }
    let output_vars: Vec<String> = spec
        .selectors
        .iter()
        .map(|s| s.output_var().to_string())
        .collect();
    Ok(solutions
        .into_iter()
        .map(|s| s.project(&output_vars))
        .collect())
}

/// DISTINCT preserving first-seen order
pub fn distinct(solutions: Vec<Solution>) -> Vec<Solution> {
    let mut seen = HashSet::with_capacity(solutions.len());
    solutions
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn compare_bindings(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(b),
    }
}

fn aggregate(solutions: Vec<Solution>, spec: &ModifierSpec) -> Vec<Solution> {
    // partition by group key; a missing binding is part of the key
    let mut order: Vec<Vec<Option<Term>>> = Vec::new();
    let mut groups: HashMap<Vec<Option<Term>>, Vec<Solution>> = HashMap::new();
    for solution in solutions {
        let key: Vec<Option<Term>> = spec
            .group_by
            .iter()
            .map(|v| solution.get(v).cloned())
            .collect();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(solution);
    }

    // emit in group-key order
    order.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = compare_bindings(x.as_ref(), y.as_ref());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let members = &groups[&key];
        let mut solution = Solution::new();
        for (var, term) in spec.group_by.iter().zip(&key) {
            if let Some(term) = term {
                solution.bind(var.clone(), term.clone());
            }
        }
        for selector in &spec.selectors {
            if let Selector::Aggregate {
                func,
                var,
                distinct,
                alias,
                separator,
            } = selector
            {
                if let Some(term) =
                    fold_group(members, *func, var.as_deref(), *distinct, separator.as_deref())
                {
                    solution.bind(alias.clone(), term);
                }
            }
        }
        out.push(solution);
    }
    out
}

/// Running numeric accumulator: integral until a float joins
#[derive(Debug, Clone, Copy)]
enum NumericAcc {
    Long(i64),
    Double(f64),
}

impl NumericAcc {
    fn add(self, value: &Scalar) -> Option<NumericAcc> {
        match (self, value) {
            (NumericAcc::Long(a), Scalar::Int(v)) => Some(NumericAcc::Long(a + i64::from(*v))),
            (NumericAcc::Long(a), Scalar::Long(v)) => Some(NumericAcc::Long(a + v)),
            (NumericAcc::Long(a), Scalar::Float(v)) => {
                Some(NumericAcc::Double(a as f64 + f64::from(*v)))
            }
            (NumericAcc::Long(a), Scalar::Double(v)) => Some(NumericAcc::Double(a as f64 + v)),
            (NumericAcc::Double(a), Scalar::Int(v)) => {
                Some(NumericAcc::Double(a + f64::from(*v)))
            }
            (NumericAcc::Double(a), Scalar::Long(v)) => Some(NumericAcc::Double(a + *v as f64)),
            (NumericAcc::Double(a), Scalar::Float(v)) => {
                Some(NumericAcc::Double(a + f64::from(*v)))
            }
            (NumericAcc::Double(a), Scalar::Double(v)) => Some(NumericAcc::Double(a + v)),
            _ => None,
        }
    }

    fn scalar(self) -> Scalar {
        match self {
            NumericAcc::Long(v) => Scalar::Long(v),
            NumericAcc::Double(v) => Scalar::Double(v),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            NumericAcc::Long(v) => v as f64,
            NumericAcc::Double(v) => v,
        }
    }
}

fn fold_group(
    members: &[Solution],
    func: AggFunc,
    var: Option<&str>,
    distinct_values: bool,
    separator: Option<&str>,
) -> Option<Term> {
    let values = || -> Vec<&Term> {
        let Some(var) = var else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        members
            .iter()
            .filter_map(|s| s.get(var))
            .filter(|t| !distinct_values || seen.insert((*t).clone()))
            .collect()
    };

    match func {
        AggFunc::Count => {
            let count = match var {
                None => members.len(),
                Some(_) => values().len(),
            };
            Some(Term::Literal(Scalar::Long(count as i64)))
        }
        AggFunc::Sum => {
            let mut acc = NumericAcc::Long(0);
            for term in values() {
                acc = acc.add(term.as_literal()?)?;
            }
            Some(Term::Literal(acc.scalar()))
        }
        AggFunc::Avg => {
            let values = values();
            if values.is_empty() {
                return None;
            }
            let mut acc = NumericAcc::Long(0);
            for term in &values {
                acc = acc.add(term.as_literal()?)?;
            }
            Some(Term::Literal(Scalar::Double(
                acc.as_f64() / values.len() as f64,
            )))
        }
        AggFunc::Min => values()
            .into_iter()
            .min_by(|a, b| a.total_cmp(b))
            .cloned(),
        AggFunc::Max => values()
            .into_iter()
            .max_by(|a, b| a.total_cmp(b))
            .cloned(),
        AggFunc::Sample => values().first().map(|t| (*t).clone()),
        AggFunc::GroupConcat => {
            let parts: Vec<String> = values()
                .into_iter()
                .map(|t| match t {
                    Term::Literal(s) => s.to_string(),
                    Term::Iri(iri) => iri.clone(),
                    Term::Blank(b) => format!("_:{b}"),
                })
                .collect();
            Some(Term::Literal(Scalar::string(
                parts.join(separator.unwrap_or(" ")),
            )))
        }
    }
}

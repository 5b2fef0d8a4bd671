//! Row-oriented pattern execution: scan groups, subject materialization,
//! hash joins over shared variables, and the capped Cartesian fallback.
//!
//! Patterns are grouped by (routed table, subject term); each group issues
//! one projected scan with its pushdown predicates plus the equality
//! predicates derived from grounded subjects/objects, then materializes
//! SPARQL solutions row by row through the mapping's templates.

use super::pipeline::QueryDeadline;
use super::GraphContext;
use crate::error::{VgError, VgResult};
use crate::mapping::{ObjectMap, RefObjectMap, TriplesMapping};
use crate::planner::QueryContext;
use crate::query::{TermPattern, TriplePattern};
use crate::routing::JoinEdge;
use crate::source::{PushdownPredicate, ScanOptions, TableSchema};
use crate::term::{coerce, term_from_scalar, Row, Scalar, Solution, Term};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Patterns routed to one scan: same table, same subject term
#[derive(Debug, Clone)]
pub struct TableGroup {
    pub table: String,
    pub subject: TermPattern,
    pub patterns: Vec<TriplePattern>,
}

/// Group WHERE triples by routed table and subject.
///
/// Class patterns route through the class index, everything else through
/// the predicate index. Routing failures are terminal `NoMapping` errors.
pub fn group_patterns(
    gc: &GraphContext<'_>,
    patterns: &[TriplePattern],
) -> VgResult<Vec<TableGroup>> {
    let mut groups: Vec<TableGroup> = Vec::new();
    for pattern in patterns {
        let table = route_pattern(gc, pattern)?;
        let existing = groups
            .iter_mut()
            .find(|g| g.table == table && g.subject == pattern.subject);
        match existing {
            Some(group) => group.patterns.push(pattern.clone()),
            None => groups.push(TableGroup {
                table,
                subject: pattern.subject.clone(),
                patterns: vec![pattern.clone()],
            }),
        }
    }
    Ok(groups)
}

fn route_pattern(gc: &GraphContext<'_>, pattern: &TriplePattern) -> VgResult<String> {
    if pattern.is_class_pattern() {
        let TermPattern::Iri(class) = &pattern.object else {
            return Err(VgError::NoMapping(
                "rdf:type pattern with variable class".to_string(),
            ));
        };
        return match gc.routing.route_class(class)? {
            Some(table) => Ok(table.to_string()),
            None => Err(VgError::NoMapping(class.clone())),
        };
    }
    let TermPattern::Iri(predicate) = &pattern.predicate else {
        return Err(VgError::NoMapping(
            "pattern with variable predicate".to_string(),
        ));
    };
    match gc.routing.route_predicate(predicate)? {
        Some(table) => Ok(table.to_string()),
        None => Err(VgError::NoMapping(predicate.clone())),
    }
}

/// The scan a group compiles to: projected columns, pushdown predicates,
/// and the (variable, object map) bindings materialized per row.
///
/// Shared between the row and columnar executors so grounded-term handling
/// stays identical in both modes.
pub(crate) struct ScanRequest<'m> {
    pub columns: BTreeSet<String>,
    pub predicates: Vec<PushdownPredicate>,
    pub bindings: Vec<(String, &'m ObjectMap)>,
    pub subject_var: Option<String>,
}

/// Compile a group into its scan request; `None` when no row can match
/// (a grounded term contradicts the mapping).
pub(crate) fn build_scan_request<'m>(
    gc: &GraphContext<'m>,
    mapping: &'m TriplesMapping,
    schema: &TableSchema,
    group: &TableGroup,
    ctx: &QueryContext,
) -> VgResult<Option<ScanRequest<'m>>> {
    let mut predicates: Vec<PushdownPredicate> = Vec::new();
    let mut columns: BTreeSet<String> = mapping
        .subject_template
        .columns()
        .iter()
        .map(|c| (*c).to_string())
        .collect();
    // (variable, object map) pairs to materialize per row
    let mut bindings: Vec<(String, &ObjectMap)> = Vec::new();

    // subjects are IRIs; a literal subject can never match
    if matches!(&group.subject, TermPattern::Literal(_)) {
        return Ok(None);
    }

    // a grounded subject becomes column equalities via the inverse template
    if let TermPattern::Iri(iri) = &group.subject {
        match mapping.subject_template.match_iri(iri) {
            Some(cols) => {
                for (column, text) in cols {
                    match text_predicate(schema, &column, &text) {
                        Some(p) => predicates.push(p),
                        None => return Ok(None),
                    }
                }
            }
            None => return Ok(None),
        }
    }

    for pattern in &group.patterns {
        // the per-query slot is the authoritative pushdown record
        predicates.extend(ctx.pushdowns_for(pattern.id).iter().cloned());

        if pattern.is_class_pattern() {
            continue;
        }
        let TermPattern::Iri(predicate) = &pattern.predicate else {
            return Err(VgError::NoMapping(
                "pattern with variable predicate".to_string(),
            ));
        };
        let object_map = mapping
            .object_map(predicate)
            .ok_or_else(|| VgError::NoMapping(predicate.clone()))?;
        columns.extend(object_map.columns());

        match &pattern.object {
            TermPattern::Var(var) => bindings.push((var.clone(), object_map)),
            // grounded objects become additional equality pushdowns
            TermPattern::Literal(value) => match object_map {
                ObjectMap::Column { name, .. } => {
                    let coerced = match schema.column_type(name) {
                        Some(dt) => match coerce(value, dt) {
                            Ok(v) => v,
                            Err(_) => return Ok(None),
                        },
                        None => value.clone(),
                    };
                    predicates.push(PushdownPredicate::eq(name.clone(), coerced));
                }
                ObjectMap::Constant { term } => {
                    if term != &Term::Literal(value.clone()) {
                        return Ok(None);
                    }
                }
                // an IRI-producing map never matches a literal
                ObjectMap::Template { .. } | ObjectMap::Ref(_) => return Ok(None),
            },
            TermPattern::Iri(iri) => match object_map {
                ObjectMap::Template { template, .. } => match template.match_iri(iri) {
                    Some(cols) => {
                        for (column, text) in cols {
                            match text_predicate(schema, &column, &text) {
                                Some(p) => predicates.push(p),
                                None => return Ok(None),
                            }
                        }
                    }
                    None => return Ok(None),
                },
                ObjectMap::Ref(ref_map) => {
                    match ref_iri_predicates(gc, schema, ref_map, iri)? {
                        Some(mut preds) => predicates.append(&mut preds),
                        None => return Ok(None),
                    }
                }
                ObjectMap::Constant { term } => {
                    if term != &Term::Iri(iri.clone()) {
                        return Ok(None);
                    }
                }
                ObjectMap::Column { name, .. } => {
                    predicates.push(PushdownPredicate::eq(
                        name.clone(),
                        Scalar::string(iri.clone()),
                    ));
                }
            },
        }
    }

    Ok(Some(ScanRequest {
        columns,
        predicates,
        bindings,
        subject_var: group.subject.as_var().map(str::to_string),
    }))
}

/// Scan one group and materialize its solutions
pub fn scan_group(
    gc: &GraphContext<'_>,
    group: &TableGroup,
    ctx: &QueryContext,
    deadline: &QueryDeadline,
) -> VgResult<Vec<Solution>> {
    let mapping = gc
        .mappings
        .get(&group.table)
        .ok_or_else(|| VgError::NoMapping(group.table.clone()))?;
    let source = gc
        .sources
        .get(&group.table)
        .ok_or_else(|| VgError::MissingSource(group.table.clone()))?;

    let base_opts = ScanOptions {
        time_travel: gc.time_travel,
        ..Default::default()
    };
    let schema = source.get_schema(&base_opts)?;

    let Some(request) = build_scan_request(gc, mapping, &schema, group, ctx)? else {
        return Ok(Vec::new());
    };

    let opts = ScanOptions {
        columns: request.columns.iter().cloned().collect(),
        predicates: request.predicates.clone(),
        time_travel: gc.time_travel,
        limit: None,
    };
    debug!(table = %group.table, patterns = group.patterns.len(), "scanning group");

    let subject_var = request.subject_var.as_deref();
    let mut solutions = Vec::new();
    for row in source.scan_rows(&opts)? {
        deadline.check()?;
        let row = row?;
        if let Some(solution) =
            materialize_solution(gc, mapping, subject_var, &request.bindings, &row)
        {
            solutions.push(solution);
        }
    }
    Ok(solutions)
}

/// Build a solution from one row; `None` when a required binding cannot be
/// produced (null column, template over null values).
pub(crate) fn materialize_solution(
    gc: &GraphContext<'_>,
    mapping: &TriplesMapping,
    subject_var: Option<&str>,
    bindings: &[(String, &ObjectMap)],
    row: &Row,
) -> Option<Solution> {
    let mut solution = Solution::new();
    if let Some(var) = subject_var {
        let iri = mapping.subject_template.expand(row)?;
        solution.bind(var.to_string(), Term::Iri(iri));
    }

    for (var, object_map) in bindings {
        let term = match object_map {
            ObjectMap::Column { name, datatype } => {
                let value = row.get(name.as_str())?;
                if value.is_null() {
                    return None;
                }
                term_from_scalar(value.clone(), datatype.as_deref())
            }
            ObjectMap::Template { template, .. } => Term::Iri(template.expand(row)?),
            ObjectMap::Constant { term } => term.clone(),
            ObjectMap::Ref(ref_map) => Term::Iri(ref_parent_iri(gc, ref_map, row)?),
        };
        match solution.get(var) {
            Some(existing) if existing != &term => return None,
            Some(_) => {}
            None => solution.bind(var.clone(), term),
        }
    }
    Some(solution)
}

/// Materialize the parent-subject IRI of a RefObjectMap from child columns
fn ref_parent_iri(gc: &GraphContext<'_>, ref_map: &RefObjectMap, row: &Row) -> Option<String> {
    let parent_table = gc
        .join_graph
        .table_for_triples_map(&ref_map.parent_triples_map)?;
    let parent = gc.mappings.get(parent_table)?;
    let mut pseudo = Row::new();
    for (child, parent_col) in ref_map.child_columns.iter().zip(&ref_map.parent_columns) {
        let value = row.get(child.as_str())?;
        pseudo.insert(parent_col.clone(), value.clone());
    }
    parent.subject_template.expand(&pseudo)
}

/// Equality predicates pinning a RefObjectMap object to a grounded parent
/// IRI; `None` when the IRI cannot belong to the parent mapping.
fn ref_iri_predicates(
    gc: &GraphContext<'_>,
    schema: &TableSchema,
    ref_map: &RefObjectMap,
    iri: &str,
) -> VgResult<Option<Vec<PushdownPredicate>>> {
    let Some(parent_table) = gc
        .join_graph
        .table_for_triples_map(&ref_map.parent_triples_map)
    else {
        return Ok(None);
    };
    let Some(parent) = gc.mappings.get(parent_table) else {
        return Ok(None);
    };
    let Some(parent_values) = parent.subject_template.match_iri(iri) else {
        return Ok(None);
    };

    let mut predicates = Vec::new();
    for (child, parent_col) in ref_map.child_columns.iter().zip(&ref_map.parent_columns) {
        let Some(text) = parent_values.get(parent_col) else {
            return Ok(None);
        };
        match text_predicate(schema, child, text) {
            Some(p) => predicates.push(p),
            None => return Ok(None),
        }
    }
    Ok(Some(predicates))
}

/// Equality predicate from template-recovered text, coerced to the column
/// type; `None` when the text cannot be a value of the column.
fn text_predicate(schema: &TableSchema, column: &str, text: &str) -> Option<PushdownPredicate> {
    let value = Scalar::string(text.to_string());
    let coerced = match schema.column_type(column) {
        Some(dt) => coerce(&value, dt).ok()?,
        None => value,
    };
    Some(PushdownPredicate::eq(column.to_string(), coerced))
}

// ============================================================================
// Joins
// ============================================================================

/// Left-to-right reduce over scanned groups: hash join on shared variables
/// where a join edge (or any shared binding) connects them, bounded
/// Cartesian product otherwise.
pub fn join_groups(
    gc: &GraphContext<'_>,
    groups: &[TableGroup],
    ctx: &QueryContext,
    deadline: &QueryDeadline,
    cartesian_cap: Option<usize>,
) -> VgResult<Vec<Solution>> {
    let mut iter = groups.iter();
    let Some(first) = iter.next() else {
        return Ok(vec![Solution::new()]);
    };

    let mut acc = scan_group(gc, first, ctx, deadline)?;
    let mut acc_tables = vec![first.table.clone()];

    for group in iter {
        deadline.check()?;
        let right = scan_group(gc, group, ctx, deadline)?;
        acc = join_solutions(acc, right, &acc_tables, &group.table, cartesian_cap)?;
        acc_tables.push(group.table.clone());
    }
    Ok(acc)
}

/// Join two solution sets on their shared variables; Cartesian product
/// under the cap when none are shared.
pub fn join_solutions(
    left: Vec<Solution>,
    right: Vec<Solution>,
    left_tables: &[String],
    right_table: &str,
    cartesian_cap: Option<usize>,
) -> VgResult<Vec<Solution>> {
    if left.is_empty() || right.is_empty() {
        return Ok(Vec::new());
    }

    let shared: Vec<String> = left[0]
        .shared_vars(&right[0])
        .into_iter()
        .map(str::to_string)
        .collect();

    if shared.is_empty() {
        let product = left.len().saturating_mul(right.len());
        if let Some(cap) = cartesian_cap {
            if product > cap {
                return Err(VgError::CartesianProductTooLarge {
                    left_table: left_tables.join("+"),
                    right_table: right_table.to_string(),
                    left_rows: left.len(),
                    right_rows: right.len(),
                    cap,
                });
            }
        }
        let mut out = Vec::with_capacity(product);
        for l in &left {
            for r in &right {
                if let Some(merged) = l.merged(r) {
                    out.push(merged);
                }
            }
        }
        return Ok(out);
    }

    // build on the smaller side
    let (build, probe, probe_is_left) = if left.len() <= right.len() {
        (left, right, false)
    } else {
        (right, left, true)
    };

    let key_of = |s: &Solution| -> Option<Vec<Term>> {
        shared
            .iter()
            .map(|v| s.get(v).cloned())
            .collect::<Option<Vec<_>>>()
    };

    let mut table: HashMap<Vec<Term>, Vec<Solution>> = HashMap::new();
    for solution in build {
        if let Some(key) = key_of(&solution) {
            table.entry(key).or_default().push(solution);
        }
    }

    let mut out = Vec::new();
    for probe_solution in probe {
        let Some(key) = key_of(&probe_solution) else {
            continue;
        };
        if let Some(matches) = table.get(&key) {
            for build_solution in matches {
                let merged = if probe_is_left {
                    probe_solution.merged(build_solution)
                } else {
                    build_solution.merged(&probe_solution)
                };
                if let Some(m) = merged {
                    out.push(m);
                }
            }
        }
    }
    Ok(out)
}

/// The join edge the query actually traverses between two groups, if any:
/// the child group must carry a pattern with the edge's FK predicate whose
/// object variable is the parent group's subject variable.
pub fn traversed_edge<'g>(
    gc: &'g GraphContext<'_>,
    a: &TableGroup,
    b: &TableGroup,
) -> Option<&'g JoinEdge> {
    for edge in gc.join_graph.edges_between(&a.table, &b.table) {
        let (child, parent) = if edge.child_table == a.table {
            (a, b)
        } else {
            (b, a)
        };
        let Some(parent_subject) = parent.subject.as_var() else {
            continue;
        };
        let uses_edge = child.patterns.iter().any(|p| {
            matches!(&p.predicate, TermPattern::Iri(pred) if pred == &edge.predicate)
                && p.object.as_var() == Some(parent_subject)
        });
        if uses_edge {
            return Some(edge);
        }
    }
    None
}

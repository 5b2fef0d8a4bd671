//! Pushdown analysis and WHERE transformation.
//!
//! A FILTER is pushable when it reduces to a conjunction of
//! `?var OP constant` comparisons over a single variable (plus BETWEEN and
//! the `bound`/`!isBlank` null tests). A VALUES block with one variable
//! and a literal list pushes as an `in` predicate. Either pushes only when
//! the variable's binding pattern routes to a column-kind object map and
//! every constant coerces to the column's datatype; failures fall back to
//! residual evaluation and are logged, never surfaced.

use super::{AntiJoinSpec, BindSpec, ModifierSpec, QueryContext, TransitiveSpec};
use crate::error::VgResult;
use crate::mapping::MappingSet;
use crate::query::{
    AntiJoinKind, CmpOp, Expr, SelectQuery, Selector, TermPattern, TriplePattern, WherePattern,
};
use crate::routing::RoutingIndex;
use crate::source::{PredOp, PushdownPredicate, TableSchema};
use crate::term::{coerce, DataType, Scalar};
use std::collections::HashMap;
use tracing::debug;

/// One pushable comparison extracted from a filter
#[derive(Debug, Clone)]
struct Comparison {
    op: PredOp,
    values: Vec<Scalar>,
}

/// Analysis result for one FILTER / VALUES entry
#[derive(Debug, Clone)]
struct Analysis {
    var: String,
    comparisons: Vec<Comparison>,
    /// the original pattern, restored on fallback
    origin: WherePattern,
}

/// Rewrites queries against one virtual graph's routing state
pub struct Planner<'a> {
    routing: &'a RoutingIndex,
    mappings: &'a MappingSet,
    /// table → schema, for datatype coercion of pushdown constants
    schemas: &'a HashMap<String, TableSchema>,
    /// disabled pushdown leaves every constraint residual
    pushdown_enabled: bool,
}

impl<'a> Planner<'a> {
    pub fn new(
        routing: &'a RoutingIndex,
        mappings: &'a MappingSet,
        schemas: &'a HashMap<String, TableSchema>,
    ) -> Self {
        Planner {
            routing,
            mappings,
            schemas,
            pushdown_enabled: true,
        }
    }

    pub fn with_pushdown(mut self, enabled: bool) -> Self {
        self.pushdown_enabled = enabled;
        self
    }

    /// Transform the query, producing the rewritten WHERE clause and the
    /// per-query context.
    pub fn reorder(&self, query: SelectQuery) -> VgResult<(SelectQuery, QueryContext)> {
        let mut ctx = QueryContext::default();
        let mut triples: Vec<TriplePattern> = Vec::new();
        let mut analyses: Vec<Analysis> = Vec::new();

        let mut query = query;
        let patterns = std::mem::take(&mut query.patterns);
        let mut next_id = 0usize;
        for pattern in patterns {
            match pattern {
                WherePattern::Triple(mut t) => {
                    t.id = next_id;
                    next_id += 1;
                    if let Some(path) = t.path {
                        ctx.transitive.push(TransitiveSpec { pattern: t, kind: path });
                    } else {
                        triples.push(t);
                    }
                }
                WherePattern::Filter(expr) => match self.analyze_filter(&expr) {
                    Some(analysis) if self.pushdown_enabled => analyses.push(analysis),
                    _ => ctx.residual_filters.push(expr),
                },
                WherePattern::Values { var, values } => {
                    let analysis = Analysis {
                        origin: WherePattern::Values {
                            var: var.clone(),
                            values: values.clone(),
                        },
                        comparisons: vec![Comparison {
                            op: PredOp::In,
                            values,
                        }],
                        var,
                    };
                    if self.pushdown_enabled {
                        analyses.push(analysis);
                    } else {
                        self.keep_residual(analysis, &mut ctx);
                    }
                }
                WherePattern::Bind { var, expr } => ctx.binds.push(BindSpec { var, expr }),
                WherePattern::Exists(patterns) => ctx.anti_joins.push(AntiJoinSpec {
                    kind: AntiJoinKind::Exists,
                    patterns,
                }),
                WherePattern::NotExists(patterns) => ctx.anti_joins.push(AntiJoinSpec {
                    kind: AntiJoinKind::NotExists,
                    patterns,
                }),
                WherePattern::Minus(patterns) => ctx.anti_joins.push(AntiJoinSpec {
                    kind: AntiJoinKind::Minus,
                    patterns,
                }),
            }
        }

        for analysis in analyses {
            if !self.try_annotate(&mut triples, &analysis, &mut ctx) {
                self.keep_residual(analysis, &mut ctx);
            }
        }

        query.patterns = triples.into_iter().map(WherePattern::Triple).collect();
        self.capture_modifiers(&mut query, &mut ctx);

        Ok((query, ctx))
    }

    /// Push the analysis onto the binding pattern's scan; false when no
    /// column-backed binding exists or a constant will not coerce.
    fn try_annotate(
        &self,
        triples: &mut [TriplePattern],
        analysis: &Analysis,
        ctx: &mut QueryContext,
    ) -> bool {
        // first pattern binding the variable in object position
        let Some(pattern) = triples
            .iter_mut()
            .find(|t| t.object.as_var() == Some(analysis.var.as_str()))
        else {
            debug!(var = %analysis.var, "pushdown skipped: no binding pattern");
            return false;
        };
        let TermPattern::Iri(predicate) = &pattern.predicate else {
            return false;
        };

        let table = match self.routing.route_predicate(predicate) {
            Ok(Some(table)) => table,
            Ok(None) => {
                debug!(%predicate, "pushdown skipped: predicate not routed");
                return false;
            }
            Err(e) => {
                debug!(%predicate, error = %e, "pushdown skipped: ambiguous routing");
                return false;
            }
        };
        let Some(mapping) = self.mappings.get(table) else {
            return false;
        };
        let Some(object_map) = mapping.object_map(predicate) else {
            return false;
        };
        // only column-kind bindings translate to source predicates
        let Some(column) = object_map.column() else {
            debug!(%predicate, "pushdown skipped: binding is not column-backed");
            return false;
        };

        let column_type = self
            .schemas
            .get(table)
            .and_then(|s| s.column_type(column))
            .or_else(|| object_map.datatype().and_then(DataType::from_xsd));

        let mut predicates = Vec::with_capacity(analysis.comparisons.len());
        for comparison in &analysis.comparisons {
            let mut values = Vec::with_capacity(comparison.values.len());
            for value in &comparison.values {
                let coerced = match column_type {
                    Some(target) => match coerce(value, target) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(%column, error = %e, "pushdown skipped: coercion failed");
                            return false;
                        }
                    },
                    None => value.clone(),
                };
                values.push(coerced);
            }
            predicates.push(match comparison.op {
                PredOp::In => PushdownPredicate::in_list(column, values),
                op => PushdownPredicate::Compare {
                    column: column.to_string(),
                    cmp: op,
                    values,
                },
            });
        }

        // annotate the pattern and record in the per-query slot, so the
        // pushdown survives passes that rebuild the pattern list
        pattern.pushdown.extend(predicates.clone());
        ctx.pushdowns.entry(pattern.id).or_default().extend(predicates);
        true
    }

    /// Restore a non-pushed constraint as a residual filter
    fn keep_residual(&self, analysis: Analysis, ctx: &mut QueryContext) {
        match analysis.origin {
            WherePattern::Filter(expr) => ctx.residual_filters.push(expr),
            WherePattern::Values { var, values } => {
                // VALUES stays observable as a disjunction of equalities;
                // an empty list is unsatisfiable
                let disjuncts = values
                    .into_iter()
                    .map(|v| Expr::cmp(CmpOp::Eq, Expr::Var(var.clone()), Expr::Const(v)))
                    .collect();
                ctx.residual_filters.push(Expr::Or(disjuncts));
            }
            _ => {}
        }
    }

    /// Capture aggregation and solution modifiers, rewriting SELECT so the
    /// host engine does not re-apply them.
    fn capture_modifiers(&self, query: &mut SelectQuery, ctx: &mut QueryContext) {
        if !query.has_modifiers() {
            return;
        }
        let selectors = std::mem::take(&mut query.select);
        ctx.modifiers = Some(ModifierSpec {
            selectors: selectors.clone(),
            distinct: query.distinct,
            group_by: std::mem::take(&mut query.group_by),
            having: query.having.take(),
            order_by: std::mem::take(&mut query.order_by),
            limit: query.limit.take(),
            offset: query.offset.take(),
        });
        query.distinct = false;
        query.select = selectors
            .into_iter()
            .filter_map(|selector| match selector {
                Selector::Var(v) => Some(Selector::Var(v)),
                Selector::Aggregate { var: Some(v), .. } => Some(Selector::Var(v)),
                Selector::Aggregate { var: None, .. } => None,
            })
            .collect();
    }

    /// Decompose a filter into pushable comparisons over a single variable
    fn analyze_filter(&self, expr: &Expr) -> Option<Analysis> {
        let conjuncts: Vec<&Expr> = match expr {
            Expr::And(exprs) => exprs.iter().collect(),
            other => vec![other],
        };

        let mut var: Option<String> = None;
        let mut comparisons = Vec::new();
        for conjunct in conjuncts {
            let (v, comparison) = analyze_comparison(conjunct)?;
            match &var {
                None => var = Some(v.to_string()),
                Some(existing) if existing == v => {}
                // comparisons over different variables stay residual
                Some(_) => return None,
            }
            comparisons.push(comparison);
        }

        Some(Analysis {
            var: var?,
            comparisons,
            origin: WherePattern::Filter(expr.clone()),
        })
    }
}

/// Match a single `var OP constant` shape, in either operand order
fn analyze_comparison(expr: &Expr) -> Option<(&str, Comparison)> {
    match expr {
        Expr::Cmp(op, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Var(v), Expr::Const(c)) => Some((
                v,
                Comparison {
                    op: cmp_to_pred(*op),
                    values: vec![c.clone()],
                },
            )),
            (Expr::Const(c), Expr::Var(v)) => Some((
                v,
                Comparison {
                    op: cmp_to_pred(flip(*op)),
                    values: vec![c.clone()],
                },
            )),
            _ => None,
        },
        Expr::Between(e, lo, hi) => match (e.as_ref(), lo.as_ref(), hi.as_ref()) {
            (Expr::Var(v), Expr::Const(lo), Expr::Const(hi)) => Some((
                v,
                Comparison {
                    op: PredOp::Between,
                    values: vec![lo.clone(), hi.clone()],
                },
            )),
            _ => None,
        },
        Expr::Bound(v) => Some((
            v,
            Comparison {
                op: PredOp::NotNull,
                values: Vec::new(),
            },
        )),
        Expr::Not(inner) => match inner.as_ref() {
            Expr::IsBlank(e) => match e.as_ref() {
                Expr::Var(v) => Some((
                    v,
                    Comparison {
                        op: PredOp::NotNull,
                        values: Vec::new(),
                    },
                )),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn cmp_to_pred(op: CmpOp) -> PredOp {
    match op {
        CmpOp::Eq => PredOp::Eq,
        CmpOp::Neq => PredOp::Neq,
        CmpOp::Lt => PredOp::Lt,
        CmpOp::Lte => PredOp::Lte,
        CmpOp::Gt => PredOp::Gt,
        CmpOp::Gte => PredOp::Gte,
    }
}

/// Mirror a comparison when the constant is on the left
fn flip(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::Lte => CmpOp::Gte,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::Gte => CmpOp::Lte,
        CmpOp::Eq | CmpOp::Neq => op,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::parse_mapping;
    use crate::query::{Expr as E, WherePattern as W};
    use crate::source::ColumnInfo;

    const DOC: &str = r#"
@prefix rr: <http://www.w3.org/ns/r2rml#> .
@prefix ex: <http://example.org/> .
ex:AirlineMap a rr:TriplesMap ;
    rr:logicalTable [ rr:tableName "airlines" ] ;
    rr:subjectMap [ rr:template "http://example.org/airline/{id}" ; rr:class ex:Airline ] ;
    rr:predicateObjectMap [ rr:predicate ex:name ; rr:objectMap [ rr:column "name" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:seats ; rr:objectMap [ rr:column "seats" ] ] ;
    rr:predicateObjectMap [ rr:predicate ex:ref ;
        rr:objectMap [ rr:template "http://example.org/other/{id}" ] ] .
"#;

    fn schemas() -> HashMap<String, TableSchema> {
        let mut out = HashMap::new();
        out.insert(
            "airlines".to_string(),
            TableSchema {
                columns: vec![
                    ColumnInfo {
                        name: "id".to_string(),
                        data_type: DataType::Long,
                        is_partition_key: false,
                    },
                    ColumnInfo {
                        name: "name".to_string(),
                        data_type: DataType::String,
                        is_partition_key: false,
                    },
                    ColumnInfo {
                        name: "seats".to_string(),
                        data_type: DataType::Long,
                        is_partition_key: false,
                    },
                ],
                partition_spec: Vec::new(),
            },
        );
        out
    }

    fn name_pattern() -> W {
        W::Triple(TriplePattern::new(
            TermPattern::var("a"),
            TermPattern::iri("http://example.org/name"),
            TermPattern::var("n"),
        ))
    }

    fn base_query(patterns: Vec<W>) -> SelectQuery {
        SelectQuery {
            select: vec![Selector::Var("n".to_string())],
            patterns,
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_pushdown_equality() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            name_pattern(),
            W::Filter(E::cmp(
                CmpOp::Eq,
                E::var("n"),
                E::Const(Scalar::string("United")),
            )),
        ]);

        let (rewritten, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.residual_filters.is_empty());
        assert_eq!(ctx.pushdowns.len(), 1);
        let preds = ctx.pushdowns_for(0);
        assert_eq!(
            preds,
            &[PushdownPredicate::eq("name", Scalar::string("United"))]
        );
        // the annotated pattern stays in the WHERE clause
        assert_eq!(rewritten.patterns.len(), 1);
        match &rewritten.patterns[0] {
            W::Triple(t) => assert_eq!(t.pushdown, preds.to_vec()),
            other => panic!("unexpected pattern {other:?}"),
        }
    }

    #[test]
    fn test_filter_coercion_via_schema() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            W::Triple(TriplePattern::new(
                TermPattern::var("a"),
                TermPattern::iri("http://example.org/seats"),
                TermPattern::var("s"),
            )),
            // string constant against a long column coerces at plan time
            W::Filter(E::cmp(
                CmpOp::Gt,
                E::var("s"),
                E::Const(Scalar::string("100")),
            )),
        ]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert_eq!(
            ctx.pushdowns_for(0),
            &[PushdownPredicate::compare(
                "seats",
                PredOp::Gt,
                Scalar::Long(100)
            )]
        );
    }

    #[test]
    fn test_coercion_failure_falls_back_to_residual() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let filter = E::cmp(
            CmpOp::Eq,
            E::var("s"),
            E::Const(Scalar::string("not-a-number")),
        );
        let query = base_query(vec![
            W::Triple(TriplePattern::new(
                TermPattern::var("a"),
                TermPattern::iri("http://example.org/seats"),
                TermPattern::var("s"),
            )),
            W::Filter(filter.clone()),
        ]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.pushdowns.is_empty());
        assert_eq!(ctx.residual_filters, vec![filter]);
    }

    #[test]
    fn test_template_binding_is_not_pushable() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            W::Triple(TriplePattern::new(
                TermPattern::var("a"),
                TermPattern::iri("http://example.org/ref"),
                TermPattern::var("r"),
            )),
            W::Filter(E::cmp(
                CmpOp::Eq,
                E::var("r"),
                E::Const(Scalar::string("http://example.org/other/1")),
            )),
        ]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.pushdowns.is_empty());
        assert_eq!(ctx.residual_filters.len(), 1);
    }

    #[test]
    fn test_values_pushdown_removes_pattern() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            name_pattern(),
            W::Values {
                var: "n".to_string(),
                values: vec![Scalar::string("United"), Scalar::string("Delta")],
            },
        ]);

        let (rewritten, ctx) = planner.reorder(query).unwrap();
        assert_eq!(rewritten.patterns.len(), 1);
        assert!(ctx.residual_filters.is_empty());
        assert_eq!(
            ctx.pushdowns_for(0),
            &[PushdownPredicate::in_list(
                "name",
                vec![Scalar::string("United"), Scalar::string("Delta")]
            )]
        );
    }

    #[test]
    fn test_values_without_column_binding_stays_residual() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            name_pattern(),
            W::Values {
                var: "unbound".to_string(),
                values: vec![Scalar::Int(1)],
            },
        ]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.pushdowns.is_empty());
        assert_eq!(ctx.residual_filters.len(), 1);
    }

    #[test]
    fn test_multi_variable_filter_stays_residual() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let filter = E::And(vec![
            E::cmp(CmpOp::Gt, E::var("s"), E::Const(Scalar::Int(1))),
            E::cmp(CmpOp::Lt, E::var("n"), E::Const(Scalar::Int(9))),
        ]);
        let query = base_query(vec![name_pattern(), W::Filter(filter.clone())]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.pushdowns.is_empty());
        assert_eq!(ctx.residual_filters, vec![filter]);
    }

    #[test]
    fn test_pushdown_disabled_leaves_all_residual() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas).with_pushdown(false);

        let query = base_query(vec![
            name_pattern(),
            W::Filter(E::cmp(
                CmpOp::Eq,
                E::var("n"),
                E::Const(Scalar::string("United")),
            )),
        ]);

        let (_, ctx) = planner.reorder(query).unwrap();
        assert!(ctx.pushdowns.is_empty());
        assert_eq!(ctx.residual_filters.len(), 1);
    }

    #[test]
    fn test_modifier_capture_rewrites_select() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = SelectQuery {
            select: vec![Selector::Aggregate {
                func: crate::query::AggFunc::Count,
                var: Some("n".to_string()),
                distinct: false,
                alias: "c".to_string(),
                separator: None,
            }],
            patterns: vec![name_pattern()],
            group_by: vec!["a".to_string()],
            limit: Some(5),
            ..Default::default()
        };

        let (rewritten, ctx) = planner.reorder(query).unwrap();
        let spec = ctx.modifiers.expect("modifier spec captured");
        assert_eq!(spec.group_by, vec!["a".to_string()]);
        assert_eq!(spec.limit, Some(5));
        assert!(rewritten.group_by.is_empty());
        assert_eq!(rewritten.limit, None);
        assert_eq!(rewritten.select, vec![Selector::Var("n".to_string())]);
    }

    #[test]
    fn test_anti_join_and_bind_capture() {
        let mappings = parse_mapping(DOC).unwrap();
        let routing = RoutingIndex::build(&mappings);
        let schemas = schemas();
        let planner = Planner::new(&routing, &mappings, &schemas);

        let query = base_query(vec![
            name_pattern(),
            W::NotExists(vec![name_pattern()]),
            W::Bind {
                var: "u".to_string(),
                expr: E::var("n"),
            },
        ]);

        let (rewritten, ctx) = planner.reorder(query).unwrap();
        assert_eq!(rewritten.patterns.len(), 1);
        assert_eq!(ctx.anti_joins.len(), 1);
        assert_eq!(ctx.anti_joins[0].kind, AntiJoinKind::NotExists);
        assert_eq!(ctx.binds.len(), 1);
    }
}

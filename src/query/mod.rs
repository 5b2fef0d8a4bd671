//! # Parsed Query Algebra
//!
//! The shapes the host query engine hands to the virtual-graph layer after
//! parsing a SPARQL/FQL query: triple patterns, filters, VALUES blocks,
//! BIND assignments, anti-join groups, and solution modifiers.
//!
//! The text parser itself lives in the host engine; these types are the
//! contract between it and `reorder`/`finalize`.

use crate::source::PushdownPredicate;
use crate::term::Scalar;
use serde::Serialize;
use std::collections::BTreeSet;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// One position of a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermPattern {
    Var(String),
    Iri(String),
    Literal(Scalar),
}

impl TermPattern {
    pub fn var(name: impl Into<String>) -> Self {
        TermPattern::Var(name.into())
    }

    pub fn iri(s: impl Into<String>) -> Self {
        TermPattern::Iri(s.into())
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            TermPattern::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_ground(&self) -> bool {
        !matches!(self, TermPattern::Var(_))
    }
}

/// Property-path transitivity tag on a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMod {
    /// `p+`: one or more hops
    OneOrMore,
    /// `p*`: zero or more hops
    ZeroOrMore,
}

/// A WHERE-clause triple pattern.
///
/// `id` is assigned by the planner and keys pushdown metadata recorded in
/// the per-query slots, so annotations survive later rewrite passes that
/// rebuild the pattern list.
#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    pub id: usize,
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
    pub path: Option<PathMod>,
    /// Pushdown annotation attached by the planner
    pub pushdown: Vec<PushdownPredicate>,
}

impl TriplePattern {
    pub fn new(subject: TermPattern, predicate: TermPattern, object: TermPattern) -> Self {
        TriplePattern {
            id: 0,
            subject,
            predicate,
            object,
            path: None,
            pushdown: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: PathMod) -> Self {
        self.path = Some(path);
        self
    }

    /// Is this a `?s rdf:type <Class>` pattern?
    pub fn is_class_pattern(&self) -> bool {
        matches!(&self.predicate, TermPattern::Iri(p) if p == RDF_TYPE)
    }

    pub fn vars(&self) -> BTreeSet<&str> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(TermPattern::as_var)
            .collect()
    }
}

/// Comparison operators appearing in FILTER expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Arithmetic operators usable in BIND / FILTER expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A compiled filter/bind expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Const(Scalar),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Bound(String),
    IsBlank(Box<Expr>),
    Regex(Box<Expr>, String),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Cmp(op, Box::new(lhs), Box::new(rhs))
    }

    /// All variables referenced by this expression
    pub fn vars(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Var(v) | Expr::Bound(v) => {
                out.insert(v.as_str());
            }
            Expr::Const(_) => {}
            Expr::Cmp(_, a, b) | Expr::Arith(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::And(es) | Expr::Or(es) => {
                for e in es {
                    e.collect_vars(out);
                }
            }
            Expr::Not(e) | Expr::IsBlank(e) => e.collect_vars(out),
            Expr::Between(e, lo, hi) => {
                e.collect_vars(out);
                lo.collect_vars(out);
                hi.collect_vars(out);
            }
            Expr::Regex(e, _) => e.collect_vars(out),
        }
    }
}

/// Kinds of anti-join groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiJoinKind {
    Exists,
    NotExists,
    Minus,
}

/// One entry of a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub enum WherePattern {
    Triple(TriplePattern),
    Filter(Expr),
    Values { var: String, values: Vec<Scalar> },
    Bind { var: String, expr: Expr },
    Exists(Vec<WherePattern>),
    NotExists(Vec<WherePattern>),
    Minus(Vec<WherePattern>),
}

/// Aggregate functions supported by `finalize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Sample,
    GroupConcat,
}

/// A SELECT-clause entry
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Var(String),
    Aggregate {
        func: AggFunc,
        /// Aggregated variable; `None` means `COUNT(*)`
        var: Option<String>,
        distinct: bool,
        alias: String,
        /// GROUP_CONCAT separator (defaults to a single space)
        separator: Option<String>,
    },
}

impl Selector {
    /// The output variable this selector binds
    pub fn output_var(&self) -> &str {
        match self {
            Selector::Var(v) => v,
            Selector::Aggregate { alias, .. } => alias,
        }
    }
}

/// Sort key for ORDER BY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub var: String,
    pub descending: bool,
}

/// A parsed SELECT query as handed over by the host engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub select: Vec<Selector>,
    pub distinct: bool,
    /// `FROM` alias, possibly carrying an `@t:`/`@iso:` time-travel suffix
    pub from: Option<String>,
    pub patterns: Vec<WherePattern>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SelectQuery {
    /// Does the query carry anything `finalize` must apply after the joins?
    pub fn has_modifiers(&self) -> bool {
        self.distinct
            || self.having.is_some()
            || !self.order_by.is_empty()
            || self.limit.is_some()
            || self.offset.is_some()
            || !self.group_by.is_empty()
            || self
                .select
                .iter()
                .any(|s| matches!(s, Selector::Aggregate { .. }))
    }

    /// Output variable names in SELECT order
    pub fn projection(&self) -> Vec<String> {
        self.select
            .iter()
            .map(|s| s.output_var().to_string())
            .collect()
    }
}

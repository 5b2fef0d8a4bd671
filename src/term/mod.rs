//! # RDF Term and Scalar Value Model
//!
//! Core value types flowing through the engine: `Scalar` (typed column
//! values), `Term` (RDF terms produced by mappings), and `Solution`
//! (variable bindings emitted by the executor).
//!
//! The single [`coerce`] function is shared by FILTER and VALUES pushdown so
//! that pushdown stays idempotent and auditable.

pub mod arrow_convert;

pub use arrow_convert::{batch_to_rows, rows_to_batch, scalar_from_array};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Column datatypes understood by the coercion table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Date,
    Timestamp,
}

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

impl DataType {
    /// Resolve an `rr:datatype` IRI to a column datatype.
    ///
    /// Unknown IRIs return `None`; callers preserve the raw string so the
    /// executor can fall back to string-typed literals.
    pub fn from_xsd(iri: &str) -> Option<Self> {
        let local = iri.strip_prefix(XSD)?;
        match local {
            "boolean" => Some(DataType::Boolean),
            "int" | "integer" => Some(DataType::Int),
            "long" => Some(DataType::Long),
            "float" => Some(DataType::Float),
            "double" | "decimal" => Some(DataType::Double),
            "string" => Some(DataType::String),
            "date" => Some(DataType::Date),
            "dateTime" => Some(DataType::Timestamp),
            _ => None,
        }
    }

    pub fn xsd_iri(&self) -> String {
        let local = match self {
            DataType::Boolean => "boolean",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Timestamp => "dateTime",
        };
        format!("{XSD}{local}")
    }
}

/// A typed column value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// Convenience constructor for string scalars
    pub fn string(s: impl Into<String>) -> Self {
        Scalar::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// The datatype this scalar carries (`None` for null)
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Boolean(_) => Some(DataType::Boolean),
            Scalar::Int(_) => Some(DataType::Int),
            Scalar::Long(_) => Some(DataType::Long),
            Scalar::Float(_) => Some(DataType::Float),
            Scalar::Double(_) => Some(DataType::Double),
            Scalar::String(_) => Some(DataType::String),
            Scalar::Date(_) => Some(DataType::Date),
            Scalar::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(f64::from(*v)),
            Scalar::Long(v) => Some(*v as f64),
            Scalar::Float(v) => Some(f64::from(*v)),
            Scalar::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(i64::from(*v)),
            Scalar::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two scalars with numeric promotion.
    ///
    /// Integers compare exactly; any float operand promotes both sides to
    /// f64. Returns `None` for incomparable types or NaN.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Null, _) | (_, Scalar::Null) => None,
            (Scalar::String(a), Scalar::String(b)) => Some(a.cmp(b)),
            (Scalar::Boolean(a), Scalar::Boolean(b)) => Some(a.cmp(b)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => Some(a.cmp(b)),
            _ => {
                if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
                    Some(a.cmp(&b))
                } else if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                    a.partial_cmp(&b)
                } else {
                    None
                }
            }
        }
    }

    /// Total ordering for sort stability: type rank first, then value.
    /// Used by ORDER BY and group-key ordering where `compare` is partial.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        let rank = |s: &Scalar| match s {
            Scalar::Null => 0u8,
            Scalar::Boolean(_) => 1,
            Scalar::Int(_) | Scalar::Long(_) | Scalar::Float(_) | Scalar::Double(_) => 2,
            Scalar::String(_) => 3,
            Scalar::Date(_) => 4,
            Scalar::Timestamp(_) => 5,
        };
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => match (self, other) {
                (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
                (Scalar::Double(a), Scalar::Double(b)) => a.total_cmp(b),
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Double(a), Scalar::Double(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Long(a), Scalar::Long(b)) => a == b,
            (Scalar::String(a), Scalar::String(b)) => a == b,
            (Scalar::Date(a), Scalar::Date(b)) => a == b,
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Null => {}
            Scalar::Boolean(v) => v.hash(state),
            Scalar::Int(v) => v.hash(state),
            Scalar::Long(v) => v.hash(state),
            Scalar::Float(v) => v.to_bits().hash(state),
            Scalar::Double(v) => v.to_bits().hash(state),
            Scalar::String(v) => v.hash(state),
            Scalar::Date(v) => v.hash(state),
            Scalar::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Boolean(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Double(v) => write!(f, "{v}"),
            Scalar::String(v) => write!(f, "{v}"),
            Scalar::Date(v) => write!(f, "{v}"),
            Scalar::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// Failure to coerce a value to a column datatype.
///
/// Recovered at plan time: the pushdown entry falls back to residual filter
/// evaluation and the failure is logged, never surfaced.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot coerce {value} to {target:?}")]
pub struct CoercionError {
    pub value: Scalar,
    pub target: DataType,
}

/// Coerce a scalar to a target column datatype.
///
/// This is the single coercion path used by both FILTER and VALUES pushdown.
pub fn coerce(value: &Scalar, target: DataType) -> Result<Scalar, CoercionError> {
    let fail = || CoercionError {
        value: value.clone(),
        target,
    };

    if value.data_type() == Some(target) {
        return Ok(value.clone());
    }

    match (value, target) {
        (Scalar::String(s), DataType::Boolean) => match s.as_str() {
            "true" => Ok(Scalar::Boolean(true)),
            "false" => Ok(Scalar::Boolean(false)),
            _ => Err(fail()),
        },
        (Scalar::String(s), DataType::Int) => {
            s.parse::<i32>().map(Scalar::Int).map_err(|_| fail())
        }
        (Scalar::String(s), DataType::Long) => {
            s.parse::<i64>().map(Scalar::Long).map_err(|_| fail())
        }
        (Scalar::String(s), DataType::Float) => {
            s.parse::<f32>().map(Scalar::Float).map_err(|_| fail())
        }
        (Scalar::String(s), DataType::Double) => {
            s.parse::<f64>().map(Scalar::Double).map_err(|_| fail())
        }
        (Scalar::String(s), DataType::Date) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Scalar::Date)
            .map_err(|_| fail()),
        (Scalar::String(s), DataType::Timestamp) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Scalar::Timestamp(dt.with_timezone(&Utc)))
            .map_err(|_| fail()),
        (Scalar::Int(v), DataType::Long) => Ok(Scalar::Long(i64::from(*v))),
        (Scalar::Int(v), DataType::Float) => Ok(Scalar::Float(*v as f32)),
        (Scalar::Int(v), DataType::Double) => Ok(Scalar::Double(f64::from(*v))),
        (Scalar::Long(v), DataType::Int) => i32::try_from(*v).map(Scalar::Int).map_err(|_| fail()),
        (Scalar::Long(v), DataType::Float) => Ok(Scalar::Float(*v as f32)),
        (Scalar::Long(v), DataType::Double) => Ok(Scalar::Double(*v as f64)),
        (Scalar::Float(v), DataType::Double) => Ok(Scalar::Double(f64::from(*v))),
        (Scalar::Double(v), DataType::Float) => Ok(Scalar::Float(*v as f32)),
        (v, DataType::String) => Ok(Scalar::String(v.to_string())),
        _ => Err(fail()),
    }
}

/// An RDF term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(Scalar),
}

impl Term {
    pub fn iri(s: impl Into<String>) -> Self {
        Term::Iri(s.into())
    }

    pub fn literal(s: Scalar) -> Self {
        Term::Literal(s)
    }

    pub fn as_literal(&self) -> Option<&Scalar> {
        match self {
            Term::Literal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(s) => Some(s),
            _ => None,
        }
    }

    /// Total ordering across terms: blanks < IRIs < literals, literals by
    /// scalar total order. Used by ORDER BY and group-key ordering.
    pub fn total_cmp(&self, other: &Term) -> Ordering {
        let rank = |t: &Term| match t {
            Term::Blank(_) => 0u8,
            Term::Iri(_) => 1,
            Term::Literal(_) => 2,
        };
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => match (self, other) {
                (Term::Blank(a), Term::Blank(b)) | (Term::Iri(a), Term::Iri(b)) => a.cmp(b),
                (Term::Literal(a), Term::Literal(b)) => a.total_cmp(b),
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(s) => write!(f, "<{s}>"),
            Term::Blank(s) => write!(f, "_:{s}"),
            Term::Literal(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Build an RDF term from a raw column value, honoring a datatype hint.
///
/// The hint comes from the mapping's `rr:datatype`; without one the scalar's
/// own type stands.
pub fn term_from_scalar(value: Scalar, datatype_hint: Option<&str>) -> Term {
    match datatype_hint.and_then(DataType::from_xsd) {
        Some(target) => match coerce(&value, target) {
            Ok(coerced) => Term::Literal(coerced),
            Err(_) => Term::Literal(value),
        },
        None => Term::Literal(value),
    }
}

/// A set of variable bindings produced by the executor.
///
/// Backed by a `BTreeMap` so iteration order (and thus hashing) is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Solution {
    bindings: BTreeMap<String, Term>,
}

impl Solution {
    pub fn new() -> Self {
        Solution::default()
    }

    pub fn bind(&mut self, var: impl Into<String>, term: Term) {
        self.bindings.insert(var.into(), term);
    }

    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.get(var)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.bindings.contains_key(var)
    }

    pub fn unbind(&mut self, var: &str) {
        self.bindings.remove(var);
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Variables bound in both solutions
    pub fn shared_vars<'a>(&'a self, other: &'a Solution) -> Vec<&'a str> {
        self.bindings
            .keys()
            .filter(|k| other.contains(k))
            .map(String::as_str)
            .collect()
    }

    /// SPARQL compatibility: solutions merge only if they agree on every
    /// shared variable.
    pub fn is_compatible(&self, other: &Solution) -> bool {
        self.bindings
            .iter()
            .all(|(var, term)| other.get(var).map_or(true, |t| t == term))
    }

    /// Merge two compatible solutions; `None` if they disagree.
    pub fn merged(&self, other: &Solution) -> Option<Solution> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut out = self.clone();
        for (var, term) in &other.bindings {
            out.bindings.insert(var.clone(), term.clone());
        }
        Some(out)
    }

    /// Restrict to the given variables (used after SELECT rewrite)
    pub fn project(&self, vars: &[String]) -> Solution {
        let mut out = Solution::new();
        for var in vars {
            if let Some(term) = self.get(var) {
                out.bind(var.clone(), term.clone());
            }
        }
        out
    }
}

impl FromIterator<(String, Term)> for Solution {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Solution {
            bindings: iter.into_iter().collect(),
        }
    }
}

/// A raw row produced by a table scan (column name → value)
pub type Row = std::collections::HashMap<String, Scalar>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_numeric_promotion() {
        assert_eq!(
            Scalar::Int(3).compare(&Scalar::Long(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Scalar::Int(3).compare(&Scalar::Double(3.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Scalar::Long(10).compare(&Scalar::Float(2.0)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_compare_incompatible_types() {
        assert_eq!(Scalar::string("a").compare(&Scalar::Int(1)), None);
        assert_eq!(Scalar::Null.compare(&Scalar::Null), None);
    }

    #[test]
    fn test_coerce_string_to_numeric() {
        assert_eq!(
            coerce(&Scalar::string("42"), DataType::Long).unwrap(),
            Scalar::Long(42)
        );
        assert_eq!(
            coerce(&Scalar::string("2.5"), DataType::Double).unwrap(),
            Scalar::Double(2.5)
        );
        assert!(coerce(&Scalar::string("nope"), DataType::Int).is_err());
    }

    #[test]
    fn test_coerce_date_and_timestamp() {
        let d = coerce(&Scalar::string("2024-01-15"), DataType::Date).unwrap();
        assert_eq!(
            d,
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );

        let t = coerce(&Scalar::string("2024-01-15T00:00:00Z"), DataType::Timestamp).unwrap();
        match t {
            Scalar::Timestamp(ts) => assert_eq!(ts.timestamp(), 1_705_276_800),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_coerce_long_to_int_overflow() {
        assert!(coerce(&Scalar::Long(i64::MAX), DataType::Int).is_err());
        assert_eq!(
            coerce(&Scalar::Long(7), DataType::Int).unwrap(),
            Scalar::Int(7)
        );
    }

    #[test]
    fn test_solution_compatibility() {
        let mut a = Solution::new();
        a.bind("x", Term::iri("http://ex.org/1"));
        a.bind("y", Term::Literal(Scalar::Int(1)));

        let mut b = Solution::new();
        b.bind("x", Term::iri("http://ex.org/1"));
        b.bind("z", Term::Literal(Scalar::Int(2)));

        assert!(a.is_compatible(&b));
        let merged = a.merged(&b).unwrap();
        assert_eq!(merged.len(), 3);

        let mut c = Solution::new();
        c.bind("x", Term::iri("http://ex.org/2"));
        assert!(!a.is_compatible(&c));
        assert!(a.merged(&c).is_none());
    }

    #[test]
    fn test_xsd_round_trip() {
        for dt in [
            DataType::Boolean,
            DataType::Int,
            DataType::Long,
            DataType::Float,
            DataType::Double,
            DataType::String,
            DataType::Date,
            DataType::Timestamp,
        ] {
            assert_eq!(DataType::from_xsd(&dt.xsd_iri()), Some(dt));
        }
        assert_eq!(DataType::from_xsd("http://ex.org/custom"), None);
    }

    #[test]
    fn test_term_from_scalar_with_hint() {
        let xsd_long = format!("{XSD}long");
        let term = term_from_scalar(Scalar::string("12"), Some(&xsd_long));
        assert_eq!(term, Term::Literal(Scalar::Long(12)));

        // Unknown datatype IRIs keep the raw value
        let term = term_from_scalar(Scalar::string("12"), Some("http://ex.org/odd"));
        assert_eq!(term, Term::Literal(Scalar::string("12")));
    }
}

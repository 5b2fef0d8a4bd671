//! # Table Source Adapters
//!
//! A [`TableSource`] exposes a tabular dataset to the executor: projected
//! row or Arrow-batch scans, schema and statistics lookup, and file
//! planning with predicate pruning. The warehouse adapter
//! ([`warehouse::WarehouseTable`]) is the Iceberg-style implementation;
//! [`files::FileTable`] serves plain R2RML-mapped parquet files.

pub mod files;
pub mod warehouse;

pub use files::FileTable;
pub use warehouse::{TableWriter, WarehouseTable};

use crate::error::VgResult;
use crate::term::{DataType, Row, Scalar};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Comparison operators a source may accept as pushdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotNull,
    IsNull,
    Between,
}

/// A source-native predicate tree.
///
/// Leaf comparisons carry their operands in `values`: one value for the
/// scalar operators, any number for `in`, exactly two for `between`, none
/// for the null tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "op")]
pub enum PushdownPredicate {
    Compare {
        column: String,
        cmp: PredOp,
        values: Vec<Scalar>,
    },
    And { predicates: Vec<PushdownPredicate> },
    Or { predicates: Vec<PushdownPredicate> },
    Not { predicate: Box<PushdownPredicate> },
}

impl PushdownPredicate {
    pub fn compare(column: impl Into<String>, cmp: PredOp, value: Scalar) -> Self {
        PushdownPredicate::Compare {
            column: column.into(),
            cmp,
            values: vec![value],
        }
    }

    pub fn eq(column: impl Into<String>, value: Scalar) -> Self {
        Self::compare(column, PredOp::Eq, value)
    }

    /// `in` with a single value collapses to `eq`
    pub fn in_list(column: impl Into<String>, mut values: Vec<Scalar>) -> Self {
        let column = column.into();
        if values.len() == 1 {
            PushdownPredicate::eq(column, values.remove(0))
        } else {
            PushdownPredicate::Compare {
                column,
                cmp: PredOp::In,
                values,
            }
        }
    }

    pub fn between(column: impl Into<String>, lo: Scalar, hi: Scalar) -> Self {
        PushdownPredicate::Compare {
            column: column.into(),
            cmp: PredOp::Between,
            values: vec![lo, hi],
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        PushdownPredicate::Compare {
            column: column.into(),
            cmp: PredOp::NotNull,
            values: Vec::new(),
        }
    }

    /// Columns referenced anywhere in this predicate tree
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PushdownPredicate::Compare { column, .. } => out.push(column),
            PushdownPredicate::And { predicates } | PushdownPredicate::Or { predicates } => {
                for p in predicates {
                    p.collect_columns(out);
                }
            }
            PushdownPredicate::Not { predicate } => predicate.collect_columns(out),
        }
    }

    /// Evaluate the predicate against a row. Null comparisons are false
    /// except for the explicit null tests.
    pub fn eval_row(&self, row: &Row) -> bool {
        match self {
            PushdownPredicate::Compare {
                column,
                cmp,
                values,
            } => {
                let value = row.get(column.as_str()).unwrap_or(&Scalar::Null);
                eval_compare(value, *cmp, values)
            }
            PushdownPredicate::And { predicates } => predicates.iter().all(|p| p.eval_row(row)),
            PushdownPredicate::Or { predicates } => predicates.iter().any(|p| p.eval_row(row)),
            PushdownPredicate::Not { predicate } => !predicate.eval_row(row),
        }
    }
}

fn eval_compare(value: &Scalar, cmp: PredOp, operands: &[Scalar]) -> bool {
    match cmp {
        PredOp::IsNull => return value.is_null(),
        PredOp::NotNull => return !value.is_null(),
        _ => {}
    }
    if value.is_null() {
        return false;
    }
    match cmp {
        PredOp::Eq => operands.first().map_or(false, |v| value == v),
        PredOp::Neq => operands.first().map_or(false, |v| {
            !v.is_null() && value != v
        }),
        PredOp::Lt | PredOp::Lte | PredOp::Gt | PredOp::Gte => {
            let Some(ord) = operands.first().and_then(|v| value.compare(v)) else {
                return false;
            };
            match cmp {
                PredOp::Lt => ord == std::cmp::Ordering::Less,
                PredOp::Lte => ord != std::cmp::Ordering::Greater,
                PredOp::Gt => ord == std::cmp::Ordering::Greater,
                PredOp::Gte => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }
        }
        // an empty IN list is satisfiable by no rows
        PredOp::In => operands.iter().any(|v| value == v),
        PredOp::Between => {
            let (Some(lo), Some(hi)) = (operands.first(), operands.get(1)) else {
                return false;
            };
            use std::cmp::Ordering;
            let ge_lo = matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal));
            let le_hi = matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal));
            ge_lo && le_hi
        }
        PredOp::IsNull | PredOp::NotNull => unreachable!(),
    }
}

/// Snapshot pin for a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTravel {
    SnapshotId(i64),
    AsOfTime(DateTime<Utc>),
}

impl fmt::Display for TimeTravel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeTravel::SnapshotId(id) => write!(f, "t:{id}"),
            TimeTravel::AsOfTime(ts) => write!(f, "iso:{}", ts.to_rfc3339()),
        }
    }
}

/// Options for a single scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Columns to project; empty means all
    pub columns: Vec<String>,
    pub predicates: Vec<PushdownPredicate>,
    pub time_travel: Option<TimeTravel>,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn projecting(columns: Vec<String>) -> Self {
        ScanOptions {
            columns,
            ..Default::default()
        }
    }
}

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_partition_key: bool,
}

/// Schema of a scanned table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    pub partition_spec: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> Option<DataType> {
        self.column(name).map(|c| c.data_type)
    }
}

/// Table statistics for the resolved snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStatistics {
    pub row_count: u64,
    pub file_count: u64,
    pub snapshot_id: i64,
}

/// A data file selected by `plan_files`
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFile {
    pub path: String,
    pub row_count: u64,
}

/// Lazy row scan
pub type RowScan = Box<dyn Iterator<Item = VgResult<Row>> + Send>;

/// Lazy Arrow-batch scan
pub type BatchScan = Box<dyn Iterator<Item = VgResult<RecordBatch>> + Send>;

/// A tabular dataset the executor can scan
pub trait TableSource: Send + Sync {
    fn table_name(&self) -> &str;

    fn scan_rows(&self, opts: &ScanOptions) -> VgResult<RowScan>;

    fn scan_batches(&self, opts: &ScanOptions) -> VgResult<BatchScan>;

    fn get_schema(&self, opts: &ScanOptions) -> VgResult<TableSchema>;

    fn get_statistics(&self, opts: &ScanOptions) -> VgResult<TableStatistics>;

    /// Files a scan with these options would read, after pruning
    fn plan_files(&self, opts: &ScanOptions) -> VgResult<Vec<PlannedFile>>;

    fn supported_predicates(&self) -> HashSet<PredOp> {
        [
            PredOp::Eq,
            PredOp::Neq,
            PredOp::Lt,
            PredOp::Lte,
            PredOp::Gt,
            PredOp::Gte,
            PredOp::In,
            PredOp::NotNull,
            PredOp::IsNull,
            PredOp::Between,
        ]
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Scalar)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eval_eq_and_neq() {
        let r = row(&[("country", Scalar::string("US"))]);
        assert!(PushdownPredicate::eq("country", Scalar::string("US")).eval_row(&r));
        assert!(!PushdownPredicate::eq("country", Scalar::string("FR")).eval_row(&r));
        assert!(
            PushdownPredicate::compare("country", PredOp::Neq, Scalar::string("FR")).eval_row(&r)
        );
    }

    #[test]
    fn test_eval_null_semantics() {
        let r = row(&[("x", Scalar::Null)]);
        assert!(!PushdownPredicate::eq("x", Scalar::Int(1)).eval_row(&r));
        assert!(PushdownPredicate::compare("x", PredOp::IsNull, Scalar::Null).eval_row(&r));
        assert!(!PushdownPredicate::not_null("x").eval_row(&r));
        // missing column behaves like null
        assert!(!PushdownPredicate::eq("missing", Scalar::Int(1)).eval_row(&r));
    }

    #[test]
    fn test_eval_in_empty_matches_nothing() {
        let r = row(&[("x", Scalar::Int(1))]);
        let pred = PushdownPredicate::Compare {
            column: "x".to_string(),
            cmp: PredOp::In,
            values: Vec::new(),
        };
        assert!(!pred.eval_row(&r));
    }

    #[test]
    fn test_in_single_value_collapses_to_eq() {
        let pred = PushdownPredicate::in_list("x", vec![Scalar::Int(5)]);
        assert_eq!(pred, PushdownPredicate::eq("x", Scalar::Int(5)));
    }

    #[test]
    fn test_eval_between() {
        let r = row(&[("x", Scalar::Int(5))]);
        assert!(PushdownPredicate::between("x", Scalar::Int(1), Scalar::Int(10)).eval_row(&r));
        assert!(PushdownPredicate::between("x", Scalar::Int(5), Scalar::Int(5)).eval_row(&r));
        assert!(!PushdownPredicate::between("x", Scalar::Int(6), Scalar::Int(10)).eval_row(&r));
    }

    #[test]
    fn test_eval_nested() {
        let r = row(&[("a", Scalar::Int(3)), ("b", Scalar::string("y"))]);
        let pred = PushdownPredicate::And {
            predicates: vec![
                PushdownPredicate::compare("a", PredOp::Gte, Scalar::Int(2)),
                PushdownPredicate::Or {
                    predicates: vec![
                        PushdownPredicate::eq("b", Scalar::string("y")),
                        PushdownPredicate::eq("b", Scalar::string("z")),
                    ],
                },
            ],
        };
        assert!(pred.eval_row(&r));
    }
}

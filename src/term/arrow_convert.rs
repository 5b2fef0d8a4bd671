//! Arrow Conversion Utilities
//!
//! Conversion between row maps and Arrow `RecordBatch` format, used by the
//! columnar executor and by the warehouse writer.

use super::{DataType, Row, Scalar};
use crate::error::{VgError, VgResult};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

impl DataType {
    /// Arrow representation of this column datatype
    pub fn to_arrow(self) -> ArrowDataType {
        match self {
            DataType::Boolean => ArrowDataType::Boolean,
            DataType::Int => ArrowDataType::Int32,
            DataType::Long => ArrowDataType::Int64,
            DataType::Float => ArrowDataType::Float32,
            DataType::Double => ArrowDataType::Float64,
            DataType::String => ArrowDataType::Utf8,
            DataType::Date => ArrowDataType::Date32,
            DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    pub fn from_arrow(dt: &ArrowDataType) -> Option<Self> {
        match dt {
            ArrowDataType::Boolean => Some(DataType::Boolean),
            ArrowDataType::Int32 => Some(DataType::Int),
            ArrowDataType::Int64 => Some(DataType::Long),
            ArrowDataType::Float32 => Some(DataType::Float),
            ArrowDataType::Float64 => Some(DataType::Double),
            ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Some(DataType::String),
            ArrowDataType::Date32 => Some(DataType::Date),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, _) => Some(DataType::Timestamp),
            _ => None,
        }
    }
}

/// Read one value out of an Arrow array
pub fn scalar_from_array(array: &dyn Array, idx: usize) -> VgResult<Scalar> {
    if array.is_null(idx) {
        return Ok(Scalar::Null);
    }
    let any = array.as_any();
    let scalar = match array.data_type() {
        ArrowDataType::Boolean => {
            Scalar::Boolean(any.downcast_ref::<BooleanArray>().unwrap().value(idx))
        }
        ArrowDataType::Int32 => Scalar::Int(any.downcast_ref::<Int32Array>().unwrap().value(idx)),
        ArrowDataType::Int64 => Scalar::Long(any.downcast_ref::<Int64Array>().unwrap().value(idx)),
        ArrowDataType::Float32 => {
            Scalar::Float(any.downcast_ref::<Float32Array>().unwrap().value(idx))
        }
        ArrowDataType::Float64 => {
            Scalar::Double(any.downcast_ref::<Float64Array>().unwrap().value(idx))
        }
        ArrowDataType::Utf8 => {
            Scalar::String(any.downcast_ref::<StringArray>().unwrap().value(idx).to_string())
        }
        ArrowDataType::Date32 => {
            let days = any.downcast_ref::<Date32Array>().unwrap().value(idx);
            let date = epoch_date() + chrono::Duration::days(i64::from(days));
            Scalar::Date(date)
        }
        ArrowDataType::Timestamp(TimeUnit::Microsecond, _) => {
            let micros = any
                .downcast_ref::<TimestampMicrosecondArray>()
                .unwrap()
                .value(idx);
            match DateTime::<Utc>::from_timestamp_micros(micros) {
                Some(ts) => Scalar::Timestamp(ts),
                None => Scalar::Null,
            }
        }
        other => {
            return Err(VgError::InvalidConfig {
                field: "schema".to_string(),
                reason: format!("unsupported Arrow type {other:?}"),
            })
        }
    };
    Ok(scalar)
}

/// Convert a `RecordBatch` into row maps (used at the columnar plan root)
pub fn batch_to_rows(batch: &RecordBatch) -> VgResult<Vec<Row>> {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row_idx in 0..batch.num_rows() {
        let mut row = Row::with_capacity(batch.num_columns());
        for (col_idx, field) in schema.fields().iter().enumerate() {
            let value = scalar_from_array(batch.column(col_idx).as_ref(), row_idx)?;
            row.insert(field.name().clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Build a `RecordBatch` from row maps for a declared column layout.
///
/// Missing or null values become Arrow nulls; values of the wrong type fail.
pub fn rows_to_batch(columns: &[(String, DataType)], rows: &[Row]) -> VgResult<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, dt)| Field::new(name, dt.to_arrow(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (name, dt) in columns {
        let array = build_column(name, *dt, rows)?;
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn build_column(name: &str, dt: DataType, rows: &[Row]) -> VgResult<ArrayRef> {
    let type_error = |value: &Scalar| VgError::InvalidConfig {
        field: name.to_string(),
        reason: format!("value {value} does not fit column type {dt:?}"),
    };

    macro_rules! collect {
        ($variant:ident, $ty:ty, $arr:ty) => {{
            let mut values: Vec<Option<$ty>> = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(name) {
                    None | Some(Scalar::Null) => values.push(None),
                    Some(Scalar::$variant(v)) => values.push(Some(v.clone())),
                    Some(other) => return Err(type_error(other)),
                }
            }
            Arc::new(<$arr>::from(values)) as ArrayRef
        }};
    }

    let array = match dt {
        DataType::Boolean => collect!(Boolean, bool, BooleanArray),
        DataType::Int => collect!(Int, i32, Int32Array),
        DataType::Long => collect!(Long, i64, Int64Array),
        DataType::Float => collect!(Float, f32, Float32Array),
        DataType::Double => collect!(Double, f64, Float64Array),
        DataType::String => {
            let mut values: Vec<Option<String>> = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(name) {
                    None | Some(Scalar::Null) => values.push(None),
                    Some(Scalar::String(v)) => values.push(Some(v.clone())),
                    Some(other) => return Err(type_error(other)),
                }
            }
            Arc::new(values.into_iter().collect::<StringArray>()) as ArrayRef
        }
        DataType::Date => {
            let mut values: Vec<Option<i32>> = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(name) {
                    None | Some(Scalar::Null) => values.push(None),
                    Some(Scalar::Date(d)) => {
                        values.push(Some((*d - epoch_date()).num_days() as i32));
                    }
                    Some(other) => return Err(type_error(other)),
                }
            }
            Arc::new(Date32Array::from(values)) as ArrayRef
        }
        DataType::Timestamp => {
            let mut values: Vec<Option<i64>> = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(name) {
                    None | Some(Scalar::Null) => values.push(None),
                    Some(Scalar::Timestamp(ts)) => values.push(Some(ts.timestamp_micros())),
                    Some(other) => return Err(type_error(other)),
                }
            }
            Arc::new(TimestampMicrosecondArray::from(values)) as ArrayRef
        }
    };
    Ok(array)
}

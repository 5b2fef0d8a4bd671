//! Iceberg-style warehouse table adapter.
//!
//! Layout under `<warehouse>/<table>/`:
//!
//! ```text
//! metadata/metadata.json      table schema, partition spec, snapshot log
//! metadata/manifest-<id>.json data files of snapshot <id>, with partition
//!                             values and per-column min/max bounds
//! data/*.parquet              row data (snappy-compressed)
//! ```
//!
//! Scans resolve a snapshot (latest, pinned id, or as-of instant), prune
//! data files by partition values and column bounds, then read the
//! surviving parquet files with column projection. Predicates are also
//! applied row-wise, so pruning is purely a performance optimization.

use super::{
    BatchScan, ColumnInfo, PlannedFile, PredOp, PushdownPredicate, RowScan, ScanOptions,
    TableSchema, TableSource, TableStatistics, TimeTravel,
};
use crate::error::{VgError, VgResult};
use crate::term::arrow_convert::{batch_to_rows, rows_to_batch, scalar_from_array};
use crate::term::{DataType, Row, Scalar};
use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableMetadata {
    format_version: u32,
    table: String,
    schema: Vec<ColumnInfo>,
    partition_columns: Vec<String>,
    /// -1 until the first commit
    current_snapshot_id: i64,
    snapshots: Vec<SnapshotMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    snapshot_id: i64,
    timestamp_ms: i64,
    /// manifest file name under `metadata/`
    manifest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnBounds {
    min: Scalar,
    max: Scalar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataFileMeta {
    /// file name under `data/`
    path: String,
    row_count: u64,
    partition: BTreeMap<String, Scalar>,
    bounds: BTreeMap<String, ColumnBounds>,
}

fn metadata_path(root: &Path) -> PathBuf {
    root.join("metadata").join("metadata.json")
}

fn read_metadata(root: &Path) -> VgResult<TableMetadata> {
    let path = metadata_path(root);
    let file = File::open(&path).map_err(|_| {
        VgError::MissingSource(format!("{}", root.display()))
    })?;
    Ok(serde_json::from_reader(file)?)
}

fn write_metadata(root: &Path, metadata: &TableMetadata) -> VgResult<()> {
    let file = File::create(metadata_path(root))?;
    serde_json::to_writer_pretty(file, metadata)?;
    Ok(())
}

/// Read access to one warehouse table
pub struct WarehouseTable {
    root: PathBuf,
    table: String,
    metadata: TableMetadata,
}

impl WarehouseTable {
    /// Open `<warehouse>/<table>/`, reading its metadata document
    pub fn open(warehouse: &Path, table: &str) -> VgResult<Self> {
        let root = warehouse.join(table);
        let metadata = read_metadata(&root)?;
        Ok(WarehouseTable {
            root,
            table: table.to_string(),
            metadata,
        })
    }

    fn resolve_snapshot(&self, tt: Option<TimeTravel>) -> VgResult<Option<&SnapshotMeta>> {
        match tt {
            None => {
                if self.metadata.current_snapshot_id < 0 {
                    return Ok(None);
                }
                Ok(self
                    .metadata
                    .snapshots
                    .iter()
                    .find(|s| s.snapshot_id == self.metadata.current_snapshot_id))
            }
            Some(TimeTravel::SnapshotId(id)) => self
                .metadata
                .snapshots
                .iter()
                .find(|s| s.snapshot_id == id)
                .map(Some)
                .ok_or_else(|| VgError::InvalidTimeTravel {
                    alias: self.table.clone(),
                    requested: format!("t:{id}"),
                }),
            Some(TimeTravel::AsOfTime(ts)) => {
                let cutoff = ts.timestamp_millis();
                self.metadata
                    .snapshots
                    .iter()
                    .filter(|s| s.timestamp_ms <= cutoff)
                    .max_by_key(|s| s.timestamp_ms)
                    .map(Some)
                    .ok_or_else(|| VgError::InvalidTimeTravel {
                        alias: self.table.clone(),
                        requested: format!("iso:{}", ts.to_rfc3339()),
                    })
            }
        }
    }

    fn load_manifest(&self, snapshot: &SnapshotMeta) -> VgResult<Vec<DataFileMeta>> {
        let path = self.root.join("metadata").join(&snapshot.manifest);
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    fn planned_files(&self, opts: &ScanOptions) -> VgResult<Vec<DataFileMeta>> {
        let Some(snapshot) = self.resolve_snapshot(opts.time_travel)? else {
            return Ok(Vec::new());
        };
        let manifest = self.load_manifest(snapshot)?;
        let total = manifest.len();
        let kept: Vec<DataFileMeta> = manifest
            .into_iter()
            .filter(|f| opts.predicates.iter().all(|p| file_may_match(f, p)))
            .collect();
        debug!(
            table = %self.table,
            total_files = total,
            planned_files = kept.len(),
            "planned scan"
        );
        Ok(kept)
    }

    /// Columns a reader must materialize: the projection plus every
    /// predicate column, so residual row filtering can evaluate.
    fn read_columns(&self, opts: &ScanOptions) -> Vec<String> {
        if opts.columns.is_empty() {
            return self.metadata.schema.iter().map(|c| c.name.clone()).collect();
        }
        let mut columns = opts.columns.clone();
        for pred in &opts.predicates {
            for col in pred.columns() {
                if !columns.iter().any(|c| c == col) {
                    columns.push(col.to_string());
                }
            }
        }
        columns
    }

    fn open_file_reader(
        &self,
        file_name: &str,
        columns: &[String],
    ) -> VgResult<ParquetRecordBatchReader> {
        let path = self.root.join("data").join(file_name);
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        let indices: Vec<usize> = builder
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| columns.iter().any(|c| c == f.name()))
            .map(|(i, _)| i)
            .collect();
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);

        Ok(builder.with_projection(mask).build()?)
    }
}

impl TableSource for WarehouseTable {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn scan_rows(&self, opts: &ScanOptions) -> VgResult<RowScan> {
        if opts.limit == Some(0) {
            return Ok(Box::new(std::iter::empty()));
        }
        let batches = self.scan_batches_inner(opts, false)?;
        let limit = opts.limit;
        let mut yielded = 0usize;
        let iter = batches
            .flat_map(|batch| match batch {
                Ok(batch) => match batch_to_rows(&batch) {
                    Ok(rows) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                },
                Err(e) => vec![Err(e)],
            })
            .take_while(move |item| {
                if item.is_err() {
                    return true;
                }
                match limit {
                    Some(n) => {
                        yielded += 1;
                        yielded <= n
                    }
                    None => true,
                }
            });
        Ok(Box::new(iter))
    }

    fn scan_batches(&self, opts: &ScanOptions) -> VgResult<BatchScan> {
        if opts.limit == Some(0) {
            return Ok(Box::new(std::iter::empty()));
        }
        self.scan_batches_inner(opts, true)
    }

    fn get_schema(&self, _opts: &ScanOptions) -> VgResult<TableSchema> {
        Ok(TableSchema {
            columns: self.metadata.schema.clone(),
            partition_spec: self.metadata.partition_columns.clone(),
        })
    }

    fn get_statistics(&self, opts: &ScanOptions) -> VgResult<TableStatistics> {
        let Some(snapshot) = self.resolve_snapshot(opts.time_travel)? else {
            return Ok(TableStatistics {
                row_count: 0,
                file_count: 0,
                snapshot_id: -1,
            });
        };
        let manifest = self.load_manifest(snapshot)?;
        Ok(TableStatistics {
            row_count: manifest.iter().map(|f| f.row_count).sum(),
            file_count: manifest.len() as u64,
            snapshot_id: snapshot.snapshot_id,
        })
    }

    fn plan_files(&self, opts: &ScanOptions) -> VgResult<Vec<PlannedFile>> {
        Ok(self
            .planned_files(opts)?
            .into_iter()
            .map(|f| PlannedFile {
                path: f.path,
                row_count: f.row_count,
            })
            .collect())
    }
}

impl WarehouseTable {
    fn scan_batches_inner(&self, opts: &ScanOptions, project_output: bool) -> VgResult<BatchScan> {
        let files: VecDeque<DataFileMeta> = self.planned_files(opts)?.into();
        let read_columns = self.read_columns(opts);
        let output_columns = if project_output && !opts.columns.is_empty() {
            Some(opts.columns.clone())
        } else {
            None
        };

        Ok(Box::new(BatchIter {
            table: WarehouseTable {
                root: self.root.clone(),
                table: self.table.clone(),
                metadata: self.metadata.clone(),
            },
            files,
            reader: None,
            read_columns,
            output_columns,
            predicates: opts.predicates.clone(),
            remaining: opts.limit,
        }))
    }
}

struct BatchIter {
    table: WarehouseTable,
    files: VecDeque<DataFileMeta>,
    reader: Option<ParquetRecordBatchReader>,
    read_columns: Vec<String>,
    /// restrict emitted batches to these columns (batch scans only)
    output_columns: Option<Vec<String>>,
    predicates: Vec<PushdownPredicate>,
    remaining: Option<usize>,
}

impl BatchIter {
    fn filter_batch(&self, batch: &RecordBatch) -> VgResult<RecordBatch> {
        if self.predicates.is_empty() {
            return Ok(batch.clone());
        }
        let mut mask = Vec::with_capacity(batch.num_rows());
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = Row::with_capacity(4);
            for pred in &self.predicates {
                for col in pred.columns() {
                    if row.contains_key(col) {
                        continue;
                    }
                    if let Some((col_idx, _)) = schema.column_with_name(col) {
                        row.insert(
                            col.to_string(),
                            scalar_from_array(batch.column(col_idx).as_ref(), row_idx)?,
                        );
                    }
                }
            }
            mask.push(self.predicates.iter().all(|p| p.eval_row(&row)));
        }
        Ok(filter_record_batch(batch, &BooleanArray::from(mask))?)
    }

    fn project_batch(&self, batch: RecordBatch) -> VgResult<RecordBatch> {
        let Some(output) = &self.output_columns else {
            return Ok(batch);
        };
        let schema = batch.schema();
        let indices: Vec<usize> = output
            .iter()
            .filter_map(|c| schema.column_with_name(c).map(|(i, _)| i))
            .collect();
        Ok(batch.project(&indices)?)
    }
}

impl Iterator for BatchIter {
    type Item = VgResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            if let Some(reader) = &mut self.reader {
                match reader.next() {
                    Some(Ok(batch)) => {
                        let filtered = match self.filter_batch(&batch) {
                            Ok(b) => b,
                            Err(e) => return Some(Err(e)),
                        };
                        if filtered.num_rows() == 0 {
                            continue;
                        }
                        let mut out = match self.project_batch(filtered) {
                            Ok(b) => b,
                            Err(e) => return Some(Err(e)),
                        };
                        if let Some(remaining) = self.remaining.as_mut() {
                            if out.num_rows() > *remaining {
                                out = out.slice(0, *remaining);
                            }
                            *remaining -= out.num_rows();
                        }
                        return Some(Ok(out));
                    }
                    Some(Err(e)) => return Some(Err(e.into())),
                    None => self.reader = None,
                }
            }
            let file = self.files.pop_front()?;
            match self.table.open_file_reader(&file.path, &self.read_columns) {
                Ok(reader) => self.reader = Some(reader),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// ============================================================================
// File pruning
// ============================================================================

/// Can any row of this file match the predicate? Partition values evaluate
/// exactly; column bounds prune ranges; anything else is kept.
fn file_may_match(file: &DataFileMeta, pred: &PushdownPredicate) -> bool {
    match pred {
        PushdownPredicate::And { predicates } => {
            predicates.iter().all(|p| file_may_match(file, p))
        }
        PushdownPredicate::Or { predicates } => {
            predicates.is_empty() || predicates.iter().any(|p| file_may_match(file, p))
        }
        PushdownPredicate::Not { predicate } => {
            // exact only for partition-valued comparisons
            if let PushdownPredicate::Compare { column, .. } = predicate.as_ref() {
                if let Some(value) = file.partition.get(column) {
                    let mut row = Row::new();
                    row.insert(column.clone(), value.clone());
                    return !predicate.eval_row(&row);
                }
            }
            true
        }
        PushdownPredicate::Compare {
            column,
            cmp,
            values,
        } => {
            if let Some(value) = file.partition.get(column) {
                let mut row = Row::new();
                row.insert(column.clone(), value.clone());
                return pred.eval_row(&row);
            }
            if let Some(bounds) = file.bounds.get(column) {
                return bounds_may_match(bounds, *cmp, values);
            }
            true
        }
    }
}

fn bounds_may_match(bounds: &ColumnBounds, cmp: PredOp, values: &[Scalar]) -> bool {
    let in_range = |v: &Scalar| {
        matches!(
            v.compare(&bounds.min),
            Some(Ordering::Greater | Ordering::Equal) | None
        ) && matches!(
            v.compare(&bounds.max),
            Some(Ordering::Less | Ordering::Equal) | None
        )
    };
    match cmp {
        PredOp::Eq => values.first().map_or(false, in_range),
        PredOp::In => values.iter().any(in_range),
        PredOp::Neq => values.first().map_or(true, |v| {
            !(bounds.min == bounds.max && &bounds.min == v)
        }),
        PredOp::Lt => values.first().map_or(true, |v| {
            matches!(bounds.min.compare(v), Some(Ordering::Less) | None)
        }),
        PredOp::Lte => values.first().map_or(true, |v| {
            matches!(
                bounds.min.compare(v),
                Some(Ordering::Less | Ordering::Equal) | None
            )
        }),
        PredOp::Gt => values.first().map_or(true, |v| {
            matches!(bounds.max.compare(v), Some(Ordering::Greater) | None)
        }),
        PredOp::Gte => values.first().map_or(true, |v| {
            matches!(
                bounds.max.compare(v),
                Some(Ordering::Greater | Ordering::Equal) | None
            )
        }),
        PredOp::Between => {
            let (Some(lo), Some(hi)) = (values.first(), values.get(1)) else {
                return false;
            };
            let max_ge_lo = matches!(
                bounds.max.compare(lo),
                Some(Ordering::Greater | Ordering::Equal) | None
            );
            let min_le_hi = matches!(
                bounds.min.compare(hi),
                Some(Ordering::Less | Ordering::Equal) | None
            );
            max_ge_lo && min_le_hi
        }
        // null counts are not tracked, so null tests never prune
        PredOp::NotNull | PredOp::IsNull => true,
    }
}

// ============================================================================
// Writer (test/build tooling; query write-back remains out of scope)
// ============================================================================

/// Creates tables and commits snapshots in a warehouse directory
pub struct TableWriter {
    root: PathBuf,
    metadata: TableMetadata,
    pending: Vec<DataFileMeta>,
    file_counter: usize,
}

impl TableWriter {
    /// Create a fresh table with the given schema and partition columns
    pub fn create(
        warehouse: &Path,
        table: &str,
        columns: Vec<(String, DataType)>,
        partition_columns: Vec<String>,
    ) -> VgResult<Self> {
        for partition in &partition_columns {
            if !columns.iter().any(|(name, _)| name == partition) {
                return Err(VgError::InvalidConfig {
                    field: "partition_columns".to_string(),
                    reason: format!("unknown column '{partition}'"),
                });
            }
        }

        let root = warehouse.join(table);
        fs::create_dir_all(root.join("metadata"))?;
        fs::create_dir_all(root.join("data"))?;

        let schema = columns
            .into_iter()
            .map(|(name, data_type)| ColumnInfo {
                is_partition_key: partition_columns.contains(&name),
                name,
                data_type,
            })
            .collect();

        let metadata = TableMetadata {
            format_version: 1,
            table: table.to_string(),
            schema,
            partition_columns,
            current_snapshot_id: -1,
            snapshots: Vec::new(),
        };
        write_metadata(&root, &metadata)?;

        Ok(TableWriter {
            root,
            metadata,
            pending: Vec::new(),
            file_counter: 0,
        })
    }

    /// Open an existing table for a follow-up commit
    pub fn open(warehouse: &Path, table: &str) -> VgResult<Self> {
        let root = warehouse.join(table);
        let metadata = read_metadata(&root)?;
        let file_counter = metadata
            .snapshots
            .len()
            .saturating_mul(1000);
        Ok(TableWriter {
            root,
            metadata,
            pending: Vec::new(),
            file_counter,
        })
    }

    /// Buffer rows as parquet data files, one file per partition value
    pub fn append_rows(&mut self, rows: &[Row]) -> VgResult<()> {
        let columns: Vec<(String, DataType)> = self
            .metadata
            .schema
            .iter()
            .map(|c| (c.name.clone(), c.data_type))
            .collect();

        let mut groups: BTreeMap<Vec<String>, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let key: Vec<String> = self
                .metadata
                .partition_columns
                .iter()
                .map(|c| row.get(c.as_str()).unwrap_or(&Scalar::Null).to_string())
                .collect();
            groups.entry(key).or_default().push(row.clone());
        }

        for rows in groups.into_values() {
            let batch = rows_to_batch(&columns, &rows)?;
            let file_name = format!(
                "part-{:05}-{:05}.parquet",
                self.metadata.snapshots.len(),
                self.file_counter
            );
            self.file_counter += 1;

            let file = File::create(self.root.join("data").join(&file_name))?;
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;

            let partition: BTreeMap<String, Scalar> = self
                .metadata
                .partition_columns
                .iter()
                .map(|c| {
                    let value = rows
                        .first()
                        .and_then(|r| r.get(c.as_str()))
                        .cloned()
                        .unwrap_or(Scalar::Null);
                    (c.clone(), value)
                })
                .collect();

            self.pending.push(DataFileMeta {
                path: file_name,
                row_count: rows.len() as u64,
                partition,
                bounds: compute_bounds(&self.metadata.schema, &rows),
            });
        }
        Ok(())
    }

    /// Commit pending files as a new snapshot stamped with the current time
    pub fn commit(&mut self) -> VgResult<i64> {
        self.commit_at(Utc::now())
    }

    /// Commit with an explicit snapshot timestamp
    pub fn commit_at(&mut self, timestamp: DateTime<Utc>) -> VgResult<i64> {
        let snapshot_id = self
            .metadata
            .snapshots
            .iter()
            .map(|s| s.snapshot_id)
            .max()
            .unwrap_or(0)
            + 1;

        // append semantics: carry the previous snapshot's files forward
        let mut files = match self.metadata.snapshots.iter().find(|s| {
            s.snapshot_id == self.metadata.current_snapshot_id
        }) {
            Some(current) => {
                let path = self.root.join("metadata").join(&current.manifest);
                let file = File::open(path)?;
                serde_json::from_reader::<_, Vec<DataFileMeta>>(file)?
            }
            None => Vec::new(),
        };
        files.append(&mut self.pending);

        let manifest = format!("manifest-{snapshot_id}.json");
        let manifest_file = File::create(self.root.join("metadata").join(&manifest))?;
        serde_json::to_writer_pretty(manifest_file, &files)?;

        self.metadata.snapshots.push(SnapshotMeta {
            snapshot_id,
            timestamp_ms: timestamp.timestamp_millis(),
            manifest,
        });
        self.metadata.current_snapshot_id = snapshot_id;
        write_metadata(&self.root, &self.metadata)?;

        Ok(snapshot_id)
    }
}

fn compute_bounds(schema: &[ColumnInfo], rows: &[Row]) -> BTreeMap<String, ColumnBounds> {
    let mut bounds = BTreeMap::new();
    for column in schema {
        let mut min: Option<Scalar> = None;
        let mut max: Option<Scalar> = None;
        for row in rows {
            let Some(value) = row.get(column.name.as_str()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match &min {
                None => min = Some(value.clone()),
                Some(m) if value.compare(m) == Some(Ordering::Less) => min = Some(value.clone()),
                _ => {}
            }
            match &max {
                None => max = Some(value.clone()),
                Some(m) if value.compare(m) == Some(Ordering::Greater) => max = Some(value.clone()),
                _ => {}
            }
        }
        if let (Some(min), Some(max)) = (min, max) {
            bounds.insert(column.name.clone(), ColumnBounds { min, max });
        }
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn airline_row(id: i64, name: &str, country: &str, active: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Scalar::Long(id));
        row.insert("name".to_string(), Scalar::string(name));
        row.insert("country".to_string(), Scalar::string(country));
        row.insert("active".to_string(), Scalar::string(active));
        row
    }

    fn airline_columns() -> Vec<(String, DataType)> {
        vec![
            ("id".to_string(), DataType::Long),
            ("name".to_string(), DataType::String),
            ("country".to_string(), DataType::String),
            ("active".to_string(), DataType::String),
        ]
    }

    fn build_airlines(warehouse: &Path, partitioned: bool) -> i64 {
        let partitions = if partitioned {
            vec!["active".to_string()]
        } else {
            Vec::new()
        };
        let mut writer =
            TableWriter::create(warehouse, "airlines", airline_columns(), partitions).unwrap();
        writer
            .append_rows(&[
                airline_row(1, "United", "United States", "Y"),
                airline_row(2, "Lufthansa", "Germany", "Y"),
                airline_row(3, "Defunct Air", "United States", "N"),
            ])
            .unwrap();
        writer.commit().unwrap()
    }

    #[test]
    fn test_scan_all_rows() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), false);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let rows: Vec<Row> = table
            .scan_rows(&ScanOptions::default())
            .unwrap()
            .collect::<VgResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_scan_with_predicate_and_projection() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), false);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let opts = ScanOptions {
            columns: vec!["name".to_string()],
            predicates: vec![PushdownPredicate::eq(
                "country",
                Scalar::string("United States"),
            )],
            ..Default::default()
        };
        let rows: Vec<Row> = table
            .scan_rows(&opts)
            .unwrap()
            .collect::<VgResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.contains_key("name"));
        }
    }

    #[test]
    fn test_limit_zero_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), false);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let opts = ScanOptions {
            limit: Some(0),
            ..Default::default()
        };
        let rows: Vec<Row> = table
            .scan_rows(&opts)
            .unwrap()
            .collect::<VgResult<_>>()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_partition_pruning_scans_fewer_files() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), true);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let all = table.plan_files(&ScanOptions::default()).unwrap();
        assert_eq!(all.len(), 2); // one file per 'active' partition value

        let filtered = table
            .plan_files(&ScanOptions {
                predicates: vec![PushdownPredicate::eq("active", Scalar::string("Y"))],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.len() < all.len());
    }

    #[test]
    fn test_bounds_pruning() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), false);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        // ids span 1..=3; a scan for id > 100 should plan zero files
        let planned = table
            .plan_files(&ScanOptions {
                predicates: vec![PushdownPredicate::compare(
                    "id",
                    PredOp::Gt,
                    Scalar::Long(100),
                )],
                ..Default::default()
            })
            .unwrap();
        assert!(planned.is_empty());
    }

    #[test]
    fn test_snapshot_time_travel() {
        let dir = TempDir::new().unwrap();
        let first = build_airlines(dir.path(), false);

        let mut writer = TableWriter::open(dir.path(), "airlines").unwrap();
        writer
            .append_rows(&[airline_row(4, "New Air", "France", "Y")])
            .unwrap();
        let second = writer.commit().unwrap();
        assert!(second > first);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();

        let latest = table.get_statistics(&ScanOptions::default()).unwrap();
        assert_eq!(latest.row_count, 4);
        assert_eq!(latest.snapshot_id, second);

        let pinned = table
            .get_statistics(&ScanOptions {
                time_travel: Some(TimeTravel::SnapshotId(first)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pinned.row_count, 3);
        assert_eq!(pinned.snapshot_id, first);
    }

    #[test]
    fn test_unknown_snapshot_is_terminal() {
        let dir = TempDir::new().unwrap();
        build_airlines(dir.path(), false);

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let result = table.get_statistics(&ScanOptions {
            time_travel: Some(TimeTravel::SnapshotId(9999)),
            ..Default::default()
        });
        assert!(matches!(result, Err(VgError::InvalidTimeTravel { .. })));
    }

    #[test]
    fn test_as_of_time_travel() {
        let dir = TempDir::new().unwrap();

        let mut writer = TableWriter::create(
            dir.path(),
            "airlines",
            airline_columns(),
            Vec::new(),
        )
        .unwrap();
        writer
            .append_rows(&[airline_row(1, "United", "United States", "Y")])
            .unwrap();
        let t1 = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        writer.commit_at(t1).unwrap();

        writer
            .append_rows(&[airline_row(2, "Lufthansa", "Germany", "Y")])
            .unwrap();
        let t2 = "2024-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        writer.commit_at(t2).unwrap();

        let table = WarehouseTable::open(dir.path(), "airlines").unwrap();
        let as_of = "2024-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let stats = table
            .get_statistics(&ScanOptions {
                time_travel: Some(TimeTravel::AsOfTime(as_of)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stats.row_count, 1);

        let too_early = "2020-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let result = table.get_statistics(&ScanOptions {
            time_travel: Some(TimeTravel::AsOfTime(too_early)),
            ..Default::default()
        });
        assert!(matches!(result, Err(VgError::InvalidTimeTravel { .. })));
    }
}

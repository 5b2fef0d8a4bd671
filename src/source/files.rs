//! Plain parquet-file table source.
//!
//! Backs the `r2rml` virtual-graph type: R2RML mappings over bare columnar
//! files without snapshot metadata. No time travel; statistics come from
//! the parquet footers.

use super::{
    BatchScan, ColumnInfo, PlannedFile, PushdownPredicate, RowScan, ScanOptions, TableSchema,
    TableSource, TableStatistics,
};
use crate::error::{VgError, VgResult};
use crate::term::arrow_convert::{batch_to_rows, scalar_from_array};
use crate::term::{DataType, Row};
use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::path::{Path, PathBuf};

/// One logical table backed by parquet files on disk
pub struct FileTable {
    table: String,
    files: Vec<PathBuf>,
}

impl FileTable {
    /// Open a table from a single `.parquet` file or a directory of them
    pub fn open(table: &str, path: &Path) -> VgResult<Self> {
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().map_or(false, |ext| ext == "parquet"))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(VgError::MissingSource(format!("{}", path.display())));
        };

        if files.is_empty() {
            return Err(VgError::MissingSource(format!(
                "no parquet files under {}",
                path.display()
            )));
        }

        Ok(FileTable {
            table: table.to_string(),
            files,
        })
    }

    fn reject_time_travel(&self, opts: &ScanOptions) -> VgResult<()> {
        if let Some(tt) = opts.time_travel {
            return Err(VgError::InvalidTimeTravel {
                alias: self.table.clone(),
                requested: tt.to_string(),
            });
        }
        Ok(())
    }

    fn read_columns(&self, opts: &ScanOptions) -> Vec<String> {
        if opts.columns.is_empty() {
            return Vec::new(); // all
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

    fn collect_batches(&self, opts: &ScanOptions) -> VgResult<Vec<RecordBatch>> {
        self.reject_time_travel(opts)?;
        if opts.limit == Some(0) {
            return Ok(Vec::new());
        }
        let columns = self.read_columns(opts);
        let mut batches = Vec::new();
        let mut remaining = opts.limit;

        'files: for path in &self.files {
            let file = File::open(path)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
            let reader = if columns.is_empty() {
                builder.build()?
            } else {
                let indices: Vec<usize> = builder
                    .schema()
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| columns.iter().any(|c| c == f.name()))
                    .map(|(i, _)| i)
                    .collect();
                let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                builder.with_projection(mask).build()?
            };

            for batch in reader {
                let batch = batch?;
                let mut filtered = filter_by_predicates(&batch, &opts.predicates)?;
                if filtered.num_rows() == 0 {
                    continue;
                }
                if let Some(rem) = remaining.as_mut() {
                    if filtered.num_rows() > *rem {
                        filtered = filtered.slice(0, *rem);
                    }
                    *rem -= filtered.num_rows();
                }
                batches.push(filtered);
                if remaining == Some(0) {
                    break 'files;
                }
            }
        }
        Ok(batches)
    }
}

fn filter_by_predicates(
    batch: &RecordBatch,
    predicates: &[PushdownPredicate],
) -> VgResult<RecordBatch> {
    if predicates.is_empty() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let mut mask = Vec::with_capacity(batch.num_rows());
    for row_idx in 0..batch.num_rows() {
        let mut row = Row::with_capacity(4);
        for pred in predicates {
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
        mask.push(predicates.iter().all(|p| p.eval_row(&row)));
    }
    Ok(filter_record_batch(batch, &BooleanArray::from(mask))?)
}

impl TableSource for FileTable {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn scan_rows(&self, opts: &ScanOptions) -> VgResult<RowScan> {
        let batches = self.collect_batches(opts)?;
        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(batch_to_rows(batch)?);
        }
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn scan_batches(&self, opts: &ScanOptions) -> VgResult<BatchScan> {
        let batches = self.collect_batches(opts)?;
        Ok(Box::new(batches.into_iter().map(Ok)))
    }

    fn get_schema(&self, _opts: &ScanOptions) -> VgResult<TableSchema> {
        let file = File::open(&self.files[0])?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| {
                DataType::from_arrow(f.data_type())
                    .map(|data_type| ColumnInfo {
                        name: f.name().clone(),
                        data_type,
                        is_partition_key: false,
                    })
                    .ok_or_else(|| VgError::InvalidConfig {
                        field: f.name().clone(),
                        reason: format!("unsupported column type {:?}", f.data_type()),
                    })
            })
            .collect::<VgResult<Vec<_>>>()?;
        Ok(TableSchema {
            columns,
            partition_spec: Vec::new(),
        })
    }

    fn get_statistics(&self, opts: &ScanOptions) -> VgResult<TableStatistics> {
        self.reject_time_travel(opts)?;
        let mut row_count = 0u64;
        for path in &self.files {
            let file = File::open(path)?;
            let reader = SerializedFileReader::new(file)?;
            row_count += reader.metadata().file_metadata().num_rows() as u64;
        }
        Ok(TableStatistics {
            row_count,
            file_count: self.files.len() as u64,
            snapshot_id: -1,
        })
    }

    fn plan_files(&self, opts: &ScanOptions) -> VgResult<Vec<PlannedFile>> {
        self.reject_time_travel(opts)?;
        Ok(self
            .files
            .iter()
            .map(|p| PlannedFile {
                path: p.display().to_string(),
                row_count: 0,
            })
            .collect())
    }
}

//! Engine Error Types

use std::io;
use thiserror::Error;

/// Errors surfaced by the virtual-graph engine
#[derive(Error, Debug)]
pub enum VgError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Virtual graph already registered under this alias
    #[error("Virtual graph already exists: {0}")]
    AlreadyExists(String),

    /// Virtual graph not found
    #[error("Virtual graph not found: {0}")]
    NotFound(String),

    /// Alias violates the naming grammar
    #[error("Invalid alias '{0}': expected [A-Za-z0-9_-]+(:[A-Za-z0-9_-]+)? with '@' reserved for time travel")]
    InvalidAlias(String),

    /// A declared dependency ledger does not exist
    #[error("Virtual graph '{vg}' depends on missing source '{dependency}'")]
    MissingDependency { vg: String, dependency: String },

    /// A table referenced by a mapping has no registered source
    #[error("No source registered for table '{0}'")]
    MissingSource(String),

    /// R2RML document could not be interpreted
    #[error("Invalid R2RML mapping: {0}")]
    InvalidMapping(String),

    /// The virtual graph has no mapping that can answer the query
    #[error("No mapping matches the query pattern: {0}")]
    NoMapping(String),

    /// Requested snapshot or instant does not exist
    #[error("Invalid time travel for '{alias}': no snapshot matching {requested}")]
    InvalidTimeTravel { alias: String, requested: String },

    /// Unconstrained cross product exceeded the configured cap
    #[error(
        "Cartesian product between '{left_table}' ({left_rows} rows) and '{right_table}' \
         ({right_rows} rows) exceeds cap of {cap}"
    )]
    CartesianProductTooLarge {
        left_table: String,
        right_table: String,
        left_rows: usize,
        right_rows: usize,
        cap: usize,
    },

    /// Query exceeded its deadline
    #[error("Query exceeded timeout of {timeout_ms}ms (ran for {elapsed_ms}ms)")]
    QueryTimeout { timeout_ms: u64, elapsed_ms: u64 },

    /// Query was cancelled by the consumer
    #[error("Query cancelled")]
    Cancelled,
}

/// Result type for engine operations
pub type VgResult<T> = Result<T, VgError>;

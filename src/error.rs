use std::path::PathBuf;

use thiserror::Error;

/// Problems with the pipeline declaration. Fatal: the run never starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Destination '{destination}' references unknown source '{source_name}'")]
    UnknownSource {
        destination: String,
        source_name: String,
    },

    #[error("Quality threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Source '{source_name}' has invalid delimiter {delimiter:?}: expected a single ASCII character")]
    InvalidDelimiter {
        source_name: String,
        delimiter: String,
    },

    #[error("Destination '{0}' has an empty merge key")]
    EmptyMergeKey(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("Row has {actual} values but the dataset has {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
}

#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("Source file '{0}' does not exist")]
    NotFound(PathBuf),

    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: expected {expected} fields, found {actual}")]
    FieldCount {
        line: u64,
        expected: usize,
        actual: usize,
    },

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Raised for malformed transformation rules, or when the `abort` coercion
/// policy is selected and a value fails to coerce.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Rule '{rule}' references unknown column '{column}'")]
    UnknownColumn { rule: &'static str, column: String },

    #[error("Invalid '{rule}' rule on column '{column}': {reason}")]
    InvalidRule {
        rule: &'static str,
        column: String,
        reason: String,
    },

    #[error("Row {row}: value {value:?} in column '{column}' failed '{rule}' coercion")]
    Aborted {
        row: usize,
        column: String,
        value: String,
        rule: &'static str,
    },
}

/// Failure reported by a sink for a single batch attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Retryable: lock contention, busy database, lost connection.
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// Not retryable: schema mismatch, constraint violation, bad SQL.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                SinkError::Transient(err.to_string())
            }
            _ => SinkError::Permanent(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("merge key '{0}' is not a column of the dataset")]
    MissingMergeKey(String),

    #[error("projected column '{0}' is not a column of the dataset")]
    MissingColumn(String),

    #[error("batch {batch} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        batch: usize,
        attempts: u32,
        last_error: String,
    },

    #[error("batch {batch} failed permanently: {source}")]
    Permanent {
        batch: usize,
        #[source]
        source: SinkError,
    },
}

#[derive(Error, Debug)]
pub enum RunRecorderError {
    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("audit serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

/// Stage-local failure, caught per source/destination pair by the orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source read failed: {0}")]
    SourceRead(#[from] SourceReadError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

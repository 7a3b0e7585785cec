use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Failure of a single ingestion run, tagged with the stage that produced it.
/// The wrapped stage error is passed through unchanged.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch stage failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("decode stage failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("load stage failed: {0}")]
    Load(#[from] LoadError),
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("invalid source URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("GET {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("GET {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("network error while fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write download of {url} to local storage: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout {
                url: url.to_string(),
                source: err,
            }
        } else if let Some(status) = err.status() {
            TransferError::Status {
                url: url.to_string(),
                status,
            }
        } else {
            TransferError::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot read downloaded file {path} (from {origin}): {source}")]
    Io {
        origin: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized file format for {origin}: {reason}")]
    UnrecognizedFormat { origin: String, reason: String },

    #[error("invalid or truncated CSV from {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: ArrowError,
    },

    #[error("invalid or truncated Parquet from {origin}: {source}")]
    Parquet {
        origin: String,
        #[source]
        source: ParquetError,
    },

    #[error("failed reading batch {batch_index} from {origin}: {source}")]
    Batch {
        origin: String,
        batch_index: usize,
        #[source]
        source: ArrowError,
    },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid table name `{name}`: expected `table` or `schema.table`")]
    InvalidTableName { name: String },

    #[error("table {table} does not exist; append_only requires an existing table")]
    MissingTable { table: String },

    #[error(
        "schema mismatch in batch {batch_index} for table {table}: expected [{expected}], found [{found}]"
    )]
    SchemaMismatch {
        table: String,
        batch_index: usize,
        expected: String,
        found: String,
    },

    #[error("column `{column}` has type {data_type} which cannot be stored in table {table}")]
    UnsupportedType {
        table: String,
        column: String,
        data_type: String,
    },

    #[error("failed to normalize batch {batch_index} for table {table}: {source}")]
    Normalize {
        table: String,
        batch_index: usize,
        #[source]
        source: ArrowError,
    },

    #[error("database error on table {table}: {source}")]
    Database {
        table: String,
        #[source]
        source: duckdb::Error,
    },
}

/// Errors from the query runner. Messages are meant to be read by whoever
/// invoked the report, so they say what to do next where that is known.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("table {table} not found; load it first (e.g. `taxi-ingest ingest --table {table}`)")]
    MissingTable { table: String },

    #[error("query `{label}` failed: {source}")]
    Sql {
        label: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("query `{label}` returned no rows")]
    NoRows { label: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("environment variable {var} is not set")]
    MissingEnv { var: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_keeps_inner_message() {
        let inner = LoadError::MissingTable {
            table: "green_taxi_trips".to_string(),
        };
        let err: IngestError = inner.into();
        let msg = err.to_string();
        assert!(msg.starts_with("load stage failed"));
        assert!(msg.contains("green_taxi_trips"));
        assert!(matches!(err, IngestError::Load(LoadError::MissingTable { .. })));
    }

    #[test]
    fn missing_table_message_is_actionable() {
        let err = QueryError::MissingTable {
            table: "zones".to_string(),
        };
        assert!(err.to_string().contains("load it first"));
    }
}

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use flate2::read::GzDecoder;
use tracing::debug;

use super::BatchIter;
use crate::error::DecodeError;

/// Open `path` for reading, unwrapping gzip when asked.
fn open(path: &Path, gzip: bool, origin: &str) -> Result<Box<dyn Read>, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io {
        origin: origin.to_string(),
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    if gzip {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Infer column types from the first `max_rows` records (all when `None`).
///
/// Columns with no values become text, and timestamps are read at microsecond
/// precision whatever precision the sample suggested.
pub(super) fn infer_schema(
    path: &Path,
    gzip: bool,
    max_rows: Option<usize>,
    origin: &str,
) -> Result<SchemaRef, DecodeError> {
    let reader = open(path, gzip, origin)?;
    let (schema, scanned) = Format::default()
        .with_header(true)
        .infer_schema(reader, max_rows)
        .map_err(|source| DecodeError::Csv {
            origin: origin.to_string(),
            source,
        })?;
    debug!(records = scanned, columns = schema.fields().len(), "inferred CSV schema");

    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| {
            let data_type = match f.data_type() {
                DataType::Null => DataType::Utf8,
                DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                other => other.clone(),
            };
            Field::new(f.name(), data_type, true)
        })
        .collect();
    Ok(Arc::new(Schema::new(fields)))
}

pub(super) fn read_batches(
    path: &Path,
    gzip: bool,
    schema: SchemaRef,
    batch_size: usize,
    origin: &str,
) -> Result<BatchIter, DecodeError> {
    let reader = open(path, gzip, origin)?;
    let csv_reader = ReaderBuilder::new(schema)
        .with_header(true)
        .with_batch_size(batch_size)
        .build(reader)
        .map_err(|source| DecodeError::Csv {
            origin: origin.to_string(),
            source,
        })?;
    Ok(Box::new(csv_reader))
}

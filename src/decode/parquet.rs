use std::fs::File;
use std::path::Path;

use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::debug;

use super::BatchIter;
use crate::error::DecodeError;

/// Open a Parquet file and return its Arrow schema with a batch reader.
///
/// A truncated file fails here, since the footer holding the metadata is
/// the last thing written.
pub(super) fn read_batches(
    path: &Path,
    batch_size: usize,
    origin: &str,
) -> Result<(SchemaRef, BatchIter), DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io {
        origin: origin.to_string(),
        path: path.to_path_buf(),
        source,
    })?;
    let parquet_err = |source| DecodeError::Parquet {
        origin: origin.to_string(),
        source,
    };

    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_err)?;
    let metadata = builder.metadata();
    debug!(
        rows = metadata.file_metadata().num_rows(),
        row_groups = metadata.num_row_groups(),
        "opened Parquet file"
    );

    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(batch_size)
        .build()
        .map_err(parquet_err)?;
    Ok((schema, Box::new(reader)))
}

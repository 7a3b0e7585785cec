use std::marker::PhantomData;

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use tracing::{debug, info, instrument};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::DecodeError;
use crate::fetch::LocalResource;

mod csv;
mod format;
mod parquet;

pub use format::SourceFormat;

pub(crate) type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch, ArrowError>>>;

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub batch_size: usize,
    /// Decode as this format instead of sniffing the content.
    pub format: Option<SourceFormat>,
    /// Records sampled for CSV type inference; the whole file when `None`.
    pub infer_schema_rows: Option<usize>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            format: None,
            infer_schema_rows: None,
        }
    }
}

/// Lazy sequence of record batches read from one downloaded file.
///
/// Batches come out in source row order with at most `batch_size` rows each.
/// The sequence cannot be restarted, and it stops after the first error.
pub struct Batches<'a> {
    schema: SchemaRef,
    format: SourceFormat,
    origin: String,
    inner: BatchIter,
    next_index: usize,
    rows: u64,
    done: bool,
    _resource: PhantomData<&'a LocalResource>,
}

impl Batches<'_> {
    /// Schema of the decoded source, known before any batch is read.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Rows yielded so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<RecordBatch, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            None => {
                self.done = true;
                debug!(origin = %self.origin, batches = self.next_index, rows = self.rows, "source exhausted");
                None
            }
            Some(Ok(batch)) => {
                self.rows += batch.num_rows() as u64;
                self.next_index += 1;
                Some(Ok(batch))
            }
            Some(Err(source)) => {
                self.done = true;
                Some(Err(DecodeError::Batch {
                    origin: self.origin.clone(),
                    batch_index: self.next_index,
                    source,
                }))
            }
        }
    }
}

/// Open the downloaded file behind `resource` as a batch sequence.
#[instrument(level = "info", skip_all, fields(origin = %resource.origin()))]
pub fn decode<'a>(
    resource: &'a LocalResource,
    options: &DecodeOptions,
) -> Result<Batches<'a>, DecodeError> {
    let origin = resource.origin();
    let path = resource.path();
    let format = match options.format {
        Some(format) => format,
        None => SourceFormat::sniff(path, origin)?,
    };

    let (schema, inner) = match format {
        SourceFormat::Parquet => parquet::read_batches(path, options.batch_size, origin)?,
        SourceFormat::Csv | SourceFormat::CsvGzip => {
            let gzip = format == SourceFormat::CsvGzip;
            let schema = csv::infer_schema(path, gzip, options.infer_schema_rows, origin)?;
            let inner = csv::read_batches(path, gzip, schema.clone(), options.batch_size, origin)?;
            (schema, inner)
        }
    };

    info!(%format, columns = schema.fields().len(), batch_size = options.batch_size, "decoding");
    Ok(Batches {
        schema,
        format,
        origin: origin.to_string(),
        inner,
        next_index: 0,
        rows: 0,
        done: false,
        _resource: PhantomData,
    })
}

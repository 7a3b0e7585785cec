use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use tracing::{debug, info};

use crate::config::LoadMode;
use crate::error::LoadError;

pub mod conform;
pub mod duck;
pub mod schema;

pub use conform::conform_batch;
pub use duck::DuckDestination;
pub use schema::{normalize_batch, TableName, TableSchema};

/// A database that can hold loaded tables.
pub trait Destination {
    /// Drop `table` if present and create it empty with `schema`.
    fn replace_table(&mut self, table: &TableName, schema: &TableSchema) -> Result<(), LoadError>;

    /// Current schema of `table`, or `None` if it does not exist.
    fn table_schema(&self, table: &TableName) -> Result<Option<TableSchema>, LoadError>;

    /// Append every row of `batch`. The batch is already normalized and
    /// matches the table schema.
    fn append(&mut self, table: &TableName, batch: RecordBatch) -> Result<(), LoadError>;

    fn row_count(&self, table: &TableName) -> Result<u64, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub batches: usize,
    pub rows: u64,
}

/// Applies batches to one table in the order they are pushed.
///
/// The first batch fixes the table schema: it recreates the table under
/// [`LoadMode::ReplaceThenAppend`], or is checked against the existing table
/// under [`LoadMode::AppendOnly`]. Every later batch must match that schema
/// once lossless conversions are applied (see [`conform_batch`]); a batch
/// that does not is rejected before any of its rows are written.
/// Nothing is rolled back when a run fails part way.
pub struct Loader<'d, D: Destination + ?Sized> {
    destination: &'d mut D,
    table: TableName,
    mode: LoadMode,
    established: Option<TableSchema>,
    batches: usize,
    rows: u64,
}

impl<'d, D: Destination + ?Sized> Loader<'d, D> {
    pub fn new(destination: &'d mut D, table: TableName, mode: LoadMode) -> Self {
        Self {
            destination,
            table,
            mode,
            established: None,
            batches: 0,
            rows: 0,
        }
    }

    pub fn push(&mut self, batch: RecordBatch) -> Result<(), LoadError> {
        let batch_index = self.batches;
        let table = self.table.to_string();
        let normalize_err = |source| LoadError::Normalize {
            table: table.clone(),
            batch_index,
            source,
        };
        let batch = normalize_batch(&batch).map_err(normalize_err)?;
        let established = self.establish(&batch)?;
        let batch = conform_batch(batch, &established).map_err(normalize_err)?;

        let incoming = TableSchema::from_arrow(&batch.schema(), &self.table)?;
        self.check(&established, &incoming, batch_index)?;

        let rows = batch.num_rows() as u64;
        self.destination.append(&self.table, batch)?;
        self.batches += 1;
        self.rows += rows;
        debug!(table = %self.table, batch = batch_index, rows, total = self.rows, "appended batch");
        Ok(())
    }

    /// Schema every batch of the run is held to. The first call recreates the
    /// table from `first` under replace mode, or reads the existing table.
    fn establish(&mut self, first: &RecordBatch) -> Result<TableSchema, LoadError> {
        if let Some(schema) = &self.established {
            return Ok(schema.clone());
        }
        let schema = match self.mode {
            LoadMode::ReplaceThenAppend => {
                let schema = TableSchema::from_arrow(&first.schema(), &self.table)?;
                self.destination.replace_table(&self.table, &schema)?;
                info!(table = %self.table, schema = %schema, "recreated table");
                schema
            }
            LoadMode::AppendOnly => self.existing_schema()?,
        };
        self.established = Some(schema.clone());
        Ok(schema)
    }

    /// Complete the run.
    ///
    /// When no batch was pushed, `source_schema` (if given) still recreates
    /// the table under replace mode, so an empty source leaves an empty table.
    pub fn finish(self, source_schema: Option<&Schema>) -> Result<LoadSummary, LoadError> {
        if self.batches == 0 {
            match (self.mode, source_schema) {
                (LoadMode::ReplaceThenAppend, Some(schema)) => {
                    let schema = TableSchema::from_arrow(schema, &self.table)?;
                    self.destination.replace_table(&self.table, &schema)?;
                    info!(table = %self.table, "source was empty; recreated empty table");
                }
                (LoadMode::AppendOnly, _) => {
                    self.existing_schema()?;
                }
                (LoadMode::ReplaceThenAppend, None) => {}
            }
        }

        info!(table = %self.table, batches = self.batches, rows = self.rows, "load complete");
        Ok(LoadSummary {
            table: self.table.to_string(),
            batches: self.batches,
            rows: self.rows,
        })
    }

    fn existing_schema(&self) -> Result<TableSchema, LoadError> {
        self.destination
            .table_schema(&self.table)?
            .ok_or_else(|| LoadError::MissingTable {
                table: self.table.to_string(),
            })
    }

    fn check(
        &self,
        established: &TableSchema,
        incoming: &TableSchema,
        batch_index: usize,
    ) -> Result<(), LoadError> {
        if established.is_compatible(incoming) {
            Ok(())
        } else {
            Err(LoadError::SchemaMismatch {
                table: self.table.to_string(),
                batch_index,
                expected: established.to_string(),
                found: incoming.to_string(),
            })
        }
    }
}

/// Load an in-memory sequence of batches into `table`.
pub fn load<D, I>(
    destination: &mut D,
    table: &TableName,
    batches: I,
    mode: LoadMode,
) -> Result<LoadSummary, LoadError>
where
    D: Destination + ?Sized,
    I: IntoIterator<Item = RecordBatch>,
{
    let mut loader = Loader::new(destination, table.clone(), mode);
    for batch in batches {
        loader.push(batch)?;
    }
    loader.finish(None)
}

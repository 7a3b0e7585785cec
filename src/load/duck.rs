use std::path::Path;

use arrow::record_batch::RecordBatch;
use duckdb::{params, Connection};
use tracing::debug;

use super::schema::{Column, TableName, TableSchema};
use super::Destination;
use crate::error::LoadError;

/// Rows handed to the appender per call; each call becomes one DuckDB data
/// chunk, which holds at most this many rows.
const APPEND_CHUNK_ROWS: usize = 2048;

const DEFAULT_SCHEMA: &str = "main";

/// A DuckDB database used as the load destination.
pub struct DuckDestination {
    conn: Connection,
}

impl DuckDestination {
    /// Open a database file, creating it if needed. `":memory:"` opens an
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> duckdb::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::open_in_memory();
        }
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> duckdb::Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Connection for running queries against the loaded tables.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn db_err(table: &TableName) -> impl Fn(duckdb::Error) -> LoadError + '_ {
    move |source| LoadError::Database {
        table: table.to_string(),
        source,
    }
}

impl Destination for DuckDestination {
    fn replace_table(&mut self, table: &TableName, schema: &TableSchema) -> Result<(), LoadError> {
        if let Some(db_schema) = table.schema() {
            self.conn
                .execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", db_schema))
                .map_err(db_err(table))?;
        }
        let sql = schema.create_or_replace_sql(table);
        debug!(%sql, "recreating table");
        self.conn.execute_batch(&sql).map_err(db_err(table))
    }

    fn table_schema(&self, table: &TableName) -> Result<Option<TableSchema>, LoadError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE lower(table_schema) = lower(?) AND lower(table_name) = lower(?) \
                 ORDER BY ordinal_position",
            )
            .map_err(db_err(table))?;
        let columns = stmt
            .query_map(
                params![table.schema().unwrap_or(DEFAULT_SCHEMA), table.name()],
                |row| {
                    Ok(Column {
                        name: row.get(0)?,
                        sql_type: row.get(1)?,
                    })
                },
            )
            .map_err(db_err(table))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err(table))?;

        if columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(TableSchema::new(columns)))
        }
    }

    fn append(&mut self, table: &TableName, batch: RecordBatch) -> Result<(), LoadError> {
        let mut appender = self
            .conn
            .appender_to_db(table.name(), table.schema().unwrap_or(DEFAULT_SCHEMA))
            .map_err(db_err(table))?;

        let total = batch.num_rows();
        let mut offset = 0;
        while offset < total {
            let len = APPEND_CHUNK_ROWS.min(total - offset);
            appender
                .append_record_batch(batch.slice(offset, len))
                .map_err(db_err(table))?;
            offset += len;
        }
        appender.flush().map_err(db_err(table))
    }

    fn row_count(&self, table: &TableName) -> Result<u64, LoadError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.quoted()), [], |row| {
                row.get(0)
            })
            .map_err(db_err(table))?;
        Ok(count as u64)
    }
}

use duckdb::{params, Connection, Params, Row};
use tracing::debug;

use crate::error::QueryError;
use crate::load::TableName;

mod reports;

pub use reports::{DateRange, TripDay, ZoneTotal, UNKNOWN_ZONE};

/// Pickup datetime columns of the yellow (`tpep_`) and green (`lpep_`) trip
/// files, in the order they are tried.
pub const PICKUP_DATETIME_CANDIDATES: &[&str] = &["lpep_pickup_datetime", "tpep_pickup_datetime"];

const DEFAULT_SCHEMA: &str = "main";

/// Result of looking for one of several candidate column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDetection {
    /// The column as the table spells it.
    Found(String),
    NotFound,
}

/// Runs read-only SQL against loaded tables.
pub struct QueryRunner<'c> {
    conn: &'c Connection,
}

impl<'c> QueryRunner<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn table_exists(&self, table: &TableName) -> Result<bool, QueryError> {
        let count: i64 = self.query_one(
            "table_exists",
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE lower(table_schema) = lower(?) AND lower(table_name) = lower(?)",
            params![table.schema().unwrap_or(DEFAULT_SCHEMA), table.name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn require_table(&self, table: &TableName) -> Result<(), QueryError> {
        if self.table_exists(table)? {
            Ok(())
        } else {
            Err(QueryError::MissingTable {
                table: table.to_string(),
            })
        }
    }

    /// First of `candidates` that `table` has, compared case-insensitively.
    pub fn detect_column(
        &self,
        table: &TableName,
        candidates: &[&str],
    ) -> Result<ColumnDetection, QueryError> {
        self.require_table(table)?;
        let columns = self.query_all(
            "detect_column",
            "SELECT column_name FROM information_schema.columns \
             WHERE lower(table_schema) = lower(?) AND lower(table_name) = lower(?) \
             ORDER BY ordinal_position",
            params![table.schema().unwrap_or(DEFAULT_SCHEMA), table.name()],
            |row| row.get::<_, String>(0),
        )?;

        let found = candidates.iter().find_map(|candidate| {
            columns
                .iter()
                .find(|column| column.eq_ignore_ascii_case(candidate))
                .cloned()
        });
        debug!(%table, ?found, "column detection");
        Ok(found.map_or(ColumnDetection::NotFound, ColumnDetection::Found))
    }

    pub fn row_count(&self, table: &TableName) -> Result<u64, QueryError> {
        self.require_table(table)?;
        let count: i64 = self.query_one(
            "row_count",
            &format!("SELECT COUNT(*) FROM {}", table.quoted()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn query_all<T, P, F>(&self, label: &str, sql: &str, params: P, f: F) -> Result<Vec<T>, QueryError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        let sql_err = |source| QueryError::Sql {
            label: label.to_string(),
            source,
        };
        let mut stmt = self.conn.prepare(sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params, f)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(rows)
    }

    fn query_one<T, P, F>(&self, label: &str, sql: &str, params: P, f: F) -> Result<T, QueryError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        self.query_all(label, sql, params, f)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NoRows {
                label: label.to_string(),
            })
    }
}

/// Quote a column name taken from the catalog for use in SQL text.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green_trips() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE green_taxi_trips (
                 VendorID BIGINT,
                 lpep_pickup_datetime TIMESTAMP,
                 trip_distance DOUBLE
             );
             INSERT INTO green_taxi_trips VALUES
                 (2, '2025-11-01 00:34:48', 0.8),
                 (2, '2025-11-01 00:18:52', 2.1);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn detects_first_matching_candidate() {
        let conn = green_trips();
        let runner = QueryRunner::new(&conn);
        let table = TableName::parse("green_taxi_trips").unwrap();

        assert_eq!(
            runner.detect_column(&table, PICKUP_DATETIME_CANDIDATES).unwrap(),
            ColumnDetection::Found("lpep_pickup_datetime".to_string())
        );
        assert_eq!(
            runner
                .detect_column(&table, &["tpep_pickup_datetime", "LPEP_PICKUP_DATETIME"])
                .unwrap(),
            ColumnDetection::Found("lpep_pickup_datetime".to_string())
        );
        assert_eq!(
            runner.detect_column(&table, &["pickup_datetime"]).unwrap(),
            ColumnDetection::NotFound
        );
    }

    #[test]
    fn detection_on_missing_table_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = QueryRunner::new(&conn);
        let table = TableName::parse("green_taxi_trips").unwrap();
        let err = runner
            .detect_column(&table, PICKUP_DATETIME_CANDIDATES)
            .unwrap_err();
        assert!(matches!(err, QueryError::MissingTable { .. }));
    }

    #[test]
    fn counts_rows_in_qualified_tables() {
        let conn = green_trips();
        conn.execute_batch("CREATE SCHEMA prod; CREATE TABLE prod.fhv (id INTEGER); INSERT INTO prod.fhv VALUES (1), (2), (3);")
            .unwrap();
        let runner = QueryRunner::new(&conn);

        assert_eq!(
            runner
                .row_count(&TableName::parse("green_taxi_trips").unwrap())
                .unwrap(),
            2
        );
        assert_eq!(runner.row_count(&TableName::parse("prod.fhv").unwrap()).unwrap(), 3);
        assert!(!runner.table_exists(&TableName::parse("dev.fhv").unwrap()).unwrap());
    }

    #[test]
    fn counting_a_missing_staging_table_fails_loudly() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE SCHEMA dev; CREATE TABLE dev.stg_fhv_tripdata (dispatching_base_num VARCHAR);")
            .unwrap();
        let runner = QueryRunner::new(&conn);

        let err = runner
            .row_count(&TableName::parse("prod.stg_fhv_tripdata").unwrap())
            .unwrap_err();
        match err {
            QueryError::MissingTable { table } => assert_eq!(table, "prod.stg_fhv_tripdata"),
            other => panic!("expected missing table, got {other:?}"),
        }
        assert_eq!(
            runner
                .row_count(&TableName::parse("dev.stg_fhv_tripdata").unwrap())
                .unwrap(),
            0
        );
    }
}

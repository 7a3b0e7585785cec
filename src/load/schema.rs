use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LoadError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should parse"));

/// A destination relation, optionally qualified by a database schema
/// (`prod.green_tripdata`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, LoadError> {
        let invalid = || LoadError::InvalidTableName {
            name: raw.to_string(),
        };
        let parts: Vec<&str> = raw.trim().split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (None, *name),
            [schema, name] => (Some(*schema), *name),
            _ => return Err(invalid()),
        };
        if !IDENTIFIER.is_match(name) || schema.is_some_and(|s| !IDENTIFIER.is_match(s)) {
            return Err(invalid());
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier suitable for splicing into SQL text.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.name),
            None => format!("\"{}\"", self.name),
        }
    }
}

impl FromStr for TableName {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: String,
}

/// Ordered column names and SQL types of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Derive the table schema a batch with `schema` would be stored under.
    pub fn from_arrow(schema: &Schema, table: &TableName) -> Result<Self, LoadError> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| {
                let data_type = normalized_type(field.data_type());
                sql_type(&data_type)
                    .map(|sql_type| Column {
                        name: field.name().clone(),
                        sql_type,
                    })
                    .ok_or_else(|| LoadError::UnsupportedType {
                        table: table.to_string(),
                        column: field.name().clone(),
                        data_type: field.data_type().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Same columns in the same order with the same types. Identifiers and
    /// type names compare case-insensitively, as DuckDB treats them.
    pub fn is_compatible(&self, other: &TableSchema) -> bool {
        self.columns.len() == other.columns.len()
            && self.columns.iter().zip(&other.columns).all(|(a, b)| {
                a.name.eq_ignore_ascii_case(&b.name) && a.sql_type.eq_ignore_ascii_case(&b.sql_type)
            })
    }

    pub fn create_or_replace_sql(&self, table: &TableName) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name.replace('"', "\"\""), c.sql_type))
            .collect();
        format!("CREATE OR REPLACE TABLE {} ({})", table.quoted(), cols.join(", "))
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect();
        f.write_str(&cols.join(", "))
    }
}

/// Arrow type a column is stored as once it reaches the destination.
///
/// - Timestamp(any unit, tz) → Timestamp(µs, tz)
/// - LargeUtf8, dictionary-encoded strings, Null → Utf8
/// - LargeBinary → Binary
pub fn normalized_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
        DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => DataType::Utf8,
        DataType::Dictionary(_, value)
            if matches!(value.as_ref(), DataType::Utf8 | DataType::LargeUtf8) =>
        {
            DataType::Utf8
        }
        DataType::LargeBinary => DataType::Binary,
        other => other.clone(),
    }
}

/// DuckDB type name for a normalized Arrow type, spelled the way
/// `information_schema.columns` reports it.
pub fn sql_type(data_type: &DataType) -> Option<String> {
    let name = match data_type {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8 => "TINYINT",
        DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INTEGER",
        DataType::Int64 => "BIGINT",
        DataType::UInt8 => "UTINYINT",
        DataType::UInt16 => "USMALLINT",
        DataType::UInt32 => "UINTEGER",
        DataType::UInt64 => "UBIGINT",
        DataType::Float32 => "FLOAT",
        DataType::Float64 => "DOUBLE",
        DataType::Utf8 => "VARCHAR",
        DataType::Binary => "BLOB",
        DataType::Date32 => "DATE",
        DataType::Timestamp(TimeUnit::Microsecond, None) => "TIMESTAMP",
        DataType::Timestamp(TimeUnit::Microsecond, Some(_)) => "TIMESTAMP WITH TIME ZONE",
        DataType::Decimal128(precision, scale) if *precision <= 38 && *scale >= 0 => {
            return Some(format!("DECIMAL({},{})", precision, scale));
        }
        _ => return None,
    };
    Some(name.to_string())
}

/// Cast every column whose type differs from its normalized type.
pub fn normalize_batch(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let needs_cast = schema
        .fields()
        .iter()
        .any(|f| &normalized_type(f.data_type()) != f.data_type());
    if !needs_cast {
        return Ok(batch.clone());
    }

    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let target = normalized_type(field.data_type());
        if &target == field.data_type() {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
        } else {
            columns.push(cast(column, &target)?);
            fields.push(Field::new(field.name(), target, true));
        }
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, LargeStringArray, TimestampMicrosecondArray, TimestampNanosecondArray};

    #[test]
    fn parses_table_names() {
        let plain = TableName::parse("green_taxi_trips").unwrap();
        assert_eq!(plain.schema(), None);
        assert_eq!(plain.quoted(), "\"green_taxi_trips\"");

        let qualified: TableName = "prod.fhv_tripdata".parse().unwrap();
        assert_eq!(qualified.schema(), Some("prod"));
        assert_eq!(qualified.name(), "fhv_tripdata");
        assert_eq!(qualified.to_string(), "prod.fhv_tripdata");
        assert_eq!(qualified.quoted(), "\"prod\".\"fhv_tripdata\"");

        for bad in ["", "a.b.c", "1trips", "trips; DROP TABLE x", "prod.", "zone lookup"] {
            assert!(TableName::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn maps_taxi_column_types() {
        assert_eq!(sql_type(&DataType::Int64).as_deref(), Some("BIGINT"));
        assert_eq!(sql_type(&DataType::Float64).as_deref(), Some("DOUBLE"));
        assert_eq!(sql_type(&DataType::Utf8).as_deref(), Some("VARCHAR"));
        assert_eq!(
            sql_type(&DataType::Timestamp(TimeUnit::Microsecond, None)).as_deref(),
            Some("TIMESTAMP")
        );
        assert_eq!(
            sql_type(&DataType::Decimal128(10, 2)).as_deref(),
            Some("DECIMAL(10,2)")
        );
        assert_eq!(
            sql_type(&DataType::List(Arc::new(Field::new("item", DataType::Int32, true)))),
            None
        );
    }

    #[test]
    fn schema_compatibility_ignores_case() {
        let a = TableSchema::new(vec![
            Column {
                name: "PULocationID".into(),
                sql_type: "BIGINT".into(),
            },
            Column {
                name: "Zone".into(),
                sql_type: "VARCHAR".into(),
            },
        ]);
        let b = TableSchema::new(vec![
            Column {
                name: "pulocationid".into(),
                sql_type: "bigint".into(),
            },
            Column {
                name: "zone".into(),
                sql_type: "varchar".into(),
            },
        ]);
        assert!(a.is_compatible(&b));

        let reordered = TableSchema::new(b.columns().iter().rev().cloned().collect());
        assert!(!a.is_compatible(&reordered));
        assert!(!a.is_compatible(&TableSchema::new(b.columns()[..1].to_vec())));
    }

    #[test]
    fn create_sql_quotes_identifiers() {
        let table = TableName::parse("prod.zones").unwrap();
        let schema = TableSchema::new(vec![Column {
            name: "LocationID".into(),
            sql_type: "BIGINT".into(),
        }]);
        assert_eq!(
            schema.create_or_replace_sql(&table),
            "CREATE OR REPLACE TABLE \"prod\".\"zones\" (\"LocationID\" BIGINT)"
        );
    }

    #[test]
    fn normalizes_nanosecond_timestamps_and_large_strings() {
        let schema = Arc::new(Schema::new(vec![
            Field::new(
                "tpep_pickup_datetime",
                DataType::Timestamp(TimeUnit::Nanosecond, None),
                true,
            ),
            Field::new("store_and_fwd_flag", DataType::LargeUtf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(TimestampNanosecondArray::from(vec![Some(1_546_300_800_123_456_789), None])),
                Arc::new(LargeStringArray::from(vec![Some("N"), Some("Y")])),
            ],
        )
        .unwrap();

        let out = normalize_batch(&batch).unwrap();
        assert_eq!(
            out.schema().field(0).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        assert_eq!(out.schema().field(1).data_type(), &DataType::Utf8);
        let ts = out
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(ts.value(0), 1_546_300_800_123_456);
        assert!(ts.is_null(1));
    }
}

//! Reconcile an incoming batch with the schema its table already has.
//!
//! Files of one monthly series are typed independently, so a column can be
//! empty (text) one month and numeric the next, or integral one month and
//! written as `1.0` the next. A column is converted to the table's type only
//! when no value changes; anything else is left for the schema check to
//! reject.

use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, Float64Array};
use arrow::compute::{cast, cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use super::schema::{sql_type, TableSchema};

/// Arrow type for a DuckDB type name as `sql_type` spells it.
pub fn arrow_type(sql: &str) -> Option<DataType> {
    let upper = sql.trim().to_ascii_uppercase();
    let data_type = match upper.as_str() {
        "BOOLEAN" => DataType::Boolean,
        "TINYINT" => DataType::Int8,
        "SMALLINT" => DataType::Int16,
        "INTEGER" => DataType::Int32,
        "BIGINT" => DataType::Int64,
        "UTINYINT" => DataType::UInt8,
        "USMALLINT" => DataType::UInt16,
        "UINTEGER" => DataType::UInt32,
        "UBIGINT" => DataType::UInt64,
        "FLOAT" => DataType::Float32,
        "DOUBLE" => DataType::Float64,
        "VARCHAR" => DataType::Utf8,
        "BLOB" => DataType::Binary,
        "DATE" => DataType::Date32,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "TIMESTAMP WITH TIME ZONE" => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        _ => return decimal_type(&upper),
    };
    Some(data_type)
}

fn decimal_type(upper: &str) -> Option<DataType> {
    let inner = upper.strip_prefix("DECIMAL(")?.strip_suffix(')')?;
    let (precision, scale) = inner.split_once(',')?;
    Some(DataType::Decimal128(
        precision.trim().parse().ok()?,
        scale.trim().parse().ok()?,
    ))
}

/// Convert the columns of `batch` whose type differs from `established`
/// wherever that is lossless.
///
/// The batch comes back unchanged when its column names do not line up with
/// the table; the schema check reports that case.
pub fn conform_batch(
    batch: RecordBatch,
    established: &TableSchema,
) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let columns = established.columns();
    let aligned = columns.len() == schema.fields().len()
        && columns
            .iter()
            .zip(schema.fields())
            .all(|(column, field)| column.name.eq_ignore_ascii_case(field.name()));
    if !aligned {
        return Ok(batch);
    }

    let mut changed = false;
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for ((column, field), array) in columns.iter().zip(schema.fields()).zip(batch.columns()) {
        let differs = sql_type(field.data_type())
            .is_some_and(|current| !current.eq_ignore_ascii_case(&column.sql_type));
        let converted = if differs {
            arrow_type(&column.sql_type).and_then(|target| lossless_cast(array, &target))
        } else {
            None
        };

        match converted {
            Some(converted) => {
                debug!(
                    column = %field.name(),
                    from = %field.data_type(),
                    to = %column.sql_type,
                    "conformed column to table type"
                );
                changed = true;
                fields.push(Field::new(field.name(), converted.data_type().clone(), true));
                arrays.push(converted);
            }
            None => {
                fields.push(field.as_ref().clone());
                arrays.push(array.clone());
            }
        }
    }

    if !changed {
        return Ok(batch);
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

/// `array` as `target`, or `None` if some value would change.
fn lossless_cast(array: &ArrayRef, target: &DataType) -> Option<ArrayRef> {
    if array.null_count() == array.len() {
        return Some(new_null_array(target, array.len()));
    }

    let source = array.data_type();
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };
    match target {
        DataType::Utf8 => cast(array, target).ok(),
        DataType::Float64 if source.is_integer() || source == &DataType::Float32 => {
            cast_with_options(array, target, &strict).ok()
        }
        t if t.is_integer() && source.is_integer() => cast_with_options(array, target, &strict).ok(),
        t if t.is_integer() && source.is_floating() && all_integral(array) => {
            cast_with_options(array, target, &strict).ok()
        }
        _ => None,
    }
}

fn all_integral(array: &ArrayRef) -> bool {
    let Ok(values) = cast(array, &DataType::Float64) else {
        return false;
    };
    values
        .as_any()
        .downcast_ref::<Float64Array>()
        .is_some_and(|values| values.iter().flatten().all(|v| v.is_finite() && v.fract() == 0.0))
}

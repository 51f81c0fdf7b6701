use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::{FlatRow, StorageError};

/// Encode rows as one Snappy-compressed Parquet file.
///
/// Columns appear in first-seen order. A column whose values are all numbers becomes
/// `Float64`, all booleans `Boolean`, anything else `Utf8`. Every column is nullable;
/// a row missing a column stores null.
pub fn encode_parquet(rows: &[FlatRow]) -> Result<Bytes, StorageError> {
    if rows.is_empty() {
        return Err(StorageError::Empty);
    }

    let columns = column_names(rows);
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for name in columns {
        let data_type = infer_type(rows, name);
        arrays.push(build_array(rows, name, &data_type));
        fields.push(Field::new(name, data_type, true));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buffer))
}

fn column_names(rows: &[FlatRow]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for row in rows {
        for name in row.keys() {
            if seen.insert(name.as_str()) {
                names.push(name.as_str());
            }
        }
    }
    names
}

fn infer_type(rows: &[FlatRow], name: &str) -> DataType {
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|row| row.get(name))
        .filter(|value| !value.is_null())
        .collect();

    if values.is_empty() {
        DataType::Utf8
    } else if values.iter().all(|v| v.is_number()) {
        DataType::Float64
    } else if values.iter().all(|v| v.is_boolean()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn build_array(rows: &[FlatRow], name: &str, data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.get(name).and_then(Value::as_f64));
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.get(name).and_then(Value::as_bool));
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for row in rows {
                match row.get(name) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

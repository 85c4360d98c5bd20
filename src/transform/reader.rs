//! Decoding of a staged Parquet slice into a [`DataSet`].

use std::fs::File;
use std::path::Path;

use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field as ParquetField;

use crate::error::TransformError;
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Read every row of a Parquet file into an in-memory [`DataSet`].
///
/// Columns are the top-level fields of the file schema. Scalars map onto the matching [`Value`]
/// variant; anything else (temporal, decimal, nested) is kept in its display form as
/// [`Value::Utf8`]. A column's [`DataType`] is taken from its first non-null value and falls
/// back to `Utf8` for all-null columns.
pub fn read_parquet(path: impl AsRef<Path>) -> Result<DataSet, TransformError> {
    let file = File::open(path.as_ref())?;
    let reader = SerializedFileReader::new(file)?;

    let names: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    let expected_rows = usize::try_from(reader.metadata().file_metadata().num_rows()).unwrap_or(0);

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(expected_rows);
    for row_res in reader.into_iter() {
        let row = row_res?;
        let out_row: Vec<Value> = row
            .get_column_iter()
            .map(|(_, field)| convert_parquet_field(field))
            .collect();
        if out_row.len() != names.len() {
            return Err(TransformError::Failed(format!(
                "row has {} columns, schema has {}",
                out_row.len(),
                names.len()
            )));
        }
        rows.push(out_row);
    }

    let fields = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| Field::new(name, column_type(&rows, idx)))
        .collect();
    Ok(DataSet::new(Schema::new(fields), rows))
}

fn column_type(rows: &[Vec<Value>], idx: usize) -> DataType {
    rows.iter()
        .find_map(|row| match &row[idx] {
            Value::Null => None,
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Utf8(_) => Some(DataType::Utf8),
        })
        .unwrap_or(DataType::Utf8)
}

fn convert_parquet_field(f: &ParquetField) -> Value {
    match f {
        ParquetField::Null => Value::Null,
        ParquetField::Bool(b) => Value::Bool(*b),
        ParquetField::Byte(v) => Value::Int64(i64::from(*v)),
        ParquetField::Short(v) => Value::Int64(i64::from(*v)),
        ParquetField::Int(v) => Value::Int64(i64::from(*v)),
        ParquetField::Long(v) => Value::Int64(*v),
        ParquetField::UByte(v) => Value::Int64(i64::from(*v)),
        ParquetField::UShort(v) => Value::Int64(i64::from(*v)),
        ParquetField::UInt(v) => Value::Int64(i64::from(*v)),
        ParquetField::ULong(v) => i64::try_from(*v)
            .map(Value::Int64)
            .unwrap_or_else(|_| Value::Utf8(v.to_string())),
        ParquetField::Float(v) => Value::Float64(f64::from(*v)),
        ParquetField::Double(v) => Value::Float64(*v),
        ParquetField::Str(s) => Value::Utf8(s.clone()),
        other => Value::Utf8(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::write_parquet;

    #[test]
    fn reads_back_typed_values_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.parquet");
        let ds = DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("tip", DataType::Float64),
                Field::new("airport", DataType::Bool),
                Field::new("zone", DataType::Utf8),
            ]),
            vec![
                vec![
                    Value::Int64(1),
                    Value::Float64(0.5),
                    Value::Bool(true),
                    Value::Utf8("JFK".to_string()),
                ],
                vec![Value::Int64(2), Value::Null, Value::Bool(false), Value::Null],
            ],
        );
        write_parquet(&ds, &path).unwrap();

        let back = read_parquet(&path).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_parquet(dir.path().join("nope.parquet")).unwrap_err();
        assert!(matches!(err, TransformError::Io(_)));
    }
}

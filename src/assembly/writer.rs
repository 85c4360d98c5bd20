//! Parquet output for an in-memory [`DataSet`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parquet::basic::{Compression, ConvertedType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Schema, Value};

/// Tuning for [`write_parquet_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParquetWriteOptions {
    /// Maximum rows per row group.
    pub row_group_rows: usize,
}

impl Default for ParquetWriteOptions {
    fn default() -> Self {
        Self {
            row_group_rows: 65_536,
        }
    }
}

/// Write `data` as a zstd-compressed Parquet file at `path` with default options.
pub fn write_parquet(data: &DataSet, path: &Path) -> PipelineResult<()> {
    write_parquet_with(data, path, &ParquetWriteOptions::default())
}

/// Write `data` as a zstd-compressed Parquet file at `path`.
///
/// Every column is `OPTIONAL` so nulls survive. The file is written next to `path` under a
/// temporary name and renamed into place once complete; on error nothing is left at `path`.
pub fn write_parquet_with(
    data: &DataSet,
    path: &Path,
    opts: &ParquetWriteOptions,
) -> PipelineResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PipelineError::write_failure(parent, e))?;

    let tmp = NamedTempFile::new_in(parent).map_err(|e| PipelineError::write_failure(parent, e))?;
    let (file, tmp_path) = tmp.into_parts();

    let schema = parquet_schema(&data.schema)?;
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build(),
    );
    let mut writer = SerializedFileWriter::new(file, schema, props)?;

    for chunk in data.rows.chunks(opts.row_group_rows.max(1)) {
        let mut rg = writer.next_row_group()?;
        let mut col_idx = 0;
        while let Some(mut col) = rg.next_column()? {
            let field = &data.schema.fields[col_idx];
            write_column(col.untyped(), chunk, col_idx, field.data_type)
                .map_err(|e| PipelineError::write_failure(path, format!("column '{}': {e}", field.name)))?;
            col.close()?;
            col_idx += 1;
        }
        rg.close()?;
    }
    writer.close()?;

    tmp_path
        .persist(path)
        .map_err(|e| PipelineError::write_failure(path, e))?;
    Ok(())
}

fn parquet_schema(schema: &Schema) -> PipelineResult<TypePtr> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let (physical, converted) = match field.data_type {
            DataType::Int64 => (PhysicalType::INT64, ConvertedType::NONE),
            DataType::Float64 => (PhysicalType::DOUBLE, ConvertedType::NONE),
            DataType::Bool => (PhysicalType::BOOLEAN, ConvertedType::NONE),
            DataType::Utf8 => (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8),
        };
        let t = Type::primitive_type_builder(&field.name, physical)
            .with_repetition(Repetition::OPTIONAL)
            .with_converted_type(converted)
            .build()?;
        fields.push(Arc::new(t));
    }
    Ok(Arc::new(
        Type::group_type_builder("schema").with_fields(fields).build()?,
    ))
}

/// Non-null values of one column plus its definition levels.
fn collect<T>(
    rows: &[Vec<Value>],
    idx: usize,
    mut convert: impl FnMut(&Value) -> Option<T>,
) -> Result<(Vec<T>, Vec<i16>), ParquetError> {
    let mut values = Vec::with_capacity(rows.len());
    let mut def_levels = Vec::with_capacity(rows.len());
    for row in rows {
        match row.get(idx).unwrap_or(&Value::Null) {
            Value::Null => def_levels.push(0),
            v => {
                let converted = convert(v).ok_or_else(|| {
                    ParquetError::General(format!("value {v:?} does not match the column type"))
                })?;
                values.push(converted);
                def_levels.push(1);
            }
        }
    }
    Ok((values, def_levels))
}

fn write_column(
    writer: &mut ColumnWriter<'_>,
    rows: &[Vec<Value>],
    idx: usize,
    data_type: DataType,
) -> Result<(), ParquetError> {
    match (writer, data_type) {
        (ColumnWriter::Int64ColumnWriter(w), DataType::Int64) => {
            let (values, defs) = collect(rows, idx, |v| match v {
                Value::Int64(n) => Some(*n),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::DoubleColumnWriter(w), DataType::Float64) => {
            let (values, defs) = collect(rows, idx, |v| match v {
                Value::Float64(n) => Some(*n),
                Value::Int64(n) => Some(*n as f64),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::BoolColumnWriter(w), DataType::Bool) => {
            let (values, defs) = collect(rows, idx, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::ByteArrayColumnWriter(w), DataType::Utf8) => {
            let (values, defs) = collect(rows, idx, |v| Some(ByteArray::from(v.to_string().as_str())))?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        _ => {
            return Err(ParquetError::General(format!(
                "no column writer for {data_type:?}"
            )));
        }
    }
    Ok(())
}

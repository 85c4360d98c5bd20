#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use parquet::file::reader::{FileReader, SerializedFileReader};

use rust_batch_etl::assembly::write_parquet;
use rust_batch_etl::config::RunConfig;
use rust_batch_etl::types::{DataSet, DataType, Field, Schema, Value};

/// Trip-like rows; every seventh fare is null.
pub fn trips(rows: usize) -> DataSet {
    let schema = Schema::new(vec![
        Field::new("trip_id", DataType::Int64),
        Field::new("fare", DataType::Float64),
        Field::new("zone", DataType::Utf8),
    ]);
    let rows = (0..rows)
        .map(|i| {
            let fare = if i % 7 == 0 {
                Value::Null
            } else {
                Value::Float64(i as f64 * 0.5)
            };
            vec![
                Value::Int64(i as i64),
                fare,
                Value::Utf8(format!("zone-{}", i % 5)),
            ]
        })
        .collect();
    DataSet::new(schema, rows)
}

/// Write `trips(rows)` as `source.parquet` under `dir`.
pub fn write_source(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("source.parquet");
    write_parquet(&trips(rows), &path).unwrap();
    path
}

pub fn parquet_rows(path: &Path) -> i64 {
    let reader = SerializedFileReader::new(File::open(path).unwrap()).unwrap();
    reader.metadata().file_metadata().num_rows()
}

pub fn config_for(source: &Path, chunk_size: usize, workers: usize) -> RunConfig {
    RunConfig {
        source_url: source.to_string_lossy().into_owned(),
        chunk_size,
        worker_count: workers,
        ..RunConfig::default()
    }
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

//! The transform boundary.
//!
//! A [`TransformEngine`] turns one staged slice into one result fragment at
//! `output_dir/chunk_result_{task_id}.txt`. The dispatcher treats engines as opaque: it only
//! relies on the fragment appearing at that path when `run` returns `Ok`.
//!
//! Any `Fn(&Path, &str, &Path) -> Result<(), TransformError>` is an engine, which keeps test
//! doubles and ad-hoc engines cheap. [`DataSetEngine`] is the stock implementation: it decodes
//! the slice into a [`DataSet`], applies a `DataSet -> DataSet` function and writes the fragment.

pub mod fragment;
mod reader;

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::TransformError;
use crate::types::{DataSet, DataType, Field, Schema, Value};

pub use fragment::{
    FragmentTable, ResultFragment, fragment_file_name, fragment_path, parse_fragment_task_id,
    read_fragment, write_fragment,
};
pub use reader::read_parquet;

/// Converts a staged slice file into a result fragment.
///
/// Implementations must be callable repeatedly, and concurrently from several workers, without
/// state leaking between invocations.
pub trait TransformEngine: Send + Sync {
    /// Transform `input_path` and write the fragment for `task_id` into `output_dir`.
    fn run(&self, input_path: &Path, task_id: &str, output_dir: &Path) -> Result<(), TransformError>;
}

impl<F> TransformEngine for F
where
    F: Fn(&Path, &str, &Path) -> Result<(), TransformError> + Send + Sync,
{
    fn run(&self, input_path: &Path, task_id: &str, output_dir: &Path) -> Result<(), TransformError> {
        self(input_path, task_id, output_dir)
    }
}

type DataSetFn = dyn Fn(DataSet) -> Result<DataSet, TransformError> + Send + Sync;

/// Engine that maps a decoded slice through a `DataSet -> DataSet` function.
pub struct DataSetEngine {
    name: String,
    transform: Box<DataSetFn>,
}

impl DataSetEngine {
    /// Create an engine from a named transform function.
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(DataSet) -> Result<DataSet, TransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transform: Box::new(transform),
        }
    }

    /// Copies every row through unchanged.
    pub fn passthrough() -> Self {
        Self::new("passthrough", Ok)
    }

    /// Drops every row that has a null in any column.
    pub fn drop_nulls() -> Self {
        Self::new("drop-nulls", |ds: DataSet| {
            Ok(ds.filter_rows(|row| row.iter().all(|v| !v.is_null())))
        })
    }

    /// Drops incomplete rows, then derives per-trip metrics from taxi trip columns.
    ///
    /// Appends `is_airport_trip` (pickup or dropoff in zones 1 to 3), `tip_percentage`
    /// (`tip_amount / fare_amount * 100`, null for a zero fare) and `cost_per_mile`
    /// (`total_amount / trip_distance`, null for a zero distance). A slice missing any source
    /// column fails the item.
    pub fn trip_metrics() -> Self {
        Self::new("trip-metrics", |ds: DataSet| {
            let column = |name: &str| {
                ds.schema
                    .index_of(name)
                    .ok_or_else(|| TransformError::Failed(format!("missing column `{name}`")))
            };
            let pickup = column("PULocationID")?;
            let dropoff = column("DOLocationID")?;
            let tip = column("tip_amount")?;
            let fare = column("fare_amount")?;
            let total = column("total_amount")?;
            let distance = column("trip_distance")?;

            let complete = ds.filter_rows(|row| row.iter().all(|v| !v.is_null()));
            let mut fields = complete.schema.fields;
            fields.extend([
                Field::new("is_airport_trip", DataType::Bool),
                Field::new("tip_percentage", DataType::Float64),
                Field::new("cost_per_mile", DataType::Float64),
            ]);
            let rows = complete
                .rows
                .into_iter()
                .map(|mut row| {
                    let airport = is_airport_zone(&row[pickup]) || is_airport_zone(&row[dropoff]);
                    let tip_pct = ratio(&row[tip], &row[fare]).map(|r| r * 100.0);
                    let per_mile = ratio(&row[total], &row[distance]);
                    row.push(Value::Bool(airport));
                    row.push(tip_pct.map_or(Value::Null, Value::Float64));
                    row.push(per_mile.map_or(Value::Null, Value::Float64));
                    row
                })
                .collect();
            Ok(DataSet::new(Schema::new(fields), rows))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

const AIRPORT_ZONES: [i64; 3] = [1, 2, 3];

fn is_airport_zone(zone: &Value) -> bool {
    match zone {
        Value::Int64(z) => AIRPORT_ZONES.contains(z),
        Value::Float64(z) => AIRPORT_ZONES.iter().any(|a| *a as f64 == *z),
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int64(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        _ => None,
    }
}

/// `num / den`, or `None` when either side is non-numeric or the denominator is zero.
fn ratio(num: &Value, den: &Value) -> Option<f64> {
    let den = as_f64(den).filter(|d| *d != 0.0)?;
    Some(as_f64(num)? / den)
}

impl fmt::Debug for DataSetEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSetEngine")
            .field("name", &self.name)
            .finish()
    }
}

impl TransformEngine for DataSetEngine {
    fn run(&self, input_path: &Path, task_id: &str, output_dir: &Path) -> Result<(), TransformError> {
        let input = read_parquet(input_path)?;
        let rows_in = input.row_count();
        let output = (self.transform)(input)?;

        fs::create_dir_all(output_dir)?;
        let path = fragment_path(output_dir, task_id);
        write_fragment(&path, task_id, &output)?;
        debug!(
            engine = %self.name,
            task_id,
            rows_in,
            rows_out = output.row_count(),
            path = %path.display(),
            "fragment written"
        );
        Ok(())
    }
}

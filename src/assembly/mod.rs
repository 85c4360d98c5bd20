//! Result assembly: merge validated fragments into the final Parquet artifact.

mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::transform::{FragmentTable, ResultFragment, read_fragment};
use crate::types::{DataSet, DataType, Field, Schema, Value};

pub use writer::{ParquetWriteOptions, write_parquet, write_parquet_with};

/// Order in which fragments are concatenated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentOrder {
    /// Whatever order the directory listing yields.
    #[default]
    Listing,
    /// Ascending numeric task id.
    TaskId,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub order: FragmentOrder,
    pub write: ParquetWriteOptions,
}

/// What [`assemble`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Fragments that contributed rows, in concatenation order.
    pub fragments_used: Vec<String>,
    /// Fragments that were empty or invalid.
    pub fragments_skipped: Vec<String>,
    /// Rows written to the artifact.
    pub rows: usize,
    pub output_path: PathBuf,
}

/// Merge every fragment in `fragments_dir` into one Parquet file at `output_path`.
pub fn assemble(fragments_dir: &Path, output_path: &Path) -> PipelineResult<AssemblyReport> {
    assemble_with(fragments_dir, output_path, &AssembleOptions::default())
}

pub fn assemble_with(
    fragments_dir: &Path,
    output_path: &Path,
    opts: &AssembleOptions,
) -> PipelineResult<AssemblyReport> {
    let mut fragments = list_fragments(fragments_dir)?;
    if opts.order == FragmentOrder::TaskId {
        fragments.sort_by(|a, b| task_id_key(&a.task_id).cmp(&task_id_key(&b.task_id)));
    }
    debug!(dir = %fragments_dir.display(), count = fragments.len(), "fragments found");

    let mut tables = Vec::with_capacity(fragments.len());
    let mut fragments_skipped = Vec::new();
    for fragment in fragments {
        match read_fragment(&fragment.path) {
            Ok(table) if table.row_count() == 0 => {
                warn!(task_id = %fragment.task_id, "skipping fragment with no rows");
                fragments_skipped.push(fragment.task_id);
            }
            Ok(table) => {
                if table.task_id != fragment.task_id {
                    warn!(
                        file_task_id = %fragment.task_id,
                        declared_task_id = %table.task_id,
                        "fragment metadata disagrees with its file name"
                    );
                }
                tables.push((fragment.task_id, table));
            }
            Err(err) => {
                warn!(path = %fragment.path.display(), error = %err, "skipping invalid fragment");
                fragments_skipped.push(fragment.task_id);
            }
        }
    }

    if tables.is_empty() {
        return Err(PipelineError::NoValidFragments {
            dir: fragments_dir.to_path_buf(),
        });
    }

    let fragments_used: Vec<String> = tables.iter().map(|(id, _)| id.clone()).collect();
    let contributing: Vec<&FragmentTable> = tables.iter().map(|(_, t)| t).collect();
    let merged = merge_tables(&contributing);
    write_parquet_with(&merged, output_path, &opts.write)?;

    info!(
        rows = merged.row_count(),
        columns = merged.schema.fields.len(),
        used = fragments_used.len(),
        skipped = fragments_skipped.len(),
        output = %output_path.display(),
        "artifact written"
    );
    Ok(AssemblyReport {
        fragments_used,
        fragments_skipped,
        rows: merged.row_count(),
        output_path: output_path.to_path_buf(),
    })
}

fn list_fragments(dir: &Path) -> PipelineResult<Vec<ResultFragment>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| PipelineError::read_failure(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(fragment) = ResultFragment::from_path(entry.into_path()) {
            out.push(fragment);
        }
    }
    Ok(out)
}

/// Numeric ids first in numeric order, then anything else lexically.
fn task_id_key(task_id: &str) -> (bool, u64, &str) {
    match task_id.parse::<u64>() {
        Ok(n) => (false, n, task_id),
        Err(_) => (true, 0, task_id),
    }
}

/// Concatenate fragment tables under the union of their headers.
fn merge_tables(tables: &[&FragmentTable]) -> DataSet {
    let mut names: Vec<String> = Vec::new();
    for table in tables {
        for h in &table.headers {
            if !names.contains(h) {
                names.push(h.clone());
            }
        }
    }

    let mut raw: Vec<Vec<Option<&str>>> = Vec::new();
    for table in tables {
        let positions: Vec<Option<usize>> = names
            .iter()
            .map(|n| table.headers.iter().position(|h| h == n))
            .collect();
        for row in &table.rows {
            raw.push(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| row.get(i)).map(String::as_str))
                    .collect(),
            );
        }
    }

    let types: Vec<DataType> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = || raw.iter().filter_map(|row| row[idx]);
            declared_type(tables, name)
                .filter(|t| cells().all(|c| parses_as(c, *t)))
                .unwrap_or_else(|| infer_type(cells()))
        })
        .collect();
    let rows = raw
        .iter()
        .map(|row| {
            row.iter()
                .zip(&types)
                .map(|(cell, t)| cell.map_or(Value::Null, |s| parse_cell(s, *t)))
                .collect()
        })
        .collect();

    let fields = names
        .into_iter()
        .zip(types)
        .map(|(n, t)| Field::new(n, t))
        .collect();
    DataSet::new(Schema::new(fields), rows)
}

/// Type the producing engines declared for column `name`.
///
/// Only fragments holding at least one value in the column have a say, so an all-null column
/// in one slice does not widen the others. `None` if any such fragment declared nothing.
fn declared_type(tables: &[&FragmentTable], name: &str) -> Option<DataType> {
    let mut out = None;
    for table in tables {
        let Some(pos) = table.headers.iter().position(|h| h == name) else {
            continue;
        };
        if !table.rows.iter().any(|r| r.get(pos).is_some_and(|c| !c.is_empty())) {
            continue;
        }
        let declared = *table.types.as_ref()?.get(pos)?;
        out = Some(match out {
            None => declared,
            Some(prev) => unify(prev, declared),
        });
    }
    out
}

fn unify(a: DataType, b: DataType) -> DataType {
    match (a, b) {
        (a, b) if a == b => a,
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            DataType::Float64
        }
        _ => DataType::Utf8,
    }
}

fn parses_as(cell: &str, data_type: DataType) -> bool {
    let s = cell.trim();
    match data_type {
        DataType::Utf8 => true,
        _ if s.is_empty() => true,
        DataType::Int64 => s.parse::<i64>().is_ok(),
        DataType::Float64 => s.parse::<f64>().is_ok(),
        DataType::Bool => parse_bool(s).is_some(),
    }
}

/// Narrowest of Int64, Float64, Bool, Utf8 that every non-blank cell parses as.
fn infer_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    let (mut int, mut float, mut boolean, mut seen) = (true, true, true, false);
    for cell in cells {
        let s = cell.trim();
        if s.is_empty() {
            continue;
        }
        seen = true;
        int &= s.parse::<i64>().is_ok();
        float &= s.parse::<f64>().is_ok();
        boolean &= parse_bool(s).is_some();
        if !int && !float && !boolean {
            return DataType::Utf8;
        }
    }
    match (seen, int, float, boolean) {
        (false, ..) => DataType::Utf8,
        (_, true, ..) => DataType::Int64,
        (_, _, true, _) => DataType::Float64,
        (_, _, _, true) => DataType::Bool,
        _ => DataType::Utf8,
    }
}

/// Empty cells are null. Strings are kept verbatim; other types parse the trimmed text, and a
/// blank cell is null for them.
fn parse_cell(raw: &str, data_type: DataType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if data_type == DataType::Utf8 {
        return Value::Utf8(raw.to_owned());
    }
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    let parsed = match data_type {
        DataType::Int64 => s.parse().ok().map(Value::Int64),
        DataType::Float64 => s.parse().ok().map(Value::Float64),
        DataType::Bool => parse_bool(s).map(Value::Bool),
        DataType::Utf8 => None,
    };
    parsed.unwrap_or_else(|| Value::Utf8(raw.to_owned()))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

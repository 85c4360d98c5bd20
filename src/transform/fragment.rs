//! Result fragment file convention.
//!
//! ```text
//! --- Chunk Results ---
//! task_id=3 rows=2 types=i64,f64
//! trip_id,fare
//! 15000,12.5
//! 15001,8.0
//! --- End Chunk Results ---
//! ```
//!
//! The first two lines and the last line are framing; everything between them is a CSV body
//! with a header line. A fragment is only accepted when both markers are present and the row
//! count in the metadata line matches the body, so a truncated write is rejected.
//!
//! `types=` is optional. When present it lists one [`DataType`] tag per header column, and the
//! assembler trusts it ahead of inferring types from the cell text.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FragmentError, TransformError};
use crate::types::{DataSet, DataType};

/// File name prefix shared by all fragments.
pub const FRAGMENT_PREFIX: &str = "chunk_result_";
/// File extension of a fragment.
pub const FRAGMENT_EXTENSION: &str = "txt";
/// First line of every fragment.
pub const START_MARKER: &str = "--- Chunk Results ---";
/// Last line of every fragment.
pub const END_MARKER: &str = "--- End Chunk Results ---";

/// A fragment file written by a transform engine for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFragment {
    pub task_id: String,
    pub path: PathBuf,
}

impl ResultFragment {
    /// Recognise a fragment by its file name. Returns `None` for anything else.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let task_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_fragment_task_id)?
            .to_string();
        Some(Self { task_id, path })
    }
}

/// `chunk_result_{task_id}.txt`
pub fn fragment_file_name(task_id: &str) -> String {
    format!("{FRAGMENT_PREFIX}{task_id}.{FRAGMENT_EXTENSION}")
}

/// Deterministic fragment location for `task_id` inside `dir`.
pub fn fragment_path(dir: &Path, task_id: &str) -> PathBuf {
    dir.join(fragment_file_name(task_id))
}

/// Task id embedded in a fragment file name.
pub fn parse_fragment_task_id(file_name: &str) -> Option<&str> {
    let task_id = file_name
        .strip_prefix(FRAGMENT_PREFIX)?
        .strip_suffix(FRAGMENT_EXTENSION)?
        .strip_suffix('.')?;
    (!task_id.is_empty()).then_some(task_id)
}

/// Write `data` as a framed fragment at `path`.
pub fn write_fragment(path: &Path, task_id: &str, data: &DataSet) -> Result<(), TransformError> {
    let mut body = csv::Writer::from_writer(Vec::new());
    body.write_record(data.schema.field_names())?;
    for row in &data.rows {
        body.write_record(row.iter().map(|v| v.to_string()))?;
    }
    let body = body
        .into_inner()
        .map_err(|e| TransformError::Io(e.into_error()))?;

    let mut out = Vec::with_capacity(body.len() + 96);
    out.extend_from_slice(START_MARKER.as_bytes());
    out.push(b'\n');
    let types: Vec<&str> = data.schema.fields.iter().map(|f| f.data_type.tag()).collect();
    out.extend_from_slice(
        format!(
            "task_id={task_id} rows={} types={}\n",
            data.row_count(),
            types.join(",")
        )
        .as_bytes(),
    );
    out.extend_from_slice(&body);
    out.extend_from_slice(END_MARKER.as_bytes());
    out.push(b'\n');
    fs::write(path, out)?;
    Ok(())
}

/// Row payload of a fragment with the framing stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentTable {
    /// Task id declared in the metadata line.
    pub task_id: String,
    /// Column names from the CSV header.
    pub headers: Vec<String>,
    /// Declared column types, one per header, if the metadata line carried them.
    pub types: Option<Vec<DataType>>,
    /// Raw cell text, one inner vector per row.
    pub rows: Vec<Vec<String>>,
}

impl FragmentTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Read and validate the fragment at `path`.
pub fn read_fragment(path: &Path) -> Result<FragmentTable, FragmentError> {
    let text = fs::read_to_string(path)?;
    parse_fragment(&text)
}

/// Validate framing and parse the body of a fragment.
pub fn parse_fragment(text: &str) -> Result<FragmentTable, FragmentError> {
    let text = text.trim_end_matches(['\r', '\n']);
    let mut parts = text.splitn(3, '\n');

    let marker = parts.next().unwrap_or_default().trim_end_matches('\r');
    if marker != START_MARKER {
        return Err(FragmentError::Framing(format!(
            "expected leading marker '{START_MARKER}', found '{marker}'"
        )));
    }
    let meta = parts
        .next()
        .ok_or_else(|| FragmentError::Framing("missing metadata line".to_string()))?
        .trim_end_matches('\r');
    let meta = parse_metadata(meta)?;

    let rest = parts
        .next()
        .ok_or_else(|| FragmentError::Framing("missing body and footer".to_string()))?;
    let (body, footer) = match rest.rsplit_once('\n') {
        Some((body, footer)) => (body, footer),
        None => ("", rest),
    };
    if footer.trim_end_matches('\r') != END_MARKER {
        return Err(FragmentError::Framing(format!(
            "expected trailing marker '{END_MARKER}'"
        )));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_owned).collect::<Vec<_>>());
    }

    if rows.len() != meta.rows {
        return Err(FragmentError::Framing(format!(
            "metadata declares {} rows, body holds {}",
            meta.rows,
            rows.len()
        )));
    }
    if let Some(types) = &meta.types {
        if types.len() != headers.len() {
            return Err(FragmentError::Framing(format!(
                "metadata declares {} column types, header has {} columns",
                types.len(),
                headers.len()
            )));
        }
    }
    Ok(FragmentTable {
        task_id: meta.task_id,
        headers,
        types: meta.types,
        rows,
    })
}

struct Metadata {
    task_id: String,
    rows: usize,
    types: Option<Vec<DataType>>,
}

fn parse_metadata(line: &str) -> Result<Metadata, FragmentError> {
    let bad = || FragmentError::Framing(format!("bad metadata line '{line}'"));
    let mut task_id = None;
    let mut rows = None;
    let mut types = None;
    for pair in line.split_whitespace() {
        match pair.split_once('=') {
            Some(("task_id", v)) => task_id = Some(v.to_string()),
            Some(("rows", v)) => rows = v.parse::<usize>().ok(),
            Some(("types", "")) => types = Some(Vec::new()),
            Some(("types", v)) => {
                let parsed = v
                    .split(',')
                    .map(DataType::from_tag)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(bad)?;
                types = Some(parsed);
            }
            _ => {}
        }
    }
    match (task_id, rows) {
        (Some(task_id), Some(rows)) => Ok(Metadata {
            task_id,
            rows,
            types,
        }),
        _ => Err(bad()),
    }
}

//! Partitioning of the source dataset into row-bounded slice files.
//!
//! The source is fetched fully, its row count `R` is read from the Parquet footer, and
//! `ceil(R / chunk_size)` slices are written. Slice `i` holds rows
//! `[i * chunk_size, min((i + 1) * chunk_size, R))` and is a standalone Parquet file that keeps
//! the source schema, named `slice_{i}.parquet`.

mod source;

use std::fs::{self, File};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::error::{PipelineError, PipelineResult};

pub use source::Source;

/// File name prefix shared by all slices.
pub const SLICE_PREFIX: &str = "slice_";
/// File extension of a slice.
pub const SLICE_EXTENSION: &str = "parquet";

/// Largest record batch decoded at once while streaming the source.
const MAX_BATCH_ROWS: usize = 8_192;

/// A contiguous row range of the source, persisted as one Parquet file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// Position of the slice in the source; slice `i` starts at row `i * chunk_size`.
    pub index: usize,
    /// Rows held by the slice (always > 0).
    pub row_count: usize,
    /// Location of the slice file.
    pub path: PathBuf,
}

impl Slice {
    /// Task identifier of the work item built for this slice.
    pub fn task_id(&self) -> String {
        self.index.to_string()
    }
}

/// `slice_{index}.parquet`
pub fn slice_file_name(index: usize) -> String {
    format!("{SLICE_PREFIX}{index}.{SLICE_EXTENSION}")
}

/// Recover the slice index from a file name produced by [`slice_file_name`].
pub fn parse_slice_index(file_name: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix(SLICE_PREFIX)?
        .strip_suffix(SLICE_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Row ranges of `ceil(row_count / chunk_size)` slices covering `[0, row_count)`.
///
/// # Panics
///
/// Panics if `chunk_size == 0`.
pub fn slice_ranges(row_count: usize, chunk_size: usize) -> Vec<Range<usize>> {
    assert!(chunk_size > 0, "chunk_size must be > 0");
    let mut out = Vec::with_capacity(row_count.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + chunk_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

/// Splits a Parquet dataset into slice files.
#[derive(Debug, Clone)]
pub struct Slicer {
    chunk_size: usize,
    fetch_timeout: Duration,
}

impl Slicer {
    /// Create a slicer producing slices of at most `chunk_size` rows.
    pub fn new(chunk_size: usize) -> PipelineResult<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::InvalidConfig {
                message: "chunk_size must be >= 1".to_string(),
            });
        }
        Ok(Self {
            chunk_size,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        })
    }

    /// Bound the wait on a remote fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch `source` and write its slices into `output_dir`.
    ///
    /// Existing files in `output_dir` are overwritten when names collide and otherwise left
    /// alone.
    pub fn partition(&self, source: &Source, output_dir: &Path) -> PipelineResult<Vec<Slice>> {
        fs::create_dir_all(output_dir).map_err(|e| PipelineError::write_failure(output_dir, e))?;
        info!(source = %source, chunk_size = self.chunk_size, "fetching source dataset");
        let data = source.fetch(self.fetch_timeout)?;
        self.partition_bytes(data, output_dir)
    }

    /// Write the slices of an already-fetched Parquet file into `output_dir`.
    pub fn partition_bytes(&self, data: Bytes, output_dir: &Path) -> PipelineResult<Vec<Slice>> {
        if data.is_empty() {
            return Err(PipelineError::SourceUnavailable {
                location: "<memory>".to_string(),
                message: "zero bytes".to_string(),
            });
        }
        fs::create_dir_all(output_dir).map_err(|e| PipelineError::write_failure(output_dir, e))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
        let total_rows = builder.metadata().file_metadata().num_rows();
        let total_rows = usize::try_from(total_rows).map_err(|_| {
            ParquetError::General(format!("invalid row count in footer: {total_rows}"))
        })?;
        if total_rows == 0 {
            return Err(PipelineError::EmptyDataset);
        }
        info!(total_rows, chunk_size = self.chunk_size, "partitioning dataset");

        let schema = builder.schema().clone();
        let reader = builder
            .with_batch_size(self.chunk_size.min(MAX_BATCH_ROWS))
            .build()?;

        // Single pass: each batch is cut at chunk boundaries and its pieces go to the open slice.
        let mut ranges = slice_ranges(total_rows, self.chunk_size).into_iter().enumerate();
        let mut slices = Vec::with_capacity(ranges.len());
        let mut current: Option<SliceWriter> = None;
        for batch in reader {
            let batch = batch.map_err(ParquetError::from)?;
            let mut offset = 0;
            while offset < batch.num_rows() {
                let mut writer = match current.take() {
                    Some(w) => w,
                    None => {
                        let (index, rows) = ranges.next().ok_or_else(|| {
                            ParquetError::General(format!(
                                "source holds more rows than the {total_rows} its footer declares"
                            ))
                        })?;
                        SliceWriter::create(output_dir, index, rows, schema.clone())?
                    }
                };
                let take = writer.remaining().min(batch.num_rows() - offset);
                writer.write(&batch.slice(offset, take))?;
                offset += take;
                if writer.remaining() == 0 {
                    let slice = writer.finish()?;
                    debug!(
                        index = slice.index,
                        row_count = slice.row_count,
                        path = %slice.path.display(),
                        "slice written"
                    );
                    slices.push(slice);
                } else {
                    current = Some(writer);
                }
            }
        }

        if current.is_some() || ranges.next().is_some() {
            return Err(ParquetError::General(format!(
                "source holds fewer rows than the {total_rows} its footer declares"
            ))
            .into());
        }

        info!(slices = slices.len(), "partitioning complete");
        Ok(slices)
    }
}

/// Convenience wrapper: `Slicer::new(chunk_size)?.partition(source, output_dir)`.
pub fn partition(source: &Source, chunk_size: usize, output_dir: &Path) -> PipelineResult<Vec<Slice>> {
    Slicer::new(chunk_size)?.partition(source, output_dir)
}

fn slice_writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build()
}

/// An open slice file receiving the rows of one range.
struct SliceWriter {
    index: usize,
    expected: usize,
    written: usize,
    path: PathBuf,
    writer: ArrowWriter<File>,
}

impl SliceWriter {
    fn create(
        dir: &Path,
        index: usize,
        rows: Range<usize>,
        schema: SchemaRef,
    ) -> PipelineResult<Self> {
        let path = dir.join(slice_file_name(index));
        let file = File::create(&path).map_err(|e| PipelineError::write_failure(&path, e))?;
        let writer = ArrowWriter::try_new(file, schema, Some(slice_writer_properties()))?;
        Ok(Self {
            index,
            expected: rows.len(),
            written: 0,
            path,
            writer,
        })
    }

    fn remaining(&self) -> usize {
        self.expected - self.written
    }

    fn write(&mut self, batch: &RecordBatch) -> PipelineResult<()> {
        self.writer
            .write(batch)
            .map_err(|e| PipelineError::write_failure(&self.path, e))?;
        self.written += batch.num_rows();
        Ok(())
    }

    fn finish(self) -> PipelineResult<Slice> {
        self.writer
            .close()
            .map_err(|e| PipelineError::write_failure(&self.path, e))?;
        Ok(Slice {
            index: self.index,
            row_count: self.written,
            path: self.path,
        })
    }
}

/// Enumerate the slice files in `dir`, ordered by index.
///
/// Files that do not follow the slice naming convention are ignored, as are slice files whose
/// footer reports zero rows. Fails with [`PipelineError::NoSlices`] if nothing is left.
pub fn discover_slices(dir: &Path) -> PipelineResult<Vec<Slice>> {
    let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy()))
        .join(format!("{SLICE_PREFIX}*.{SLICE_EXTENSION}"));
    let entries =
        glob::glob(&pattern.to_string_lossy()).map_err(|e| PipelineError::read_failure(dir, e))?;

    let mut slices = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::read_failure(dir, e))?;
        let Some(index) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_slice_index)
        else {
            debug!(path = %path.display(), "ignoring non-slice file");
            continue;
        };

        let row_count = footer_row_count(&path)?;
        if row_count == 0 {
            warn!(path = %path.display(), "ignoring empty slice file");
            continue;
        }
        slices.push(Slice {
            index,
            row_count,
            path,
        });
    }

    if slices.is_empty() {
        return Err(PipelineError::NoSlices {
            dir: dir.to_path_buf(),
        });
    }
    slices.sort_by_key(|s| s.index);
    Ok(slices)
}

fn footer_row_count(path: &Path) -> PipelineResult<usize> {
    let file = File::open(path).map_err(|e| PipelineError::read_failure(path, e))?;
    let reader = SerializedFileReader::new(file)?;
    let rows = reader.metadata().file_metadata().num_rows();
    Ok(usize::try_from(rows).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ParquetWriteOptions, write_parquet_with};
    use crate::transform::read_parquet;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn trips(n: usize) -> DataSet {
        let schema = Schema::new(vec![
            Field::new("trip_id", DataType::Int64),
            Field::new("fare", DataType::Float64),
            Field::new("vendor", DataType::Utf8),
        ]);
        let rows = (0..n as i64)
            .map(|i| {
                vec![
                    Value::Int64(i),
                    Value::Float64(i as f64 * 1.5),
                    Value::Utf8(format!("v{}", i % 3)),
                ]
            })
            .collect();
        DataSet::new(schema, rows)
    }

    fn trips_bytes(n: usize, row_group_rows: usize) -> Bytes {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.parquet");
        write_parquet_with(&trips(n), &path, &ParquetWriteOptions { row_group_rows }).unwrap();
        Bytes::from(fs::read(&path).unwrap())
    }

    fn trip_ids(slice: &Slice) -> Vec<i64> {
        let ds = read_parquet(&slice.path).unwrap();
        let idx = ds.schema.index_of("trip_id").unwrap();
        ds.rows
            .iter()
            .map(|row| match row[idx] {
                Value::Int64(v) => v,
                ref other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn slice_ranges_partition_without_gaps() {
        for (rows, chunk) in [(1, 1), (10, 3), (12_000, 5_000), (5, 10), (9, 9)] {
            let ranges = slice_ranges(rows, chunk);
            assert_eq!(ranges.len(), rows.div_ceil(chunk));
            assert_eq!(ranges.first().unwrap().start, 0);
            assert_eq!(ranges.last().unwrap().end, rows);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert!(ranges.iter().all(|r| !r.is_empty() && r.len() <= chunk));
        }
        assert!(slice_ranges(0, 4).is_empty());
    }

    #[test]
    fn slice_names_round_trip() {
        assert_eq!(slice_file_name(12), "slice_12.parquet");
        assert_eq!(parse_slice_index("slice_12.parquet"), Some(12));
        assert_eq!(parse_slice_index("slice_.parquet"), None);
        assert_eq!(parse_slice_index("slice_+1.parquet"), None);
        assert_eq!(parse_slice_index("slice_1.parquet.tmp"), None);
        assert_eq!(parse_slice_index("chunk_result_1.txt"), None);
    }

    #[test]
    fn partition_covers_every_row_once_across_row_groups() {
        let out = tempfile::tempdir().unwrap();
        let slices = Slicer::new(4)
            .unwrap()
            .partition_bytes(trips_bytes(10, 3), out.path())
            .unwrap();

        assert_eq!(slices.iter().map(|s| s.row_count).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut seen = Vec::new();
        for (i, slice) in slices.iter().enumerate() {
            assert_eq!(slice.index, i);
            assert_eq!(slice.path, out.path().join(slice_file_name(i)));
            let ids = trip_ids(slice);
            assert_eq!(ids.first().copied(), Some((i * 4) as i64));
            seen.extend(ids);
        }
        assert_eq!(seen, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn chunks_larger_than_a_batch_are_stitched_from_several_batches() {
        let rows = 2 * 10_000 + 1;
        let out = tempfile::tempdir().unwrap();
        let slices = Slicer::new(10_000)
            .unwrap()
            .partition_bytes(trips_bytes(rows, 3_000), out.path())
            .unwrap();

        assert_eq!(
            slices.iter().map(|s| s.row_count).collect::<Vec<_>>(),
            vec![10_000, 10_000, 1]
        );
        let seen: Vec<i64> = slices.iter().flat_map(trip_ids).collect();
        assert_eq!(seen, (0..rows as i64).collect::<Vec<_>>());
    }

    #[test]
    fn output_dir_under_a_regular_file_is_a_write_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = Slicer::new(2)
            .unwrap()
            .partition_bytes(trips_bytes(5, 5), &blocker.join("slices"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::WriteFailure { .. }), "{err:?}");
    }

    #[test]
    fn slices_keep_the_source_schema() {
        let out = tempfile::tempdir().unwrap();
        let slices = Slicer::new(2)
            .unwrap()
            .partition_bytes(trips_bytes(3, 100), out.path())
            .unwrap();
        let ds = read_parquet(&slices[1].path).unwrap();
        assert_eq!(
            ds.schema.field_names().collect::<Vec<_>>(),
            vec!["trip_id", "fare", "vendor"]
        );
        assert_eq!(ds.rows[0][2], Value::Utf8("v2".to_string()));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let err = Slicer::new(10)
            .unwrap()
            .partition_bytes(trips_bytes(0, 10), out.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(Slicer::new(0), Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn garbage_source_is_a_parquet_error() {
        let out = tempfile::tempdir().unwrap();
        let err = Slicer::new(10)
            .unwrap()
            .partition_bytes(Bytes::from_static(b"definitely not parquet"), out.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parquet(_)));
    }

    #[test]
    fn partition_leaves_unrelated_files_alone() {
        let out = tempfile::tempdir().unwrap();
        fs::write(out.path().join("notes.txt"), b"keep me").unwrap();
        partition(
            &Source::Bytes(trips_bytes(5, 5)),
            2,
            out.path(),
        )
        .unwrap();
        assert!(out.path().join("notes.txt").exists());
    }

    #[test]
    fn discover_recovers_slices_in_index_order() {
        let out = tempfile::tempdir().unwrap();
        let written = Slicer::new(3)
            .unwrap()
            .partition_bytes(trips_bytes(11, 4), out.path())
            .unwrap();
        fs::write(out.path().join("README.md"), b"ignored").unwrap();

        let found = discover_slices(out.path()).unwrap();
        assert_eq!(found, written);
    }

    #[test]
    fn discover_in_empty_dir_is_no_slices() {
        let out = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_slices(out.path()),
            Err(PipelineError::NoSlices { .. })
        ));
    }
}

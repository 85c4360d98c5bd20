mod common;

use rust_batch_etl::PipelineError;
use rust_batch_etl::slicer::{Slicer, Source, discover_slices, partition, slice_ranges};
use rust_batch_etl::transform::read_parquet;
use rust_batch_etl::types::Value;

use common::{parquet_rows, write_source};

#[test]
fn ranges_partition_without_gap_or_overlap() {
    for (rows, chunk) in [(1, 1), (9, 10), (10, 10), (11, 10), (12_000, 5_000), (7, 3)] {
        let ranges = slice_ranges(rows, chunk);
        assert_eq!(ranges.len(), rows.div_ceil(chunk), "rows={rows} chunk={chunk}");
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, rows);
        assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
        assert!(ranges.iter().all(|r| !r.is_empty() && r.len() <= chunk));
    }
}

#[test]
fn slice_files_hold_their_row_ranges() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 23);
    let out = tmp.path().join("chunks_dir");

    let slices = partition(&Source::Path(source), 10, &out).unwrap();

    assert_eq!(
        slices.iter().map(|s| s.row_count).collect::<Vec<_>>(),
        vec![10, 10, 3]
    );
    for slice in &slices {
        assert_eq!(parquet_rows(&slice.path) as usize, slice.row_count);
        let ds = read_parquet(&slice.path).unwrap();
        assert_eq!(ds.rows[0][0], Value::Int64((slice.index * 10) as i64));
        assert_eq!(ds.schema.field_names().collect::<Vec<_>>(), vec!["trip_id", "fare", "zone"]);
    }
    assert_eq!(discover_slices(&out).unwrap(), slices);
}

#[test]
fn zero_chunk_size_is_invalid() {
    assert!(matches!(
        Slicer::new(0),
        Err(PipelineError::InvalidConfig { .. })
    ));
}

#[test]
fn non_parquet_source_is_a_parquet_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Slicer::new(10)
        .unwrap()
        .partition(&Source::Bytes("plain text".into()), tmp.path())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Parquet(_)));
}

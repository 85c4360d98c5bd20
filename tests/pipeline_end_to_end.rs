mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use rust_batch_etl::PipelineError;
use rust_batch_etl::TransformError;
use rust_batch_etl::assembly::FragmentOrder;
use rust_batch_etl::pipeline::{run_pipeline, run_pipeline_from};
use rust_batch_etl::slicer::{Source, discover_slices};
use rust_batch_etl::transform::{DataSetEngine, TransformEngine, read_parquet};
use rust_batch_etl::assembly::write_parquet;
use rust_batch_etl::types::{DataSet, DataType, Field, Schema, Value};

use common::{config_for, dir_is_empty, parquet_rows, write_source};

#[test]
fn twelve_thousand_rows_in_three_slices() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 12_000);
    let base = tmp.path().join("work");
    let cfg = config_for(&source, 5_000, 3);

    let summary = run_pipeline(&cfg, &base, &DataSetEngine::passthrough()).unwrap();

    assert_eq!(summary.slices, 3);
    assert_eq!(summary.source_rows, 12_000);
    assert_eq!(summary.assembly.rows, 12_000);
    let counts: Vec<usize> = discover_slices(&base.join("chunks_dir"))
        .unwrap()
        .iter()
        .map(|s| s.row_count)
        .collect();
    assert_eq!(counts, vec![5_000, 5_000, 2_000]);

    let artifact = base.join("output_dir").join("result.parquet");
    assert_eq!(summary.artifact_path(), &artifact);
    assert_eq!(parquet_rows(&artifact), 12_000);
    assert!(dir_is_empty(&base.join("source_dir")));
}

#[test]
fn drop_nulls_removes_rows_with_missing_fares() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 700);
    let base = tmp.path().join("work");
    let mut cfg = config_for(&source, 150, 2);
    cfg.fragment_order = FragmentOrder::TaskId;

    let summary = run_pipeline(&cfg, &base, &DataSetEngine::drop_nulls()).unwrap();

    // Every seventh row has a null fare.
    assert_eq!(summary.assembly.rows, 600);
    let ds = read_parquet(summary.artifact_path()).unwrap();
    assert!(ds.rows.iter().all(|r| !r[1].is_null()));
    // Task-id ordering keeps the source order intact.
    let ids: Vec<i64> = ds
        .rows
        .iter()
        .map(|r| match r[0] {
            Value::Int64(n) => n,
            ref other => panic!("unexpected id {other:?}"),
        })
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn whole_number_floats_and_padded_codes_keep_their_source_types() {
    let tmp = tempfile::tempdir().unwrap();
    let schema = Schema::new(vec![
        Field::new("passenger_count", DataType::Float64),
        Field::new("zip", DataType::Utf8),
    ]);
    let rows = (0..40)
        .map(|i| {
            vec![
                Value::Float64((i % 4) as f64),
                Value::Utf8(format!("{:04}", i * 100)),
            ]
        })
        .collect();
    let source = tmp.path().join("source.parquet");
    write_parquet(&DataSet::new(schema, rows), &source).unwrap();
    let base = tmp.path().join("work");
    let mut cfg = config_for(&source, 15, 2);
    cfg.fragment_order = FragmentOrder::TaskId;

    let summary = run_pipeline(&cfg, &base, &DataSetEngine::passthrough()).unwrap();

    let ds = read_parquet(summary.artifact_path()).unwrap();
    let types: Vec<DataType> = ds.schema.fields.iter().map(|f| f.data_type).collect();
    assert_eq!(types, vec![DataType::Float64, DataType::Utf8]);
    assert_eq!(ds.rows[2][0], Value::Float64(2.0));
    assert_eq!(ds.rows[8][1], Value::Utf8("0800".to_string()));
    assert_eq!(ds.rows[0][1], Value::Utf8("0000".to_string()));
}

#[test]
fn failed_item_fails_the_run_and_writes_no_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 1_000);
    let base = tmp.path().join("work");
    let cfg = config_for(&source, 250, 2);
    let inner = DataSetEngine::passthrough();
    let engine = move |input: &Path, task_id: &str, out: &Path| -> Result<(), TransformError> {
        if task_id == "1" || task_id == "3" {
            return Err(TransformError::Failed(format!("rejected {task_id}")));
        }
        inner.run(input, task_id, out)
    };

    let err = run_pipeline(&cfg, &base, &engine).unwrap_err();

    match err {
        PipelineError::DispatchFailed { failed_task_ids } => {
            assert_eq!(
                failed_task_ids,
                BTreeSet::from(["1".to_string(), "3".to_string()])
            );
        }
        other => panic!("expected DispatchFailed, got {other}"),
    }
    assert!(!base.join("output_dir").join("result.parquet").exists());
    assert!(dir_is_empty(&base.join("source_dir")));
    // Items that succeeded still left their fragments.
    assert!(base.join("task_results_dir").join("chunk_result_0.txt").is_file());
}

#[test]
fn previous_run_leftovers_are_cleared() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 300);
    let base = tmp.path().join("work");
    let stale_slice = base.join("chunks_dir").join("slice_9.parquet");
    let stale_fragment = base.join("task_results_dir").join("chunk_result_9.txt");
    fs::create_dir_all(stale_slice.parent().unwrap()).unwrap();
    fs::create_dir_all(stale_fragment.parent().unwrap()).unwrap();
    fs::write(&stale_slice, "old").unwrap();
    fs::write(&stale_fragment, "old").unwrap();

    let summary = run_pipeline(&config_for(&source, 100, 2), &base, &DataSetEngine::passthrough()).unwrap();

    assert_eq!(summary.slices, 3);
    assert_eq!(summary.assembly.rows, 300);
    assert!(!stale_slice.exists());
    assert!(!stale_fragment.exists());
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("work");
    let cfg = config_for(Path::new("missing.parquet"), 100, 0);

    let err = run_pipeline(&cfg, &base, &DataSetEngine::passthrough()).unwrap_err();

    assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    assert!(!base.exists());
}

#[test]
fn unreachable_source_stops_before_slicing() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("work");
    let cfg = config_for(&tmp.path().join("absent.parquet"), 100, 1);

    let err = run_pipeline(&cfg, &base, &DataSetEngine::passthrough()).unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert!(dir_is_empty(&base.join("chunks_dir")));
}

#[test]
fn empty_dataset_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 0);
    let cfg = config_for(&source, 100, 1);
    let data = fs::read(&source).unwrap();

    let err = run_pipeline_from(
        &cfg,
        &Source::Bytes(data.into()),
        &tmp.path().join("work"),
        &DataSetEngine::passthrough(),
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::EmptyDataset));
}

#[test]
fn engine_writing_only_empty_fragments_yields_no_valid_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), 50);
    let base = tmp.path().join("work");
    let empty = DataSetEngine::new("drop-all", |ds| Ok(ds.filter_rows(|_| false)));

    let err = run_pipeline(&config_for(&source, 20, 2), &base, &empty).unwrap_err();

    assert!(matches!(err, PipelineError::NoValidFragments { .. }));
    assert!(!base.join("output_dir").join("result.parquet").exists());
}

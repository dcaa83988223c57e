//! Store Tests
//!
//! End-to-end behaviour through the public `RrdStore` API:
//! - creation, existence checks and schema validation
//! - append semantics for every data source kind
//! - fetch table shape, archive selection and ring overwrite
//! - persistence across reopen
//! - fleet averaging

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use manifold_rrd::{
    AppendError, ArchiveSelector, ArchiveSpec, ConsolidationFn, CreateError, DataSourceKind,
    DataSourceSpec, DatabaseSpec, DatabaseState, FetchError, RrdStore, SchemaError,
};
use tempfile::TempDir;

fn store() -> RrdStore {
    RrdStore::builder().without_sync().build()
}

fn temp_spec() -> DatabaseSpec {
    DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("temp", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 10))
}

fn sample(name: &str, value: f64) -> HashMap<String, f64> {
    HashMap::from([(name.to_string(), value)])
}

fn avg() -> ArchiveSelector {
    ConsolidationFn::Average.into()
}

fn create(dir: &TempDir, name: &str, spec: &DatabaseSpec) -> (RrdStore, PathBuf) {
    let store = store();
    let path = dir.path().join(name);
    store.create_database(&path, spec).unwrap();
    (store, path)
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn test_create_then_fetch_is_unknown() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());

    let table = store.fetch_range(&path, avg(), 60, 300).unwrap();
    assert_eq!(table.step(), 60);
    assert_eq!(table.row_count(), 5);
    assert!(table.rows().all(|row| row.values[0].is_nan()));
    assert_eq!(store.last_update(&path).unwrap(), 0);
    assert_eq!(store.info(&path).unwrap().state, DatabaseState::Created);
}

#[test]
fn test_create_existing_path_is_reported() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());

    match store.create_database(&path, &temp_spec()) {
        Err(CreateError::AlreadyExists(existing)) => assert_eq!(existing, path),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[test]
fn test_invalid_schemas_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store();

    let cases = [
        (
            DatabaseSpec::new(60, 0).archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 10)),
            SchemaError::NoDataSources,
        ),
        (
            DatabaseSpec::new(60, 0).data_source(DataSourceSpec::gauge("temp", 120)),
            SchemaError::NoArchives,
        ),
        (
            temp_spec().data_source(DataSourceSpec::gauge("temp", 60)),
            SchemaError::DuplicateName("temp".to_string()),
        ),
        (
            temp_spec().archive(ArchiveSpec::new(ConsolidationFn::Max, 0, 10)),
            SchemaError::ZeroStepsPerRow(1),
        ),
        (
            temp_spec().archive(ArchiveSpec::new(ConsolidationFn::Max, 1, 0)),
            SchemaError::ZeroRowCount(1),
        ),
    ];

    for (i, (spec, expected)) in cases.into_iter().enumerate() {
        let path = dir.path().join(format!("bad{i}.rrd"));
        match store.create_database(&path, &spec) {
            Err(CreateError::InvalidSchema(err)) => assert_eq!(err, expected),
            other => panic!("case {i}: expected InvalidSchema, got {other:?}"),
        }
        assert!(!path.exists(), "case {i} left a file behind");
    }
}

#[test]
fn test_spec_loads_from_json() {
    let json = r#"{
        "step": 300,
        "start": 0,
        "data_sources": [
            {"name": "load", "kind": "GAUGE", "heartbeat": 600, "min": 0.0, "max": null},
            {"name": "octets", "kind": "COUNTER", "heartbeat": 600, "min": null, "max": null}
        ],
        "archives": [
            {"consolidation": "AVERAGE", "steps_per_row": 1, "row_count": 288, "xff": 0.5},
            {"consolidation": "MAX", "steps_per_row": 12, "row_count": 168, "xff": 0.5}
        ]
    }"#;
    let spec: DatabaseSpec = serde_json::from_str(json).unwrap();
    assert_eq!(spec.data_sources[1].kind, DataSourceKind::Counter);
    assert_eq!(spec.archives[1].consolidation, ConsolidationFn::Max);

    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "host.rrd", &spec);
    let info = store.info(&path).unwrap();
    assert_eq!(info.archives[1].row_step, 3600);
    assert_eq!(info.data_sources[0].spec.min, Some(0.0));
}

// ============================================================================
// Append
// ============================================================================

#[test]
fn test_temperature_example() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());

    for (t, v) in [(60, 10.0), (120, 20.0), (180, 30.0)] {
        let report = store.append_sample(&path, t, &sample("temp", v)).unwrap();
        assert_eq!(report.primary_steps, 1);
    }

    let table = store.fetch_range(&path, avg(), 60, 180).unwrap();
    let rows: Vec<(u64, f64)> = table
        .rows()
        .map(|row| (row.timestamp, row.values[0]))
        .collect();
    assert_eq!(rows, vec![(60, 10.0), (120, 20.0), (180, 30.0)]);
    assert_eq!(store.info(&path).unwrap().state, DatabaseState::Active);
}

#[test]
fn test_two_steps_per_row_example() {
    let dir = TempDir::new().unwrap();
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("temp", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 2, 10));
    let (store, path) = create(&dir, "temp.rrd", &spec);

    for (t, v) in [(60, 10.0), (120, 20.0), (180, 30.0), (240, 40.0)] {
        store.append_sample(&path, t, &sample("temp", v)).unwrap();
    }

    let table = store.fetch_range(&path, avg(), 120, 240).unwrap();
    assert_eq!(table.step(), 120);
    assert_eq!(table.timestamps(), vec![120, 240]);
    assert_eq!(table.column("temp"), Some(vec![15.0, 35.0]));
}

#[test]
fn test_out_of_order_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());
    store.append_sample(&path, 120, &sample("temp", 5.0)).unwrap();
    let before = store.fetch_range(&path, avg(), 60, 600).unwrap();

    for t in [120, 119, 60] {
        match store.append_sample(&path, t, &sample("temp", 99.0)) {
            Err(AppendError::OutOfOrder {
                timestamp,
                last_update,
            }) => {
                assert_eq!(timestamp, t);
                assert_eq!(last_update, 120);
            }
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
    }

    let after = store.fetch_range(&path, avg(), 60, 600).unwrap();
    assert_eq!(
        before.values_or(-1.0).column("temp"),
        after.values_or(-1.0).column("temp")
    );
    assert_eq!(store.last_update(&path).unwrap(), 120);
}

#[test]
fn test_heartbeat_gap_is_unknown() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());
    store.append_sample(&path, 60, &sample("temp", 1.0)).unwrap();
    store.append_sample(&path, 360, &sample("temp", 1.0)).unwrap();

    let table = store.fetch_range(&path, avg(), 60, 360).unwrap();
    let values = table.column("temp").unwrap();
    assert_eq!(values[0], 1.0);
    assert!(values[1..].iter().all(|v| v.is_nan()), "{values:?}");
}

#[test]
fn test_counter_wraparound_is_unknown() {
    let dir = TempDir::new().unwrap();
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::counter("octets", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 10));
    let (store, path) = create(&dir, "octets.rrd", &spec);

    store.append_sample(&path, 60, &sample("octets", 4_294_967_000.0)).unwrap();
    store.append_sample(&path, 120, &sample("octets", 4_294_967_290.0)).unwrap();
    store.append_sample(&path, 180, &sample("octets", 5.0)).unwrap();
    store.append_sample(&path, 240, &sample("octets", 65.0)).unwrap();

    let values = store
        .fetch_range(&path, avg(), 120, 240)
        .unwrap()
        .column("octets")
        .unwrap();
    assert!((values[0] - 290.0 / 60.0).abs() < 1e-9);
    assert!(values[1].is_nan());
    assert!((values[2] - 1.0).abs() < 1e-9);
}

#[test]
fn test_rate_kinds() {
    let dir = TempDir::new().unwrap();
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::new("derive", DataSourceKind::Derive, 120))
        .data_source(DataSourceSpec::new("absolute", DataSourceKind::Absolute, 120))
        .data_source(DataSourceSpec::gauge("bounded", 120).with_bounds(Some(0.0), Some(100.0)))
        .archive(ArchiveSpec::new(ConsolidationFn::Last, 1, 10));
    let (store, path) = create(&dir, "kinds.rrd", &spec);

    let first = HashMap::from([
        ("derive".to_string(), 600.0),
        ("absolute".to_string(), 120.0),
        ("bounded".to_string(), 50.0),
    ]);
    let second = HashMap::from([
        ("derive".to_string(), 0.0),
        ("absolute".to_string(), 60.0),
        ("bounded".to_string(), 150.0),
    ]);
    store.append_sample(&path, 60, &first).unwrap();
    store.append_sample(&path, 120, &second).unwrap();

    let table = store
        .fetch_range(&path, ConsolidationFn::Last.into(), 60, 120)
        .unwrap();
    // The first derive sample has no predecessor.
    assert!(table.column("derive").unwrap()[0].is_nan());
    assert_eq!(table.column("derive").unwrap()[1], -10.0);
    assert_eq!(table.column("absolute"), Some(vec![2.0, 1.0]));
    let bounded = table.column("bounded").unwrap();
    assert_eq!(bounded[0], 50.0);
    assert!(bounded[1].is_nan());
}

#[test]
fn test_unknown_names_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());

    let values = HashMap::from([("temp".to_string(), 7.0), ("pressure".to_string(), 1.0)]);
    let report = store.append_sample(&path, 60, &values).unwrap();
    assert_eq!(report.unknown_sources, vec!["pressure".to_string()]);

    let table = store.fetch_range(&path, avg(), 60, 60).unwrap();
    assert_eq!(table.column("temp"), Some(vec![7.0]));
}

// ============================================================================
// Fetch
// ============================================================================

#[test]
fn test_ring_overwrite_keeps_row_count_rows() {
    let dir = TempDir::new().unwrap();
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("temp", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 4));
    let (store, path) = create(&dir, "temp.rrd", &spec);

    for i in 1..=10u32 {
        store
            .append_sample(&path, u64::from(i) * 60, &sample("temp", f64::from(i)))
            .unwrap();
    }

    let info = store.info(&path).unwrap();
    assert_eq!(info.archives[0].first_row_time, 420);
    assert_eq!(info.archives[0].last_row_time, 600);

    let table = store.fetch_range(&path, avg(), 420, 600).unwrap();
    assert_eq!(table.column("temp"), Some(vec![7.0, 8.0, 9.0, 10.0]));

    assert!(matches!(
        store.fetch_range(&path, avg(), 360, 600),
        Err(FetchError::NoSuitableArchive { .. })
    ));
}

#[test]
fn test_rows_after_last_update_are_unknown() {
    let dir = TempDir::new().unwrap();
    let (store, path) = create(&dir, "temp.rrd", &temp_spec());
    store.append_sample(&path, 60, &sample("temp", 3.0)).unwrap();

    let table = store.fetch_range(&path, avg(), 60, 240).unwrap();
    assert_eq!(table.row_count(), 4);
    assert_eq!(table.values_or(0.0).column("temp"), Some(vec![3.0, 0.0, 0.0, 0.0]));
}

#[test]
fn test_resolution_picks_coarser_archive() {
    let dir = TempDir::new().unwrap();
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("temp", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 100))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 5, 100))
        .archive(ArchiveSpec::new(ConsolidationFn::Max, 5, 100));
    let (store, path) = create(&dir, "temp.rrd", &spec);
    for i in 1..=10u32 {
        store
            .append_sample(&path, u64::from(i) * 60, &sample("temp", f64::from(i)))
            .unwrap();
    }

    let fine = store.fetch_range(&path, avg(), 0, 600).unwrap();
    assert_eq!(fine.step(), 60);

    let coarse = store
        .fetch_range(&path, avg().with_resolution(300), 0, 600)
        .unwrap();
    assert_eq!(coarse.step(), 300);
    assert_eq!(coarse.timestamps(), vec![0, 300, 600]);
    assert_eq!(coarse.column("temp").unwrap()[1..], [3.0, 8.0]);

    let max = store
        .fetch_range(&path, ConsolidationFn::Max.into(), 300, 600)
        .unwrap();
    assert_eq!(max.column("temp"), Some(vec![5.0, 10.0]));

    assert!(matches!(
        store.fetch_range(&path, ConsolidationFn::Min.into(), 0, 600),
        Err(FetchError::NoSuitableArchive { .. })
    ));
    assert!(matches!(
        store.fetch_range(&path, avg(), 600, 0),
        Err(FetchError::InvalidRange { .. })
    ));
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_reopen_gives_identical_results() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("temp.rrd");
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("temp", 120))
        .data_source(DataSourceSpec::counter("octets", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 20))
        .archive(ArchiveSpec::new(ConsolidationFn::Max, 3, 5));

    let expected = {
        let store = store();
        store.create_database(&path, &spec).unwrap();
        for i in 1..=25u32 {
            let t = u64::from(i) * 60 - u64::from(i % 3) * 10;
            let values = HashMap::from([
                ("temp".to_string(), f64::from(i)),
                ("octets".to_string(), f64::from(i * i * 60)),
            ]);
            store.append_sample(&path, t, &values).unwrap();
        }
        (
            store.fetch_range(&path, avg(), 600, 1440).unwrap(),
            store
                .fetch_range(&path, ConsolidationFn::Max.into(), 900, 1440)
                .unwrap(),
        )
    };

    let reopened = store();
    let actual = (
        reopened.fetch_range(&path, avg(), 600, 1440).unwrap(),
        reopened
            .fetch_range(&path, ConsolidationFn::Max.into(), 900, 1440)
            .unwrap(),
    );
    assert_eq!(expected.0.values_or(-1.0), actual.0.values_or(-1.0));
    assert_eq!(expected.1.values_or(-1.0), actual.1.values_or(-1.0));
    assert_eq!(reopened.last_update(&path).unwrap(), 1490);
}

#[test]
fn test_ensure_database_creates_directories_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hosts/web1/temp.rrd");
    let store = store();

    assert!(store.ensure_database(&path, &temp_spec()).unwrap());
    store.append_sample(&path, 60, &sample("temp", 2.0)).unwrap();
    assert!(!store.ensure_database(&path, &temp_spec()).unwrap());
    assert_eq!(store.last_update(&path).unwrap(), 60);
}

// ============================================================================
// Fleet
// ============================================================================

fn host(store: &RrdStore, dir: &Path, name: &str, values: &[f64]) -> PathBuf {
    let path = dir.join(name);
    store.create_database(&path, &temp_spec()).unwrap();
    for (i, v) in values.iter().enumerate() {
        store
            .append_sample(&path, (i as u64 + 1) * 60, &sample("temp", *v))
            .unwrap();
    }
    path
}

#[test]
fn test_fleet_average() {
    let dir = TempDir::new().unwrap();
    let store = store();
    let a = host(&store, dir.path(), "a.rrd", &[1.0, 2.0, 3.0]);
    let b = host(&store, dir.path(), "b.rrd", &[3.0, 4.0, 5.0]);
    let c = host(&store, dir.path(), "c.rrd", &[5.0, f64::NAN, 7.0]);

    let table = store
        .fetch_fleet_average(&[&a, &b, &c], avg(), 60, 180)
        .unwrap();
    let values = table.column("temp").unwrap();
    assert_eq!(table.timestamps(), vec![60, 120, 180]);
    assert_eq!(values[0], 3.0);
    assert!(values[1].is_nan());
    assert_eq!(values[2], 5.0);

    let pair = store.fetch_fleet_average(&[a, b], avg(), 60, 180).unwrap();
    assert_eq!(pair.column("temp"), Some(vec![2.0, 3.0, 4.0]));
}

#[test]
fn test_fleet_errors() {
    let dir = TempDir::new().unwrap();
    let store = store();
    let a = host(&store, dir.path(), "a.rrd", &[1.0]);

    let other = dir.path().join("other.rrd");
    let spec = DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("load", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 10));
    store.create_database(&other, &spec).unwrap();

    assert!(matches!(
        store.fetch_fleet_average(&[&a, &other], avg(), 60, 120),
        Err(FetchError::SchemaMismatch(_))
    ));
    assert!(matches!(
        store.fetch_fleet_average(&[a, dir.path().join("missing.rrd")], avg(), 60, 120),
        Err(FetchError::Io(_))
    ));
    let none: &[PathBuf] = &[];
    assert!(matches!(
        store.fetch_fleet_average(none, avg(), 60, 120),
        Err(FetchError::EmptyFleet)
    ));
}

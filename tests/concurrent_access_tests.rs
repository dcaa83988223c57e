//! Concurrent Access Tests
//!
//! Validates the one-writer/many-readers discipline:
//! - readers running during a writer never see a half-applied sample
//! - competing writers are serialized and out-of-order losers are rejected
//! - `try_append` never waits for the lock
//! - independent databases make progress in parallel

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use manifold_rrd::{
    AppendError, ArchiveSpec, ConsolidationFn, DataSourceSpec, DatabaseSpec, RrdStore,
};
use tempfile::TempDir;

fn spec() -> DatabaseSpec {
    DatabaseSpec::new(60, 0)
        .data_source(DataSourceSpec::gauge("a", 120))
        .data_source(DataSourceSpec::gauge("b", 120))
        .archive(ArchiveSpec::new(ConsolidationFn::Last, 1, 1000))
}

fn store() -> Arc<RrdStore> {
    Arc::new(RrdStore::builder().without_sync().build())
}

/// Readers fetch while a writer appends; every committed row must carry the
/// same value in both columns, and `last_update` must only move forward.
#[test]
fn test_readers_during_writer() {
    let dir = TempDir::new().unwrap();
    let path = Arc::new(dir.path().join("shared.rrd"));
    let store = store();
    store.create_database(path.as_path(), &spec()).unwrap();

    let samples = 500u64;
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(5));

    let writer = {
        let (store, path, done, barrier) = (store.clone(), path.clone(), done.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            for i in 1..=samples {
                let value = i as f64;
                let values = HashMap::from([("a".to_string(), value), ("b".to_string(), value)]);
                store.append_sample(path.as_path(), i * 60, &values).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let (store, path, done, barrier) = (store.clone(), path.clone(), done.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                let mut last_seen = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let last_update = store.last_update(path.as_path()).unwrap();
                    assert!(last_update >= last_seen);
                    last_seen = last_update;

                    let table = store
                        .fetch_range(path.as_path(), ConsolidationFn::Last.into(), 60, samples * 60)
                        .unwrap();
                    for row in table.rows() {
                        let (a, b) = (row.values[0], row.values[1]);
                        assert!(
                            (a.is_nan() && b.is_nan()) || a == b,
                            "torn row at {}: {a} vs {b}",
                            row.timestamp
                        );
                    }
                    if finished {
                        break;
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.last_update(path.as_path()).unwrap(), samples * 60);
}

/// Many threads race to append increasing timestamps from a shared clock.
/// Exactly one append per timestamp wins; the rest are rejected as out of order.
#[test]
fn test_competing_writers_are_serialized() {
    let dir = TempDir::new().unwrap();
    let path = Arc::new(dir.path().join("contended.rrd"));
    let store = store();
    store.create_database(path.as_path(), &spec()).unwrap();

    let clock = Arc::new(AtomicU64::new(0));
    let accepted = Arc::new(AtomicU64::new(0));
    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let (store, path, clock, accepted, barrier) = (
                store.clone(),
                path.clone(),
                clock.clone(),
                accepted.clone(),
                barrier.clone(),
            );
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let t = (clock.fetch_add(1, Ordering::SeqCst) + 1) * 30;
                    let values = HashMap::from([("a".to_string(), 1.0)]);
                    match store.append_sample(path.as_path(), t, &values) {
                        Ok(_) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(AppendError::OutOfOrder { timestamp, last_update }) => {
                            assert!(timestamp <= last_update);
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let info = store.info(path.as_path()).unwrap();
    assert_eq!(info.update_count, accepted.load(Ordering::SeqCst));
    assert!(info.update_count > 0);
    assert!(info.last_update <= 8 * 50 * 30);
}

/// `try_append` never waits: each call either applies, is rejected as out of
/// order, or reports `Busy`, and the database stays usable afterwards.
#[test]
fn test_try_append_never_blocks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("busy.rrd");
    let store = store();
    store.create_database(&path, &spec()).unwrap();
    let file = store.open(&path).unwrap();

    let applied = AtomicU64::new(0);
    let barrier = Barrier::new(4);
    thread::scope(|scope| {
        for thread_id in 0..4u64 {
            let (file, applied, barrier) = (&file, &applied, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for i in 0..100u64 {
                    let values = HashMap::from([("a".to_string(), 1.0)]);
                    match file.try_append((i * 4 + thread_id + 1) * 15, &values) {
                        Ok(_) => {
                            applied.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(AppendError::Busy | AppendError::OutOfOrder { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
    });

    let info = file.info();
    assert_eq!(info.update_count, applied.load(Ordering::SeqCst));
    assert!(info.update_count > 0);

    let values = HashMap::from([("a".to_string(), 1.0)]);
    file.append(10_000, &values).unwrap();
    assert_eq!(file.last_update(), 10_000);
}

/// Appends to different databases proceed in parallel without interference.
#[test]
fn test_independent_databases() {
    let dir = TempDir::new().unwrap();
    let store = store();
    let paths: Vec<_> = (0..6)
        .map(|i| {
            let path = dir.path().join(format!("host{i}/load.rrd"));
            store.create_database(&path, &spec()).unwrap();
            path
        })
        .collect();

    thread::scope(|scope| {
        for (i, path) in paths.iter().enumerate() {
            let store = &store;
            scope.spawn(move || {
                for t in 1..=100u64 {
                    let value = (i * 1000) as f64 + t as f64;
                    let values = HashMap::from([("a".to_string(), value), ("b".to_string(), value)]);
                    store.append_sample(path, t * 60, &values).unwrap();
                }
            });
        }
    });

    for (i, path) in paths.iter().enumerate() {
        let table = store
            .fetch_range(path, ConsolidationFn::Last.into(), 6000, 6000)
            .unwrap();
        assert_eq!(table.column("a"), Some(vec![(i * 1000) as f64 + 100.0]));
    }
    assert_eq!(store.open_count(), paths.len());
}

/// A small pool still routes every append for a path through one handle.
#[test]
fn test_small_pool_under_contention() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RrdStore::builder().pool_size(1).without_sync().build());
    let paths: Vec<_> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("{i}.rrd"));
            store.create_database(&path, &spec()).unwrap();
            path
        })
        .collect();

    thread::scope(|scope| {
        for path in &paths {
            let store = &store;
            scope.spawn(move || {
                for t in 1..=50u64 {
                    let values = HashMap::from([("a".to_string(), t as f64)]);
                    store.append_sample(path, t * 60, &values).unwrap();
                }
            });
        }
    });

    for path in &paths {
        assert_eq!(store.last_update(path).unwrap(), 3000);
        assert_eq!(store.info(path).unwrap().update_count, 50);
    }
}

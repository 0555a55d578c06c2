//! Integration tests for durable storages.
//!
//! These tests cover what only a table-backed storage can get wrong:
//! absent values on disk, restarts, ring head recovery and schema drift.

use std::sync::Arc;

use meterstore::db::Database;
use meterstore::item::DataItem;
use meterstore::storage::{
    CircularMemStorage, CircularPersistentStorage, LinearMemStorage, LinearPersistentStorage,
    TimedStorage,
};
use tempfile::tempdir;

fn names(signals: &[&str]) -> Vec<String> {
    signals.iter().map(|s| (*s).to_string()).collect()
}

/// Sample with `A = t` and `B` present on even seconds only.
fn sample(storage: &dyn TimedStorage, i: u32) -> DataItem {
    let t = 1_700_000_000.0 + f64::from(i);
    let mut item = DataItem::new(storage.spec(), Some(t));
    item.set_value("A", f64::from(i)).unwrap();
    if i % 2 == 0 {
        item.set_value("B", f64::from(i) * 0.5).unwrap();
    }
    item
}

#[test]
fn test_absent_value_serializes_as_null() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let storage = LinearPersistentStorage::open(db.open_table("p", &names(&["A", "B"])).unwrap())
        .unwrap();

    let mut item = DataItem::new(storage.spec(), Some(1_700_000_000.0));
    item.set_value("A", 2.5).unwrap();
    storage.add_data_item(&item).unwrap();

    let serialized = storage.serialize(None).unwrap();
    assert_eq!(serialized.values("B").unwrap(), &[None]);

    let json = serde_json::to_value(&serialized).unwrap();
    assert_eq!(json["B"][0], serde_json::Value::Null);
    assert_eq!(json["A"][0], 2.5);

    let read = storage.get_data_item(0).unwrap().unwrap();
    assert_eq!(read.get_value("B").unwrap(), None);
}

#[test]
fn test_memory_and_durable_serialize_identically() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let signals = names(&["A", "B"]);

    let circular_mem = CircularMemStorage::new(6, &signals).unwrap();
    let circular_disk =
        CircularPersistentStorage::open(6, db.open_table("ring", &signals).unwrap()).unwrap();
    let linear_mem = LinearMemStorage::new(&signals).unwrap();
    let linear_disk = LinearPersistentStorage::open(db.open_table("log", &signals).unwrap()).unwrap();

    for i in 0..15u32 {
        circular_mem.add_data_item(&sample(&circular_mem, i)).unwrap();
        circular_disk.add_data_item(&sample(&circular_disk, i)).unwrap();
        linear_mem.add_data_item(&sample(&linear_mem, i)).unwrap();
        linear_disk.add_data_item(&sample(&linear_disk, i)).unwrap();
    }

    assert_eq!(
        circular_mem.serialize(None).unwrap(),
        circular_disk.serialize(None).unwrap()
    );
    assert_eq!(
        linear_mem.serialize(None).unwrap(),
        linear_disk.serialize(None).unwrap()
    );

    let selection = names(&["B"]);
    assert_eq!(
        circular_mem.serialize(Some(&selection)).unwrap(),
        circular_disk.serialize(Some(&selection)).unwrap()
    );
}

#[test]
fn test_circular_resumes_after_reopen() {
    let dir = tempdir().unwrap();
    let signals = names(&["A", "B"]);

    {
        let db = Database::open(dir.path()).unwrap();
        let storage =
            CircularPersistentStorage::open(5, db.open_table("ring", &signals).unwrap()).unwrap();
        for i in 0..8u32 {
            storage.add_data_item(&sample(&storage, i)).unwrap();
        }
        storage.sync().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let storage =
        CircularPersistentStorage::open(5, db.open_table("ring", &signals).unwrap()).unwrap();
    assert_eq!(storage.length(), 5);
    assert_eq!(storage.min_time_index(), 3);

    // Next write overwrites the oldest (i = 3) in place.
    storage.add_data_item(&sample(&storage, 8)).unwrap();
    let values: Vec<Option<f64>> = storage
        .serialize(Some(&names(&["A"])))
        .unwrap()
        .values("A")
        .unwrap()
        .to_vec();
    assert_eq!(
        values,
        vec![Some(4.0), Some(5.0), Some(6.0), Some(7.0), Some(8.0)]
    );
}

#[test]
fn test_circular_reopen_with_larger_capacity() {
    let dir = tempdir().unwrap();
    let signals = names(&["A", "B"]);

    {
        let db = Database::open(dir.path()).unwrap();
        let storage =
            CircularPersistentStorage::open(5, db.open_table("ring", &signals).unwrap()).unwrap();
        for i in 0..8u32 {
            storage.add_data_item(&sample(&storage, i)).unwrap();
        }
    }

    let db = Database::open(dir.path()).unwrap();
    let storage =
        CircularPersistentStorage::open(10, db.open_table("ring", &signals).unwrap()).unwrap();

    let t = |i: u32| 1_700_000_000.0 + f64::from(i);
    let serialized = storage.serialize(None).unwrap();
    assert_eq!(serialized.timestamp, (3..8).map(t).collect::<Vec<_>>());
    assert_eq!(
        serialized.values("A").unwrap(),
        &[Some(3.0), Some(4.0), Some(5.0), Some(6.0), Some(7.0)]
    );
    assert_eq!(
        serialized.values("B").unwrap(),
        &[None, Some(2.0), None, Some(3.0), None]
    );

    let range = storage.timestamp_range().unwrap().unwrap();
    assert_eq!((range.first, range.last), (t(3), t(7)));
    let found = storage.index_from_time(t(6)).unwrap().unwrap();
    assert_eq!(storage.get_data_item(found).unwrap().unwrap().timestamp(), Some(t(6)));

    // The ring keeps filling up to its new capacity, then evicts in order.
    for i in 8..15u32 {
        storage.add_data_item(&sample(&storage, i)).unwrap();
    }
    assert_eq!(storage.length(), 10);
    let serialized = storage.serialize(None).unwrap();
    assert_eq!(serialized.timestamp, (5..15).map(t).collect::<Vec<_>>());
}

#[test]
fn test_linear_reopen_keeps_appending() {
    let dir = tempdir().unwrap();
    let signals = names(&["A", "B"]);

    {
        let db = Database::open(dir.path()).unwrap();
        let storage = LinearPersistentStorage::open(db.open_table("log", &signals).unwrap()).unwrap();
        for i in 0..100u32 {
            storage.add_data_item(&sample(&storage, i)).unwrap();
        }
    }

    let db = Database::open(dir.path()).unwrap();
    let storage = LinearPersistentStorage::open(db.open_table("log", &signals).unwrap()).unwrap();
    storage.add_data_item(&sample(&storage, 100)).unwrap();

    assert_eq!(storage.length(), 101);
    let range = storage.timestamp_range().unwrap().unwrap();
    assert_eq!(range.first, 1_700_000_000.0);
    assert_eq!(range.last, 1_700_000_100.0);

    let middle = storage.index_from_time(1_700_000_050.4).unwrap().unwrap();
    assert_eq!(middle, 50);
}

#[test]
fn test_schema_drift_is_tolerated() {
    let dir = tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let storage =
            LinearPersistentStorage::open(db.open_table("log", &names(&["A", "B"])).unwrap())
                .unwrap();
        for i in 0..4u32 {
            storage.add_data_item(&sample(&storage, i)).unwrap();
        }
    }

    // Configuration gained C and dropped B since the table was created.
    let db = Database::open(dir.path()).unwrap();
    let storage =
        LinearPersistentStorage::open(db.open_table("log", &names(&["A", "C"])).unwrap()).unwrap();

    assert_eq!(storage.length(), 4);
    let serialized = storage.serialize(None).unwrap();
    assert_eq!(
        serialized.values("A").unwrap(),
        &[Some(0.0), Some(1.0), Some(2.0), Some(3.0)]
    );
    assert_eq!(serialized.values("C").unwrap(), &[None, None, None, None]);

    let mut item = DataItem::new(storage.spec(), Some(1_700_000_010.0));
    item.set_value("A", 10.0).unwrap();
    item.set_value("C", 1.0).unwrap();
    storage.add_data_item(&item).unwrap();

    let last = storage.last_item().unwrap().unwrap();
    assert_eq!(last.get_value("A").unwrap(), Some(10.0));
    assert_eq!(last.get_value("C").unwrap(), None);
}

#[test]
fn test_reader_thread_during_ingest() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let storage = Arc::new(
        CircularPersistentStorage::open(32, db.open_table("ring", &names(&["A", "B"])).unwrap())
            .unwrap(),
    );

    let writer = Arc::clone(&storage);
    let ingest = std::thread::spawn(move || {
        for i in 0..1000u32 {
            writer.add_data_item(&sample(writer.as_ref(), i)).unwrap();
        }
    });

    for _ in 0..100 {
        if let Some(range) = storage.timestamp_range().unwrap() {
            let average = storage
                .average(range.first, range.last, &names(&["A"]), None)
                .unwrap();
            assert!(average.get_value("A").unwrap().is_some());

            let serialized = storage.serialize(Some(&names(&["A"]))).unwrap();
            assert!(serialized.timestamp.windows(2).all(|w| w[0] < w[1]));
        }
    }
    ingest.join().unwrap();

    assert_eq!(storage.length(), 32);
    assert_eq!(storage.last_time().unwrap(), Some(1_700_000_999.0));
}

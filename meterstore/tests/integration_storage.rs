//! Integration tests for time-ordered storages.
//!
//! Every behavior here is checked against all four ordering × backing
//! combinations where it applies, since callers must not be able to tell
//! them apart.

use std::sync::Arc;

use meterstore::db::Database;
use meterstore::error::{MeterStoreError, SpecError, StorageError};
use meterstore::item::DataItem;
use meterstore::spec::DataItemSpec;
use meterstore::storage::{
    CircularMemStorage, CircularPersistentStorage, LinearMemStorage, LinearPersistentStorage,
    TimedStorage,
};
use meterstore::ShiftSpec;
use tempfile::{TempDir, tempdir};

const EPS: f64 = 1e-9;

fn names(signals: &[&str]) -> Vec<String> {
    signals.iter().map(|s| (*s).to_string()).collect()
}

/// A storage plus the directory keeping its table alive.
struct Fixture {
    storage: Box<dyn TimedStorage>,
    _dir: Option<TempDir>,
}

fn circular_fixtures(capacity: usize, signals: &[&str]) -> Vec<(&'static str, Fixture)> {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let table = db.open_table("ring", &names(signals)).unwrap();

    vec![
        (
            "circular/mem",
            Fixture {
                storage: Box::new(CircularMemStorage::new(capacity, signals).unwrap()),
                _dir: None,
            },
        ),
        (
            "circular/persistent",
            Fixture {
                storage: Box::new(CircularPersistentStorage::open(capacity, table).unwrap()),
                _dir: Some(dir),
            },
        ),
    ]
}

fn linear_fixtures(signals: &[&str]) -> Vec<(&'static str, Fixture)> {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let table = db.open_table("linear", &names(signals)).unwrap();

    vec![
        (
            "linear/mem",
            Fixture {
                storage: Box::new(LinearMemStorage::new(signals).unwrap()),
                _dir: None,
            },
        ),
        (
            "linear/persistent",
            Fixture {
                storage: Box::new(LinearPersistentStorage::open(table).unwrap()),
                _dir: Some(dir),
            },
        ),
    ]
}

/// Adds `count` samples one second apart with `A = index`.
fn fill(storage: &dyn TimedStorage, count: u32) {
    let spec = storage.spec();
    for i in 0..count {
        let t = f64::from(i);
        let mut item = DataItem::new(Arc::clone(&spec), Some(t));
        item.set_value("A", t).unwrap();
        storage.add_data_item(&item).unwrap();
    }
}

fn stored_a(storage: &dyn TimedStorage) -> Vec<Option<f64>> {
    storage
        .serialize(Some(&names(&["A"])))
        .unwrap()
        .values("A")
        .unwrap()
        .to_vec()
}

#[test]
fn test_circular_keeps_last_n_items() {
    for (label, fixture) in circular_fixtures(10, &["A"]) {
        let storage = fixture.storage.as_ref();
        fill(storage, 13);

        assert_eq!(storage.length(), 10, "{label}");
        let expected: Vec<Option<f64>> = (3..13).map(|v| Some(f64::from(v))).collect();
        assert_eq!(stored_a(storage), expected, "{label}");

        // The oldest item sits where the next write lands.
        assert_eq!(storage.min_time_index(), 3, "{label}");
        let last = storage.last_index(0).unwrap();
        let newest = storage.get_data_item(last).unwrap().unwrap();
        assert_eq!(newest.get_value("A").unwrap(), Some(12.0), "{label}");
    }
}

#[test]
fn test_circular_partial_fill() {
    for (label, fixture) in circular_fixtures(10, &["A"]) {
        let storage = fixture.storage.as_ref();
        fill(storage, 6);

        assert_eq!(storage.length(), 6, "{label}");
        assert_eq!(storage.min_time_index(), 0, "{label}");
        assert_eq!(storage.last_index(0), Some(5), "{label}");
        assert_eq!(storage.last_index(6), None, "{label}");
    }
}

#[test]
fn test_index_from_time_between_samples() {
    for (label, fixture) in circular_fixtures(10, &["A"]) {
        let storage = fixture.storage.as_ref();
        fill(storage, 13);

        let index = storage.index_from_time(4.5).unwrap().unwrap();
        let found = storage.get_data_item(index).unwrap().unwrap();
        let t = found.timestamp().unwrap();
        assert!(t == 4.0 || t == 5.0, "{label}: got {t}");
        // Equidistant: the earlier item wins.
        assert_eq!(t, 4.0, "{label}");
    }
}

#[test]
fn test_index_from_time_is_nearest_everywhere() {
    let mut fixtures = circular_fixtures(7, &["A"]);
    fixtures.extend(linear_fixtures(&["A"]));

    for (label, fixture) in fixtures {
        let storage = fixture.storage.as_ref();
        // Irregular spacing: t = i * i / 4.
        let spec = storage.spec();
        let mut times = Vec::new();
        for i in 0..11u32 {
            let t = f64::from(i * i) / 4.0;
            times.push(t);
            let mut item = DataItem::new(Arc::clone(&spec), Some(t));
            item.set_value("A", t).unwrap();
            storage.add_data_item(&item).unwrap();
        }
        let kept = &times[times.len() - storage.length()..];

        for step in 0..130u32 {
            let query = f64::from(step) * 0.25 - 1.0;
            let index = storage.index_from_time(query).unwrap().unwrap();
            let found = storage
                .get_data_item(index)
                .unwrap()
                .unwrap()
                .timestamp()
                .unwrap();

            let best = kept.iter().copied().fold(f64::INFINITY, |best, t| {
                if (t - query).abs() < (best - query).abs() { t } else { best }
            });
            assert_eq!(found, best, "{label}: query {query}");
        }
    }
}

#[test]
fn test_average_full_window() {
    for (label, fixture) in circular_fixtures(10, &["A"]) {
        let storage = fixture.storage.as_ref();
        fill(storage, 13);

        let range = storage.timestamp_range().unwrap().unwrap();
        let average = storage
            .average(range.first, range.last, &names(&["A"]), None)
            .unwrap();
        let value = average.get_value("A").unwrap().unwrap();
        assert!((value - 7.5).abs() < EPS, "{label}: {value}");
    }
}

#[test]
fn test_average_with_fractional_shift() {
    for (label, fixture) in circular_fixtures(10, &["A"]) {
        let storage = fixture.storage.as_ref();
        fill(storage, 13);

        let shift = ShiftSpec::new("A", 1.5).unwrap();
        let average = storage
            .average(3.0, 12.0, &names(&["A"]), Some(&shift))
            .unwrap();

        // Interpolated reads (1 - 0.5) * v[i + 1] + 0.5 * v[i + 2] that stay
        // inside [1, len - 2] of the physical layout [10, 11, 12, 3, ..., 9].
        let expected = (4.5 + 5.5 + 6.5 + 7.5 + 11.5 + 7.5 + 3.5) / 7.0;
        let value = average.get_value("A").unwrap().unwrap();
        assert!((value - expected).abs() < EPS, "{label}: {value}");
    }
}

#[test]
fn test_average_sparse_signals() {
    let mut fixtures = circular_fixtures(20, &["A", "B"]);
    fixtures.extend(linear_fixtures(&["A", "B"]));

    for (label, fixture) in fixtures {
        let storage = fixture.storage.as_ref();
        let spec = storage.spec();
        for i in 0..10u32 {
            let t = f64::from(i);
            let mut item = DataItem::new(Arc::clone(&spec), Some(t));
            item.set_value("A", t).unwrap();
            if i % 3 == 0 {
                item.set_value("B", 100.0 + t).unwrap();
            }
            storage.add_data_item(&item).unwrap();
        }

        let average = storage
            .average(2.0, 7.0, &names(&["A", "B"]), None)
            .unwrap();
        assert_eq!(average.timestamp(), Some(4.5), "{label}");
        assert_eq!(average.get_value("A").unwrap(), Some(4.5), "{label}");
        // B present at t = 3 and t = 6 only.
        assert_eq!(average.get_value("B").unwrap(), Some(104.5), "{label}");
    }
}

#[test]
fn test_unit_consistency_across_variants() {
    let mut fixtures = circular_fixtures(4, &["X"]);
    fixtures.extend(linear_fixtures(&["X"]));

    for (label, fixture) in fixtures {
        let storage = fixture.storage.as_ref();

        let kwh = Arc::new(DataItemSpec::with_units([("X", Some("kWh"))]).unwrap());
        let mut item = DataItem::new(kwh, Some(1.0));
        item.set_value("X", 1.0).unwrap();
        storage.add_data_item(&item).unwrap();
        assert_eq!(storage.spec().unit("X").unwrap(), Some("kWh"), "{label}");

        let wh = Arc::new(DataItemSpec::with_units([("X", Some("Wh"))]).unwrap());
        let mut item = DataItem::new(wh, Some(2.0));
        item.set_value("X", 1000.0).unwrap();
        assert!(
            matches!(
                storage.add_data_item(&item),
                Err(MeterStoreError::Spec(SpecError::UnitConflict { .. }))
            ),
            "{label}"
        );
        assert_eq!(storage.length(), 1, "{label}");

        let average = storage.average(0.0, 2.0, &names(&["X"]), None).unwrap();
        assert_eq!(average.value_and_unit("X").unwrap(), "1 kWh", "{label}");
    }
}

#[test]
fn test_last_item_and_dump() {
    let mut fixtures = circular_fixtures(5, &["A"]);
    fixtures.extend(linear_fixtures(&["A"]));

    for (label, fixture) in fixtures {
        let storage = fixture.storage.as_ref();
        fill(storage, 8);

        let last = storage.last_item().unwrap().unwrap();
        assert_eq!(last.timestamp(), Some(7.0), "{label}");
        assert_eq!(storage.last_time().unwrap(), Some(7.0), "{label}");

        let lines = storage.dump().unwrap();
        assert_eq!(lines[0], format!("{} items", storage.length()), "{label}");
        assert_eq!(lines.len(), 4 + storage.length(), "{label}");
        assert!(lines.last().unwrap().contains("T = 7.000"), "{label}");
    }
}

#[test]
fn test_non_finite_input_behaves_alike() {
    let mut fixtures = circular_fixtures(8, &["A", "B"]);
    fixtures.extend(linear_fixtures(&["A", "B"]));

    for (label, fixture) in fixtures {
        let storage = fixture.storage.as_ref();
        let spec = storage.spec();
        for i in 0..4u32 {
            let t = f64::from(i);
            let mut item = DataItem::new(Arc::clone(&spec), Some(t));
            item.set_value("A", t).unwrap();
            item.set_value("B", if i == 2 { f64::NAN } else { 10.0 }).unwrap();
            storage.add_data_item(&item).unwrap();
        }

        let mut bad = DataItem::new(Arc::clone(&spec), Some(f64::NAN));
        bad.set_value("A", 1.0).unwrap();
        assert!(
            matches!(
                storage.add_data_item(&bad),
                Err(MeterStoreError::Storage(StorageError::NonFiniteTimestamp { .. }))
            ),
            "{label}"
        );
        assert_eq!(storage.length(), 4, "{label}");

        let serialized = storage.serialize(None).unwrap();
        assert_eq!(serialized.timestamp, vec![0.0, 1.0, 2.0, 3.0], "{label}");
        assert_eq!(
            serialized.values("B").unwrap(),
            &[Some(10.0), Some(10.0), None, Some(10.0)],
            "{label}"
        );

        let average = storage.average(0.0, 3.0, &names(&["B"]), None).unwrap();
        assert_eq!(average.get_value("B").unwrap(), Some(10.0), "{label}");
        assert!(storage.timestamp_range().unwrap().is_some(), "{label}");
    }
}

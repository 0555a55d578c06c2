//! Time-ordered storages: an ordering policy composed with a backing policy.
//!
//! [`Storage<O, B>`] holds one [`Ordering`] and one [`Backing`] and
//! delegates to them; neither policy knows about the other beyond the
//! [`Backing`] contract. The four combinations are exposed as aliases:
//!
//! | Alias                         | Ordering     | Backing               |
//! |-------------------------------|--------------|-----------------------|
//! | [`CircularMemStorage`]        | [`Circular`] | [`MemBacking`]        |
//! | [`LinearMemStorage`]          | [`Linear`]   | [`MemBacking`]        |
//! | [`CircularPersistentStorage`] | [`Circular`] | [`PersistentBacking`] |
//! | [`LinearPersistentStorage`]   | [`Linear`]   | [`PersistentBacking`] |
//!
//! Callers that pick the combination at runtime use the object-safe
//! [`TimedStorage`] trait.
//!
//! # Concurrency
//!
//! The spec, the ordering state and the backing sit behind one read-write
//! lock. [`TimedStorage::add_data_item`] holds the write lock for its whole
//! duration; every read operation holds the read lock for its whole
//! duration. A reader therefore never sees a head that disagrees with the
//! stored items.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use meterstore::item::DataItem;
//! use meterstore::storage::{CircularMemStorage, TimedStorage};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = CircularMemStorage::new(3, ["current_usage"])?;
//! for i in 0..5u32 {
//!     let mut item = DataItem::new(storage.spec(), Some(f64::from(i)));
//!     item.set_value("current_usage", f64::from(i) * 0.1)?;
//!     storage.add_data_item(&item)?;
//! }
//!
//! assert_eq!(storage.length(), 3);
//! let range = storage.timestamp_range()?.unwrap();
//! assert_eq!((range.first, range.last), (2.0, 4.0));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::aggregate::{self, ShiftSpec};
use crate::backing::{Backing, MemBacking, PersistentBacking};
use crate::db::Table;
use crate::error::{Result, StorageError};
use crate::item::DataItem;
use crate::ordering::{Circular, Linear, Ordering, TimedIndexes};
use crate::query::{Serialized, TimeRange};
use crate::spec::DataItemSpec;

/// Ring buffer held in memory.
pub type CircularMemStorage = Storage<Circular, MemBacking>;

/// Unbounded buffer held in memory.
pub type LinearMemStorage = Storage<Linear, MemBacking>;

/// Ring buffer over a durable table.
pub type CircularPersistentStorage = Storage<Circular, PersistentBacking>;

/// Unbounded buffer over a durable table.
pub type LinearPersistentStorage = Storage<Linear, PersistentBacking>;

/// Time-ordered collection of items sharing one spec.
///
/// All methods take `&self`; a storage can be shared between an ingest
/// thread and query threads.
pub trait TimedStorage: fmt::Debug + Send + Sync {
    /// Returns a snapshot of the storage spec.
    fn spec(&self) -> Arc<DataItemSpec>;

    /// Number of stored items.
    fn length(&self) -> usize;

    /// Physical index of the oldest item.
    fn min_time_index(&self) -> usize;

    /// Physical index of the item `offset` positions before the newest.
    fn last_index(&self, offset: usize) -> Option<usize>;

    /// Reads the item at a physical index, `None` if out of range.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn get_data_item(&self, index: usize) -> Result<Option<DataItem>>;

    /// Stores a sample, evicting the oldest one from a full ring.
    ///
    /// Units asserted by the sample's spec are reconciled with the storage
    /// spec first. Signals the storage does not carry are ignored.
    ///
    /// # Errors
    ///
    /// - [`StorageError::MissingTimestamp`] if the item has no timestamp.
    /// - [`StorageError::NonFiniteTimestamp`] if the timestamp is NaN or
    ///   infinite. NaN values are stored as absent.
    /// - [`SpecError::UnitConflict`](crate::error::SpecError::UnitConflict)
    ///   if the sample asserts a unit that differs from a resolved one.
    /// - Backing write errors.
    fn add_data_item(&self, item: &DataItem) -> Result<()>;

    /// Physical indices from `from` to `to` in time order.
    fn timed_indexes(&self, from: usize, to: usize) -> TimedIndexes;

    /// Physical index of the item nearest to `time`, `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SearchDiverged`] or
    /// [`StorageError::MissingTimestamp`] on broken internal state.
    fn index_from_time(&self, time: f64) -> Result<Option<usize>>;

    /// Averages `signals` over `[from, to]`; see [`aggregate::average`].
    ///
    /// # Errors
    ///
    /// See [`aggregate::average`].
    fn average(
        &self,
        from: f64,
        to: f64,
        signals: &[String],
        shift: Option<&ShiftSpec>,
    ) -> Result<DataItem>;

    /// Exports `signals` (all signals if `None`) in time order.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`](crate::error::SpecError::UnknownSignal)
    /// for a signal the storage does not carry.
    fn serialize(&self, signals: Option<&[String]>) -> Result<Serialized>;

    /// Timestamp of the newest item.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn last_time(&self) -> Result<Option<f64>>;

    /// The newest item.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn last_item(&self) -> Result<Option<DataItem>>;

    /// Timestamps of the oldest and newest items, `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn timestamp_range(&self) -> Result<Option<TimeRange>>;

    /// Human-readable description of the storage and its items.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn dump(&self) -> Result<Vec<String>>;

    /// Flushes durable backings to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&self) -> Result<()>;
}

#[derive(Debug)]
struct Inner<O, B> {
    spec: Arc<DataItemSpec>,
    ordering: O,
    backing: B,
}

impl<O: Ordering, B: Backing> Inner<O, B> {
    fn len(&self) -> usize {
        self.backing.length()
    }

    fn timestamp_at(&self, index: usize) -> Result<f64> {
        self.backing
            .timestamp(index)?
            .ok_or_else(|| StorageError::MissingTimestamp { index: Some(index) }.into())
    }

    fn last_time(&self) -> Result<Option<f64>> {
        self.ordering
            .last_index(self.len(), 0)
            .map(|index| self.timestamp_at(index))
            .transpose()
    }

    fn timestamp_range(&self) -> Result<Option<TimeRange>> {
        let len = self.len();
        let Some(last) = self.ordering.last_index(len, 0) else {
            return Ok(None);
        };
        Ok(Some(TimeRange {
            first: self.timestamp_at(self.ordering.min_time_index(len))?,
            last: self.timestamp_at(last)?,
        }))
    }
}

/// A storage composed of an ordering policy and a backing policy.
#[derive(Debug)]
pub struct Storage<O, B> {
    inner: RwLock<Inner<O, B>>,
}

/// Builds a storage spec, rejecting repeated signals.
fn spec_for<I, S>(signals: I) -> Result<DataItemSpec>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    DataItemSpec::with_units(signals.into_iter().map(|s| (s, None::<&str>)))
}

impl<O: Ordering, B: Backing> Storage<O, B> {
    /// Composes a storage from its policies.
    ///
    /// The ordering is attached to the backing first, so a backing that
    /// already holds items (a reopened table) resumes where it left off.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing items cannot be read.
    pub fn compose(mut ordering: O, mut backing: B, spec: DataItemSpec) -> Result<Self> {
        let spec = Arc::new(spec);
        ordering.attach(&mut backing, &spec)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                spec,
                ordering,
                backing,
            }),
        })
    }
}

impl Storage<Circular, MemBacking> {
    /// Creates an empty in-memory ring of `capacity` items.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ZeroCapacity`] if `capacity` is 0.
    /// - [`SpecError::DuplicateSignal`](crate::error::SpecError::DuplicateSignal)
    ///   if a signal repeats.
    pub fn new<I, S>(capacity: usize, signals: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::compose(Circular::new(capacity)?, MemBacking::new(), spec_for(signals)?)
    }
}

impl Storage<Linear, MemBacking> {
    /// Creates an empty unbounded in-memory storage.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateSignal`](crate::error::SpecError::DuplicateSignal)
    /// if a signal repeats.
    pub fn new<I, S>(signals: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::compose(Linear::new(), MemBacking::new(), spec_for(signals)?)
    }
}

impl Storage<Circular, PersistentBacking> {
    /// Opens a ring of `capacity` items over `table`, whose configured
    /// signals become the storage signals.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ZeroCapacity`] if `capacity` is 0.
    /// - Errors reading the existing rows to recover the ring head.
    pub fn open(capacity: usize, table: Table) -> Result<Self> {
        let spec = spec_for(table.signals())?;
        Self::compose(Circular::new(capacity)?, PersistentBacking::new(table), spec)
    }
}

impl Storage<Linear, PersistentBacking> {
    /// Opens an unbounded storage over `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table signals repeat.
    pub fn open(table: Table) -> Result<Self> {
        let spec = spec_for(table.signals())?;
        Self::compose(Linear::new(), PersistentBacking::new(table), spec)
    }
}

impl<O: Ordering, B: Backing> TimedStorage for Storage<O, B> {
    fn spec(&self) -> Arc<DataItemSpec> {
        Arc::clone(&self.inner.read().spec)
    }

    fn length(&self) -> usize {
        self.inner.read().len()
    }

    fn min_time_index(&self) -> usize {
        let inner = self.inner.read();
        inner.ordering.min_time_index(inner.len())
    }

    fn last_index(&self, offset: usize) -> Option<usize> {
        let inner = self.inner.read();
        inner.ordering.last_index(inner.len(), offset)
    }

    fn get_data_item(&self, index: usize) -> Result<Option<DataItem>> {
        let inner = self.inner.read();
        inner.backing.get_data_item(index, &inner.spec)
    }

    fn add_data_item(&self, item: &DataItem) -> Result<()> {
        let timestamp = item
            .timestamp()
            .ok_or(StorageError::MissingTimestamp { index: None })?;
        if !timestamp.is_finite() {
            return Err(StorageError::NonFiniteTimestamp { timestamp }.into());
        }

        // NaN marks an absent cell on disk; store it as absent everywhere.
        let cleared = item.without_nan();
        if cleared.is_some() {
            tracing::warn!(timestamp, "NaN values stored as absent");
        }
        let item = cleared.as_ref().unwrap_or(item);

        let mut inner = self.inner.write();
        if inner.spec.verify_units(item.spec())? {
            Arc::make_mut(&mut inner.spec).check_units(item.spec())?;
        }

        if let Some(last) = inner.last_time()?
            && timestamp < last
        {
            tracing::warn!(timestamp, last, "sample is older than the newest stored item");
        }

        let Inner {
            spec,
            ordering,
            backing,
        } = &mut *inner;
        ordering.add_data_item(backing, item, spec)?;

        tracing::debug!(timestamp, length = backing.length(), "added data item");
        Ok(())
    }

    fn timed_indexes(&self, from: usize, to: usize) -> TimedIndexes {
        let inner = self.inner.read();
        inner.ordering.timed_indexes(inner.len(), from, to)
    }

    fn index_from_time(&self, time: f64) -> Result<Option<usize>> {
        let inner = self.inner.read();
        inner.ordering.index_from_time(&inner.backing, time)
    }

    fn average(
        &self,
        from: f64,
        to: f64,
        signals: &[String],
        shift: Option<&ShiftSpec>,
    ) -> Result<DataItem> {
        let inner = self.inner.read();
        aggregate::average(
            &inner.ordering,
            &inner.backing,
            &inner.spec,
            from,
            to,
            signals,
            shift,
        )
    }

    fn serialize(&self, signals: Option<&[String]>) -> Result<Serialized> {
        let inner = self.inner.read();

        let mut requested: Vec<String> = Vec::new();
        match signals {
            Some(signals) => {
                for signal in signals {
                    if !requested.contains(signal) {
                        requested.push(signal.clone());
                    }
                }
            }
            None => requested.extend(inner.spec.signals().map(str::to_string)),
        }

        let order = inner.ordering.all_indexes(inner.len());
        inner.backing.serialize(&inner.spec, order, &requested)
    }

    fn last_time(&self) -> Result<Option<f64>> {
        self.inner.read().last_time()
    }

    fn last_item(&self) -> Result<Option<DataItem>> {
        let inner = self.inner.read();
        match inner.ordering.last_index(inner.len(), 0) {
            Some(index) => inner.backing.get_data_item(index, &inner.spec),
            None => Ok(None),
        }
    }

    fn timestamp_range(&self) -> Result<Option<TimeRange>> {
        self.inner.read().timestamp_range()
    }

    fn dump(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let len = inner.len();

        let mut lines = vec![format!("{len} items")];
        let Some(last) = inner.ordering.last_index(len, 0) else {
            return Ok(lines);
        };

        let min = inner.ordering.min_time_index(len);
        lines.push(format!("min index {min} at T = {:.3}", inner.timestamp_at(min)?));
        lines.push(format!("last index {last} at T = {:.3}", inner.timestamp_at(last)?));
        if let Some(range) = inner.timestamp_range()? {
            lines.push(format!(
                "time range {:.3} .. {:.3} ({:.1} s)",
                range.first,
                range.last,
                range.span()
            ));
        }

        for index in inner.ordering.all_indexes(len) {
            if let Some(item) = inner.backing.get_data_item(index, &inner.spec)? {
                lines.push(format!("[{index}] {item}"));
            }
        }
        Ok(lines)
    }

    fn sync(&self) -> Result<()> {
        self.inner.read().backing.sync()
    }
}

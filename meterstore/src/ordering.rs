//! Time-ordering policies for storages.
//!
//! An [`Ordering`] decides where the next item lands in a [`Backing`] and
//! how physical positions map onto time order. Two policies exist:
//!
//! - [`Circular`]: a fixed-capacity ring. Once full, every new item
//!   overwrites the oldest one, found at the head.
//! - [`Linear`]: unbounded and append-only. Physical and time order agree.
//!
//! # Index spaces
//!
//! A *physical* index addresses a slot of the backing. A *logical* index
//! counts from the oldest item (logical 0) to the newest (logical
//! `len - 1`). For a ring the two differ by a rotation of `min_time_index`:
//!
//! ```text
//! physical:  [10, 11, 12,  3,  4,  5,  6,  7,  8,  9]
//!                          ^ head = min_time_index = 3
//! logical 0 -> physical 3, logical 9 -> physical 2
//! ```
//!
//! The time-index search runs over logical indices, so the wrap boundary
//! never splits a search interval.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::backing::Backing;
use crate::error::{Result, StorageError};
use crate::item::DataItem;
use crate::spec::DataItemSpec;

/// Upper bound on bisection steps before the search is declared divergent.
///
/// A search over `len` items needs at most `log2(len) + 1` steps; this bound
/// can only be reached with broken head/length bookkeeping.
const MAX_SEARCH_ITERATIONS: u32 = usize::BITS + 1;

/// Physical indices of a storage in time order.
///
/// The sequence is finite, and cloning it restarts the enumeration. It is
/// made of at most two contiguous runs: `head` is traversed first, then
/// `tail` (the part of a ring that wrapped to the start of the backing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedIndexes {
    head: Range<usize>,
    tail: Range<usize>,
}

impl TimedIndexes {
    /// An empty sequence.
    pub fn empty() -> Self {
        Self {
            head: 0..0,
            tail: 0..0,
        }
    }

    pub(crate) fn contiguous(range: Range<usize>) -> Self {
        Self {
            head: range,
            tail: 0..0,
        }
    }

    pub(crate) fn wrapped(head: Range<usize>, tail: Range<usize>) -> Self {
        Self { head, tail }
    }
}

impl Iterator for TimedIndexes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.head.next().or_else(|| self.tail.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.head.len() + self.tail.len();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TimedIndexes {}

/// Ordering policy strategy.
///
/// Implementations keep only ordering state (the head of a ring); item data
/// lives in the [`Backing`] passed to each call, and `len` is always the
/// backing's current [`length`](Backing::length).
pub trait Ordering: fmt::Debug + Send + Sync {
    /// Physical index of the oldest item.
    fn min_time_index(&self, len: usize) -> usize;

    /// Physical index of the item `offset` positions before the newest, or
    /// `None` if fewer than `offset + 1` items are stored.
    fn last_index(&self, len: usize, offset: usize) -> Option<usize>;

    /// Stores an item, evicting the oldest if the policy requires it.
    ///
    /// Units must already be reconciled with `spec`.
    ///
    /// # Errors
    ///
    /// Propagates backing write errors; ordering state is left unchanged
    /// when the write fails.
    fn add_data_item(
        &mut self,
        backing: &mut dyn Backing,
        item: &DataItem,
        spec: &Arc<DataItemSpec>,
    ) -> Result<()>;

    /// Physical indices from `from` to `to` (both inclusive, both physical)
    /// in time order.
    ///
    /// A range whose start lies after its end in time order is empty, as is
    /// any range over an empty backing.
    fn timed_indexes(&self, len: usize, from: usize, to: usize) -> TimedIndexes;

    /// Maps a logical index (0 = oldest) to its physical index.
    fn physical_index(&self, len: usize, logical: usize) -> usize;

    /// All physical indices in time order.
    fn all_indexes(&self, len: usize) -> TimedIndexes {
        match self.last_index(len, 0) {
            Some(last) => self.timed_indexes(len, self.min_time_index(len), last),
            None => TimedIndexes::empty(),
        }
    }

    /// Rebuilds ordering state from a backing that already holds items.
    ///
    /// A policy may rewrite items in place so that the backing matches its
    /// layout; `spec` is the storage spec the items are laid out against.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing items cannot be read or rewritten.
    fn attach(&mut self, _backing: &mut dyn Backing, _spec: &Arc<DataItemSpec>) -> Result<()> {
        Ok(())
    }

    /// Physical index of the item whose timestamp is nearest to `time`.
    ///
    /// See [`nearest_index`] for the search contract.
    ///
    /// # Errors
    ///
    /// See [`nearest_index`].
    fn index_from_time(&self, backing: &dyn Backing, time: f64) -> Result<Option<usize>> {
        nearest_index(self, backing, time)
    }
}

/// Binary search for the item nearest to `time`, over logical indices.
///
/// Returns `Ok(None)` for an empty backing or a NaN `time`. Times before the
/// oldest or after the newest item clamp to that item. An exact timestamp
/// match is returned directly; otherwise the search narrows to two adjacent
/// items and returns the closer one, the earlier on a tie.
///
/// # Errors
///
/// - [`StorageError::MissingTimestamp`] if a visited item has no timestamp.
/// - [`StorageError::SearchDiverged`] if the search fails to narrow down.
pub fn nearest_index<O: Ordering + ?Sized>(
    ordering: &O,
    backing: &dyn Backing,
    time: f64,
) -> Result<Option<usize>> {
    let len = backing.length();
    if len == 0 || time.is_nan() {
        return Ok(None);
    }

    let physical = |logical: usize| ordering.physical_index(len, logical);
    let timestamp_at = |logical: usize| -> Result<f64> {
        let index = physical(logical);
        backing
            .timestamp(index)?
            .ok_or_else(|| StorageError::MissingTimestamp { index: Some(index) }.into())
    };

    let mut lo = 0;
    let mut hi = len - 1;
    if time <= timestamp_at(lo)? {
        return Ok(Some(physical(lo)));
    }
    if time >= timestamp_at(hi)? {
        return Ok(Some(physical(hi)));
    }

    let mut iterations = 0u32;
    while hi - lo > 1 {
        if iterations == MAX_SEARCH_ITERATIONS {
            return Err(StorageError::SearchDiverged { lo, hi, iterations }.into());
        }
        iterations += 1;

        let mid = lo + (hi - lo) / 2;
        let mid_time = timestamp_at(mid)?;
        if mid_time < time {
            lo = mid;
        } else if mid_time > time {
            hi = mid;
        } else {
            tracing::debug!(time, index = physical(mid), iterations, "exact time match");
            return Ok(Some(physical(mid)));
        }
    }

    let nearest = if time - timestamp_at(lo)? <= timestamp_at(hi)? - time {
        lo
    } else {
        hi
    };
    tracing::debug!(time, index = physical(nearest), iterations, "nearest time match");
    Ok(Some(physical(nearest)))
}

/// Fixed-capacity ring ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circular {
    capacity: usize,
    /// Physical slot receiving the next write; holds the oldest item once full.
    head: usize,
}

impl Circular {
    /// Creates an empty ring of `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ZeroCapacity`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StorageError::ZeroCapacity.into());
        }
        Ok(Self { capacity, head: 0 })
    }

    /// Returns the ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the head slot.
    pub fn head(&self) -> usize {
        self.head
    }
}

impl Ordering for Circular {
    fn min_time_index(&self, len: usize) -> usize {
        if len < self.capacity { 0 } else { self.head }
    }

    fn last_index(&self, len: usize, offset: usize) -> Option<usize> {
        if len <= offset {
            return None;
        }
        Some((self.head + len - offset - 1) % len)
    }

    fn add_data_item(
        &mut self,
        backing: &mut dyn Backing,
        item: &DataItem,
        spec: &Arc<DataItemSpec>,
    ) -> Result<()> {
        if backing.length() < self.capacity {
            backing.append(item, spec)?;
        } else {
            backing.insert(item, self.head, spec)?;
        }
        self.head = (self.head + 1) % self.capacity;
        Ok(())
    }

    fn timed_indexes(&self, len: usize, from: usize, to: usize) -> TimedIndexes {
        if len == 0 || from >= len {
            return TimedIndexes::empty();
        }
        let to = to.min(len - 1);

        let min = self.min_time_index(len);
        let logical = |physical: usize| (physical + len - min) % len;
        if logical(from) > logical(to) {
            return TimedIndexes::empty();
        }

        if from <= to {
            TimedIndexes::contiguous(from..to + 1)
        } else {
            TimedIndexes::wrapped(from..len, 0..to + 1)
        }
    }

    fn physical_index(&self, len: usize, logical: usize) -> usize {
        if len == 0 {
            return logical;
        }
        (self.min_time_index(len) + logical) % len
    }

    fn attach(&mut self, backing: &mut dyn Backing, spec: &Arc<DataItemSpec>) -> Result<()> {
        let len = backing.length();
        if len > self.capacity {
            tracing::warn!(
                rows = len,
                capacity = self.capacity,
                "backing holds more items than the ring capacity, widening the ring"
            );
            self.capacity = len;
        }
        if len == 0 {
            self.head = 0;
            return Ok(());
        }

        let oldest = oldest_index(backing)?;
        if len == self.capacity {
            // Full ring: the oldest item sits where the next write lands.
            self.head = oldest;
            tracing::debug!(head = self.head, capacity = self.capacity, "recovered ring head");
            return Ok(());
        }

        // Partially filled: appends go after the last slot, so the rows must
        // already be in time order. A table that wrapped under a smaller
        // capacity is rotated into place first.
        if oldest != 0 {
            tracing::warn!(
                rows = len,
                capacity = self.capacity,
                oldest,
                "ring grew since the table wrapped, rotating rows into time order"
            );
            rotate_left(backing, oldest, spec)?;
        }
        self.head = len;
        Ok(())
    }
}

/// Physical index of the item with the smallest timestamp.
fn oldest_index(backing: &dyn Backing) -> Result<usize> {
    let mut oldest: Option<(usize, f64)> = None;
    for index in 0..backing.length() {
        let time = backing
            .timestamp(index)?
            .ok_or(StorageError::MissingTimestamp { index: Some(index) })?;
        if oldest.is_none_or(|(_, min)| time < min) {
            oldest = Some((index, time));
        }
    }
    Ok(oldest.map_or(0, |(index, _)| index))
}

/// Rewrites the backing so that the item at `first` moves to index 0.
fn rotate_left(backing: &mut dyn Backing, first: usize, spec: &Arc<DataItemSpec>) -> Result<()> {
    let len = backing.length();
    let mut items = Vec::with_capacity(len);
    for logical in 0..len {
        let index = (first + logical) % len;
        let item = backing
            .get_data_item(index, spec)?
            .ok_or(StorageError::IndexOutOfRange { index, len })?;
        items.push(item);
    }
    for (index, item) in items.iter().enumerate() {
        backing.insert(item, index, spec)?;
    }
    Ok(())
}

/// Unbounded append-only ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Linear;

impl Linear {
    /// Creates a linear ordering.
    pub fn new() -> Self {
        Self
    }
}

impl Ordering for Linear {
    fn min_time_index(&self, _len: usize) -> usize {
        0
    }

    fn last_index(&self, len: usize, offset: usize) -> Option<usize> {
        (len > offset).then(|| len - offset - 1)
    }

    fn add_data_item(
        &mut self,
        backing: &mut dyn Backing,
        item: &DataItem,
        spec: &Arc<DataItemSpec>,
    ) -> Result<()> {
        backing.append(item, spec)
    }

    fn timed_indexes(&self, len: usize, from: usize, to: usize) -> TimedIndexes {
        if len == 0 || from > to || from >= len {
            return TimedIndexes::empty();
        }
        TimedIndexes::contiguous(from..to.min(len - 1) + 1)
    }

    fn physical_index(&self, _len: usize, logical: usize) -> usize {
        logical
    }
}

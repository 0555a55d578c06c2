//! Backing policies: where a storage keeps its items.
//!
//! A [`Backing`] is a positional container of items laid out against the
//! storage spec. It knows nothing about time order; the
//! [`Ordering`](crate::ordering::Ordering) decides which positions to write
//! and in which order to read them.
//!
//! - [`MemBacking`]: a process-local vector of items.
//! - [`PersistentBacking`]: one row per item in a durable [`Table`].

use std::fmt;
use std::sync::Arc;

use crate::db::Table;
use crate::error::{Result, StorageError};
use crate::item::DataItem;
use crate::ordering::TimedIndexes;
use crate::query::Serialized;
use crate::spec::DataItemSpec;

/// Backing policy strategy.
///
/// Out-of-range reads return `Ok(None)`; they are not errors.
pub trait Backing: fmt::Debug + Send + Sync {
    /// Number of stored items.
    fn length(&self) -> usize;

    /// Reads the item at a physical index, laid out per `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored row cannot be decoded against `spec`.
    fn get_data_item(&self, index: usize, spec: &Arc<DataItemSpec>) -> Result<Option<DataItem>>;

    /// Reads the timestamp at a physical index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn timestamp(&self, index: usize) -> Result<Option<f64>>;

    /// Reads the value of the signal at `ordinal` at a physical index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn value(&self, index: usize, ordinal: usize) -> Result<Option<f64>>;

    /// Stores an item after the last one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be written.
    fn append(&mut self, item: &DataItem, spec: &Arc<DataItemSpec>) -> Result<()>;

    /// Overwrites the item at a physical index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the backing cannot
    /// be written.
    fn insert(&mut self, item: &DataItem, index: usize, spec: &Arc<DataItemSpec>) -> Result<()>;

    /// Exports `signals` at the physical indices of `order`, in that order.
    ///
    /// # Errors
    ///
    /// - [`SpecError::UnknownSignal`](crate::error::SpecError::UnknownSignal)
    ///   if a signal is not in `spec`.
    /// - [`StorageError::MissingTimestamp`] if an exported item has no
    ///   timestamp.
    fn serialize(
        &self,
        spec: &DataItemSpec,
        order: TimedIndexes,
        signals: &[String],
    ) -> Result<Serialized> {
        let ordinals = signals
            .iter()
            .map(|s| spec.ordinal(s))
            .collect::<Result<Vec<_>>>()?;

        let mut result = Serialized::new(spec, signals, order.len());
        for index in order {
            let time = self
                .timestamp(index)?
                .ok_or(StorageError::MissingTimestamp { index: Some(index) })?;
            result.timestamp.push(time);
            for (signal, &ordinal) in signals.iter().zip(&ordinals) {
                if let Some(column) = result.signals.get_mut(signal) {
                    column.push(self.value(index, ordinal)?);
                }
            }
        }
        Ok(result)
    }

    /// Flushes pending writes to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local, insertion-ordered items.
#[derive(Debug, Clone, Default)]
pub struct MemBacking {
    items: Vec<DataItem>,
}

impl MemBacking {
    /// Creates an empty backing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays an incoming item out against the storage spec.
    fn normalize(item: &DataItem, spec: &Arc<DataItemSpec>) -> Result<DataItem> {
        DataItem::from_array(&item.to_array(spec), Arc::clone(spec))
    }
}

impl Backing for MemBacking {
    fn length(&self) -> usize {
        self.items.len()
    }

    fn get_data_item(&self, index: usize, spec: &Arc<DataItemSpec>) -> Result<Option<DataItem>> {
        Ok(self.items.get(index).map(|stored| {
            let mut item = stored.clone();
            item.rebind(Arc::clone(spec));
            item
        }))
    }

    fn timestamp(&self, index: usize) -> Result<Option<f64>> {
        Ok(self.items.get(index).and_then(DataItem::timestamp))
    }

    fn value(&self, index: usize, ordinal: usize) -> Result<Option<f64>> {
        Ok(self.items.get(index).and_then(|item| item.value_at(ordinal)))
    }

    fn append(&mut self, item: &DataItem, spec: &Arc<DataItemSpec>) -> Result<()> {
        self.items.push(Self::normalize(item, spec)?);
        Ok(())
    }

    fn insert(&mut self, item: &DataItem, index: usize, spec: &Arc<DataItemSpec>) -> Result<()> {
        let len = self.items.len();
        let slot = self.items.get_mut(index).ok_or(StorageError::IndexOutOfRange { index, len })?;
        *slot = Self::normalize(item, spec)?;
        Ok(())
    }
}

/// One durable table row per item.
///
/// The table's configured signals are the storage's signals, in the same
/// order, so table cell `1 + ordinal` holds the signal at `ordinal`.
#[derive(Debug, Clone)]
pub struct PersistentBacking {
    table: Table,
}

impl PersistentBacking {
    /// Wraps an open table.
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    /// Returns the underlying table.
    pub fn table(&self) -> &Table {
        &self.table
    }
}

impl Backing for PersistentBacking {
    fn length(&self) -> usize {
        self.table.row_count()
    }

    fn get_data_item(&self, index: usize, spec: &Arc<DataItemSpec>) -> Result<Option<DataItem>> {
        self.table
            .read_row(index)
            .map(|row| DataItem::from_array(&row, Arc::clone(spec)))
            .transpose()
    }

    fn timestamp(&self, index: usize) -> Result<Option<f64>> {
        Ok(self.table.read_timestamp(index))
    }

    fn value(&self, index: usize, ordinal: usize) -> Result<Option<f64>> {
        Ok(self.table.read_cell(index, ordinal + 1))
    }

    fn append(&mut self, item: &DataItem, spec: &Arc<DataItemSpec>) -> Result<()> {
        self.table.append_row(&item.to_array(spec))?;
        Ok(())
    }

    fn insert(&mut self, item: &DataItem, index: usize, spec: &Arc<DataItemSpec>) -> Result<()> {
        self.table.update_row(index, &item.to_array(spec))
    }

    /// Bulk export: the whole table is read column by column once, then
    /// reordered, instead of one random row access per exported cell.
    fn serialize(
        &self,
        spec: &DataItemSpec,
        order: TimedIndexes,
        signals: &[String],
    ) -> Result<Serialized> {
        let ordinals = signals
            .iter()
            .map(|s| spec.ordinal(s))
            .collect::<Result<Vec<_>>>()?;

        let dump = self.table.dump();
        let indices: Vec<usize> = order.collect();
        let mut result = Serialized::new(spec, signals, indices.len());
        for &index in &indices {
            let time = dump
                .timestamps
                .get(index)
                .copied()
                .flatten()
                .ok_or(StorageError::MissingTimestamp { index: Some(index) })?;
            result.timestamp.push(time);
        }

        for (signal, &ordinal) in signals.iter().zip(&ordinals) {
            let source = dump.columns.get(ordinal);
            if let Some(column) = result.signals.get_mut(signal) {
                column.extend(
                    indices
                        .iter()
                        .map(|&index| source.and_then(|c| c.get(index).copied().flatten())),
                );
            }
        }
        Ok(result)
    }

    fn sync(&self) -> Result<()> {
        self.table.sync()
    }
}

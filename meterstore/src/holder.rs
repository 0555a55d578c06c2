//! Registry of the configured data stores.
//!
//! A [`DataHolder`] is built once from a [`HolderConfig`] and never gains
//! or loses stores afterwards. Every operation names its store; an unknown
//! name is a [`HolderError::UnknownStore`], since store names are fixed by
//! configuration and a miss means the caller is wrong, not the data.
//!
//! The holder is `Send + Sync`: an ingest thread can add samples while
//! request threads query through a shared `Arc<DataHolder>`.

use std::collections::HashMap;

use crate::aggregate::ShiftSpec;
use crate::config::{HolderConfig, ShiftConfig};
use crate::db::Database;
use crate::error::{HolderError, Result};
use crate::item::DataItem;
use crate::query::{Serialized, TimeRange};
use crate::store::DataStore;

/// Fixed registry of named data stores.
#[derive(Debug)]
pub struct DataHolder {
    stores: Vec<DataStore>,
    index: HashMap<String, usize>,
    shift: Option<ShiftConfig>,
    db: Option<Database>,
}

impl DataHolder {
    /// Opens every store of `config`.
    ///
    /// The database directory is only opened when at least one store is
    /// persistent.
    ///
    /// # Errors
    ///
    /// - Any error of [`HolderConfig::validate`].
    /// - Errors opening the database or a store.
    pub fn open(config: &HolderConfig) -> Result<Self> {
        config.validate()?;

        let db = if config.has_persistent_stores() {
            Some(Database::open(&config.data_dir)?)
        } else {
            None
        };

        let mut stores = Vec::with_capacity(config.stores.len());
        let mut index = HashMap::with_capacity(config.stores.len());
        for store_config in &config.stores {
            index.insert(store_config.name.clone(), stores.len());
            stores.push(DataStore::open(store_config, db.as_ref())?);
        }

        tracing::info!(stores = stores.len(), "data holder ready");
        Ok(Self {
            stores,
            index,
            shift: config.shift.clone(),
            db,
        })
    }

    /// Resolves a store by name.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::UnknownStore`] if no store has this name.
    pub fn data_store(&self, name: &str) -> Result<&DataStore> {
        self.index
            .get(name)
            .map(|&i| &self.stores[i])
            .ok_or_else(|| {
                HolderError::UnknownStore {
                    name: name.to_string(),
                    known: self.data_store_names().map(str::to_string).collect(),
                }
                .into()
            })
    }

    /// Iterates over store names in configuration order.
    pub fn data_store_names(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(DataStore::name)
    }

    /// Iterates over the stores in configuration order.
    pub fn data_stores(&self) -> impl Iterator<Item = &DataStore> {
        self.stores.iter()
    }

    /// Returns the configured shift, if any.
    pub fn shift(&self) -> Option<&ShiftConfig> {
        self.shift.as_ref()
    }

    /// Returns the database, if any store is persistent.
    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Adds a sample to a store.
    ///
    /// # Errors
    ///
    /// - [`HolderError::UnknownStore`] for an unknown store.
    /// - Any error of
    ///   [`TimedStorage::add_data_item`](crate::storage::TimedStorage::add_data_item).
    pub fn add_measurement(&self, store: &str, item: &DataItem) -> Result<()> {
        self.data_store(store)?.storage().add_data_item(item)
    }

    /// Averages `signals` of a store over `[from, to]`.
    ///
    /// # Errors
    ///
    /// - [`HolderError::UnknownStore`] for an unknown store.
    /// - Any error of [`average`](crate::aggregate::average).
    pub fn get_average(
        &self,
        store: &str,
        from: f64,
        to: f64,
        signals: &[String],
        shift: Option<&ShiftSpec>,
    ) -> Result<DataItem> {
        self.data_store(store)?
            .storage()
            .average(from, to, signals, shift)
    }

    /// Returns the time span of a store, `None` while it is empty.
    ///
    /// # Errors
    ///
    /// - [`HolderError::UnknownStore`] for an unknown store.
    /// - Backing read errors.
    pub fn get_timerange(&self, store: &str) -> Result<Option<TimeRange>> {
        self.data_store(store)?.storage().timestamp_range()
    }

    /// Exports `signals` (all if `None`) of a store in time order.
    ///
    /// # Errors
    ///
    /// - [`HolderError::UnknownStore`] for an unknown store.
    /// - Unknown signals.
    pub fn serialize(&self, store: &str, signals: Option<&[String]>) -> Result<Serialized> {
        self.data_store(store)?.storage().serialize(signals)
    }

    /// Averages the newest `interval_seconds` of `source` over the signals
    /// of `dest` and adds the result to `dest`.
    ///
    /// The window is `[max(last - interval, first), last]` of `source`.
    /// Returns the added item, or `None` when `source` is empty.
    ///
    /// # Errors
    ///
    /// - [`HolderError::UnknownStore`] for an unknown store.
    /// - [`SpecError::UnknownSignal`](crate::error::SpecError::UnknownSignal)
    ///   if `source` lacks a signal of `dest`.
    /// - [`QueryError::InvalidTimeRange`](crate::error::QueryError::InvalidTimeRange)
    ///   for a negative or NaN interval.
    pub fn transfer_average(
        &self,
        source: &str,
        dest: &str,
        interval_seconds: f64,
        shift: Option<&ShiftSpec>,
    ) -> Result<Option<DataItem>> {
        let source_store = self.data_store(source)?;
        let dest_store = self.data_store(dest)?;

        let Some(range) = source_store.storage().timestamp_range()? else {
            tracing::debug!(source, "nothing to transfer, source is empty");
            return Ok(None);
        };

        let to = range.last;
        let from = (range.last - interval_seconds).max(range.first);
        let average = source_store
            .storage()
            .average(from, to, dest_store.signals(), shift)?;
        dest_store.storage().add_data_item(&average)?;

        tracing::debug!(source, dest, from, to, "transferred average");
        Ok(Some(average))
    }

    /// Flushes every durable store.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn sync(&self) -> Result<()> {
        self.stores.iter().try_for_each(|s| s.storage().sync())
    }
}

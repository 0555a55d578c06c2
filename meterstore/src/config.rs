//! Store configuration.
//!
//! A [`HolderConfig`] describes every data store of a
//! [`DataHolder`](crate::holder::DataHolder): its name, whether it lives in
//! memory or in a durable table, whether it is a bounded ring or grows
//! without bound, and which signals it carries. Configuration is an
//! immutable value built once at startup and passed in explicitly.
//!
//! # Example
//!
//! ```rust
//! use meterstore::config::{HolderConfig, LifeSpan, Persistency};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HolderConfig::from_json(r#"{
//!     "data_dir": "./data",
//!     "stores": [
//!         { "name": "real_time", "persistency": "volatile", "lifespan": "circular",
//!           "signals": ["current_usage", "solar_power"], "buffer_length": 3600 },
//!         { "name": "persistent", "persistency": "persistent", "lifespan": "linear",
//!           "signals": ["current_usage", "solar_power"], "table": "persistent" }
//!     ],
//!     "shift": { "signal": "gas_usage", "shift_seconds": 12.5 }
//! }"#)?;
//!
//! assert_eq!(config.stores[0].lifespan, LifeSpan::Circular);
//! assert_eq!(config.stores[1].persistency, Persistency::Persistent);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::ShiftSpec;
use crate::db::{TIMESTAMP_COLUMN, is_valid_table_name};
use crate::error::{ConfigError, QueryError, Result, TableError};

/// Signal names that would collide with keys of a serialized export.
const RESERVED_SIGNALS: [&str; 2] = [TIMESTAMP_COLUMN, "units"];

/// Where a store keeps its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistency {
    /// Process memory; lost on restart.
    Volatile,
    /// A durable table.
    Persistent,
}

/// How a store bounds its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifeSpan {
    /// Fixed-capacity ring, oldest items evicted.
    Circular,
    /// Unbounded, append-only.
    Linear,
}

impl fmt::Display for Persistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volatile => write!(f, "volatile"),
            Self::Persistent => write!(f, "persistent"),
        }
    }
}

impl fmt::Display for LifeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Circular => write!(f, "circular"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

/// Descriptor of one data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name, unique within a holder.
    pub name: String,

    /// Memory or durable table.
    pub persistency: Persistency,

    /// Ring or unbounded.
    pub lifespan: LifeSpan,

    /// Signals carried by every item, in column order.
    pub signals: Vec<String>,

    /// Ring capacity; required for circular stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_length: Option<usize>,

    /// Backing table name; required for persistent stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl StoreConfig {
    /// Validates the descriptor.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingTable`] if persistent without a table.
    /// - [`ConfigError::ZeroBufferLength`] if circular without a capacity.
    /// - [`ConfigError::NoSignals`], [`ConfigError::DuplicateSignal`] or
    ///   [`ConfigError::ReservedSignal`] for a bad signal list.
    /// - [`TableError::InvalidName`] for a table name outside `[A-Za-z0-9_]`.
    pub fn validate(&self) -> Result<()> {
        let store = || self.name.clone();

        if self.persistency == Persistency::Persistent {
            let Some(table) = &self.table else {
                return Err(ConfigError::MissingTable { store: store() }.into());
            };
            if !is_valid_table_name(table) {
                return Err(TableError::InvalidName {
                    name: table.clone(),
                }
                .into());
            }
        }

        if self.lifespan == LifeSpan::Circular && self.buffer_length.unwrap_or(0) == 0 {
            return Err(ConfigError::ZeroBufferLength { store: store() }.into());
        }

        if self.signals.is_empty() {
            return Err(ConfigError::NoSignals { store: store() }.into());
        }

        let mut seen = HashSet::new();
        for signal in &self.signals {
            if RESERVED_SIGNALS.contains(&signal.as_str()) {
                return Err(ConfigError::ReservedSignal {
                    store: store(),
                    signal: signal.clone(),
                }
                .into());
            }
            if !seen.insert(signal.as_str()) {
                return Err(ConfigError::DuplicateSignal {
                    store: store(),
                    signal: signal.clone(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Shift of one signal, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// The signal to resample.
    pub signal: String,
    /// Latency to compensate, in seconds.
    pub shift_seconds: f64,
}

impl ShiftConfig {
    /// Converts the shift to samples of `sampling_period` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidShift`] if the period is not a positive
    /// finite number or the shift is not finite.
    pub fn in_samples(&self, sampling_period: f64) -> Result<ShiftSpec> {
        if !sampling_period.is_finite() || sampling_period <= 0.0 {
            return Err(QueryError::InvalidShift {
                reason: format!("sampling period must be positive, got {sampling_period}"),
            }
            .into());
        }
        ShiftSpec::new(self.signal.clone(), self.shift_seconds / sampling_period)
    }
}

/// Configuration of a [`DataHolder`](crate::holder::DataHolder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderConfig {
    /// Directory of the durable tables.
    pub data_dir: PathBuf,

    /// Store descriptors.
    pub stores: Vec<StoreConfig>,

    /// Optional shift applied by aggregation jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift: Option<ShiftConfig>,
}

impl HolderConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read.
    /// - [`ConfigError::Parse`] if it is not a valid configuration.
    /// - Any error of [`validate`](Self::validate).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] if it is not a valid configuration.
    /// - Any error of [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every store and rejects repeated store names and tables.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::DuplicateStore`] if two stores share a name.
    /// - [`ConfigError::SharedTable`] if two persistent stores share a table.
    /// - Any error of [`StoreConfig::validate`].
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut tables: HashMap<&str, &str> = HashMap::new();
        for store in &self.stores {
            if !names.insert(store.name.as_str()) {
                return Err(ConfigError::DuplicateStore {
                    name: store.name.clone(),
                }
                .into());
            }
            store.validate()?;

            // Each durable store keeps its own ordering over its rows.
            if store.persistency == Persistency::Persistent
                && let Some(table) = store.table.as_deref()
                && let Some(first) = tables.insert(table, store.name.as_str())
            {
                return Err(ConfigError::SharedTable {
                    table: table.to_string(),
                    first: first.to_string(),
                    second: store.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Returns whether any store needs the durable database.
    pub fn has_persistent_stores(&self) -> bool {
        self.stores
            .iter()
            .any(|s| s.persistency == Persistency::Persistent)
    }
}

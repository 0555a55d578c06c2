//! Query results handed to consumers outside the engine.
//!
//! [`Serialized`] is the column-oriented export of a storage: one ascending
//! `timestamp` list, one parallel list per requested signal (absent samples
//! are `null`), and the `units` of every signal of the storage. Its JSON
//! form is a flat object:
//!
//! ```json
//! {
//!   "timestamp": [1700000000.0, 1700000001.0],
//!   "current_usage": [0.42, null],
//!   "units": { "current_usage": "kW", "solar_power": null }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::spec::DataItemSpec;

/// Column-oriented export of a storage in time order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Serialized {
    /// Timestamps, ascending.
    pub timestamp: Vec<f64>,
    /// One value list per requested signal, parallel to `timestamp`.
    #[serde(flatten)]
    pub signals: BTreeMap<String, Vec<Option<f64>>>,
    /// Unit of every signal of the storage, `None` while unresolved.
    pub units: BTreeMap<String, Option<String>>,
}

impl Serialized {
    /// Creates an empty export for `signals`, with the units of `spec`.
    pub(crate) fn new(spec: &DataItemSpec, signals: &[String], capacity: usize) -> Self {
        let units = spec
            .signals()
            .enumerate()
            .map(|(ordinal, signal)| (signal.to_string(), spec.unit_at(ordinal).map(str::to_string)))
            .collect();

        Self {
            timestamp: Vec::with_capacity(capacity),
            signals: signals
                .iter()
                .map(|s| (s.clone(), Vec::with_capacity(capacity)))
                .collect(),
            units,
        }
    }

    /// Returns the number of exported samples.
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    /// Returns whether no samples were exported.
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Returns the value list of a signal, if it was requested.
    pub fn values(&self, signal: &str) -> Option<&[Option<f64>]> {
        self.signals.get(signal).map(Vec::as_slice)
    }
}

/// Time span covered by a storage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Timestamp of the oldest item.
    pub first: f64,
    /// Timestamp of the newest item.
    pub last: f64,
}

impl TimeRange {
    /// Returns the covered duration in seconds.
    pub fn span(&self) -> f64 {
        self.last - self.first
    }
}

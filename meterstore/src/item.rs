//! Timestamped rows of signal values.
//!
//! A [`DataItem`] holds an optional timestamp (seconds since the Unix epoch)
//! and one value slot per signal of its [`DataItemSpec`]. Slot `i` holds the
//! signal registered at ordinal `i`; the timestamp is kept apart from the
//! slots. Items share their spec through an [`Arc`], so growing an item
//! (see [`DataItem::add_value`]) copies the spec only when it is shared.
//!
//! The flat form `[timestamp, v0, v1, ...]` produced by
//! [`DataItem::to_array`] is the unit of exchange with durable tables.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SpecError};
use crate::spec::DataItemSpec;

/// One timestamped sample.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use meterstore::item::DataItem;
/// use meterstore::spec::DataItemSpec;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spec = Arc::new(DataItemSpec::from_names(["current_usage"]));
/// let mut item = DataItem::new(spec, Some(1_700_000_000.0));
/// item.set_value("current_usage", 0.42)?;
///
/// // Attach a reading from another source to the same sample.
/// item.add_value("solar_power", Some(1250.0), Some("W"))?;
/// assert_eq!(item.get_value("solar_power")?, Some(1250.0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    spec: Arc<DataItemSpec>,
    timestamp: Option<f64>,
    values: Vec<Option<f64>>,
}

impl DataItem {
    /// Creates an item with every slot unset.
    pub fn new(spec: Arc<DataItemSpec>, timestamp: Option<f64>) -> Self {
        let values = vec![None; spec.len()];
        Self {
            spec,
            timestamp,
            values,
        }
    }

    /// Returns the spec this item is laid out against.
    pub fn spec(&self) -> &Arc<DataItemSpec> {
        &self.spec
    }

    /// Returns the timestamp in seconds since the Unix epoch.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Sets the timestamp.
    pub fn set_timestamp(&mut self, timestamp: Option<f64>) {
        self.timestamp = timestamp;
    }

    /// Returns the value of a signal, `None` if the slot is unset.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is not in the spec.
    pub fn get_value(&self, signal: &str) -> Result<Option<f64>> {
        let ordinal = self.spec.ordinal(signal)?;
        Ok(self.values[ordinal])
    }

    /// Sets the value of a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is not in the spec.
    pub fn set_value(&mut self, signal: &str, value: f64) -> Result<()> {
        let ordinal = self.spec.ordinal(signal)?;
        self.values[ordinal] = Some(value);
        Ok(())
    }

    /// Unsets the value of a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is not in the spec.
    pub fn clear_value(&mut self, signal: &str) -> Result<()> {
        let ordinal = self.spec.ordinal(signal)?;
        self.values[ordinal] = None;
        Ok(())
    }

    /// Value slot at an ordinal of the item's spec.
    pub(crate) fn value_at(&self, ordinal: usize) -> Option<f64> {
        self.values.get(ordinal).copied().flatten()
    }

    /// Swaps in a spec with the same signal layout (e.g. one that has
    /// since resolved more units).
    pub(crate) fn rebind(&mut self, spec: Arc<DataItemSpec>) {
        debug_assert_eq!(spec.len(), self.values.len());
        self.spec = spec;
    }

    /// Renders a value with its unit, e.g. `"0.42 kWh"`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is not in the spec.
    pub fn value_and_unit(&self, signal: &str) -> Result<String> {
        let (unit, ordinal) = self.spec.get_element(signal)?;
        Ok(format_cell(self.values[ordinal], unit))
    }

    /// Grows the item by one slot, registering `signal` in its spec.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateSignal`] if the signal already exists.
    pub fn add_value(&mut self, signal: &str, value: Option<f64>, unit: Option<&str>) -> Result<()> {
        let ordinal = Arc::make_mut(&mut self.spec).add_element(signal, unit)?;
        debug_assert_eq!(ordinal, self.values.len());
        self.values.push(value);
        Ok(())
    }

    /// Copies every signal of `other`, with its unit, into this item.
    ///
    /// Used to compose one result from a base reading plus extra readings
    /// taken at the same time. Nothing is copied if any signal of `other`
    /// already exists here.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateSignal`] on the first shared signal.
    pub fn merge(&mut self, other: &DataItem) -> Result<()> {
        if let Some(shared) = other.spec.signals().find(|s| self.spec.contains(s)) {
            return Err(SpecError::DuplicateSignal {
                signal: shared.to_string(),
            }
            .into());
        }

        for (ordinal, signal) in other.spec.signals().enumerate() {
            self.add_value(signal, other.values[ordinal], other.spec.unit_at(ordinal))?;
        }
        Ok(())
    }

    /// Returns true if every slot holds exactly `0.0`.
    ///
    /// A cheap check for devices returning an all-zero frame. Unset slots
    /// count as non-zero; an item with no slots is trivially zero.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == Some(0.0))
    }

    /// Returns a copy with NaN values unset, or `None` if there are none.
    pub(crate) fn without_nan(&self) -> Option<DataItem> {
        if !self.values.iter().flatten().any(|v| v.is_nan()) {
            return None;
        }
        let mut item = self.clone();
        for value in &mut item.values {
            if value.is_some_and(f64::is_nan) {
                *value = None;
            }
        }
        Some(item)
    }

    /// Flattens the item to `[timestamp, v0, v1, ...]` in the order of `spec`.
    ///
    /// Signals of `spec` that this item does not carry come out as `None`.
    pub fn to_array(&self, spec: &DataItemSpec) -> Vec<Option<f64>> {
        let mut array = Vec::with_capacity(spec.len() + 1);
        array.push(self.timestamp);
        for signal in spec.signals() {
            let value = self
                .spec
                .ordinal(signal)
                .ok()
                .and_then(|ordinal| self.values[ordinal]);
            array.push(value);
        }
        array
    }

    /// Rebuilds an item from `[timestamp, v0, v1, ...]` laid out per `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::ArrayLength`] if the array does not have one cell
    /// per signal plus the timestamp.
    pub fn from_array(array: &[Option<f64>], spec: Arc<DataItemSpec>) -> Result<Self> {
        let expected = spec.len() + 1;
        let Some((&timestamp, values)) = array.split_first().filter(|_| array.len() == expected) else {
            return Err(SpecError::ArrayLength {
                expected,
                found: array.len(),
            }
            .into());
        };

        Ok(Self {
            spec,
            timestamp,
            values: values.to_vec(),
        })
    }
}

/// Formats a value slot with an optional unit.
fn format_cell(value: Option<f64>, unit: Option<&str>) -> String {
    let value = value.map_or_else(|| "-".to_string(), |v| v.to_string());
    match unit {
        Some(unit) => format!("{value} {unit}"),
        None => value,
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "T = {ts:.3}")?,
            None => write!(f, "T = -")?,
        }
        for (ordinal, signal) in self.spec.signals().enumerate() {
            write!(
                f,
                "  {signal}: {}",
                format_cell(self.values[ordinal], self.spec.unit_at(ordinal))
            )?;
        }
        Ok(())
    }
}

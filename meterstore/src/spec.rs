//! Signal specifications shared by a family of data items.
//!
//! A [`DataItemSpec`] is an ordered mapping from signal identifier to its
//! unit and ordinal. The ordinal is assigned at insertion and never changes;
//! it is the slot a [`DataItem`](crate::item::DataItem) uses for that signal.
//!
//! Units are resolved lazily: a signal may start with no unit and adopt one
//! the first time a peer spec (typically an incoming sample) asserts it.
//! Once resolved, a different non-empty unit is a [`SpecError::UnitConflict`].

use std::collections::HashMap;

use crate::error::{Result, SpecError};

/// One signal entry of a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SpecEntry {
    signal: String,
    unit: Option<String>,
}

/// Ordered signal → (unit, ordinal) schema.
///
/// # Example
///
/// ```rust
/// use meterstore::spec::DataItemSpec;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut spec = DataItemSpec::from_names(["current_usage", "gas_usage"]);
/// spec.add_element("solar_power", Some("W"))?;
///
/// let (unit, ordinal) = spec.get_element("solar_power")?;
/// assert_eq!(unit, Some("W"));
/// assert_eq!(ordinal, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataItemSpec {
    entries: Vec<SpecEntry>,
    index: HashMap<String, usize>,
}

/// Normalizes a unit: empty strings mean "unset".
fn normalize(unit: Option<&str>) -> Option<&str> {
    unit.filter(|u| !u.is_empty())
}

impl DataItemSpec {
    /// Creates an empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a spec from signal names, all units unset.
    ///
    /// Repeated names keep their first ordinal.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self::new();
        for name in names {
            let name = name.as_ref();
            if !spec.contains(name) {
                spec.push_entry(name, None);
            }
        }
        spec
    }

    /// Creates a spec from `(signal, unit)` pairs in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateSignal`] if a signal repeats.
    pub fn with_units<I, S, U>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Option<U>)>,
        S: AsRef<str>,
        U: AsRef<str>,
    {
        let mut spec = Self::new();
        for (signal, unit) in pairs {
            spec.add_element(signal.as_ref(), unit.as_ref().map(AsRef::as_ref))?;
        }
        Ok(spec)
    }

    /// Appends a signal at the next free ordinal and returns that ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::DuplicateSignal`] if the signal already exists.
    pub fn add_element(&mut self, signal: &str, unit: Option<&str>) -> Result<usize> {
        if self.index.contains_key(signal) {
            return Err(SpecError::DuplicateSignal {
                signal: signal.to_string(),
            }
            .into());
        }
        Ok(self.push_entry(signal, unit))
    }

    /// Appends an entry the caller has checked is absent.
    fn push_entry(&mut self, signal: &str, unit: Option<&str>) -> usize {
        let ordinal = self.entries.len();
        self.entries.push(SpecEntry {
            signal: signal.to_string(),
            unit: normalize(unit).map(str::to_string),
        });
        self.index.insert(signal.to_string(), ordinal);
        ordinal
    }

    /// Overwrites the unit of an existing signal, keeping its ordinal.
    ///
    /// This is an explicit override and bypasses the resolve-once rule;
    /// use [`resolve_unit`](Self::resolve_unit) for data-driven updates.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is absent.
    pub fn set_unit(&mut self, signal: &str, unit: Option<&str>) -> Result<()> {
        let ordinal = self.ordinal(signal)?;
        self.entries[ordinal].unit = normalize(unit).map(str::to_string);
        Ok(())
    }

    /// Resolves the unit of a signal at most once.
    ///
    /// An unset unit adopts `unit`; a resolved unit must equal it. An empty
    /// `unit` asserts nothing and always succeeds.
    ///
    /// # Errors
    ///
    /// - [`SpecError::UnknownSignal`] if the signal is absent.
    /// - [`SpecError::UnitConflict`] if a different unit is already resolved.
    pub fn resolve_unit(&mut self, signal: &str, unit: &str) -> Result<()> {
        let ordinal = self.ordinal(signal)?;
        let Some(incoming) = normalize(Some(unit)) else {
            return Ok(());
        };

        let entry = &mut self.entries[ordinal];
        match &entry.unit {
            None => entry.unit = Some(incoming.to_string()),
            Some(existing) if existing == incoming => {}
            Some(existing) => {
                return Err(SpecError::UnitConflict {
                    signal: signal.to_string(),
                    existing: existing.clone(),
                    incoming: incoming.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Reconciles units with a peer spec.
    ///
    /// For every signal present in both specs: an unset unit here adopts the
    /// peer's, and two set units must be equal. Signals only present on one
    /// side are ignored. The check is all-or-nothing: on conflict no unit of
    /// `self` has been changed.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnitConflict`] on the first disagreeing signal.
    pub fn check_units(&mut self, other: &DataItemSpec) -> Result<()> {
        for (ordinal, unit) in self.units_to_adopt(other)? {
            self.entries[ordinal].unit = Some(unit);
        }
        Ok(())
    }

    /// Validates units against a peer spec without changing anything.
    ///
    /// Returns `true` if [`check_units`](Self::check_units) would adopt at
    /// least one unit from `other`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnitConflict`] on the first disagreeing signal.
    pub fn verify_units(&self, other: &DataItemSpec) -> Result<bool> {
        Ok(!self.units_to_adopt(other)?.is_empty())
    }

    /// Collects `(ordinal, unit)` pairs this spec would adopt from `other`.
    fn units_to_adopt(&self, other: &DataItemSpec) -> Result<Vec<(usize, String)>> {
        let mut adopted = Vec::new();

        for (ordinal, entry) in self.entries.iter().enumerate() {
            let Some(&other_ordinal) = other.index.get(&entry.signal) else {
                continue;
            };
            let Some(other_unit) = other.entries[other_ordinal].unit.as_deref() else {
                continue;
            };

            match entry.unit.as_deref() {
                None => adopted.push((ordinal, other_unit.to_string())),
                Some(unit) if unit == other_unit => {}
                Some(unit) => {
                    return Err(SpecError::UnitConflict {
                        signal: entry.signal.clone(),
                        existing: unit.to_string(),
                        incoming: other_unit.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(adopted)
    }

    /// Returns `(unit, ordinal)` for a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`], listing the known signals, if
    /// the signal is absent. This is never defaulted.
    pub fn get_element(&self, signal: &str) -> Result<(Option<&str>, usize)> {
        let ordinal = self.ordinal(signal)?;
        Ok((self.entries[ordinal].unit.as_deref(), ordinal))
    }

    /// Returns the ordinal of a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is absent.
    pub fn ordinal(&self, signal: &str) -> Result<usize> {
        self.index.get(signal).copied().ok_or_else(|| {
            SpecError::UnknownSignal {
                signal: signal.to_string(),
                known: self.signals().map(str::to_string).collect(),
            }
            .into()
        })
    }

    /// Returns the unit of a signal, `None` if not yet resolved.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::UnknownSignal`] if the signal is absent.
    pub fn unit(&self, signal: &str) -> Result<Option<&str>> {
        self.get_element(signal).map(|(unit, _)| unit)
    }

    /// Returns the unit at an ordinal.
    pub(crate) fn unit_at(&self, ordinal: usize) -> Option<&str> {
        self.entries.get(ordinal).and_then(|e| e.unit.as_deref())
    }

    /// Returns whether the spec contains a signal.
    pub fn contains(&self, signal: &str) -> bool {
        self.index.contains_key(signal)
    }

    /// Iterates over signal names in ordinal order.
    pub fn signals(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.signal.as_str())
    }

    /// Returns the number of signals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the spec has no signals.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

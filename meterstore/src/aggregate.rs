//! Time-range averaging with optional sub-sample shift.
//!
//! [`average`] reduces the items of a time range to one item stamped at
//! the midpoint of the range. Each selected signal is averaged
//! independently over its present values, so signals with different
//! missingness do not dilute each other.
//!
//! One signal may be *shifted*: instead of its value at index `i`, the
//! average uses a linear interpolation between indices `i + s` and
//! `i + s + 1`, where `s` and `f` are the integer and fractional parts of
//! the shift in samples:
//!
//! ```text
//! v'(i) = (1 - f) * v(i + s) + f * v(i + s + 1)
//! ```
//!
//! This compensates the latency between two instruments sampled on
//! different clocks. Interpolation reads must stay inside `[1, len - 2]`;
//! indices whose reads fall outside, or hit an absent value, are skipped.

use std::sync::Arc;

use crate::backing::Backing;
use crate::error::{QueryError, Result};
use crate::item::DataItem;
use crate::ordering::Ordering;
use crate::spec::DataItemSpec;

/// A signal to resample by a fractional number of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftSpec {
    signal: String,
    shift_in_samples: f64,
}

impl ShiftSpec {
    /// Creates a shift of `shift_in_samples` for `signal`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidShift`] if the shift is not finite.
    pub fn new(signal: impl Into<String>, shift_in_samples: f64) -> Result<Self> {
        if !shift_in_samples.is_finite() {
            return Err(QueryError::InvalidShift {
                reason: format!("shift must be finite, got {shift_in_samples}"),
            }
            .into());
        }
        Ok(Self {
            signal: signal.into(),
            shift_in_samples,
        })
    }

    /// Returns the shifted signal.
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Returns the shift in samples.
    pub fn shift_in_samples(&self) -> f64 {
        self.shift_in_samples
    }

    /// Splits the shift into its floor and the fractional remainder.
    #[allow(clippy::cast_possible_truncation)] // shifts are a handful of samples
    fn split(&self) -> (isize, f64) {
        let whole = self.shift_in_samples.floor();
        (whole as isize, self.shift_in_samples - whole)
    }
}

/// Averages `signals` over the items with timestamps in `[from, to]`.
///
/// The result is stamped `(from + to) / 2` and carries only `signals`, with
/// the units of `spec`. A signal without any present value averages to
/// `0.0`; an empty storage yields `0.0` for every signal.
///
/// # Errors
///
/// - [`QueryError::InvalidTimeRange`] if `from > to` or either is NaN.
/// - [`SpecError::UnknownSignal`](crate::error::SpecError::UnknownSignal)
///   if a signal is not in `spec`.
/// - Search errors from [`Ordering::index_from_time`].
#[allow(clippy::cast_precision_loss)] // sample counts stay far below 2^52
pub fn average(
    ordering: &dyn Ordering,
    backing: &dyn Backing,
    spec: &DataItemSpec,
    from: f64,
    to: f64,
    signals: &[String],
    shift: Option<&ShiftSpec>,
) -> Result<DataItem> {
    if from.is_nan() || to.is_nan() || from > to {
        return Err(QueryError::InvalidTimeRange { from, to }.into());
    }

    let mut result_spec = DataItemSpec::new();
    let mut ordinals = Vec::with_capacity(signals.len());
    for signal in signals {
        let (unit, ordinal) = spec.get_element(signal)?;
        result_spec.add_element(signal, unit)?;
        ordinals.push(ordinal);
    }
    let mut result = DataItem::new(Arc::new(result_spec), Some(0.5 * (from + to)));

    let len = backing.length();
    let indexes: Vec<usize> = match (
        ordering.index_from_time(backing, from)?,
        ordering.index_from_time(backing, to)?,
    ) {
        (Some(first), Some(last)) => ordering.timed_indexes(len, first, last).collect(),
        _ => Vec::new(),
    };

    for (signal, &ordinal) in signals.iter().zip(&ordinals) {
        let mut sum = 0.0;
        let mut count = 0usize;

        match shift.filter(|s| s.signal() == signal.as_str()) {
            Some(shift) => {
                let (whole, fraction) = shift.split();
                for &index in &indexes {
                    let Some(j) = index.checked_add_signed(whole) else {
                        continue;
                    };
                    if j == 0 || j + 3 > len {
                        continue;
                    }
                    if let (Some(a), Some(b)) = (backing.value(j, ordinal)?, backing.value(j + 1, ordinal)?) {
                        sum += (1.0 - fraction) * a + fraction * b;
                        count += 1;
                    }
                }
            }
            None => {
                for &index in &indexes {
                    if let Some(value) = backing.value(index, ordinal)? {
                        sum += value;
                        count += 1;
                    }
                }
            }
        }

        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        result.set_value(signal, mean)?;
    }

    tracing::debug!(from, to, samples = indexes.len(), "averaged time range");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemBacking;
    use crate::error::{MeterStoreError, SpecError};
    use crate::ordering::{Circular, Linear};

    const EPS: f64 = 1e-12;

    fn signals(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    /// Capacity-10 ring holding 13 items at t = 0..12, A = t.
    fn wrapped_ring() -> (Circular, MemBacking, Arc<DataItemSpec>) {
        let mut spec = DataItemSpec::from_names(["A", "B"]);
        spec.set_unit("A", Some("kWh")).unwrap();
        let spec = Arc::new(spec);

        let mut ring = Circular::new(10).unwrap();
        let mut backing = MemBacking::new();
        for i in 0..13u32 {
            let t = f64::from(i);
            let mut item = DataItem::new(Arc::clone(&spec), Some(t));
            item.set_value("A", t).unwrap();
            ring.add_data_item(&mut backing, &item, &spec).unwrap();
        }
        (ring, backing, spec)
    }

    #[test]
    fn test_average_full_window() {
        let (ring, backing, spec) = wrapped_ring();
        let result = average(&ring, &backing, &spec, 3.0, 12.0, &signals(&["A"]), None).unwrap();

        assert_eq!(result.timestamp(), Some(7.5));
        assert!((result.get_value("A").unwrap().unwrap() - 7.5).abs() < EPS);
        assert_eq!(result.spec().unit("A").unwrap(), Some("kWh"));
        assert!(!result.spec().contains("B"));
    }

    #[test]
    fn test_average_sub_window() {
        let (ring, backing, spec) = wrapped_ring();
        // t = 8..=11 straddles the wrap boundary.
        let result = average(&ring, &backing, &spec, 8.0, 11.0, &signals(&["A"]), None).unwrap();
        assert!((result.get_value("A").unwrap().unwrap() - 9.5).abs() < EPS);
    }

    #[test]
    fn test_average_absent_signal_is_zero() {
        let (ring, backing, spec) = wrapped_ring();
        let result = average(&ring, &backing, &spec, 3.0, 12.0, &signals(&["A", "B"]), None).unwrap();
        assert_eq!(result.get_value("B").unwrap(), Some(0.0));
    }

    #[test]
    fn test_average_fractional_shift() {
        let (ring, backing, spec) = wrapped_ring();
        let shift = ShiftSpec::new("A", 1.5).unwrap();
        let result =
            average(&ring, &backing, &spec, 3.0, 12.0, &signals(&["A"]), Some(&shift)).unwrap();

        // Physical layout [10, 11, 12, 3, 4, 5, 6, 7, 8, 9]; reads at j and
        // j + 1 must stay within [1, 8].
        let expected = (4.5 + 5.5 + 6.5 + 7.5 + 11.5 + 7.5 + 3.5) / 7.0;
        assert!((result.get_value("A").unwrap().unwrap() - expected).abs() < EPS);
    }

    #[test]
    fn test_integer_shift_reads_offset_values() {
        let (ring, backing, spec) = wrapped_ring();
        let shift = ShiftSpec::new("A", 1.0).unwrap();
        let result =
            average(&ring, &backing, &spec, 3.0, 12.0, &signals(&["A"]), Some(&shift)).unwrap();

        let len = backing.length();
        let shifted: Vec<f64> = ring
            .all_indexes(len)
            .map(|i| i + 1)
            .filter(|&j| j >= 1 && j + 3 <= len)
            .map(|j| backing.value(j, 0).unwrap().unwrap())
            .collect();
        let expected = shifted.iter().sum::<f64>() / 7.0;

        assert_eq!(shifted.len(), 7);
        assert!((result.get_value("A").unwrap().unwrap() - expected).abs() < EPS);
    }

    #[test]
    fn test_shift_applies_to_named_signal_only() {
        let spec = Arc::new(DataItemSpec::from_names(["A", "G"]));
        let mut linear = Linear::new();
        let mut backing = MemBacking::new();
        for i in 0..8u32 {
            let t = f64::from(i);
            let item = DataItem::from_array(&[Some(t), Some(t), Some(t * 10.0)], Arc::clone(&spec))
                .unwrap();
            linear.add_data_item(&mut backing, &item, &spec).unwrap();
        }

        let shift = ShiftSpec::new("G", -1.0).unwrap();
        let result = average(
            &linear,
            &backing,
            &spec,
            2.0,
            4.0,
            &signals(&["A", "G"]),
            Some(&shift),
        )
        .unwrap();

        assert!((result.get_value("A").unwrap().unwrap() - 3.0).abs() < EPS);
        // G read one sample earlier: 10, 20, 30.
        assert!((result.get_value("G").unwrap().unwrap() - 20.0).abs() < EPS);
    }

    #[test]
    fn test_shift_out_of_bounds_everywhere() {
        let (ring, backing, spec) = wrapped_ring();
        let shift = ShiftSpec::new("A", 50.0).unwrap();
        let result =
            average(&ring, &backing, &spec, 3.0, 12.0, &signals(&["A"]), Some(&shift)).unwrap();
        assert_eq!(result.get_value("A").unwrap(), Some(0.0));
    }

    #[test]
    fn test_independent_missingness() {
        let spec = Arc::new(DataItemSpec::from_names(["A", "B"]));
        let mut linear = Linear::new();
        let mut backing = MemBacking::new();
        let rows = [
            [Some(0.0), Some(1.0), None],
            [Some(1.0), None, Some(10.0)],
            [Some(2.0), Some(3.0), None],
            [Some(3.0), None, Some(30.0)],
        ];
        for row in rows {
            let item = DataItem::from_array(&row, Arc::clone(&spec)).unwrap();
            linear.add_data_item(&mut backing, &item, &spec).unwrap();
        }

        let result =
            average(&linear, &backing, &spec, 0.0, 3.0, &signals(&["A", "B"]), None).unwrap();
        assert_eq!(result.get_value("A").unwrap(), Some(2.0));
        assert_eq!(result.get_value("B").unwrap(), Some(20.0));
    }

    #[test]
    fn test_empty_storage() {
        let spec = DataItemSpec::from_names(["A"]);
        let result = average(
            &Linear::new(),
            &MemBacking::new(),
            &spec,
            0.0,
            10.0,
            &signals(&["A"]),
            None,
        )
        .unwrap();
        assert_eq!(result.timestamp(), Some(5.0));
        assert_eq!(result.get_value("A").unwrap(), Some(0.0));
    }

    #[test]
    fn test_invalid_requests() {
        let (ring, backing, spec) = wrapped_ring();

        assert!(matches!(
            average(&ring, &backing, &spec, 5.0, 4.0, &signals(&["A"]), None),
            Err(MeterStoreError::Query(QueryError::InvalidTimeRange { .. }))
        ));
        assert!(matches!(
            average(&ring, &backing, &spec, 3.0, 4.0, &signals(&["Z"]), None),
            Err(MeterStoreError::Spec(SpecError::UnknownSignal { .. }))
        ));
        assert!(ShiftSpec::new("A", f64::INFINITY).is_err());
    }

    #[test]
    fn test_shift_split() {
        let (whole, fraction) = ShiftSpec::new("A", 1.5).unwrap().split();
        assert_eq!((whole, fraction), (1, 0.5));
        let (whole, fraction) = ShiftSpec::new("A", -0.25).unwrap().split();
        assert_eq!((whole, fraction), (-1, 0.75));
    }
}

//! Neighbourhood outlier rejection on raw load-cell samples.
//!
//! A sample is an outlier when it lies outside the range spanned by its
//! neighbours by more than
//!
//! ```text
//! allowance = max(floor_counts, (ratio - 1) * max(|l - b|, |r - b|))
//! ```
//!
//! where `l`/`r` are the neighbours and `b` is the tare baseline. With the
//! default ratio of 3 this rejects jumps to more than three times the local
//! signal. Interior outliers are replaced by the rounded mean of their
//! neighbours; the first and last index have one neighbour and are clamped to
//! it. Buffers shorter than two samples are never corrected.
//!
//! The scan is a single left-to-right pass: the left neighbour is the already
//! corrected value, the right neighbour is still raw. Isolated spikes are
//! removed in one pass; runs of adjacent spikes are not the expected noise.
//!
//! Every correction is logged in an audit table (index → original value)
//! so the uncorrected curve can be rebuilt.

use crate::config::OutlierCfg;
use crate::fixed_point::{abs_diff_i32_u32, avg2_round_nearest_i16};

/// One corrected sample: its index and the raw value before correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlierRecord {
    pub ndx: usize,
    pub raw: i16,
}

/// Value at `ndx` before any correction recorded in `records`.
///
/// `records` must be sorted by index (as produced by `OutlierFilter`).
/// Returns `None` when `ndx` is outside `buf`.
pub fn original_value(buf: &[i16], records: &[OutlierRecord], ndx: usize) -> Option<i16> {
    let current = *buf.get(ndx)?;
    Some(
        records
            .binary_search_by_key(&ndx, |r| r.ndx)
            .map_or(current, |pos| records[pos].raw),
    )
}

#[derive(Debug, Clone)]
pub struct OutlierFilter {
    cfg: OutlierCfg,
    baseline: i16,
    /// Sorted by index; each index at most once.
    table: Vec<OutlierRecord>,
}

impl OutlierFilter {
    /// `capacity` is the buffer length; the table never grows past it.
    pub fn new(cfg: OutlierCfg, capacity: usize) -> Self {
        Self {
            cfg,
            baseline: 0,
            table: Vec::with_capacity(capacity),
        }
    }

    /// Start a new cycle: clear the audit table and set the tare baseline.
    pub fn reset(&mut self, baseline: i16) {
        self.table.clear();
        self.baseline = baseline;
    }

    pub fn baseline(&self) -> i16 {
        self.baseline
    }

    /// Scan the whole buffer once, correcting outliers in place.
    /// Returns the number of corrections made by this pass.
    pub fn remove_outliers(&mut self, buf: &mut [i16]) -> usize {
        if buf.len() < 2 {
            return 0;
        }
        let mut corrected = 0;
        for ndx in 0..buf.len() {
            if self.check_at(buf, ndx) {
                corrected += 1;
            }
        }
        corrected
    }

    /// Check a single index against its current neighbours in `buf`, correcting
    /// it in place if needed. Used to filter a buffer as it fills: after
    /// sample `n` arrives, index `n - 1` has both neighbours.
    pub fn check_at(&mut self, buf: &mut [i16], ndx: usize) -> bool {
        let Some(&v) = buf.get(ndx) else {
            return false;
        };
        let left = ndx.checked_sub(1).map(|i| buf[i]);
        let right = buf.get(ndx + 1).copied();
        let (lo, hi, replacement) = match (left, right) {
            (Some(l), Some(r)) => (l.min(r), l.max(r), avg2_round_nearest_i16(l, r)),
            (Some(n), None) | (None, Some(n)) => (n, n, n),
            (None, None) => return false,
        };

        let v32 = i32::from(v);
        let excess = if v > hi {
            abs_diff_i32_u32(v32, i32::from(hi))
        } else if v < lo {
            abs_diff_i32_u32(v32, i32::from(lo))
        } else {
            return false;
        };

        let b = i32::from(self.baseline);
        let mag = abs_diff_i32_u32(i32::from(lo), b).max(abs_diff_i32_u32(i32::from(hi), b));
        if excess as f32 <= self.allowance(mag) {
            return false;
        }

        self.record(ndx, v);
        buf[ndx] = replacement;
        tracing::debug!(ndx, raw = v, corrected = replacement, "outlier corrected");
        true
    }

    fn allowance(&self, magnitude: u32) -> f32 {
        let scaled = (self.cfg.ratio - 1.0).max(0.0) * magnitude as f32;
        scaled.max(f32::from(self.cfg.floor_counts))
    }

    fn record(&mut self, ndx: usize, raw: i16) {
        // Keep the first original: a value corrected twice is still the raw one.
        if let Err(pos) = self.table.binary_search_by_key(&ndx, |r| r.ndx) {
            self.table.insert(pos, OutlierRecord { ndx, raw });
        }
    }

    /// Raw value at `ndx` before correction, or the current value if it was
    /// never corrected. `None` when `ndx` is outside `buf`.
    pub fn original_data(&self, buf: &[i16], ndx: usize) -> Option<i16> {
        original_value(buf, &self.table, ndx)
    }

    pub fn records(&self) -> &[OutlierRecord] {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn max_outliers(&self) -> usize {
        self.cfg.max_outliers
    }
}

//! Linear raw-count → millilitre model and the sample averager used for
//! tare and reference readings.

use crate::error::{Result, UflowError};
use crate::fixed_point::round_to_i16;

/// `ml = (raw - zero_counts) / counts_per_ml`
///
/// `counts_per_ml` is the strain gauge scale reported in the summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub zero_counts: i32,
    pub counts_per_ml: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            zero_counts: 0,
            counts_per_ml: 20.0,
        }
    }
}

impl Calibration {
    pub fn new(zero_counts: i32, counts_per_ml: f32) -> Self {
        Self {
            zero_counts,
            counts_per_ml,
        }
    }

    #[inline]
    pub fn to_ml(&self, raw: i16) -> f32 {
        (i32::from(raw) - self.zero_counts) as f32 / self.counts_per_ml
    }

    #[inline]
    pub fn counts_for_ml(&self, ml: f32) -> i32 {
        self.zero_counts + (ml * self.counts_per_ml).round() as i32
    }

    /// Derive the scale from an empty reading and a reading under a known reference volume.
    pub fn from_reference(zero_counts: i32, loaded_mean: f32, reference_ml: f32) -> Result<Self> {
        if !(reference_ml.is_finite() && reference_ml > 0.0) {
            return Err(eyre::Report::new(UflowError::Config(format!(
                "reference volume must be > 0 (got {reference_ml})"
            ))));
        }
        let counts_per_ml = (loaded_mean - zero_counts as f32) / reference_ml;
        if !(counts_per_ml.is_finite() && counts_per_ml > 0.0) {
            return Err(eyre::Report::new(UflowError::Hardware(format!(
                "reference reading {loaded_mean:.1} does not exceed zero {zero_counts}"
            ))));
        }
        Ok(Self {
            zero_counts,
            counts_per_ml,
        })
    }
}

/// Running mean and min/max spread over a fixed number of raw samples.
#[derive(Debug, Clone, Default)]
pub struct TareAccumulator {
    n: usize,
    sum: i64,
    min: i16,
    max: i16,
}

impl TareAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn push(&mut self, raw: i16) {
        if self.n == 0 {
            self.min = raw;
            self.max = raw;
        } else {
            self.min = self.min.min(raw);
            self.max = self.max.max(raw);
        }
        self.sum += i64::from(raw);
        self.n += 1;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn mean(&self) -> Option<f32> {
        (self.n > 0).then(|| self.sum as f32 / self.n as f32)
    }

    /// Mean rounded to a raw count.
    pub fn mean_counts(&self) -> Option<i16> {
        self.mean().map(round_to_i16)
    }

    pub fn spread(&self) -> u16 {
        if self.n == 0 {
            0
        } else {
            self.max.abs_diff(self.min)
        }
    }
}

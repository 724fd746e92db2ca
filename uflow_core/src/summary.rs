//! The per-cycle summary record.

/// Terminal output of one measurement cycle.
///
/// Indices (`start_t`, `end_t`, `max_ndx`) are sample indices into the cycle's
/// raw buffer; multiply by the sample period for seconds. `None` means the
/// phase that fills the field has not run (or, for the peak, that no peak was
/// found).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryData {
    pub final_volume_ml: f32,
    /// Operator-read volume on the beaker scale.
    pub visual_volume_ml: Option<f32>,
    /// First index where accumulated volume reached the onset threshold.
    pub start_t: Option<usize>,
    /// First index of the sustained run below the end-of-flow threshold.
    pub end_t: Option<usize>,
    pub q_max_ml_s: Option<f32>,
    pub max_ndx: Option<usize>,
    /// Calibration scale in counts per mL.
    pub strain_gauge_scale: f32,
    pub rescale: f32,
}

impl Default for SummaryData {
    fn default() -> Self {
        Self {
            final_volume_ml: 0.0,
            visual_volume_ml: None,
            start_t: None,
            end_t: None,
            q_max_ml_s: None,
            max_ndx: None,
            strain_gauge_scale: 0.0,
            rescale: 1.0,
        }
    }
}

impl SummaryData {
    /// Seconds from onset to end of flow.
    pub fn voiding_time_s(&self, period_s: f32) -> Option<f32> {
        match (self.start_t, self.end_t) {
            (Some(s), Some(e)) if e >= s => Some((e - s) as f32 * period_s),
            _ => None,
        }
    }

    /// Seconds from onset to the peak.
    pub fn time_to_peak_s(&self, period_s: f32) -> Option<f32> {
        match (self.start_t, self.max_ndx) {
            (Some(s), Some(p)) if p >= s => Some((p - s) as f32 * period_s),
            _ => None,
        }
    }

    /// Mean flow over the voiding time.
    pub fn average_flow_ml_s(&self, period_s: f32) -> Option<f32> {
        self.voiding_time_s(period_s)
            .filter(|t| *t > 0.0)
            .map(|t| self.final_volume_ml / t)
    }
}

/// Correction ratio between the operator's visual reading and the scale volume.
///
/// Readings closer than `tolerance_ml` are taken to agree (ratio 1.0).
pub fn rescale_for(scale_ml: f32, visual_ml: f32, tolerance_ml: f32) -> f32 {
    if (scale_ml - visual_ml).abs() < tolerance_ml || scale_ml <= 0.0 {
        1.0
    } else {
        visual_ml / scale_ml
    }
}

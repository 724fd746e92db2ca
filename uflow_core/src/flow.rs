//! Volume → flow derivation.

use std::collections::VecDeque;

use crate::calibration::Calibration;
use crate::outlier::{OutlierRecord, original_value};

/// Streaming backward difference over the last `window` sample periods.
///
/// Until the window fills, the difference spans the samples seen so far; the
/// first sample yields zero flow.
#[derive(Debug, Clone)]
pub struct FlowEstimator {
    window: usize,
    period_s: f32,
    hist: VecDeque<f32>,
}

impl FlowEstimator {
    pub fn new(window: usize, period_s: f32) -> Self {
        let window = window.max(1);
        Self {
            window,
            period_s,
            hist: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn reset(&mut self) {
        self.hist.clear();
    }

    /// Push the volume of the next sample and return the flow at it (mL/s).
    pub fn push(&mut self, volume_ml: f32) -> f32 {
        if self.hist.len() == self.window + 1 {
            self.hist.pop_front();
        }
        self.hist.push_back(volume_ml);
        let span = self.hist.len() - 1;
        match (self.hist.front(), span) {
            (Some(oldest), s) if s > 0 => (volume_ml - oldest) / (s as f32 * self.period_s),
            _ => 0.0,
        }
    }
}

/// One row of the session report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub t_s: f32,
    /// Volume from the corrected buffer.
    pub volume_ml: f32,
    /// Volume from the buffer as sampled, before outlier correction.
    pub raw_volume_ml: f32,
    pub flow_ml_s: f32,
}

/// Rebuild the volume and flow curve of a completed cycle.
pub fn curve(
    samples: &[i16],
    outliers: &[OutlierRecord],
    calibration: &Calibration,
    period_s: f32,
    slope_window: usize,
) -> Vec<CurvePoint> {
    let mut est = FlowEstimator::new(slope_window, period_s);
    samples
        .iter()
        .enumerate()
        .map(|(ndx, &raw)| {
            let volume_ml = calibration.to_ml(raw);
            let original = original_value(samples, outliers, ndx).unwrap_or(raw);
            CurvePoint {
                t_s: ndx as f32 * period_s,
                volume_ml,
                raw_volume_ml: calibration.to_ml(original),
                flow_ml_s: est.push(volume_ml),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_slope_gives_constant_flow() {
        let mut est = FlowEstimator::new(3, 0.1);
        assert_eq!(est.push(0.0), 0.0);
        for i in 1..10 {
            let f = est.push(i as f32 * 0.5);
            assert!((f - 5.0).abs() < 1e-4, "flow {f} at {i}");
        }
    }

    #[test]
    fn window_forgets_old_samples() {
        let mut est = FlowEstimator::new(2, 1.0);
        est.push(0.0);
        est.push(10.0);
        est.push(20.0);
        // only the last two periods count: (20 - 20) / 2
        est.push(20.0);
        let f = est.push(20.0);
        assert_eq!(f, 0.0);
    }

    #[test]
    fn curve_reports_uncorrected_volume() {
        let cal = Calibration::new(0, 10.0);
        let samples = [0, 10, 20];
        let outliers = [OutlierRecord { ndx: 1, raw: 500 }];
        let pts = curve(&samples, &outliers, &cal, 0.1, 1);
        assert_eq!(pts.len(), 3);
        assert!((pts[1].volume_ml - 1.0).abs() < 1e-6);
        assert!((pts[1].raw_volume_ml - 50.0).abs() < 1e-6);
        assert!((pts[2].flow_ml_s - 10.0).abs() < 1e-4);
        assert!((pts[2].t_s - 0.2).abs() < 1e-6);
    }
}

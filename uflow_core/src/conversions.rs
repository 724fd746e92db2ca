//! `From` implementations bridging `uflow_config` types to `uflow_core` types.

use crate::config::{
    CalibrationCfg, FlowCfg, MachineCfg, OutlierCfg, SafetyCfg, SamplingCfg, Timeouts,
    VolumeCheckCfg,
};

// ── SamplingCfg ──────────────────────────────────────────────────────────────

impl From<&uflow_config::Sampling> for SamplingCfg {
    fn from(c: &uflow_config::Sampling) -> Self {
        Self {
            sample_rate_hz: c.sample_rate_hz,
            buffer_len: c.buffer_len,
        }
    }
}

// ── OutlierCfg ───────────────────────────────────────────────────────────────

impl From<&uflow_config::OutlierCfg> for OutlierCfg {
    fn from(c: &uflow_config::OutlierCfg) -> Self {
        Self {
            ratio: c.ratio,
            floor_counts: c.floor_counts,
            max_outliers: c.max_outliers,
        }
    }
}

// ── FlowCfg ──────────────────────────────────────────────────────────────────

impl From<&uflow_config::FlowCfg> for FlowCfg {
    fn from(c: &uflow_config::FlowCfg) -> Self {
        Self {
            onset_ml: c.onset_ml,
            end_flow_ml_s: c.end_flow_ml_s,
            slope_window: c.slope_window,
            settle_samples: c.settle_samples,
        }
    }
}

impl From<&uflow_config::VolumeCheckCfg> for VolumeCheckCfg {
    fn from(c: &uflow_config::VolumeCheckCfg) -> Self {
        Self {
            tolerance_ml: c.tolerance_ml,
        }
    }
}

// ── CalibrationCfg ───────────────────────────────────────────────────────────

impl From<&uflow_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &uflow_config::CalibrationCfg) -> Self {
        Self {
            default_counts_per_ml: c.counts_per_ml,
            tare_samples: c.tare_samples,
            max_tare_spread: c.max_tare_spread,
            reference_ml: c.reference_ml,
            recal_every_cycles: c.recal_every_cycles,
        }
    }
}

// ── Timeouts / Safety ────────────────────────────────────────────────────────

impl From<&uflow_config::Timeouts> for Timeouts {
    fn from(c: &uflow_config::Timeouts) -> Self {
        Self {
            sensor_ms: c.sensor_ms,
            onset_ms: c.onset_ms,
            calibration_ms: c.calibration_ms,
            connect_ms: c.connect_ms,
        }
    }
}

impl From<&uflow_config::Safety> for SafetyCfg {
    fn from(c: &uflow_config::Safety) -> Self {
        Self {
            retry_budget: c.retry_budget,
            power_off_after_xfer: c.power_off_after_xfer,
        }
    }
}

// ── MachineCfg ───────────────────────────────────────────────────────────────

impl From<&uflow_config::Config> for MachineCfg {
    fn from(c: &uflow_config::Config) -> Self {
        let mut calibration = CalibrationCfg::from(&c.calibration);
        // A persisted scale overrides the configured default.
        if let Some(p) = c.persisted {
            calibration.default_counts_per_ml = p.counts_per_ml;
        }
        Self {
            sampling: SamplingCfg::from(&c.sampling),
            outlier: OutlierCfg::from(&c.outlier),
            flow: FlowCfg::from(&c.flow),
            volume_check: VolumeCheckCfg::from(&c.volume_check),
            calibration,
            timeouts: Timeouts::from(&c.timeouts),
            safety: SafetyCfg::from(&c.safety),
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl From<&uflow_config::Calibration> for crate::calibration::Calibration {
    fn from(c: &uflow_config::Calibration) -> Self {
        Self {
            zero_counts: c.zero_counts,
            counts_per_ml: c.counts_per_ml,
        }
    }
}

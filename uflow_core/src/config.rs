//! Runtime configuration for the measurement machine.
//!
//! These are the structs the core actually runs on. They are separate from
//! the TOML-deserialized config in `uflow_config`; see `conversions`.

/// Sampling and buffer sizing.
#[derive(Debug, Clone)]
pub struct SamplingCfg {
    /// ADC conversion rate; the control loop ticks at the same rate.
    pub sample_rate_hz: u32,
    /// Capacity of the raw sample buffer for one cycle.
    pub buffer_len: usize,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            buffer_len: 1800,
        }
    }
}

/// Outlier filter tolerance.
#[derive(Debug, Clone)]
pub struct OutlierCfg {
    /// A sample may reach `ratio` times its neighbourhood magnitude (above the
    /// tare baseline) before it is corrected.
    pub ratio: f32,
    /// Minimum allowance in counts, so small noise near the baseline is kept.
    pub floor_counts: u16,
    /// Corrections above this count make the cycle a data fault.
    pub max_outliers: usize,
}

impl Default for OutlierCfg {
    fn default() -> Self {
        Self {
            ratio: 3.0,
            floor_counts: 8,
            max_outliers: 20,
        }
    }
}

/// Flow derivation, onset and end-of-flow detection.
#[derive(Debug, Clone)]
pub struct FlowCfg {
    pub onset_ml: f32,
    pub end_flow_ml_s: f32,
    pub slope_window: usize,
    pub settle_samples: usize,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            onset_ml: 10.0,
            end_flow_ml_s: 2.0,
            slope_window: 3,
            settle_samples: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeCheckCfg {
    pub tolerance_ml: f32,
}

impl Default for VolumeCheckCfg {
    fn default() -> Self {
        Self { tolerance_ml: 5.0 }
    }
}

/// Tare and recalibration parameters.
#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    /// Scale used when the store has nothing (counts per mL).
    pub default_counts_per_ml: f32,
    pub tare_samples: usize,
    pub max_tare_spread: u16,
    /// Reference volume for scheduled recalibration.
    pub reference_ml: f32,
    /// 0 disables scheduled recalibration.
    pub recal_every_cycles: u32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            default_counts_per_ml: 20.0,
            tare_samples: 10,
            max_tare_spread: 40,
            reference_ml: 500.0,
            recal_every_cycles: 0,
        }
    }
}

/// Bounds on every wait the machine performs.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Max gap between samples in states that consume them (ms).
    pub sensor_ms: u64,
    pub onset_ms: u64,
    pub calibration_ms: u64,
    pub connect_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sensor_ms: 1_000,
            onset_ms: 120_000,
            calibration_ms: 300_000,
            connect_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyCfg {
    /// Acknowledged retries before ERROR_STATE powers down.
    pub retry_budget: u32,
    pub power_off_after_xfer: bool,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            power_off_after_xfer: false,
        }
    }
}

/// Everything the machine needs, grouped by concern.
#[derive(Debug, Clone, Default)]
pub struct MachineCfg {
    pub sampling: SamplingCfg,
    pub outlier: OutlierCfg,
    pub flow: FlowCfg,
    pub volume_check: VolumeCheckCfg,
    pub calibration: CalibrationCfg,
    pub timeouts: Timeouts,
    pub safety: SafetyCfg,
}

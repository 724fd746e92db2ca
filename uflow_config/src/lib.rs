#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the uroflowmeter.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration CSV loader enforces headers and performs a robust refit
//!   to reduce outlier influence before slope/intercept estimation.
use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// raw,ml
///
/// Example:
/// raw,ml
/// 1200,0.0
/// 11200,500.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub raw: i64,
    pub ml: f32,
}

#[derive(Debug, Deserialize)]
pub struct Sampling {
    /// ADC conversion rate; one sample is consumed per control tick.
    pub sample_rate_hz: u32,
    /// Capacity of the per-cycle raw sample buffer.
    #[serde(default = "default_buffer_len")]
    pub buffer_len: usize,
}

fn default_buffer_len() -> usize {
    1800
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutlierCfg {
    /// Multiple of the neighbourhood magnitude a sample may reach before it is corrected.
    pub ratio: f32,
    /// Absolute allowance in counts, so noise around zero is left alone.
    pub floor_counts: u16,
    /// More corrections than this in one cycle marks the buffer unreliable.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlowCfg {
    /// Accumulated volume that marks the start of the measurement (startT).
    pub onset_ml: f32,
    /// Flow below this is "flow stopped" (endT, peak finalization).
    pub end_flow_ml_s: f32,
    /// Backward-difference span of the flow estimate, in samples.
    pub slope_window: usize,
    /// Consecutive samples needed before a threshold crossing counts.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VolumeCheckCfg {
    /// Scale and visual volumes closer than this need no rescale.
    pub tolerance_ml: f32,
}

impl Default for VolumeCheckCfg {
    fn default() -> Self {
        Self { tolerance_ml: 5.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Strain gauge scale used until a calibration is stored (counts per mL).
    pub counts_per_ml: f32,
    /// Samples averaged for a tare or a reference reading.
    pub tare_samples: usize,
    /// Max min/max spread (counts) accepted while averaging.
    pub max_tare_spread: u16,
    /// Reference volume used by scheduled recalibration.
    pub reference_ml: f32,
    /// Recalibrate after this many completed cycles (0 disables).
    pub recal_every_cycles: u32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            counts_per_ml: 20.0,
            tare_samples: 10,
            max_tare_spread: 40,
            reference_ml: 500.0,
            recal_every_cycles: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Max gap between samples in states that consume them. Also accepts "sample_ms".
    #[serde(alias = "sample_ms")]
    pub sensor_ms: u64,
    /// Max wait in WAIT_FOR_10ML.
    pub onset_ms: u64,
    /// Max wait in WAIT_FOR_CAL.
    pub calibration_ms: u64,
    /// Max wait in WIFI_CONNECT.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Safety {
    /// Operator retries from ERROR_STATE before the fault is treated as fatal.
    pub retry_budget: u32,
    /// Power down after a successful transfer instead of returning to STANDBY.
    pub power_off_after_xfer: bool,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            power_off_after_xfer: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters of the simulated scale used when no hardware is attached.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Simulation {
    /// Raw counts with an empty beaker.
    pub zero_counts: i16,
    /// Seconds between the voiding prompt and first flow.
    pub delay_s: f32,
    /// Length of the simulated void.
    pub duration_s: f32,
    /// Peak flow of the simulated void.
    pub peak_flow_ml_s: f32,
    /// Inject a single-sample spike every N samples (0 disables).
    pub spike_every: u32,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            zero_counts: 1_200,
            delay_s: 1.0,
            duration_s: 25.0,
            peak_flow_ml_s: 22.0,
            spike_every: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub sampling: Sampling,
    #[serde(default)]
    pub outlier: OutlierCfg,
    #[serde(default)]
    pub flow: FlowCfg,
    #[serde(default)]
    pub volume_check: VolumeCheckCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub simulation: Simulation,
    /// Optional persisted calibration; preferred at runtime over the default scale.
    #[serde(default)]
    pub persisted: Option<PersistedCalibration>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PersistedCalibration {
    /// Strain gauge scale in counts per mL.
    pub counts_per_ml: f32,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Result of fitting calibration rows: counts = counts_per_ml * ml + zero_counts.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub zero_counts: i32,
    pub counts_per_ml: f32,
}

impl Calibration {
    /// Build Calibration from calibration rows using ordinary least squares on all points.
    /// Fits counts = a*ml + b; `a` is the strain gauge scale and `b` the empty-beaker reading.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }

        // Reference volumes must be strictly increasing or strictly decreasing
        let mut dir: i8 = 0;
        for i in 1..rows.len() {
            let d = rows[i].ml - rows[i - 1].ml;
            if d == 0.0 {
                eyre::bail!(
                    "calibration rows have duplicate ml values at index {} and {}",
                    i - 1,
                    i
                );
            }
            let step_dir = if d > 0.0 { 1 } else { -1 };
            if dir == 0 {
                dir = step_dir;
            } else if dir != step_dir {
                eyre::bail!(
                    "calibration ml values must be monotonic (strictly increasing or strictly decreasing)"
                );
            }
        }

        // x = reference mL, y = raw counts
        let pts: Vec<(f64, f64)> = rows
            .iter()
            .map(|r| (f64::from(r.ml), r.raw as f64))
            .collect();
        let (a0, b0) = fit(&pts)?;
        let mut sumsq: f64 = 0.0;
        for (x, y) in &pts {
            let r = y - (a0 * x + b0);
            sumsq += r * r;
        }
        let rms = (sumsq / (pts.len() as f64)).sqrt();

        // Reject outliers with |residual| > 2σ and refit if at least 2 remain.
        let (a, b) = robust_refit(&pts, a0, b0, rms, 2.0).unwrap_or((a0, b0));
        let counts_per_ml = a as f32;
        if !(counts_per_ml.is_finite() && counts_per_ml > 0.0) {
            eyre::bail!("calibration produced a non-positive scale ({a:.4} counts/mL)");
        }
        if !b.is_finite() || b.abs() > f64::from(i32::MAX) {
            eyre::bail!("calibration produced invalid zero offset");
        }

        Ok(Calibration {
            zero_counts: b.round() as i32,
            counts_per_ml,
        })
    }
}

/// OLS fit in f64 for numerical stability.
fn fit(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (px, py) in pts {
        let x = px - mean_x;
        let y = py - mean_y;
        sxx += x * x;
        sxy += x * y;
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (degenerate X variance)");
    }
    let a = sxy / sxx;
    if !a.is_finite() {
        eyre::bail!("calibration produced non-finite slope");
    }
    if a == 0.0 {
        eyre::bail!("calibration produced zero slope (invalid scale factor)");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Perform a single-step robust refit by rejecting outliers defined by |residual| > k * rms
/// around the initial line y = a0*x + b0. Uses an online (Welford/Chan) covariance update
/// over inliers only. Returns None when refit is not applicable (non-finite/zero rms,
/// <2 inliers, nothing rejected, or degenerate variance); the caller keeps (a0, b0).
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0 && k.is_finite() && k > 0.0) {
        return None;
    }
    let thr = k * rms;
    let mut n_in: usize = 0;
    let mut mean_x = 0.0f64;
    let mut mean_y = 0.0f64;
    let mut cxx = 0.0f64;
    let mut cxy = 0.0f64;

    for (x, y) in pts {
        let r = y - (a0 * x + b0);
        if r.abs() <= thr {
            n_in += 1;
            let n_new = n_in as f64;
            let dx = x - mean_x;
            let dy = y - mean_y;
            let mean_x_new = mean_x + dx / n_new;
            let mean_y_new = mean_y + dy / n_new;
            // Chan's update for covariance terms
            cxx += dx * (x - mean_x_new);
            cxy += dx * (y - mean_y_new);
            mean_x = mean_x_new;
            mean_y = mean_y_new;
        }
    }

    if n_in >= 2 && n_in < pts.len() {
        if !cxx.is_finite() || cxx == 0.0 {
            return None;
        }
        let a = cxy / cxx;
        if !a.is_finite() || a == 0.0 {
            return None;
        }
        Some((a, mean_y - a * mean_x))
    } else {
        None
    }
}

impl TryFrom<Vec<CalibrationRow>> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl TryFrom<&[CalibrationRow]> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: &[CalibrationRow]) -> Result<Self, Self::Error> {
        Self::from_rows(rows.to_vec())
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Calibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["raw", "ml"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'raw,ml', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Calibration::try_from(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sampling
        if self.sampling.sample_rate_hz == 0 {
            eyre::bail!("sampling.sample_rate_hz must be > 0");
        }
        if self.sampling.sample_rate_hz > 1_000 {
            eyre::bail!("sampling.sample_rate_hz must be <= 1000");
        }
        if self.sampling.buffer_len < 2 {
            eyre::bail!("sampling.buffer_len must be >= 2");
        }
        if self.sampling.buffer_len > usize::from(u16::MAX) {
            eyre::bail!("sampling.buffer_len must be <= 65535");
        }

        // Outlier filter
        if !(self.outlier.ratio.is_finite() && self.outlier.ratio >= 1.0) {
            eyre::bail!("outlier.ratio must be finite and >= 1.0");
        }
        if self.outlier.max_outliers == 0 {
            eyre::bail!("outlier.max_outliers must be >= 1");
        }

        // Flow
        if !(self.flow.onset_ml.is_finite() && self.flow.onset_ml > 0.0) {
            eyre::bail!("flow.onset_ml must be > 0");
        }
        if !(self.flow.end_flow_ml_s.is_finite() && self.flow.end_flow_ml_s > 0.0) {
            eyre::bail!("flow.end_flow_ml_s must be > 0");
        }
        if self.flow.slope_window == 0 {
            eyre::bail!("flow.slope_window must be >= 1");
        }
        if self.flow.settle_samples == 0 {
            eyre::bail!("flow.settle_samples must be >= 1");
        }

        // Volume check
        if !(self.volume_check.tolerance_ml.is_finite() && self.volume_check.tolerance_ml >= 0.0)
        {
            eyre::bail!("volume_check.tolerance_ml must be >= 0");
        }

        // Calibration
        if !(self.calibration.counts_per_ml.is_finite() && self.calibration.counts_per_ml > 0.0) {
            eyre::bail!("calibration.counts_per_ml must be > 0");
        }
        if self.calibration.tare_samples == 0 {
            eyre::bail!("calibration.tare_samples must be >= 1");
        }
        if !(self.calibration.reference_ml.is_finite() && self.calibration.reference_ml > 0.0) {
            eyre::bail!("calibration.reference_ml must be > 0");
        }
        if let Some(p) = self.persisted
            && !(p.counts_per_ml.is_finite() && p.counts_per_ml > 0.0)
        {
            eyre::bail!("persisted.counts_per_ml must be > 0");
        }

        // Timeouts
        if self.timeouts.sensor_ms == 0 {
            eyre::bail!("timeouts.sensor_ms must be >= 1");
        }
        if self.timeouts.onset_ms == 0 {
            eyre::bail!("timeouts.onset_ms must be >= 1");
        }
        if self.timeouts.calibration_ms == 0 {
            eyre::bail!("timeouts.calibration_ms must be >= 1");
        }
        if self.timeouts.connect_ms == 0 {
            eyre::bail!("timeouts.connect_ms must be >= 1");
        }
        if self.timeouts.onset_ms > 24 * 60 * 60 * 1000 {
            eyre::bail!("timeouts.onset_ms is unreasonably large (>24h)");
        }

        // Simulation
        if !(self.simulation.duration_s.is_finite() && self.simulation.duration_s > 0.0) {
            eyre::bail!("simulation.duration_s must be > 0");
        }
        if !(self.simulation.delay_s.is_finite() && self.simulation.delay_s >= 0.0) {
            eyre::bail!("simulation.delay_s must be >= 0");
        }
        if !(self.simulation.peak_flow_ml_s.is_finite() && self.simulation.peak_flow_ml_s >= 0.0) {
            eyre::bail!("simulation.peak_flow_ml_s must be >= 0");
        }

        Ok(())
    }
}

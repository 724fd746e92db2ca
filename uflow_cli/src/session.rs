//! Machine assembly and the `measure`, `calibrate` and `replay` runs.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eyre::WrapErr;
use serde::Deserialize;
use uflow_core::error::{Report, Result as CoreResult, UflowError};
use uflow_core::{
    Calibration, Fault, FaultReason, MachineCfg, MeasurementMachine, MeasurementState,
    RunOutcome, RunParams, SamplingMode, Until,
};
use uflow_hardware::{ReplayScale, SimParams, SimulatedScale};
use uflow_traits::Scale;
use uflow_traits::clock::{Clock, ManualClock, MonotonicClock};

use crate::operator::{Script, ScriptedOperator};
use crate::store::FileCalibrationStore;
use crate::transfer::JsonlTransfer;

/// Everything a run needs besides its scale and script.
pub struct Session<'a> {
    pub cfg: &'a uflow_config::Config,
    pub state_file: PathBuf,
    /// Scale fitted from a calibration CSV; used until one is persisted.
    pub seed: Option<f32>,
    pub shutdown: Arc<AtomicBool>,
}

/// What a finished run reports back to `main`.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub calibration: Calibration,
}

impl Session<'_> {
    fn machine_cfg(&self) -> MachineCfg {
        MachineCfg::from(self.cfg)
    }

    fn build(
        &self,
        operator: ScriptedOperator,
        out: Option<PathBuf>,
        clock: Box<dyn Clock + Send + Sync>,
    ) -> CoreResult<MeasurementMachine> {
        let cfg = self.machine_cfg();
        let transfer = JsonlTransfer::new(out, cfg.flow.slope_window);
        let store = FileCalibrationStore::new(self.state_file.clone()).with_seed(self.seed);
        MeasurementMachine::builder()
            .with_transfer(transfer)
            .with_operator(operator)
            .with_config(cfg)
            .with_calibration_store(store)
            .with_clock(clock)
            .build()
    }

    fn sim(&self) -> SimulatedScale {
        let scale = SimulatedScale::new(sim_params(self.cfg));
        if env_knob::<u8>("UFLOW_SIM_STALL").is_some_and(|v| v != 0) {
            tracing::warn!("simulated converter stalled");
            scale.control().set_stalled(true);
        }
        scale
    }

    fn run<S: Scale + Send + 'static>(
        &self,
        mut machine: MeasurementMachine,
        scale: S,
        params: &RunParams,
        interrupted_in: &Rc<Cell<Option<MeasurementState>>>,
    ) -> CoreResult<RunReport> {
        let outcome = uflow_core::runner::run(&mut machine, scale, params)?;
        if let Some(state) = interrupted_in.get() {
            return Err(Report::new(UflowError::Fault(Fault::new(
                FaultReason::OperatorAbort,
                state,
            ))));
        }
        Ok(RunReport {
            outcome,
            calibration: machine.calibration(),
        })
    }

    /// Run `cycles` measurement cycles on the simulated scale.
    pub fn measure(
        &self,
        visual_ml: Option<f32>,
        cycles: u32,
        direct: bool,
        virtual_time: bool,
        out: Option<PathBuf>,
    ) -> CoreResult<RunReport> {
        let scale = self.sim();
        let (operator, interrupted_in) =
            ScriptedOperator::new(Script::Measure { cycles }, self.shutdown.clone());
        let operator = operator
            .with_sim(scale.control())
            .with_visual_ml(visual_ml);
        let machine = self.build(operator, out, clock_for(virtual_time))?;

        let mode = if direct || virtual_time {
            SamplingMode::Direct
        } else {
            SamplingMode::Paced(self.cfg.sampling.sample_rate_hz)
        };
        let params = RunParams {
            mode,
            until: Until::Cycles(cycles),
            max_ticks: None,
            stop_on_fault: true,
        };
        tracing::info!(cycles, ?mode, virtual_time, "measure");
        self.run(machine, scale, &params, &interrupted_in)
    }

    /// Calibrate against `reference_ml` on the simulated scale and persist the result.
    pub fn calibrate(&self, reference_ml: f32, virtual_time: bool) -> CoreResult<RunReport> {
        if !(reference_ml.is_finite() && reference_ml > 0.0) {
            return Err(Report::new(UflowError::Config(format!(
                "reference volume must be > 0 mL, got {reference_ml}"
            ))));
        }
        let scale = self.sim();
        let (operator, interrupted_in) =
            ScriptedOperator::new(Script::Calibrate { reference_ml }, self.shutdown.clone());
        let operator = operator.with_sim(scale.control());
        let machine = self.build(operator, None, clock_for(virtual_time))?;
        let params = RunParams {
            mode: SamplingMode::Direct,
            until: Until::Calibrated,
            max_ticks: None,
            stop_on_fault: true,
        };
        tracing::info!(reference_ml, virtual_time, "calibrate");
        self.run(machine, scale, &params, &interrupted_in)
    }

    /// Feed a recorded session through one cycle in virtual time.
    pub fn replay(
        &self,
        input: &Path,
        visual_ml: Option<f32>,
        out: Option<PathBuf>,
    ) -> CoreResult<RunReport> {
        let samples = load_session_csv(input)?;
        tracing::info!(path = %input.display(), samples = samples.len(), "replay");
        let (operator, interrupted_in) =
            ScriptedOperator::new(Script::Measure { cycles: 1 }, self.shutdown.clone());
        let operator = operator.with_visual_ml(visual_ml);
        let machine = self.build(operator, out, clock_for(true))?;
        let params = RunParams {
            mode: SamplingMode::Direct,
            until: Until::Cycles(1),
            max_ticks: None,
            stop_on_fault: true,
        };
        self.run(machine, ReplayScale::new(samples), &params, &interrupted_in)
    }
}

fn clock_for(virtual_time: bool) -> Box<dyn Clock + Send + Sync> {
    if virtual_time {
        Box::new(ManualClock::new())
    } else {
        Box::new(MonotonicClock::new())
    }
}

/// Simulated scale parameters from `[simulation]`, with test knobs from the environment.
pub fn sim_params(cfg: &uflow_config::Config) -> SimParams {
    let sim = &cfg.simulation;
    let mut p = SimParams {
        zero_counts: sim.zero_counts,
        counts_per_ml: cfg.calibration.counts_per_ml,
        sample_rate_hz: cfg.sampling.sample_rate_hz,
        delay_s: sim.delay_s,
        duration_s: sim.duration_s,
        peak_flow_ml_s: sim.peak_flow_ml_s,
        spike_every: sim.spike_every,
    };
    if let Some(v) = env_knob::<u32>("UFLOW_SIM_SPIKE_EVERY") {
        p.spike_every = v;
    }
    if let Some(v) = env_knob::<f32>("UFLOW_SIM_COUNTS_PER_ML") {
        p.counts_per_ml = v;
    }
    p
}

fn env_knob<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(v) => {
            tracing::debug!(name, value = %raw, "simulation knob");
            Some(v)
        }
        Err(_) => {
            tracing::warn!(name, value = %raw, "ignoring unparsable simulation knob");
            None
        }
    }
}

/// Recorded session schema: one `raw` column of ADC counts.
#[derive(Debug, Deserialize)]
struct SessionRow {
    raw: i16,
}

pub fn load_session_csv(path: &Path) -> eyre::Result<Vec<i16>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("open session CSV {}", path.display()))?;
    let headers = rdr
        .headers()
        .wrap_err_with(|| format!("read CSV headers {}", path.display()))?;
    if !headers.iter().any(|h| h == "raw") {
        eyre::bail!(
            "session CSV must have a 'raw' column, got: {}",
            headers.iter().collect::<Vec<_>>().join(",")
        );
    }
    let mut samples = Vec::new();
    for (idx, rec) in rdr.deserialize::<SessionRow>().enumerate() {
        let row = rec.wrap_err_with(|| format!("invalid CSV row {}", idx + 2))?;
        samples.push(row.raw);
    }
    if samples.is_empty() {
        eyre::bail!("session CSV {} has no samples", path.display());
    }
    Ok(samples)
}

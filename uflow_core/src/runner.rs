use std::time::Duration;

use uflow_traits::Scale;

use crate::error::{Report, Result as CoreResult, UflowError};
use crate::fault::Fault;
use crate::machine::MeasurementMachine;
use crate::sampler::Sampler;
use crate::state::MeasurementState;
use crate::status::StepStatus;

/// How sampling should be orchestrated
#[derive(Debug, Clone, Copy)]
pub enum SamplingMode {
    /// Read inside the control loop, one `Scale::read` per tick.
    Direct,
    /// Background sampler thread at the given rate.
    Paced(u32),
}

/// When a run is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    /// Run until the machine powers off.
    PowerOff,
    /// Run until this many cycles have been transferred in total.
    Cycles(u32),
    /// Run until one more calibration has completed.
    Calibrated,
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub mode: SamplingMode,
    pub until: Until,
    /// Give up after this many ticks.
    pub max_ticks: Option<u64>,
    /// Return the first fault as an error instead of waiting for the operator.
    pub stop_on_fault: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Direct,
            until: Until::PowerOff,
            max_ticks: None,
            stop_on_fault: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub ticks: u64,
    pub final_state: MeasurementState,
    pub cycles: u32,
    pub last_fault: Option<Fault>,
}

struct Goal {
    until: Until,
    calibrations_at_start: u32,
}

impl Goal {
    fn reached(&self, m: &MeasurementMachine, status: &StepStatus) -> bool {
        if matches!(status, StepStatus::PoweredOff) {
            return true;
        }
        match self.until {
            Until::PowerOff => false,
            Until::Cycles(n) => m.cycles_completed() >= n,
            Until::Calibrated => m.calibrations_completed() > self.calibrations_at_start,
        }
    }
}

fn outcome(m: &MeasurementMachine, ticks: u64) -> RunOutcome {
    RunOutcome {
        ticks,
        final_state: m.state(),
        cycles: m.cycles_completed(),
        last_fault: m.last_fault().cloned(),
    }
}

/// Handle one step result; `Some` ends the run.
fn settle(
    m: &MeasurementMachine,
    status: StepStatus,
    goal: &Goal,
    params: &RunParams,
    ticks: u64,
) -> Option<CoreResult<RunOutcome>> {
    if let StepStatus::Faulted(fault) = &status {
        tracing::warn!(fault = %fault, "cycle faulted");
        if params.stop_on_fault {
            return Some(Err(Report::new(UflowError::Fault(fault.clone()))));
        }
    }
    if goal.reached(m, &status) {
        tracing::info!(ticks, state = %m.state(), cycles = m.cycles_completed(), "run finished");
        return Some(Ok(outcome(m, ticks)));
    }
    if params.max_ticks.is_some_and(|max| ticks >= max) {
        return Some(Err(Report::new(UflowError::TickBudget(ticks))));
    }
    None
}

/// Tick the machine at its sample rate until `params.until` is reached.
pub fn run<S>(
    machine: &mut MeasurementMachine,
    scale: S,
    params: &RunParams,
) -> CoreResult<RunOutcome>
where
    S: Scale + Send + 'static,
{
    let goal = Goal {
        until: params.until,
        calibrations_at_start: machine.calibrations_completed(),
    };
    match params.mode {
        SamplingMode::Direct => run_direct(machine, scale, params, &goal),
        SamplingMode::Paced(hz) => run_paced(machine, scale, hz, params, &goal),
    }
}

fn run_direct<S: Scale>(
    machine: &mut MeasurementMachine,
    mut scale: S,
    params: &RunParams,
    goal: &Goal,
) -> CoreResult<RunOutcome> {
    let clock = machine.clock();
    let period = crate::util::period(machine.cfg().sampling.sample_rate_hz);
    tracing::info!(mode = "direct", until = ?params.until, "run start");

    let mut ticks: u64 = 0;
    loop {
        // A read never takes longer than one tick.
        let sample = match scale.read(period) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(error = %e, "no sample this tick");
                None
            }
        };
        let status = machine.step(sample)?;
        ticks += 1;
        if let Some(done) = settle(machine, status, goal, params, ticks) {
            return done;
        }
        clock.sleep(period);
    }
}

fn run_paced<S: Scale + Send + 'static>(
    machine: &mut MeasurementMachine,
    scale: S,
    hz: u32,
    params: &RunParams,
    goal: &Goal,
) -> CoreResult<RunOutcome> {
    let clock = machine.clock();
    let timeout = Duration::from_millis(machine.cfg().timeouts.sensor_ms);
    let period = crate::util::period(hz);
    let sampler = Sampler::spawn(scale, hz, timeout, clock.clone());
    tracing::info!(mode = "paced", hz, until = ?params.until, "run start");

    let mut ticks: u64 = 0;
    loop {
        let dropped = sampler.take_dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "sampler dropped samples");
            machine.note_dropped_samples(dropped);
        }
        let sample = sampler.next();
        let status = machine.step(sample)?;
        ticks += 1;
        if let Some(done) = settle(machine, status, goal, params, ticks) {
            return done;
        }
        // Drain a backlog without sleeping; otherwise wait for the next conversion.
        if sampler.backlog() == 0 {
            clock.sleep(period / 4);
        }
    }
}

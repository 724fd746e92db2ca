//! The measurement state machine (`MeasurementMachine`).
//!
//! One `step()` per control tick. A step consumes at most one sample and
//! performs at most one state transition; every transition is checked against
//! `MeasurementState::can_transition_to`. Faults are raised as transitions into
//! ERROR_STATE carrying a `Fault`; partial cycle data is discarded so nothing
//! incomplete ever reaches XFER.

use std::sync::Arc;
use std::time::Instant;

use uflow_traits::clock::Clock;

use crate::calibration::{Calibration, TareAccumulator};
use crate::collab::{
    CalibrationStore, CycleRecord, Operator, OperatorEvent, Prompt, Transfer,
};
use crate::config::MachineCfg;
use crate::error::{Result, UflowError};
use crate::fault::{Fault, FaultReason};
use crate::flow::FlowEstimator;
use crate::outlier::{OutlierFilter, OutlierRecord};
use crate::peak::PeakQualifier;
use crate::state::MeasurementState::{self, *};
use crate::status::StepStatus;
use crate::summary::{SummaryData, rescale_for};

/// Progress through WAIT_FOR_CAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalStep {
    /// Averaging the empty scale.
    Clearing,
    /// Zero taken; waiting for the reference to be placed.
    AwaitingReference,
}

pub struct MeasurementMachine {
    pub(crate) cfg: MachineCfg,
    pub(crate) transfer: Box<dyn Transfer>,
    pub(crate) operator: Box<dyn Operator>,
    pub(crate) store: Box<dyn CalibrationStore>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    pub(crate) period_s: f32,

    state: MeasurementState,
    entered_ms: u64,
    last_sample_ms: u64,
    calibration: Calibration,
    /// Stored scale has been loaded; cleared only by a new machine.
    self_tested: bool,

    buffer: Vec<i16>,
    filter: OutlierFilter,
    flow: FlowEstimator,
    qualifier: PeakQualifier,
    summary: SummaryData,
    tare: TareAccumulator,
    record: Option<CycleRecord>,

    fault: Option<Fault>,
    last_fault: Option<Fault>,
    pending_dropped: u64,
    retries: u32,
    cycles: u32,
    cycles_since_cal: u32,
    calibrations: u32,

    cal_step: CalStep,
    cal_reference_ml: f32,
    cal_ready: bool,
}

impl core::fmt::Debug for MeasurementMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MeasurementMachine")
            .field("state", &self.state)
            .field("samples", &self.buffer.len())
            .field("outliers", &self.filter.len())
            .field("cycles", &self.cycles)
            .field("fault", &self.fault)
            .finish()
    }
}

impl MeasurementMachine {
    pub(crate) fn assemble(
        cfg: MachineCfg,
        transfer: Box<dyn Transfer>,
        operator: Box<dyn Operator>,
        store: Box<dyn CalibrationStore>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        let period_s = crate::util::period_s(cfg.sampling.sample_rate_hz);
        let buffer_len = cfg.sampling.buffer_len;
        let filter = OutlierFilter::new(cfg.outlier.clone(), buffer_len);
        let flow = FlowEstimator::new(cfg.flow.slope_window, period_s);
        let qualifier = PeakQualifier::new(cfg.flow.end_flow_ml_s, cfg.flow.settle_samples);
        let calibration = Calibration::new(0, cfg.calibration.default_counts_per_ml);
        let cal_reference_ml = cfg.calibration.reference_ml;
        Self {
            cfg,
            transfer,
            operator,
            store,
            clock,
            epoch,
            period_s,
            state: PowerOn,
            entered_ms: 0,
            last_sample_ms: 0,
            calibration,
            self_tested: false,
            buffer: Vec::with_capacity(buffer_len),
            filter,
            flow,
            qualifier,
            summary: SummaryData::default(),
            tare: TareAccumulator::new(),
            record: None,
            fault: None,
            last_fault: None,
            pending_dropped: 0,
            retries: 0,
            cycles: 0,
            cycles_since_cal: 0,
            calibrations: 0,
            cal_step: CalStep::Clearing,
            cal_reference_ml,
            cal_ready: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> MeasurementState {
        self.state
    }

    /// Summary of the cycle in progress (or the last one).
    pub fn summary(&self) -> &SummaryData {
        &self.summary
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Current fault while in ERROR_STATE.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Most recent fault, kept after it is acknowledged.
    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    pub fn cycles_completed(&self) -> u32 {
        self.cycles
    }

    pub fn calibrations_completed(&self) -> u32 {
        self.calibrations
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Raw buffer of the current cycle, corrected in place.
    pub fn buffer(&self) -> &[i16] {
        &self.buffer
    }

    pub fn outliers(&self) -> &[OutlierRecord] {
        self.filter.records()
    }

    /// Sample at `ndx` as it came from the scale, before correction.
    pub fn original_data(&self, ndx: usize) -> Option<i16> {
        self.filter.original_data(&self.buffer, ndx)
    }

    pub fn cfg(&self) -> &MachineCfg {
        &self.cfg
    }

    pub fn period_s(&self) -> f32 {
        self.period_s
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        self.clock.clone()
    }

    /// Samples were lost between the driver and the control loop. During
    /// WAIT_FOR_10ML or ACQUIRE the next step faults with a buffer overrun.
    pub fn note_dropped_samples(&mut self, n: u64) {
        self.pending_dropped = self.pending_dropped.saturating_add(n);
    }

    // ── Control loop ─────────────────────────────────────────────────────────

    /// Advance the machine by one tick, optionally with a fresh sample.
    pub fn step(&mut self, sample: Option<i16>) -> Result<StepStatus> {
        if self.state == PowerOff {
            return Err(eyre::Report::new(UflowError::State(
                "step called after POWER_OFF".into(),
            )));
        }
        let now = self.now_ms();

        let event = self.operator.poll_event();
        match event {
            Some(OperatorEvent::PowerOff) => {
                tracing::info!(state = %self.state, "power-off requested");
                return self.enter(PowerOff);
            }
            Some(OperatorEvent::Abort) if self.state != ErrorState => {
                return self.raise(FaultReason::OperatorAbort);
            }
            _ => {}
        }

        if self.pending_dropped > 0 {
            let dropped = std::mem::take(&mut self.pending_dropped);
            if matches!(self.state, WaitFor10ml | Acquire) {
                return self.raise(FaultReason::BufferOverrun { dropped });
            }
            tracing::debug!(dropped, state = %self.state, "samples dropped outside acquisition");
        }

        if self.state.consumes_samples() {
            match sample {
                Some(raw) if raw == i16::MIN || raw == i16::MAX => {
                    return self.raise(FaultReason::ImplausibleReading(raw));
                }
                Some(_) => self.last_sample_ms = now,
                None if now.saturating_sub(self.last_sample_ms) >= self.cfg.timeouts.sensor_ms => {
                    return self.raise(FaultReason::NoSample);
                }
                None => {}
            }
        }

        let elapsed = now.saturating_sub(self.entered_ms);
        match self.state {
            PowerOn => self.on_power_on(sample),
            Standby => self.on_standby(event),
            Tare => self.on_tare(sample),
            WaitFor10ml => self.on_wait_for_onset(sample, elapsed),
            Acquire => self.on_acquire(sample),
            VolumeCheck => self.on_volume_check(),
            ComputeQmax => self.on_compute_qmax(),
            WifiConnect => self.on_wifi_connect(elapsed),
            Xfer => self.on_xfer(),
            WaitForCal => self.on_wait_for_cal(sample, event, elapsed),
            RecalState => self.on_recal(sample),
            ErrorState => self.on_error(event),
            PowerOff => Ok(StepStatus::PoweredOff),
        }
    }

    // ── State handlers ───────────────────────────────────────────────────────

    fn on_power_on(&mut self, sample: Option<i16>) -> Result<StepStatus> {
        let Some(raw) = sample else {
            return Ok(StepStatus::Running);
        };
        let counts_per_ml = match self.stored_scale() {
            Ok(s) => s,
            Err(reason) => return self.raise(reason),
        };
        self.calibration = Calibration::new(i32::from(raw), counts_per_ml);
        self.self_tested = true;
        tracing::info!(counts_per_ml, first_sample = raw, "self-test passed");
        self.enter(Standby)
    }

    fn on_standby(&mut self, event: Option<OperatorEvent>) -> Result<StepStatus> {
        match event {
            Some(OperatorEvent::Start) => {
                self.begin_cycle();
                self.enter(Tare)
            }
            Some(OperatorEvent::Calibrate { reference_ml })
                if reference_ml.is_finite() && reference_ml > 0.0 =>
            {
                self.cal_reference_ml = reference_ml;
                self.enter(WaitForCal)
            }
            Some(OperatorEvent::Calibrate { reference_ml }) => {
                tracing::warn!(reference_ml, "calibration request ignored: invalid reference");
                Ok(StepStatus::Running)
            }
            _ if self.recalibration_due() => {
                tracing::info!(
                    cycles_since_cal = self.cycles_since_cal,
                    "scheduled recalibration"
                );
                self.cal_reference_ml = self.cfg.calibration.reference_ml;
                self.enter(WaitForCal)
            }
            _ => Ok(StepStatus::Running),
        }
    }

    fn on_tare(&mut self, sample: Option<i16>) -> Result<StepStatus> {
        let Some(raw) = sample else {
            return Ok(StepStatus::Running);
        };
        self.tare.push(raw);
        if self.tare.len() < self.cfg.calibration.tare_samples {
            return Ok(StepStatus::Running);
        }
        let zero = match self.settled_mean() {
            Ok(z) => z,
            Err(reason) => return self.raise(reason),
        };
        self.calibration.zero_counts = i32::from(zero);
        self.filter.reset(zero);
        tracing::info!(zero, spread = self.tare.spread(), "tare complete");
        self.enter(WaitFor10ml)
    }

    fn on_wait_for_onset(&mut self, sample: Option<i16>, elapsed: u64) -> Result<StepStatus> {
        if elapsed >= self.cfg.timeouts.onset_ms {
            return self.raise(FaultReason::OnsetTimeout);
        }
        let Some(raw) = sample else {
            return Ok(StepStatus::Running);
        };
        let fed = match self.ingest(raw) {
            Ok(fed) => fed,
            Err(reason) => return self.raise(reason),
        };
        if let Some((ndx, volume_ml, flow_ml_s)) = fed
            && volume_ml >= self.cfg.flow.onset_ml
        {
            self.summary.start_t = Some(ndx);
            self.qualifier.qualify(flow_ml_s, ndx, &mut self.summary);
            tracing::info!(start_t = ndx, volume_ml, "flow onset");
            return self.enter(Acquire);
        }
        Ok(StepStatus::Running)
    }

    fn on_acquire(&mut self, sample: Option<i16>) -> Result<StepStatus> {
        let Some(raw) = sample else {
            return Ok(StepStatus::Running);
        };
        let fed = match self.ingest(raw) {
            Ok(fed) => fed,
            Err(reason) => return self.raise(reason),
        };
        if let Some(reason) = self.outlier_budget_exceeded() {
            return self.raise(reason);
        }
        if let Some((ndx, _, flow_ml_s)) = fed
            && self.qualifier.qualify(flow_ml_s, ndx, &mut self.summary)
        {
            return self.end_acquisition();
        }
        Ok(StepStatus::Running)
    }

    fn end_acquisition(&mut self) -> Result<StepStatus> {
        let last = self.buffer.len() - 1;
        self.filter.check_at(&mut self.buffer, last);
        if let Some(reason) = self.outlier_budget_exceeded() {
            return self.raise(reason);
        }
        self.summary.end_t = self.qualifier.offset_ndx();
        self.summary.final_volume_ml = self.calibration.to_ml(self.buffer[last]);
        tracing::info!(
            end_t = ?self.summary.end_t,
            samples = self.buffer.len(),
            outliers = self.filter.len(),
            volume_ml = self.summary.final_volume_ml,
            "acquisition complete"
        );
        self.enter(VolumeCheck)
    }

    fn on_volume_check(&mut self) -> Result<StepStatus> {
        let scale_ml = self.summary.final_volume_ml;
        if !(scale_ml.is_finite() && scale_ml > 0.0) {
            return self.raise(FaultReason::ImplausibleVolume(scale_ml));
        }
        let visual = self
            .operator
            .visual_volume_ml()
            .filter(|v| v.is_finite() && *v > 0.0);
        let rescale =
            visual.map_or(1.0, |v| rescale_for(scale_ml, v, self.cfg.volume_check.tolerance_ml));
        self.summary.visual_volume_ml = visual;
        self.summary.rescale = rescale;
        self.summary.final_volume_ml = scale_ml * rescale;
        tracing::info!(scale_ml, visual_ml = ?visual, rescale, "volume check");
        self.enter(ComputeQmax)
    }

    fn on_compute_qmax(&mut self) -> Result<StepStatus> {
        if !self.qualifier.is_settled() {
            self.qualifier.finalize(&mut self.summary);
        }
        let Some(q_max) = self.summary.q_max_ml_s else {
            return self.raise(FaultReason::NoPeak);
        };
        self.summary.q_max_ml_s = Some(q_max * self.summary.rescale);
        self.summary.strain_gauge_scale = self.calibration.counts_per_ml;
        self.record = Some(CycleRecord {
            cycle: self.cycles + 1,
            summary: self.summary.clone(),
            samples: self.buffer.clone(),
            outliers: self.filter.records().to_vec(),
            calibration: self.calibration,
            period_s: self.period_s,
        });
        tracing::info!(
            q_max_ml_s = ?self.summary.q_max_ml_s,
            max_ndx = ?self.summary.max_ndx,
            "peak computed"
        );
        self.enter(WifiConnect)
    }

    fn on_wifi_connect(&mut self, elapsed: u64) -> Result<StepStatus> {
        if elapsed >= self.cfg.timeouts.connect_ms {
            return self.raise(FaultReason::ConnectTimeout);
        }
        match self.transfer.poll_connect() {
            Ok(true) => self.enter(Xfer),
            Ok(false) => Ok(StepStatus::Running),
            Err(e) => self.raise(FaultReason::TransferFailed(e.to_string())),
        }
    }

    fn on_xfer(&mut self) -> Result<StepStatus> {
        let Some(record) = self.record.take() else {
            return Err(eyre::Report::new(UflowError::State(
                "XFER entered without a completed cycle".into(),
            )));
        };
        if let Err(e) = self.transfer.send(&record) {
            return self.raise(FaultReason::TransferFailed(e.to_string()));
        }
        self.cycles += 1;
        self.cycles_since_cal += 1;
        self.retries = 0;
        tracing::info!(
            cycle = record.cycle,
            volume_ml = record.summary.final_volume_ml,
            q_max_ml_s = ?record.summary.q_max_ml_s,
            "cycle transferred"
        );
        if self.cfg.safety.power_off_after_xfer {
            self.enter(PowerOff)
        } else {
            self.enter(Standby)
        }
    }

    fn on_wait_for_cal(
        &mut self,
        sample: Option<i16>,
        event: Option<OperatorEvent>,
        elapsed: u64,
    ) -> Result<StepStatus> {
        if matches!(event, Some(OperatorEvent::CalibrationReady)) {
            self.cal_ready = true;
        }
        if elapsed >= self.cfg.timeouts.calibration_ms {
            return self.raise(FaultReason::CalibrationTimeout);
        }
        match self.cal_step {
            CalStep::Clearing => {
                if let Some(raw) = sample {
                    self.tare.push(raw);
                    if self.tare.len() >= self.cfg.calibration.tare_samples {
                        let zero = match self.settled_mean() {
                            Ok(z) => z,
                            Err(reason) => return self.raise(reason),
                        };
                        self.calibration.zero_counts = i32::from(zero);
                        self.cal_step = CalStep::AwaitingReference;
                        tracing::info!(zero, "calibration zero taken");
                        self.operator.prompt(Prompt::PlaceReference {
                            reference_ml: self.cal_reference_ml,
                        });
                    }
                }
                Ok(StepStatus::Running)
            }
            CalStep::AwaitingReference if self.cal_ready => self.enter(RecalState),
            CalStep::AwaitingReference => Ok(StepStatus::Running),
        }
    }

    fn on_recal(&mut self, sample: Option<i16>) -> Result<StepStatus> {
        let Some(raw) = sample else {
            return Ok(StepStatus::Running);
        };
        self.tare.push(raw);
        if self.tare.len() < self.cfg.calibration.tare_samples {
            return Ok(StepStatus::Running);
        }
        if let Err(reason) = self.settled_mean() {
            return self.raise(reason);
        }
        let loaded = self.tare.mean().unwrap_or_default();
        let cal = match Calibration::from_reference(
            self.calibration.zero_counts,
            loaded,
            self.cal_reference_ml,
        ) {
            Ok(c) => c,
            Err(e) => return self.raise(FaultReason::CalibrationFailed(e.to_string())),
        };
        if let Err(e) = self.store.store(cal.counts_per_ml) {
            return self.raise(FaultReason::CalibrationFailed(format!("store: {e}")));
        }
        let previous = self.calibration.counts_per_ml;
        self.calibration = cal;
        self.summary.strain_gauge_scale = cal.counts_per_ml;
        self.calibrations += 1;
        self.cycles_since_cal = 0;
        tracing::info!(
            counts_per_ml = cal.counts_per_ml,
            previous,
            reference_ml = self.cal_reference_ml,
            "recalibrated"
        );
        self.enter(Standby)
    }

    fn on_error(&mut self, event: Option<OperatorEvent>) -> Result<StepStatus> {
        if !matches!(event, Some(OperatorEvent::Acknowledge)) {
            return Ok(StepStatus::Running);
        }
        self.retries += 1;
        if self.retries > self.cfg.safety.retry_budget {
            tracing::error!(
                retries = self.retries,
                budget = self.cfg.safety.retry_budget,
                fault = ?self.fault,
                "retry budget exhausted; powering off"
            );
            return self.enter(PowerOff);
        }
        if !self.self_tested {
            // Faulted before POWERON finished: the stored scale was never read.
            match self.stored_scale() {
                Ok(counts_per_ml) => {
                    self.calibration.counts_per_ml = counts_per_ml;
                    self.self_tested = true;
                    tracing::info!(counts_per_ml, "self-test completed after fault");
                }
                Err(reason) => {
                    let fault = Fault::new(reason, self.state);
                    tracing::warn!(reason = %fault.reason, "self-test still failing");
                    self.fault = Some(fault.clone());
                    self.last_fault = Some(fault.clone());
                    self.operator.show(self.state, self.fault.as_ref());
                    return Ok(StepStatus::Faulted(fault));
                }
            }
        }
        tracing::info!(retries = self.retries, "fault acknowledged");
        self.fault = None;
        self.enter(Standby)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Persisted scale, or the default when none (or an invalid one) is stored.
    fn stored_scale(&mut self) -> std::result::Result<f32, FaultReason> {
        let default = self.cfg.calibration.default_counts_per_ml;
        match self.store.load() {
            Ok(Some(s)) if s.is_finite() && s > 0.0 => Ok(s),
            Ok(Some(s)) => {
                tracing::warn!(stored = s, default, "stored scale invalid; using default");
                Ok(default)
            }
            Ok(None) => Ok(default),
            Err(e) => Err(FaultReason::SelfTestFailed(format!(
                "calibration store: {e}"
            ))),
        }
    }

    fn recalibration_due(&self) -> bool {
        let every = self.cfg.calibration.recal_every_cycles;
        every > 0 && self.cycles_since_cal >= every
    }

    fn begin_cycle(&mut self) {
        self.buffer.clear();
        self.filter.reset(0);
        self.flow.reset();
        self.qualifier.reset();
        self.summary = SummaryData {
            strain_gauge_scale: self.calibration.counts_per_ml,
            ..SummaryData::default()
        };
        self.record = None;
        self.fault = None;
    }

    /// Mean of the accumulated tare samples, or a fault if they were not steady.
    fn settled_mean(&self) -> std::result::Result<i16, FaultReason> {
        let spread = self.tare.spread();
        if spread > self.cfg.calibration.max_tare_spread {
            return Err(FaultReason::TareUnstable { spread });
        }
        self.tare.mean_counts().ok_or(FaultReason::NoSample)
    }

    /// Append a sample, filter the index that now has both neighbours, and
    /// return `(index, volume, flow)` for it.
    fn ingest(&mut self, raw: i16) -> std::result::Result<Option<(usize, f32, f32)>, FaultReason> {
        if self.buffer.len() >= self.cfg.sampling.buffer_len {
            return Err(FaultReason::BufferOverrun { dropped: 1 });
        }
        self.buffer.push(raw);
        if self.buffer.len() < 2 {
            return Ok(None);
        }
        let ndx = self.buffer.len() - 2;
        self.filter.check_at(&mut self.buffer, ndx);
        let volume_ml = self.calibration.to_ml(self.buffer[ndx]);
        let flow_ml_s = self.flow.push(volume_ml);
        tracing::trace!(ndx, raw = self.buffer[ndx], volume_ml, flow_ml_s, "sample");
        Ok(Some((ndx, volume_ml, flow_ml_s)))
    }

    fn outlier_budget_exceeded(&self) -> Option<FaultReason> {
        let count = self.filter.len();
        let limit = self.filter.max_outliers();
        (count > limit).then_some(FaultReason::TooManyOutliers { count, limit })
    }

    fn raise(&mut self, reason: FaultReason) -> Result<StepStatus> {
        let fault = Fault::new(reason, self.state);
        tracing::warn!(
            state = %self.state,
            kind = ?fault.kind(),
            reason = %fault.reason,
            "fault"
        );
        self.record = None;
        self.fault = Some(fault.clone());
        self.last_fault = Some(fault.clone());
        self.enter(ErrorState)?;
        Ok(StepStatus::Faulted(fault))
    }

    fn enter(&mut self, next: MeasurementState) -> Result<StepStatus> {
        if !self.state.can_transition_to(next) {
            return Err(eyre::Report::new(UflowError::State(format!(
                "illegal transition {} -> {}",
                self.state, next
            ))));
        }
        let prev = std::mem::replace(&mut self.state, next);
        let now = self.now_ms();
        self.entered_ms = now;
        self.last_sample_ms = now;
        tracing::info!(from = %prev, to = %next, "state transition");

        self.operator.show(next, self.fault.as_ref());
        match next {
            Tare | RecalState => self.tare.reset(),
            WaitFor10ml => self.operator.prompt(Prompt::BeginVoiding),
            WaitForCal => {
                self.cal_step = CalStep::Clearing;
                self.cal_ready = false;
                self.tare.reset();
                self.operator.prompt(Prompt::ClearScale);
            }
            _ => {}
        }

        Ok(if next == PowerOff {
            StepStatus::PoweredOff
        } else {
            StepStatus::Transition(next)
        })
    }
}

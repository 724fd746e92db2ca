//! Fake collaborators and a tick rig shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use uflow_core::collab::{
    BoxError, CalibrationStore, CycleRecord, Operator, OperatorEvent, Prompt, Transfer,
};
use uflow_core::config::MachineCfg;
use uflow_core::{Fault, MeasurementMachine, MeasurementState, MemoryCalibrationStore, StepStatus};
use uflow_hardware::SimControl;
use uflow_traits::Scale;
use uflow_traits::clock::ManualClock;

#[derive(Debug, Default)]
pub struct TransferLog {
    /// Polls answered `false` before the link comes up.
    pub connect_after: u32,
    pub never_connect: bool,
    pub fail_send: bool,
    pub polls: u32,
    pub sent: Vec<CycleRecord>,
}

pub struct FakeTransfer(Rc<RefCell<TransferLog>>);

impl FakeTransfer {
    pub fn new() -> (Self, Rc<RefCell<TransferLog>>) {
        let log = Rc::new(RefCell::new(TransferLog::default()));
        (Self(log.clone()), log)
    }
}

impl Transfer for FakeTransfer {
    fn poll_connect(&mut self) -> Result<bool, BoxError> {
        let mut log = self.0.borrow_mut();
        log.polls += 1;
        Ok(!log.never_connect && log.polls > log.connect_after)
    }

    fn send(&mut self, record: &CycleRecord) -> Result<(), BoxError> {
        let mut log = self.0.borrow_mut();
        if log.fail_send {
            return Err("link dropped".into());
        }
        log.sent.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct OperatorLog {
    pub events: VecDeque<OperatorEvent>,
    pub visual_ml: Option<f32>,
    pub prompts: Vec<Prompt>,
    pub shown: Vec<MeasurementState>,
    pub faults: Vec<Fault>,
    /// Press Start every time the machine reaches STANDBY.
    pub start_on_standby: bool,
    /// Acknowledge every fault as soon as it is shown.
    pub ack_faults: bool,
    /// Request one calibration with this reference the next time STANDBY is shown.
    pub calibrate_on_standby: Option<f32>,
    /// Follow prompts on a simulated scale.
    pub sim: Option<SimControl>,
}

pub struct FakeOperator(Rc<RefCell<OperatorLog>>);

impl FakeOperator {
    pub fn new() -> (Self, Rc<RefCell<OperatorLog>>) {
        let log = Rc::new(RefCell::new(OperatorLog::default()));
        (Self(log.clone()), log)
    }
}

impl Operator for FakeOperator {
    fn poll_event(&mut self) -> Option<OperatorEvent> {
        self.0.borrow_mut().events.pop_front()
    }

    fn visual_volume_ml(&mut self) -> Option<f32> {
        self.0.borrow().visual_ml
    }

    fn prompt(&mut self, prompt: Prompt) {
        let mut log = self.0.borrow_mut();
        log.prompts.push(prompt);
        let Some(sim) = log.sim.clone() else {
            return;
        };
        match prompt {
            Prompt::BeginVoiding => sim.start_void(),
            Prompt::ClearScale => sim.empty(),
            Prompt::PlaceReference { reference_ml } => {
                sim.set_load_ml(reference_ml);
                log.events.push_back(OperatorEvent::CalibrationReady);
            }
        }
    }

    fn show(&mut self, state: MeasurementState, fault: Option<&Fault>) {
        let mut log = self.0.borrow_mut();
        log.shown.push(state);
        if let Some(f) = fault
            && state == MeasurementState::ErrorState
        {
            log.faults.push(f.clone());
            if log.ack_faults {
                log.events.push_back(OperatorEvent::Acknowledge);
            }
        }
        match state {
            MeasurementState::Standby => {
                if let Some(reference_ml) = log.calibrate_on_standby.take() {
                    log.events
                        .push_back(OperatorEvent::Calibrate { reference_ml });
                } else if log.start_on_standby {
                    log.events.push_back(OperatorEvent::Start);
                }
            }
            MeasurementState::Tare => {
                if let Some(sim) = &log.sim {
                    sim.empty();
                }
            }
            _ => {}
        }
    }
}

pub const TICK: Duration = Duration::from_millis(100);

/// A machine on a virtual clock, plus handles on its fakes.
pub struct Rig {
    pub machine: MeasurementMachine,
    pub clock: ManualClock,
    pub transfer: Rc<RefCell<TransferLog>>,
    pub operator: Rc<RefCell<OperatorLog>>,
}

impl Rig {
    pub fn new(cfg: MachineCfg) -> Self {
        Self::with_store(cfg, MemoryCalibrationStore::default())
    }

    pub fn with_store(cfg: MachineCfg, store: impl CalibrationStore + 'static) -> Self {
        let clock = ManualClock::new();
        let (transfer, tlog) = FakeTransfer::new();
        let (operator, olog) = FakeOperator::new();
        let machine = MeasurementMachine::builder()
            .with_transfer(transfer)
            .with_operator(operator)
            .with_config(cfg)
            .with_calibration_store(store)
            .with_clock(Box::new(clock.clone()))
            .build()
            .unwrap();
        Self {
            machine,
            clock,
            transfer: tlog,
            operator: olog,
        }
    }

    pub fn push(&self, event: OperatorEvent) {
        self.operator.borrow_mut().events.push_back(event);
    }

    pub fn state(&self) -> MeasurementState {
        self.machine.state()
    }

    /// One control tick: step, then let one sample period pass.
    pub fn tick(&mut self, sample: Option<i16>) -> StepStatus {
        let status = self.machine.step(sample).unwrap();
        self.clock.advance(TICK);
        status
    }

    pub fn feed(&mut self, samples: &[i16]) -> Vec<StepStatus> {
        samples.iter().map(|&s| self.tick(Some(s))).collect()
    }

    /// Power on with an empty-scale reading and reach STANDBY.
    pub fn power_on(&mut self, zero: i16) {
        self.tick(Some(zero));
        assert_eq!(self.state(), MeasurementState::Standby);
    }

    /// Start a cycle and tare on `zero`, ending in WAIT_FOR_10ML.
    pub fn start_and_tare(&mut self, zero: i16) {
        self.push(OperatorEvent::Start);
        self.tick(Some(zero));
        assert_eq!(self.state(), MeasurementState::Tare);
        let n = self.machine.cfg().calibration.tare_samples;
        self.feed(&vec![zero; n]);
        assert_eq!(self.state(), MeasurementState::WaitFor10ml);
    }

    /// Tick on `scale` until `done` holds; returns the ticks taken.
    pub fn drive<S: Scale>(
        &mut self,
        scale: &mut S,
        max_ticks: usize,
        done: impl Fn(&MeasurementMachine) -> bool,
    ) -> usize {
        for n in 1..=max_ticks {
            let sample = scale.read(TICK).ok();
            self.tick(sample);
            if done(&self.machine) {
                return n;
            }
        }
        panic!(
            "gave up after {max_ticks} ticks in {}",
            self.machine.state()
        );
    }

    pub fn sent(&self) -> Vec<CycleRecord> {
        self.transfer.borrow().sent.clone()
    }

    pub fn shown(&self) -> Vec<MeasurementState> {
        self.operator.borrow().shown.clone()
    }
}

/// Counts for `ml` above `zero` at 20 counts/mL.
pub fn counts(zero: i16, ml: f32) -> i16 {
    (f32::from(zero) + ml * 20.0).round() as i16
}

/// A 40 mL void at 20 mL/s on an empty reading of 1200: three flat samples,
/// a 2 s ramp, then a flat tail. Onset is detected at index 7 and flow ends
/// at index 25; the sample at index 28 completes acquisition.
pub fn synthetic_void() -> Vec<i16> {
    let mut v = vec![1_200; 3];
    v.extend((1..=20).map(|j| 1_200 + 40 * j));
    v.extend([2_000; 10]);
    v
}

/// Feed `synthetic_void` and tick on a flat tail until `state` is reached.
pub fn run_void_until(rig: &mut Rig, state: MeasurementState) {
    for &s in &synthetic_void() {
        rig.tick(Some(s));
        if rig.state() == state {
            return;
        }
    }
    for _ in 0..20 {
        rig.tick(Some(2_000));
        if rig.state() == state {
            return;
        }
    }
    panic!("never reached {state}; stuck in {}", rig.state());
}

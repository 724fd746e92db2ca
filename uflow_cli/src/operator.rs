//! Scripted operator panel for unattended runs.
//!
//! Presses Start (or Calibrate) whenever the machine reaches STANDBY,
//! follows prompts on the simulated scale and turns Ctrl-C into a
//! power-off request.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uflow_core::{Fault, MeasurementState, Operator, OperatorEvent, Prompt};
use uflow_hardware::SimControl;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    /// Start this many measurement cycles, one per visit to STANDBY.
    Measure { cycles: u32 },
    /// Request one calibration with this reference volume.
    Calibrate { reference_ml: f32 },
}

pub struct ScriptedOperator {
    script: Script,
    visual_ml: Option<f32>,
    sim: Option<SimControl>,
    shutdown: Arc<AtomicBool>,
    events: VecDeque<OperatorEvent>,
    current: MeasurementState,
    interrupted_in: Rc<Cell<Option<MeasurementState>>>,
}

impl ScriptedOperator {
    /// The returned cell records the state Ctrl-C interrupted, if any.
    pub fn new(
        script: Script,
        shutdown: Arc<AtomicBool>,
    ) -> (Self, Rc<Cell<Option<MeasurementState>>>) {
        let interrupted_in = Rc::new(Cell::new(None));
        let op = Self {
            script,
            visual_ml: None,
            sim: None,
            shutdown,
            events: VecDeque::new(),
            current: MeasurementState::PowerOn,
            interrupted_in: interrupted_in.clone(),
        };
        (op, interrupted_in)
    }

    pub fn with_visual_ml(mut self, visual_ml: Option<f32>) -> Self {
        self.visual_ml = visual_ml;
        self
    }

    pub fn with_sim(mut self, sim: SimControl) -> Self {
        self.sim = Some(sim);
        self
    }

    fn on_standby(&mut self) {
        match &mut self.script {
            Script::Measure { cycles } if *cycles > 0 => {
                *cycles -= 1;
                self.events.push_back(OperatorEvent::Start);
            }
            Script::Calibrate { reference_ml } if *reference_ml > 0.0 => {
                let reference_ml = std::mem::take(reference_ml);
                self.events
                    .push_back(OperatorEvent::Calibrate { reference_ml });
            }
            _ => {}
        }
    }
}

impl Operator for ScriptedOperator {
    fn poll_event(&mut self) -> Option<OperatorEvent> {
        if self.shutdown.swap(false, Ordering::Relaxed) {
            tracing::warn!(state = %self.current, "interrupted; powering off");
            self.interrupted_in.set(Some(self.current));
            return Some(OperatorEvent::PowerOff);
        }
        self.events.pop_front()
    }

    fn visual_volume_ml(&mut self) -> Option<f32> {
        self.visual_ml
    }

    fn prompt(&mut self, prompt: Prompt) {
        tracing::info!(?prompt, "operator prompt");
        let Some(sim) = &self.sim else {
            return;
        };
        match prompt {
            Prompt::BeginVoiding => sim.start_void(),
            Prompt::ClearScale => sim.empty(),
            Prompt::PlaceReference { reference_ml } => {
                sim.set_load_ml(reference_ml);
                self.events.push_back(OperatorEvent::CalibrationReady);
            }
        }
    }

    fn show(&mut self, state: MeasurementState, fault: Option<&Fault>) {
        self.current = state;
        match (state, fault) {
            (MeasurementState::ErrorState, Some(f)) => {
                tracing::warn!(fault = %f, "display: fault");
            }
            _ => tracing::debug!(%state, "display"),
        }
        match state {
            MeasurementState::Standby => self.on_standby(),
            MeasurementState::Tare => {
                if let Some(sim) = &self.sim {
                    sim.empty();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(script: Script) -> (ScriptedOperator, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let (op, _) = ScriptedOperator::new(script, flag.clone());
        (op, flag)
    }

    #[test]
    fn starts_the_requested_number_of_cycles() {
        let (mut op, _) = op(Script::Measure { cycles: 2 });
        for _ in 0..3 {
            op.show(MeasurementState::Standby, None);
        }
        assert_eq!(op.poll_event(), Some(OperatorEvent::Start));
        assert_eq!(op.poll_event(), Some(OperatorEvent::Start));
        assert_eq!(op.poll_event(), None);
    }

    #[test]
    fn calibrates_once_and_confirms_the_reference() {
        let (op, _) = op(Script::Calibrate {
            reference_ml: 250.0,
        });
        let sim = SimControl::default();
        let mut op = op.with_sim(sim.clone());
        op.show(MeasurementState::Standby, None);
        op.show(MeasurementState::Standby, None);
        assert_eq!(
            op.poll_event(),
            Some(OperatorEvent::Calibrate {
                reference_ml: 250.0
            })
        );
        assert_eq!(op.poll_event(), None);

        op.prompt(Prompt::PlaceReference {
            reference_ml: 250.0,
        });
        assert!((sim.load_ml() - 250.0).abs() < f32::EPSILON);
        assert_eq!(op.poll_event(), Some(OperatorEvent::CalibrationReady));
    }

    #[test]
    fn interrupt_becomes_power_off_once() {
        let flag = Arc::new(AtomicBool::new(false));
        let (mut op, interrupted) = ScriptedOperator::new(Script::Measure { cycles: 1 }, flag.clone());
        op.show(MeasurementState::Acquire, None);
        flag.store(true, Ordering::Relaxed);
        assert_eq!(op.poll_event(), Some(OperatorEvent::PowerOff));
        assert_eq!(interrupted.get(), Some(MeasurementState::Acquire));
        assert_eq!(op.poll_event(), None);
    }
}

//! Collaborators the machine talks to: network transfer, calibration storage
//! and the operator panel. The core only defines the seams; transports,
//! persistence and rendering live outside it.

use std::error::Error;

use crate::calibration::Calibration;
use crate::fault::Fault;
use crate::flow::{CurvePoint, curve};
use crate::outlier::OutlierRecord;
use crate::state::MeasurementState;
use crate::summary::SummaryData;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// A completed, validated cycle as handed to XFER.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle: u32,
    pub summary: SummaryData,
    /// Corrected raw buffer.
    pub samples: Vec<i16>,
    pub outliers: Vec<OutlierRecord>,
    pub calibration: Calibration,
    pub period_s: f32,
}

impl CycleRecord {
    /// Per-sample volume and flow rows, with uncorrected volume alongside.
    pub fn curve(&self, slope_window: usize) -> Vec<CurvePoint> {
        curve(
            &self.samples,
            &self.outliers,
            &self.calibration,
            self.period_s,
            slope_window,
        )
    }
}

/// Network transfer subsystem.
pub trait Transfer {
    /// Non-blocking: `Ok(true)` once the link is up.
    fn poll_connect(&mut self) -> Result<bool, BoxError>;
    fn send(&mut self, record: &CycleRecord) -> Result<(), BoxError>;
}

/// Persistent home of the strain gauge scale (counts per mL).
pub trait CalibrationStore {
    fn load(&mut self) -> Result<Option<f32>, BoxError>;
    fn store(&mut self, counts_per_ml: f32) -> Result<(), BoxError>;
}

/// Store that forgets on power-off; the default when none is supplied.
#[derive(Debug, Default, Clone)]
pub struct MemoryCalibrationStore {
    value: Option<f32>,
}

impl MemoryCalibrationStore {
    pub fn new(value: Option<f32>) -> Self {
        Self { value }
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load(&mut self) -> Result<Option<f32>, BoxError> {
        Ok(self.value)
    }

    fn store(&mut self, counts_per_ml: f32) -> Result<(), BoxError> {
        self.value = Some(counts_per_ml);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorEvent {
    /// Begin a measurement cycle.
    Start,
    /// Begin a calibration with the given reference volume.
    Calibrate { reference_ml: f32 },
    /// Reference volume is on the scale.
    CalibrationReady,
    /// Clear the current fault and retry.
    Acknowledge,
    Abort,
    PowerOff,
}

/// Instructions shown to the operator when a state needs them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prompt {
    BeginVoiding,
    ClearScale,
    PlaceReference { reference_ml: f32 },
}

/// Operator panel: buttons, the visual-volume entry, and the display.
pub trait Operator {
    fn poll_event(&mut self) -> Option<OperatorEvent>;
    /// Volume read off the beaker, if the operator entered one.
    fn visual_volume_ml(&mut self) -> Option<f32>;
    fn prompt(&mut self, prompt: Prompt);
    fn show(&mut self, state: MeasurementState, fault: Option<&Fault>);
}

impl<T: Transfer + ?Sized> Transfer for Box<T> {
    fn poll_connect(&mut self) -> Result<bool, BoxError> {
        (**self).poll_connect()
    }
    fn send(&mut self, record: &CycleRecord) -> Result<(), BoxError> {
        (**self).send(record)
    }
}

impl<O: Operator + ?Sized> Operator for Box<O> {
    fn poll_event(&mut self) -> Option<OperatorEvent> {
        (**self).poll_event()
    }
    fn visual_volume_ml(&mut self) -> Option<f32> {
        (**self).visual_volume_ml()
    }
    fn prompt(&mut self, prompt: Prompt) {
        (**self).prompt(prompt);
    }
    fn show(&mut self, state: MeasurementState, fault: Option<&Fault>) {
        (**self).show(state, fault);
    }
}

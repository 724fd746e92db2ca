//! Operator-visible faults.
//!
//! A fault is not a Rust error: it is a value the machine carries into
//! ERROR_STATE and shows to the operator. Each reason belongs to one kind,
//! which decides how the CLI reports it.

use thiserror::Error;

use crate::state::MeasurementState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Implausible or missing samples.
    Sensor,
    /// A wait state exceeded its bound.
    Timing,
    /// Buffer contents are unreliable; the cycle is invalid.
    Data,
    /// The operator cancelled the cycle.
    Aborted,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaultReason {
    #[error("no sample from the scale")]
    NoSample,
    #[error("implausible scale reading {0}")]
    ImplausibleReading(i16),
    #[error("scale did not settle during tare (spread {spread} counts)")]
    TareUnstable { spread: u16 },
    #[error("self-test failed: {0}")]
    SelfTestFailed(String),
    #[error("calibration failed: {0}")]
    CalibrationFailed(String),
    #[error("no flow onset before timeout")]
    OnsetTimeout,
    #[error("no calibration trigger before timeout")]
    CalibrationTimeout,
    #[error("no network connection before timeout")]
    ConnectTimeout,
    #[error("transfer failed: {0}")]
    TransferFailed(String),
    #[error("sample buffer overrun ({dropped} samples lost)")]
    BufferOverrun { dropped: u64 },
    #[error("too many outliers ({count} > {limit})")]
    TooManyOutliers { count: usize, limit: usize },
    #[error("implausible final volume {0:.1} mL")]
    ImplausibleVolume(f32),
    #[error("no flow peak found")]
    NoPeak,
    #[error("aborted by operator")]
    OperatorAbort,
}

impl FaultReason {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::NoSample
            | Self::ImplausibleReading(_)
            | Self::TareUnstable { .. }
            | Self::SelfTestFailed(_)
            | Self::CalibrationFailed(_) => FaultKind::Sensor,
            Self::OnsetTimeout
            | Self::CalibrationTimeout
            | Self::ConnectTimeout
            | Self::TransferFailed(_) => FaultKind::Timing,
            Self::BufferOverrun { .. }
            | Self::TooManyOutliers { .. }
            | Self::ImplausibleVolume(_)
            | Self::NoPeak => FaultKind::Data,
            Self::OperatorAbort => FaultKind::Aborted,
        }
    }
}

/// A fault and the state that raised it.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{reason} (in {state})")]
pub struct Fault {
    pub reason: FaultReason,
    pub state: MeasurementState,
}

impl Fault {
    pub fn new(reason: FaultReason, state: MeasurementState) -> Self {
        Self { reason, state }
    }

    pub fn kind(&self) -> FaultKind {
        self.reason.kind()
    }
}

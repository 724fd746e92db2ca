#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Uroflowmeter measurement core (hardware-agnostic).
//!
//! This crate turns raw load-cell samples into a validated per-cycle summary.
//! All hardware interactions go through `uflow_traits::Scale` and
//! `uflow_traits::Clock`; network, storage and the operator panel are reached
//! through the traits in `collab`.
//!
//! ## Architecture
//!
//! - **Outlier filter**: neighbourhood spike correction with an audit table (`outlier`)
//! - **Flow**: backward-difference flow from calibrated volume (`flow`)
//! - **Peak qualifier**: streaming Qmax/maxNdx with onset/offset timing (`peak`)
//! - **Machine**: the thirteen-state measurement sequencer (`machine`, `state`)
//! - **Faults**: operator-visible fault reasons and kinds (`fault`)
//! - **Runner**: drives the machine at the sample rate, directly or via a
//!   sampler thread (`runner`, `sampler`)
//!
//! ## Units
//!
//! Samples stay in raw `i16` counts through filtering; volumes are mL and
//! flows mL/s (`f32`). Time in the summary is a sample index.

pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod collab;
pub mod config;
pub mod conversions;
pub mod error;
pub mod fault;
pub mod fixed_point;
pub mod flow;
pub mod machine;
pub mod outlier;
pub mod peak;
pub mod runner;
pub mod sampler;
pub mod state;
pub mod status;
pub mod summary;
pub mod util;

pub use builder::MachineBuilder;
pub use calibration::{Calibration, TareAccumulator};
pub use collab::{
    BoxError, CalibrationStore, CycleRecord, MemoryCalibrationStore, Operator, OperatorEvent,
    Prompt, Transfer,
};
pub use config::{
    CalibrationCfg, FlowCfg, MachineCfg, OutlierCfg, SafetyCfg, SamplingCfg, Timeouts,
    VolumeCheckCfg,
};
pub use error::{BuildError, Result, UflowError};
pub use fault::{Fault, FaultKind, FaultReason};
pub use flow::{CurvePoint, FlowEstimator};
pub use machine::MeasurementMachine;
pub use outlier::{OutlierFilter, OutlierRecord};
pub use peak::{PeakCandidate, PeakQualifier};
pub use runner::{RunOutcome, RunParams, SamplingMode, Until};
pub use state::MeasurementState;
pub use status::StepStatus;
pub use summary::{SummaryData, rescale_for};

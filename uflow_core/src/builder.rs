//! Type-state builder for `MeasurementMachine`.
//!
//! The builder enforces at compile time that the transfer and operator
//! collaborators are provided before `build()` is available. `try_build()` is
//! always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use uflow_traits::clock::{Clock, MonotonicClock};

use crate::collab::{CalibrationStore, MemoryCalibrationStore, Operator, Transfer};
use crate::config::MachineCfg;
use crate::error::{BuildError, Result};
use crate::machine::MeasurementMachine;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct MachineBuilder<T, O> {
    transfer: Option<Box<dyn Transfer>>,
    operator: Option<Box<dyn Operator>>,
    store: Option<Box<dyn CalibrationStore>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    cfg: Option<MachineCfg>,
    _t: PhantomData<T>,
    _o: PhantomData<O>,
}

impl Default for MachineBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            transfer: None,
            operator: None,
            store: None,
            clock: None,
            cfg: None,
            _t: PhantomData,
            _o: PhantomData,
        }
    }
}

impl MeasurementMachine {
    /// Start building a machine.
    pub fn builder() -> MachineBuilder<Missing, Missing> {
        MachineBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Check the runtime config. `uflow_config::Config::validate` covers the file;
/// this covers configs built in code.
fn validate(cfg: &MachineCfg) -> Result<()> {
    if cfg.sampling.sample_rate_hz == 0 {
        return Err(invalid("sample_rate_hz must be > 0"));
    }
    if cfg.sampling.buffer_len < 2 {
        return Err(invalid("buffer_len must be >= 2"));
    }
    if !(cfg.outlier.ratio.is_finite() && cfg.outlier.ratio >= 1.0) {
        return Err(invalid("outlier ratio must be >= 1"));
    }
    if !(cfg.flow.onset_ml.is_finite() && cfg.flow.onset_ml > 0.0) {
        return Err(invalid("onset_ml must be > 0"));
    }
    if !(cfg.flow.end_flow_ml_s.is_finite() && cfg.flow.end_flow_ml_s > 0.0) {
        return Err(invalid("end_flow_ml_s must be > 0"));
    }
    if cfg.flow.slope_window == 0 || cfg.flow.settle_samples == 0 {
        return Err(invalid("slope_window and settle_samples must be >= 1"));
    }
    if !(cfg.calibration.default_counts_per_ml.is_finite()
        && cfg.calibration.default_counts_per_ml > 0.0)
    {
        return Err(invalid("counts_per_ml must be > 0"));
    }
    if cfg.calibration.tare_samples == 0 {
        return Err(invalid("tare_samples must be >= 1"));
    }
    if cfg.timeouts.sensor_ms == 0 {
        return Err(invalid("sensor_ms must be >= 1"));
    }
    Ok(())
}

impl<T, O> MachineBuilder<T, O> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<MeasurementMachine> {
        let transfer = self
            .transfer
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTransfer))?;
        let operator = self
            .operator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingOperator))?;
        let cfg = self.cfg.unwrap_or_default();
        validate(&cfg)?;

        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryCalibrationStore::default()));
        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };
        Ok(MeasurementMachine::assemble(
            cfg, transfer, operator, store, clock,
        ))
    }

    pub fn with_config(mut self, cfg: MachineCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Defaults to an in-memory store.
    pub fn with_calibration_store(mut self, store: impl CalibrationStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

impl<O> MachineBuilder<Missing, O> {
    pub fn with_transfer(self, transfer: impl Transfer + 'static) -> MachineBuilder<Set, O> {
        MachineBuilder {
            transfer: Some(Box::new(transfer)),
            operator: self.operator,
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _t: PhantomData,
            _o: PhantomData,
        }
    }
}

impl<T> MachineBuilder<T, Missing> {
    pub fn with_operator(self, operator: impl Operator + 'static) -> MachineBuilder<T, Set> {
        MachineBuilder {
            transfer: self.transfer,
            operator: Some(Box::new(operator)),
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _t: PhantomData,
            _o: PhantomData,
        }
    }
}

impl MachineBuilder<Set, Set> {
    /// Validate and build. Only available once transfer and operator are set.
    pub fn build(self) -> Result<MeasurementMachine> {
        self.try_build()
    }
}

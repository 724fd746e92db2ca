//! Scale implementations for the uroflowmeter.
//!
//! - `SimulatedScale` generates a voiding curve on top of an empty-beaker
//!   reading and is steered through a cloneable `SimControl` handle.
//! - `ReplayScale` plays back a recorded sequence of raw samples.
pub mod error;
pub mod util;

use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use uflow_traits::Scale;

use crate::error::HwError;

/// Smallest excursion above the empty reading for an injected spike.
pub const SPIKE_COUNTS: i32 = 1_500;

/// Shape of the simulated void and the converter behind it.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub zero_counts: i16,
    pub counts_per_ml: f32,
    pub sample_rate_hz: u32,
    /// Seconds between the voiding request and first flow.
    pub delay_s: f32,
    pub duration_s: f32,
    pub peak_flow_ml_s: f32,
    /// Inject a single-sample spike every N samples while voiding (0 disables).
    pub spike_every: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            zero_counts: 1_200,
            counts_per_ml: 20.0,
            sample_rate_hz: 10,
            delay_s: 1.0,
            duration_s: 25.0,
            peak_flow_ml_s: 22.0,
            spike_every: 0,
        }
    }
}

impl SimParams {
    /// Volume voided `u` seconds after flow began, for a sin² flow profile.
    pub fn volume_at(&self, u: f32) -> f32 {
        if u <= 0.0 {
            return 0.0;
        }
        let d = self.duration_s;
        let u = u.min(d);
        self.peak_flow_ml_s * (u / 2.0 - d / (4.0 * PI) * (2.0 * PI * u / d).sin())
    }

    /// Total volume of one simulated void.
    pub fn total_ml(&self) -> f32 {
        self.peak_flow_ml_s * self.duration_s / 2.0
    }
}

#[derive(Debug, Default)]
struct Shared {
    void_requested: AtomicBool,
    empty_requested: AtomicBool,
    stalled: AtomicBool,
    load_ml_bits: AtomicU32,
}

/// Cloneable handle steering a `SimulatedScale` from another thread.
#[derive(Debug, Clone, Default)]
pub struct SimControl {
    shared: Arc<Shared>,
}

impl SimControl {
    /// Begin a void (after the configured delay) on the next read.
    pub fn start_void(&self) {
        self.shared.void_requested.store(true, Ordering::Relaxed);
    }

    /// Empty the beaker: voided fluid and any reference load are removed.
    pub fn empty(&self) {
        self.set_load_ml(0.0);
        self.shared.empty_requested.store(true, Ordering::Relaxed);
    }

    /// Place (or remove, with 0.0) a static reference load.
    pub fn set_load_ml(&self, ml: f32) {
        self.shared
            .load_ml_bits
            .store(ml.to_bits(), Ordering::Relaxed);
    }

    pub fn load_ml(&self) -> f32 {
        f32::from_bits(self.shared.load_ml_bits.load(Ordering::Relaxed))
    }

    /// A stalled converter never signals data-ready; reads time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::Relaxed);
    }

    pub fn is_stalled(&self) -> bool {
        self.shared.stalled.load(Ordering::Relaxed)
    }

    fn take_void_request(&self) -> bool {
        self.shared.void_requested.swap(false, Ordering::Relaxed)
    }

    fn take_empty_request(&self) -> bool {
        self.shared.empty_requested.swap(false, Ordering::Relaxed)
    }
}

/// Simulated load cell. Time advances one sample period per read.
pub struct SimulatedScale {
    params: SimParams,
    control: SimControl,
    dt_s: f32,
    /// Seconds since the current void was requested.
    void_t: Option<f32>,
    /// Fluid from completed voids still in the beaker.
    settled_ml: f32,
    n: u64,
}

impl SimulatedScale {
    pub fn new(params: SimParams) -> Self {
        let dt_s = 1.0 / params.sample_rate_hz.max(1) as f32;
        Self {
            params,
            control: SimControl::default(),
            dt_s,
            void_t: None,
            settled_ml: 0.0,
            n: 0,
        }
    }

    pub fn control(&self) -> SimControl {
        self.control.clone()
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    fn next_counts(&mut self) -> i16 {
        if self.control.take_empty_request() {
            self.settled_ml = 0.0;
            self.void_t = None;
        }
        if self.control.take_void_request() {
            self.void_t = Some(0.0);
        }

        let mut voiding = false;
        let mut voided_ml = 0.0;
        if let Some(t) = self.void_t {
            let u = t - self.params.delay_s;
            if u >= self.params.duration_s {
                self.settled_ml += self.params.total_ml();
                self.void_t = None;
                tracing::debug!(settled_ml = self.settled_ml, "simulated void finished");
            } else {
                voiding = u > 0.0;
                voided_ml = self.params.volume_at(u);
                self.void_t = Some(t + self.dt_s);
            }
        }

        let ml = self.settled_ml + voided_ml + self.control.load_ml();
        let mut counts =
            i32::from(self.params.zero_counts) + (ml * self.params.counts_per_ml).round() as i32;

        self.n += 1;
        if voiding && self.params.spike_every > 0 && self.n % u64::from(self.params.spike_every) == 0
        {
            // Four times the true load, never less than SPIKE_COUNTS; kept off the rails.
            let zero = i32::from(self.params.zero_counts);
            counts = (zero + ((counts - zero) * 4).max(SPIKE_COUNTS)).min(i32::from(i16::MAX) - 1);
            tracing::trace!(sample = self.n, counts, "injected spike");
        }
        counts.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
    }
}

impl Scale for SimulatedScale {
    fn read(&mut self, timeout: Duration) -> Result<i16, Box<dyn std::error::Error + Send + Sync>> {
        if self.control.is_stalled() {
            let control = self.control.clone();
            if util::wait_while_with_timeout(
                || control.is_stalled(),
                timeout,
                Duration::from_millis(1),
            )
            .is_err()
            {
                return Err(Box::new(HwError::Timeout));
            }
        }
        Ok(self.next_counts())
    }
}

/// Plays back recorded raw samples, one per read.
#[derive(Debug, Clone)]
pub struct ReplayScale {
    samples: Vec<i16>,
    pos: usize,
}

impl ReplayScale {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl Scale for ReplayScale {
    fn read(&mut self, _timeout: Duration) -> Result<i16, Box<dyn std::error::Error + Send + Sync>> {
        match self.samples.get(self.pos) {
            Some(&v) => {
                self.pos += 1;
                Ok(v)
            }
            None => Err(Box::new(HwError::Exhausted(self.samples.len()))),
        }
    }
}

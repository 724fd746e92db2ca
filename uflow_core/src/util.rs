//! Sample-period arithmetic shared by the machine, runner and sampler.

use std::time::Duration;

const MICROS_PER_SEC: u64 = 1_000_000;
const MILLIS_PER_SEC: u64 = 1_000;

/// Sample period in whole microseconds (never 0). A rate of 0 Hz is read as 1 Hz.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Sample period in whole milliseconds (never 0). A rate of 0 Hz is read as 1 Hz.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Sample period as a `Duration`, for sleeping and read timeouts.
#[inline]
pub fn period(hz: u32) -> Duration {
    Duration::from_micros(period_us(hz))
}

/// Sample period in seconds, as used for flow (mL/s) and report timestamps.
#[inline]
pub fn period_s(hz: u32) -> f32 {
    1.0 / hz.max(1) as f32
}

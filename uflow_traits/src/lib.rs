//! Hardware seams shared by the uroflowmeter crates.
//!
//! The load cell is reached only through [`Scale`], and time only through
//! [`Clock`], so the measurement core can run against real hardware, a
//! simulator, or a recorded session.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// A load-cell ADC that produces raw signed 16-bit counts.
pub trait Scale {
    /// Block for at most `timeout` waiting for the next conversion.
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<i16, Box<dyn std::error::Error + Send + Sync>>;
}

impl<S: Scale + ?Sized> Scale for Box<S> {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<i16, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(timeout)
    }
}

use thiserror::Error;

/// Failures of the simulated and replayed scales.
#[derive(Debug, Error)]
pub enum HwError {
    /// The converter stayed stalled for a whole read.
    #[error("scale timeout")]
    Timeout,
    #[error("data-ready timeout")]
    DataReadyTimeout,
    #[error("recorded session exhausted after {0} samples")]
    Exhausted(usize),
}

pub type Result<T> = std::result::Result<T, HwError>;

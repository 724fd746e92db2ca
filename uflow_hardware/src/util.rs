use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait while `busy` holds (the converter has no fresh sample), or until the
/// timeout expires. Sleeps in small intervals to avoid CPU spinning.
pub fn wait_while_with_timeout(
    mut busy: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while busy() {
        if Instant::now() >= deadline {
            return Err(HwError::DataReadyTimeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

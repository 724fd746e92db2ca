//! Background sensor sampling.
//!
//! Spawns a thread that owns the `Scale` and stands in for the ADC driver:
//! every conversion is queued on a bounded channel for the control loop.
//! The thread never blocks on a full queue; it counts the sample as dropped
//! instead, and the control loop reports the overrun.
//!
//! Safety: Each `Sampler` spawns exactly one thread that is automatically
//! shut down when the `Sampler` is dropped, preventing thread leaks.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uflow_traits::Scale;
use uflow_traits::clock::Clock;

/// Queue depth between the driver thread and the control loop.
pub const QUEUE_DEPTH: usize = 64;

pub struct Sampler {
    rx: xch::Receiver<i16>,
    last_ok: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    epoch: Instant,
    clock: Arc<dyn Clock + Send + Sync>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<S, C>(scale: S, hz: u32, timeout: Duration, clock: C) -> Self
    where
        S: Scale + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        Self::spawn_with_depth(scale, hz, timeout, clock, QUEUE_DEPTH)
    }

    pub fn spawn_with_depth<S, C>(
        mut scale: S,
        hz: u32,
        timeout: Duration,
        clock: C,
        depth: usize,
    ) -> Self
    where
        S: Scale + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(depth.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_clone = dropped.clone();
        let period = crate::util::period(hz);
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(clock);
        let thread_clock = clock.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("Sampler thread received shutdown signal");
                    break;
                }

                match scale.read(timeout) {
                    Ok(v) => {
                        match tx.try_send(v) {
                            Ok(()) => {}
                            Err(xch::TrySendError::Full(_)) => {
                                dropped_clone.fetch_add(1, Ordering::Relaxed);
                                tracing::trace!("sample queue full; sample dropped");
                            }
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("Sampler consumer disconnected, exiting thread");
                                break;
                            }
                        }
                        let now = thread_clock.ms_since(epoch);
                        last_ok_clone.store(now, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // The control loop's watchdog decides when silence is a fault.
                        tracing::trace!(error = %e, "scale read failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                thread_clock.sleep(period);
            }
            tracing::trace!("Sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            dropped,
            epoch,
            clock,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Oldest queued sample, if any. Never blocks.
    pub fn next(&self) -> Option<i16> {
        self.rx.try_recv().ok()
    }

    /// Samples currently waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// Samples dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Milliseconds since the last successful read, on the sampler's clock.
    pub fn stalled_for_now(&self) -> u64 {
        let now_ms = self.clock.ms_since(self.epoch);
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between reads, or once the current read returns
        // (bounded by the read timeout).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("Sampler thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "Sampler thread panicked during shutdown");
                }
            }
        }
    }
}

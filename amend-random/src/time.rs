//! Time source abstraction for the execution log.
//!
//! Log timestamps must be real wall-clock times, but they must also never go
//! backwards within a process: the ordering checks over the execution log
//! compare timestamps taken on different tasks. `SystemTimeSource` reads the
//! system clock once and advances it with a monotonic clock afterwards.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Abstraction over time operations.
///
/// This trait allows swapping between the real clock and a manually driven
/// clock in tests.
pub trait TimeSource: Send + Sync {
    /// Get the current time in microseconds since Unix epoch.
    fn now_micros(&self) -> u64;
}

/// Wall-clock anchor shared by every `SystemTimeSource` in the process.
static ANCHOR: OnceLock<(u64, Instant)> = OnceLock::new();

/// Real time source using the system clock, monotonic within the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[allow(clippy::cast_possible_truncation)] // Microseconds won't overflow u64 for 500k years
    fn now_micros(&self) -> u64 {
        let (epoch_micros, anchor) = *ANCHOR.get_or_init(|| {
            // duration_since(UNIX_EPOCH) only fails if system time is before 1970.
            let since_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            (since_epoch.as_micros() as u64, Instant::now())
        });
        epoch_micros.saturating_add(anchor.elapsed().as_micros() as u64)
    }
}

/// A manually driven time source.
///
/// Time is frozen or steps by a fixed amount per read. It is shared
/// between tasks through atomics, so concurrent log writers observe one
/// timeline.
#[derive(Debug)]
pub struct SimulatedTimeSource {
    current_micros: AtomicU64,
    /// Amount added after every read; 0 freezes time.
    step_micros: u64,
}

impl SimulatedTimeSource {
    /// Create a frozen time source at `initial_micros`.
    #[must_use]
    pub const fn new(initial_micros: u64) -> Self {
        Self {
            current_micros: AtomicU64::new(initial_micros),
            step_micros: 0,
        }
    }

    /// Create a time source that advances by `step_micros` on every read.
    #[must_use]
    pub const fn stepping(initial_micros: u64, step_micros: u64) -> Self {
        Self {
            current_micros: AtomicU64::new(initial_micros),
            step_micros,
        }
    }

}

impl TimeSource for SimulatedTimeSource {
    fn now_micros(&self) -> u64 {
        self.current_micros
            .fetch_add(self.step_micros, Ordering::SeqCst)
    }
}

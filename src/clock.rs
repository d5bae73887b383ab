//! Clock Source
//!
//! Monotonic milliseconds since an engine epoch. Built on `Instant`, so wall
//! clock adjustments never move timers.

use std::time::Instant;

/// Milliseconds since the engine epoch.
pub type Millis = u64;

/// A monotonic clock anchored at the moment it was created.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock whose zero is "now".
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch. Non-decreasing.
    pub fn now_ms(&self) -> Millis {
        let ms = self.epoch.elapsed().as_millis();
        Millis::try_from(ms).unwrap_or(Millis::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}

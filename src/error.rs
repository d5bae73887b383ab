//! Error types for the timer engine.

use thiserror::Error;

/// `init` could not bring the engine up.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The worker thread could not be spawned. The engine stays stopped.
    #[error("failed to spawn timer worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// `shutdown` stopped the engine but something went wrong on the way.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// A callback panicked and took the worker thread down with it.
    /// The engine is stopped and its pending timers are discarded.
    #[error("timer worker panicked in a callback")]
    WorkerPanicked,
}

/// `schedule` refused a timer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The engine is stopped. Call `init` and retry.
    #[error("timer engine is not running")]
    NotRunning,

    /// The configured cap on pending timers is reached.
    #[error("timer capacity exhausted ({limit} pending)")]
    CapacityExhausted { limit: usize },

    /// Every timer id has been handed out.
    #[error("timer id space exhausted")]
    IdSpaceExhausted,

    /// A repeating timer needs a non-zero interval.
    #[error("repeat interval must be greater than zero")]
    InvalidInterval,
}

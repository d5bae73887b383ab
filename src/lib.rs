//! Heap Timers
//!
//! Schedules large numbers of millisecond timers on one background worker:
//! - Indexed min-heap keyed by absolute expiry (O(log n) insert, pop, cancel)
//! - One lock around the shared state, never held across a callback or sleep
//! - Fixed polling quantum: timers fire no earlier than due, at most a quantum late
//! - Drift-free repeating timers (next expiry = previous expiry + interval)

pub mod clock;
pub(crate) mod pq;
pub mod rng;
pub mod error;
pub(crate) mod scheduler;
pub mod engine;
pub mod global;

#[cfg(test)]
mod test_logging;


pub use clock::Millis;
pub use engine::{Engine, EngineConfig};
pub use error::{ScheduleError, ShutdownError, StartupError};
pub use global::{cancel, default_engine, init, schedule, shutdown};
pub use scheduler::TimerId;

//! Process-wide default engine
//!
//! Free functions over one lazily built [`Engine`] with the default
//! configuration, for hosts that want a single timer service without passing
//! a handle around. Code that can carry an [`Engine`] should prefer that.

use crate::clock::Millis;
use crate::engine::{Engine, EngineConfig};
use crate::error::{ScheduleError, ShutdownError, StartupError};
use crate::scheduler::TimerId;
use std::sync::OnceLock;

static DEFAULT_ENGINE: OnceLock<Engine> = OnceLock::new();

/// The shared default engine. Stopped until [`init`] is called.
pub fn default_engine() -> &'static Engine {
    DEFAULT_ENGINE.get_or_init(|| Engine::new(EngineConfig::default()))
}

/// Start the default engine. A no-op if it is running.
pub fn init() -> Result<(), StartupError> {
    default_engine().init()
}

/// Stop the default engine and discard its pending timers.
pub fn shutdown() -> Result<(), ShutdownError> {
    default_engine().shutdown()
}

/// Schedule a callback on the default engine. See [`Engine::schedule`].
pub fn schedule<F>(
    delay_ms: i64,
    repeat_ms: Option<Millis>,
    callback: F,
) -> Result<TimerId, ScheduleError>
where
    F: FnMut() + Send + 'static,
{
    default_engine().schedule(delay_ms, repeat_ms, callback)
}

/// Cancel a timer on the default engine. See [`Engine::cancel`].
pub fn cancel(id: TimerId) -> bool {
    default_engine().cancel(id)
}

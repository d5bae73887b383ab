//! Engine - lifecycle, public API, and the event loop
//!
//! One background worker serves every timer of an engine. The worker locks
//! the scheduler state, asks it for the next due record, and either sleeps one
//! quantum (unlocked) or runs the record's callback (unlocked). Callbacks may
//! call back into the engine; nothing here holds the state lock across a
//! callback or a sleep.

use crate::clock::Millis;
use crate::error::{ScheduleError, ShutdownError, StartupError};
use crate::scheduler::{timer_fn, Step, TimeScheduler, TimerId};
use parking_lot::Mutex;
use spin_sleep::SpinSleeper;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Configuration for an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long the worker sleeps when nothing is due. Timers fire up to one
    /// quantum late, never early.
    pub quantum: Duration,
    /// Cap on pending timers. `None` lets the store grow without bound.
    pub max_timers: Option<usize>,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(10),
            max_timers: Some(100_000),
            thread_name: "heap-timers".to_string(),
        }
    }
}

/// State shared between the API and the worker.
struct Shared {
    state: Mutex<TimeScheduler>,
    quantum: Duration,
}

/// The timer engine.
///
/// Stopped after construction; call [`Engine::init`] to start the worker.
/// Dropping the engine shuts it down.
pub struct Engine {
    shared: Arc<Shared>,
    /// Worker handle. Its lock also serializes `init` against `shutdown`.
    worker: Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl Engine {
    /// Create a stopped engine.
    pub fn new(config: EngineConfig) -> Self {
        let quantum = config.quantum.max(Duration::from_millis(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimeScheduler::new(config.max_timers)),
                quantum,
            }),
            worker: Mutex::new(None),
            config,
        }
    }

    /// Start the worker. A no-op if the engine is already running.
    ///
    /// Each start re-anchors the clock and begins with an empty store.
    pub fn init(&self) -> Result<(), StartupError> {
        let mut worker = self.worker.lock();
        let generation = {
            let mut state = self.shared.state.lock();
            if state.is_running() {
                return Ok(());
            }
            state.start()
        };

        // A worker that died in a callback leaves its handle behind.
        if let Some(old) = worker.take() {
            if old.thread().id() != thread::current().id() && old.join().is_err() {
                debug!("reaped timer worker that panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || event_loop(shared, generation));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                debug!(
                    generation,
                    quantum_ms = self.shared.quantum.as_millis() as u64,
                    "timer engine started"
                );
                Ok(())
            }
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.stop();
                state.clear();
                error!(error = %e, "failed to spawn timer worker");
                Err(StartupError::Spawn(e))
            }
        }
    }

    /// Stop the worker, wait for it to exit, and discard pending timers.
    /// A no-op if the engine is not running.
    ///
    /// No callback starts after this returns. Called from inside a callback,
    /// the engine stops without waiting on its own worker, which exits once
    /// that callback returns.
    ///
    /// If a callback panicked, the engine is already stopped; this reaps the
    /// dead worker and returns [`ShutdownError::WorkerPanicked`].
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        let (generation, handle) = {
            let mut worker = self.worker.lock();
            let mut state = self.shared.state.lock();
            if !state.is_running() {
                drop(state);
                return match worker.take() {
                    Some(h) if h.thread().id() != thread::current().id() => {
                        h.join().map_err(|_| ShutdownError::WorkerPanicked)
                    }
                    _ => Ok(()),
                };
            }
            state.stop();
            (state.generation(), worker.take())
        };

        let result = match handle {
            // Dropping our own handle detaches the thread.
            Some(h) if h.thread().id() == thread::current().id() => Ok(()),
            Some(h) => h.join().map_err(|_| ShutdownError::WorkerPanicked),
            None => Ok(()),
        };

        let mut state = self.shared.state.lock();
        // A concurrent init may already have started a new generation with
        // its own store.
        if state.generation() == generation {
            let discarded = state.clear();
            debug!(generation, discarded, "timer engine stopped");
        }
        result
    }

    /// Schedule `callback` to run `delay_ms` from now, and then every
    /// `repeat_ms` if given. Zero or negative delays fire on the next pass.
    ///
    /// Returns immediately with the timer's handle.
    pub fn schedule<F>(
        &self,
        delay_ms: i64,
        repeat_ms: Option<Millis>,
        callback: F,
    ) -> Result<TimerId, ScheduleError>
    where
        F: FnMut() + Send + 'static,
    {
        let callback = timer_fn(callback);
        let mut state = self.shared.state.lock();
        let now = state.clock().now_ms();
        match state.add_timer(now, delay_ms, repeat_ms, callback) {
            Ok(id) => {
                debug!(%id, delay_ms, repeat_ms = ?repeat_ms, "timer scheduled");
                Ok(id)
            }
            Err(e) => {
                if let ScheduleError::CapacityExhausted { limit } = e {
                    warn!(limit, "timer capacity exhausted");
                }
                Err(e)
            }
        }
    }

    /// Cancel a pending timer.
    ///
    /// True means its callback will not run again. False means it already
    /// fired (or is firing), was cancelled before, or never existed.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.shared.state.lock().cancel(id);
        debug!(%id, removed, "timer cancel");
        removed
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().is_running()
    }

    /// Number of timers waiting in the store.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending()
    }

    /// Milliseconds since the engine was started. None while stopped.
    pub fn now_ms(&self) -> Option<Millis> {
        self.shared.state.lock().now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "timer engine shutdown on drop failed");
        }
    }
}

/// Stops the engine when its worker unwinds out of a callback, so nothing
/// more is accepted for a worker that is gone.
struct PanicReport {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for PanicReport {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.is_running() && state.generation() == self.generation {
            state.stop();
            let discarded = state.clear();
            error!(
                generation = self.generation,
                discarded, "timer callback panicked; engine stopped"
            );
        } else {
            error!(generation = self.generation, "timer callback panicked");
        }
    }
}

/// The worker body for one engine generation.
fn event_loop(shared: Arc<Shared>, generation: u64) {
    let _report = PanicReport {
        shared: Arc::clone(&shared),
        generation,
    };
    let sleeper = SpinSleeper::default();

    loop {
        let step = {
            let mut state = shared.state.lock();
            let now = state.clock().now_ms();
            state.next_due(generation, now)
        };

        match step {
            Step::Stop => break,
            Step::Idle => sleeper.sleep(shared.quantum),
            Step::Fire(fired) => {
                trace!(
                    id = %fired.id,
                    expiry = fired.expiry,
                    repeating = fired.repeating,
                    "timer fired"
                );
                fired.run();
            }
        }
    }

    debug!(generation, "timer worker exiting");
}

//! Time Scheduler
//!
//! The shared state behind the engine lock: the timer store, the running
//! flag, and the id allocator. Every method here runs with the lock held, and
//! none of them invoke a callback. `next_due` hands a due callback back to the
//! caller, which runs it after the lock is released.
//!
//! Time is passed in explicitly, so the state machine can be stepped with
//! synthetic clocks in tests.

use crate::clock::{Clock, Millis};
use crate::error::ScheduleError;
use crate::pq::MinPq;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Handle returned by `schedule`, used later to `cancel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// A callback shared between the store and the worker.
/// Repeating timers are back in the store while their callback runs.
pub(crate) type TimerFn = Arc<Mutex<Box<dyn FnMut() + Send + 'static>>>;

/// Metadata carried by each heap entry.
struct TimerMeta {
    interval: Option<Millis>,
    callback: TimerFn,
}

/// A record that was due and has left the lock's protection.
pub struct Fired {
    pub id: TimerId,
    pub expiry: Millis,
    pub repeating: bool,
    callback: TimerFn,
}

impl Fired {
    /// Invoke the callback. Must be called without the state lock held.
    pub fn run(self) {
        let mut callback = self.callback.lock();
        (*callback)();
    }
}

/// What the event loop should do next.
pub enum Step {
    /// The engine stopped (or restarted under a newer worker). Exit.
    Stop,
    /// Nothing is due. Sleep one quantum.
    Idle,
    /// Release the lock, then run this.
    Fire(Fired),
}

/// The main time scheduler.
pub struct TimeScheduler {
    store: MinPq<TimerMeta>,
    running: bool,

    /// Bumped on every start. A worker exits once its generation is stale.
    generation: u64,

    /// Next id to hand out. Never reset, so ids stay unique for the engine's life.
    next_id: u64,

    max_timers: Option<usize>,
    clock: Clock,
}

impl TimeScheduler {
    /// Create a stopped scheduler.
    pub fn new(max_timers: Option<usize>) -> Self {
        Self {
            store: MinPq::new(),
            running: false,
            generation: 0,
            next_id: 1,
            max_timers,
            clock: Clock::start(),
        }
    }

    /// Transition to running: fresh epoch, empty store, new generation.
    pub fn start(&mut self) -> u64 {
        self.store.clear();
        self.clock = Clock::start();
        self.generation += 1;
        self.running = true;
        self.generation
    }

    /// Raise the stop signal. The store is left for `clear`.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Discard every pending record. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.store.len();
        self.store.clear();
        n
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending(&self) -> usize {
        self.store.len()
    }

    /// Engine time, or None while stopped.
    pub fn now_ms(&self) -> Option<Millis> {
        self.running.then(|| self.clock.now_ms())
    }

    /// The engine clock, re-anchored on every start.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Insert a timer due `delay_ms` after `now`.
    /// A zero or negative delay is due immediately.
    pub fn add_timer(
        &mut self,
        now: Millis,
        delay_ms: i64,
        repeat: Option<Millis>,
        callback: TimerFn,
    ) -> Result<TimerId, ScheduleError> {
        if !self.running {
            return Err(ScheduleError::NotRunning);
        }
        if repeat == Some(0) {
            return Err(ScheduleError::InvalidInterval);
        }
        if let Some(limit) = self.max_timers {
            if self.store.len() >= limit {
                return Err(ScheduleError::CapacityExhausted { limit });
            }
        }

        let id = self.alloc_id()?;
        let expiry = now.saturating_add_signed(delay_ms.max(0));
        let meta = TimerMeta {
            interval: repeat,
            callback,
        };
        // Ids are fresh, so the insert cannot collide.
        self.store.add(id.0, expiry, meta);
        Ok(id)
    }

    /// Remove a pending timer. False if it already fired, was cancelled, or
    /// never existed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.store.remove(id.0).is_some()
    }

    /// One event-loop decision at time `now` for the worker of `generation`.
    ///
    /// A due repeating record is re-inserted with the same id at
    /// `old_expiry + interval` before this returns, so its cadence does not
    /// drift with callback latency. A callback that overruns its interval is
    /// caught up on the following passes.
    pub fn next_due(&mut self, generation: u64, now: Millis) -> Step {
        if !self.running || self.generation != generation {
            return Step::Stop;
        }
        match self.store.peek_expiry() {
            Some(expiry) if expiry <= now => {}
            _ => return Step::Idle,
        }
        let Some((id, expiry, meta)) = self.store.pop() else {
            return Step::Idle;
        };

        if let Some(interval) = meta.interval {
            let next = expiry.saturating_add(interval);
            self.store.add(
                id,
                next,
                TimerMeta {
                    interval: Some(interval),
                    callback: meta.callback.clone(),
                },
            );
        }

        Step::Fire(Fired {
            id: TimerId(id),
            expiry,
            repeating: meta.interval.is_some(),
            callback: meta.callback,
        })
    }

    /// Allocate the next timer id.
    fn alloc_id(&mut self) -> Result<TimerId, ScheduleError> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(ScheduleError::IdSpaceExhausted)?;
        Ok(TimerId(id))
    }

    #[cfg(test)]
    fn store(&self) -> &MinPq<TimerMeta> {
        &self.store
    }
}

/// Wrap a closure for storage in the scheduler.
pub(crate) fn timer_fn<F>(f: F) -> TimerFn
where
    F: FnMut() + Send + 'static,
{
    let boxed: Box<dyn FnMut() + Send + 'static> = Box::new(f);
    Arc::new(Mutex::new(boxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, TimerFn) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let f = timer_fn(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, f)
    }

    fn noop() -> TimerFn {
        timer_fn(|| {})
    }

    fn fire(sched: &mut TimeScheduler, g: u64, now: Millis) -> Option<Fired> {
        match sched.next_due(g, now) {
            Step::Fire(f) => Some(f),
            _ => None,
        }
    }

    #[test]
    fn test_scheduler_creation() {
        let sched = TimeScheduler::new(None);
        assert!(!sched.is_running());
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.now_ms(), None);
    }

    #[test]
    fn test_add_requires_running() {
        let mut sched = TimeScheduler::new(None);
        let err = sched.add_timer(0, 10, None, noop()).unwrap_err();
        assert_eq!(err, ScheduleError::NotRunning);
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut sched = TimeScheduler::new(None);
        sched.start();
        let a = sched.add_timer(0, 10, None, noop()).unwrap();
        let b = sched.add_timer(0, 10, None, noop()).unwrap();
        assert!(b > a);

        // Restarting does not recycle ids.
        sched.stop();
        sched.start();
        let c = sched.add_timer(0, 10, None, noop()).unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_id_space_exhausted() {
        let mut sched = TimeScheduler::new(None);
        sched.start();
        sched.next_id = u64::MAX;
        let err = sched.add_timer(0, 10, None, noop()).unwrap_err();
        assert_eq!(err, ScheduleError::IdSpaceExhausted);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut sched = TimeScheduler::new(Some(2));
        sched.start();
        let a = sched.add_timer(0, 10, None, noop()).unwrap();
        sched.add_timer(0, 20, None, noop()).unwrap();
        let err = sched.add_timer(0, 30, None, noop()).unwrap_err();
        assert_eq!(err, ScheduleError::CapacityExhausted { limit: 2 });

        // Cancelling frees a slot.
        assert!(sched.cancel(a));
        assert!(sched.add_timer(0, 30, None, noop()).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut sched = TimeScheduler::new(None);
        sched.start();
        let err = sched.add_timer(0, 10, Some(0), noop()).unwrap_err();
        assert_eq!(err, ScheduleError::InvalidInterval);
    }

    #[test]
    fn test_idle_until_due() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let (hits, f) = counter();
        sched.add_timer(100, 50, None, f).unwrap();

        assert!(matches!(sched.next_due(g, 100), Step::Idle));
        assert!(matches!(sched.next_due(g, 149), Step::Idle));

        let fired = fire(&mut sched, g, 150).unwrap();
        assert_eq!(fired.expiry, 150);
        assert!(!fired.repeating);
        assert_eq!(sched.pending(), 0);

        fired.run();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_store_is_idle() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        assert!(matches!(sched.next_due(g, 1_000), Step::Idle));
    }

    #[test]
    fn test_non_positive_delay_is_due_now() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        sched.add_timer(40, 0, None, noop()).unwrap();
        sched.add_timer(40, -25, None, noop()).unwrap();
        assert_eq!(fire(&mut sched, g, 40).unwrap().expiry, 40);
        assert_eq!(fire(&mut sched, g, 40).unwrap().expiry, 40);
    }

    #[test]
    fn test_fires_in_expiry_order() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let a = sched.add_timer(0, 50, None, noop()).unwrap();
        let b = sched.add_timer(0, 10, None, noop()).unwrap();

        assert_eq!(fire(&mut sched, g, 100).unwrap().id, b);
        assert_eq!(fire(&mut sched, g, 100).unwrap().id, a);
        assert!(fire(&mut sched, g, 100).is_none());
    }

    #[test]
    fn test_cancel_before_fire() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let (hits, f) = counter();
        let id = sched.add_timer(0, 10, None, f).unwrap();

        assert!(sched.cancel(id));
        assert!(!sched.cancel(id));
        assert!(fire(&mut sched, g, 100).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_fire_returns_false() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let id = sched.add_timer(0, 10, None, noop()).unwrap();
        fire(&mut sched, g, 10).unwrap().run();
        assert!(!sched.cancel(id));
        assert!(!sched.cancel(TimerId(9_999)));
    }

    #[test]
    fn test_repeat_reinserts_without_drift() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let (hits, f) = counter();
        let id = sched.add_timer(0, 100, Some(100), f).unwrap();

        // The worker is late every time; the schedule stays on the 100ms grid.
        for (k, late_now) in [107u64, 215, 309, 433].into_iter().enumerate() {
            let fired = fire(&mut sched, g, late_now).unwrap();
            assert_eq!(fired.id, id);
            assert!(fired.repeating);
            assert_eq!(fired.expiry, 100 * (k as u64 + 1));
            assert_eq!(sched.store().peek(), Some((id.as_u64(), 100 * (k as u64 + 2))));
            fired.run();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(sched.pending(), 1);
    }

    #[test]
    fn test_repeat_catches_up_after_overrun() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        sched.add_timer(0, 10, Some(10), noop()).unwrap();

        // A stall of 35ms leaves expiries 10, 20, 30 all due at once.
        let expiries: Vec<Millis> = std::iter::from_fn(|| fire(&mut sched, g, 35))
            .map(|f| f.expiry)
            .collect();
        assert_eq!(expiries, vec![10, 20, 30]);
    }

    #[test]
    fn test_cancel_repeating() {
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let id = sched.add_timer(0, 10, Some(10), noop()).unwrap();
        fire(&mut sched, g, 10).unwrap();
        assert!(sched.cancel(id));
        assert!(fire(&mut sched, g, 1_000).is_none());
    }

    #[test]
    fn test_stop_signal_and_stale_generation() {
        let mut sched = TimeScheduler::new(None);
        let old = sched.start();
        sched.add_timer(0, 0, None, noop()).unwrap();

        let new = sched.start();
        assert_ne!(old, new);
        assert!(matches!(sched.next_due(old, 0), Step::Stop));

        sched.stop();
        assert!(matches!(sched.next_due(new, 0), Step::Stop));
    }

    #[test]
    fn test_start_discards_previous_records() {
        let mut sched = TimeScheduler::new(None);
        sched.start();
        sched.add_timer(0, 10, None, noop()).unwrap();
        sched.add_timer(0, 20, None, noop()).unwrap();
        sched.stop();
        assert_eq!(sched.clear(), 2);

        sched.start();
        sched.add_timer(0, 10, None, noop()).unwrap();
        sched.stop();
        sched.start();
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_heap_invariant_through_mixed_operations() {
        let mut rng = crate::rng::DetRng::new("scheduler-mix");
        let mut sched = TimeScheduler::new(None);
        let g = sched.start();
        let mut ids = Vec::new();
        let mut now = 0;

        for _ in 0..2_000 {
            match rng.below(4) {
                0 | 1 => {
                    let delay = rng.range(0, 500) as i64;
                    let repeat = (rng.below(4) == 0).then(|| rng.range(1, 50));
                    ids.push(sched.add_timer(now, delay, repeat, noop()).unwrap());
                }
                2 if !ids.is_empty() => {
                    let id = ids.swap_remove(rng.below(ids.len() as u64) as usize);
                    sched.cancel(id);
                }
                _ => {
                    now += rng.range(0, 20);
                    if let Some(f) = fire(&mut sched, g, now) {
                        assert!(f.expiry <= now);
                    }
                }
            }
            assert!(sched.store().is_valid());
        }
    }
}

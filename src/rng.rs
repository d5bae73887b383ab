//! Deterministic RNG using FNV-1a hash and SplitMix64
//!
//! Drives the randomized delays of the load harness and the tests. A string
//! seed gives the same delay sequence on every run, so a failing load run can
//! be replayed.

/// FNV-1a hash of a string to a u64 seed.
/// This is deterministic across runs (unlike std's DefaultHasher).
pub fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// A small deterministic PRNG (SplitMix64).
#[derive(Clone, Debug)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Create a new RNG from a string seed.
    pub fn new(seed: &str) -> Self {
        Self {
            state: fnv1a64(seed),
        }
    }

    /// Generate the next u64 value (SplitMix64 algorithm).
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, n)`. Returns 0 when `n` is 0.
    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        // Multiply-shift keeps the bias negligible for the small ranges used here.
        ((self.next_u64() as u128 * n as u128) >> 64) as u64
    }

    /// Uniform value in `[lo, hi]`.
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        lo + self.below(hi - lo + 1)
    }

    /// A delay in `[lo_ms, hi_ms]` rounded down to a multiple of `step_ms`.
    pub fn delay_ms(&mut self, lo_ms: u64, hi_ms: u64, step_ms: u64) -> u64 {
        let step = step_ms.max(1);
        let steps = self.range(lo_ms.div_ceil(step), hi_ms / step);
        steps * step
    }
}

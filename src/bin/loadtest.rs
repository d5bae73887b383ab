//! Load test harness
//!
//! Schedules N one-shot timers with random delays in [10, 1000] ms and waits
//! for every callback. Fails if the run ends before the longest delay (a
//! timer fired early) or later than the longest delay plus one quantum and a
//! contention margin.
//!
//! Usage:
//!   cargo run --release --bin loadtest -- --timers 1000 --seed demo

use heap_timers::rng::DetRng;
use heap_timers::{Engine, EngineConfig};
use parking_lot::{Condvar, Mutex};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Extra allowance on top of one quantum for a loaded machine.
const MARGIN: Duration = Duration::from_millis(50);

struct WaitGroup {
    count: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    fn new(n: usize) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(n),
            cond: Condvar::new(),
        })
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cond.wait(&mut count);
        }
    }
}

fn print_usage() {
    println!("Usage: loadtest [--timers N] [--seed S] [--quantum MS]");
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut timers: usize = 1000;
    let mut seed = String::from("loadtest");
    let mut config = EngineConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--timers" | "-n" => {
                i += 1;
                if i < args.len() {
                    timers = args[i].parse()?;
                }
            }
            "--seed" | "-s" => {
                i += 1;
                if i < args.len() {
                    seed = args[i].clone();
                }
            }
            "--quantum" | "-q" => {
                i += 1;
                if i < args.len() {
                    config.quantum = Duration::from_millis(args[i].parse()?);
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(true);
            }
            other => {
                print_usage();
                return Err(format!("Unknown argument {}", other).into());
            }
        }
        i += 1;
    }

    if let Some(limit) = config.max_timers {
        config.max_timers = Some(limit.max(timers));
    }
    let engine = Engine::new(config);
    let quantum = engine.config().quantum;

    let mut rng = DetRng::new(&seed);
    let delays: Vec<u64> = (0..timers).map(|_| rng.delay_ms(10, 1000, 10)).collect();
    let expected = Duration::from_millis(delays.iter().copied().max().unwrap_or(0));

    engine.init()?;
    let wg = WaitGroup::new(timers);

    let start = Instant::now();
    for delay in &delays {
        let w = wg.clone();
        engine.schedule(*delay as i64, None, move || w.done())?;
    }
    wg.wait();
    let actual = start.elapsed();
    engine.shutdown()?;

    println!(
        "{} timers, expected: {} ms, actual: {} ms",
        timers,
        expected.as_millis(),
        actual.as_millis()
    );

    // One ms of leeway for clock truncation at schedule time.
    let too_early = actual + Duration::from_millis(1) < expected;
    let too_late = actual > expected + quantum + MARGIN;
    if too_early {
        error!(?actual, ?expected, "timers finished before the longest delay");
    }
    if too_late {
        error!(?actual, ?expected, ?quantum, "timers finished late");
    }
    info!(seed = %seed, "load test complete");
    Ok(!too_early && !too_late)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "load test aborted");
            ExitCode::FAILURE
        }
    }
}

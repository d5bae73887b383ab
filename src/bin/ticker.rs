//! Self-rescheduling ticker
//!
//! Each tick's callback schedules the next one, showing that `schedule` (and
//! `cancel`) may be called from inside a callback. The first tick also cancels
//! a far-off "alarm" timer.
//!
//! Usage:
//!   cargo run --bin ticker -- --interval 1000 --count 5

use heap_timers::{cancel, init, schedule, shutdown, TimerId};
use std::env;
use std::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("Usage: ticker [--interval MS] [--count N]");
    println!();
    println!("  --interval, -i   milliseconds between ticks (default 1000)");
    println!("  --count, -c      ticks before exiting (default 5)");
}

/// Arm the next tick. The callback re-arms itself until `left` runs out.
fn arm(interval: i64, tick: usize, left: usize, alarm: TimerId, done: mpsc::Sender<()>) {
    let scheduled = schedule(interval, None, move || {
        println!("tick {}", tick);
        if cancel(alarm) {
            info!(%alarm, "alarm cancelled from tick {}", tick);
        }
        if left > 1 {
            arm(interval, tick + 1, left - 1, alarm, done.clone());
        } else {
            let _ = done.send(());
        }
    });
    if let Err(e) = scheduled {
        error!(error = %e, tick, "failed to schedule tick");
    }
}

/// Delay for the alarm: one interval past the last tick.
fn alarm_delay(interval: i64, count: usize) -> Option<i64> {
    i64::try_from(count)
        .ok()?
        .checked_add(1)
        .and_then(|ticks| interval.checked_mul(ticks))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut interval: u64 = 1000;
    let mut count: usize = 5;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--interval" | "-i" => {
                i += 1;
                if i < args.len() {
                    interval = args[i].parse()?;
                }
            }
            "--count" | "-c" => {
                i += 1;
                if i < args.len() {
                    count = args[i].parse()?;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                return Err(format!("Unknown argument {}", other).into());
            }
        }
        i += 1;
    }

    if count == 0 {
        return Ok(());
    }

    let interval = i64::try_from(interval).map_err(|_| "--interval is too large")?;
    let alarm_in = alarm_delay(interval, count).ok_or("--interval times --count overflows")?;

    init()?;

    let alarm = schedule(alarm_in, None, || {
        println!("alarm! (should have been cancelled)");
    })?;

    let (tx, rx) = mpsc::channel();
    arm(interval, 1, count, alarm, tx);

    // Blocks until the last tick reports in.
    rx.recv()?;

    shutdown()?;
    Ok(())
}

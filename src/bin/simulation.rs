//! Beacon Scan Simulation
//!
//! Emits synthetic iBeacon observations as JSON lines, one per scan result,
//! for feeding BeaconFlow without radio hardware.
//!
//! # Usage
//! ```bash
//! ./beacon-simulator --beacons 6 --interval-ms 50 | ./beaconflow --stdin
//! ```

use clap::Parser;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use beaconflow::config::defaults;
use beaconflow::pipeline::{now_millis, BeaconSimulator};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "beacon-simulator")]
#[command(about = "Synthetic beacon scan generator for BeaconFlow testing")]
#[command(version)]
struct Args {
    /// Number of observations to emit (0 = run until interrupted)
    #[arg(short, long, default_value = "0")]
    count: u64,

    /// Delay between observations in milliseconds
    #[arg(short, long, default_value_t = defaults::SYNTHETIC_INTERVAL_MS)]
    interval_ms: u64,

    /// Number of simulated beacons
    #[arg(short, long, default_value_t = defaults::SYNTHETIC_BEACONS, value_parser = clap::value_parser!(u16).range(1..=1000))]
    beacons: u16,

    /// Standard deviation of per-scan RSSI noise (dBm)
    #[arg(long, default_value = "4.0")]
    noise: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress the progress log on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut simulator = BeaconSimulator::new(args.beacons, args.noise, args.seed)?;
    let interval = Duration::from_millis(args.interval_ms);

    if !args.quiet {
        eprintln!(
            "[sim] {} beacons, {}ms interval, noise σ={} dBm, seed {}",
            simulator.beacon_count(),
            args.interval_ms,
            args.noise,
            args.seed.map_or_else(|| "random".to_string(), |s| s.to_string())
        );
    }

    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();
    let started = Instant::now();
    let mut emitted = 0u64;

    while args.count == 0 || emitted < args.count {
        let tick = Instant::now();
        let observation = simulator.next_observation(now_millis());
        let json = serde_json::to_string(&observation)?;

        // A closed pipe means the consumer went away
        if writeln!(stdout_lock, "{}", json).is_err() {
            break;
        }
        stdout_lock.flush()?;
        emitted += 1;

        if !args.quiet && emitted % 1000 == 0 {
            eprintln!("[sim] {} observations in {:.1}s", emitted, started.elapsed().as_secs_f64());
        }

        let elapsed = tick.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    drop(stdout_lock);
    if !args.quiet {
        eprintln!("[sim] done: {} observations", emitted);
    }
    Ok(())
}

//! # Stream Walk
//!
//! Walks a view east across the world, one region per step, and reports
//! what the store did along the way.
//!
//! ## Usage
//!
//! ```bash
//! stream_walk --steps 32 --radius 2 --threads 4 --dir /tmp/walk --config world.toml
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use terrastream::RegionCoord;
use terrastream_world::{HostWorld, WorldConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TERRASTREAM STREAM WALK                                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut config = WorldConfig {
        save_dir: std::env::temp_dir().join("terrastream-walk"),
        ..WorldConfig::default()
    };
    let mut steps = 32u32;
    let mut ticks_per_step = 4u32;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config" | "-c", Some(v)) => match WorldConfig::from_file(v) {
                Ok(c) => config = c,
                Err(e) => {
                    eprintln!("failed to read config {v}: {e}");
                    std::process::exit(2);
                }
            },
            ("--steps" | "-s", Some(v)) => steps = v.parse().unwrap_or(steps),
            ("--ticks" | "-t", Some(v)) => ticks_per_step = v.parse().unwrap_or(ticks_per_step),
            ("--radius" | "-r", Some(v)) => {
                config.view_radius = v.parse().unwrap_or(config.view_radius);
            }
            ("--threads" | "-j", Some(v)) => {
                config.worker_threads = v.parse().unwrap_or(config.worker_threads);
            }
            ("--dir" | "-d", Some(v)) => config.save_dir = PathBuf::from(v),
            ("--help" | "-h", _) => {
                println!("Usage: stream_walk [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     World config (TOML)");
                println!("  -s, --steps <N>         Regions to walk east (default: 32)");
                println!("  -t, --ticks <N>         Ticks per step (default: 4)");
                println!("  -r, --radius <N>        View radius in regions (default: 2)");
                println!("  -j, --threads <N>       Worker threads (default: 4)");
                println!("  -d, --dir <DIR>         Save directory");
                println!("  -h, --help              Show this help");
                return;
            }
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Save dir:           {}", config.save_dir.display());
    println!("│ Workers:            {}", config.worker_threads);
    println!("│ View radius:        {}", config.view_radius);
    println!("│ Steps:              {steps} x {ticks_per_step} ticks");
    println!("└─────────────────────────────────────────────────────────────────┘");
    println!();

    let mut world = match HostWorld::open(&config) {
        Ok(world) => world,
        Err(e) => {
            eprintln!("failed to open world: {e}");
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let mut stalls = 0u32;
    let mut evicted = 0usize;
    for step in 0..steps {
        let center = RegionCoord::new(i32::try_from(step).unwrap_or(i32::MAX), 0);
        world.set_view(center, config.view_radius);
        if !world.wait_until_loaded(Duration::from_secs(10)) {
            stalls += 1;
            tracing::warn!("view at {center} not loaded after 10s");
        }
        for _ in 0..ticks_per_step {
            evicted += world.tick().evicted;
        }
        if step % 8 == 0 {
            let stats = world.store().stats();
            println!(
                "step {step:>4} @ {center}: primary {:>4}  cached {:>3}  saving {:>3}",
                stats.primary, stats.cached, stats.saves_in_flight
            );
        }
    }
    let walk_time = start.elapsed();
    let stats = world.store().stats();
    let stuck = world.store().stuck_regions();
    let report = world.shutdown();

    println!();
    println!("┌─ RESULTS ───────────────────────────────────────────────────────┐");
    println!("│ Walk time:          {walk_time:?}");
    println!("│ Ticks:              {}", stats.age);
    println!("│ Primary at end:     {}", stats.primary);
    println!("│ Evicted:            {evicted}");
    println!("│ Stalled steps:      {stalls}");
    println!("│ Stuck regions:      {}", stuck.len());
    println!("│ Drain:              {:?}, {} unsettled", report.waited, report.unsettled.len());
    println!("└─────────────────────────────────────────────────────────────────┘");

    if !report.is_clean() || !stuck.is_empty() {
        std::process::exit(1);
    }
}

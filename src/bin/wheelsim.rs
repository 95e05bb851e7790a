//! Hosted `wheelsim` binary: wires the library's comms loop and physics
//! runner together over two threads and a real (or loopback) transport.
//!
//! Grounded on the teacher's own example binaries (`ax25-1200-rx.rs`): a
//! `clap`-derived [`Config`], `stderrlog` initialized from repeated
//! `-v`/`-q` flags, a `ctrlc` handler flipping a shared cancellation flag
//! rather than calling `std::process::exit`, and a final status line printed
//! on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use log::{info, warn};

use wheelsim::comms_loop::Station;
use wheelsim::config::Config;
use wheelsim::context::Context;
use wheelsim::mailbox::Mailbox;
use wheelsim::physics::{DemoWheelModel, PhysicsOverlay, PhysicsRunner, TICK_PERIOD_US};
use wheelsim::scenario;
use wheelsim::telemetry::Queue as TelemetryQueue;
use wheelsim::transport::{LoopbackTransport, Transport};

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let verbosity = 2 + usize::from(config.verbose);
    stderrlog::new()
        .module(module_path!())
        .module("wheelsim")
        .quiet(config.quiet > 0 && config.verbose == 0)
        .verbosity(verbosity.saturating_sub(usize::from(config.quiet)))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;
    Ok(())
}

fn load_scenario(ctx: &mut Context, path: &std::path::Path) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("scenario: failed to read {}: {err}", path.display());
            ctx.set_scenario_error(err.to_string());
            return;
        }
    };
    match scenario::json::parse(&text) {
        Ok(s) => {
            info!("scenario: loaded '{}' from {}", s.name, path.display());
            ctx.scenario.load(s);
        }
        Err(err) => {
            warn!("scenario: rejected {}: {err}", path.display());
            ctx.set_scenario_error(err.to_string());
        }
    }
}

/// Spawn the 100Hz physics thread, returning a join handle. Runs until
/// `running` is cleared.
fn spawn_physics_thread(
    mailbox: Arc<Mailbox>,
    telemetry: Arc<TelemetryQueue>,
    overlay: Arc<PhysicsOverlay>,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut runner = PhysicsRunner::new(DemoWheelModel::default(), mailbox, telemetry, overlay);
        let start = Instant::now();
        let period = Duration::from_micros(TICK_PERIOD_US);
        let mut next_deadline = start + period;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            let jitter_us: i32 = now
                .saturating_duration_since(next_deadline)
                .as_micros()
                .try_into()
                .unwrap_or(i32::MAX);
            let now_us = now.saturating_duration_since(start).as_micros() as u64;
            runner.step(now_us, jitter_us);

            next_deadline += period;
            let sleep_for = next_deadline.saturating_duration_since(Instant::now());
            if sleep_for > Duration::ZERO {
                std::thread::sleep(sleep_for);
            } else {
                // Running behind: resync instead of spinning deadlines forever.
                next_deadline = Instant::now() + period;
            }
        }
    })
}

/// Drive `station`'s `tick()` at roughly 1kHz until `running` is cleared,
/// then log final counters.
fn run<T: Transport>(mut station: Station<T>, running: &Arc<AtomicBool>) {
    let start = Instant::now();
    while running.load(Ordering::Relaxed) {
        let now_ms = start.elapsed().as_millis() as u64;
        station.tick(now_ms);
        std::thread::sleep(Duration::from_millis(1));
    }
    let stats = station.ctx.stats();
    info!(
        "shutting down: slip_errors={} parse_errors={} wrong_addr={} cmd_errors={} error_count={}",
        stats.slip_errors, stats.parse_errors, stats.wrong_addr, stats.cmd_errors, stats.error_count
    );
}

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config)?;

    if config.port.is_some() && !cfg!(feature = "serial") {
        anyhow::bail!("--port requires the \"serial\" feature, which has no hardware backend yet");
    }

    let mailbox = Arc::new(Mailbox::new());
    let telemetry = Arc::new(TelemetryQueue::new());
    let overlay = Arc::new(PhysicsOverlay::new());

    let mut ctx = Context::new(config.address, Arc::clone(&mailbox), Arc::clone(&telemetry));
    ctx.register_stats_table();
    ctx.register_scenario_table();
    ctx.register_wheel_table();
    ctx.register_protection_table();
    if let Some(path) = &config.scenario {
        load_scenario(&mut ctx, path);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            eprintln!("received Ctrl+C, shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let physics_thread = spawn_physics_thread(
        Arc::clone(&mailbox),
        Arc::clone(&telemetry),
        Arc::clone(&overlay),
        Arc::clone(&running),
    );

    info!(
        "wheelsim starting: address={} baud={} port={:?}",
        config.address, config.baud, config.port
    );

    #[cfg(feature = "serial")]
    {
        if config.port.is_some() {
            let station = Station::new(ctx, wheelsim::transport::SerialTransport, overlay);
            run(station, &running);
            running.store(false, Ordering::Relaxed);
            physics_thread
                .join()
                .map_err(|_| anyhow::anyhow!("physics thread panicked"))?;
            return Ok(());
        }
    }

    let station = Station::new(ctx, LoopbackTransport::new(), overlay);
    run(station, &running);

    running.store(false, Ordering::Relaxed);
    physics_thread
        .join()
        .map_err(|_| anyhow::anyhow!("physics thread panicked"))?;
    Ok(())
}

//! Voxstream headless driver
//!
//! Flies a camera across noise terrain for a fixed time. The simulation loop
//! ticks the watcher at a fixed rate while a render thread integrates
//! completions into a headless device.
//!
//! ```text
//! voxstream [--config path.json] [--seconds 10] [--speed 40]
//!           [--strategy cubical|dual] [--workers N] [--seed N]
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use voxstream::core::camera::Camera;
use voxstream::core::config::StreamingConfig;
use voxstream::core::logging;
use voxstream::core::time::{FixedStep, RateCounter};
use voxstream::core::types::{DVec3, Result};
use voxstream::core::Error;
use voxstream::render::{DrawRecorder, HeadlessDevice};
use voxstream::voxel::{ExtractionStrategy, NoiseTerrain};
use voxstream::StreamingWorld;

const UPDATES_PER_SECOND: u32 = 60;
const MAX_CATCH_UP: u32 = 5;
const FRAME_INTERVAL: Duration = Duration::from_millis(8);

fn main() {
    logging::init();
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match parse_arg::<PathBuf>(&args, "--config")? {
        Some(path) => StreamingConfig::load_json(&path)?,
        None => StreamingConfig::default(),
    };
    if let Some(strategy) = parse_arg::<ExtractionStrategy>(&args, "--strategy")? {
        config.generator.extraction.strategy = strategy;
    }
    if let Some(workers) = parse_arg::<usize>(&args, "--workers")? {
        config.generator.workers = workers;
    }
    if let Some(seed) = parse_arg::<u32>(&args, "--seed")? {
        config.terrain.seed = seed;
    }
    let seconds = parse_arg::<f64>(&args, "--seconds")?.unwrap_or(10.0);
    let speed = parse_arg::<f64>(&args, "--speed")?.unwrap_or(40.0);

    let terrain = Arc::new(NoiseTerrain::new(config.terrain.clone()));
    let altitude = terrain.height_at(0.0, 0.0) + 24.0;
    let mut world = StreamingWorld::new(config, terrain)?;

    let mut camera = Camera::new(DVec3::new(0.0, altitude, 0.0));
    camera.set_rotation_euler(-std::f32::consts::FRAC_PI_2, 0.0);

    let running = Arc::new(AtomicBool::new(true));
    let render = {
        let running = Arc::clone(&running);
        let mut integrator = world.integrator(HeadlessDevice::new());
        thread::Builder::new().name("render".into()).spawn(move || {
            let mut surface = DrawRecorder::new();
            let mut fps = RateCounter::new(Duration::from_secs(1));
            while running.load(Ordering::Acquire) {
                surface.clear();
                let report = integrator.integrate(&mut surface);
                if let Some(rate) = fps.record(Instant::now()) {
                    log::info!(
                        "FPS: {:.1} | draws {} | buffers {} ({:.1} MB)",
                        rate,
                        report.draws,
                        integrator.device().live_buffers(),
                        integrator.device().live_bytes() as f64 / (1024.0 * 1024.0)
                    );
                }
                thread::sleep(FRAME_INTERVAL);
            }
            integrator
        })?
    };

    log::info!("Flying for {:.1}s at {:.1} units/s", seconds, speed);
    let end = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut clock = FixedStep::new(UPDATES_PER_SECOND, MAX_CATCH_UP);
    let mut ups = RateCounter::new(Duration::from_secs(1));
    loop {
        let now = Instant::now();
        if now >= end {
            break;
        }
        for _ in 0..clock.due_ticks(now) {
            camera.advance(speed * clock.step_secs());
            world.tick(&camera);
            if let Some(rate) = ups.record(Instant::now()) {
                let stats = world.stats();
                log::info!(
                    "UPS: {:.1} | x {:.0} | leaves {} (pending {}, generating {}, uploaded {}) | queued {}",
                    rate,
                    camera.position.x,
                    stats.leaves,
                    stats.pending,
                    stats.generating,
                    stats.uploaded,
                    stats.queued
                );
            }
        }
        thread::sleep(clock.until_next(Instant::now()));
    }

    // Watcher and generator stop before the render thread releases buffers
    world.shutdown();
    running.store(false, Ordering::Release);
    let mut integrator = render
        .join()
        .map_err(|_| Error::Streaming("render thread panicked".into()))?;
    integrator.teardown();

    let stats = world.stats();
    log::info!(
        "Done: {} ticks skipped, {} chunks generated, {} failed, {} stale",
        clock.skipped(),
        stats.generator.completed,
        stats.generator.failed,
        stats.generator.skipped_stale + stats.generator.discarded_late + integrator.totals().stale as u64
    );
    Ok(())
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let value = args
        .get(i + 1)
        .ok_or_else(|| Error::Config(format!("{} needs a value", flag)))?;
    value
        .parse()
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid {} '{}': {}", flag, value, e)))
}

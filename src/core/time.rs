//! Frame pacing for the simulation and render loops

use std::time::{Duration, Instant};

/// Counts events and reports their rate once per window
#[derive(Debug)]
pub struct RateCounter {
    window: Duration,
    window_start: Instant,
    count: u32,
    total: u64,
    rate: f32,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self { window, window_start: now, count: 0, total: 0, rate: 0.0 }
    }

    /// Record one event. Returns the rate when a window just closed.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        self.count += 1;
        self.total += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.rate = self.count as f32 / elapsed.as_secs_f32();
        self.count = 0;
        self.window_start = now;
        Some(self.rate)
    }

    /// Rate over the last closed window
    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Fixed-rate update clock.
///
/// A slow frame runs at most `max_catch_up` updates; the rest of the backlog
/// is dropped so the loop never spirals.
#[derive(Debug)]
pub struct FixedStep {
    step: Duration,
    next_tick: Instant,
    max_catch_up: u32,
    skipped: u64,
}

impl FixedStep {
    pub fn new(rate_hz: u32, max_catch_up: u32) -> Self {
        Self::starting_at(rate_hz, max_catch_up, Instant::now())
    }

    pub fn starting_at(rate_hz: u32, max_catch_up: u32, now: Instant) -> Self {
        let step = Duration::from_secs(1) / rate_hz.max(1);
        Self { step, next_tick: now + step, max_catch_up: max_catch_up.max(1), skipped: 0 }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn step_secs(&self) -> f64 {
        self.step.as_secs_f64()
    }

    /// Number of updates to run at `now`
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        let mut ticks = 0;
        while self.next_tick <= now {
            if ticks == self.max_catch_up {
                let behind = now.duration_since(self.next_tick);
                let dropped = (behind.as_nanos() / self.step.as_nanos()) as u64 + 1;
                self.skipped += dropped;
                self.next_tick += self.step * dropped as u32;
                break;
            }
            ticks += 1;
            self.next_tick += self.step;
        }
        ticks
    }

    /// Time left until the next update is due
    pub fn until_next(&self, now: Instant) -> Duration {
        self.next_tick.saturating_duration_since(now)
    }

    /// Updates dropped to catch up after slow frames
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Seconds on the simulation clock. Only the match tick advances it.
pub type SimTime = f64;

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const SNAPSHOT_TPS: u32 = 10; // 10 full snapshots per second

/// Delta time of one simulation tick (in seconds)
pub fn tick_delta() -> f64 {
    1.0 / SIMULATION_TPS as f64
}

/// Monotonic simulation clock owned by a match session
#[derive(Debug, Clone, Copy, Default)]
pub struct SimClock {
    now: SimTime,
    tick: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance by `dt` seconds. Negative or NaN deltas are ignored.
    pub fn advance(&mut self, dt: f64) -> SimTime {
        if dt.is_finite() && dt > 0.0 {
            self.now += dt;
        }
        self.tick += 1;
        self.now
    }
}

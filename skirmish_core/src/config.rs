//! Match configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs shared by every peer in a match.
///
/// Missing fields fall back to the defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Simulation ticks per second
    pub tick_rate_hz: u32,

    /// Host broadcasts a snapshot every N ticks
    pub snapshot_interval_ticks: u64,

    /// How often the host announces it is alive
    pub heartbeat_interval: Duration,

    /// Silence after which clients start an election
    pub host_timeout: Duration,

    /// Delay between `NewHost` and the promoted host's full-state rebroadcast
    pub resync_grace: Duration,

    /// How often bot factions make decisions
    pub ai_interval: Duration,

    /// Bound on each client-to-host connect attempt
    pub handshake_timeout: Duration,

    /// Exponential smoothing rate for client visuals (per second)
    pub smoothing_rate: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 25,
            snapshot_interval_ticks: 5,
            heartbeat_interval: Duration::from_millis(500),
            host_timeout: Duration::from_secs(3),
            resync_grace: Duration::from_millis(750),
            ai_interval: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            smoothing_rate: 8.0,
        }
    }
}

impl MatchConfig {
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn with_snapshot_interval(mut self, ticks: u64) -> Self {
        self.snapshot_interval_ticks = ticks.max(1);
        self
    }

    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_ai_interval(mut self, interval: Duration) -> Self {
        self.ai_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Duration of one tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

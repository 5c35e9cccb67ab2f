//! Core environment context trait for Skirmish peers.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// Abstracts the "real world" so the same peer code runs in production
/// (tokio, OS entropy) and in the simulation harness (virtual clock,
/// seeded RNG).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, entropy-seeded RNG
/// - **Simulation**: `SimContext` - manual virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every method that would normally introduce non-determinism (time,
/// randomness) is controlled by the implementation.
#[async_trait]
pub trait MatchContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Drives heartbeat timeouts, the AI cadence and the migration grace
    /// delay. In simulation, this is the virtual clock.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used to stamp actions and packets.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives an independent random stream.
    ///
    /// AI decisions and production rolls draw from these streams so that
    /// they can be replayed. The implementation combines its master seed
    /// with `stream` so each consumer gets a unique but reproducible RNG.
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;

    /// Milliseconds since the Unix epoch according to `system_time()`.
    fn unix_millis(&self) -> u64 {
        self.system_time()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

//! Production implementation of MatchContext using Tokio.

use crate::MatchContext;
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Wall-clock context for real matches. RNG streams come from OS entropy.
pub struct TokioContext {
    start: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_rng(&self, _stream: u64) -> ChaCha8Rng {
        ChaCha8Rng::from_entropy()
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[tokio::test]
    async fn test_sleep_uses_wall_clock() {
        let ctx = TokioContext::new();
        let before = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        assert!(ctx.now() - before >= Duration::from_millis(10));
        assert!(ctx.unix_millis() > 0);
    }

    #[test]
    fn test_unseeded_streams_differ() {
        let ctx = TokioContext::new();
        assert_ne!(ctx.derive_rng(1).next_u64(), ctx.derive_rng(1).next_u64());
        assert_eq!(ctx.seed(), 0);
    }
}

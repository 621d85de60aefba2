use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use crate::domain::UserId;

/// Checks between two sweeps of refilled buckets.
pub(crate) const PRUNE_EVERY: u32 = 256;

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-user token bucket applied to inbound updates.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
    checks_since_prune: u32,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens.max(1) as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
            checks_since_prune: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 1, Duration::from_secs(1))
    }

    /// `Ok(())` when the update may proceed, otherwise the wait until a token is available.
    pub fn check(&mut self, user_id: UserId) -> Result<(), Duration> {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }

        self.checks_since_prune += 1;
        if self.checks_since_prune >= PRUNE_EVERY {
            self.checks_since_prune = 0;
            let pruned = self.prune_idle(now);
            if pruned > 0 {
                tracing::debug!(pruned, tracked = self.buckets.len(), "rate limiter buckets pruned");
            }
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now
            .saturating_duration_since(bucket.last_update)
            .as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Forget buckets that would be full again by `now`.
    fn prune_idle(&mut self, now: Instant) -> usize {
        let before = self.buckets.len();
        let (max, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
        before - self.buckets.len()
    }

    #[cfg(test)]
    pub(crate) fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}

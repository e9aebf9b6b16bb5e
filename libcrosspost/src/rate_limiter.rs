//! Per-platform token buckets guarding outbound call volume
//!
//! One [`RateLimiter`] is built at worker startup and shared by every
//! publisher. Each platform bucket sits behind its own mutex, so concurrent
//! jobs targeting the same platform cannot both observe the same token and
//! over-admit requests. Platforms without a configured bucket are not limited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{CrosspostError, Result};
use crate::types::Platform;

/// Snapshot of a bucket reported by [`RateLimiter::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketStatus {
    pub available: u32,
    pub capacity: u32,
    /// Time until the bucket is back to full capacity
    pub reset_in: Duration,
}

/// Mutable bucket state. Invariant: `tokens <= capacity`.
#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    capacity: u32,
    window: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            window,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }

        let added = (elapsed.as_secs_f64() / self.window.as_secs_f64() * self.capacity as f64)
            .floor() as u32;
        if added == 0 {
            // Keep accumulating elapsed time instead of discarding the fraction
            return;
        }

        if self.tokens + added >= self.capacity {
            self.tokens = self.capacity;
            self.last_refill = now;
        } else {
            self.tokens += added;
            // Advance only by the time the granted tokens represent
            self.last_refill += self.window.mul_f64(added as f64 / self.capacity as f64);
        }
    }

    /// Debit `cost` tokens, or report how long to wait before trying again
    fn try_take(&mut self, cost: u32, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            return Ok(());
        }

        let missing = (cost - self.tokens) as f64;
        let per_token = self.window.as_secs_f64() / self.capacity as f64;
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let wait_ms = ((per_token * missing - elapsed) * 1000.0).ceil().max(1.0);
        Err(Duration::from_millis(wait_ms as u64))
    }

    fn status(&mut self, now: Instant) -> BucketStatus {
        self.refill(now);
        let reset_in = if self.tokens >= self.capacity {
            Duration::ZERO
        } else {
            let missing = (self.capacity - self.tokens) as f64;
            let per_token = self.window.as_secs_f64() / self.capacity as f64;
            let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
            Duration::from_secs_f64((per_token * missing - elapsed).max(0.0))
                .min(self.window.saturating_sub(now.saturating_duration_since(self.last_refill)))
        };
        BucketStatus {
            available: self.tokens,
            capacity: self.capacity,
            reset_in,
        }
    }
}

/// Rate limiter for platform API calls
#[derive(Debug, Clone)]
pub struct RateLimiter {
    buckets: Arc<HashMap<Platform, Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Create a limiter with one full bucket per configured platform
    pub fn new(limits: HashMap<Platform, RateLimitConfig>) -> Self {
        let now = Instant::now();
        let buckets = limits
            .into_iter()
            .filter(|(_, limit)| limit.capacity > 0 && limit.window_secs > 0)
            .map(|(platform, limit)| {
                (
                    platform,
                    Mutex::new(TokenBucket::new(limit.capacity, limit.window(), now)),
                )
            })
            .collect();
        Self {
            buckets: Arc::new(buckets),
        }
    }

    /// Wait until `cost` tokens are available for `platform`, then debit them
    ///
    /// # Errors
    ///
    /// Returns `CrosspostError::InvalidInput` if `cost` exceeds the bucket
    /// capacity, since such a request could never be admitted.
    pub async fn acquire(&self, platform: Platform, cost: u32) -> Result<()> {
        let Some(bucket) = self.buckets.get(&platform) else {
            warn!("No rate limit configured for {}; allowing request", platform);
            return Ok(());
        };

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                if cost > bucket.capacity {
                    return Err(CrosspostError::InvalidInput(format!(
                        "Rate limit cost {} exceeds {} bucket capacity {}",
                        cost, platform, bucket.capacity
                    )));
                }
                match bucket.try_take(cost, Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            debug!(
                "Rate limit reached for {}; waiting {}ms for {} token(s)",
                platform,
                wait.as_millis(),
                cost
            );
            sleep(wait).await;
        }
    }

    /// Debit `cost` tokens if they are available right now
    pub async fn try_acquire(&self, platform: Platform, cost: u32) -> bool {
        let Some(bucket) = self.buckets.get(&platform) else {
            warn!("No rate limit configured for {}; allowing request", platform);
            return true;
        };
        let mut bucket = bucket.lock().await;
        bucket.try_take(cost, Instant::now()).is_ok()
    }

    /// Current bucket state, or `None` when the platform is not limited
    pub async fn status(&self, platform: Platform) -> Option<BucketStatus> {
        let bucket = self.buckets.get(&platform)?;
        let mut bucket = bucket.lock().await;
        Some(bucket.status(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn limiter(capacity: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(HashMap::from([(
            Platform::Twitter,
            RateLimitConfig {
                capacity,
                window_secs,
            },
        )]))
    }

    fn bucket(capacity: u32, window: Duration) -> (TokenBucket, Instant) {
        let start = Instant::now();
        (TokenBucket::new(capacity, window, start), start)
    }

    #[test]
    fn test_refill_half_window_restores_half_capacity() {
        let (mut b, start) = bucket(10, Duration::from_millis(1000));
        b.tokens = 0;

        b.refill(start + Duration::from_millis(500));
        assert!((4..=6).contains(&b.tokens), "got {}", b.tokens);

        b.refill(start + Duration::from_millis(1000));
        assert_eq!(b.tokens, 10);
    }

    #[test]
    fn test_refill_accumulates_sub_token_intervals() {
        let (mut b, start) = bucket(10, Duration::from_millis(1000));
        b.tokens = 0;

        // 50ms steps are each worth half a token
        for step in 1..=4 {
            b.refill(start + Duration::from_millis(50 * step));
        }
        assert_eq!(b.tokens, 2);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let (mut b, start) = bucket(5, Duration::from_millis(100));
        let mut now = start;
        for i in 0..200u64 {
            now += Duration::from_millis(i % 7);
            let _ = b.try_take(1 + (i % 3) as u32, now);
            assert!(b.tokens <= b.capacity);
        }
    }

    #[test]
    fn test_wait_time_for_missing_token() {
        let (mut b, start) = bucket(10, Duration::from_millis(1000));
        b.tokens = 0;
        let wait = b.try_take(1, start).unwrap_err();
        assert_eq!(wait, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = limiter(2, 1);
        limiter.acquire(Platform::Twitter, 1).await.unwrap();
        limiter.acquire(Platform::Twitter, 1).await.unwrap();
        assert!(!limiter.try_acquire(Platform::Twitter, 1).await);

        let start = Instant::now();
        limiter.acquire(Platform::Twitter, 1).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1000), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_never_over_admits() {
        let limiter = limiter(5, 60);
        let attempts = (0..20).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.try_acquire(Platform::Twitter, 1).await }
        });
        let admitted = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_unconfigured_platform_fails_open() {
        let limiter = limiter(1, 60);
        for _ in 0..10 {
            limiter.acquire(Platform::Linkedin, 1).await.unwrap();
        }
        assert!(limiter.try_acquire(Platform::Linkedin, 500).await);
        assert!(limiter.status(Platform::Linkedin).await.is_none());
    }

    #[tokio::test]
    async fn test_cost_above_capacity_is_rejected() {
        let limiter = limiter(100, 60);
        let result = limiter.acquire(Platform::Twitter, 1600).await;
        assert!(matches!(result, Err(CrosspostError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_reset() {
        let limiter = limiter(4, 60);
        let full = limiter.status(Platform::Twitter).await.unwrap();
        assert_eq!(full.available, 4);
        assert_eq!(full.reset_in, Duration::ZERO);

        limiter.acquire(Platform::Twitter, 3).await.unwrap();
        let status = limiter.status(Platform::Twitter).await.unwrap();
        assert_eq!(status.available, 1);
        assert_eq!(status.capacity, 4);
        assert_eq!(status.reset_in, Duration::from_secs(45));
    }
}

//! Token-bucket rate limiter shared by all model calls.
//!
//! The bucket holds `capacity` tokens and refills **wholesale**: once a full
//! period has elapsed since the last refill, the bucket snaps back to
//! capacity. There is no continuous trickle — this matches per-minute API
//! quotas, which reset on a window boundary rather than accruing smoothly.
//!
//! `acquire` polls cooperatively: it releases the internal lock between
//! checks so concurrent page tasks make progress while one waits.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// A token-bucket gate: `capacity` grants per refill `period`.
pub struct RateLimiter {
    capacity: u32,
    period: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter granting `per_minute` tokens per minute.
    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, Duration::from_secs(60))
    }

    pub fn new(capacity: u32, period: Duration) -> Self {
        Self {
            capacity,
            period,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        if bucket.last_refill.elapsed() >= self.period {
            bucket.tokens = self.capacity;
            bucket.last_refill = Instant::now();
        }
    }

    /// Take one token, waiting until one is available.
    pub async fn acquire(&self) {
        loop {
            {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
            }
            debug!("rate limiter exhausted; waiting for refill");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Tokens currently available (after a lazy refill check).
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_decrements_until_empty() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 1);
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 0);
    }

    #[tokio::test]
    async fn refill_restores_full_capacity_after_period() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Whole-bucket refill, not a trickle.
        assert_eq!(limiter.available().await, 2);
    }

    #[tokio::test]
    async fn acquire_blocks_until_refill() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // The second acquire had to wait for at least one poll interval.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}

//! Token-bucket rate limiting for provider calls.

use std::sync::Mutex;

use tokio::time::{sleep, Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled continuously at `capacity` per minute.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn per_minute(capacity: u32) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `n` tokens now, or report how long until they are available.
    fn try_take(&self, n: f64) -> std::result::Result<(), Duration> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= n {
            state.tokens -= n;
            Ok(())
        } else {
            let deficit = n - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// Wait until `n` tokens are available, bounded by `deadline`.
    pub async fn acquire(&self, n: f64, deadline: Option<Instant>) -> Result<()> {
        loop {
            let wait = match self.try_take(n) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if wait > remaining {
                    return Err(Error::deadline_exceeded(wait.as_millis() as u64));
                }
            }

            sleep(wait).await;
        }
    }
}

/// Per-provider rate limiter: a requests-per-minute bucket plus an optional
/// tokens-per-minute bucket for providers that enforce one.
#[derive(Debug)]
pub struct RateLimiter {
    requests: TokenBucket,
    tokens: Option<TokenBucket>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: Option<u32>) -> Self {
        Self {
            requests: TokenBucket::per_minute(requests_per_minute),
            tokens: tokens_per_minute.map(TokenBucket::per_minute),
        }
    }

    /// Acquire one request slot and (when enforced) the estimated token mass.
    pub async fn acquire(&self, estimated_tokens: u64, deadline: Option<Instant>) -> Result<()> {
        self.requests.acquire(1.0, deadline).await?;
        if let Some(tokens) = &self.tokens {
            tokens.acquire(estimated_tokens as f64, deadline).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bucket_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::per_minute(10);
        for _ in 0..10 {
            bucket.acquire(1.0, None).await.unwrap();
        }
        // The 11th request needs a refill.
        assert!(bucket.try_take(1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::per_minute(60);
        for _ in 0..60 {
            bucket.acquire(1.0, None).await.unwrap();
        }
        assert!(bucket.try_take(1.0).is_err());

        // One token per second at 60/min.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bucket.try_take(1.0).is_ok());
        assert!(bucket.try_take(1.0).is_ok());
        assert!(bucket.try_take(1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_beats_bucket_wait() {
        let bucket = TokenBucket::per_minute(1);
        bucket.acquire(1.0, None).await.unwrap();

        // The next token is a minute away; the deadline is 1s away.
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = bucket.acquire(1.0, Some(deadline)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_token_bucket_enforced() {
        let limiter = RateLimiter::new(100, Some(1000));
        limiter.acquire(900, None).await.unwrap();

        // 200 more estimated tokens exceed the per-minute budget right now.
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = limiter.acquire(200, Some(deadline)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }
}

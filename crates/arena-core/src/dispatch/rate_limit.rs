//! Per-adapter token bucket.
//!
//! Capacity equals the per-minute allowance; tokens refill continuously at
//! `calls_per_minute / 60` per second. `acquire` waits for a token instead
//! of failing, so a throttled adapter only delays itself.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Float slack when comparing token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// Shortest sleep between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket allowing `calls_per_minute` calls per minute, starting full.
    pub fn per_minute(calls_per_minute: u32) -> Self {
        let calls = f64::from(calls_per_minute.max(1));
        Self {
            capacity: calls,
            refill_per_sec: calls / 60.0,
            state: Mutex::new(BucketState {
                tokens: calls,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 - TOKEN_EPSILON {
            state.tokens = (state.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Take one token, waiting for a refill if necessary. Returns the time waited.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 - TOKEN_EPSILON {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    return started.elapsed();
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec).max(MIN_WAIT)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

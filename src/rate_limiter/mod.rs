//! Per-exchange token-bucket rate limiter.
//!
//! A continuous-refill token bucket with `penalize` support, so a venue's
//! own 429 response drains the bucket and suppresses refill for an
//! exponentially growing backoff window instead of a fixed reset.

use crate::config::RateLimitConfig;
use crate::error::{ObservatoryError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;

const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(64);

struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Refill is suppressed until this instant, set by `penalize`.
    suppressed_until: Option<Instant>,
    consecutive_penalties: u32,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        if let Some(until) = self.suppressed_until {
            if now < until {
                self.last_refill = now;
                return;
            }
            self.suppressed_until = None;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Observability counters exposed via `/api/health/performance`.
#[derive(Default)]
pub struct RateLimiterCounters {
    pub acquires: AtomicU64,
    pub blocks: AtomicU64,
    pub penalties: AtomicU64,
}

pub struct RateLimiter {
    state: Mutex<BucketState>,
    pub counters: RateLimiterCounters,
    base_backoff: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity as f64,
                capacity: config.capacity as f64,
                refill_per_sec: config.refill_per_sec,
                last_refill: Instant::now(),
                suppressed_until: None,
                consecutive_penalties: 0,
            }),
            counters: RateLimiterCounters::default(),
            base_backoff: DEFAULT_BASE_BACKOFF,
        })
    }

    /// Current token count, for observability.
    pub fn current_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill();
        state.tokens
    }

    /// Block until `n` tokens are available, or return `Cancelled` if
    /// `cancel` fires first.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<()> {
        self.counters.acquires.fetch_add(1, Ordering::Relaxed);
        loop {
            let wait = {
                let mut state = self.state.lock();
                state.refill();
                if state.tokens >= n as f64 {
                    state.tokens -= n as f64;
                    None
                } else {
                    let deficit = n as f64 - state.tokens;
                    let secs = if state.refill_per_sec > 0.0 {
                        deficit / state.refill_per_sec
                    } else {
                        0.25
                    };
                    Some(Duration::from_secs_f64(secs.max(0.01)))
                }
            };

            match wait {
                None => return Ok(()),
                Some(delay) => {
                    self.counters.blocks.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = cancel.cancelled() => return Err(ObservatoryError::Cancelled),
                    }
                }
            }
        }
    }

    /// Forcibly drain the bucket and suppress refill for `duration`,
    /// doubling the *next* penalty's duration (capped) if penalties are
    /// issued back-to-back without an intervening successful acquire.
    pub fn penalize(&self, duration: Duration) {
        self.counters.penalties.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.consecutive_penalties += 1;
        let backoff = self.backoff_for(state.consecutive_penalties);
        let effective = duration.max(backoff);
        state.tokens = 0.0;
        state.suppressed_until = Some(Instant::now() + effective);
        warn!(
            penalty_number = state.consecutive_penalties,
            duration_secs = effective.as_secs_f64(),
            "rate limiter penalized"
        );
    }

    /// Reset the penalty counter after a successful, non-429 response.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_penalties > 0 {
            debug!("rate limiter penalty streak cleared");
        }
        state.consecutive_penalties = 0;
    }

    fn backoff_for(&self, penalty_number: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(penalty_number.saturating_sub(1).min(6));
        (self.base_backoff * multiplier).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    #[tokio::test]
    async fn acquire_under_capacity_does_not_block() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 5,
            refill_per_sec: 1.0,
        });
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            limiter.acquire(1, &cancel).await.unwrap();
        }
        assert!(limiter.current_tokens() < 1.0);
    }

    #[tokio::test]
    async fn acquire_respects_cancellation() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 1,
            refill_per_sec: 0.001,
        });
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();

        let limiter2 = limiter.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { limiter2.acquire(1, &cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("should finish promptly")
            .unwrap();
        assert!(matches!(result, Err(ObservatoryError::Cancelled)));
    }

    #[tokio::test]
    async fn penalize_drains_bucket_and_blocks_until_backoff_elapses() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 10,
            refill_per_sec: 1000.0,
        });
        limiter.penalize(Duration::from_millis(50));
        assert_eq!(limiter.current_tokens(), 0.0);

        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.acquire(1, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn repeated_penalties_double_backoff() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 10,
            refill_per_sec: 1.0,
        });
        assert_eq!(limiter.backoff_for(1), Duration::from_secs(1));
        assert_eq!(limiter.backoff_for(2), Duration::from_secs(2));
        assert_eq!(limiter.backoff_for(3), Duration::from_secs(4));
    }
}

//! Shared rate-limited HTTP client.
//!
//! A single `reqwest::Client` shared across adapters, exponential backoff
//! on retryable failures, 429 treated specially (drives the adapter's rate
//! limiter into `penalize`), any other 4xx treated as terminal.

use crate::cancellation::CancellationToken;
use crate::error::{ObservatoryError, Result};
use crate::rate_limiter::RateLimiter;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A venue-scoped HTTP client: owns the shared `reqwest::Client` plus that
/// venue's rate limiter, so every adapter call goes through `acquire` before
/// hitting the network.
#[derive(Clone)]
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    venue: &'static str,
}

impl RateLimitedClient {
    pub fn new(client: Client, limiter: Arc<RateLimiter>, venue: &'static str) -> Self {
        Self {
            client,
            limiter,
            venue,
        }
    }

    /// This venue's rate limiter, for callers that need to read its spend
    /// counters (e.g. the scheduler's per-cycle report) rather than drive
    /// requests through it.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn shared_client(timeout: Duration, user_agent: &str) -> Client {
        Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .expect("failed to build shared HTTP client")
    }

    /// GET `url` with `query`, retrying retryable failures with exponential
    /// backoff up to `MAX_ATTEMPTS`. A non-429 4xx is terminal and returned
    /// immediately as `Upstream4xx`.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire(1, cancel).await?;

            let request = self.client.get(url).query(query);
            let outcome = tokio::select! {
                res = tokio::time::timeout(PER_REQUEST_TIMEOUT, request.send()) => res,
                _ = cancel.cancelled() => return Err(ObservatoryError::Cancelled),
            };

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        self.limiter.record_success();
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| ObservatoryError::Parse(format!("{}: {}", self.venue, e)));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(backoff);
                        self.limiter.penalize(retry_after);
                        warn!(venue = self.venue, attempt, "rate limited (429)");
                    } else if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ObservatoryError::Upstream4xx {
                            status: status.as_u16(),
                            body,
                        });
                    } else {
                        warn!(venue = self.venue, %status, attempt, "upstream 5xx");
                    }
                }
                Ok(Err(e)) => {
                    warn!(venue = self.venue, attempt, error = %e, "network error");
                }
                Err(_) => {
                    warn!(venue = self.venue, attempt, "request timed out");
                }
            }

            if attempt < MAX_ATTEMPTS {
                debug!(venue = self.venue, backoff_ms = backoff.as_millis(), "retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(ObservatoryError::Cancelled),
                }
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }

        Err(ObservatoryError::UpstreamRetryable(format!(
            "{}: max retries ({}) exceeded for {}",
            self.venue, MAX_ATTEMPTS, url
        )))
    }

    /// POST a JSON body and decode a JSON response, with the same
    /// retry/backoff/429 handling as [`Self::get_json`]. Used by venues
    /// whose public API is a single RPC-style endpoint (Hyperliquid, dYdX)
    /// rather than a REST resource tree.
    pub async fn post_json<B: serde::Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire(1, cancel).await?;

            let request = self.client.post(url).json(body);
            let outcome = tokio::select! {
                res = tokio::time::timeout(PER_REQUEST_TIMEOUT, request.send()) => res,
                _ = cancel.cancelled() => return Err(ObservatoryError::Cancelled),
            };

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        self.limiter.record_success();
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| ObservatoryError::Parse(format!("{}: {}", self.venue, e)));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.limiter.penalize(backoff);
                        warn!(venue = self.venue, attempt, "rate limited (429)");
                    } else if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ObservatoryError::Upstream4xx {
                            status: status.as_u16(),
                            body,
                        });
                    } else {
                        warn!(venue = self.venue, %status, attempt, "upstream 5xx");
                    }
                }
                Ok(Err(e)) => {
                    warn!(venue = self.venue, attempt, error = %e, "network error");
                }
                Err(_) => {
                    warn!(venue = self.venue, attempt, "request timed out");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(ObservatoryError::Cancelled),
                }
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }

        Err(ObservatoryError::UpstreamRetryable(format!(
            "{}: max retries ({}) exceeded for {}",
            self.venue, MAX_ATTEMPTS, url
        )))
    }
}

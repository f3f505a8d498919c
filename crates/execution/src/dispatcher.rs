//! HTTP dispatch with bounded, idempotency-aware retries.
//!
//! The dispatcher owns the pooled `reqwest::Client`, the per-exchange token
//! buckets, and the retry policy. Reads are retried on connection failures,
//! timeouts, 5xx and throttling. Writes are retried only when the exchange
//! certainly did not act on them: the connection was never established, or
//! the exchange explicitly throttled the request. A write that timed out or
//! hit a 5xx is returned as-is and never re-sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, warn};

use exgw_core::config::DispatchConfig;
use exgw_core::types::ExchangeId;

use crate::normalizer::{RawResponse, ResponseNormalizer, TransportError};
use crate::rate_limiter::RateLimiter;
use crate::request::{HttpMethod, SignedRequest};

/// Binance reports consumed request weight in this header.
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// Retry bound and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Doubles from `initial_backoff`; a server-provided `Retry-After` raises
    /// the delay. Never exceeds `max_backoff`.
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        let exponential = self.initial_backoff.saturating_mul(factor);
        retry_after
            .map_or(exponential, |hint| hint.max(exponential))
            .min(self.max_backoff)
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

/// Result of [`Dispatcher::send`]: the final attempt's outcome and how many
/// attempts it took.
#[derive(Debug)]
pub struct Dispatched {
    pub attempts: u32,
    pub result: Result<RawResponse, TransportError>,
}

enum Verdict {
    Done,
    Retry(Option<Duration>),
}

/// Sends signed requests.
pub struct Dispatcher {
    client: Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    limiters: HashMap<ExchangeId, RateLimiter>,
}

impl Dispatcher {
    /// Dispatcher with each exchange's published request budget.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            policy,
            sleeper: Arc::new(TokioSleeper),
            limiters: ExchangeId::ALL
                .into_iter()
                .map(|ex| (ex, RateLimiter::for_exchange(ex)))
                .collect(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_rate_limiter(mut self, exchange: ExchangeId, limiter: RateLimiter) -> Self {
        self.limiters.insert(exchange, limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying within the policy bound.
    ///
    /// `normalizer` decides whether a response is throttling. The returned
    /// result is the last attempt's; mapping it is the caller's job.
    pub async fn send<N>(&self, request: &SignedRequest, normalizer: &N) -> Dispatched
    where
        N: ResponseNormalizer + ?Sized,
    {
        let limiter = self.limiters.get(&request.exchange);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(limiter) = limiter {
                limiter.acquire(request.weight).await;
            }

            let started = Instant::now();
            let result = self.send_once(request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let verdict = match &result {
                Ok(raw) => {
                    self.sync_budget(request.exchange, raw);
                    debug!(
                        exchange = %request.exchange,
                        purpose = %request.purpose,
                        method = %request.method,
                        path = %request.path,
                        status = raw.status,
                        attempt,
                        latency_ms,
                        "upstream response"
                    );
                    if normalizer.is_throttled(raw) {
                        warn!(exchange = %request.exchange, path = %request.path, attempt, "upstream throttled request");
                        Verdict::Retry(raw.retry_after())
                    } else if raw.is_server_error() && !request.is_write() {
                        Verdict::Retry(None)
                    } else {
                        Verdict::Done
                    }
                }
                Err(err) => {
                    debug!(
                        exchange = %request.exchange,
                        path = %request.path,
                        attempt,
                        latency_ms,
                        error = %err,
                        "transport failure"
                    );
                    match err {
                        TransportError::Connect(_) => Verdict::Retry(None),
                        TransportError::Timeout(_) | TransportError::Interrupted(_)
                            if !request.is_write() =>
                        {
                            Verdict::Retry(None)
                        }
                        _ => {
                            if request.is_write() && err.may_have_reached_upstream() {
                                warn!(
                                    exchange = %request.exchange,
                                    purpose = %request.purpose,
                                    error = %err,
                                    "write outcome unknown, not retrying"
                                );
                            }
                            Verdict::Done
                        }
                    }
                }
            };

            match verdict {
                Verdict::Retry(hint) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt, hint);
                    debug!(exchange = %request.exchange, path = %request.path, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    self.sleeper.sleep(delay).await;
                }
                _ => return Dispatched { attempts: attempt, result },
            }
        }
    }

    async fn send_once(&self, request: &SignedRequest) -> Result<RawResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn sync_budget(&self, exchange: ExchangeId, raw: &RawResponse) {
        let Some(limiter) = self.limiters.get(&exchange) else {
            return;
        };
        if let Some(used) = raw
            .header(USED_WEIGHT_HEADER)
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            limiter.update_from_header(used);
            if limiter.usage_percent() > 80.0 {
                warn!(%exchange, used_weight = used, "request budget nearly exhausted");
            }
        }
    }
}

/// Classify a `reqwest` failure. The URL is stripped: it carries signatures.
fn transport_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    let err = err.without_url();
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Interrupted(err.to_string())
    }
}

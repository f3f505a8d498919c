//! Client-side token buckets, one per exchange.
//!
//! Each exchange publishes a request budget. Spending it locally before a
//! request leaves keeps the gateway from provoking 429s in the first place;
//! the dispatcher still handles the throttling responses that slip through.
//! Waiting is async (`tokio::time::sleep`) so a drained bucket parks the
//! calling task, not a runtime worker thread.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use exgw_core::types::ExchangeId;

/// Token-bucket rate limiter.
///
/// Tokens are consumed per request (weighted by endpoint cost) and refill
/// continuously at `refill_rate` tokens per second, never above
/// `max_tokens`.
pub struct RateLimiter {
    max_tokens: u32,
    refill_rate: f64,
    state: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// - `max_tokens`: burst capacity.
    /// - `refill_rate`: tokens added per second.
    pub fn new(max_tokens: u32, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            state: Mutex::new(Bucket {
                tokens: max_tokens as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Budget published by `exchange`.
    pub fn for_exchange(exchange: ExchangeId) -> Self {
        match exchange {
            ExchangeId::Binance => Self::binance_default(),
            ExchangeId::Mexc => Self::mexc_default(),
            ExchangeId::Bybit => Self::bybit_default(),
            ExchangeId::Bitget => Self::bitget_default(),
        }
    }

    /// Binance spot: 1200 request weight per minute (20 weight/second).
    pub fn binance_default() -> Self {
        Self::new(1200, 20.0)
    }

    /// MEXC spot: 500 requests per 10 seconds per endpoint group.
    pub fn mexc_default() -> Self {
        Self::new(500, 50.0)
    }

    /// Bybit v5: 120 requests per second.
    pub fn bybit_default() -> Self {
        Self::new(120, 120.0)
    }

    /// Bitget v2 spot: 20 requests per second on the tightest trade endpoints.
    pub fn bitget_default() -> Self {
        Self::new(20, 20.0)
    }

    /// Try to consume `weight` tokens without waiting.
    ///
    /// Weights above the burst capacity are clamped to it so that an
    /// expensive endpoint can still proceed once the bucket is full.
    pub fn try_acquire(&self, weight: u32) -> bool {
        self.wait_time(weight).is_zero()
    }

    /// Wait until `weight` tokens are available, then consume them.
    pub async fn acquire(&self, weight: u32) {
        loop {
            let wait = self.wait_time(weight);
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait.min(Duration::from_millis(100))).await;
        }
    }

    /// Consume `weight` tokens if available and return zero, otherwise return
    /// the estimated wait until they will be.
    fn wait_time(&self, weight: u32) -> Duration {
        let needed = weight.min(self.max_tokens) as f64;
        let mut bucket = self.state.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::from_millis(100);
        }
        let deficit = needed - bucket.tokens;
        Duration::from_secs_f64(deficit / self.refill_rate).max(Duration::from_millis(1))
    }

    /// Current number of available tokens (truncated).
    pub fn available_tokens(&self) -> u32 {
        let mut bucket = self.state.lock();
        self.refill(&mut bucket);
        bucket.tokens as u32
    }

    /// Share of the budget in use: 0.0 for a full bucket, 100.0 for an empty one.
    pub fn usage_percent(&self) -> f64 {
        let available = {
            let mut bucket = self.state.lock();
            self.refill(&mut bucket);
            bucket.tokens
        };
        let used = self.max_tokens as f64 - available;
        (used / self.max_tokens as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Synchronize from the exchange's own accounting.
    ///
    /// Binance reports the weight used in the current minute in
    /// `X-MBX-USED-WEIGHT-1M`; the bucket is reset to what remains.
    pub fn update_from_header(&self, used_weight: u32) {
        let mut bucket = self.state.lock();
        bucket.tokens = self.max_tokens.saturating_sub(used_weight) as f64;
        bucket.last_refill = Instant::now();
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens as f64);
            bucket.last_refill = now;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_tokens", &self.max_tokens)
            .field("refill_rate", &self.refill_rate)
            .finish()
    }
}

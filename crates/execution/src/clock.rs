//! Wall clock plus a per-exchange offset cache.
//!
//! Signed requests carry a millisecond timestamp that each exchange checks
//! against its own clock and receive window. The offset for an exchange is
//! learned from a server-time probe:
//!
//! ```text
//! offset = server_time - (sent + received) / 2
//! ```
//!
//! and applied to every later timestamp for that exchange. Offsets are
//! last-writer-wins; concurrent refreshes only ever store a valid
//! measurement.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use exgw_core::types::{ExchangeId, Timestamp};

/// Source of signing timestamps.
pub trait ClockSource: Send + Sync {
    /// Local wall-clock time.
    fn now(&self) -> Timestamp;

    /// Cached offset for `exchange` in milliseconds; zero until measured.
    fn offset_ms(&self, exchange: ExchangeId) -> i64;

    /// Store a freshly measured offset.
    fn record_offset(&self, exchange: ExchangeId, offset_ms: i64);

    /// Local time corrected by the exchange's offset.
    fn adjusted_now(&self, exchange: ExchangeId) -> Timestamp {
        self.now().offset_by(self.offset_ms(exchange))
    }
}

/// Offset measured by a server-time round trip.
///
/// The server stamped its reply somewhere between `sent` and `received`;
/// the midpoint is the best local estimate of that instant.
pub fn offset_from_probe(sent: Timestamp, received: Timestamp, server: Timestamp) -> i64 {
    let midpoint = sent.as_millis() / 2 + received.as_millis() / 2
        + (sent.as_millis() % 2 + received.as_millis() % 2) / 2;
    server.signed_diff(&Timestamp::from_millis(midpoint))
}

/// System wall clock with a concurrent offset table.
#[derive(Debug, Default)]
pub struct SystemClock {
    offsets: DashMap<ExchangeId, i64>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClockSource for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn offset_ms(&self, exchange: ExchangeId) -> i64 {
        self.offsets.get(&exchange).map(|o| *o).unwrap_or(0)
    }

    fn record_offset(&self, exchange: ExchangeId, offset_ms: i64) {
        self.offsets.insert(exchange, offset_ms);
    }
}

/// A clock that only moves when told to. Used to make signed requests
/// reproducible.
#[derive(Debug)]
pub struct FixedClock {
    now_ms: AtomicU64,
    offsets: DashMap<ExchangeId, i64>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now_ms: AtomicU64::new(now.as_millis()),
            offsets: DashMap::new(),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now_ms.store(now.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl ClockSource for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_ms.load(Ordering::SeqCst))
    }

    fn offset_ms(&self, exchange: ExchangeId) -> i64 {
        self.offsets.get(&exchange).map(|o| *o).unwrap_or(0)
    }

    fn record_offset(&self, exchange: ExchangeId, offset_ms: i64) {
        self.offsets.insert(exchange, offset_ms);
    }
}

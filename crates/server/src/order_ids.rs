//! Client order id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique, monotonic client order ids.
///
/// Format: `exgw_{instance}_{counter:06}` (e.g. `exgw_1700000000000_000042`).
/// The instance defaults to the process start time in milliseconds, so ids
/// do not repeat across restarts. Every id fits the 36-character limit the
/// exchanges place on client order ids.
#[derive(Debug)]
pub struct ClientOrderIds {
    instance: String,
    counter: AtomicU64,
}

impl ClientOrderIds {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Generator keyed by the current wall-clock time.
    pub fn from_start_time() -> Self {
        Self::new(chrono::Utc::now().timestamp_millis().to_string())
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("exgw_{}_{:06}", self.instance, n)
    }
}

impl Default for ClientOrderIds {
    fn default() -> Self {
        Self::from_start_time()
    }
}

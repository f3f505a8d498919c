//! Wall-clock timestamps in epoch milliseconds.
//!
//! Every supported exchange authenticates requests with a `timestamp`
//! parameter in milliseconds since the Unix epoch, compared against the
//! exchange's own clock. Unlike a monotonic clock, [`Timestamp::now`] reads
//! the system wall clock, so it can be corrected by a learned offset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Millisecond-precision wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Capture the current wall-clock time.
    #[inline]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Create a timestamp from milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Shift by a signed millisecond offset, saturating at zero.
    #[inline]
    pub const fn offset_by(&self, offset_ms: i64) -> Self {
        if offset_ms >= 0 {
            Self(self.0.saturating_add(offset_ms as u64))
        } else {
            Self(self.0.saturating_sub(offset_ms.unsigned_abs()))
        }
    }

    /// Signed difference `self - other` in milliseconds.
    #[inline]
    pub const fn signed_diff(&self, other: &Timestamp) -> i64 {
        self.0 as i64 - other.0 as i64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Rate limiting for scanner operation classes.
//!
//! Scan workloads vary wildly in cost: a real-time file event is cheap and
//! frequent, a signature database update is expensive and rare. This module
//! throttles each *operation class* independently with a token bucket, so a
//! burst of file events can never starve an interactive scan.
//!
//! ## Components
//!
//! - [`RateLimit`]: immutable per-class limit (calls per period, plus burst)
//! - [`TokenBucket`]: the accounting for one class, safe to share across threads
//! - [`RateLimitRegistry`]: the class-to-bucket map call sites talk to
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use scan_throttle::limiter::{RateLimit, TokenBucket};
//!
//! // 5 calls per second, with room for a burst of 2 more.
//! let limit = RateLimit::new(5, Duration::from_secs(1), Some(2)).unwrap();
//! let bucket = TokenBucket::new(limit);
//!
//! // The bucket starts full: capacity = calls + burst.
//! for _ in 0..7 {
//!     assert!(bucket.try_acquire(1).unwrap().is_allowed());
//! }
//! assert!(!bucket.try_acquire(1).unwrap().is_allowed());
//! ```
//!
//! ## Low-Level Use
//!
//! Most callers go through [`RateLimitRegistry::check`] or
//! [`RateLimitRegistry::wait_and_check`] and never touch buckets directly.
//! Buckets are exposed for callers that manage their own class mapping.

mod bucket;
mod registry;

pub use bucket::{BucketStatus, LimitDecision, TokenBucket};
pub use registry::{OperationStatus, RateLimitRegistry};

use std::time::Duration;

use crate::error::ThrottleError;

/// An immutable rate limit for one operation class.
///
/// The steady-state rate is `calls / period`; `burst` adds extra bucket
/// capacity for short spikes above that rate. A bucket built from this
/// limit holds at most `calls + burst` tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    calls: u32,
    period: Duration,
    burst: Option<u32>,
}

impl RateLimit {
    /// Create a validated rate limit.
    ///
    /// `calls` must be at least 1 and `period` must be non-zero.
    pub fn new(calls: u32, period: Duration, burst: Option<u32>) -> Result<Self, ThrottleError> {
        if calls == 0 {
            return Err(ThrottleError::InvalidLimit(
                "calls must be greater than zero".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(ThrottleError::InvalidLimit(
                "period must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            calls,
            period,
            burst,
        })
    }

    // Built-in limits are compile-time values that already satisfy the
    // invariants, so they skip the runtime checks.
    pub(crate) const fn from_parts(calls: u32, period: Duration, burst: Option<u32>) -> Self {
        Self {
            calls,
            period,
            burst,
        }
    }

    /// Maximum operations permitted per [`period`](Self::period).
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Window over which [`calls`](Self::calls) applies.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Extra allowance for short spikes, if any.
    pub fn burst(&self) -> Option<u32> {
        self.burst
    }

    /// Maximum tokens a bucket built from this limit can hold.
    pub fn capacity(&self) -> u32 {
        self.calls.saturating_add(self.burst.unwrap_or(0))
    }

    /// Tokens refilled per second at steady state.
    pub fn refill_rate(&self) -> f64 {
        self.calls as f64 / self.period.as_secs_f64()
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RateLimit(calls={}, period={:?}, burst={})",
            self.calls,
            self.period.as_secs_f64(),
            match self.burst {
                Some(burst) => burst.to_string(),
                None => "none".to_string(),
            }
        )
    }
}

/// Built-in rate limits per operation class.
///
/// These apply until configuration overrides them. The numbers assume a
/// desktop scanner: real-time file events dominate, interactive scans get
/// generous budgets, and anything that talks to the network or touches
/// system state is kept slow.
pub mod defaults {
    use std::time::Duration;

    use super::RateLimit;

    /// Limit applied to operation classes that are neither configured nor
    /// listed in the built-in table.
    pub const FALLBACK: RateLimit =
        RateLimit::from_parts(100, Duration::from_secs(60), Some(20));

    const BUILT_IN: &[(&str, RateLimit)] = &[
        (
            "quick_scan",
            RateLimit::from_parts(500, Duration::from_secs(60), Some(100)),
        ),
        (
            "full_scan",
            RateLimit::from_parts(200, Duration::from_secs(60), Some(50)),
        ),
        (
            "background_scan",
            RateLimit::from_parts(50, Duration::from_secs(60), Some(10)),
        ),
        (
            "real_time_scan",
            RateLimit::from_parts(1000, Duration::from_secs(60), Some(200)),
        ),
        (
            "file_scan",
            RateLimit::from_parts(100, Duration::from_secs(60), Some(20)),
        ),
        (
            "directory_scan",
            RateLimit::from_parts(10, Duration::from_secs(60), Some(5)),
        ),
        (
            "quick_directory_scan",
            RateLimit::from_parts(30, Duration::from_secs(60), Some(15)),
        ),
        (
            "virus_db_update",
            RateLimit::from_parts(1, Duration::from_secs(3600), None),
        ),
        (
            "network_request",
            RateLimit::from_parts(50, Duration::from_secs(60), Some(10)),
        ),
        (
            "quarantine_action",
            RateLimit::from_parts(20, Duration::from_secs(60), None),
        ),
        (
            "system_command",
            RateLimit::from_parts(5, Duration::from_secs(60), None),
        ),
    ];

    /// The full built-in table, keyed by operation class.
    pub fn default_limits() -> std::collections::HashMap<String, RateLimit> {
        BUILT_IN
            .iter()
            .map(|(class, limit)| (class.to_string(), limit.clone()))
            .collect()
    }

    /// Look up the built-in limit for an operation class.
    pub fn limit_for(operation_class: &str) -> Option<RateLimit> {
        BUILT_IN
            .iter()
            .find(|(class, _)| *class == operation_class)
            .map(|(_, limit)| limit.clone())
    }
}

//! The operation-class registry call sites talk to.
//!
//! The registry owns one [`TokenBucket`] per operation class. Buckets are
//! created lazily from the built-in defaults the first time a class is
//! referenced, and replaced wholesale when a class is reconfigured, so
//! capacity and refill-rate changes take effect immediately.
//!
//! # Example
//!
//! ```rust
//! use scan_throttle::RateLimitRegistry;
//!
//! let registry = RateLimitRegistry::new();
//!
//! // Defaults apply until configuration overrides them.
//! assert!(registry.check("quick_scan", 1).is_ok());
//!
//! let status = registry.get_operation_status("quick_scan");
//! assert_eq!(status.capacity, 600);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::config::RateLimitingConfig;
use crate::error::{ConfigurationError, ThrottleError};
use crate::limiter::{defaults, LimitDecision, RateLimit, TokenBucket};

/// Merged limit and bucket snapshot for one operation class, for UI and
/// log display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStatus {
    /// The operation class this status describes
    pub operation_class: String,
    /// Maximum operations permitted per period
    pub calls: u32,
    /// Window length in seconds
    pub period_secs: f64,
    /// Extra burst allowance, if any
    pub burst: Option<u32>,
    /// Tokens currently available
    pub tokens_available: f64,
    /// Maximum tokens the bucket can hold
    pub capacity: u32,
}

/// Registry state: the effective limits and the live buckets, guarded
/// together so readers never observe a limit without its bucket swap.
struct Inner {
    limits: HashMap<String, RateLimit>,
    buckets: HashMap<String, Arc<TokenBucket>>,
}

/// Maps operation classes to their token buckets.
///
/// The registry is the primary entry point for rate limiting: call sites
/// name their operation class and either [`check`](Self::check) (fail
/// fast) or [`wait_and_check`](Self::wait_and_check) (bounded wait).
///
/// There is no hidden global instance. Construct one registry at startup
/// and share it behind an [`Arc`]; tests construct their own isolated
/// registries.
///
/// The registry-level lock only guards the class-to-bucket mapping; token
/// arithmetic happens under each bucket's own lock. Reconfiguration swaps
/// in a fresh bucket rather than patching the old one, so in-flight
/// acquisitions finish against the old state while new calls see the new
/// limit.
pub struct RateLimitRegistry {
    inner: RwLock<Inner>,
}

impl RateLimitRegistry {
    /// Create a registry pre-populated with the built-in default limits.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                limits: defaults::default_limits(),
                buckets: HashMap::new(),
            }),
        }
    }

    /// The effective limits: built-in defaults overridden by whatever
    /// configuration has been applied, plus any lazily-added classes.
    pub fn get_current_limits(&self) -> HashMap<String, RateLimit> {
        self.inner.read().unwrap().limits.clone()
    }

    /// Replace the limit for an operation class.
    ///
    /// Builds a fresh bucket at the new limit's full capacity and swaps it
    /// in atomically. The token count does not carry over from the old
    /// bucket; a reconfigured class starts with its full budget.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::InvalidLimit`] when `calls` is zero or `period` is
    /// zero.
    pub fn update_rate_limit(
        &self,
        operation_class: &str,
        calls: u32,
        period: Duration,
        burst: Option<u32>,
    ) -> Result<(), ThrottleError> {
        let limit = RateLimit::new(calls, period, burst)?;
        self.apply_limit(operation_class, limit);
        Ok(())
    }

    /// Apply a validated configuration section.
    ///
    /// Every valid entry that differs from the current limit is applied;
    /// entries identical to the current limit are skipped so a repeated
    /// reload of the same file does not reset live buckets. Invalid
    /// entries are logged, collected into the returned list, and skipped;
    /// a bad entry never aborts the rest of the reload, and the affected
    /// class keeps its previous bucket.
    pub fn reload_configuration(&self, config: &RateLimitingConfig) -> Vec<ConfigurationError> {
        let (limits, errors) = config.validate();

        for error in &errors {
            tracing::warn!("Skipping invalid rate limit entry: {}", error);
        }

        for (operation_class, limit) in limits {
            let unchanged = {
                let inner = self.inner.read().unwrap();
                inner.limits.get(&operation_class) == Some(&limit)
            };
            if unchanged {
                tracing::debug!(
                    "Rate limit for {} unchanged, keeping existing bucket",
                    operation_class
                );
                continue;
            }
            self.apply_limit(&operation_class, limit);
        }

        errors
    }

    /// Load the `rate_limiting` section from a JSON file and apply it.
    ///
    /// Entry-level validation failures are returned fail-soft, as in
    /// [`reload_configuration`](Self::reload_configuration).
    ///
    /// # Errors
    ///
    /// Unreadable files and malformed top-level JSON are hard errors; the
    /// previous configuration stays in effect.
    pub async fn reload_from_file(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Vec<ConfigurationError>, ThrottleError> {
        let config = crate::config::load_from_file(path).await?;
        Ok(self.reload_configuration(&config))
    }

    /// Ask for permission to run `cost` operations under a class, without
    /// blocking.
    ///
    /// This is the fail-fast contract for background and automated work
    /// that must not stall: on denial it returns
    /// [`ThrottleError::RateLimitExceeded`] carrying the advisory wait so
    /// the caller can sleep, retry, or abort on its own schedule.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::RateLimitExceeded`] on denial;
    /// [`ThrottleError::InvalidCost`] / [`ThrottleError::CostExceedsCapacity`]
    /// for unsatisfiable costs.
    pub fn check(&self, operation_class: &str, cost: u32) -> Result<(), ThrottleError> {
        let bucket = self.bucket_for(operation_class);
        match bucket.try_acquire(cost)? {
            LimitDecision::Allowed => Ok(()),
            LimitDecision::Denied { wait } => {
                tracing::warn!(
                    "Rate limit exceeded for {}. Wait time: {:.1} seconds",
                    operation_class,
                    wait.as_secs_f64()
                );
                Err(ThrottleError::RateLimitExceeded {
                    operation_class: operation_class.to_string(),
                    retry_after: wait,
                })
            }
        }
    }

    /// Ask for permission, waiting up to `timeout` for tokens to refill.
    ///
    /// This is the contract for interactive, user-initiated operations
    /// where a short wait beats an outright failure. The wait is a bounded
    /// sleep-and-recheck loop; `timeout` of `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::RateLimitTimeout`] when the timeout elapses before
    /// tokens become available.
    pub async fn wait_and_check(
        &self,
        operation_class: &str,
        cost: u32,
        timeout: Option<Duration>,
    ) -> Result<(), ThrottleError> {
        let bucket = self.bucket_for(operation_class);
        if bucket.acquire(cost, timeout).await? {
            return Ok(());
        }

        // acquire only reports failure when a deadline was given
        let timeout = timeout.unwrap_or(Duration::ZERO);
        tracing::warn!(
            "Rate limit wait timed out for {} after {:.2} seconds",
            operation_class,
            timeout.as_secs_f64()
        );
        Err(ThrottleError::RateLimitTimeout {
            operation_class: operation_class.to_string(),
            timeout,
        })
    }

    /// Merged limit and bucket snapshot for one operation class.
    ///
    /// References the class, creating its bucket from defaults if this is
    /// the first time it is seen.
    pub fn get_operation_status(&self, operation_class: &str) -> OperationStatus {
        let bucket = self.bucket_for(operation_class);
        let status = bucket.status();
        let limit = bucket.limit();
        OperationStatus {
            operation_class: operation_class.to_string(),
            calls: limit.calls(),
            period_secs: limit.period().as_secs_f64(),
            burst: limit.burst(),
            tokens_available: status.tokens,
            capacity: status.capacity,
        }
    }

    /// Look up the bucket for a class, creating it lazily.
    ///
    /// Unknown classes fall back to [`defaults::FALLBACK`]; the system
    /// stays open to operation classes it has never heard of.
    fn bucket_for(&self, operation_class: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.inner.read().unwrap().buckets.get(operation_class) {
            return bucket.clone();
        }

        let mut inner = self.inner.write().unwrap();
        // Another thread may have created it between the locks.
        if let Some(bucket) = inner.buckets.get(operation_class) {
            return bucket.clone();
        }

        let limit = match inner.limits.get(operation_class) {
            Some(limit) => limit.clone(),
            None => {
                tracing::debug!(
                    "No configured limit for {}, using fallback {}",
                    operation_class,
                    defaults::FALLBACK
                );
                inner
                    .limits
                    .insert(operation_class.to_string(), defaults::FALLBACK);
                defaults::FALLBACK
            }
        };

        let bucket = Arc::new(TokenBucket::new(limit));
        inner
            .buckets
            .insert(operation_class.to_string(), bucket.clone());
        bucket
    }

    /// Swap in a new limit and a fresh full-capacity bucket for a class.
    fn apply_limit(&self, operation_class: &str, limit: RateLimit) {
        let mut inner = self.inner.write().unwrap();
        let previous = inner
            .limits
            .insert(operation_class.to_string(), limit.clone());
        inner.buckets.insert(
            operation_class.to_string(),
            Arc::new(TokenBucket::new(limit.clone())),
        );
        drop(inner);

        match previous {
            Some(previous) if previous != limit => tracing::info!(
                "Applied custom rate limit for {}: {} (was {})",
                operation_class,
                limit,
                previous
            ),
            _ => tracing::info!(
                "Applied custom rate limit for {}: {}",
                operation_class,
                limit
            ),
        }
    }
}

impl Default for RateLimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("RateLimitRegistry")
            .field("classes", &inner.limits.len())
            .field("active_buckets", &inner.buckets.len())
            .finish()
    }
}

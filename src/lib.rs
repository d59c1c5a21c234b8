//! # scan-throttle
//!
//! Operation-class rate limiting for scanner workloads.
//!
//! Every category of work (a quick scan, a recursive directory walk, a
//! signature database update) is an *operation class* with its own token
//! bucket. Call sites name their class and ask the registry for permission
//! before doing the work; the registry answers immediately (fail-fast) or
//! after a bounded wait.
//!
//! ## Features
//!
//! - Token buckets with continuous refill and burst capacity
//! - Per-operation-class registry with built-in defaults and lazy creation
//! - Fail-fast `check` and bounded-wait `wait_and_check` entry points
//! - JSON configuration with per-entry validation and fail-soft hot reload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan_throttle::RateLimitRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = RateLimitRegistry::new();
//!
//!     // Background work fails fast when the budget is exhausted.
//!     registry.check("background_scan", 1)?;
//!
//!     // Interactive work prefers a short wait over a hard failure.
//!     registry
//!         .wait_and_check("quick_scan", 1, Some(std::time::Duration::from_secs(2)))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod limiter;

// Re-export commonly used types at crate root
pub use error::{ConfigurationError, ThrottleError};
pub use limiter::{
    BucketStatus, LimitDecision, OperationStatus, RateLimit, RateLimitRegistry, TokenBucket,
};

/// Result type alias using ThrottleError
pub type Result<T> = std::result::Result<T, ThrottleError>;

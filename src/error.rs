//! Error types for the scan-throttle library.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all throttle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// A rate limit was constructed with invalid fields
    #[error("invalid rate limit: {0}")]
    InvalidLimit(String),

    /// A token cost of zero was requested
    #[error("token cost must be at least 1")]
    InvalidCost,

    /// The requested cost can never be satisfied by the bucket
    #[error("token cost {cost} exceeds bucket capacity {capacity}")]
    CostExceedsCapacity {
        /// Tokens requested in a single acquisition
        cost: u32,
        /// Maximum tokens the bucket can ever hold
        capacity: u32,
    },

    /// An operation was denied by its rate limit
    #[error("rate limit exceeded for {operation_class}, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Operation class that was throttled
        operation_class: String,
        /// Advisory estimate of when enough tokens will have refilled
        retry_after: Duration,
    },

    /// A bounded wait for tokens expired before any became available
    #[error("rate limit wait timed out for {operation_class} after {timeout:?}")]
    RateLimitTimeout {
        /// Operation class that was throttled
        operation_class: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// A configuration entry failed validation
    #[error("configuration error: {0}")]
    Configuration(ConfigurationError),

    /// Configuration file could not be read
    #[error("failed to read limits file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("failed to parse limits file: {0}")]
    Json(#[from] serde_json::Error),
}

impl ThrottleError {
    /// Advisory wait time attached to a denial, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Check whether this error is an expected operational condition
    /// (a denial or an expired wait) rather than a caller mistake.
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::RateLimitTimeout { .. }
        )
    }
}

/// A rejected configuration entry.
///
/// Produced during configuration reload for entries that fail validation.
/// The reload continues with the remaining entries; these errors are
/// collected and returned so callers can display or log them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    /// The operation class whose entry was rejected
    pub operation_class: String,
    /// Why the entry was rejected
    pub reason: String,
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation_class, self.reason)
    }
}

impl std::error::Error for ConfigurationError {}

impl ConfigurationError {
    /// Create a new configuration error for an operation class.
    pub fn new(operation_class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation_class: operation_class.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigurationError> for ThrottleError {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}

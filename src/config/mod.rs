//! Rate limit configuration: the JSON `rate_limiting` section.
//!
//! Limits arrive as part of the application's settings file, nested under
//! a top-level `rate_limiting` key:
//!
//! ```json
//! {
//!   "rate_limiting": {
//!     "quick_scan": { "calls": 500, "period": 60.0, "burst": 100 },
//!     "virus_db_update": { "calls": 1, "period": 3600.0, "burst": null }
//!   }
//! }
//! ```
//!
//! Keys are operation-class names; unrecognized keys define new custom
//! classes. Entries are kept as raw JSON until validation so that one
//! malformed entry is rejected alone, with a precise error, while the rest
//! of the section still applies.

pub mod watcher;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigurationError, ThrottleError};
use crate::limiter::RateLimit;

/// The parsed `rate_limiting` section of the settings document.
///
/// Parsing only checks the top-level document shape; per-entry validation
/// happens in [`validate`](Self::validate) so bad entries fail soft.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default)]
    rate_limiting: BTreeMap<String, serde_json::Value>,
}

/// One entry as written in the file, before validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLimit {
    calls: i64,
    period: f64,
    #[serde(default)]
    burst: Option<i64>,
}

impl RateLimitingConfig {
    /// Number of entries in the section.
    pub fn len(&self) -> usize {
        self.rate_limiting.len()
    }

    /// Whether the section is empty.
    pub fn is_empty(&self) -> bool {
        self.rate_limiting.is_empty()
    }

    /// Operation classes named by the section, in sorted order.
    pub fn operation_classes(&self) -> impl Iterator<Item = &str> {
        self.rate_limiting.keys().map(String::as_str)
    }

    /// Validate every entry into a [`RateLimit`].
    ///
    /// Returns the valid limits alongside the errors for the rejected
    /// entries. Entries never abort each other: a negative `calls` in one
    /// class leaves every other class untouched.
    pub fn validate(&self) -> (Vec<(String, RateLimit)>, Vec<ConfigurationError>) {
        let mut limits = Vec::new();
        let mut errors = Vec::new();

        for (operation_class, value) in &self.rate_limiting {
            match validate_entry(operation_class, value) {
                Ok(limit) => limits.push((operation_class.clone(), limit)),
                Err(error) => errors.push(error),
            }
        }

        (limits, errors)
    }
}

/// Validate a single raw entry into a [`RateLimit`].
fn validate_entry(
    operation_class: &str,
    value: &serde_json::Value,
) -> Result<RateLimit, ConfigurationError> {
    let raw: RawLimit = serde_json::from_value(value.clone())
        .map_err(|e| ConfigurationError::new(operation_class, format!("malformed entry: {}", e)))?;

    if raw.calls <= 0 {
        return Err(ConfigurationError::new(
            operation_class,
            format!("calls must be greater than zero (got {})", raw.calls),
        ));
    }
    if raw.calls > u32::MAX as i64 {
        return Err(ConfigurationError::new(
            operation_class,
            format!("calls is too large (got {})", raw.calls),
        ));
    }
    if !raw.period.is_finite() || raw.period <= 0.0 {
        return Err(ConfigurationError::new(
            operation_class,
            format!("period must be a positive number of seconds (got {})", raw.period),
        ));
    }
    let burst = match raw.burst {
        Some(burst) if burst < 0 => {
            return Err(ConfigurationError::new(
                operation_class,
                format!("burst must not be negative (got {})", burst),
            ));
        }
        Some(burst) if burst > u32::MAX as i64 => {
            return Err(ConfigurationError::new(
                operation_class,
                format!("burst is too large (got {})", burst),
            ));
        }
        Some(burst) => Some(burst as u32),
        None => None,
    };

    let period = Duration::try_from_secs_f64(raw.period).map_err(|_| {
        ConfigurationError::new(
            operation_class,
            format!("period is out of range (got {})", raw.period),
        )
    })?;

    RateLimit::new(raw.calls as u32, period, burst)
        .map_err(|e| ConfigurationError::new(operation_class, e.to_string()))
}

/// Parse a settings document from a JSON string.
///
/// # Errors
///
/// Malformed top-level JSON is a hard error; entry-level problems are
/// deferred to [`RateLimitingConfig::validate`].
pub fn parse(contents: &str) -> Result<RateLimitingConfig, ThrottleError> {
    Ok(serde_json::from_str(contents)?)
}

/// Load a settings document from a JSON file.
///
/// # Errors
///
/// Unreadable files and malformed top-level JSON are hard errors.
pub async fn load_from_file(path: impl AsRef<Path>) -> Result<RateLimitingConfig, ThrottleError> {
    let path = path.as_ref();
    tracing::info!("Loading rate limit configuration from: {}", path.display());

    let contents = tokio::fs::read_to_string(path).await?;
    let config = parse(&contents)?;

    tracing::debug!(
        "Rate limit configuration parsed: {} entries ({})",
        config.len(),
        config
            .operation_classes()
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_validate_valid_section() {
        let config = parse(
            r#"{
                "rate_limiting": {
                    "quick_scan": {"calls": 500, "period": 60.0, "burst": 100},
                    "virus_db_update": {"calls": 1, "period": 3600.0, "burst": null}
                }
            }"#,
        )
        .unwrap();

        let (limits, errors) = config.validate();
        assert!(errors.is_empty());
        assert_eq!(limits.len(), 2);

        let quick = &limits.iter().find(|(c, _)| c == "quick_scan").unwrap().1;
        assert_eq!(quick.calls(), 500);
        assert_eq!(quick.burst(), Some(100));

        let update = &limits
            .iter()
            .find(|(c, _)| c == "virus_db_update")
            .unwrap()
            .1;
        assert_eq!(update.burst(), None);
        assert_eq!(update.capacity(), 1);
    }

    #[test]
    fn test_missing_section_parses_empty() {
        let config = parse("{}").unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_malformed_document_is_a_hard_error() {
        assert!(parse("{not json").is_err());
        assert!(parse(r#"{"rate_limiting": []}"#).is_err());
    }

    #[test]
    fn test_invalid_entries_fail_alone() {
        let config = parse(
            r#"{
                "rate_limiting": {
                    "file_scan": {"calls": -1, "period": 60.0},
                    "directory_scan": {"calls": 10, "period": 0},
                    "quick_scan": {"calls": 500, "period": 60.0, "burst": -5},
                    "network_request": {"calls": 50, "period": 60.0, "burst": 10}
                }
            }"#,
        )
        .unwrap();

        let (limits, errors) = config.validate();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].0, "network_request");

        assert_eq!(errors.len(), 3);
        let classes: Vec<_> = errors.iter().map(|e| e.operation_class.as_str()).collect();
        assert!(classes.contains(&"file_scan"));
        assert!(classes.contains(&"directory_scan"));
        assert!(classes.contains(&"quick_scan"));
    }

    #[test]
    fn test_wrong_types_are_entry_errors() {
        let config = parse(
            r#"{
                "rate_limiting": {
                    "quick_scan": {"calls": "lots", "period": 60.0},
                    "file_scan": {"calls": 10, "period": 60.0, "unknown_field": 1}
                }
            }"#,
        )
        .unwrap();

        let (limits, errors) = config.validate();
        assert!(limits.is_empty());
        assert_eq!(errors.len(), 2);
        assert!(errors[0].reason.contains("malformed entry"));
    }

    #[test]
    fn test_fractional_period() {
        let config = parse(
            r#"{"rate_limiting": {"real_time_scan": {"calls": 10, "period": 0.5}}}"#,
        )
        .unwrap();

        let (limits, errors) = config.validate();
        assert!(errors.is_empty());
        let limit = &limits[0].1;
        assert_eq!(limit.period(), Duration::from_millis(500));
        assert!((limit.refill_rate() - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        tokio::fs::write(
            &path,
            r#"{"rate_limiting": {"system_command": {"calls": 5, "period": 60.0}}}"#,
        )
        .await
        .unwrap();

        let config = load_from_file(&path).await.unwrap();
        assert_eq!(config.len(), 1);

        let missing = load_from_file(dir.path().join("absent.json")).await;
        assert!(missing.is_err());
    }
}

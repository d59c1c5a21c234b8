//! Demo: operation-class rate limiting end to end.
//!
//! Run with: cargo run --example throttle

use std::time::Duration;

use scan_throttle::limiter::{RateLimit, TokenBucket};
use scan_throttle::{RateLimitRegistry, ThrottleError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // A bucket on its own: 3 calls per second with a burst of 2.
    let limit = RateLimit::new(3, Duration::from_secs(1), Some(2))?;
    let bucket = TokenBucket::new(limit);
    for i in 1..=6 {
        match bucket.try_acquire(1)? {
            decision if decision.is_allowed() => println!("bucket acquire #{i}: allowed"),
            decision => println!(
                "bucket acquire #{i}: denied, retry in {:?}",
                decision.wait_time().unwrap()
            ),
        }
    }

    // The registry, with built-in defaults per operation class.
    let registry = RateLimitRegistry::new();
    let status = registry.get_operation_status("quick_scan");
    println!(
        "quick_scan: {} calls per {:.0}s, capacity {}",
        status.calls, status.period_secs, status.capacity
    );

    // Fail-fast checks for background work.
    registry.update_rate_limit("background_scan", 2, Duration::from_secs(5), Some(0))?;
    for i in 1..=3 {
        match registry.check("background_scan", 1) {
            Ok(()) => println!("background_scan #{i}: allowed"),
            Err(ThrottleError::RateLimitExceeded { retry_after, .. }) => {
                println!("background_scan #{i}: throttled, retry after {retry_after:?}")
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Bounded waits for interactive work.
    registry.update_rate_limit("quick_scan", 10, Duration::from_millis(200), Some(0))?;
    registry.check("quick_scan", 10)?;
    registry
        .wait_and_check("quick_scan", 1, Some(Duration::from_secs(1)))
        .await?;
    println!("quick_scan: acquired after a short wait");

    // Configuration reload: bad entries are reported, good ones apply.
    let config = scan_throttle::config::parse(
        r#"{
            "rate_limiting": {
                "network_request": {"calls": 5, "period": 60.0, "burst": 0},
                "file_scan": {"calls": -1, "period": 60.0}
            }
        }"#,
    )?;
    let errors = registry.reload_configuration(&config);
    for error in &errors {
        println!("rejected config entry: {error}");
    }
    println!(
        "network_request now limited to {} calls/min",
        registry.get_current_limits()["network_request"].calls()
    );

    Ok(())
}

//! Token bucket accounting for a single operation class.
//!
//! The bucket starts full at `capacity = calls + burst` tokens and refills
//! continuously at `calls / period` tokens per second. Each operation
//! consumes tokens; when too few remain the bucket answers with an advisory
//! wait time instead of blocking.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use scan_throttle::limiter::{LimitDecision, RateLimit, TokenBucket};
//!
//! let limit = RateLimit::new(2, Duration::from_secs(1), None).unwrap();
//! let bucket = TokenBucket::new(limit);
//!
//! assert!(bucket.try_acquire(1).unwrap().is_allowed());
//! assert!(bucket.try_acquire(1).unwrap().is_allowed());
//!
//! // Empty: the decision carries how long until one token refills.
//! match bucket.try_acquire(1).unwrap() {
//!     LimitDecision::Denied { wait } => assert!(wait <= Duration::from_secs(1)),
//!     LimitDecision::Allowed => unreachable!(),
//! }
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ThrottleError;
use crate::limiter::RateLimit;

/// Outcome of a single token acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitDecision {
    /// Enough tokens were available; they have been consumed.
    Allowed,
    /// Not enough tokens. `wait` estimates when the deficit will have
    /// refilled, assuming no other consumers in the meantime.
    Denied {
        /// Advisory time until enough tokens would be available
        wait: Duration,
    },
}

impl LimitDecision {
    /// Whether the operation may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The advisory wait time on a denial, `None` when allowed.
    pub fn wait_time(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Denied { wait } => Some(*wait),
        }
    }
}

/// Read-only snapshot of a bucket for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStatus {
    /// Tokens currently available
    pub tokens: f64,
    /// Maximum tokens the bucket can hold
    pub capacity: u32,
    /// Tokens refilled per second
    pub refill_rate: f64,
}

/// Mutable bucket state, guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A thread-safe token bucket for one operation class.
///
/// The numeric state lives behind an internal lock, so buckets are shared
/// as `Arc<TokenBucket>` and used through `&self` from any thread. The
/// critical section covers only the refill-and-consume arithmetic; no I/O
/// and no sleeping happens under the lock.
#[derive(Debug)]
pub struct TokenBucket {
    limit: RateLimit,
    capacity: u32,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket from a limit, starting at full capacity.
    pub fn new(limit: RateLimit) -> Self {
        let capacity = limit.capacity();
        let refill_rate = limit.refill_rate();
        Self {
            limit,
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// The limit this bucket was built from.
    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }

    /// Maximum tokens the bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens refilled per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Try to consume `cost` tokens without blocking.
    ///
    /// Returns [`LimitDecision::Allowed`] and consumes the tokens, or
    /// [`LimitDecision::Denied`] with an advisory wait. The wait is an
    /// estimate: concurrent consumers may take refilled tokens first.
    ///
    /// # Errors
    ///
    /// `cost` of zero is rejected with [`ThrottleError::InvalidCost`]. A
    /// `cost` above the bucket's capacity can never succeed no matter how
    /// long the caller waits, so it is rejected with
    /// [`ThrottleError::CostExceedsCapacity`] instead of being reported as
    /// a denial.
    pub fn try_acquire(&self, cost: u32) -> Result<LimitDecision, ThrottleError> {
        if cost == 0 {
            return Err(ThrottleError::InvalidCost);
        }
        if cost > self.capacity {
            return Err(ThrottleError::CostExceedsCapacity {
                cost,
                capacity: self.capacity,
            });
        }

        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        let cost = cost as f64;
        if state.tokens >= cost {
            state.tokens -= cost;
            Ok(LimitDecision::Allowed)
        } else {
            let deficit = cost - state.tokens;
            // An extreme calls/period ratio can push the estimate past
            // what Duration can represent; saturate rather than panic.
            let wait = Duration::try_from_secs_f64(deficit / self.refill_rate)
                .unwrap_or(Duration::MAX);
            Ok(LimitDecision::Denied { wait })
        }
    }

    /// Acquire `cost` tokens, sleeping between attempts until they are
    /// available or `timeout` elapses.
    ///
    /// Returns `Ok(true)` once the tokens are consumed, `Ok(false)` when
    /// the timeout expires first. With no timeout the wait is unbounded.
    /// Each sleep is capped by the advisory wait from the last denial, so
    /// the loop never busy-waits.
    pub async fn acquire(&self, cost: u32, timeout: Option<Duration>) -> Result<bool, ThrottleError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            match self.try_acquire(cost)? {
                LimitDecision::Allowed => return Ok(true),
                LimitDecision::Denied { wait } => {
                    let sleep_for = match deadline {
                        Some(deadline) => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            if remaining.is_zero() {
                                return Ok(false);
                            }
                            wait.min(remaining)
                        }
                        None => wait,
                    };
                    tokio::time::sleep(sleep_for).await;
                }
            }
        }
    }

    /// Current bucket state, refreshed before reading.
    pub fn status(&self) -> BucketStatus {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        BucketStatus {
            tokens: state.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
        }
    }

    /// Top up tokens for the time elapsed since the last refill, clamped
    /// to capacity. Called with the state lock held.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn limit(calls: u32, period: Duration, burst: Option<u32>) -> RateLimit {
        RateLimit::new(calls, period, burst).unwrap()
    }

    #[test]
    fn test_starts_full_and_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(limit(5, Duration::from_secs(60), Some(3)));

        for _ in 0..8 {
            assert!(bucket.try_acquire(1).unwrap().is_allowed());
        }
        assert!(!bucket.try_acquire(1).unwrap().is_allowed());
    }

    #[test]
    fn test_denial_carries_advisory_wait() {
        // 2 calls per 10 seconds: refill rate 0.2/s, so one missing token
        // takes ~5 seconds to come back.
        let bucket = TokenBucket::new(limit(2, Duration::from_secs(10), None));

        assert!(bucket.try_acquire(1).unwrap().is_allowed());
        assert!(bucket.try_acquire(1).unwrap().is_allowed());

        let wait = bucket.try_acquire(1).unwrap().wait_time().unwrap();
        assert!(wait > Duration::from_secs_f64(4.5), "wait was {:?}", wait);
        assert!(wait <= Duration::from_secs_f64(5.0), "wait was {:?}", wait);
    }

    #[test]
    fn test_refills_over_time() {
        // 20 calls per second: one token every 50ms.
        let bucket = TokenBucket::new(limit(20, Duration::from_secs(1), None));

        for _ in 0..20 {
            assert!(bucket.try_acquire(1).unwrap().is_allowed());
        }
        assert!(!bucket.try_acquire(1).unwrap().is_allowed());

        thread::sleep(Duration::from_millis(120));
        assert!(bucket.try_acquire(1).unwrap().is_allowed());
    }

    #[test]
    fn test_waiting_the_advisory_time_is_sufficient() {
        let bucket = TokenBucket::new(limit(10, Duration::from_millis(500), None));

        for _ in 0..10 {
            bucket.try_acquire(1).unwrap();
        }
        let wait = bucket.try_acquire(1).unwrap().wait_time().unwrap();

        thread::sleep(wait + Duration::from_millis(20));
        assert!(bucket.try_acquire(1).unwrap().is_allowed());
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(limit(100, Duration::from_millis(100), None));

        // Refill rate is 1000/s; even after sleeping well past a full
        // period the bucket must stay clamped at capacity.
        thread::sleep(Duration::from_millis(250));
        let status = bucket.status();
        assert!(status.tokens <= status.capacity as f64);
        assert_eq!(status.capacity, 100);
    }

    #[test]
    fn test_multi_token_cost() {
        let bucket = TokenBucket::new(limit(10, Duration::from_secs(60), None));

        assert!(bucket.try_acquire(6).unwrap().is_allowed());
        // 4 tokens left; another 6 cannot be satisfied.
        assert!(!bucket.try_acquire(6).unwrap().is_allowed());
        assert!(bucket.try_acquire(4).unwrap().is_allowed());
    }

    #[test]
    fn test_zero_cost_rejected() {
        let bucket = TokenBucket::new(limit(10, Duration::from_secs(1), None));
        assert!(matches!(
            bucket.try_acquire(0),
            Err(ThrottleError::InvalidCost)
        ));
    }

    #[test]
    fn test_cost_above_capacity_rejected() {
        let bucket = TokenBucket::new(limit(10, Duration::from_secs(1), Some(2)));
        match bucket.try_acquire(13) {
            Err(ThrottleError::CostExceedsCapacity { cost, capacity }) => {
                assert_eq!(cost, 13);
                assert_eq!(capacity, 12);
            }
            other => panic!("expected CostExceedsCapacity, got {:?}", other),
        }
    }

    #[test]
    fn test_status_reports_consumption() {
        let bucket = TokenBucket::new(limit(10, Duration::from_secs(60), None));
        bucket.try_acquire(4).unwrap();

        let status = bucket.status();
        assert!(status.tokens >= 6.0);
        assert!(status.tokens < 6.5);
        assert_eq!(status.capacity, 10);
    }

    #[test]
    fn test_acquire_waits_for_refill() {
        // 10 tokens per 100ms: a missing token refills in ~10ms.
        let bucket = TokenBucket::new(limit(10, Duration::from_millis(100), None));
        for _ in 0..10 {
            bucket.try_acquire(1).unwrap();
        }

        let acquired =
            tokio_test::block_on(bucket.acquire(1, Some(Duration::from_secs(2)))).unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_acquire_times_out_quickly() {
        // 1 call per hour: the advisory wait dwarfs the timeout.
        let bucket = TokenBucket::new(limit(1, Duration::from_secs(3600), None));
        bucket.try_acquire(1).unwrap();

        let started = Instant::now();
        let acquired = bucket
            .acquire(1, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(!acquired);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_consumption_is_bounded() {
        let bucket = std::sync::Arc::new(TokenBucket::new(limit(
            50,
            Duration::from_secs(60),
            Some(10),
        )));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = bucket.clone();
            handles.push(thread::spawn(move || {
                let mut allowed = 0;
                for _ in 0..20 {
                    if bucket.try_acquire(1).unwrap().is_allowed() {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 160 attempts against 60 capacity; a token or two may refill
        // while the threads run, but nowhere near the attempt count.
        assert!(total >= 60);
        assert!(total < 70, "allowed {} acquisitions", total);
    }
}

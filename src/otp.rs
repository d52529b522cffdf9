//! OTP challenge throttling: request-rate windows and attempt lockout.
//!
//! Both sub-states are keyed by `shop_id:normalized_email`, so one customer's
//! abuse cannot lock out anyone else. The shipped implementation is
//! process-local; the trait exists so multi-instance deployments can back the
//! same five operations with a shared cache.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_REQUEST_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_REQUESTS: usize = 3;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Challenge key for a `(shop, email)` pair. Email must already be normalized.
#[must_use]
pub fn challenge_key(shop_id: Uuid, normalized_email: &str) -> String {
    format!("{shop_id}:{normalized_email}")
}

/// Generate a 6-digit numeric code, uniform over `100000..=999999`.
#[must_use]
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Throttling and attempt-tracking state for OTP challenges.
#[async_trait]
pub trait OtpChallengeStore: Send + Sync {
    /// Record a request for `key` unless the rolling window is already full.
    async fn check_request(&self, key: &str) -> Result<RateLimitDecision>;

    /// (Re)initialize the attempt counter; called whenever a fresh code is
    /// issued, with the code's own expiry.
    async fn reset_attempts(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Count a failed verification. No-op when no counter exists: there is
    /// nothing to protect before a code has been requested.
    async fn register_failure(&self, key: &str) -> Result<()>;

    /// True iff an unexpired counter exists and has reached the limit.
    async fn attempts_exceeded(&self, key: &str) -> Result<bool>;

    /// Drop the attempt counter (successful verification).
    async fn clear(&self, key: &str) -> Result<()>;
}

struct AttemptState {
    count: u32,
    expires_at: DateTime<Utc>,
}

/// Process-local [`OtpChallengeStore`].
///
/// Every read-modify-write holds the map's mutex, which serializes concurrent
/// requests for the same key. Expired entries are dropped lazily on the next
/// access to their key, not swept.
pub struct MemoryOtpChallenges {
    request_window: Duration,
    max_requests: usize,
    max_attempts: u32,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    attempts: Mutex<HashMap<String, AttemptState>>,
}

impl MemoryOtpChallenges {
    /// Defaults: 3 requests per rolling 60 seconds, lockout at 5 failures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_window: DEFAULT_REQUEST_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            requests: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_request_window(mut self, window: Duration) -> Self {
        self.request_window = window;
        self
    }

    #[must_use]
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for MemoryOtpChallenges {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtpChallengeStore for MemoryOtpChallenges {
    async fn check_request(&self, key: &str) -> Result<RateLimitDecision> {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let timestamps = requests.entry(key.to_string()).or_default();
        timestamps.retain(|instant| now.duration_since(*instant) < self.request_window);
        if timestamps.len() >= self.max_requests {
            return Ok(RateLimitDecision::Limited);
        }
        timestamps.push(now);
        Ok(RateLimitDecision::Allowed)
    }

    async fn reset_attempts(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let mut attempts = self.attempts.lock().await;
        attempts.insert(key.to_string(), AttemptState { count: 0, expires_at });
        Ok(())
    }

    async fn register_failure(&self, key: &str) -> Result<()> {
        let mut attempts = self.attempts.lock().await;
        if let Some(state) = attempts.get_mut(key) {
            state.count += 1;
        }
        Ok(())
    }

    async fn attempts_exceeded(&self, key: &str) -> Result<bool> {
        let mut attempts = self.attempts.lock().await;
        let Some(state) = attempts.get(key) else {
            return Ok(false);
        };
        if Utc::now() > state.expires_at {
            attempts.remove(key);
            return Ok(false);
        }
        Ok(state.count >= self.max_attempts)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.attempts.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        challenge_key, generate_code, MemoryOtpChallenges, OtpChallengeStore, RateLimitDecision,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn challenge_key_joins_shop_and_email() {
        let shop_id = Uuid::nil();
        assert_eq!(
            challenge_key(shop_id, "ana@example.com"),
            format!("{shop_id}:ana@example.com")
        );
    }

    #[test]
    fn generated_codes_stay_in_range() {
        for _ in 0..1_000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[tokio::test]
    async fn fourth_request_in_window_is_limited() {
        let store = MemoryOtpChallenges::new();
        for _ in 0..3 {
            assert_eq!(
                store.check_request("k").await.unwrap(),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            store.check_request("k").await.unwrap(),
            RateLimitDecision::Limited
        );
        // Other keys are unaffected.
        assert_eq!(
            store.check_request("other").await.unwrap(),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn window_slides_and_frees_capacity() {
        let store =
            MemoryOtpChallenges::new().with_request_window(Duration::from_millis(40));
        for _ in 0..3 {
            store.check_request("k").await.unwrap();
        }
        assert_eq!(
            store.check_request("k").await.unwrap(),
            RateLimitDecision::Limited
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            store.check_request("k").await.unwrap(),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn attempts_lock_out_at_limit() {
        let store = MemoryOtpChallenges::new();
        let expires_at = Utc::now() + ChronoDuration::minutes(10);
        store.reset_attempts("k", expires_at).await.unwrap();
        for _ in 0..4 {
            store.register_failure("k").await.unwrap();
            assert!(!store.attempts_exceeded("k").await.unwrap());
        }
        store.register_failure("k").await.unwrap();
        assert!(store.attempts_exceeded("k").await.unwrap());
    }

    #[tokio::test]
    async fn reset_zeroes_the_counter() {
        let store = MemoryOtpChallenges::new();
        let expires_at = Utc::now() + ChronoDuration::minutes(10);
        store.reset_attempts("k", expires_at).await.unwrap();
        for _ in 0..5 {
            store.register_failure("k").await.unwrap();
        }
        assert!(store.attempts_exceeded("k").await.unwrap());
        store.reset_attempts("k", expires_at).await.unwrap();
        assert!(!store.attempts_exceeded("k").await.unwrap());
    }

    #[tokio::test]
    async fn failures_without_counter_are_noops() {
        let store = MemoryOtpChallenges::new();
        store.register_failure("k").await.unwrap();
        assert!(!store.attempts_exceeded("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_counter_is_dropped_on_access() {
        let store = MemoryOtpChallenges::new();
        let expired = Utc::now() - ChronoDuration::seconds(1);
        store.reset_attempts("k", expired).await.unwrap();
        for _ in 0..5 {
            store.register_failure("k").await.unwrap();
        }
        // The lockout lapsed with the code itself.
        assert!(!store.attempts_exceeded("k").await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_the_counter() {
        let store = MemoryOtpChallenges::new();
        let expires_at = Utc::now() + ChronoDuration::minutes(10);
        store.reset_attempts("k", expires_at).await.unwrap();
        for _ in 0..5 {
            store.register_failure("k").await.unwrap();
        }
        store.clear("k").await.unwrap();
        assert!(!store.attempts_exceeded("k").await.unwrap());
    }
}

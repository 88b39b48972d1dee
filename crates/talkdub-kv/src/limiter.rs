//! Outbound LLM rate limiter: one shared counter per wall-clock UTC minute.
//!
//! Multiple worker processes spend from the same per-minute budget. The
//! discipline is approximate: between reading the counter and incrementing
//! it another worker may spend the same token, which is why the effective
//! limit keeps a buffer below the provider's real quota.

use chrono::{Timelike, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use talkdub_utils::error::KvError;

use crate::store::KeyedStore;

const KEY_PREFIX: &str = "talkdub:rate_limit:llm";

/// Fresh minute keys expire after two minutes; long enough for stragglers
/// to read them, short enough to keep the store tidy.
const BUCKET_TTL: Duration = Duration::from_secs(120);

/// Snapshot of the current minute's spending, for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterUsage {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub percent: f64,
}

/// Cross-worker per-minute token counter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyedStore>,
    effective_limit: u32,
}

impl RateLimiter {
    /// `rpm_limit` is the provider quota; `buffer_factor` shrinks it to
    /// leave headroom for the documented race window.
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, rpm_limit: u32, buffer_factor: f64) -> Self {
        let effective_limit = (f64::from(rpm_limit) * buffer_factor).floor() as u32;
        Self {
            store,
            effective_limit: effective_limit.max(1),
        }
    }

    fn current_minute_key() -> String {
        let now = Utc::now();
        format!("{KEY_PREFIX}:{}", now.format("%Y%m%d%H%M"))
    }

    fn seconds_to_next_minute() -> u64 {
        u64::from(60 - Utc::now().second().min(59))
    }

    /// Acquire one token, waiting up to `timeout` across minute boundaries.
    /// Returns `false` when the timeout elapses without a token.
    pub async fn acquire(&self, timeout: Duration) -> Result<bool, KvError> {
        let deadline = Instant::now() + timeout;

        loop {
            let key = Self::current_minute_key();

            match self.store.get(&key).await? {
                None => {
                    // First request of this minute.
                    if self.store.set_nx_ex(&key, "1", BUCKET_TTL).await? {
                        return Ok(true);
                    }
                    // Another worker won the initialization race; loop and
                    // take the increment path.
                    continue;
                }
                Some(raw) => {
                    let current: i64 = raw.parse().map_err(|_| KvError::Decode {
                        key: key.clone(),
                        reason: format!("'{raw}' is not an integer"),
                    })?;

                    if current < i64::from(self.effective_limit) {
                        self.store.incr(&key).await?;
                        return Ok(true);
                    }
                }
            }

            // Budget spent; wait for the next minute (bounded by timeout).
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let wait = Duration::from_secs(Self::seconds_to_next_minute())
                .min(deadline.saturating_duration_since(now));
            debug!(wait_secs = wait.as_secs(), "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Current minute's usage, for logs and the stats command.
    pub async fn usage(&self) -> Result<RateLimiterUsage, KvError> {
        let key = Self::current_minute_key();
        let current: u32 = match self.store.get(&key).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => 0,
        };
        let remaining = self.effective_limit.saturating_sub(current);
        let percent =
            (f64::from(current) / f64::from(self.effective_limit) * 1000.0).round() / 10.0;
        Ok(RateLimiterUsage {
            current,
            limit: self.effective_limit,
            remaining,
            percent,
        })
    }

    /// JSON rendering of [`usage`](Self::usage) for the stats command.
    pub async fn usage_json(&self) -> Result<serde_json::Value, KvError> {
        let u = self.usage().await?;
        Ok(json!({
            "current_requests": u.current,
            "limit": u.limit,
            "remaining": u.remaining,
            "usage_percent": u.percent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter(limit: u32) -> RateLimiter {
        // buffer factor 1.0 keeps test arithmetic exact
        RateLimiter::new(Arc::new(MemoryStore::new()), limit, 1.0)
    }

    #[tokio::test]
    async fn test_acquire_within_limit() {
        let limiter = limiter(5);
        for _ in 0..5 {
            assert!(limiter.acquire(Duration::from_millis(10)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_acquire_times_out_at_limit() {
        let limiter = limiter(2);
        assert!(limiter.acquire(Duration::from_millis(10)).await.unwrap());
        assert!(limiter.acquire(Duration::from_millis(10)).await.unwrap());
        // Third token would need the next minute; the tiny timeout loses.
        assert!(!limiter.acquire(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_buffer_factor_shrinks_limit() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), 10, 0.9);
        assert_eq!(limiter.effective_limit, 9);

        // Degenerate factors still leave one token.
        let tiny = RateLimiter::new(Arc::new(MemoryStore::new()), 10, 0.0);
        assert_eq!(tiny.effective_limit, 1);
    }

    #[tokio::test]
    async fn test_usage_reports_spend() {
        let limiter = limiter(4);
        assert!(limiter.acquire(Duration::from_millis(10)).await.unwrap());
        assert!(limiter.acquire(Duration::from_millis(10)).await.unwrap());

        let usage = limiter.usage().await.unwrap();
        assert_eq!(usage.current, 2);
        assert_eq!(usage.limit, 4);
        assert_eq!(usage.remaining, 2);
        assert_eq!(usage.percent, 50.0);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_respect_bound() {
        // N concurrent acquirers against limit L succeed at most L times in
        // the window (the race allowance cannot apply to the serialized
        // memory backend).
        let limiter = Arc::new(limiter(10));
        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(Duration::from_millis(5)).await.unwrap()
            }));
        }

        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert!(granted <= 10, "granted {granted} tokens with limit 10");
        assert!(granted > 0);
    }
}

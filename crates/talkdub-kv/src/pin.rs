//! PIN store: delivery credentials that survive restarts.
//!
//! Six crypto-random decimal digits per job, an attempt counter, and an
//! absolute expiry, all living in the keyed store so a worker restart
//! cannot void outstanding deliveries. Verification is constant-time and
//! attempts are counted before comparison, so probing always costs an
//! attempt.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use talkdub_utils::error::KvError;

use crate::store::{KeyedStore, TtlState};

const KEY_PREFIX: &str = "talkdub:pin:";

/// Outcome of a PIN verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Match; the attempt counter was reset to allow the remaining
    /// re-download budget.
    Verified,
    /// No entry for this job (never generated, or expired).
    NotFound,
    /// The attempt budget is exhausted.
    Locked,
    /// Wrong PIN; `remaining` attempts are left.
    Mismatch { remaining: u32 },
}

/// PIN generation and verification against the shared keyed store.
#[derive(Clone)]
pub struct PinStore {
    store: Arc<dyn KeyedStore>,
    lifetime: Duration,
    max_attempts: u32,
}

impl PinStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, lifetime: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            lifetime,
            max_attempts,
        }
    }

    fn key(job_id: &str) -> String {
        format!("{KEY_PREFIX}{job_id}")
    }

    /// Generate a fresh six-digit PIN for `job_id`, overwriting any prior
    /// entry, with an absolute expiry of the configured lifetime.
    pub async fn generate(&self, job_id: &str) -> Result<String, KvError> {
        let mut rng = rand::thread_rng();
        let pin: String = (0..6).map(|_| rng.gen_range(0..=9).to_string()).collect();

        let mut fields = HashMap::new();
        fields.insert("pin".to_string(), pin.clone());
        fields.insert("attempts".to_string(), "0".to_string());
        fields.insert("created_at".to_string(), chrono::Utc::now().to_rfc3339());

        self.store
            .hash_set_all(&Self::key(job_id), fields, self.lifetime)
            .await?;

        info!(
            job_id,
            lifetime_hours = self.lifetime.as_secs() / 3600,
            "PIN generated"
        );
        Ok(pin)
    }

    /// Verify a candidate PIN.
    ///
    /// The attempt counter is incremented before comparison and reset on
    /// success so the permitted re-download budget starts fresh.
    pub async fn verify(&self, job_id: &str, candidate: &str) -> Result<VerifyOutcome, KvError> {
        let key = Self::key(job_id);

        let Some(entry) = self.store.hash_get_all(&key).await? else {
            return Ok(VerifyOutcome::NotFound);
        };

        let stored_pin = entry.get("pin").cloned().unwrap_or_default();
        let attempts: u32 = entry
            .get("attempts")
            .and_then(|a| a.parse().ok())
            .unwrap_or(0);

        if attempts >= self.max_attempts {
            return Ok(VerifyOutcome::Locked);
        }

        let used = self.store.hash_incr_field(&key, "attempts", 1).await?;

        if constant_time_eq(stored_pin.as_bytes(), candidate.as_bytes()) {
            self.store.hash_set_field(&key, "attempts", "0").await?;
            Ok(VerifyOutcome::Verified)
        } else {
            let remaining = self.max_attempts.saturating_sub(used.max(0) as u32);
            Ok(VerifyOutcome::Mismatch { remaining })
        }
    }

    /// Remove a job's PIN (job deletion path).
    pub async fn delete(&self, job_id: &str) -> Result<(), KvError> {
        self.store.delete(&Self::key(job_id)).await
    }

    /// Safety sweep: the backing store self-expires entries, so this only
    /// removes anomalous ones that lost their TTL. Returns how many were
    /// removed.
    pub async fn cleanup_expired(&self) -> Result<usize, KvError> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(KEY_PREFIX).await? {
            if self.store.ttl(&key).await? == TtlState::NoExpiry {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Constant-time byte comparison: the running time depends only on the
/// lengths, never on where the first difference sits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn pin_store(store: Arc<dyn KeyedStore>) -> PinStore {
        PinStore::new(store, Duration::from_secs(72 * 3600), 5)
    }

    #[tokio::test]
    async fn test_generate_produces_six_digits() {
        let store = pin_store(Arc::new(MemoryStore::new()));
        let pin = store.generate("job-1").await.unwrap();
        assert_eq!(pin.len(), 6);
        assert!(pin.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_verify_success_resets_attempts() {
        let store = pin_store(Arc::new(MemoryStore::new()));
        let pin = store.generate("job-1").await.unwrap();

        // Burn some attempts first.
        for _ in 0..3 {
            let outcome = store.verify("job-1", "000000").await.unwrap();
            // Guard against the one-in-a-million collision with a real PIN.
            if pin == "000000" {
                assert_eq!(outcome, VerifyOutcome::Verified);
                return;
            }
            assert!(matches!(outcome, VerifyOutcome::Mismatch { .. }));
        }

        assert_eq!(store.verify("job-1", &pin).await.unwrap(), VerifyOutcome::Verified);
        // Reset means the full budget is available again.
        for _ in 0..4 {
            assert!(matches!(
                store.verify("job-1", "999999").await.unwrap(),
                VerifyOutcome::Mismatch { .. } | VerifyOutcome::Verified
            ));
        }
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let store = pin_store(Arc::new(MemoryStore::new()));
        let pin = store.generate("job-1").await.unwrap();
        let wrong = if pin == "000000" { "111111" } else { "000000" };

        let mut last_remaining = None;
        for _ in 0..5 {
            match store.verify("job-1", wrong).await.unwrap() {
                VerifyOutcome::Mismatch { remaining } => {
                    if let Some(prev) = last_remaining {
                        assert!(remaining < prev, "remaining must decrease");
                    }
                    last_remaining = Some(remaining);
                }
                other => panic!("expected mismatch, got {other:?}"),
            }
        }
        assert_eq!(last_remaining, Some(0));

        // Locked even for the correct PIN.
        assert_eq!(store.verify("job-1", &pin).await.unwrap(), VerifyOutcome::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pin_is_not_found() {
        let kv = Arc::new(MemoryStore::new());
        let store = PinStore::new(kv, Duration::from_secs(10), 5);
        let pin = store.generate("job-1").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            store.verify("job-1", &pin).await.unwrap(),
            VerifyOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_verify_unknown_job_is_not_found() {
        let store = pin_store(Arc::new(MemoryStore::new()));
        assert_eq!(
            store.verify("nope", "123456").await.unwrap(),
            VerifyOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_regenerate_overwrites() {
        let store = pin_store(Arc::new(MemoryStore::new()));
        let first = store.generate("job-1").await.unwrap();
        // Lock the first PIN out.
        let wrong = if first == "000000" { "111111" } else { "000000" };
        for _ in 0..5 {
            let _ = store.verify("job-1", wrong).await.unwrap();
        }

        let second = store.generate("job-1").await.unwrap();
        assert_eq!(
            store.verify("job-1", &second).await.unwrap(),
            VerifyOutcome::Verified
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"123456", b"12345"));
        assert!(constant_time_eq(b"", b""));
    }
}

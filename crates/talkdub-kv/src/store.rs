//! The keyed store abstraction and its two backends.
//!
//! Operations are per-key atomic (increments, hash field updates); callers
//! that need stronger guarantees compose them the way the PIN store does.
//! Entries self-expire through TTLs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use talkdub_utils::error::KvError;

/// TTL state of a key, mirroring the backing store's semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// The key does not exist.
    Missing,
    /// The key exists but carries no expiry.
    NoExpiry,
    /// The key expires after roughly this long.
    Expires(Duration),
}

/// Minimal TTL-aware keyed store: strings, counters, and flat hashes.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a string value with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Set a string value with a TTL only if the key is absent. Returns
    /// whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Increment an integer value, creating it at zero first if absent.
    /// The key's existing TTL is preserved.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Replace a hash wholesale and set its TTL.
    async fn hash_set_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), KvError>;

    /// Read a whole hash; `None` when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError>;

    /// Set one hash field, leaving the TTL untouched.
    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    /// Increment one integer hash field.
    async fn hash_incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// TTL state of a key.
    async fn ttl(&self, key: &str) -> Result<TtlState, KvError>;

    /// Keys matching a literal prefix.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory keyed store used by tests and single-process deployments.
///
/// A single mutex serializes all operations, which also makes every
/// composite caller (PIN verify, limiter acquire) atomic against this
/// backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_live_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> R,
    ) -> R {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        f(&mut entries)
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.with_live_entries(|entries| {
            Ok(entries.get(key).and_then(|e| match &e.value {
                StoredValue::Text(s) => Some(s.clone()),
                StoredValue::Hash(_) => None,
            }))
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.with_live_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Text(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        self.with_live_entries(|entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Text(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.with_live_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Text("0".to_string()),
                expires_at: None,
            });
            let StoredValue::Text(current) = &mut entry.value else {
                return Err(KvError::Operation(format!(
                    "key '{key}' holds a hash, cannot increment"
                )));
            };
            let parsed: i64 = current.parse().map_err(|_| KvError::Decode {
                key: key.to_string(),
                reason: format!("'{current}' is not an integer"),
            })?;
            let next = parsed + 1;
            *current = next.to_string();
            Ok(next)
        })
        .await
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), KvError> {
        self.with_live_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Hash(fields),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        self.with_live_entries(|entries| {
            Ok(entries.get(key).and_then(|e| match &e.value {
                StoredValue::Hash(h) => Some(h.clone()),
                StoredValue::Text(_) => None,
            }))
        })
        .await
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.with_live_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Hash(HashMap::new()),
                expires_at: None,
            });
            let StoredValue::Hash(hash) = &mut entry.value else {
                return Err(KvError::Operation(format!(
                    "key '{key}' holds a string, cannot set hash field"
                )));
            };
            hash.insert(field.to_string(), value.to_string());
            Ok(())
        })
        .await
    }

    async fn hash_incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError> {
        self.with_live_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Hash(HashMap::new()),
                expires_at: None,
            });
            let StoredValue::Hash(hash) = &mut entry.value else {
                return Err(KvError::Operation(format!(
                    "key '{key}' holds a string, cannot increment hash field"
                )));
            };
            let slot = hash.entry(field.to_string()).or_insert_with(|| "0".into());
            let parsed: i64 = slot.parse().map_err(|_| KvError::Decode {
                key: key.to_string(),
                reason: format!("hash field '{field}' is not an integer"),
            })?;
            let next = parsed + by;
            *slot = next.to_string();
            Ok(next)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.with_live_entries(|entries| {
            entries.remove(key);
            Ok(())
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<TtlState, KvError> {
        self.with_live_entries(|entries| {
            Ok(match entries.get(key) {
                None => TtlState::Missing,
                Some(Entry {
                    expires_at: None, ..
                }) => TtlState::NoExpiry,
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => TtlState::Expires(at.saturating_duration_since(Instant::now())),
            })
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.with_live_entries(|entries| {
            Ok(entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Redis-backed keyed store shared across worker processes.
#[derive(Clone)]
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to the broker URL. Fails fast on an unreachable broker so a
    /// misconfigured deployment is caught at startup.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }

    fn op_err(e: redis::RedisError) -> KvError {
        KvError::Operation(e.to_string())
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(Self::op_err)?;
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        let mut conn = self.manager.clone();
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(())
    }

    async fn hash_incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<TtlState, KvError> {
        let mut conn = self.manager.clone();
        let secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(match secs {
            -2 => TtlState::Missing,
            -1 => TtlState::NoExpiry,
            s => TtlState::Expires(Duration::from_secs(s.max(0) as u64)),
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        let pattern = format!("{prefix}*");
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(Self::op_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

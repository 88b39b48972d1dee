//! Content-addressed translation cache.
//!
//! Keyed by the language pair plus a sha256 of the canonical-JSON batch of
//! source texts, so the same batch translated twice costs one LLM call.
//! The cache is a performance aid only: every failure path degrades to a
//! miss and is never surfaced to the translation pipeline.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use talkdub_utils::types::Language;

use crate::store::KeyedStore;

const KEY_PREFIX: &str = "talkdub:translation";

/// Cached batch translations in the shared keyed store.
#[derive(Clone)]
pub struct TranslationCache {
    store: Arc<dyn KeyedStore>,
    enabled: bool,
    ttl: Duration,
}

impl TranslationCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, enabled: bool, ttl: Duration) -> Self {
        Self {
            store,
            enabled,
            ttl,
        }
    }

    /// Cache key: language-pair scope plus the first 16 hex chars of the
    /// sha256 over the canonical JSON rendering of the text batch. Order
    /// and casing of the texts therefore change the key.
    fn cache_key(texts: &[String], src: Language, tgt: Language) -> String {
        let texts_vec = texts.to_vec();
        let canonical = serde_json_canonicalizer::to_string(&texts_vec)
            .unwrap_or_else(|_| serde_json::to_string(&texts_vec).unwrap_or_default());
        let digest = Sha256::digest(canonical.as_bytes());
        let hash16 = &hex::encode(digest)[..16];
        format!("{KEY_PREFIX}:{src}:{tgt}:{hash16}")
    }

    /// Look up a prior translation of exactly this batch.
    pub async fn get(
        &self,
        texts: &[String],
        src: Language,
        tgt: Language,
    ) -> Option<Vec<String>> {
        if !self.enabled {
            return None;
        }
        let key = Self::cache_key(texts, src, tgt);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(translations) => {
                    debug!(segments = texts.len(), "translation cache hit");
                    Some(translations)
                }
                Err(e) => {
                    warn!(key, error = %e, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // Cache trouble must never fail a translation.
                warn!(error = %e, "translation cache read failed");
                None
            }
        }
    }

    /// Store a batch translation. Failures are logged and swallowed.
    pub async fn set(
        &self,
        texts: &[String],
        src: Language,
        tgt: Language,
        translations: &[String],
    ) {
        if !self.enabled {
            return;
        }
        let key = Self::cache_key(texts, src, tgt);
        let Ok(payload) = serde_json::to_string(translations) else {
            return;
        };
        if let Err(e) = self.store.set_ex(&key, &payload, self.ttl).await {
            warn!(error = %e, "translation cache write failed");
        }
    }

    /// Number of live cache entries, for the stats command.
    pub async fn entry_count(&self) -> usize {
        self.store
            .keys_with_prefix(KEY_PREFIX)
            .await
            .map(|k| k.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache() -> TranslationCache {
        TranslationCache::new(
            Arc::new(MemoryStore::new()),
            true,
            Duration::from_secs(3600),
        )
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = cache();
        let src_texts = texts(&["こんにちは", "ありがとう"]);
        let translations = texts(&["Hello", "Thank you"]);

        cache
            .set(&src_texts, Language::Ja, Language::En, &translations)
            .await;
        let hit = cache.get(&src_texts, Language::Ja, Language::En).await;
        assert_eq!(hit, Some(translations));
    }

    #[tokio::test]
    async fn test_miss_on_unknown_batch() {
        let cache = cache();
        assert_eq!(
            cache
                .get(&texts(&["never seen"]), Language::Ja, Language::En)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_key_sensitive_to_order_and_case() {
        let a = texts(&["one", "two"]);
        let b = texts(&["two", "one"]);
        let c = texts(&["One", "two"]);

        let key_a = TranslationCache::cache_key(&a, Language::Ja, Language::En);
        let key_b = TranslationCache::cache_key(&b, Language::Ja, Language::En);
        let key_c = TranslationCache::cache_key(&c, Language::Ja, Language::En);

        assert_ne!(key_a, key_b);
        assert_ne!(key_a, key_c);
    }

    #[tokio::test]
    async fn test_key_scoped_by_language_pair() {
        let batch = texts(&["hello"]);
        let ja_en = TranslationCache::cache_key(&batch, Language::Ja, Language::En);
        let ja_de = TranslationCache::cache_key(&batch, Language::Ja, Language::De);
        let en_ja = TranslationCache::cache_key(&batch, Language::En, Language::Ja);

        assert_ne!(ja_en, ja_de);
        assert_ne!(ja_en, en_ja);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = TranslationCache::new(
            Arc::new(MemoryStore::new()),
            false,
            Duration::from_secs(3600),
        );
        let batch = texts(&["x"]);
        cache
            .set(&batch, Language::Ja, Language::En, &texts(&["y"]))
            .await;
        assert_eq!(cache.get(&batch, Language::Ja, Language::En).await, None);
    }
}

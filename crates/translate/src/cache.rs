//! Translation cache
//!
//! TTL cache keyed by (normalized text, source, target). Read-mostly: the
//! hot path is a read-lock lookup; misses take the write lock once per
//! (text, target) per TTL window. Capacity is bounded by evicting expired
//! entries first, then the oldest.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use speech_relay_core::text::normalize_for_match;
use speech_relay_core::{LanguageTag, Result, Translator};

#[derive(Clone)]
struct CacheEntry {
    translation: String,
    inserted_at: Instant,
}

type CacheKey = (String, Option<LanguageTag>, LanguageTag);

pub struct CachedTranslator {
    inner: Arc<dyn Translator>,
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl CachedTranslator {
    pub fn new(inner: Arc<dyn Translator>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &CacheKey, now: Instant) -> Option<String> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| now.duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.translation.clone())
    }

    fn insert(&self, key: CacheKey, translation: String, now: Instant) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                translation,
                inserted_at: now,
            },
        );
    }

    /// Current entry count, for tests and metrics.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Translator for CachedTranslator {
    async fn translate(
        &self,
        text: &str,
        targets: &[LanguageTag],
        source: Option<&LanguageTag>,
    ) -> Result<HashMap<LanguageTag, String>> {
        let now = Instant::now();
        let normalized = normalize_for_match(text);

        let mut cached = HashMap::new();
        let mut missing = Vec::new();
        for target in targets {
            let key = (normalized.clone(), source.cloned(), target.clone());
            match self.lookup(&key, now) {
                Some(translation) => {
                    cached.insert(target.clone(), translation);
                }
                None => missing.push(target.clone()),
            }
        }

        if missing.is_empty() {
            return Ok(cached);
        }

        let fresh = self.inner.translate(text, &missing, source).await?;
        for (target, translation) in &fresh {
            self.insert(
                (normalized.clone(), source.cloned(), target.clone()),
                translation.clone(),
                now,
            );
        }

        cached.extend(fresh);
        Ok(cached)
    }

    async fn detect(&self, text: &str) -> Result<LanguageTag> {
        self.inner.detect(text).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

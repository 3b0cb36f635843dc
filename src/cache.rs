//! In-memory TTL caches.
//!
//! Pure latency optimizations: a miss costs the adapter call, a hit returns
//! a clone. Writes are last-writer-wins per key. Instance-scoped so tests
//! construct their own.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::entities::Article;
use crate::sources::pubtator::EntityMatch;

pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub async fn insert(&self, key: String, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(key, (Instant::now(), value));
    }

    /// Drop expired entries. Called opportunistically by owners.
    pub async fn evict_expired(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Articles keyed by identifier: DOI preferred, else PMID.
pub type ArticleCache = TtlCache<Article>;

/// Entity-lookup results for the semantic enhancer.
pub type EntityCache = TtlCache<Vec<EntityMatch>>;

/// Cache key for an article, when it has one worth caching under.
pub fn article_cache_key(article: &Article) -> Option<String> {
    if let Some(doi) = article.doi.as_deref().filter(|v| !v.is_empty()) {
        return Some(format!("doi:{doi}"));
    }
    article
        .pmid
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|pmid| format!("pmid:{pmid}"))
}

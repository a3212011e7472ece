//! Content cache using moka
//!
//! Rendered release content is immutable once committed, so a cached blob can
//! never be stale, only absent. The cache is bounded by total bytes and evicts
//! with moka's TinyLFU/LRU policy; an optional TTL can be layered on top.
//! Every lookup is counted as a hit or a miss.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cached content blob
pub type Blob = Arc<[u8]>;

/// Metric name for cache hits
pub const HITS_METRIC: &str = "feed_cache_hits_total";
/// Metric name for cache misses
pub const MISSES_METRIC: &str = "feed_cache_misses_total";

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Approximate number of entries
    pub entry_count: u64,
    /// Approximate total bytes held
    pub weighted_size: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Content-id keyed blob cache
///
/// Cheap to clone; clones share storage and counters.
#[derive(Debug, Clone)]
pub struct ContentCache {
    inner: Cache<String, Blob>,
    counters: Arc<Counters>,
}

impl ContentCache {
    /// Create cache bounded to `max_bytes` of content
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self::build(max_bytes, None)
    }

    /// Create cache with time-based expiration
    #[must_use]
    pub fn with_ttl(max_bytes: u64, ttl: Duration) -> Self {
        Self::build(max_bytes, Some(ttl))
    }

    fn build(max_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, blob: &Blob| u32::try_from(blob.len()).unwrap_or(u32::MAX));
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Look up content, counting a hit or a miss
    pub async fn get(&self, key: &str) -> Option<Blob> {
        let found = self.inner.get(key).await;
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(HITS_METRIC).increment(1);
            tracing::debug!(content_id = key, "content cache hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(MISSES_METRIC).increment(1);
            tracing::debug!(content_id = key, "content cache miss");
        }
        found
    }

    /// Insert content
    pub async fn set(&self, key: impl Into<String>, blob: impl Into<Blob>) {
        self.inner.insert(key.into(), blob.into()).await;
    }

    /// Get content, fetching and inserting it on a miss
    ///
    /// # Errors
    /// Propagates the fetch error; nothing is cached in that case.
    pub async fn get_or_try_fetch<E, F, Fut>(&self, key: &str, fetch: F) -> Result<Blob, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let Some(blob) = self.get(key).await {
            return Ok(blob);
        }
        let blob: Blob = fetch().await?.into();
        self.set(key, blob.clone()).await;
        Ok(blob)
    }

    /// Check presence without touching the counters
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Snapshot of counters and size
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.inner.entry_count(),
            weighted_size: self.inner.weighted_size(),
        }
    }

    /// Flush pending maintenance so size figures are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl Default for ContentCache {
    /// 256 MiB of content, no TTL
    fn default() -> Self {
        Self::new(256 * 1024 * 1024)
    }
}

//! Request cache with TTL expiry and in-flight deduplication
//!
//! `request` serves three cases: a fresh cached value returns immediately, an
//! in-flight fetch for the same key is joined (callers share one outcome),
//! and otherwise a new fetch is started and registered as the key's single
//! in-flight operation. Failed fetches are never cached, so the next caller
//! retries immediately.

use crate::error::{EngineError, EngineResult};

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

type SharedFetch<V> = Shared<BoxFuture<'static, EngineResult<V>>>;

struct CacheEntry<V> {
    /// Cached value and its expiry instant
    value: Option<(V, Instant)>,
    /// At most one in-flight fetch per key, tagged with its generation so a
    /// late completion after `invalidate` cannot clobber a newer fetch
    inflight: Option<(u64, SharedFetch<V>)>,
}

impl<V> CacheEntry<V> {
    fn empty() -> Self {
        Self {
            value: None,
            inflight: None,
        }
    }
}

/// Deduplicating TTL cache for async fetches
///
/// Unbounded by key: TTL expiry and explicit `invalidate`/`clear` are the
/// only eviction.
pub struct RequestCache<V: Clone + Send + Sync + 'static> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    generation: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> RequestCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Fetch-through with dedup: for any set of calls with the same key
    /// issued before the first settles, the fetch closure runs exactly once
    /// and every caller observes the same result or error.
    pub async fn request<F, Fut>(&self, key: &str, fetch: F, ttl: Duration) -> EngineResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<V>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(CacheEntry::empty);

            if let Some((value, expires_at)) = &entry.value {
                if Instant::now() < *expires_at {
                    trace!("Cache hit for {}", key);
                    crate::metrics::record_cache_hit(key);
                    return Ok(value.clone());
                }
            }

            if let Some((generation, shared)) = &entry.inflight {
                debug!("Joining in-flight fetch for {}", key);
                crate::metrics::record_cache_join(key);
                (*generation, shared.clone())
            } else {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let shared = fetch().boxed().shared();
                entry.inflight = Some((generation, shared.clone()));
                crate::metrics::record_cache_miss(key);
                (generation, shared)
            }
        };

        let result = shared.await;

        // Settle the entry. The generation check makes this idempotent across
        // joined callers and inert once `invalidate` dropped the registration.
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if entry.inflight.as_ref().map(|(g, _)| *g) == Some(generation) {
                entry.inflight = None;
                match &result {
                    Ok(value) => {
                        entry.value = Some((value.clone(), Instant::now() + ttl));
                    }
                    Err(e) => {
                        debug!("Fetch for {} failed, not caching: {}", key, e);
                    }
                }
            }
        }

        result
    }

    /// Expire a key's cached value eagerly; safe to call for an absent key.
    /// An in-flight fetch keeps its registration, so the next `request`
    /// joins it instead of starting a duplicate.
    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.value = None;
            if entry.inflight.is_none() {
                entries.remove(key);
            }
        }
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl<V: Clone + Send + Sync + 'static> Default for RequestCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-adapter TTL cache with single-flight refresh and stale fallback.
//!
//! - Entries are served until `now - fetched_at > ttl`
//! - Concurrent misses on one key share a single in-flight refresh
//! - A failed refresh serves the expired entry instead of failing
//! - Refreshes run as their own task, so an abandoned caller still
//!   populates the cache
//! - At most `max_entries` are held. Past the bound, entries older than twice
//!   the TTL go first, then the oldest

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{FuseError, Result};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) <= self.ttl
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }
}

/// Where a cached value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fresh entry, no upstream call
    Hit,
    /// This caller triggered the refresh
    Refreshed,
    /// Joined a refresh another caller started
    Joined,
    /// Refresh failed, expired entry served
    Stale,
}

#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    pub freshness: Freshness,
}

impl<V> Cached<V> {
    /// Served without a new upstream response
    pub fn from_cache(&self) -> bool {
        matches!(self.freshness, Freshness::Hit | Freshness::Stale)
    }
}

type RefreshFuture<V> = Shared<BoxFuture<'static, std::result::Result<V, String>>>;

/// Entries held per cache before eviction starts
pub const DEFAULT_MAX_ENTRIES: usize = 4_096;

#[derive(Debug, Clone, Copy)]
struct Bounds {
    name: &'static str,
    ttl: Duration,
    max_entries: usize,
}

impl Bounds {
    /// Expired entries are kept this long to back a failed refresh
    fn keep_for(&self) -> Duration {
        self.ttl.saturating_mul(2)
    }
}

/// Insert `payload` under `key`, then evict down to the bound. The entry
/// just written is never evicted.
fn store<K, V>(entries: &DashMap<K, CacheEntry<V>>, bounds: Bounds, key: K, payload: V)
where
    K: Eq + Hash + Clone,
{
    let now = Instant::now();
    entries.insert(
        key.clone(),
        CacheEntry {
            payload,
            fetched_at: now,
            ttl: bounds.ttl,
        },
    );
    if entries.len() <= bounds.max_entries {
        return;
    }

    let before = entries.len();
    let keep_for = bounds.keep_for();
    entries.retain(|k, e| k == &key || now.saturating_duration_since(e.fetched_at) <= keep_for);

    let overflow = entries.len().saturating_sub(bounds.max_entries);
    if overflow > 0 {
        let mut by_age: Vec<(K, Instant)> = entries
            .iter()
            .filter(|e| e.key() != &key)
            .map(|e| (e.key().clone(), e.value().fetched_at))
            .collect();
        by_age.sort_by_key(|(_, fetched_at)| *fetched_at);
        for (old, _) in by_age.into_iter().take(overflow) {
            entries.remove(&old);
        }
    }
    debug!(
        cache = bounds.name,
        evicted = before - entries.len(),
        "cache over capacity"
    );
}

pub struct TtlCache<K, V> {
    bounds: Bounds,
    entries: Arc<DashMap<K, CacheEntry<V>>>,
    inflight: Arc<DashMap<K, RefreshFuture<V>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            bounds: self.bounds,
            entries: Arc::clone(&self.entries),
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            bounds: Bounds {
                name,
                ttl,
                max_entries: DEFAULT_MAX_ENTRIES,
            },
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Set the entry bound. Call before the cache is cloned or shared.
    pub fn with_capacity(mut self, max_entries: usize) -> Self {
        self.bounds.max_entries = max_entries.max(1);
        self
    }

    pub fn name(&self) -> &'static str {
        self.bounds.name
    }

    pub fn ttl(&self) -> Duration {
        self.bounds.ttl
    }

    pub fn capacity(&self) -> usize {
        self.bounds.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn insert(&self, key: K, payload: V) {
        store(&self.entries, self.bounds, key, payload);
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop entries too old to serve even as a stale fallback. Returns how
    /// many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let keep_for = self.bounds.keep_for();
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.fetched_at) <= keep_for);
        before.saturating_sub(self.entries.len())
    }

    /// Return the cached value for `key`, refreshing through `fetch` when the
    /// entry is missing or expired.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<Cached<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fresh = self
            .entries
            .get(&key)
            .filter(|e| e.is_fresh(Instant::now()))
            .map(|e| e.payload.clone());
        if let Some(value) = fresh {
            debug!(cache = self.bounds.name, key = ?key, "cache hit");
            return Ok(Cached {
                value,
                freshness: Freshness::Hit,
            });
        }

        let (refresh, freshness) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(pending) => (pending.get().clone(), Freshness::Joined),
            Entry::Vacant(slot) => {
                let refresh = self.spawn_refresh(key.clone(), fetch());
                slot.insert(refresh.clone());
                (refresh, Freshness::Refreshed)
            }
        };

        match refresh.await {
            Ok(value) => Ok(Cached { value, freshness }),
            Err(reason) => {
                let stale = self.entries.get(&key).map(|e| e.payload.clone());
                match stale {
                    Some(value) => {
                        warn!(cache = self.bounds.name, key = ?key, "refresh failed, serving stale entry: {}", reason);
                        Ok(Cached {
                            value,
                            freshness: Freshness::Stale,
                        })
                    }
                    None => Err(FuseError::RefreshFailed {
                        cache: self.bounds.name,
                        reason,
                    }),
                }
            }
        }
    }

    fn spawn_refresh<Fut>(&self, key: K, fetch: Fut) -> RefreshFuture<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let inflight = Arc::clone(&self.inflight);
        let bounds = self.bounds;

        let handle = tokio::spawn(async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                store(&entries, bounds, key.clone(), value.clone());
            }
            inflight.remove(&key);
            result.map_err(|e| e.to_string())
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(format!("refresh task aborted: {}", e)),
            }
        }
        .boxed()
        .shared()
    }
}

//! Bounded TTL cache with in-flight request deduplication.
//!
//! [`TtlCache::get_or_fetch`] coalesces concurrent lookups for the same key:
//! the first caller runs the fetcher, later callers await the same shared
//! future. Successful values are cached for the configured TTL; failures are
//! returned to every waiter and not cached.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use blobfetch_core::cache::TtlCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache: TtlCache<String, u64> = TtlCache::new(128, Duration::from_secs(300));
//! let value = cache
//!     .get_or_fetch("did:plc:abc".to_string(), || async {
//!         Ok::<_, std::io::Error>(42)
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//! assert_eq!(cache.get(&"did:plc:abc".to_string()), Some(42));
//! # Ok(())
//! # }
//! ```

use std::error::Error as StdError;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Error returned by [`TtlCache::get_or_fetch`].
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The fetcher failed. Shared by every caller that awaited the same fetch.
    #[error("fetch failed: {0}")]
    Fetch(Arc<dyn StdError + Send + Sync>),
}

type InFlight<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key-value cache with per-entry TTL, a capacity bound and fetch coalescing.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    in_flight: DashMap<K, InFlight<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1), each
    /// valid for `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Returns the cached value if present and not expired.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if entry.inserted_at.elapsed() <= self.ttl {
                return Some(entry.value.clone());
            }
        }
        // Expired: drop it now (the read guard above must be released first).
        self.entries
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() > self.ttl);
        None
    }

    /// Stores `value`, evicting expired entries first and then the oldest
    /// entry when the cache is full.
    pub fn insert(&self, key: K, value: V) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached value or runs `fetcher`, sharing one fetch among
    /// concurrent callers for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Fetch`] when the fetch fails. The failure is not
    /// cached; the next call fetches again.
    #[instrument(level = "debug", skip_all)]
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetcher: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("joining in-flight fetch");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let fetch = fetcher();
                let shared = async move {
                    fetch
                        .await
                        .map_err(|e| CacheError::Fetch(Arc::new(e)))
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        let result = shared.clone().await;
        self.in_flight
            .remove_if(&key, |_, current| current.ptr_eq(&shared));
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        result
    }

    fn evict(&self) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!("evicting oldest cache entry");
            self.entries.remove(&key);
        }
    }
}

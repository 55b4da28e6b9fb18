//! Deduplication of overlapping sync calls.
//!
//! A [`SyncCache`] hands every caller that asks for a key while work for that
//! key is in flight the same shared future, so N concurrent "sync now" calls
//! cost one network round trip. Once the work settles the entry either
//! lingers for `ttl` (successes only) or is evicted immediately. With the
//! default zero TTL the next call for the key always starts fresh work.

use std::{
    fmt::Debug,
    hash::Hash,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
};

use convos_common::time::{Duration, Instant};
use futures::{
    future::{BoxFuture, Shared},
    Future, FutureExt,
};
use lru::LruCache;
use parking_lot::Mutex;

use crate::{configuration::SyncOptions, error::Result};

type SharedSync = Shared<BoxFuture<'static, Result<()>>>;

enum Entry {
    InFlight { generation: u64, future: SharedSync },
    Settled { at: Instant },
}

enum Lookup {
    Join { generation: u64, future: SharedSync },
    Fresh,
    Start,
}

pub struct SyncCache<K: Hash + Eq> {
    entries: Mutex<LruCache<K, Entry>>,
    ttl: Duration,
    generation: AtomicU64,
}

impl<K> SyncCache<K>
where
    K: Hash + Eq + Clone + Debug,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_options(options: &SyncOptions) -> Self {
        Self::new(options.cache_capacity(), options.cache_ttl())
    }

    /// Run `f` for `key`, or join the run already in flight for it.
    ///
    /// `f` is only invoked when no overlapping call exists. Its future is
    /// created under the cache lock, so it must not do work before being polled.
    pub async fn get_or_create<F, Fut>(&self, key: K, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (generation, future) = {
            let mut entries = self.entries.lock();
            let lookup = match entries.get(&key) {
                Some(Entry::InFlight { generation, future }) => Lookup::Join {
                    generation: *generation,
                    future: future.clone(),
                },
                Some(Entry::Settled { at, .. }) if at.elapsed() < self.ttl => Lookup::Fresh,
                _ => Lookup::Start,
            };

            match lookup {
                Lookup::Fresh => {
                    tracing::trace!(?key, "sync settled recently, skipping");
                    return Ok(());
                }
                Lookup::Join { generation, future } => {
                    tracing::trace!(?key, "joining in-flight sync");
                    (generation, future)
                }
                Lookup::Start => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = f().boxed().shared();
                    if let Some((evicted, _)) = entries.push(
                        key.clone(),
                        Entry::InFlight {
                            generation,
                            future: future.clone(),
                        },
                    ) {
                        if evicted != key {
                            tracing::debug!(?evicted, "sync cache full, evicted oldest entry");
                        }
                    }
                    (generation, future)
                }
            }
        };

        let result = future.await;
        self.settle(&key, generation, result.is_ok());
        result
    }

    /// Every waiter settles; only the first to observe its own generation
    /// still in place changes the entry.
    fn settle(&self, key: &K, generation: u64, succeeded: bool) {
        let mut entries = self.entries.lock();
        let is_current = matches!(
            entries.peek(key),
            Some(Entry::InFlight { generation: g, .. }) if *g == generation
        );
        if !is_current {
            return;
        }

        if succeeded && !self.ttl.is_zero() {
            entries.put(key.clone(), Entry::Settled { at: Instant::now() });
        } else {
            entries.pop(key);
        }
    }

    /// Number of keys currently tracked, in flight or settled.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        matches!(self.entries.lock().peek(key), Some(Entry::InFlight { .. }))
    }
}

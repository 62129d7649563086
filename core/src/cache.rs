//! Bounded, expiring cache of ranked prediction lists.
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::prediction::Prediction;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    fragment: String,
    previous: Vec<String>,
}

struct Slot {
    stored: Instant,
    predictions: Vec<Prediction>,
}

/// LRU cache keyed by `(fragment, previous words)` with a fixed time-to-live.
pub struct PredictionCache {
    entries: Mutex<LruCache<CacheKey, Slot>>,
    ttl: Mutex<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PredictionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Mutex::new(ttl),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(fragment: &str, previous: &[String]) -> CacheKey {
        CacheKey {
            fragment: fragment.to_string(),
            previous: previous.to_vec(),
        }
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.lock().unwrap_or_else(PoisonError::into_inner) = ttl;
    }

    /// Live entry for the key, counting a hit or a miss. Expired entries are
    /// dropped on access.
    pub fn get(&self, fragment: &str, previous: &[String]) -> Option<Vec<Prediction>> {
        let ttl = self.ttl();
        let key = Self::key(fragment, previous);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let lookup = entries
            .get(&key)
            .map(|slot| (slot.stored.elapsed() < ttl).then(|| slot.predictions.clone()));
        let live = match lookup {
            Some(Some(predictions)) => Some(predictions),
            Some(None) => {
                entries.pop(&key);
                None
            }
            None => None,
        };
        drop(entries);

        let counter = if live.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        live
    }

    /// Store a ranking; the last writer for a key wins.
    pub fn put(&self, fragment: &str, previous: &[String], predictions: Vec<Prediction>) {
        let slot = Slot {
            stored: Instant::now(),
            predictions,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(Self::key(fragment, previous), slot);
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Clear entries and reset hit/miss counters.
    pub fn reset(&self) {
        self.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Hit rate in percent, or None before the first lookup.
    pub fn hit_rate(&self) -> Option<f32> {
        let (hits, misses) = self.stats();
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some(hits as f32 / total as f32 * 100.0)
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cap()
            .get()
    }
}

impl std::fmt::Debug for PredictionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl())
            .field("stats", &self.stats())
            .finish()
    }
}

//! Striped-lock associative store.
//!
//! `ShardedMap` splits its keys over a fixed number of `RwLock<HashMap>`
//! shards. Updates to keys in different shards never contend; a
//! read-modify-write on a single key holds only that key's shard, which makes
//! "get-or-create-then-mutate" atomic per key without a global lock.
use ahash::{AHashMap, RandomState};
use std::hash::BuildHasher;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_SHARDS: usize = 16;

pub struct ShardedMap<V> {
    shards: Box<[RwLock<AHashMap<String, V>>]>,
    hasher: RandomState,
}

impl<V> ShardedMap<V> {
    /// Create an empty map with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create an empty map with `n` shards (at least one).
    pub fn with_shards(n: usize) -> Self {
        let shards = (0..n.max(1))
            .map(|_| RwLock::new(AHashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        (BuildHasher::hash_one(&self.hasher, key) as usize) % self.shards.len()
    }

    // A panic inside a closure cannot leave a half-written entry behind, so a
    // poisoned shard is still consistent.
    fn read_shard(&self, idx: usize) -> RwLockReadGuard<'_, AHashMap<String, V>> {
        self.shards[idx].read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shard(&self, idx: usize) -> RwLockWriteGuard<'_, AHashMap<String, V>> {
        self.shards[idx].write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the value for `key`, if present.
    pub fn with<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let shard = self.read_shard(self.shard_index(key));
        shard.get(key).map(f)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read_shard(self.shard_index(key)).contains_key(key)
    }

    /// Atomically fetch-or-create the entry for `key` and mutate it.
    ///
    /// `create` runs only when the key is absent. Both closures execute while
    /// the key's shard is write-locked.
    pub fn update<R>(
        &self,
        key: &str,
        create: impl FnOnce() -> V,
        mutate: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut shard = self.write_shard(self.shard_index(key));
        let entry = shard.entry(key.to_string()).or_insert_with(create);
        mutate(entry)
    }

    /// Insert or replace the value for `key`, returning the old one.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        let idx = self.shard_index(&key);
        self.write_shard(idx).insert(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.write_shard(self.shard_index(key)).remove(key)
    }

    /// Keep only entries for which `keep` returns true. Returns how many were
    /// removed. Shards are visited one at a time.
    pub fn retain(&self, mut keep: impl FnMut(&str, &mut V) -> bool) -> usize {
        let mut removed = 0;
        for idx in 0..self.shards.len() {
            let mut shard = self.write_shard(idx);
            let before = shard.len();
            shard.retain(|k, v| keep(k, v));
            removed += before - shard.len();
        }
        removed
    }

    /// Mutate every entry in place, one shard at a time.
    pub fn for_each_mut(&self, mut f: impl FnMut(&str, &mut V)) {
        for idx in 0..self.shards.len() {
            let mut shard = self.write_shard(idx);
            for (k, v) in shard.iter_mut() {
                f(k, v);
            }
        }
    }

    /// Visit every entry, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for idx in 0..self.shards.len() {
            let shard = self.read_shard(idx);
            for (k, v) in shard.iter() {
                f(k, v);
            }
        }
    }

    /// Snapshot of all keys (unordered).
    pub fn keys(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|k, _| out.push(k.to_string()));
        out
    }

    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .map(|idx| self.read_shard(idx).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for idx in 0..self.shards.len() {
            self.write_shard(idx).clear();
        }
    }
}

impl<V: Clone> ShardedMap<V> {
    /// Clone the value for `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.with(key, V::clone)
    }

    /// Snapshot of all entries (unordered).
    pub fn snapshot(&self) -> Vec<(String, V)> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|k, v| out.push((k.to_string(), v.clone())));
        out
    }

    /// Replace the whole contents with `entries`.
    ///
    /// Shards are swapped one by one, so a concurrent reader may briefly see
    /// a mix of old and new shards.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, V)>) {
        let mut fresh: Vec<AHashMap<String, V>> =
            (0..self.shards.len()).map(|_| AHashMap::new()).collect();
        for (k, v) in entries {
            let idx = self.shard_index(&k);
            fresh[idx].insert(k, v);
        }
        for (idx, map) in fresh.into_iter().enumerate() {
            *self.write_shard(idx) = map;
        }
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for ShardedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

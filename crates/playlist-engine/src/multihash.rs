//! Sharded hash map with one lock per shard.
//!
//! Keys are spread over [`SHARDS`] independent shards by the high bits of their
//! 32-bit hash, so unrelated lookups rarely contend. Each shard starts without
//! any bucket storage and grows/shrinks by doubling/halving when its load factor
//! crosses 1.0 / 0.25.
//!
//! The primitive operation is [`MultiHash::lookup`], which lets the caller insert
//! on a miss or remove on a hit atomically with the lookup itself.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

const SHARD_BITS: u32 = 4;
/// Number of independent shards (a power of two).
pub const SHARDS: usize = 1 << SHARD_BITS;
const INITIAL_BUCKETS: usize = 16;

/// Outcome of a [`MultiHash::lookup`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookupStatus {
    /// The key was present.
    pub found: bool,
    /// The key was absent and `on_miss` supplied a value.
    pub added: bool,
    /// The key was present and `on_hit` asked for removal.
    pub removed: bool,
}

struct Node<K, V> {
    hash: u32,
    key: K,
    value: V,
}

struct Shard<K, V> {
    buckets: Vec<Vec<Node<K, V>>>,
    len: usize,
}

impl<K, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            buckets: Vec::new(),
            len: 0,
        }
    }

    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    fn resize(&mut self, buckets: usize) {
        let old = std::mem::take(&mut self.buckets);
        if buckets == 0 {
            return;
        }
        self.buckets = (0..buckets).map(|_| Vec::new()).collect();
        for node in old.into_iter().flatten() {
            let b = self.bucket_of(node.hash);
            self.buckets[b].push(node);
        }
    }

    fn rebalance(&mut self) {
        let size = self.buckets.len();
        if self.len == 0 {
            if size != 0 {
                self.resize(0);
            }
        } else if size == 0 {
            self.resize(INITIAL_BUCKETS);
        } else if self.len > size {
            self.resize(size * 2);
        } else if size > INITIAL_BUCKETS && self.len < size / 4 {
            self.resize(size / 2);
        }
    }
}

/// Concurrent map used for registries and caches.
pub struct MultiHash<K, V> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> Default for MultiHash<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> MultiHash<K, V> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(Shard::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// 32-bit hash of `key` as expected by [`MultiHash::lookup`].
    pub fn hash_of(&self, key: &K) -> u32 {
        let h = self.hasher.hash_one(key);
        (h ^ (h >> 32)) as u32
    }

    fn shard(&self, hash: u32) -> &Mutex<Shard<K, V>> {
        &self.shards[(hash >> (32 - SHARD_BITS)) as usize]
    }

    /// Look up `key` under its shard lock.
    ///
    /// On a miss, `on_miss` may return a value to insert. On a hit, `on_hit` gets
    /// mutable access to the value and returns `true` to remove the node.
    pub fn lookup<M, H>(&self, key: &K, hash: u32, on_miss: M, on_hit: H) -> LookupStatus
    where
        M: FnOnce(&K) -> Option<V>,
        H: FnOnce(&mut V) -> bool,
    {
        let mut shard = self.shard(hash).lock();
        let mut status = LookupStatus::default();

        if !shard.buckets.is_empty() {
            let b = shard.bucket_of(hash);
            let bucket = &mut shard.buckets[b];
            if let Some(pos) = bucket
                .iter()
                .position(|node| node.hash == hash && node.key == *key)
            {
                status.found = true;
                if on_hit(&mut bucket[pos].value) {
                    bucket.swap_remove(pos);
                    shard.len -= 1;
                    status.removed = true;
                    shard.rebalance();
                }
                return status;
            }
        }

        if let Some(value) = on_miss(key) {
            if shard.buckets.is_empty() {
                shard.resize(INITIAL_BUCKETS);
            }
            let b = shard.bucket_of(hash);
            shard.buckets[b].push(Node {
                hash,
                key: key.clone(),
                value,
            });
            shard.len += 1;
            status.added = true;
            shard.rebalance();
        }
        status
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut out = None;
        self.lookup(key, self.hash_of(key), |_| None, |value| {
            out = Some(value.clone());
            false
        });
        out
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key, self.hash_of(key), |_| None, |_| false).found
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let hash = self.hash_of(&key);
        let mut shard = self.shard(hash).lock();
        if !shard.buckets.is_empty() {
            let b = shard.bucket_of(hash);
            if let Some(node) = shard.buckets[b]
                .iter_mut()
                .find(|node| node.hash == hash && node.key == key)
            {
                return Some(std::mem::replace(&mut node.value, value));
            }
        } else {
            shard.resize(INITIAL_BUCKETS);
        }
        let b = shard.bucket_of(hash);
        shard.buckets[b].push(Node { hash, key, value });
        shard.len += 1;
        shard.rebalance();
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let hash = self.hash_of(key);
        let mut shard = self.shard(hash).lock();
        if shard.buckets.is_empty() {
            return None;
        }
        let b = shard.bucket_of(hash);
        let pos = shard.buckets[b]
            .iter()
            .position(|node| node.hash == hash && node.key == *key)?;
        let node = shard.buckets[b].swap_remove(pos);
        shard.len -= 1;
        shard.rebalance();
        Some(node.value)
    }

    /// Visit every node with all shards locked at once.
    ///
    /// The callback returns `true` to remove the node. Returns the number of
    /// removed nodes.
    pub fn iterate<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut guards: Vec<_> = self.shards.iter().map(|shard| shard.lock()).collect();
        let mut removed = 0;
        for shard in guards.iter_mut() {
            let before = shard.len;
            for bucket in shard.buckets.iter_mut() {
                bucket.retain_mut(|node| !f(&node.key, &mut node.value));
            }
            let len = shard.buckets.iter().map(Vec::len).sum();
            removed += before - len;
            shard.len = len;
            shard.rebalance();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.len = 0;
            shard.resize(0);
        }
    }

    #[cfg(test)]
    fn bucket_counts(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|shard| shard.lock().buckets.len())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lookup_adds_on_miss_and_removes_on_hit() {
        let map: MultiHash<String, u32> = MultiHash::new();
        let key = "a.flac".to_string();
        let hash = map.hash_of(&key);

        let status = map.lookup(&key, hash, |_| Some(1), |_| false);
        assert_eq!(
            status,
            LookupStatus {
                found: false,
                added: true,
                removed: false
            }
        );

        let status = map.lookup(&key, hash, |_| Some(2), |value| {
            *value += 10;
            false
        });
        assert!(status.found && !status.added);
        assert_eq!(map.get(&key), Some(11));

        let status = map.lookup(&key, hash, |_| None, |_| true);
        assert!(status.found && status.removed);
        assert!(map.is_empty());
    }

    #[test]
    fn miss_without_value_inserts_nothing() {
        let map: MultiHash<i32, ()> = MultiHash::new();
        let status = map.lookup(&7, map.hash_of(&7), |_| None, |_| false);
        assert_eq!(status, LookupStatus::default());
        assert!(map.bucket_counts().iter().all(|&n| n == 0));
    }

    #[test]
    fn shards_grow_and_release_storage() {
        let map: MultiHash<u32, u32> = MultiHash::new();
        for i in 0..4096 {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), 4096);
        assert!(map.bucket_counts().iter().any(|&n| n > INITIAL_BUCKETS));
        for i in 0..4096 {
            assert_eq!(map.get(&i), Some(i * 2));
        }

        for i in 0..4096 {
            assert_eq!(map.remove(&i), Some(i * 2));
        }
        assert!(map.is_empty());
        assert!(map.bucket_counts().iter().all(|&n| n == 0));
    }

    #[test]
    fn iterate_can_remove_nodes() {
        let map: MultiHash<u32, u32> = MultiHash::new();
        for i in 0..100 {
            map.insert(i, i);
        }
        let removed = map.iterate(|_, value| *value % 2 == 0);
        assert_eq!(removed, 50);
        assert_eq!(map.len(), 50);
        assert!(map.get(&3).is_some());
        assert!(map.get(&4).is_none());
    }

    #[test]
    fn concurrent_inserts_are_all_visible() {
        let map: Arc<MultiHash<u32, u32>> = Arc::new(MultiHash::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        map.insert(t * 1000 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 2000);
    }
}

//! Bounded cache of recorded tile resources
//!
//! When a node leaves the visible set its command buffer is parked here
//! instead of being freed; if the node becomes visible again before it is
//! evicted the buffer is reused without re-recording. Evicted resources go
//! to a free pool so the next miss can re-record into them.

use std::collections::VecDeque;
use std::fmt::Debug;

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups that found the node's resource
    pub hits: u64,
    /// Lookups that had to re-record
    pub misses: u64,
    /// Entries pushed out by newer ones
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0 when nothing was looked up
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

/// LRU of inactive resources plus a free pool
///
/// The front of the queue is the most recently inserted entry.
#[derive(Debug)]
pub struct TileCache<K, R> {
    capacity: usize,
    entries: VecDeque<(K, R)>,
    free: Vec<R>,
    stats: CacheStats,
}

impl<K: Copy + PartialEq + Debug, R> TileCache<K, R> {
    /// Create a cache holding at most `capacity` inactive entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
            free: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Park the resource of a node that left the visible set
    ///
    /// Returns the key evicted to make room, if any.
    pub fn insert(&mut self, key: K, resource: R) -> Option<K> {
        if let Some(pos) = self.position(key) {
            if let Some((_, old)) = self.entries.remove(pos) {
                self.free.push(old);
            }
        }
        self.entries.push_front((key, resource));

        if self.entries.len() > self.capacity {
            let (evicted, resource) = self.entries.pop_back()?;
            self.free.push(resource);
            self.stats.evictions += 1;
            log::trace!("Tile cache evicted {:?}", evicted);
            return Some(evicted);
        }
        None
    }

    /// Park a speculatively recorded resource without evicting anything
    ///
    /// Hands the resource back when the cache is full.
    pub fn admit(&mut self, key: K, resource: R) -> Result<(), R> {
        if self.contains(key) || self.entries.len() >= self.capacity {
            return Err(resource);
        }
        self.entries.push_back((key, resource));
        Ok(())
    }

    /// Remove the resource of a node entering the visible set
    pub fn take(&mut self, key: K) -> Option<R> {
        match self.position(key).and_then(|pos| self.entries.remove(pos)) {
            Some((_, resource)) => {
                self.stats.hits += 1;
                Some(resource)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Reuse a pooled resource
    pub fn take_free(&mut self) -> Option<R> {
        self.free.pop()
    }

    /// Return a resource to the free pool
    pub fn release(&mut self, resource: R) {
        self.free.push(resource);
    }

    /// True when `key` has a cached resource
    pub fn contains(&self, key: K) -> bool {
        self.position(key).is_some()
    }

    /// Cached keys, most recent first
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of cached entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resources in the free pool
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Hit, miss and eviction counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Remove every cached and pooled resource
    pub fn drain(&mut self) -> Vec<R> {
        let mut all: Vec<R> = self.entries.drain(..).map(|(_, resource)| resource).collect();
        all.append(&mut self.free);
        all
    }

    fn position(&self, key: K) -> Option<usize> {
        self.entries.iter().position(|(k, _)| *k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut cache = TileCache::new(3);
        for key in 0..10u32 {
            cache.insert(key, key * 100);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec![9, 8, 7]);
        assert_eq!(cache.stats().evictions, 7);
        assert_eq!(cache.free_len(), 7);
    }

    #[test]
    fn test_least_recent_entry_is_evicted() {
        let mut cache = TileCache::new(2);
        assert_eq!(cache.insert(1, "a"), None);
        assert_eq!(cache.insert(2, "b"), None);
        assert_eq!(cache.insert(3, "c"), Some(1));
        assert!(!cache.contains(1));
        assert_eq!(cache.take_free(), Some("a"));
    }

    #[test]
    fn test_hits_and_misses() {
        let mut cache = TileCache::new(4);
        cache.insert(5usize, 50);
        assert_eq!(cache.take(5), Some(50));
        assert_eq!(cache.take(5), None);
        assert_eq!(cache.take(6), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let mut cache = TileCache::new(2);
        cache.insert(1, 10);
        cache.insert(1, 11);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.free_len(), 1);
        assert_eq!(cache.take(1), Some(11));
    }

    #[test]
    fn test_admit_never_evicts() {
        let mut cache = TileCache::new(2);
        cache.insert(1, 10);
        assert_eq!(cache.admit(2, 20), Ok(()));
        assert_eq!(cache.admit(3, 30), Err(30));
        assert_eq!(cache.stats().evictions, 0);
        // Warmed entries are the first to go
        assert_eq!(cache.insert(4, 40), Some(2));
    }

    #[test]
    fn test_zero_capacity_pools_everything() {
        let mut cache = TileCache::new(0);
        assert_eq!(cache.insert(1, 10), Some(1));
        assert!(cache.is_empty());
        assert_eq!(cache.drain(), vec![10]);
    }
}

//! In-memory cache for storing key-value pairs.
//!
//! Uses moka's high-performance concurrent cache implementation.

use moka::sync::Cache;

/// Thread-safe in-memory cache with configurable capacity.
///
/// Used for keeping summaries of recently finished runs
/// (`MemCache<RunId, RunSummary>`) so reports and logs stay queryable
/// after the run has left the in-flight list. Entries are evicted
/// once capacity is exceeded.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    pub fn remove(
        &self,
        key: &K,
    ) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let cache = MemCache::<String, u32>::new(8);
        cache.set("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.remove(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}

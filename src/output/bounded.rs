use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
    last_access: u64,
}

/// Map with an optional TTL and an entry ceiling.
///
/// Once the ceiling is hit the least recently accessed entry is evicted.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            tick: 0,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = match (self.entries.get(key), self.ttl) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => now.saturating_duration_since(entry.stored_at) > ttl,
            (Some(_), None) => false,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        })
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.tick += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                last_access: self.tick,
            },
        );
    }

    /// Look at an entry without refreshing its recency or checking its age
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|key, entry| keep(key, &entry.value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_accessed() {
        let mut cache = BoundedCache::new(2, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = BoundedCache::new(4, Some(Duration::from_secs(1)));
        let t0 = Instant::now();
        cache.insert_at("k", "v", t0);
        assert_eq!(cache.get_at(&"k", t0 + Duration::from_millis(500)), Some("v"));
        assert_eq!(cache.get_at(&"k", t0 + Duration::from_secs(2)), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let mut cache = BoundedCache::new(2, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.peek("a"), Some(&1));
        cache.insert("c", 3);
        assert_eq!(cache.peek("a"), None);
        cache.retain(|_, v| *v > 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = BoundedCache::new(2, None);
        cache.insert(1, "x");
        cache.insert(2, "y");
        cache.insert(2, "z");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some("x"));
        assert_eq!(cache.get(&2), Some("z"));
    }
}

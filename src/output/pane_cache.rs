use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::BoundedCache;

#[derive(Debug, Clone)]
struct Capture {
    text: String,
    /// Cycle of the request that produced this capture
    cycle: u64,
}

/// Short-lived cache of raw pane captures, refreshed a whole poll cycle at a time.
///
/// Cycles come from one counter shared by poll batches and single-pane
/// refreshes, so a refresh issued while a batch was in flight carries the
/// higher number and survives that batch.
#[derive(Debug)]
pub struct PaneCache {
    captures: BoundedCache<String, Capture>,
    /// Cycle of the newest batch applied
    cycle: u64,
}

impl PaneCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            captures: BoundedCache::new(capacity, Some(ttl)),
            cycle: 0,
        }
    }

    /// Cached capture for a session, or None when a fresh capture is needed
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<String> {
        self.captures.get_at(key, now).map(|c| c.text)
    }

    /// Replace the cache with one poll cycle's batch.
    ///
    /// Keys missing from the batch are dropped. A batch from an older cycle
    /// than the one already applied is discarded and false is returned.
    /// Entries captured by a later request are left alone.
    pub fn set_all(&mut self, cycle: u64, batch: HashMap<String, String>) -> bool {
        self.set_all_at(cycle, batch, Instant::now())
    }

    pub fn set_all_at(&mut self, cycle: u64, batch: HashMap<String, String>, now: Instant) -> bool {
        if cycle < self.cycle {
            return false;
        }
        self.cycle = cycle;
        self.captures
            .retain(|key, capture| capture.cycle > cycle || batch.contains_key(key));
        for (key, text) in batch {
            if self.newer_than(&key, cycle) {
                continue;
            }
            self.captures.insert_at(key, Capture { text, cycle }, now);
        }
        true
    }

    /// Refresh a single entry without touching the rest of the batch
    pub fn set_one(&mut self, cycle: u64, key: &str, text: String) -> bool {
        if cycle < self.cycle || self.newer_than(key, cycle) {
            return false;
        }
        self.captures.insert(key.to_string(), Capture { text, cycle });
        true
    }

    /// True when the entry for `key` came from a request later than `cycle`
    pub fn newer_than(&self, key: &str, cycle: u64) -> bool {
        self.captures.peek(key).is_some_and(|c| c.cycle > cycle)
    }

    pub fn remove(&mut self, key: &str) {
        self.captures.remove(key);
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cache() -> PaneCache {
        PaneCache::new(16, Duration::from_secs(5))
    }

    #[test]
    fn test_set_all_purges_missing_keys() {
        let mut cache = cache();
        cache.set_all(1, batch(&[("a", "1"), ("b", "2")]));
        cache.set_all(2, batch(&[("a", "3")]));
        assert_eq!(cache.get("a").as_deref(), Some("3"));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_cycle_is_discarded() {
        let mut cache = cache();
        assert!(cache.set_all(5, batch(&[("a", "fresh")])));
        assert!(!cache.set_all(4, batch(&[("a", "late")])));
        assert_eq!(cache.get("a").as_deref(), Some("fresh"));
        assert_eq!(cache.cycle(), 5);
    }

    #[test]
    fn test_expired_capture_needs_refresh() {
        let mut cache = PaneCache::new(16, Duration::from_millis(500));
        let t0 = Instant::now();
        cache.set_all_at(1, batch(&[("a", "x")]), t0);
        assert_eq!(cache.get_at("a", t0 + Duration::from_millis(100)).as_deref(), Some("x"));
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_later_single_capture_survives_earlier_batch() {
        let mut cache = cache();
        // Batch 1 requested, then a refresh of "a" as cycle 2; the batch lands last
        assert!(cache.set_one(2, "a", "typed".into()));
        assert!(cache.set_all(1, batch(&[("a", "old"), ("b", "b1")])));
        assert_eq!(cache.get("a").as_deref(), Some("typed"));
        assert_eq!(cache.get("b").as_deref(), Some("b1"));
        assert!(cache.newer_than("a", 1));

        // A batch requested after the refresh replaces it
        assert!(cache.set_all(3, batch(&[("a", "new")])));
        assert_eq!(cache.get("a").as_deref(), Some("new"));
        assert!(!cache.set_one(2, "a", "late".into()));
    }

    #[test]
    fn test_entry_ceiling_evicts() {
        let mut cache = PaneCache::new(2, Duration::from_secs(5));
        cache.set_all(1, batch(&[("a", "1"), ("b", "2")]));
        assert!(cache.set_one(2, "c", "3".into()));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }
}

use std::collections::{HashSet, VecDeque};

/// Bounded LRU cache of processed message IDs. The signaling channel
/// replays children on subscription, so every message can arrive more than
/// once; this keeps duplicate handling cheap without growing for the
/// lifetime of a long session. A duplicate hit refreshes the entry, so
/// frequently replayed IDs outlive one-off ones.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `id` as processed. Returns `false` if it was already seen,
    /// moving it to most-recently-used.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            if let Some(position) = self.order.iter().position(|seen| seen == id) {
                if let Some(entry) = self.order.remove(position) {
                    self.order.push_back(entry);
                }
            }
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.to_owned());
        self.order.push_back(id.to_owned());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_rejected() {
        let mut cache = DedupCache::new(8);
        assert!(cache.insert("a"));
        assert!(!cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(!cache.insert("a"));
    }

    #[test]
    fn capacity_is_bounded_with_least_recent_evicted_first() {
        let mut cache = DedupCache::new(2);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c")); // evicts "a"
        assert_eq!(cache.len(), 2);
        assert!(cache.insert("a"));
        assert!(!cache.insert("c"));
    }

    #[test]
    fn duplicate_hits_refresh_recency() {
        let mut cache = DedupCache::new(2);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(!cache.insert("a")); // "a" is now most recent
        assert!(cache.insert("c")); // evicts "b", not "a"
        assert!(!cache.insert("a"));
        assert!(cache.insert("b"));
    }
}

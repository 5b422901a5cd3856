use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// A cached payload with its fetch time.
#[derive(Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
}

/// TTL cache over string keys. Advisory: a miss or an expired entry only
/// means the caller refetches. `fetched_at` is monotone per key; a stale
/// writer can never roll a fresher entry back.
pub struct TtlCache<T: Clone> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    /// Optional LRU-ish bound; oldest entries are dropped past this.
    max_entries: Option<usize>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: None,
        }
    }

    pub fn with_capacity_bound(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// A valid (unexpired) entry, if present.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<T>> {
        let entry = self.entries.get(key)?;
        let age = (now - entry.fetched_at).num_seconds();
        if age >= 0 && (age as u64) < self.ttl.as_secs() {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Insert a payload fetched at `fetched_at`. Older payloads never
    /// replace newer ones for the same key.
    pub fn insert(&self, key: String, data: T, fetched_at: DateTime<Utc>) {
        match self.entries.get_mut(&key) {
            Some(mut existing) => {
                if fetched_at >= existing.fetched_at {
                    *existing = CacheEntry { data, fetched_at };
                }
            }
            None => {
                self.entries.insert(key, CacheEntry { data, fetched_at });
            }
        }
        if let Some(bound) = self.max_entries {
            self.evict_past(bound);
        }
    }

    fn evict_past(&self, bound: usize) {
        while self.entries.len() > bound {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().fetched_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn entries_expire_by_ttl() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 7, at(0));
        assert_eq!(cache.get("k", at(30)).map(|e| e.data), Some(7));
        assert!(cache.get("k", at(61)).is_none());
    }

    #[test]
    fn stale_writer_cannot_roll_back_fresher_entry() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(600));
        cache.insert("k".to_string(), 2, at(100));
        cache.insert("k".to_string(), 1, at(50));
        assert_eq!(cache.get("k", at(110)).map(|e| e.data), Some(2));
    }

    #[test]
    fn capacity_bound_drops_oldest() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(600)).with_capacity_bound(2);
        cache.insert("a".to_string(), 1, at(10));
        cache.insert("b".to_string(), 2, at(20));
        cache.insert("c".to_string(), 3, at(30));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", at(35)).is_none());
        assert!(cache.get("c", at(35)).is_some());
    }
}

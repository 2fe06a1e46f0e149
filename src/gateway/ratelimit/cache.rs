//! In-process mirror of fingerprint counters.
//!
//! Fast path between store syncs: a fingerprint already known to be over
//! budget is rejected without a store round-trip. Size-bounded under high
//! fingerprint cardinality; eviction runs in bounded batches so no insert
//! ever scans the whole map under the lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const EVICTION_BATCH: usize = 64;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    count: u64,
    deadline: Instant,
}

#[derive(Debug)]
pub struct FingerprintCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl FingerprintCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the retry hint when the cached count for `key` already meets
    /// `limit` and the window is still live.
    pub fn over_limit(&self, key: &str, limit: u64) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        let now = Instant::now();
        if entry.deadline > now && entry.count >= limit {
            Some(entry.deadline - now)
        } else {
            None
        }
    }

    /// Mirror an authoritative observation from the shared store.
    pub fn record(&self, key: &str, count: u64, retry_after: Duration) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .take(EVICTION_BATCH)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                entries.remove(k);
            }
            // still full of live entries: skip the mirror, the store stays
            // authoritative either way
            if entries.len() >= self.capacity {
                return;
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                count,
                deadline: now + retry_after,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_not_short_circuited() {
        let cache = FingerprintCache::new(16);
        cache.record("fp-1", 3, Duration::from_secs(60));
        assert!(cache.over_limit("fp-1", 5).is_none());
        assert!(cache.over_limit("fp-2", 5).is_none());
    }

    #[test]
    fn at_limit_produces_retry_hint() {
        let cache = FingerprintCache::new(16);
        cache.record("fp-1", 5, Duration::from_secs(60));
        let hint = cache.over_limit("fp-1", 5).expect("should be limited");
        assert!(hint <= Duration::from_secs(60));
    }

    #[test]
    fn expired_entries_stop_limiting() {
        let cache = FingerprintCache::new(16);
        cache.record("fp-1", 5, Duration::from_millis(0));
        assert!(cache.over_limit("fp-1", 5).is_none());
    }

    #[test]
    fn capacity_is_bounded_with_expired_eviction() {
        let cache = FingerprintCache::new(4);
        for i in 0..4 {
            cache.record(&format!("old-{i}"), 5, Duration::from_millis(0));
        }
        assert_eq!(cache.len(), 4);

        // expired entries make room for the new key
        cache.record("fresh", 5, Duration::from_secs(60));
        assert!(cache.len() <= 4);
        assert!(cache.over_limit("fresh", 5).is_some());
    }

    #[test]
    fn full_of_live_entries_skips_mirror_but_stays_bounded() {
        let cache = FingerprintCache::new(4);
        for i in 0..4 {
            cache.record(&format!("live-{i}"), 5, Duration::from_secs(60));
        }
        cache.record("extra", 5, Duration::from_secs(60));
        assert_eq!(cache.len(), 4);
        assert!(cache.over_limit("extra", 5).is_none());
    }
}

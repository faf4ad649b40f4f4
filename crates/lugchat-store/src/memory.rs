//! `MessageStore`: a `BTreeMap` keyed by timestamp behind a mutex.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::StoreConfig;

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Bounded, ascending, timestamp-keyed store.
///
/// All operations take the internal lock for their whole duration, so each
/// one is atomic with respect to the others.
pub struct MessageStore<V> {
    config: StoreConfig,
    records: Mutex<BTreeMap<i64, V>>,
    clock: Clock,
}

impl<V: Clone> MessageStore<V> {
    /// Create an empty store using the system clock.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create an empty store with a custom clock.
    pub fn with_clock(config: StoreConfig, clock: Clock) -> Self {
        Self {
            config,
            records: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Eviction bounds in effect.
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Insert `value` at `key`, replacing any record already there, then
    /// evict. Returns the replaced value.
    pub fn set(&self, key: i64, value: V) -> Option<V> {
        let now = (self.clock)();
        let mut records = self.records.lock();
        let previous = records.insert(key, value);
        if previous.is_some() {
            debug!(key, "store key overwritten");
        }
        self.evict(&mut records, now);
        previous
    }

    /// Value at `key`.
    pub fn get(&self, key: i64) -> Option<V> {
        self.records.lock().get(&key).cloned()
    }

    /// Whether a record exists at `key`.
    pub fn has(&self, key: i64) -> bool {
        self.records.lock().contains_key(&key)
    }

    /// Remove and return the record at `key`.
    pub fn delete(&self, key: i64) -> Option<V> {
        self.records.lock().remove(&key)
    }

    /// Every record, ascending by key.
    pub fn all(&self) -> Vec<(i64, V)> {
        self.records
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Smallest key, or `0` when empty.
    pub fn oldest(&self) -> i64 {
        self.records.lock().keys().next().copied().unwrap_or(0)
    }

    /// Largest key, or `0` when empty.
    pub fn newest(&self) -> i64 {
        self.records.lock().keys().next_back().copied().unwrap_or(0)
    }

    /// Records with `start < key < end`, ascending.
    pub fn range_exclusive(&self, start: i64, end: i64) -> Vec<(i64, V)> {
        // BTreeMap::range panics on an empty or inverted exclusive range
        if end.saturating_sub(start) < 2 {
            return Vec::new();
        }
        self.records
            .lock()
            .range((Bound::Excluded(start), Bound::Excluded(end)))
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn evict(&self, records: &mut BTreeMap<i64, V>, now: i64) {
        if self.config.max_duration_ms > 0 {
            let max_age = i64::try_from(self.config.max_duration_ms).unwrap_or(i64::MAX);
            let too_old = now.saturating_sub(max_age);
            let kept = records.split_off(&too_old);
            let expired = std::mem::replace(records, kept).len();
            if expired > 0 {
                debug!(expired, too_old, "evicted records by age");
            }
        }

        if self.config.max_records > 0 {
            let mut evicted = 0usize;
            while records.len() > self.config.max_records {
                if records.pop_first().is_none() {
                    break;
                }
                evicted += 1;
            }
            if evicted > 0 {
                debug!(evicted, "evicted records by count");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn unbounded() -> MessageStore<&'static str> {
        MessageStore::new(StoreConfig {
            max_duration_ms: 0,
            max_records: 0,
        })
    }

    fn fixed_clock(now: Arc<AtomicI64>) -> Clock {
        Arc::new(move || now.load(Ordering::SeqCst))
    }

    #[test]
    fn empty_store_sentinels() {
        let store = unbounded();
        assert_eq!(store.oldest(), 0);
        assert_eq!(store.newest(), 0);
        assert!(store.is_empty());
        assert!(store.all().is_empty());
    }

    #[test]
    fn set_get_has_delete() {
        let store = unbounded();
        assert!(store.set(5, "a").is_none());
        assert!(store.has(5));
        assert_eq!(store.get(5), Some("a"));
        assert_eq!(store.delete(5), Some("a"));
        assert!(!store.has(5));
        assert_eq!(store.delete(5), None);
    }

    #[test]
    fn duplicate_key_last_write_wins() {
        let store = unbounded();
        let _ = store.set(7, "first");
        assert_eq!(store.set(7, "second"), Some("first"));
        assert_eq!(store.get(7), Some("second"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn all_is_ascending_regardless_of_insert_order() {
        let store = unbounded();
        for k in [30, 10, 20, -5] {
            let _ = store.set(k, "v");
        }
        let keys: Vec<i64> = store.all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![-5, 10, 20, 30]);
        assert_eq!(store.oldest(), -5);
        assert_eq!(store.newest(), 30);
    }

    #[test]
    fn history_window_is_exclusive_on_both_ends() {
        let store = unbounded();
        let _ = store.set(100, "a");
        let _ = store.set(200, "b");
        let _ = store.set(300, "c");
        assert_eq!(store.range_exclusive(100, 300), vec![(200, "b")]);
        assert_eq!(store.range_exclusive(99, 301).len(), 3);
    }

    #[test]
    fn degenerate_windows_are_empty() {
        let store = unbounded();
        let _ = store.set(100, "a");
        assert!(store.range_exclusive(100, 100).is_empty());
        assert!(store.range_exclusive(100, 101).is_empty());
        assert!(store.range_exclusive(300, 100).is_empty());
        assert!(store.range_exclusive(i64::MIN, i64::MIN).is_empty());
        assert_eq!(store.range_exclusive(i64::MIN, i64::MAX).len(), 1);
    }

    #[test]
    fn eviction_by_count_drops_oldest() {
        let store = MessageStore::new(StoreConfig {
            max_duration_ms: 0,
            max_records: 2,
        });
        let _ = store.set(10, "a");
        let _ = store.set(20, "b");
        let _ = store.set(30, "c");
        assert_eq!(store.all(), vec![(20, "b"), (30, "c")]);
        assert_eq!(store.oldest(), 20);
    }

    #[test]
    fn eviction_by_count_ignores_insert_order() {
        let store = MessageStore::new(StoreConfig {
            max_duration_ms: 0,
            max_records: 2,
        });
        let _ = store.set(30, "c");
        let _ = store.set(20, "b");
        let _ = store.set(10, "a");
        assert_eq!(store.all(), vec![(20, "b"), (30, "c")]);
    }

    #[test]
    fn eviction_by_age() {
        let now = Arc::new(AtomicI64::new(1_000_000));
        let store = MessageStore::with_clock(
            StoreConfig {
                max_duration_ms: 1000,
                max_records: 0,
            },
            fixed_clock(now.clone()),
        );
        let _ = store.set(1_000_000 - 500, "recent");
        assert!(store.has(999_500));

        now.store(1_005_000, Ordering::SeqCst);
        let _ = store.set(1_005_000, "now");
        assert!(!store.has(999_500));
        assert_eq!(store.all(), vec![(1_005_000, "now")]);
    }

    #[test]
    fn stale_insert_is_evicted_by_the_next_set() {
        let now = Arc::new(AtomicI64::new(50_000));
        let store = MessageStore::with_clock(
            StoreConfig {
                max_duration_ms: 1000,
                max_records: 0,
            },
            fixed_clock(now),
        );
        let _ = store.set(45_000, "old");
        let _ = store.set(50_000, "fresh");
        assert!(!store.has(45_000));
        assert!(store.has(50_000));
    }

    #[test]
    fn age_boundary_is_kept() {
        let now = Arc::new(AtomicI64::new(10_000));
        let store = MessageStore::with_clock(
            StoreConfig {
                max_duration_ms: 1000,
                max_records: 0,
            },
            fixed_clock(now),
        );
        let _ = store.set(9_000, "edge");
        let _ = store.set(8_999, "stale");
        assert!(store.has(9_000));
        assert!(!store.has(8_999));
    }

    #[test]
    fn age_then_count() {
        let now = Arc::new(AtomicI64::new(10_000));
        let store = MessageStore::with_clock(
            StoreConfig {
                max_duration_ms: 5_000,
                max_records: 2,
            },
            fixed_clock(now),
        );
        for k in [1_000, 6_000, 7_000, 8_000] {
            let _ = store.set(k, "v");
        }
        let keys: Vec<i64> = store.all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![7_000, 8_000]);
    }

    #[test]
    fn default_config_caps_at_one_thousand() {
        let store = MessageStore::new(StoreConfig::default());
        for k in 0..1_005 {
            let _ = store.set(k, k);
        }
        assert_eq!(store.len(), 1000);
        assert_eq!(store.oldest(), 5);
        assert_eq!(store.newest(), 1_004);
    }

    #[test]
    fn concurrent_writers_respect_bound() {
        let store = Arc::new(MessageStore::new(StoreConfig {
            max_duration_ms: 0,
            max_records: 50,
        }));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let _ = store.set(t * 1_000 + i, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 50);
    }
}

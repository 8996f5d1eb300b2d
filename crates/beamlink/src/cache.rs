use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    insertion_order: VecDeque<String>,
}

/// String-keyed cache with a capacity bound and per-entry expiry.
///
/// The oldest inserted entry is evicted when the cache is full; expired
/// entries are dropped on access.
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_size: usize,
    ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            max_size,
            ttl,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(&key).is_some() {
            inner.insertion_order.retain(|k| k != &key);
        }
        while inner.entries.len() >= self.max_size {
            match inner.insertion_order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.insertion_order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            inner.insertion_order.retain(|k| k != key);
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.insertion_order.clear();
    }
}

//! Bounded, TTL-expiring cache from `(text, model_id)` to an embedding vector.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

const CAPACITY: usize = 10_000;
const TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct Entry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<u64, Entry>,
    order: VecDeque<u64>,
}

/// Process-lifetime cache of embedding vectors keyed by a hash of `text:model_id`.
///
/// Guarded with a [`parking_lot::Mutex`] rather than a `tokio` lock: lookups and
/// insertions never cross an `.await` point, so there is nothing for an async
/// runtime to gain by yielding here.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.lock().entries.len();
        f.debug_struct("EmbeddingCache")
            .field("len", &len)
            .finish_non_exhaustive()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn key(text: &str, model_id: &str) -> u64 {
        xxh3_64(format!("{text}:{model_id}").as_bytes())
    }

    /// Returns the cached vector for `text`/`model_id`, if present and unexpired.
    #[must_use]
    pub fn get(&self, text: &str, model_id: &str) -> Option<Vec<f32>> {
        let key = Self::key(text, model_id);
        let inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        if entry.inserted_at.elapsed() > TTL {
            return None;
        }
        Some(entry.vector.clone())
    }

    /// Inserts a vector, evicting the oldest entry if the cache is at capacity.
    pub fn put(&self, text: &str, model_id: &str, vector: Vec<f32>) {
        let key = Self::key(text, model_id);
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= CAPACITY {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }

        if inner
            .entries
            .insert(
                key,
                Entry {
                    vector,
                    inserted_at: Instant::now(),
                },
            )
            .is_none()
        {
            inner.order.push_back(key);
        }
    }

    /// Drops every entry older than the TTL.
    pub fn prune_expired(&self) {
        let mut inner = self.inner.lock();
        let expired: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > TTL)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            inner.entries.remove(&key);
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
        }
    }

    /// Empties the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Returns the number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = EmbeddingCache::new();
        cache.put("hello", "model-a", vec![1.0, 2.0]);
        assert_eq!(cache.get("hello", "model-a"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn distinguishes_by_model_id() {
        let cache = EmbeddingCache::new();
        cache.put("hello", "model-a", vec![1.0]);
        assert_eq!(cache.get("hello", "model-b"), None);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = EmbeddingCache::new();
        cache.put("hello", "model-a", vec![1.0]);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_never_exceeds_capacity() {
        let cache = EmbeddingCache::new();
        for i in 0..(CAPACITY + 10) {
            cache.put(&format!("text-{i}"), "model-a", vec![i as f32]);
        }
        assert_eq!(cache.len(), CAPACITY);
    }

    #[test]
    fn eviction_drops_oldest_first() {
        let cache = EmbeddingCache::new();
        for i in 0..(CAPACITY + 1) {
            cache.put(&format!("text-{i}"), "model-a", vec![i as f32]);
        }
        assert_eq!(cache.get("text-0", "model-a"), None);
        assert_eq!(
            cache.get(&format!("text-{CAPACITY}"), "model-a"),
            Some(vec![CAPACITY as f32])
        );
    }
}

//! LRU+TTL cache decorator over any `Provider`, keyed by the SHA-256 hex of
//! the input text. Mirrors the teacher's `Mutex<LruCache<String, Embedding>>`
//! query-cache shape, generalized to decorate the whole `Provider` capability
//! set instead of one hardcoded method.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::{Provider, ProviderError};

struct Entry {
    vector: Vec<f32>,
    created_at: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    ttl: Duration,
}

/// Wraps a `Provider` and serves `embed`/`embed_batch` out of a process-local
/// cache when possible, falling through to the inner provider on miss.
pub struct CachingProvider<P: Provider> {
    inner: P,
    cache: Mutex<Inner>,
}

impl<P: Provider> CachingProvider<P> {
    pub fn new(inner: P, max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("max_entries.max(1) is never zero");
        CachingProvider {
            inner,
            cache: Mutex::new(Inner { entries: LruCache::new(capacity), ttl }),
        }
    }

    fn key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let ttl = guard.ttl;
        let hit = guard.entries.get(key).and_then(|entry| {
            if ttl.is_zero() || entry.created_at.elapsed() <= ttl {
                Some(entry.vector.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            guard.entries.pop(key);
        }
        hit
    }

    fn insert(&self, key: String, vector: Vec<f32>) {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        guard.entries.put(key, Entry { vector, created_at: Instant::now() });
    }

    /// Idempotent sweep of expired entries.
    pub fn cleanup(&self) {
        let mut guard = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let ttl = guard.ttl;
        if ttl.is_zero() {
            return;
        }
        let expired: Vec<String> = guard
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            guard.entries.pop(&key);
        }
    }
}

impl<P: Provider> Provider for CachingProvider<P> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.is_empty() {
            return Err(ProviderError::EmptyInput);
        }
        let key = Self::key(text);
        if let Some(vector) = self.lookup(&key) {
            return Ok(vector);
        }
        let vector = self.inner.embed(text)?;
        self.insert(key, vector.clone());
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() || texts.iter().any(|t| t.is_empty()) {
            return Err(ProviderError::EmptyInput);
        }

        let keys: Vec<String> = texts.iter().map(|t| Self::key(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let miss_indices: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> = miss_indices.iter().map(|&i| texts[i].clone()).collect();
            let fetched = self.inner.embed_batch(&miss_texts)?;
            for (j, &i) in miss_indices.iter().enumerate() {
                self.insert(keys[i].clone(), fetched[j].clone());
                results[i] = Some(fetched[j].clone());
            }
        }

        Ok(results.into_iter().map(|v| v.expect("every index was resolved by hit or miss fetch")).collect())
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn ping(&self) -> Result<(), ProviderError> {
        self.inner.ping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        dims: usize,
    }

    impl Provider for CountingProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32; self.dims])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn model(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn ping(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn repeated_embed_hits_cache() {
        let inner = CountingProvider { calls: AtomicUsize::new(0), dims: 2 };
        let cache = CachingProvider::new(inner, 10, Duration::ZERO);
        cache.embed("hello").unwrap();
        cache.embed("hello").unwrap();
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_only_fetches_misses() {
        let inner = CountingProvider { calls: AtomicUsize::new(0), dims: 2 };
        let cache = CachingProvider::new(inner, 10, Duration::ZERO);
        cache.embed("a").unwrap();
        let out = cache.embed_batch(&["a".into(), "b".into()]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ttl_expiry_forces_refetch() {
        let inner = CountingProvider { calls: AtomicUsize::new(0), dims: 1 };
        let cache = CachingProvider::new(inner, 10, Duration::from_millis(1));
        cache.embed("x").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        cache.embed("x").unwrap();
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_text_is_rejected() {
        let inner = CountingProvider { calls: AtomicUsize::new(0), dims: 1 };
        let cache = CachingProvider::new(inner, 10, Duration::ZERO);
        assert!(matches!(cache.embed(""), Err(ProviderError::EmptyInput)));
    }
}

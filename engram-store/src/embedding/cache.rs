//! Embedding cache
//!
//! Wraps any embedder with a DashMap memo of successful results.

use dashmap::DashMap;
use std::time::Duration;

use super::Embedder;
use crate::error::Result;

/// Entries kept before the cache is cleared
const DEFAULT_CAPACITY: usize = 4096;

/// Embedder with caching
pub struct CachingEmbedder<E> {
    inner: E,
    cache: DashMap<String, Vec<f32>>,
    capacity: usize,
}

impl<E: Embedder> CachingEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Clear cache
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl<E: Embedder> Embedder for CachingEmbedder<E> {
    fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        // Check cache first
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached.clone());
        }

        // Failures are not cached
        let embedding = self.inner.embed(text, timeout)?;
        if self.cache.len() >= self.capacity {
            self.cache.clear();
        }
        self.cache.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Embedder for Counting {
        fn embed(&self, text: &str, _timeout: Duration) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::unavailable("down"));
            }
            Ok(vec![text.len() as f32])
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_hits_are_cached() {
        let embedder = CachingEmbedder::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let timeout = Duration::from_secs(1);
        assert_eq!(embedder.embed("abc", timeout).unwrap(), vec![3.0]);
        assert_eq!(embedder.embed("abc", timeout).unwrap(), vec![3.0]);
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.cache_size(), 1);
        assert_eq!(embedder.model(), "counting");
    }

    #[test]
    fn test_failures_not_cached() {
        let embedder = CachingEmbedder::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let timeout = Duration::from_secs(1);
        assert!(embedder.embed("abc", timeout).is_err());
        assert!(embedder.embed("abc", timeout).is_err());
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.cache_size(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let embedder = CachingEmbedder::with_capacity(
            Counting {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            2,
        );
        let timeout = Duration::from_secs(1);
        for text in ["a", "bb", "ccc"] {
            embedder.embed(text, timeout).unwrap();
        }
        assert!(embedder.cache_size() <= 2);
    }
}

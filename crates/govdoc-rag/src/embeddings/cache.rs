//! LRU cache in front of any embedding model.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Result;
use lru::LruCache;
use parking_lot::RwLock;

use super::EmbeddingModel;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum EmbedMode {
    Query,
    Passage,
}

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingModel>,
    cache: Arc<RwLock<LruCache<(EmbedMode, u64), Vec<f32>>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingModel>) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingModel>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    fn key(mode: EmbedMode, text: &str) -> (EmbedMode, u64) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        (mode, hasher.finish())
    }

    fn embed_with_mode(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        let key = Self::key(mode, text);
        if let Some(cached) = self.cache.write().get(&key) {
            return Ok(cached.clone());
        }

        let embedding = match mode {
            EmbedMode::Query => self.inner.embed_query(text)?,
            EmbedMode::Passage => self.inner.embed_document(text)?,
        };
        // Failures are not cached so a recovered model is used on the next call.
        self.cache.write().put(key, embedding.clone());
        Ok(embedding)
    }
}

impl EmbeddingModel for CachedEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_mode(text, EmbedMode::Query)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_mode(text, EmbedMode::Passage)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
    }

    impl EmbeddingModel for CountingModel {
        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "fail" {
                anyhow::bail!("model offline");
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_query(text)
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_repeated_queries_hit_the_cache() {
        let model = Arc::new(CountingModel { calls: AtomicUsize::new(0) });
        let cached = CachedEmbedder::new(model.clone());

        let a = cached.embed_query("principles").unwrap();
        let b = cached.embed_query("principles").unwrap();
        assert_eq!(a, b);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        cached.embed_document("principles").unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_len(), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let model = Arc::new(CountingModel { calls: AtomicUsize::new(0) });
        let cached = CachedEmbedder::with_capacity(model.clone(), 4);
        assert!(cached.embed_query("fail").is_err());
        assert!(cached.embed_query("fail").is_err());
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_len(), 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let model = Arc::new(CountingModel { calls: AtomicUsize::new(0) });
        let cached = CachedEmbedder::with_capacity(model, 2);
        for text in ["a", "bb", "ccc"] {
            cached.embed_query(text).unwrap();
        }
        assert_eq!(cached.cached_len(), 2);
        assert_eq!(cached.dimension(), 2);
    }
}

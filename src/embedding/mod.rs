//! Embedding generation.
//!
//! This module provides:
//! - A trait for pluggable embedding backends
//! - Local (fastembed), remote (HTTP), and hashing backends
//! - A manager with cache-first lookup, bounded retry, and local fallback

pub mod cache;
pub mod hashing;
pub mod local;
pub mod remote;

pub use cache::{CacheStats, EmbeddingCache, hash_bytes, hash_text};
pub use hashing::HashingBackend;
pub use local::FastEmbedBackend;
pub use remote::HttpBackend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{EmbeddingBackendKind, Settings};

/// Errors from embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("failed to initialize embedding model: {0}")]
    Init(String),

    #[error("backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("backend '{backend}' and local fallback exhausted: {message}")]
    Exhausted { backend: String, message: String },
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier; part of the cache key.
    fn id(&self) -> &str;

    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Bounded exponential backoff for backend calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Produces unit-length embeddings with cache-first lookup and fallback.
///
/// The primary backend is retried with exponential backoff; on exhaustion
/// the call falls back to the always-available local backend (when its
/// dimension matches) with a warning. Vectors are cached under the id of
/// the backend that produced them.
pub struct EmbeddingManager {
    primary: Arc<dyn EmbeddingBackend>,
    fallback: Option<Arc<dyn EmbeddingBackend>>,
    cache: Arc<EmbeddingCache>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl EmbeddingManager {
    pub fn new(
        primary: Arc<dyn EmbeddingBackend>,
        fallback: Option<Arc<dyn EmbeddingBackend>>,
        cache: Arc<EmbeddingCache>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        // A fallback with a different dimension would poison the
        // collection's fixed-width segment; drop it up front.
        let fallback = fallback.filter(|f| {
            if f.dimension() == primary.dimension() {
                true
            } else {
                tracing::warn!(
                    target: "embedding",
                    "fallback '{}' ({}d) incompatible with primary '{}' ({}d), disabled",
                    f.id(),
                    f.dimension(),
                    primary.id(),
                    primary.dimension()
                );
                false
            }
        });

        Self {
            primary,
            fallback,
            cache,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the manager from settings, loading models as needed.
    pub async fn from_settings(settings: &Settings) -> Result<Self, EmbeddingError> {
        let cfg = &settings.embedding;
        let cache = Arc::new(EmbeddingCache::new(cfg.cache_entries));
        let retry = RetryPolicy {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.retry_base_ms),
        };

        let (primary, fallback): (Arc<dyn EmbeddingBackend>, Option<Arc<dyn EmbeddingBackend>>) =
            match cfg.backend {
                EmbeddingBackendKind::Local => {
                    let backend: Arc<dyn EmbeddingBackend> =
                        Arc::new(FastEmbedBackend::load(&cfg.model, settings.models_dir()).await?);
                    (backend, None)
                }
                EmbeddingBackendKind::Hashing => {
                    let backend: Arc<dyn EmbeddingBackend> = Arc::new(HashingBackend::default());
                    (backend, None)
                }
                EmbeddingBackendKind::Remote => {
                    let url = cfg.remote_url.as_deref().ok_or_else(|| {
                        EmbeddingError::Init("remote backend requires embedding.remote_url".into())
                    })?;
                    let model = cfg.remote_model.as_deref().ok_or_else(|| {
                        EmbeddingError::Init("remote backend requires embedding.remote_model".into())
                    })?;
                    let dimension = cfg.remote_dimension.ok_or_else(|| {
                        EmbeddingError::Init(
                            "remote backend requires embedding.remote_dimension".into(),
                        )
                    })?;
                    let primary: Arc<dyn EmbeddingBackend> =
                        Arc::new(HttpBackend::new(url, model, dimension)?);

                    // The local model backs up the remote endpoint. A load
                    // failure only costs the fallback, not the service.
                    let fallback: Option<Arc<dyn EmbeddingBackend>> =
                        match FastEmbedBackend::load(&cfg.model, settings.models_dir()).await {
                            Ok(local) => Some(Arc::new(local)),
                            Err(e) => {
                                tracing::warn!(
                                    target: "embedding",
                                    "local fallback unavailable: {e}"
                                );
                                None
                            }
                        };
                    (primary, fallback)
                }
            };

        Ok(Self::new(primary, fallback, cache, retry, cfg.batch_size))
    }

    /// Id of the primary backend; recorded on collections.
    pub fn model_id(&self) -> &str {
        self.primary.id()
    }

    pub fn dimension(&self) -> usize {
        self.primary.dimension()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed one text into a unit vector.
    pub async fn embed(&self, text: &str) -> Result<Arc<[f32]>, EmbeddingError> {
        let input = [text.to_string()];
        let mut vectors = self.embed_batch(&input).await?;
        Ok(vectors.remove(0))
    }

    /// Embed a batch, partitioning into cached and uncached texts before
    /// touching the backend. Identical texts embed once.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Arc<[f32]>>, EmbeddingError> {
        let model = self.primary.id().to_string();
        let mut resolved: Vec<Option<Arc<[f32]>>> = vec![None; texts.len()];

        let mut pending_texts: Vec<String> = Vec::new();
        let mut pending_hashes: Vec<String> = Vec::new();
        let mut pending_indices: Vec<Vec<usize>> = Vec::new();
        let mut slot_by_hash: HashMap<String, usize> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            let hash = hash_text(text);
            if let Some(vector) = self.cache.get(&model, &hash) {
                resolved[i] = Some(vector);
                continue;
            }
            match slot_by_hash.get(&hash) {
                Some(&slot) => pending_indices[slot].push(i),
                None => {
                    slot_by_hash.insert(hash.clone(), pending_texts.len());
                    pending_indices.push(vec![i]);
                    pending_hashes.push(hash);
                    pending_texts.push(text.clone());
                }
            }
        }

        if !pending_texts.is_empty() {
            let (vectors, produced_by) = self.call_with_fallback(&pending_texts).await?;
            if vectors.len() != pending_texts.len() {
                return Err(EmbeddingError::Backend {
                    backend: produced_by,
                    message: format!(
                        "expected {} vectors, got {}",
                        pending_texts.len(),
                        vectors.len()
                    ),
                });
            }

            for ((mut vector, hash), indices) in vectors
                .into_iter()
                .zip(pending_hashes.iter())
                .zip(pending_indices.iter())
            {
                normalize_in_place(&mut vector);
                self.cache.insert(&produced_by, hash, vector.clone());
                let shared: Arc<[f32]> = vector.into();
                for &i in indices {
                    resolved[i] = Some(shared.clone());
                }
            }
        }

        Ok(resolved
            .into_iter()
            .map(|v| v.expect("every input resolved from cache or backend"))
            .collect())
    }

    async fn call_with_fallback(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, String), EmbeddingError> {
        match self.call_with_retry(self.primary.as_ref(), texts).await {
            Ok(vectors) => Ok((vectors, self.primary.id().to_string())),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };

                tracing::warn!(
                    target: "embedding",
                    "backend '{}' exhausted retries ({primary_err}), falling back to '{}'",
                    self.primary.id(),
                    fallback.id()
                );

                match self.call_with_retry(fallback.as_ref(), texts).await {
                    Ok(vectors) => Ok((vectors, fallback.id().to_string())),
                    Err(fallback_err) => Err(EmbeddingError::Exhausted {
                        backend: self.primary.id().to_string(),
                        message: format!("primary: {primary_err}; fallback: {fallback_err}"),
                    }),
                }
            }
        }
    }

    async fn call_with_retry(
        &self,
        backend: &dyn EmbeddingBackend,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let mut attempt = 0u32;
            let batch_vectors = loop {
                match backend.embed(batch).await {
                    Ok(v) => break v,
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.retry.max_retries {
                            return Err(e);
                        }
                        let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                        tracing::debug!(
                            target: "embedding",
                            "backend '{}' attempt {attempt} failed ({e}), retrying in {delay:?}",
                            backend.id()
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            };
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend failing a configurable number of times before succeeding.
    struct FlakyBackend {
        inner: HashingBackend,
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                inner: HashingBackend::default(),
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        fn id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(EmbeddingError::Backend {
                    backend: "flaky".to_string(),
                    message: "transient".to_string(),
                });
            }
            self.inner.embed(texts).await
        }
    }

    /// Backend that always fails.
    struct DeadBackend {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for DeadBackend {
        fn id(&self) -> &str {
            "dead"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Backend {
                backend: "dead".to_string(),
                message: "unreachable".to_string(),
            })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        }
    }

    fn manager_with(
        primary: Arc<dyn EmbeddingBackend>,
        fallback: Option<Arc<dyn EmbeddingBackend>>,
    ) -> EmbeddingManager {
        EmbeddingManager::new(
            primary,
            fallback,
            Arc::new(EmbeddingCache::new(128)),
            fast_retry(),
            32,
        )
    }

    #[tokio::test]
    async fn test_embed_returns_unit_vector() {
        let manager = manager_with(Arc::new(HashingBackend::default()), None);
        let vector = manager.embed("some text to embed").await.unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let manager = manager_with(Arc::new(HashingBackend::default()), None);

        let first = manager.embed("cached text").await.unwrap();
        let stats_before = manager.cache().stats();
        let second = manager.embed("cached text").await.unwrap();
        let stats_after = manager.cache().stats();

        assert_eq!(&*first, &*second);
        assert_eq!(stats_after.hits, stats_before.hits + 1);
        assert_eq!(stats_after.misses, stats_before.misses);
    }

    #[tokio::test]
    async fn test_batch_partitions_cached_uncached() {
        let manager = manager_with(Arc::new(HashingBackend::default()), None);

        manager.embed("already cached").await.unwrap();
        let vectors = manager
            .embed_batch(&[
                "already cached".to_string(),
                "fresh text".to_string(),
                "fresh text".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        // Identical inputs share one vector.
        assert_eq!(&*vectors[1], &*vectors[2]);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let flaky = Arc::new(FlakyBackend::new(1));
        let manager = manager_with(flaky.clone(), None);

        let result = manager.embed("eventually works").await;
        assert!(result.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_dead() {
        let dead = Arc::new(DeadBackend {
            dimension: hashing::DEFAULT_DIMENSION,
        });
        let manager = manager_with(dead, Some(Arc::new(HashingBackend::default())));

        let vector = manager.embed("fallback please").await.unwrap();
        assert_eq!(vector.len(), hashing::DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_exhausted_when_both_fail() {
        let manager = manager_with(
            Arc::new(DeadBackend { dimension: 256 }),
            Some(Arc::new(DeadBackend { dimension: 256 })),
        );

        let err = manager.embed("no luck").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_mismatched_fallback_dropped() {
        let manager = manager_with(
            Arc::new(DeadBackend { dimension: 128 }),
            Some(Arc::new(HashingBackend::default())), // 256d, incompatible
        );

        // Without a usable fallback the primary error surfaces directly.
        let err = manager.embed("mismatch").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Backend { .. }));
    }
}

//! Deterministic feature-hashed embeddings.
//!
//! Maps bag-of-words token counts into a fixed-dimension vector with a
//! signed hashing trick. No model download, no network, and identical text
//! always produces identical vectors, which makes this the offline default
//! for tests and the fallback of last resort.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{EmbeddingBackend, EmbeddingError};

/// Default dimension for hashed vectors.
pub const DEFAULT_DIMENSION: usize = 256;

/// Feature-hashing embedding backend.
#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimension: usize,
}

impl HashingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let digest = hasher.finish();

            let index = (digest % self.dimension as u64) as usize;
            // A second hash bit supplies the sign, keeping unrelated token
            // sets close to orthogonal.
            let sign = if (digest >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        vector
    }
}

impl Default for HashingBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn id(&self) -> &str {
        "hashing-v1"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_text_identical_vector() {
        let backend = HashingBackend::default();
        let a = backend.embed(&["same text".to_string()]).await.unwrap();
        let b = backend.embed(&["same text".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_tokens_raise_similarity() {
        let backend = HashingBackend::default();
        let vectors = backend
            .embed(&[
                "token based authentication with signed claims".to_string(),
                "authentication flows and session tokens".to_string(),
                "boiling pasta in salted water".to_string(),
            ])
            .await
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 {
            a.iter().zip(b).map(|(x, y)| x * y).sum()
        };
        let norm = |v: &[f32]| -> f32 { dot(v, v).sqrt() };
        let cosine =
            |a: &[f32], b: &[f32]| -> f32 { dot(a, b) / (norm(a) * norm(b)) };

        let auth_pair = cosine(&vectors[0], &vectors[1]);
        let unrelated = cosine(&vectors[0], &vectors[2]);
        assert!(auth_pair > unrelated);
    }

    #[tokio::test]
    async fn test_dimension_fixed() {
        let backend = HashingBackend::new(64);
        let vectors = backend.embed(&["anything".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 64);
    }
}

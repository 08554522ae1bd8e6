//! Feature-hashing embedder.

use super::Embedder;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed to one dimension with a hash-derived sign,
/// and the vector is L2-normalized. Texts sharing words get a positive cosine
/// similarity; unrelated texts land near zero.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default embedding dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Limits word iteration on very long texts.
    const MAX_WORDS: usize = 1000;

    /// Creates an embedder with the given dimensions (at least 1).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .take(Self::MAX_WORDS);
        for word in words {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let idx = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq > 0.0 {
            let inv_norm = norm_sq.sqrt().recip();
            for v in &mut embedding {
                *v *= inv_norm;
            }
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Kotlin coroutines").await.unwrap();
        let b = embedder.embed("kotlin COROUTINES").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashEmbedder::DEFAULT_DIMENSIONS);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_words_are_similar() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("kotlin").await.unwrap();
        let related = embedder.embed("I write kotlin daily").await.unwrap();
        assert!(cosine_similarity(&query, &related) > 0.3);
    }

    #[tokio::test]
    async fn test_empty_text_fails() {
        let embedder = HashEmbedder::default();
        assert!(embedder.embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let embedder = HashEmbedder::new(16);
        let batch = embedder.embed_batch(&["a b", "c"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(embedder.dimensions(), 16);
    }
}

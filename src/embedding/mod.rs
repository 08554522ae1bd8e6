//! Embedding generation.
//!
//! The engine only needs an [`Embedder`] that maps text to a fixed-size
//! vector. [`HashEmbedder`] is a deterministic, model-free implementation for
//! tests and offline use.

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

mod hashing;

pub use hashing::HashEmbedder;

use crate::Result;
use async_trait::async_trait;

/// Trait for embedding generators.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts, in order.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for empty or mismatched vectors and for zero-norm input.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

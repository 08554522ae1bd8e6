//! Message index trait.
//!
//! The index is a derived view of conversation messages that supports
//! full-text and vector retrieval. The vector memory synchronizer keeps it
//! consistent with threads; the hybrid search engine reads from it.
//!
//! | Operation | Ordering | Score |
//! |-----------|----------|-------|
//! | `fulltext` | Best BM25 first | Negated FTS5 `bm25()`, unbounded |
//! | `nearest` | Most similar first | Cosine similarity |
//! | `recent` | Newest first | None |

use crate::Result;
use crate::models::{IndexedMessage, MessageId, SearchFilter, TenantId, ThreadId};
use async_trait::async_trait;

/// A scored index document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// The matched document.
    pub doc: IndexedMessage,
    /// Raw backend score; higher is better.
    pub score: f32,
}

/// Trait for message index backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn MessageIndex>`
/// - `fulltext` ORs plain terms; double-quoted phrases are required
/// - `delete` of an absent id returns `Ok(false)`
/// - Apply `filter` before truncating to `limit`
#[async_trait]
pub trait MessageIndex: Send + Sync {
    /// Whether the backend can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }

    /// Adds or replaces a document and its embedding.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn upsert(&self, doc: IndexedMessage, embedding: Option<Vec<f32>>) -> Result<()>;

    /// Removes a document. Returns `false` if it was not indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn delete(&self, tenant: &TenantId, id: &MessageId) -> Result<bool>;

    /// Ids of every document indexed for a thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn indexed_ids(&self, tenant: &TenantId, thread: &ThreadId) -> Result<Vec<MessageId>>;

    /// BM25 full-text search.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    async fn fulltext(
        &self,
        tenant: &TenantId,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>>;

    /// Cosine nearest-neighbour search over stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    async fn nearest(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>>;

    /// Most recent documents matching the filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn recent(
        &self,
        tenant: &TenantId,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexedMessage>>;
}

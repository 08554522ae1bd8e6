//! # Gromozeka Memory
//!
//! Knowledge-graph memory engine for a personal AI assistant.
//!
//! The engine turns conversation text into a temporal knowledge graph and
//! serves retrieval over past messages:
//!
//! - a bi-temporal fact store with merge-on-write entities and relationships
//! - an entity resolution pipeline (exact, fuzzy, then one batched LLM pass)
//! - a hybrid keyword + semantic message search with weighted score fusion
//! - a vector memory synchronizer that mirrors threads into the search index
//!
//! Storage engines, the LLM and the embedding model are collaborators behind
//! async traits; in-memory and `SQLite` implementations ship with the crate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gromozeka_memory::{KnowledgeService, TenantId};
//!
//! let report = knowledge.ingest(&TenantId::new("default"), text, context).await?;
//! for (index, id) in &report.resolution.mapping {
//!     println!("mention {index} -> {id}");
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;
use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{MemoryConfig, ResolutionConfig, SearchConfig, VectorMemoryConfig};
pub use embedding::Embedder;
pub use llm::LlmProvider;
pub use models::{
    Entity, EntityId, Relationship, RelationshipId, SearchCriteria, SearchMode, SearchPage,
    SearchResult, TemporalFilter, TenantId,
};
pub use services::{
    EntityResolver, FactStore, HybridSearchService, KnowledgeService, MentionExtractor,
    VectorMemorySync,
};
pub use storage::{ConversationRepository, GraphStore, MessageIndex};

/// Error type for memory engine operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Invalid search criteria, temporal invariant violations, missing edge endpoints |
/// | `OperationFailed` | Store, index, or LLM calls fail |
/// | `Timeout` | An external call exceeds its time budget |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Search criteria fail validation (blank semantic query, limit out of range)
    /// - A relationship has `valid_at` after `invalid_at`
    /// - A relationship references an entity that does not exist
    /// - A non-detached hard delete hits an entity that still has relationships
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail
    /// - A lock is poisoned
    /// - The LLM or embedding provider returns an error
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An external call did not complete in time.
    #[error("operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The budget that was exceeded.
        after: Duration,
    },
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from anything displayable.
    pub fn failed(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for memory engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("limit must be between 1 and 100".to_string());
        assert_eq!(
            err.to_string(),
            "invalid input: limit must be between 1 and 100"
        );

        let err = Error::failed("merge_entity", "disk full");
        assert_eq!(err.to_string(), "operation 'merge_entity' failed: disk full");

        let err = Error::Timeout {
            operation: "llm_resolution".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "operation 'llm_resolution' timed out after 30s"
        );
    }
}

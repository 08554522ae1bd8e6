//! Data models for the memory engine.
//!
//! This module contains the core data structures shared by the stores and
//! services: graph entities and relationships, conversation messages,
//! resolution results, keyword queries and search criteria.

/// Declares an opaque string identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

mod conversation;
pub mod graph;
pub mod query;
pub mod resolution;
mod search;
pub mod temporal;

pub use conversation::{
    ContentItem, Conversation, ConversationId, IndexedMessage, Message, MessageId, MessageRole,
    ProjectId, Thread, ThreadId,
};
pub use graph::{
    DeletionReport, Entity, EntityDraft, EntityId, InvalidateOutcome, MAX_SUMMARY_CHARS,
    Relationship, RelationshipDraft, RelationshipId, RelationshipQuery, TenantId,
    truncate_summary,
};
pub use query::{KeywordQuery, TokenSpan, token_spans, tokenize};
pub use resolution::{
    DedupMatch, EntityType, EntityTypeCatalog, ExtractedFact, ExtractedMention, Extraction,
    MatchType, Resolution,
};
pub use search::{
    Highlight, ResultMatchType, SearchCriteria, SearchFilter, SearchMode, SearchPage,
    SearchResult, MAX_PAGE_LIMIT,
};
pub use temporal::{ALWAYS_VALID_FROM, STILL_VALID, TemporalFilter, ValidityInterval};

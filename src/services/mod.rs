//! Business logic services.
//!
//! Services orchestrate the storage backends and the LLM and embedding
//! collaborators:
//!
//! | Service | Role |
//! |---------|------|
//! | [`FactStore`] | Validated writes and temporal reads over the graph |
//! | [`MentionExtractor`] | Entities and facts from free text |
//! | [`EntityResolver`] | Exact, fuzzy, then LLM deduplication of mentions |
//! | [`KnowledgeService`] | Extract, resolve and write in one ingest call |
//! | [`HybridSearchService`] | Keyword, semantic and hybrid message search |
//! | [`VectorMemorySync`] | Mirrors thread messages into the message index |

mod extraction;
mod fact_store;
pub mod fusion;
mod knowledge;
mod resolution;
mod search;
mod vector_memory;

pub use extraction::{MentionExtractor, normalize_relation_type};
pub use fact_store::FactStore;
pub use knowledge::{IngestReport, KnowledgeService};
pub use resolution::{
    EntityResolver, RejectedEntry, ResolutionDecision, ResolutionList, ResolutionParseError,
    parse_resolution_response,
};
pub use search::{HybridSearchService, highlights};
pub use vector_memory::{SyncReport, VectorMemorySync};

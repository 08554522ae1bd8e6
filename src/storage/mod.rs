//! Storage layer abstraction.
//!
//! The memory engine talks to three collaborators through traits:
//! - **Graph**: entities and relationships ([`GraphStore`]; `SQLite` or in-memory)
//! - **Index**: keyword and vector retrieval over messages ([`MessageIndex`])
//! - **Conversations**: the authoritative message store ([`ConversationRepository`])
//!
//! Every trait is `async`, `Send + Sync`, and shared as `Arc<dyn ...>`.

// Allow significant_drop_tightening - guards are dropped at the end of short scopes.
#![allow(clippy::significant_drop_tightening)]
// Allow manual_let_else for clearer error handling in some contexts.
#![allow(clippy::manual_let_else)]

pub mod conversation;
pub mod graph;
pub mod index;
pub mod traits;

pub use conversation::InMemoryConversationRepository;
pub use graph::{InMemoryGraphStore, SqliteGraphStore};
pub use index::SqliteMessageIndex;
pub use traits::{ConversationRepository, GraphStore, IndexHit, MessageIndex};

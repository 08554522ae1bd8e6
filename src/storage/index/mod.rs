//! Message index implementations.
//!
//! | Backend | Keyword | Vector |
//! |---------|---------|--------|
//! | [`SqliteMessageIndex`] | FTS5 `bm25()` | Cosine scan over stored embeddings |

mod sqlite;

pub use sqlite::SqliteMessageIndex;

// Re-export trait for convenience
pub use crate::storage::traits::{IndexHit, MessageIndex};

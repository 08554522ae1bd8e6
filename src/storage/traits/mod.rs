//! Storage backend traits.

mod conversation;
pub mod graph;
mod index;

pub use conversation::ConversationRepository;
pub use graph::GraphStore;
pub use index::{IndexHit, MessageIndex};

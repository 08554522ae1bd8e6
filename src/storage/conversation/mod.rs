//! Conversation repository implementations.

mod memory;

pub use memory::InMemoryConversationRepository;

// Re-export trait for convenience
pub use crate::storage::traits::ConversationRepository;

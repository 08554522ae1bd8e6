//! Conversation repository trait.
//!
//! Read-only access to the relational store holding conversations, threads
//! and messages. Batch lookups take id slices to avoid N+1 queries; ids that
//! no longer exist are skipped.

use crate::Result;
use crate::models::{Conversation, ConversationId, Message, MessageId, Thread, ThreadId};
use async_trait::async_trait;

/// Trait for conversation storage.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Messages of a thread in creation order. Unknown threads yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn thread_messages(&self, thread: &ThreadId) -> Result<Vec<Message>>;

    /// Messages by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn messages(&self, ids: &[MessageId]) -> Result<Vec<Message>>;

    /// Threads by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn threads(&self, ids: &[ThreadId]) -> Result<Vec<Thread>>;

    /// Conversations by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn conversations(&self, ids: &[ConversationId]) -> Result<Vec<Conversation>>;
}

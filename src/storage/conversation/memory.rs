//! In-memory conversation repository.

use crate::models::{Conversation, ConversationId, Message, MessageId, Thread, ThreadId};
use crate::storage::traits::ConversationRepository;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Conversations {
    conversations: HashMap<ConversationId, Conversation>,
    threads: HashMap<ThreadId, Thread>,
    messages: HashMap<MessageId, Message>,
}

/// In-memory conversation repository.
///
/// Holds conversations, threads and messages keyed by id. Thread messages are
/// returned in creation order.
#[derive(Debug, Default)]
pub struct InMemoryConversationRepository {
    inner: RwLock<Conversations>,
}

impl InMemoryConversationRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put_conversation(&self, conversation: Conversation) -> Result<()> {
        self.write()?
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    /// Inserts or replaces a thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put_thread(&self, thread: Thread) -> Result<()> {
        self.write()?.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    /// Inserts or replaces a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put_message(&self, message: Message) -> Result<()> {
        self.write()?.messages.insert(message.id.clone(), message);
        Ok(())
    }

    /// Removes a message, returning it if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.write()?.messages.remove(id))
    }

    /// Removes a thread and its messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove_thread(&self, id: &ThreadId) -> Result<()> {
        let mut inner = self.write()?;
        inner.threads.remove(id);
        inner.messages.retain(|_, m| &m.thread_id != id);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Conversations>> {
        self.inner.read().map_err(|e| Error::OperationFailed {
            operation: "conversation_read".to_string(),
            cause: format!("Lock poisoned: {e}"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Conversations>> {
        self.inner.write().map_err(|e| Error::OperationFailed {
            operation: "conversation_write".to_string(),
            cause: format!("Lock poisoned: {e}"),
        })
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn thread_messages(&self, thread: &ThreadId) -> Result<Vec<Message>> {
        let inner = self.read()?;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| &m.thread_id == thread)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn messages(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(ids.iter().filter_map(|id| inner.messages.get(id).cloned()).collect())
    }

    async fn threads(&self, ids: &[ThreadId]) -> Result<Vec<Thread>> {
        let inner = self.read()?;
        Ok(ids.iter().filter_map(|id| inner.threads.get(id).cloned()).collect())
    }

    async fn conversations(&self, ids: &[ConversationId]) -> Result<Vec<Conversation>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.conversations.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentItem, MessageRole};
    use chrono::{Duration, Utc};

    fn message(id: &str, thread: &str, offset: i64) -> Message {
        Message {
            id: MessageId::new(id),
            thread_id: ThreadId::new(thread),
            conversation_id: ConversationId::new("c1"),
            role: MessageRole::User,
            content: vec![ContentItem::text(id)],
            created_at: Utc::now() + Duration::seconds(offset),
        }
    }

    #[tokio::test]
    async fn test_thread_messages_in_creation_order() {
        let repo = InMemoryConversationRepository::new();
        repo.put_message(message("late", "t1", 10)).unwrap();
        repo.put_message(message("early", "t1", 0)).unwrap();
        repo.put_message(message("other", "t2", 5)).unwrap();

        let ids: Vec<String> = repo
            .thread_messages(&ThreadId::new("t1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_batched_lookup_skips_missing() {
        let repo = InMemoryConversationRepository::new();
        repo.put_message(message("m1", "t1", 0)).unwrap();
        let found = repo
            .messages(&[MessageId::new("m1"), MessageId::new("gone")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        repo.remove_thread(&ThreadId::new("t1")).unwrap();
        assert!(repo.messages(&[MessageId::new("m1")]).await.unwrap().is_empty());
    }
}

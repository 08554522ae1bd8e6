//! Vector memory synchronization.
//!
//! Keeps the message index consistent with the messages of a thread. Only
//! user and assistant messages with plain, non-blank text are indexed; tool
//! calls, tool results and reasoning stay out of memory.
//!
//! Synchronization is incremental: the thread's current eligible ids are
//! diffed against the ids already indexed, so only new messages are embedded
//! and only vanished ones are deleted.

use crate::config::VectorMemoryConfig;
use crate::embedding::Embedder;
use crate::models::{IndexedMessage, Message, MessageId, MessageRole, ProjectId, TenantId, ThreadId};
use crate::storage::{ConversationRepository, MessageIndex};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Outcome of a synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Messages embedded and added to the index.
    pub added: usize,
    /// Messages removed from the index.
    pub removed: usize,
    /// Messages that could not be embedded or written.
    pub failed: usize,
    /// Whether the pass was skipped (disabled or index unavailable).
    pub skipped: bool,
}

impl SyncReport {
    /// A report for a pass that did nothing.
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            added: 0,
            removed: 0,
            failed: 0,
            skipped: true,
        }
    }

    /// Whether the pass changed the index.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Synchronizes thread messages into the message index.
pub struct VectorMemorySync {
    conversations: Arc<dyn ConversationRepository>,
    index: Arc<dyn MessageIndex>,
    embedder: Arc<dyn Embedder>,
    config: VectorMemoryConfig,
}

impl VectorMemorySync {
    /// Creates a synchronizer.
    #[must_use]
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        index: Arc<dyn MessageIndex>,
        embedder: Arc<dyn Embedder>,
        config: VectorMemoryConfig,
    ) -> Self {
        Self {
            conversations,
            index,
            embedder,
            config,
        }
    }

    fn inactive(&self) -> bool {
        if !self.config.enabled {
            tracing::debug!("Vector memory disabled, skipping");
            return true;
        }
        if !self.index.is_available() {
            tracing::debug!("Message index unavailable, skipping");
            return true;
        }
        false
    }

    /// Brings the index in line with the current messages of a thread.
    ///
    /// `project_id` is stored on indexed documents for project filtering.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread's messages or indexed ids cannot be
    /// read, or if a vanished message cannot be deleted. Embedding failures
    /// are counted in [`SyncReport::failed`] instead.
    #[instrument(skip_all, fields(tenant = %tenant, thread = %thread))]
    pub async fn remember_thread(
        &self,
        tenant: &TenantId,
        thread: &ThreadId,
        project_id: Option<&ProjectId>,
    ) -> Result<SyncReport> {
        if self.inactive() {
            return Ok(SyncReport::skipped());
        }

        let messages = self.conversations.thread_messages(thread).await?;
        let eligible: Vec<&Message> = messages.iter().filter(|m| is_eligible(m)).collect();
        let indexed = self.index.indexed_ids(tenant, thread).await?;

        let current: HashSet<&MessageId> = eligible.iter().map(|m| &m.id).collect();
        let known: HashSet<&MessageId> = indexed.iter().collect();

        let mut report = SyncReport::default();

        for message in eligible.iter().filter(|m| !known.contains(&m.id)) {
            let doc = IndexedMessage::from_message(tenant.clone(), message, project_id.cloned());
            let embedding = match self.embedder.embed(&doc.text).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(message = %message.id, error = %e, "Failed to embed message");
                    report.failed += 1;
                    continue;
                },
            };
            match self.index.upsert(doc, Some(embedding)).await {
                Ok(()) => report.added += 1,
                Err(e) => {
                    tracing::warn!(message = %message.id, error = %e, "Failed to index message");
                    report.failed += 1;
                },
            }
        }

        for id in indexed.iter().filter(|id| !current.contains(id)) {
            if self.index.delete(tenant, id).await? {
                report.removed += 1;
            }
        }

        record(&report, "remember_thread");
        tracing::debug!(
            added = report.added,
            removed = report.removed,
            failed = report.failed,
            "Thread synchronized"
        );
        Ok(report)
    }

    /// Removes one message from the index. Removing an absent message is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the index delete fails.
    #[instrument(skip_all, fields(tenant = %tenant, message = %id))]
    pub async fn forget_message(&self, tenant: &TenantId, id: &MessageId) -> Result<SyncReport> {
        if self.inactive() {
            return Ok(SyncReport::skipped());
        }
        let removed = usize::from(self.index.delete(tenant, id).await?);
        let report = SyncReport {
            removed,
            ..SyncReport::default()
        };
        record(&report, "forget_message");
        Ok(report)
    }

    /// Removes every indexed message of a thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the indexed ids cannot be read or a delete fails.
    #[instrument(skip_all, fields(tenant = %tenant, thread = %thread))]
    pub async fn forget_thread(&self, tenant: &TenantId, thread: &ThreadId) -> Result<SyncReport> {
        if self.inactive() {
            return Ok(SyncReport::skipped());
        }
        let mut report = SyncReport::default();
        for id in self.index.indexed_ids(tenant, thread).await? {
            if self.index.delete(tenant, &id).await? {
                report.removed += 1;
            }
        }
        record(&report, "forget_thread");
        Ok(report)
    }
}

/// User and assistant messages with plain, non-blank text.
fn is_eligible(message: &Message) -> bool {
    matches!(message.role, MessageRole::User | MessageRole::Assistant)
        && !message.has_non_text_content()
        && !message.text().trim().is_empty()
}

fn record(report: &SyncReport, operation: &'static str) {
    for (outcome, count) in [
        ("added", report.added),
        ("removed", report.removed),
        ("failed", report.failed),
    ] {
        if count > 0 {
            metrics::counter!(
                "memory_sync_total",
                "operation" => operation,
                "outcome" => outcome
            )
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
        }
    }
}

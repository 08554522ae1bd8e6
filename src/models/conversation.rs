//! Conversation types: conversations, threads and messages.
//!
//! A conversation owns threads; a thread is an ordered list of messages. A
//! message carries structured content blocks, only some of which are plain
//! text worth remembering.

use super::graph::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_id!(
    /// Unique identifier for a message.
    MessageId
);

string_id!(
    /// Unique identifier for a thread.
    ThreadId
);

string_id!(
    /// Unique identifier for a conversation.
    ConversationId
);

string_id!(
    /// Unique identifier for a project grouping conversations.
    ProjectId
);

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human user.
    User,
    /// The assistant.
    Assistant,
    /// System instructions.
    System,
    /// Tool output.
    Tool,
}

impl MessageRole {
    /// Returns the role as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Parses a role from its string form, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation.
    ToolCall {
        /// Tool name.
        name: String,
        /// Raw arguments.
        arguments: serde_json::Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Tool name.
        name: String,
        /// Raw output.
        output: String,
    },
    /// Model reasoning.
    Thinking {
        /// Reasoning text.
        text: String,
    },
}

impl ContentItem {
    /// Creates a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author role.
    pub role: MessageRole,
    /// Content blocks in order.
    pub content: Vec<ContentItem>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Concatenates the text blocks, separated by blank lines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether the message contains tool calls, tool results or reasoning.
    #[must_use]
    pub fn has_non_text_content(&self) -> bool {
        self.content
            .iter()
            .any(|item| !matches!(item, ContentItem::Text { .. }))
    }
}

/// A thread of messages within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identifier.
    pub id: ThreadId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Optional title.
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning project, if any.
    pub project_id: Option<ProjectId>,
    /// Title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A message as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Owning project, if any.
    pub project_id: Option<ProjectId>,
    /// Author role.
    pub role: MessageRole,
    /// Indexed text.
    pub text: String,
    /// Message creation time.
    pub created_at: DateTime<Utc>,
}

impl IndexedMessage {
    /// Builds an index document from a message and its project.
    #[must_use]
    pub fn from_message(tenant: TenantId, message: &Message, project_id: Option<ProjectId>) -> Self {
        Self {
            id: message.id.clone(),
            tenant,
            thread_id: message.thread_id.clone(),
            conversation_id: message.conversation_id.clone(),
            project_id,
            role: message.role,
            text: message.text(),
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: Vec<ContentItem>) -> Message {
        Message {
            id: MessageId::new("m1"),
            thread_id: ThreadId::new("t1"),
            conversation_id: ConversationId::new("c1"),
            role: MessageRole::Assistant,
            content,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_text_joins_text_blocks_only() {
        let msg = message(vec![
            ContentItem::text("first"),
            ContentItem::Thinking {
                text: "hidden".to_string(),
            },
            ContentItem::text("second"),
        ]);
        assert_eq!(msg.text(), "first\n\nsecond");
        assert!(msg.has_non_text_content());
    }

    #[test]
    fn test_plain_text_message() {
        let msg = message(vec![ContentItem::text("hello")]);
        assert!(!msg.has_non_text_content());
    }

    #[test]
    fn test_content_item_serde_tag() {
        let json = serde_json::to_value(ContentItem::ToolResult {
            name: "grep".to_string(),
            output: "3 matches".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "tool_result");
    }

    #[test]
    fn test_role_parse_round_trips() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System, MessageRole::Tool] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("USER"), Some(MessageRole::User));
        assert_eq!(MessageRole::parse("robot"), None);
    }
}

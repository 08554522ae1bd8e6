//! Search criteria, filters and results.

use super::conversation::{
    Conversation, ConversationId, IndexedMessage, Message, MessageRole, ProjectId, Thread, ThreadId,
};
use super::graph::TenantId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest allowed page size.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Default page size.
const DEFAULT_PAGE_LIMIT: usize = 20;

/// Search mode for message retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// BM25 full-text search only.
    Keyword,
    /// Vector similarity search only.
    Semantic,
    /// Weighted fusion of keyword and semantic scores (default).
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parses a mode name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "text" => Some(Self::Keyword),
            "semantic" | "vector" => Some(Self::Semantic),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Filters applied to search candidates. Every set filter must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Restrict to these projects.
    pub project_ids: Vec<ProjectId>,
    /// Restrict to these conversations.
    pub conversation_ids: Vec<ConversationId>,
    /// Restrict to these threads.
    pub thread_ids: Vec<ThreadId>,
    /// Restrict to these roles.
    pub roles: Vec<MessageRole>,
    /// Earliest creation time (inclusive).
    pub from: Option<DateTime<Utc>>,
    /// Latest creation time (inclusive).
    pub to: Option<DateTime<Utc>>,
}

impl SearchFilter {
    /// Creates an empty filter (matches all).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a project filter.
    #[must_use]
    pub fn with_project(mut self, id: ProjectId) -> Self {
        self.project_ids.push(id);
        self
    }

    /// Adds a conversation filter.
    #[must_use]
    pub fn with_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_ids.push(id);
        self
    }

    /// Adds a thread filter.
    #[must_use]
    pub fn with_thread(mut self, id: ThreadId) -> Self {
        self.thread_ids.push(id);
        self
    }

    /// Adds a role filter.
    #[must_use]
    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.roles.push(role);
        self
    }

    /// Sets the inclusive creation time range.
    #[must_use]
    pub const fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Returns true if the filter has no criteria set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.project_ids.is_empty()
            && self.conversation_ids.is_empty()
            && self.thread_ids.is_empty()
            && self.roles.is_empty()
            && self.from.is_none()
            && self.to.is_none()
    }

    /// Checks an index document against every criterion.
    #[must_use]
    pub fn matches(&self, doc: &IndexedMessage) -> bool {
        let project_ok = self.project_ids.is_empty()
            || doc
                .project_id
                .as_ref()
                .is_some_and(|p| self.project_ids.contains(p));
        project_ok
            && (self.conversation_ids.is_empty()
                || self.conversation_ids.contains(&doc.conversation_id))
            && (self.thread_ids.is_empty() || self.thread_ids.contains(&doc.thread_id))
            && (self.roles.is_empty() || self.roles.contains(&doc.role))
            && self.from.is_none_or(|from| doc.created_at >= from)
            && self.to.is_none_or(|to| doc.created_at <= to)
    }
}

/// Validated search request.
///
/// Build with [`SearchCriteria::builder`]; validation happens in
/// [`SearchCriteriaBuilder::build`], so an existing value is always valid.
///
/// # Example
///
/// ```rust
/// use gromozeka_memory::models::{SearchCriteria, SearchMode, TenantId};
///
/// let criteria = SearchCriteria::builder(TenantId::new("default"))
///     .query("kotlin coroutines")
///     .mode(SearchMode::Hybrid)
///     .limit(10)
///     .build()
///     .unwrap();
/// assert_eq!(criteria.limit(), 10);
///
/// let invalid = SearchCriteria::builder(TenantId::new("default"))
///     .mode(SearchMode::Semantic)
///     .build();
/// assert!(invalid.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    tenant: TenantId,
    query: String,
    mode: SearchMode,
    filter: SearchFilter,
    limit: usize,
    offset: usize,
}

impl SearchCriteria {
    /// Starts a builder with an empty hybrid query.
    #[must_use]
    pub fn builder(tenant: TenantId) -> SearchCriteriaBuilder {
        SearchCriteriaBuilder {
            tenant,
            query: String::new(),
            mode: SearchMode::default(),
            filter: SearchFilter::default(),
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    /// Tenant scope.
    #[must_use]
    pub const fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Trimmed query text.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Search mode.
    #[must_use]
    pub const fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Filters.
    #[must_use]
    pub const fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    /// Page size, in `1..=100`.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of results to skip.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Candidates needed to fill the page and detect a next page.
    #[must_use]
    pub const fn window(&self) -> usize {
        self.offset.saturating_add(self.limit).saturating_add(1)
    }

    /// Whether this is an empty keyword query (browse most recent).
    #[must_use]
    pub fn is_browse(&self) -> bool {
        self.mode == SearchMode::Keyword && self.query.is_empty()
    }
}

/// Builder for [`SearchCriteria`].
#[derive(Debug, Clone)]
pub struct SearchCriteriaBuilder {
    tenant: TenantId,
    query: String,
    mode: SearchMode,
    filter: SearchFilter,
    limit: usize,
    offset: usize,
}

impl SearchCriteriaBuilder {
    /// Sets the query text.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the mode.
    #[must_use]
    pub const fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the offset.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Validates and builds the criteria.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if:
    /// - the query is blank and the mode is not [`SearchMode::Keyword`]
    /// - `limit` is outside `1..=100`
    /// - the date range is reversed
    pub fn build(self) -> Result<SearchCriteria> {
        let query = self.query.trim().to_string();
        if query.is_empty() && self.mode != SearchMode::Keyword {
            return Err(Error::InvalidInput(format!(
                "{} search requires a non-blank query",
                self.mode.as_str()
            )));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}, got {}",
                self.limit
            )));
        }
        if let (Some(from), Some(to)) = (self.filter.from, self.filter.to) {
            if from > to {
                return Err(Error::InvalidInput(format!(
                    "date range start {from} is after end {to}"
                )));
            }
        }
        Ok(SearchCriteria {
            tenant: self.tenant,
            query,
            mode: self.mode,
            filter: self.filter,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMatchType {
    /// Matched by full-text search only (or browsed).
    Keyword,
    /// Matched by vector similarity only.
    Semantic,
    /// Matched by both.
    Hybrid,
}

/// A matched span of message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    /// Snippet around the match, with context.
    pub snippet: String,
    /// Byte offset of the match start in the message text.
    pub start: usize,
    /// Byte offset of the match end in the message text.
    pub end: usize,
}

/// A hydrated search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// The matched message.
    pub message: Message,
    /// Its thread.
    pub thread: Thread,
    /// Its conversation.
    pub conversation: Conversation,
    /// Fused score in `[0, 1]`.
    pub score: f32,
    /// Highlighted keyword matches; empty for semantic-only hits.
    pub highlights: Vec<Highlight>,
    /// Retrieval path.
    pub match_type: ResultMatchType,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    /// Results on this page, best first.
    pub results: Vec<SearchResult>,
    /// Whether a further page exists.
    pub has_more: bool,
    /// Requested page size.
    pub limit: usize,
    /// Requested offset.
    pub offset: usize,
}

impl SearchPage {
    /// An empty page for the given criteria.
    #[must_use]
    pub const fn empty(criteria: &SearchCriteria) -> Self {
        Self {
            results: Vec::new(),
            has_more: false,
            limit: criteria.limit,
            offset: criteria.offset,
        }
    }

    /// Number of results on the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the page has no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use test_case::test_case;

    fn builder() -> SearchCriteriaBuilder {
        SearchCriteria::builder(TenantId::new("t1"))
    }

    #[test_case(SearchMode::Keyword, "", true ; "blank keyword browses")]
    #[test_case(SearchMode::Semantic, "", false ; "blank semantic rejected")]
    #[test_case(SearchMode::Hybrid, "   ", false ; "whitespace hybrid rejected")]
    #[test_case(SearchMode::Semantic, "kotlin", true ; "semantic with query")]
    fn test_mode_boundary(mode: SearchMode, query: &str, ok: bool) {
        let result = builder().mode(mode).query(query).build();
        assert_eq!(result.is_ok(), ok);
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidInput(_)));
        }
    }

    #[test_case(0, false)]
    #[test_case(1, true)]
    #[test_case(100, true)]
    #[test_case(101, false)]
    fn test_limit_bounds(limit: usize, ok: bool) {
        let result = builder().query("x").limit(limit).build();
        assert_eq!(result.is_ok(), ok);
    }

    #[test]
    fn test_reversed_date_range_rejected() {
        let now = Utc::now();
        let filter = SearchFilter::new().between(Some(now), Some(now - chrono::Duration::days(1)));
        assert!(builder().query("x").filter(filter).build().is_err());
    }

    #[test]
    fn test_window_and_browse() {
        let criteria = builder()
            .mode(SearchMode::Keyword)
            .limit(10)
            .offset(20)
            .build()
            .unwrap();
        assert_eq!(criteria.window(), 31);
        assert!(criteria.is_browse());
    }

    #[test]
    fn test_filter_matches_conjunctively() {
        let now = Utc::now();
        let doc = IndexedMessage {
            id: MessageId::new("m1"),
            tenant: TenantId::new("t1"),
            thread_id: ThreadId::new("th1"),
            conversation_id: ConversationId::new("c1"),
            project_id: Some(ProjectId::new("p1")),
            role: MessageRole::User,
            text: "hello".to_string(),
            created_at: now,
        };

        assert!(SearchFilter::new().matches(&doc));
        assert!(
            SearchFilter::new()
                .with_project(ProjectId::new("p1"))
                .with_role(MessageRole::User)
                .between(Some(now), Some(now))
                .matches(&doc)
        );
        assert!(
            !SearchFilter::new()
                .with_project(ProjectId::new("p1"))
                .with_role(MessageRole::Assistant)
                .matches(&doc)
        );
        assert!(
            !SearchFilter::new()
                .with_thread(ThreadId::new("other"))
                .matches(&doc)
        );
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(SearchMode::parse("KEYWORD"), Some(SearchMode::Keyword));
        assert_eq!(SearchMode::parse("vector"), Some(SearchMode::Semantic));
        assert_eq!(SearchMode::parse("fuzzy"), None);
    }
}

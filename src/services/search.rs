//! Hybrid search over conversation messages.
//!
//! # Modes
//!
//! | Mode | Candidates | Score |
//! |------|------------|-------|
//! | `Keyword` | BM25 full text; most recent when the query is empty | normalized BM25, or `0` when browsing |
//! | `Semantic` | cosine nearest neighbours of the query embedding | normalized cosine |
//! | `Hybrid` | both | `wk * keyword + ws * semantic` |
//!
//! Keyword and semantic paths fetch a pool of `max(candidate_pool, offset +
//! limit + 1)` candidates, so min-max normalization, and with it the order,
//! is the same for every page that ends within the pool. The extra candidate
//! past the page tells whether more results exist.
//!
//! # Degradation
//!
//! - Index unavailable or failing: empty page, logged at warn.
//! - Query embedding fails: `Semantic` returns an empty page; `Hybrid` falls
//!   back to keyword candidates.
//! - A hit whose message, thread or conversation is gone is dropped.

// Allow cast_precision_loss - millisecond durations are small.
#![allow(clippy::cast_precision_loss)]

use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::models::{
    ConversationId, Highlight, KeywordQuery, MessageId, SearchCriteria, SearchMode, SearchPage,
    SearchResult, ThreadId, token_spans,
};
use crate::services::fusion::{FusedHit, fuse};
use crate::storage::{ConversationRepository, IndexHit, MessageIndex};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Keyword, semantic and hybrid message search.
pub struct HybridSearchService {
    index: Arc<dyn MessageIndex>,
    conversations: Arc<dyn ConversationRepository>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl HybridSearchService {
    /// Creates a search service.
    #[must_use]
    pub fn new(
        index: Arc<dyn MessageIndex>,
        conversations: Arc<dyn ConversationRepository>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            conversations,
            embedder,
            config,
        }
    }

    /// Runs a search and returns one page of hydrated results.
    ///
    /// # Errors
    ///
    /// Returns an error only if the conversation repository fails while
    /// hydrating results.
    #[instrument(
        skip(self, criteria),
        fields(
            tenant = %criteria.tenant(),
            mode = criteria.mode().as_str(),
            limit = criteria.limit(),
            offset = criteria.offset()
        )
    )]
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage> {
        let start = Instant::now();
        let mode = criteria.mode().as_str();

        let candidates = self.candidates(criteria).await;
        let page_end = criteria.offset().saturating_add(criteria.limit());
        let has_more = candidates.len() > page_end;
        let page_hits: Vec<FusedHit> = candidates
            .into_iter()
            .skip(criteria.offset())
            .take(criteria.limit())
            .collect();

        let results = self.hydrate(criteria, page_hits).await?;

        metrics::counter!("memory_search_total", "mode" => mode).increment(1);
        metrics::histogram!("memory_search_duration_ms", "mode" => mode)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(results = results.len(), has_more, "Search completed");

        Ok(SearchPage {
            results,
            has_more,
            limit: criteria.limit(),
            offset: criteria.offset(),
        })
    }

    /// Ranked candidates for the whole pool, before pagination.
    async fn candidates(&self, criteria: &SearchCriteria) -> Vec<FusedHit> {
        if !self.index.is_available() {
            tracing::warn!("Message index unavailable, returning no results");
            return Vec::new();
        }

        if criteria.is_browse() {
            return self.browse(criteria).await;
        }

        match criteria.mode() {
            SearchMode::Keyword => {
                let keyword = self.keyword_hits(criteria).await;
                fuse(&keyword, &[], (1.0, 0.0))
            },
            SearchMode::Semantic => {
                let Some(semantic) = self.semantic_hits(criteria).await else {
                    return Vec::new();
                };
                fuse(&[], &semantic, (0.0, 1.0))
            },
            SearchMode::Hybrid => {
                let keyword = self.keyword_hits(criteria).await;
                match self.semantic_hits(criteria).await {
                    Some(semantic) => fuse(&keyword, &semantic, self.config.normalized_weights()),
                    None => fuse(&keyword, &[], (1.0, 0.0)),
                }
            },
        }
    }

    async fn browse(&self, criteria: &SearchCriteria) -> Vec<FusedHit> {
        match self
            .index
            .recent(criteria.tenant(), criteria.filter(), criteria.window())
            .await
        {
            Ok(docs) => docs
                .into_iter()
                .map(|doc| FusedHit {
                    doc,
                    score: 0.0,
                    keyword: None,
                    semantic: None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Recent-message lookup failed");
                Vec::new()
            },
        }
    }

    /// Candidates ranked per search; never smaller than the requested window.
    fn pool(&self, criteria: &SearchCriteria) -> usize {
        criteria.window().max(self.config.candidate_pool)
    }

    async fn keyword_hits(&self, criteria: &SearchCriteria) -> Vec<IndexHit> {
        self.index
            .fulltext(
                criteria.tenant(),
                criteria.query(),
                criteria.filter(),
                self.pool(criteria),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Full-text search failed");
                Vec::new()
            })
    }

    /// `None` when the query could not be embedded.
    async fn semantic_hits(&self, criteria: &SearchCriteria) -> Option<Vec<IndexHit>> {
        let embedding = match self.embedder.embed(criteria.query()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed");
                return None;
            },
        };
        let hits = self
            .index
            .nearest(
                criteria.tenant(),
                &embedding,
                criteria.filter(),
                self.pool(criteria),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Vector search failed");
                Vec::new()
            });
        Some(hits)
    }

    async fn hydrate(&self, criteria: &SearchCriteria, hits: Vec<FusedHit>) -> Result<Vec<SearchResult>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let message_ids: Vec<MessageId> = hits.iter().map(|h| h.doc.id.clone()).collect();
        let mut thread_ids: Vec<ThreadId> = hits.iter().map(|h| h.doc.thread_id.clone()).collect();
        let mut conversation_ids: Vec<ConversationId> =
            hits.iter().map(|h| h.doc.conversation_id.clone()).collect();
        thread_ids.sort();
        thread_ids.dedup();
        conversation_ids.sort();
        conversation_ids.dedup();

        let messages: HashMap<_, _> = self
            .conversations
            .messages(&message_ids)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        let threads: HashMap<_, _> = self
            .conversations
            .threads(&thread_ids)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let conversations: HashMap<_, _> = self
            .conversations
            .conversations(&conversation_ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let query = KeywordQuery::parse(criteria.query());
        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let message = messages.get(&hit.doc.id)?.clone();
                let thread = threads.get(&message.thread_id)?.clone();
                let conversation = conversations.get(&message.conversation_id)?.clone();
                let highlights = if hit.keyword.is_some() {
                    highlights(
                        &message.text(),
                        &query,
                        self.config.highlight_context_chars,
                        self.config.max_highlights,
                    )
                } else {
                    Vec::new()
                };
                Some(SearchResult {
                    match_type: hit.match_type(),
                    message,
                    thread,
                    conversation,
                    score: hit.score,
                    highlights,
                })
            })
            .collect();
        Ok(results)
    }
}

/// Finds up to `max` non-overlapping query matches in `text`.
///
/// Phrases are matched as consecutive tokens. Offsets are byte offsets into
/// `text`; snippets extend `context` characters on each side.
#[must_use]
pub fn highlights(text: &str, query: &KeywordQuery, context: usize, max: usize) -> Vec<Highlight> {
    let spans = token_spans(text);
    let mut matches: Vec<(usize, usize)> = Vec::new();

    for phrase in &query.phrases {
        for window in spans.windows(phrase.len()) {
            if window.iter().zip(phrase).all(|(span, token)| &span.token == token) {
                matches.push((window[0].start, window[window.len() - 1].end));
            }
        }
    }
    for span in &spans {
        if query.terms.contains(&span.token) {
            matches.push((span.start, span.end));
        }
    }

    matches.sort_unstable();
    let mut accepted: Vec<(usize, usize)> = Vec::new();
    for (start, end) in matches {
        if accepted.last().is_none_or(|&(_, prev_end)| start >= prev_end) {
            accepted.push((start, end));
        }
    }

    accepted
        .into_iter()
        .take(max)
        .map(|(start, end)| Highlight {
            snippet: snippet(text, start, end, context),
            start,
            end,
        })
        .collect()
}

fn snippet(text: &str, start: usize, end: usize, context: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(context)
        .last()
        .map_or(start, |(i, _)| i);
    let to = text[end..]
        .char_indices()
        .nth(context)
        .map_or(text.len(), |(i, _)| end + i);

    let mut out = String::new();
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(&text[from..to]);
    if to < text.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{
        ContentItem, Conversation, IndexedMessage, Message, MessageRole, ResultMatchType,
        SearchFilter, TenantId, Thread,
    };
    use crate::storage::{InMemoryConversationRepository, SqliteMessageIndex};
    use chrono::{Duration, Utc};

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    struct Fixture {
        index: Arc<SqliteMessageIndex>,
        repo: Arc<InMemoryConversationRepository>,
        service: HybridSearchService,
    }

    async fn fixture(texts: &[&str]) -> Fixture {
        let index = Arc::new(SqliteMessageIndex::in_memory().unwrap());
        let repo = Arc::new(InMemoryConversationRepository::new());
        let embedder = Arc::new(HashEmbedder::default());
        let now = Utc::now();

        repo.put_conversation(Conversation {
            id: ConversationId::new("c1"),
            project_id: None,
            title: "Chat".to_string(),
            created_at: now,
        })
        .unwrap();
        repo.put_thread(Thread {
            id: ThreadId::new("th1"),
            conversation_id: ConversationId::new("c1"),
            title: None,
            created_at: now,
        })
        .unwrap();

        for (i, text) in texts.iter().enumerate() {
            let message = Message {
                id: MessageId::new(format!("m{i}")),
                thread_id: ThreadId::new("th1"),
                conversation_id: ConversationId::new("c1"),
                role: MessageRole::User,
                content: vec![ContentItem::text(*text)],
                created_at: now - Duration::seconds(100 - i as i64),
            };
            let doc = IndexedMessage::from_message(tenant(), &message, None);
            let embedding = embedder.embed(text).await.unwrap();
            index.upsert(doc, Some(embedding)).await.unwrap();
            repo.put_message(message).unwrap();
        }

        let service = HybridSearchService::new(
            index.clone(),
            repo.clone(),
            embedder,
            SearchConfig::default(),
        );
        Fixture {
            index,
            repo,
            service,
        }
    }

    fn criteria(query: &str, mode: SearchMode, limit: usize, offset: usize) -> SearchCriteria {
        SearchCriteria::builder(tenant())
            .query(query)
            .mode(mode)
            .limit(limit)
            .offset(offset)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_keyword_search_with_highlights() {
        let f = fixture(&["Kotlin coroutines are great", "Rust is fast", "I like kotlin"]).await;
        let page = f
            .service
            .search(&criteria("kotlin", SearchMode::Keyword, 10, 0))
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert!(!page.has_more);
        let first = &page.results[0];
        assert_eq!(first.match_type, ResultMatchType::Keyword);
        assert!(first.score >= page.results[1].score);
        let text = first.message.text();
        let h = &first.highlights[0];
        assert_eq!(text[h.start..h.end].to_lowercase(), "kotlin");
    }

    #[tokio::test]
    async fn test_browse_returns_most_recent_first() {
        let f = fixture(&["one", "two", "three"]).await;
        let page = f
            .service
            .search(&criteria("", SearchMode::Keyword, 2, 0))
            .await
            .unwrap();

        let ids: Vec<&str> = page.results.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
        assert!(page.has_more);
        assert!(page.results.iter().all(|r| r.score == 0.0 && r.highlights.is_empty()));
    }

    #[tokio::test]
    async fn test_pagination_window() {
        let f = fixture(&["one", "two", "three"]).await;
        let page = f
            .service
            .search(&criteria("", SearchMode::Keyword, 2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert!(!page.has_more);
        assert_eq!(page.offset, 2);
    }

    #[tokio::test]
    async fn test_semantic_results_have_no_highlights() {
        let f = fixture(&["kotlin coroutines", "rust ownership"]).await;
        let page = f
            .service
            .search(&criteria("kotlin coroutines", SearchMode::Semantic, 10, 0))
            .await
            .unwrap();
        assert_eq!(page.results[0].message.id.as_str(), "m0");
        assert!(page.results.iter().all(|r| r.highlights.is_empty()));
        assert!(page
            .results
            .iter()
            .all(|r| r.match_type == ResultMatchType::Semantic));
    }

    #[tokio::test]
    async fn test_hybrid_marks_both_paths() {
        let f = fixture(&["kotlin coroutines", "rust ownership"]).await;
        let page = f
            .service
            .search(&criteria("kotlin", SearchMode::Hybrid, 10, 0))
            .await
            .unwrap();
        let top = &page.results[0];
        assert_eq!(top.message.id.as_str(), "m0");
        assert_eq!(top.match_type, ResultMatchType::Hybrid);
        assert!(!top.highlights.is_empty());
        assert!(page.results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn test_unavailable_index_returns_empty_page() {
        let f = fixture(&["kotlin"]).await;
        f.index.set_available(false);
        let page = f
            .service
            .search(&criteria("kotlin", SearchMode::Hybrid, 10, 0))
            .await
            .unwrap();
        assert!(page.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_unhydratable_hits_are_dropped() {
        let f = fixture(&["kotlin one", "kotlin two"]).await;
        f.repo.remove_message(&MessageId::new("m0")).unwrap();
        let page = f
            .service
            .search(&criteria("kotlin", SearchMode::Keyword, 10, 0))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.results[0].message.id.as_str(), "m1");
    }

    #[tokio::test]
    async fn test_filters_apply() {
        let f = fixture(&["kotlin one", "kotlin two"]).await;
        let criteria = SearchCriteria::builder(tenant())
            .query("kotlin")
            .mode(SearchMode::Keyword)
            .filter(SearchFilter::new().with_role(MessageRole::Assistant))
            .build()
            .unwrap();
        assert!(f.service.search(&criteria).await.unwrap().is_empty());
    }

    #[test]
    fn test_highlights_phrases_and_context() {
        let text = "We discussed the data class design. Data is king.";
        let query = KeywordQuery::parse(r#""data class" king"#);
        let found = highlights(text, &query, 5, 3);

        assert_eq!(found.len(), 2);
        assert_eq!(&text[found[0].start..found[0].end], "data class");
        assert_eq!(found[0].snippet, "... the data class desi...");
        assert_eq!(&text[found[1].start..found[1].end], "king");
        assert!(found[1].snippet.ends_with("king."));
    }

    #[test]
    fn test_highlights_respect_max() {
        let query = KeywordQuery::parse("a");
        assert_eq!(highlights("a a a a a", &query, 2, 3).len(), 3);
        assert!(highlights("nothing here", &query, 2, 3).is_empty());
    }
}

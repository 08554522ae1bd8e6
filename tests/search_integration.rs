//! Vector memory synchronization feeding hybrid search.

// Integration tests use unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gromozeka_memory::config::{SearchConfig, VectorMemoryConfig};
use gromozeka_memory::embedding::HashEmbedder;
use gromozeka_memory::models::{
    ContentItem, Conversation, ConversationId, IndexedMessage, Message, MessageId, MessageRole,
    ProjectId, ResultMatchType, SearchCriteria, SearchFilter, SearchMode, TenantId, Thread,
    ThreadId,
};
use gromozeka_memory::storage::{
    IndexHit, InMemoryConversationRepository, MessageIndex, SqliteMessageIndex,
};
use gromozeka_memory::{Error, HybridSearchService, Result, VectorMemorySync};
use std::sync::{Arc, Mutex};
use test_case::test_case;

fn tenant() -> TenantId {
    TenantId::new("default")
}

/// Records upserts and deletes on top of an in-memory `SQLite` index.
struct RecordingIndex {
    inner: SqliteMessageIndex,
    upserts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingIndex {
    fn new() -> Self {
        Self {
            inner: SqliteMessageIndex::in_memory().unwrap(),
            upserts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> (Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut *self.upserts.lock().unwrap()),
            std::mem::take(&mut *self.deletes.lock().unwrap()),
        )
    }
}

#[async_trait]
impl MessageIndex for RecordingIndex {
    async fn upsert(&self, doc: IndexedMessage, embedding: Option<Vec<f32>>) -> Result<()> {
        self.upserts.lock().unwrap().push(doc.id.to_string());
        self.inner.upsert(doc, embedding).await
    }

    async fn delete(&self, tenant: &TenantId, id: &MessageId) -> Result<bool> {
        self.deletes.lock().unwrap().push(id.to_string());
        self.inner.delete(tenant, id).await
    }

    async fn indexed_ids(&self, tenant: &TenantId, thread: &ThreadId) -> Result<Vec<MessageId>> {
        self.inner.indexed_ids(tenant, thread).await
    }

    async fn fulltext(
        &self,
        tenant: &TenantId,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        self.inner.fulltext(tenant, query, filter, limit).await
    }

    async fn nearest(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        self.inner.nearest(tenant, embedding, filter, limit).await
    }

    async fn recent(
        &self,
        tenant: &TenantId,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexedMessage>> {
        self.inner.recent(tenant, filter, limit).await
    }
}

struct World {
    repo: Arc<InMemoryConversationRepository>,
    index: Arc<RecordingIndex>,
    sync: VectorMemorySync,
    search: HybridSearchService,
}

fn world() -> World {
    let repo = Arc::new(InMemoryConversationRepository::new());
    let index = Arc::new(RecordingIndex::new());
    let embedder = Arc::new(HashEmbedder::default());
    let now = Utc::now();

    for (conversation, thread) in [("c1", "th1"), ("c2", "th2")] {
        repo.put_conversation(Conversation {
            id: ConversationId::new(conversation),
            project_id: Some(ProjectId::new("gromozeka")),
            title: format!("Conversation {conversation}"),
            created_at: now,
        })
        .unwrap();
        repo.put_thread(Thread {
            id: ThreadId::new(thread),
            conversation_id: ConversationId::new(conversation),
            title: None,
            created_at: now,
        })
        .unwrap();
    }

    World {
        sync: VectorMemorySync::new(
            repo.clone(),
            index.clone(),
            embedder.clone(),
            VectorMemoryConfig::default(),
        ),
        search: HybridSearchService::new(index.clone(), repo.clone(), embedder, SearchConfig::default()),
        repo,
        index,
    }
}

fn message(id: &str, thread: &str, conversation: &str, text: &str, age_secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        thread_id: ThreadId::new(thread),
        conversation_id: ConversationId::new(conversation),
        role: MessageRole::User,
        content: vec![ContentItem::text(text)],
        created_at: Utc::now() - Duration::seconds(age_secs),
    }
}

#[tokio::test]
async fn test_sync_issues_only_the_diff() {
    let w = world();
    let thread = ThreadId::new("th1");
    for (id, age) in [("1", 40), ("2", 30), ("3", 20)] {
        w.repo
            .put_message(message(id, "th1", "c1", &format!("message {id}"), age))
            .unwrap();
    }
    let initial = w.sync.remember_thread(&tenant(), &thread, None).await.unwrap();
    assert_eq!(initial.added, 3);
    w.index.take();

    w.repo.remove_message(&MessageId::new("2")).unwrap();
    w.repo
        .put_message(message("4", "th1", "c1", "message 4", 10))
        .unwrap();
    let report = w.sync.remember_thread(&tenant(), &thread, None).await.unwrap();

    assert_eq!((report.added, report.removed, report.failed), (1, 1, 0));
    let (upserts, deletes) = w.index.take();
    assert_eq!(upserts, vec!["4"]);
    assert_eq!(deletes, vec!["2"]);
}

#[tokio::test]
async fn test_synced_messages_are_searchable() {
    let w = world();
    let project = ProjectId::new("gromozeka");
    w.repo
        .put_message(message("a", "th1", "c1", "Gromozeka is written in Kotlin", 30))
        .unwrap();
    w.repo
        .put_message(message("b", "th2", "c2", "Kotlin coroutines and flows", 20))
        .unwrap();
    w.repo
        .put_message(message("c", "th2", "c2", "Lunch plans for Friday", 10))
        .unwrap();
    w.sync
        .remember_thread(&tenant(), &ThreadId::new("th1"), Some(&project))
        .await
        .unwrap();
    w.sync
        .remember_thread(&tenant(), &ThreadId::new("th2"), Some(&project))
        .await
        .unwrap();

    let criteria = SearchCriteria::builder(tenant())
        .query("kotlin")
        .mode(SearchMode::Hybrid)
        .build()
        .unwrap();
    let page = w.search.search(&criteria).await.unwrap();
    let keyword_hits: Vec<&str> = page
        .results
        .iter()
        .filter(|r| r.match_type == ResultMatchType::Hybrid)
        .map(|r| r.message.id.as_str())
        .collect();
    assert_eq!(keyword_hits.len(), 2);
    assert!(!keyword_hits.contains(&"c"));
    assert_eq!(page.results[0].conversation.project_id, Some(project.clone()));

    let in_thread = SearchCriteria::builder(tenant())
        .query("kotlin")
        .mode(SearchMode::Keyword)
        .filter(SearchFilter::new().with_thread(ThreadId::new("th1")))
        .build()
        .unwrap();
    let page = w.search.search(&in_thread).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.results[0].message.id.as_str(), "a");
    assert_eq!(page.results[0].thread.id.as_str(), "th1");

    w.sync
        .forget_thread(&tenant(), &ThreadId::new("th2"))
        .await
        .unwrap();
    let page = w.search.search(&criteria).await.unwrap();
    assert!(page.results.iter().all(|r| r.thread.id.as_str() == "th1"));
}

#[tokio::test]
async fn test_browse_orders_newest_first() {
    let w = world();
    for (id, age) in [("old", 30), ("mid", 20), ("new", 10)] {
        w.repo.put_message(message(id, "th1", "c1", id, age)).unwrap();
    }
    w.sync
        .remember_thread(&tenant(), &ThreadId::new("th1"), None)
        .await
        .unwrap();

    let criteria = SearchCriteria::builder(tenant())
        .mode(SearchMode::Keyword)
        .build()
        .unwrap();
    let page = w.search.search(&criteria).await.unwrap();
    let ids: Vec<&str> = page.results.iter().map(|r| r.message.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);
}

#[tokio::test]
async fn test_hybrid_pages_partition_the_full_ranking() {
    let w = world();
    let texts = [
        "kotlin kotlin kotlin coroutines",
        "kotlin flows and channels",
        "gradle kotlin dsl",
        "coroutines in rust async",
        "kotlin",
        "channels and flows everywhere",
        "kotlin multiplatform coroutines library",
        "lunch on friday",
        "kotlin coroutines scope",
        "coroutine builders",
        "data class in kotlin",
    ];
    for (i, text) in texts.iter().enumerate() {
        let age = 100 - i64::try_from(i).unwrap();
        w.repo
            .put_message(message(&format!("m{i:02}"), "th1", "c1", text, age))
            .unwrap();
    }
    w.sync
        .remember_thread(&tenant(), &ThreadId::new("th1"), None)
        .await
        .unwrap();

    let page_of = |limit: usize, offset: usize| {
        SearchCriteria::builder(tenant())
            .query("kotlin coroutines")
            .mode(SearchMode::Hybrid)
            .limit(limit)
            .offset(offset)
            .build()
            .unwrap()
    };

    let full = w.search.search(&page_of(100, 0)).await.unwrap();
    assert!(full.len() > 6);
    let expected: Vec<(String, f32)> = full
        .results
        .iter()
        .map(|r| (r.message.id.to_string(), r.score))
        .collect();

    for limit in [1, 2, 3] {
        let mut paged = Vec::new();
        let mut offset = 0;
        loop {
            let page = w.search.search(&page_of(limit, offset)).await.unwrap();
            paged.extend(
                page.results
                    .iter()
                    .map(|r| (r.message.id.to_string(), r.score)),
            );
            if !page.has_more {
                break;
            }
            offset += limit;
        }
        assert_eq!(paged, expected, "pages of {limit} disagree with the full ranking");
    }
}

#[test_case("", SearchMode::Semantic, 20, false ; "blank semantic query")]
#[test_case("", SearchMode::Hybrid, 20, false ; "blank hybrid query")]
#[test_case("", SearchMode::Keyword, 20, true ; "blank keyword query browses")]
#[test_case("kotlin", SearchMode::Hybrid, 0, false ; "zero limit")]
#[test_case("kotlin", SearchMode::Hybrid, 101, false ; "limit above maximum")]
#[test_case("kotlin", SearchMode::Hybrid, 100, true ; "maximum limit")]
fn test_criteria_validation(query: &str, mode: SearchMode, limit: usize, ok: bool) {
    let result = SearchCriteria::builder(tenant())
        .query(query)
        .mode(mode)
        .limit(limit)
        .offset(0)
        .build();
    match result {
        Ok(_) => assert!(ok),
        Err(e) => {
            assert!(!ok);
            assert!(matches!(e, Error::InvalidInput(_)));
        },
    }
}

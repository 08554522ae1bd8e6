//! `SQLite` message index with FTS5 full-text search.
//!
//! Messages live in `indexed_messages`; their text is mirrored into the
//! standalone FTS5 table `indexed_messages_fts`, joined back on
//! `(tenant, id)`. Keyword ranking is FTS5 `bm25()`. Embeddings are stored
//! as JSON next to the row and scanned for cosine similarity.

// Allow cast_possible_truncation - bm25() returns f64, scores are reported as f32.
#![allow(clippy::cast_possible_truncation)]
// Allow needless_pass_by_value - spawn_blocking closures take owned arguments.
#![allow(clippy::needless_pass_by_value)]

use crate::embedding::cosine_similarity;
use crate::models::{
    ConversationId, IndexedMessage, KeywordQuery, MessageId, MessageRole, ProjectId,
    SearchFilter, TenantId, ThreadId,
};
use crate::storage::traits::{IndexHit, MessageIndex};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::instrument;

const MESSAGE_COLUMNS: &str =
    "m.id, m.tenant, m.thread_id, m.conversation_id, m.project_id, m.role, m.text, m.created_at";

/// Helper to acquire mutex lock with poison recovery.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Index SQLite mutex was poisoned, recovering");
            metrics::counter!("index_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::failed(operation, e)
}

fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => "sqlite_index",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => "sqlite_index",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Builds an FTS5 MATCH expression from a parsed query.
///
/// Every token is quoted, so FTS5 operators in user text stay literal. Plain
/// terms are OR-ed; phrases are AND-ed and also OR-ed in with the terms so
/// the terms still count towards `bm25()`.
fn match_expression(query: &KeywordQuery) -> String {
    let quote = |tokens: &[String]| format!("\"{}\"", tokens.join(" "));
    let phrases: Vec<String> = query.phrases.iter().map(|p| quote(p)).collect();
    let terms: Vec<String> = query
        .terms
        .iter()
        .map(|t| quote(std::slice::from_ref(t)))
        .collect();

    if phrases.is_empty() {
        return terms.join(" OR ");
    }
    if terms.is_empty() {
        return phrases.join(" AND ");
    }
    let any: Vec<&str> = phrases.iter().chain(&terms).map(String::as_str).collect();
    format!("{} AND ({})", phrases.join(" AND "), any.join(" OR "))
}

/// Appends `AND ...` conditions over the `m` alias for every filter field set.
fn filter_clause(filter: &SearchFilter, params: &mut Vec<Value>) -> String {
    fn any_of(column: &str, values: Vec<String>, params: &mut Vec<Value>) -> String {
        let placeholders = vec!["?"; values.len()].join(", ");
        params.extend(values.into_iter().map(Value::Text));
        format!(" AND {column} IN ({placeholders})")
    }

    let mut clause = String::new();
    if !filter.project_ids.is_empty() {
        let ids = filter.project_ids.iter().map(ToString::to_string).collect();
        clause.push_str(&any_of("m.project_id", ids, params));
    }
    if !filter.conversation_ids.is_empty() {
        let ids = filter.conversation_ids.iter().map(ToString::to_string).collect();
        clause.push_str(&any_of("m.conversation_id", ids, params));
    }
    if !filter.thread_ids.is_empty() {
        let ids = filter.thread_ids.iter().map(ToString::to_string).collect();
        clause.push_str(&any_of("m.thread_id", ids, params));
    }
    if !filter.roles.is_empty() {
        let roles = filter.roles.iter().map(|r| r.as_str().to_string()).collect();
        clause.push_str(&any_of("m.role", roles, params));
    }
    if let Some(from) = filter.from {
        clause.push_str(" AND m.created_at >= ?");
        params.push(Value::Integer(from.timestamp_micros()));
    }
    if let Some(to) = filter.to {
        clause.push_str(" AND m.created_at <= ?");
        params.push(Value::Integer(to.timestamp_micros()));
    }
    clause
}

fn limit_param(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

fn parse_message_row(row: &Row<'_>) -> rusqlite::Result<IndexedMessage> {
    let role: String = row.get(5)?;
    let created_at: i64 = row.get(7)?;
    Ok(IndexedMessage {
        id: MessageId::new(row.get::<_, String>(0)?),
        tenant: TenantId::new(row.get::<_, String>(1)?),
        thread_id: ThreadId::new(row.get::<_, String>(2)?),
        conversation_id: ConversationId::new(row.get::<_, String>(3)?),
        project_id: row.get::<_, Option<String>>(4)?.map(ProjectId::new),
        role: MessageRole::parse(&role).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                Box::new(Error::InvalidInput(format!("unknown message role '{role}'"))),
            )
        })?,
        text: row.get(6)?,
        created_at: DateTime::from_timestamp_micros(created_at)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(7, created_at))?,
    })
}

/// Orders hits by score desc, then newer message, then id.
fn rank_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.doc.created_at.cmp(&a.doc.created_at))
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });
}

/// `SQLite`-based message index.
///
/// # Concurrency Model
///
/// Same as the graph store: one `Mutex<Connection>` behind an `Arc`, every
/// call on the blocking pool. Upserts and deletes touch both tables inside
/// one transaction.
///
/// # Scores
///
/// `fulltext` reports `-bm25()`, so higher is better and scores are
/// unbounded; `nearest` reports cosine similarity.
pub struct SqliteMessageIndex {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
    available: AtomicBool,
}

impl SqliteMessageIndex {
    /// Opens (or creates) an index database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(sql_error("open_index_sqlite"))?;
        Self::with_connection(conn, Some(db_path))
    }

    /// Creates an in-memory index (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open_index_sqlite_memory"))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            available: AtomicBool::new(true),
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Takes the index offline or back online, e.g. around a rebuild.
    ///
    /// While offline, searches return nothing and synchronization is skipped.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    fn initialize(conn: &Connection) -> Result<()> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        conn.execute_batch(
            r#"CREATE TABLE IF NOT EXISTS indexed_messages (
                tenant TEXT NOT NULL,
                id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                project_id TEXT,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                embedding TEXT,
                PRIMARY KEY (tenant, id)
            );
            CREATE INDEX IF NOT EXISTS idx_indexed_messages_thread
                ON indexed_messages(tenant, thread_id);
            CREATE INDEX IF NOT EXISTS idx_indexed_messages_created_at
                ON indexed_messages(tenant, created_at DESC);

            CREATE VIRTUAL TABLE IF NOT EXISTS indexed_messages_fts USING fts5(
                tenant UNINDEXED,
                id UNINDEXED,
                text,
                tokenize = "unicode61 tokenchars '_'"
            );"#,
        )
        .map_err(sql_error("create_index_tables"))?;
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool and records
    /// per-operation metrics.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let conn = Arc::clone(&self.conn);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = acquire_lock(&conn);
            f(&mut *guard)
        })
        .await;
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(Error::failed(operation, e)),
        };
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }
}

#[async_trait]
impl MessageIndex for SqliteMessageIndex {
    fn is_available(&self) -> bool {
        self.available.load(AtomicOrdering::SeqCst)
    }

    #[instrument(skip_all, fields(tenant = %doc.tenant, message.id = %doc.id))]
    async fn upsert(&self, doc: IndexedMessage, embedding: Option<Vec<f32>>) -> Result<()> {
        let embedding = embedding
            .map(|v| serde_json::to_string(&v))
            .transpose()
            .map_err(|e| Error::failed("encode_embedding", e))?;
        self.with_conn("upsert", move |conn| {
            let tx = conn.transaction().map_err(sql_error("begin_upsert"))?;
            tx.execute(
                "INSERT INTO indexed_messages (
                    tenant, id, thread_id, conversation_id, project_id, role, text,
                    created_at, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(tenant, id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    conversation_id = excluded.conversation_id,
                    project_id = excluded.project_id,
                    role = excluded.role,
                    text = excluded.text,
                    created_at = excluded.created_at,
                    embedding = excluded.embedding",
                params![
                    doc.tenant.as_str(),
                    doc.id.as_str(),
                    doc.thread_id.as_str(),
                    doc.conversation_id.as_str(),
                    doc.project_id.as_ref().map(ProjectId::as_str),
                    doc.role.as_str(),
                    doc.text,
                    doc.created_at.timestamp_micros(),
                    embedding,
                ],
            )
            .map_err(sql_error("store_message"))?;
            tx.execute(
                "DELETE FROM indexed_messages_fts WHERE tenant = ?1 AND id = ?2",
                params![doc.tenant.as_str(), doc.id.as_str()],
            )
            .map_err(sql_error("replace_fts"))?;
            tx.execute(
                "INSERT INTO indexed_messages_fts (tenant, id, text) VALUES (?1, ?2, ?3)",
                params![doc.tenant.as_str(), doc.id.as_str(), doc.text],
            )
            .map_err(sql_error("insert_fts"))?;
            tx.commit().map_err(sql_error("commit_upsert"))
        })
        .await
    }

    async fn delete(&self, tenant: &TenantId, id: &MessageId) -> Result<bool> {
        let (tenant, id) = (tenant.to_string(), id.to_string());
        self.with_conn("delete", move |conn| {
            let tx = conn.transaction().map_err(sql_error("begin_delete"))?;
            tx.execute(
                "DELETE FROM indexed_messages_fts WHERE tenant = ?1 AND id = ?2",
                params![tenant, id],
            )
            .map_err(sql_error("delete_fts"))?;
            let deleted = tx
                .execute(
                    "DELETE FROM indexed_messages WHERE tenant = ?1 AND id = ?2",
                    params![tenant, id],
                )
                .map_err(sql_error("delete_message"))?;
            tx.commit().map_err(sql_error("commit_delete"))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn indexed_ids(&self, tenant: &TenantId, thread: &ThreadId) -> Result<Vec<MessageId>> {
        let (tenant, thread) = (tenant.to_string(), thread.to_string());
        self.with_conn("indexed_ids", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM indexed_messages
                     WHERE tenant = ?1 AND thread_id = ?2
                     ORDER BY id",
                )
                .map_err(sql_error("indexed_ids"))?;
            let rows = stmt
                .query_map(params![tenant, thread], |row| {
                    row.get::<_, String>(0).map(MessageId::new)
                })
                .map_err(sql_error("indexed_ids"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("indexed_ids"))
        })
        .await
    }

    #[instrument(skip(self, filter), fields(query_length = query.len()))]
    async fn fulltext(
        &self,
        tenant: &TenantId,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let parsed = KeywordQuery::parse(query);
        if parsed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut values = vec![
            Value::Text(match_expression(&parsed)),
            Value::Text(tenant.to_string()),
        ];
        let clause = filter_clause(filter, &mut values);
        values.push(limit_param(limit));
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}, bm25(indexed_messages_fts) AS score
             FROM indexed_messages_fts f
             JOIN indexed_messages m ON m.tenant = f.tenant AND m.id = f.id
             WHERE indexed_messages_fts MATCH ? AND f.tenant = ?{clause}
             ORDER BY score, m.created_at DESC, m.id
             LIMIT ?"
        );

        self.with_conn("search", move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_error("prepare_search"))?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    let score: f64 = row.get(8)?;
                    Ok(IndexHit {
                        doc: parse_message_row(row)?,
                        score: (-score) as f32,
                    })
                })
                .map_err(sql_error("execute_search"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("read_search_row"))
        })
        .await
    }

    async fn nearest(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut values = vec![Value::Text(tenant.to_string())];
        let clause = filter_clause(filter, &mut values);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}, m.embedding FROM indexed_messages m
             WHERE m.tenant = ? AND m.embedding IS NOT NULL{clause}"
        );
        let query = embedding.to_vec();

        self.with_conn("nearest", move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_error("prepare_nearest"))?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok((parse_message_row(row)?, row.get::<_, String>(8)?))
                })
                .map_err(sql_error("execute_nearest"))?;

            let mut hits = Vec::new();
            for row in rows {
                let (doc, vector) = row.map_err(sql_error("read_nearest_row"))?;
                let Ok(vector) = serde_json::from_str::<Vec<f32>>(&vector) else {
                    tracing::warn!(message.id = %doc.id, "Skipping unreadable embedding");
                    continue;
                };
                if vector.len() == query.len() {
                    let score = cosine_similarity(&query, &vector);
                    hits.push(IndexHit { doc, score });
                }
            }
            rank_hits(&mut hits);
            hits.truncate(limit);
            Ok(hits)
        })
        .await
    }

    async fn recent(
        &self,
        tenant: &TenantId,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<IndexedMessage>> {
        let mut values = vec![Value::Text(tenant.to_string())];
        let clause = filter_clause(filter, &mut values);
        values.push(limit_param(limit));
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM indexed_messages m
             WHERE m.tenant = ?{clause}
             ORDER BY m.created_at DESC, m.id
             LIMIT ?"
        );

        self.with_conn("recent", move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_error("prepare_recent"))?;
            let rows = stmt
                .query_map(params_from_iter(values), parse_message_row)
                .map_err(sql_error("execute_recent"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("read_recent_row"))
        })
        .await
    }
}

//! `SQLite` graph backend for knowledge graph storage.
//!
//! Stores entities and relationships in two tables. Merge keys are enforced
//! by unique indexes: entities on `(tenant, name, entity_type, source)` and
//! currently valid relationships on `(tenant, source_id, target_id,
//! relation_type)` through a partial index. Candidate lookups go through two
//! registered SQL functions: `name_close` filters, `name_rank` orders the
//! closest names first before the limit applies.
//!
//! Timestamps are stored as microseconds since the epoch. The open-ended
//! validity sentinels are stored as `NULL`.

// Allow cast_possible_truncation and cast_sign_loss for SQLite i64 to usize conversions.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Allow cast_possible_wrap - usize limits passed as i64 parameters never wrap in practice.
#![allow(clippy::cast_possible_wrap)]
// Allow needless_pass_by_value - spawn_blocking closures take owned arguments.
#![allow(clippy::needless_pass_by_value)]

use crate::models::resolution::{candidate_rank, names_are_close, normalize_name};
use crate::models::{
    ALWAYS_VALID_FROM, DeletionReport, Entity, EntityDraft, EntityId, InvalidateOutcome,
    Relationship, RelationshipDraft, RelationshipId, RelationshipQuery, STILL_VALID,
    TemporalFilter, TenantId, ValidityInterval,
};
use crate::storage::traits::GraphStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::instrument;

const ENTITY_COLUMNS: &str = "id, tenant, name, entity_type, labels, summary, embedding, \
     attributes, source, created_at, last_indexed_at";

const RELATIONSHIP_COLUMNS: &str = "id, tenant, source_id, target_id, relation_type, fact, \
     summary, embedding, created_at, valid_at, invalid_at";

/// Helper to acquire mutex lock with poison recovery.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Graph SQLite mutex was poisoned, recovering");
            metrics::counter!("graph_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::failed(operation, e)
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(column: usize, value: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, value))
}

/// Drops sub-microsecond precision so returned values equal what a later read yields.
fn truncate_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    if at == ALWAYS_VALID_FROM || at == STILL_VALID {
        return at;
    }
    DateTime::from_timestamp_micros(to_micros(at)).unwrap_or(at)
}

fn open_start(at: DateTime<Utc>) -> Option<i64> {
    (at != ALWAYS_VALID_FROM).then(|| to_micros(at))
}

fn open_end(at: DateTime<Utc>) -> Option<i64> {
    (at != STILL_VALID).then(|| to_micros(at))
}

fn embedding_json(embedding: Option<&Vec<f32>>) -> Option<String> {
    embedding.and_then(|v| serde_json::to_string(v).ok())
}

/// `SQLite`-based graph store.
///
/// # Concurrency Model
///
/// A single `Mutex<Connection>` is shared behind an `Arc`; every operation
/// runs on the blocking thread pool via `spawn_blocking`. Merges run inside a
/// transaction, so two concurrent merges of the same key serialize.
///
/// # Schema
///
/// - `graph_entities`: entity nodes keyed by UUID, unique on the merge key
/// - `graph_relationships`: directed edges with a validity interval
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Opens (or creates) a graph database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(sql_error("open_graph_sqlite"))?;
        Self::with_connection(conn, Some(db_path))
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open_graph_sqlite_memory"))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(conn: &Connection) -> Result<()> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS graph_entities (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                name TEXT NOT NULL,
                name_key TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                labels TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                embedding TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                source TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                last_indexed_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_graph_entities_merge_key
                ON graph_entities(tenant, name, entity_type, source);
            CREATE INDEX IF NOT EXISTS idx_graph_entities_name_key
                ON graph_entities(tenant, name_key);

            CREATE TABLE IF NOT EXISTS graph_relationships (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                source_id TEXT NOT NULL REFERENCES graph_entities(id),
                target_id TEXT NOT NULL REFERENCES graph_entities(id),
                relation_type TEXT NOT NULL,
                fact TEXT NOT NULL,
                summary TEXT,
                embedding TEXT,
                created_at INTEGER NOT NULL,
                valid_at INTEGER,
                invalid_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_graph_relationships_current
                ON graph_relationships(tenant, source_id, target_id, relation_type)
                WHERE invalid_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_graph_relationships_target
                ON graph_relationships(tenant, target_id);",
        )
        .map_err(sql_error("create_graph_tables"))?;

        conn.create_scalar_function(
            "name_close",
            3,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let name: String = ctx.get(0)?;
                let names_json: String = ctx.get(1)?;
                let max_distance: i64 = ctx.get(2)?;
                let names: Vec<String> = serde_json::from_str(&names_json)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
                Ok(names
                    .iter()
                    .any(|n| names_are_close(n, &name, max_distance.max(0) as usize)))
            },
        )
        .map_err(sql_error("register_name_close"))?;

        conn.create_scalar_function(
            "name_rank",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let name: String = ctx.get(0)?;
                let names_json: String = ctx.get(1)?;
                let names: Vec<String> = serde_json::from_str(&names_json)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
                Ok(i64::try_from(candidate_rank(&name, &names)).unwrap_or(i64::MAX))
            },
        )
        .map_err(sql_error("register_name_rank"))?;

        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = acquire_lock(&conn);
            f(&mut *guard)
        })
        .await
        .map_err(|e| Error::failed(operation, e))?
    }

    fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
        let labels: String = row.get("labels")?;
        let embedding: Option<String> = row.get("embedding")?;
        let attributes: String = row.get("attributes")?;
        let created_at: i64 = row.get("created_at")?;
        let last_indexed_at: Option<i64> = row.get("last_indexed_at")?;

        Ok(Entity {
            id: EntityId::new(row.get::<_, String>("id")?),
            tenant: TenantId::new(row.get::<_, String>("tenant")?),
            name: row.get("name")?,
            entity_type: row.get("entity_type")?,
            labels: serde_json::from_str(&labels).unwrap_or_default(),
            summary: row.get("summary")?,
            embedding: embedding.and_then(|s| serde_json::from_str(&s).ok()),
            attributes: serde_json::from_str(&attributes).unwrap_or_default(),
            source: row.get("source")?,
            created_at: from_micros(9, created_at)?,
            last_indexed_at: last_indexed_at.map(|v| from_micros(10, v)).transpose()?,
        })
    }

    fn parse_relationship_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
        let embedding: Option<String> = row.get("embedding")?;
        let created_at: i64 = row.get("created_at")?;
        let valid_at: Option<i64> = row.get("valid_at")?;
        let invalid_at: Option<i64> = row.get("invalid_at")?;

        let valid_at = valid_at.map_or(Ok(ALWAYS_VALID_FROM), |v| from_micros(9, v))?;
        let invalid_at = invalid_at.map_or(Ok(STILL_VALID), |v| from_micros(10, v))?;
        let validity = ValidityInterval::new(valid_at, invalid_at).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })?;

        Ok(Relationship {
            id: RelationshipId::new(row.get::<_, String>("id")?),
            tenant: TenantId::new(row.get::<_, String>("tenant")?),
            source: EntityId::new(row.get::<_, String>("source_id")?),
            target: EntityId::new(row.get::<_, String>("target_id")?),
            relation_type: row.get("relation_type")?,
            fact: row.get("fact")?,
            summary: row.get("summary")?,
            embedding: embedding.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: from_micros(8, created_at)?,
            validity,
        })
    }

    fn write_entity(conn: &Connection, entity: &Entity) -> Result<()> {
        let labels = serde_json::to_string(&entity.labels).unwrap_or_else(|_| "[]".to_string());
        let attributes =
            serde_json::to_string(&entity.attributes).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "INSERT INTO graph_entities (
                id, tenant, name, name_key, entity_type, labels, summary, embedding,
                attributes, source, created_at, last_indexed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                labels = excluded.labels,
                summary = excluded.summary,
                embedding = excluded.embedding,
                attributes = excluded.attributes,
                last_indexed_at = excluded.last_indexed_at",
            params![
                entity.id.as_str(),
                entity.tenant.as_str(),
                entity.name,
                normalize_name(&entity.name),
                entity.entity_type,
                labels,
                entity.summary,
                embedding_json(entity.embedding.as_ref()),
                attributes,
                entity.source,
                to_micros(entity.created_at),
                entity.last_indexed_at.map(to_micros),
            ],
        )
        .map_err(sql_error("store_entity"))?;
        Ok(())
    }

    fn write_relationship(conn: &Connection, rel: &Relationship) -> Result<()> {
        conn.execute(
            "INSERT INTO graph_relationships (
                id, tenant, source_id, target_id, relation_type, fact, summary, embedding,
                created_at, valid_at, invalid_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                fact = excluded.fact,
                summary = excluded.summary,
                embedding = excluded.embedding,
                valid_at = excluded.valid_at,
                invalid_at = excluded.invalid_at",
            params![
                rel.id.as_str(),
                rel.tenant.as_str(),
                rel.source.as_str(),
                rel.target.as_str(),
                rel.relation_type,
                rel.fact,
                rel.summary,
                embedding_json(rel.embedding.as_ref()),
                to_micros(rel.created_at),
                open_start(rel.valid_at()),
                open_end(rel.invalid_at()),
            ],
        )
        .map_err(sql_error("store_relationship"))?;
        Ok(())
    }

    fn current_relationship(
        conn: &Connection,
        tenant: &str,
        source: &str,
        relation_type: &str,
        target: &str,
    ) -> Result<Option<Relationship>> {
        conn.query_row(
            &format!(
                "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships
                 WHERE tenant = ?1 AND source_id = ?2 AND target_id = ?3
                   AND relation_type = ?4 AND invalid_at IS NULL"
            ),
            params![tenant, source, target, relation_type],
            Self::parse_relationship_row,
        )
        .optional()
        .map_err(sql_error("find_current_relationship"))
    }

    /// Deletes entities and every incident relationship in one transaction.
    fn delete_entities(conn: &mut Connection, tenant: &str, ids: &[String]) -> Result<DeletionReport> {
        let tx = conn.transaction().map_err(sql_error("begin_delete"))?;
        let mut report = DeletionReport::default();
        for id in ids {
            report.relationships_removed += tx
                .execute(
                    "DELETE FROM graph_relationships
                     WHERE tenant = ?1 AND (source_id = ?2 OR target_id = ?2)",
                    params![tenant, id],
                )
                .map_err(sql_error("delete_relationships"))?;
            report.entities_removed += tx
                .execute(
                    "DELETE FROM graph_entities WHERE tenant = ?1 AND id = ?2",
                    params![tenant, id],
                )
                .map_err(sql_error("delete_entity"))?;
        }
        tx.commit().map_err(sql_error("commit_delete"))?;
        Ok(report)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    #[instrument(skip(self, draft), fields(name = %draft.name, entity_type = %draft.entity_type))]
    async fn merge_entity(&self, draft: EntityDraft) -> Result<Entity> {
        let stored = self
            .with_conn("merge_entity", move |conn| {
                let tx = conn.transaction().map_err(sql_error("begin_merge_entity"))?;
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {ENTITY_COLUMNS} FROM graph_entities
                             WHERE tenant = ?1 AND name = ?2 AND entity_type = ?3 AND source = ?4"
                        ),
                        params![
                            draft.tenant.as_str(),
                            draft.name,
                            draft.entity_type,
                            draft.source
                        ],
                        Self::parse_entity_row,
                    )
                    .optional()
                    .map_err(sql_error("find_entity_by_key"))?;

                let mut entity = match existing {
                    Some(mut entity) => {
                        entity.absorb(draft);
                        entity
                    },
                    None => Entity::from_draft(draft, truncate_micros(Utc::now())),
                };
                entity.last_indexed_at = entity.last_indexed_at.map(truncate_micros);
                Self::write_entity(&tx, &entity)?;
                tx.commit().map_err(sql_error("commit_merge_entity"))?;
                Ok(entity)
            })
            .await?;

        metrics::counter!("graph_entities_stored_total").increment(1);
        Ok(stored)
    }

    async fn get_entity(&self, tenant: &TenantId, id: &EntityId) -> Result<Option<Entity>> {
        let (tenant, id) = (tenant.to_string(), id.to_string());
        self.with_conn("get_entity", move |conn| {
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM graph_entities WHERE tenant = ?1 AND id = ?2"),
                params![tenant, id],
                Self::parse_entity_row,
            )
            .optional()
            .map_err(sql_error("get_entity"))
        })
        .await
    }

    async fn entities_by_name(&self, tenant: &TenantId, name: &str) -> Result<Vec<Entity>> {
        let (tenant, key) = (tenant.to_string(), normalize_name(name));
        self.with_conn("entities_by_name", move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM graph_entities
                     WHERE tenant = ?1 AND name_key = ?2
                     ORDER BY created_at, id"
                ))
                .map_err(sql_error("entities_by_name"))?;
            let rows = stmt
                .query_map(params![tenant, key], Self::parse_entity_row)
                .map_err(sql_error("entities_by_name"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("entities_by_name"))
        })
        .await
    }

    #[instrument(skip(self, names), fields(names = names.len()))]
    async fn find_candidates(
        &self,
        tenant: &TenantId,
        names: &[String],
        max_distance: usize,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        if names.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let tenant = tenant.to_string();
        let names_json = serde_json::to_string(names).map_err(|e| Error::failed("find_candidates", e))?;
        self.with_conn("find_candidates", move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM graph_entities
                     WHERE tenant = ?1 AND name_close(name, ?2, ?3)
                     ORDER BY name_rank(name, ?2), name, id
                     LIMIT ?4"
                ))
                .map_err(sql_error("find_candidates"))?;
            let rows = stmt
                .query_map(
                    params![tenant, names_json, max_distance as i64, limit as i64],
                    Self::parse_entity_row,
                )
                .map_err(sql_error("find_candidates"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("find_candidates"))
        })
        .await
    }

    #[instrument(skip(self, draft), fields(relation_type = %draft.relation_type))]
    async fn merge_relationship(&self, draft: RelationshipDraft) -> Result<Relationship> {
        let stored = self
            .with_conn("merge_relationship", move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(sql_error("begin_merge_relationship"))?;
                let tenant = draft.tenant.to_string();

                for endpoint in [&draft.source, &draft.target] {
                    let exists: bool = tx
                        .query_row(
                            "SELECT EXISTS(SELECT 1 FROM graph_entities WHERE tenant = ?1 AND id = ?2)",
                            params![tenant, endpoint.as_str()],
                            |row| row.get(0),
                        )
                        .map_err(sql_error("check_endpoint"))?;
                    if !exists {
                        return Err(Error::InvalidInput(format!(
                            "relationship endpoint {endpoint} does not exist"
                        )));
                    }
                }

                let existing = if draft.is_historical() {
                    None
                } else {
                    Self::current_relationship(
                        &tx,
                        &tenant,
                        draft.source.as_str(),
                        &draft.relation_type,
                        draft.target.as_str(),
                    )?
                };
                let mut rel = match existing {
                    Some(mut rel) => {
                        rel.absorb(draft);
                        rel
                    },
                    None => Relationship::from_draft(draft, truncate_micros(Utc::now())),
                };
                rel.validity = ValidityInterval::new(
                    truncate_micros(rel.valid_at()),
                    truncate_micros(rel.invalid_at()),
                )?;
                Self::write_relationship(&tx, &rel)?;
                tx.commit().map_err(sql_error("commit_merge_relationship"))?;
                Ok(rel)
            })
            .await?;

        metrics::counter!("graph_relationships_stored_total").increment(1);
        Ok(stored)
    }

    async fn query_relationships(
        &self,
        tenant: &TenantId,
        query: &RelationshipQuery,
    ) -> Result<Vec<Relationship>> {
        let mut clauses = vec!["tenant = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql + Send>> = vec![Box::new(tenant.to_string())];

        if let Some(source) = &query.source {
            clauses.push("source_id = ?".to_string());
            params.push(Box::new(source.to_string()));
        }
        if let Some(target) = &query.target {
            clauses.push("target_id = ?".to_string());
            params.push(Box::new(target.to_string()));
        }
        if let Some(id) = &query.touching {
            clauses.push("(source_id = ? OR target_id = ?)".to_string());
            params.push(Box::new(id.to_string()));
            params.push(Box::new(id.to_string()));
        }
        if let Some(relation_type) = &query.relation_type {
            clauses.push("relation_type = ?".to_string());
            params.push(Box::new(relation_type.clone()));
        }
        match query.temporal {
            TemporalFilter::Current => clauses.push("invalid_at IS NULL".to_string()),
            TemporalFilter::AsOf(at) => {
                clauses.push(
                    "(valid_at IS NULL OR valid_at <= ?) AND (invalid_at IS NULL OR invalid_at > ?)"
                        .to_string(),
                );
                params.push(Box::new(to_micros(at)));
                params.push(Box::new(to_micros(at)));
            },
            TemporalFilter::All => {},
        }

        let mut sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships WHERE {}
             ORDER BY valid_at IS NULL, valid_at DESC, id",
            clauses.join(" AND ")
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.with_conn("query_relationships", move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_error("query_relationships"))?;
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref() as &dyn ToSql).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), Self::parse_relationship_row)
                .map_err(sql_error("query_relationships"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("query_relationships"))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn invalidate_relationship(
        &self,
        tenant: &TenantId,
        source: &EntityId,
        relation_type: &str,
        target: &EntityId,
        at: DateTime<Utc>,
    ) -> Result<InvalidateOutcome> {
        let (tenant, source, target) = (tenant.to_string(), source.to_string(), target.to_string());
        let relation_type = relation_type.to_string();
        self.with_conn("invalidate_relationship", move |conn| {
            let tx = conn.transaction().map_err(sql_error("begin_invalidate"))?;
            let Some(mut rel) =
                Self::current_relationship(&tx, &tenant, &source, &relation_type, &target)?
            else {
                return Ok(InvalidateOutcome::NotFound);
            };
            rel.validity = rel.validity.closed_at(truncate_micros(at));
            Self::write_relationship(&tx, &rel)?;
            tx.commit().map_err(sql_error("commit_invalidate"))?;
            Ok(InvalidateOutcome::Invalidated(rel))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn hard_delete_entity(
        &self,
        tenant: &TenantId,
        id: &EntityId,
        detach: bool,
    ) -> Result<DeletionReport> {
        let (tenant, id) = (tenant.to_string(), id.to_string());
        self.with_conn("hard_delete_entity", move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM graph_entities WHERE tenant = ?1 AND id = ?2)",
                    params![tenant, id],
                    |row| row.get(0),
                )
                .map_err(sql_error("hard_delete_entity"))?;
            if !exists {
                return Ok(DeletionReport::default());
            }

            let incident: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM graph_relationships
                     WHERE tenant = ?1 AND (source_id = ?2 OR target_id = ?2)",
                    params![tenant, id],
                    |row| row.get(0),
                )
                .map_err(sql_error("count_incident_relationships"))?;
            if incident > 0 && !detach {
                return Err(Error::InvalidInput(format!(
                    "entity {id} still has {incident} relationships; delete with detach"
                )));
            }
            Self::delete_entities(conn, &tenant, &[id])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_stale_entities(
        &self,
        tenant: &TenantId,
        source_prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<DeletionReport> {
        let (tenant, prefix) = (tenant.to_string(), source_prefix.to_string());
        self.with_conn("delete_stale_entities", move |conn| {
            let stale: Vec<String> = {
                let mut stmt = conn
                    .prepare(
                        "SELECT id FROM graph_entities
                         WHERE tenant = ?1
                           AND substr(source, 1, length(?2)) = ?2
                           AND (last_indexed_at IS NULL OR last_indexed_at < ?3)",
                    )
                    .map_err(sql_error("find_stale_entities"))?;
                let rows = stmt
                    .query_map(params![tenant, prefix, to_micros(fresh_since)], |row| row.get(0))
                    .map_err(sql_error("find_stale_entities"))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(sql_error("find_stale_entities"))?
            };
            Self::delete_entities(conn, &tenant, &stale)
        })
        .await
    }
}

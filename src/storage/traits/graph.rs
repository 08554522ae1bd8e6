//! Graph store trait for the temporal knowledge graph.
//!
//! The store persists entities and relationships with merge-on-write
//! semantics. It is addressed with typed operations rather than a query
//! language.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | `SqliteGraphStore` | Default; embedded | Unique merge-key indexes, `name_close` SQL function |
//! | `InMemoryGraphStore` | Testing | Fast, no persistence |
//!
//! # Merge Semantics
//!
//! | Operation | Merge Key | On Conflict |
//! |-----------|-----------|-------------|
//! | `merge_entity` | `(tenant, name, entity_type, source)` | Refresh mutable fields, keep id and `created_at` |
//! | `merge_relationship` | `(tenant, source, target, relation_type)` among current edges | Refresh fact, summary, embedding; `valid_at` only moves forward |
//!
//! A relationship draft with a closed interval is history: it is always
//! inserted as a new edge.
//!
//! An invalidated relationship is never resurrected: re-asserting it creates a
//! new edge and the closed one stays as history.
//!
//! # Error Modes and Guarantees
//!
//! All backends return `Result<T>` with errors propagated via [`crate::Error`].
//! Reads return `Ok(None)` or an empty `Vec` when nothing matches; only
//! backend failures are errors.

use crate::Result;
use crate::models::{
    DeletionReport, Entity, EntityDraft, EntityId, InvalidateOutcome, Relationship,
    RelationshipDraft, RelationshipQuery, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for knowledge graph stores.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn GraphStore>`
/// - Use interior mutability for mutable state and never hold a lock across `.await`
/// - Every operation is scoped to one tenant
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts or refreshes an entity by merge key.
    ///
    /// The draft's `proposed_id` is used only on insert. Returns the stored
    /// entity; callers must use its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn merge_entity(&self, draft: EntityDraft) -> Result<Entity>;

    /// Retrieves an entity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn get_entity(&self, tenant: &TenantId, id: &EntityId) -> Result<Option<Entity>>;

    /// Finds entities whose normalized name equals `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn entities_by_name(&self, tenant: &TenantId, name: &str) -> Result<Vec<Entity>>;

    /// Collects resolution candidates for a batch of names in one lookup.
    ///
    /// Returns entities whose name is close to any of `names` (see
    /// [`crate::models::resolution::names_are_close`]), without duplicates, at
    /// most `limit` of them. Closest names come first (exact normalized
    /// matches, then by [`crate::models::resolution::candidate_rank`]) so the
    /// limit never drops an exact match in favour of a looser one.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn find_candidates(
        &self,
        tenant: &TenantId,
        names: &[String],
        max_distance: usize,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Inserts or refreshes a currently valid relationship.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if either endpoint does not exist
    /// in the tenant, or an error if the write fails.
    async fn merge_relationship(&self, draft: RelationshipDraft) -> Result<Relationship>;

    /// Queries relationships.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn query_relationships(
        &self,
        tenant: &TenantId,
        query: &RelationshipQuery,
    ) -> Result<Vec<Relationship>>;

    /// Closes the currently valid edge `(source, relation_type, target)` at
    /// `at`, clamped to its `valid_at`. The edge itself is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn invalidate_relationship(
        &self,
        tenant: &TenantId,
        source: &EntityId,
        relation_type: &str,
        target: &EntityId,
        at: DateTime<Utc>,
    ) -> Result<InvalidateOutcome>;

    /// Physically removes an entity. This cannot be undone.
    ///
    /// With `detach`, incident relationships are removed too; without it the
    /// call fails if any exist. A missing entity yields an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for a non-detached delete of a
    /// connected entity, or an error if the write fails.
    async fn hard_delete_entity(
        &self,
        tenant: &TenantId,
        id: &EntityId,
        detach: bool,
    ) -> Result<DeletionReport>;

    /// Removes entities under `source_prefix` not refreshed since
    /// `fresh_since`, with their relationships. This cannot be undone.
    ///
    /// Entities without a `last_indexed_at` stamp count as stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn delete_stale_entities(
        &self,
        tenant: &TenantId,
        source_prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<DeletionReport>;
}

//! Fact store: the bi-temporal knowledge graph facade.
//!
//! Wraps a [`GraphStore`] with validation, summary truncation, logging and
//! metrics. Every call is scoped to a [`TenantId`].
//!
//! # Lifecycle
//!
//! | Operation | Effect | Reversible |
//! |-----------|--------|------------|
//! | [`FactStore::save_relationship`] | Creates or refreshes a current edge | Yes |
//! | [`FactStore::invalidate_fact`] | Closes the current edge, keeps history | History kept |
//! | [`FactStore::hard_delete_entity`] | Physically removes an entity | **No** |
//! | [`FactStore::cleanup_stale`] | Physically removes unrefreshed entities | **No** |

use crate::models::{
    DeletionReport, Entity, EntityDraft, EntityId, InvalidateOutcome, Relationship,
    RelationshipDraft, RelationshipQuery, TenantId, truncate_summary,
};
use crate::storage::GraphStore;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::instrument;

/// Bi-temporal fact store over a [`GraphStore`].
#[derive(Clone)]
pub struct FactStore {
    graph: Arc<dyn GraphStore>,
}

impl FactStore {
    /// Creates a fact store over `graph`.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Returns the underlying graph store.
    #[must_use]
    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Merges an entity on `(name, entity_type, tenant, source)`.
    ///
    /// The first write uses the draft's proposed id; repeated writes keep the
    /// stored id and `created_at`. Always use the returned entity's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank name or type, otherwise
    /// store errors.
    #[instrument(skip(self, draft), fields(tenant = %draft.tenant, name = %draft.name))]
    pub async fn save_entity(&self, mut draft: EntityDraft) -> Result<Entity> {
        if draft.name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be blank".to_string()));
        }
        if draft.entity_type.trim().is_empty() {
            return Err(Error::InvalidInput("entity type must not be blank".to_string()));
        }
        draft.summary = truncate_summary(&draft.summary);

        let entity = self.graph.merge_entity(draft).await?;
        metrics::counter!("memory_fact_writes_total", "kind" => "entity").increment(1);
        Ok(entity)
    }

    /// Merges a relationship among currently valid edges with the same
    /// `(source, target, relation_type, tenant)`.
    ///
    /// An invalidated edge is never resurrected; re-asserting it creates a
    /// new edge. A draft with a closed interval is stored as its own
    /// historical edge and leaves the current one untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank relation type or when an
    /// endpoint does not exist in the tenant.
    #[instrument(skip(self, draft), fields(tenant = %draft.tenant, relation_type = %draft.relation_type))]
    pub async fn save_relationship(&self, mut draft: RelationshipDraft) -> Result<Relationship> {
        if draft.relation_type.trim().is_empty() {
            return Err(Error::InvalidInput("relation type must not be blank".to_string()));
        }
        draft.summary = draft.summary.as_deref().map(truncate_summary);

        let relationship = self.graph.merge_relationship(draft).await?;
        metrics::counter!("memory_fact_writes_total", "kind" => "relationship").increment(1);
        Ok(relationship)
    }

    /// Closes the currently valid `(source, relation_type, target)` edge at
    /// `at` (default now), clamped so it never ends before it started.
    ///
    /// Returns [`InvalidateOutcome::NotFound`] when no current edge matches;
    /// the edge itself is kept as history.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub async fn invalidate_fact(
        &self,
        tenant: &TenantId,
        source: &EntityId,
        relation_type: &str,
        target: &EntityId,
        at: Option<DateTime<Utc>>,
    ) -> Result<InvalidateOutcome> {
        let at = at.unwrap_or_else(Utc::now);
        let outcome = self
            .graph
            .invalidate_relationship(tenant, source, relation_type, target, at)
            .await?;

        let status = if outcome.is_invalidated() {
            "invalidated"
        } else {
            "not_found"
        };
        metrics::counter!("memory_fact_invalidations_total", "status" => status).increment(1);
        tracing::debug!(status, "Invalidated fact");
        Ok(outcome)
    }

    /// Physically deletes an entity. **This cannot be undone.**
    ///
    /// With `detach`, incident relationships are deleted too. Without it the
    /// call refuses when any exist. Returns zero counts when the entity is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when relationships exist and `detach`
    /// is false.
    #[instrument(skip(self))]
    pub async fn hard_delete_entity(
        &self,
        tenant: &TenantId,
        id: &EntityId,
        detach: bool,
    ) -> Result<DeletionReport> {
        let report = self.graph.hard_delete_entity(tenant, id, detach).await?;
        tracing::info!(
            entities = report.entities_removed,
            relationships = report.relationships_removed,
            "Hard-deleted entity"
        );
        Ok(report)
    }

    /// Deletes entities under `scope_prefix` that were not refreshed since
    /// `fresh_since`, with their relationships. **This cannot be undone.**
    ///
    /// Entities without a freshness stamp count as stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub async fn cleanup_stale(
        &self,
        tenant: &TenantId,
        scope_prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<DeletionReport> {
        let report = self
            .graph
            .delete_stale_entities(tenant, scope_prefix, fresh_since)
            .await?;
        metrics::counter!("memory_stale_entities_removed_total")
            .increment(report.entities_removed as u64);
        tracing::info!(
            entities = report.entities_removed,
            relationships = report.relationships_removed,
            scope = scope_prefix,
            "Cleaned up stale entities"
        );
        Ok(report)
    }

    /// Looks up an entity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn entity(&self, tenant: &TenantId, id: &EntityId) -> Result<Option<Entity>> {
        self.graph.get_entity(tenant, id).await
    }

    /// Entities whose normalized name equals `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn entities_by_name(&self, tenant: &TenantId, name: &str) -> Result<Vec<Entity>> {
        self.graph.entities_by_name(tenant, name).await
    }

    /// Relationships matching `query`, including historical ones when the
    /// query's temporal filter asks for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn relationships(
        &self,
        tenant: &TenantId,
        query: &RelationshipQuery,
    ) -> Result<Vec<Relationship>> {
        self.graph.query_relationships(tenant, query).await
    }

    /// Currently valid relationships touching `id` in either direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn neighbors(&self, tenant: &TenantId, id: &EntityId) -> Result<Vec<Relationship>> {
        self.graph
            .query_relationships(tenant, &RelationshipQuery::new().touching(id.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MAX_SUMMARY_CHARS, STILL_VALID, TemporalFilter};
    use crate::storage::InMemoryGraphStore;
    use chrono::Duration;

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    fn store() -> FactStore {
        FactStore::new(Arc::new(InMemoryGraphStore::new()))
    }

    async fn pair(store: &FactStore) -> (Entity, Entity) {
        let alice = store
            .save_entity(EntityDraft::new(tenant(), "Alice", "Person"))
            .await
            .unwrap();
        let acme = store
            .save_entity(EntityDraft::new(tenant(), "Acme", "Organization"))
            .await
            .unwrap();
        (alice, acme)
    }

    #[tokio::test]
    async fn test_save_entity_truncates_summary() {
        let store = store();
        let entity = store
            .save_entity(EntityDraft::new(tenant(), "Alice", "Person").with_summary(&"a".repeat(900)))
            .await
            .unwrap();
        assert_eq!(entity.summary.chars().count(), MAX_SUMMARY_CHARS);
    }

    #[tokio::test]
    async fn test_save_entity_rejects_blank_name() {
        let err = store()
            .save_entity(EntityDraft::new(tenant(), "  ", "Person"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_repeated_save_is_idempotent() {
        let store = store();
        let (alice, _) = pair(&store).await;
        let again = store
            .save_entity(EntityDraft::new(tenant(), "Alice", "Person"))
            .await
            .unwrap();
        assert_eq!(again.id, alice.id);
        assert_eq!(store.entities_by_name(&tenant(), "alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_history() {
        let store = store();
        let (alice, acme) = pair(&store).await;
        let started = Utc::now() - Duration::days(10);
        let edge = store
            .save_relationship(
                RelationshipDraft::new(tenant(), alice.id.clone(), "WORKS_AT", acme.id.clone(), "Alice works at Acme")
                    .valid_since(started),
            )
            .await
            .unwrap();
        assert_eq!(edge.invalid_at(), STILL_VALID);

        let ended = Utc::now() - Duration::days(1);
        let outcome = store
            .invalidate_fact(&tenant(), &alice.id, "WORKS_AT", &acme.id, Some(ended))
            .await
            .unwrap();
        assert!(outcome.is_invalidated());

        assert!(store.neighbors(&tenant(), &alice.id).await.unwrap().is_empty());
        let history = store
            .relationships(
                &tenant(),
                &RelationshipQuery::new().from_entity(alice.id.clone()).with_temporal(TemporalFilter::All),
            )
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].invalid_at(), ended);
        assert!(history[0].is_valid_at(ended - Duration::days(2)));
    }

    #[tokio::test]
    async fn test_invalidate_missing_is_not_found() {
        let store = store();
        let (alice, acme) = pair(&store).await;
        let outcome = store
            .invalidate_fact(&tenant(), &alice.id, "WORKS_AT", &acme.id, None)
            .await
            .unwrap();
        assert_eq!(outcome, InvalidateOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_invalidate_before_start_is_clamped() {
        let store = store();
        let (alice, acme) = pair(&store).await;
        let started = Utc::now();
        store
            .save_relationship(
                RelationshipDraft::new(tenant(), alice.id.clone(), "KNOWS", acme.id.clone(), "x").valid_since(started),
            )
            .await
            .unwrap();

        let outcome = store
            .invalidate_fact(&tenant(), &alice.id, "KNOWS", &acme.id, Some(started - Duration::days(5)))
            .await
            .unwrap();
        match outcome {
            InvalidateOutcome::Invalidated(rel) => assert_eq!(rel.invalid_at(), rel.valid_at()),
            InvalidateOutcome::NotFound => unreachable!("edge exists"),
        }
    }

    #[tokio::test]
    async fn test_save_relationship_rejects_missing_endpoint() {
        let store = store();
        let (alice, _) = pair(&store).await;
        let err = store
            .save_relationship(RelationshipDraft::new(tenant(), alice.id, "KNOWS", EntityId::generate(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

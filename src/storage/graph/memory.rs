//! In-memory graph store for testing.
//!
//! Provides a fast, non-persistent implementation of [`GraphStore`] for use
//! in unit tests and development scenarios.

use crate::models::resolution::{candidate_rank, names_are_close, normalize_name};
use crate::models::{
    DeletionReport, Entity, EntityDraft, EntityId, InvalidateOutcome, Relationship,
    RelationshipDraft, RelationshipQuery, TenantId,
};
use crate::storage::traits::GraphStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

#[derive(Debug, Default)]
struct GraphState {
    entities: HashMap<EntityId, Entity>,
    relationships: Vec<Relationship>,
}

impl GraphState {
    fn entity_in(&self, tenant: &TenantId, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id).filter(|e| &e.tenant == tenant)
    }

    /// Removes the given entities and every incident relationship.
    fn remove_entities(&mut self, ids: &HashSet<EntityId>) -> DeletionReport {
        let before = self.relationships.len();
        self.relationships
            .retain(|r| !ids.contains(&r.source) && !ids.contains(&r.target));
        let entities_removed = ids
            .iter()
            .filter(|id| self.entities.remove(*id).is_some())
            .count();
        DeletionReport {
            entities_removed,
            relationships_removed: before - self.relationships.len(),
        }
    }
}

/// In-memory graph store for testing.
///
/// A single `RwLock` guards entities and relationships together so merges
/// are atomic with respect to each other. Data is not persisted.
///
/// # Example
///
/// ```rust,ignore
/// use gromozeka_memory::storage::graph::InMemoryGraphStore;
///
/// let store = InMemoryGraphStore::new();
/// // Use for testing...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entities stored, across tenants.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state.read().map(|s| s.entities.len()).unwrap_or(0)
    }

    /// Returns the number of relationships stored, including invalidated ones.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.state.read().map(|s| s.relationships.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state.read().map_err(|e| Error::OperationFailed {
            operation: "graph_read".to_string(),
            cause: format!("Lock poisoned: {e}"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state.write().map_err(|e| Error::OperationFailed {
            operation: "graph_write".to_string(),
            cause: format!("Lock poisoned: {e}"),
        })
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    #[instrument(skip(self, draft), fields(name = %draft.name, entity_type = %draft.entity_type))]
    async fn merge_entity(&self, draft: EntityDraft) -> Result<Entity> {
        let mut state = self.write()?;
        let existing = state.entities.values_mut().find(|e| {
            e.tenant == draft.tenant
                && e.name == draft.name
                && e.entity_type == draft.entity_type
                && e.source == draft.source
        });

        let stored = match existing {
            Some(entity) => {
                entity.absorb(draft);
                entity.clone()
            },
            None => {
                let entity = Entity::from_draft(draft, Utc::now());
                state.entities.insert(entity.id.clone(), entity.clone());
                entity
            },
        };
        Ok(stored)
    }

    async fn get_entity(&self, tenant: &TenantId, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.read()?.entity_in(tenant, id).cloned())
    }

    async fn entities_by_name(&self, tenant: &TenantId, name: &str) -> Result<Vec<Entity>> {
        let wanted = normalize_name(name);
        let state = self.read()?;
        let mut found: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| &e.tenant == tenant && normalize_name(&e.name) == wanted)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    #[instrument(skip(self, names), fields(names = names.len()))]
    async fn find_candidates(
        &self,
        tenant: &TenantId,
        names: &[String],
        max_distance: usize,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let state = self.read()?;
        let mut found: Vec<(usize, Entity)> = state
            .entities
            .values()
            .filter(|e| &e.tenant == tenant)
            .filter(|e| names.iter().any(|n| names_are_close(n, &e.name, max_distance)))
            .map(|e| (candidate_rank(&e.name, names), e.clone()))
            .collect();
        found.sort_by(|(ra, a), (rb, b)| {
            ra.cmp(rb)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        found.truncate(limit);
        Ok(found.into_iter().map(|(_, e)| e).collect())
    }

    #[instrument(skip(self, draft), fields(relation_type = %draft.relation_type))]
    async fn merge_relationship(&self, draft: RelationshipDraft) -> Result<Relationship> {
        let mut state = self.write()?;
        for endpoint in [&draft.source, &draft.target] {
            if state.entity_in(&draft.tenant, endpoint).is_none() {
                return Err(Error::InvalidInput(format!(
                    "relationship endpoint {endpoint} does not exist"
                )));
            }
        }

        let existing = if draft.is_historical() {
            None
        } else {
            state.relationships.iter_mut().find(|r| {
                r.tenant == draft.tenant
                    && r.source == draft.source
                    && r.target == draft.target
                    && r.relation_type == draft.relation_type
                    && r.is_current()
            })
        };

        let stored = match existing {
            Some(rel) => {
                rel.absorb(draft);
                rel.clone()
            },
            None => {
                let rel = Relationship::from_draft(draft, Utc::now());
                state.relationships.push(rel.clone());
                rel
            },
        };
        Ok(stored)
    }

    async fn query_relationships(
        &self,
        tenant: &TenantId,
        query: &RelationshipQuery,
    ) -> Result<Vec<Relationship>> {
        let state = self.read()?;
        let mut found: Vec<Relationship> = state
            .relationships
            .iter()
            .filter(|r| &r.tenant == tenant && query.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.valid_at().cmp(&a.valid_at()).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
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
        let mut state = self.write()?;
        let current = state.relationships.iter_mut().find(|r| {
            &r.tenant == tenant
                && &r.source == source
                && &r.target == target
                && r.relation_type == relation_type
                && r.is_current()
        });
        Ok(match current {
            Some(rel) => {
                rel.validity = rel.validity.closed_at(at);
                InvalidateOutcome::Invalidated(rel.clone())
            },
            None => InvalidateOutcome::NotFound,
        })
    }

    #[instrument(skip(self))]
    async fn hard_delete_entity(
        &self,
        tenant: &TenantId,
        id: &EntityId,
        detach: bool,
    ) -> Result<DeletionReport> {
        let mut state = self.write()?;
        if state.entity_in(tenant, id).is_none() {
            return Ok(DeletionReport::default());
        }
        let incident = state.relationships.iter().filter(|r| r.touches(id)).count();
        if incident > 0 && !detach {
            return Err(Error::InvalidInput(format!(
                "entity {id} still has {incident} relationships; delete with detach"
            )));
        }
        Ok(state.remove_entities(&HashSet::from([id.clone()])))
    }

    #[instrument(skip(self))]
    async fn delete_stale_entities(
        &self,
        tenant: &TenantId,
        source_prefix: &str,
        fresh_since: DateTime<Utc>,
    ) -> Result<DeletionReport> {
        let mut state = self.write()?;
        let stale: HashSet<EntityId> = state
            .entities
            .values()
            .filter(|e| {
                &e.tenant == tenant
                    && e.source.starts_with(source_prefix)
                    && e.last_indexed_at.is_none_or(|t| t < fresh_since)
            })
            .map(|e| e.id.clone())
            .collect();
        Ok(state.remove_entities(&stale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    async fn entity(store: &InMemoryGraphStore, name: &str) -> Entity {
        store
            .merge_entity(EntityDraft::new(tenant(), name, "Technology"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_merge_entity_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let first = entity(&store, "Kotlin").await;
        let second = store
            .merge_entity(EntityDraft::new(tenant(), "Kotlin", "Technology").with_summary("JVM"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.summary, "JVM");
        assert_eq!(store.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_key_includes_tenant_and_source() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "Kotlin").await;
        let b = store
            .merge_entity(EntityDraft::new(TenantId::new("t2"), "Kotlin", "Technology"))
            .await
            .unwrap();
        let c = store
            .merge_entity(EntityDraft::new(tenant(), "Kotlin", "Technology").with_source("repo:a"))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(store.get_entity(&tenant(), &b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "Kotlin").await;
        let draft = RelationshipDraft::new(tenant(), a.id, "USES", EntityId::new("ghost"), "x");
        let err = store.merge_relationship(draft).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_reassert_after_invalidate_creates_new_edge() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "Gradle").await;
        let b = entity(&store, "Kotlin").await;
        let draft = || RelationshipDraft::new(tenant(), a.id.clone(), "USES", b.id.clone(), "Gradle uses Kotlin");

        let first = store.merge_relationship(draft()).await.unwrap();
        let again = store.merge_relationship(draft()).await.unwrap();
        assert_eq!(first.id, again.id);

        let outcome = store
            .invalidate_relationship(&tenant(), &a.id, "USES", &b.id, Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_invalidated());

        let revived = store.merge_relationship(draft()).await.unwrap();
        assert_ne!(revived.id, first.id);
        assert_eq!(store.relationship_count(), 2);
    }

    #[tokio::test]
    async fn test_hard_delete_without_detach_refuses() {
        let store = InMemoryGraphStore::new();
        let a = entity(&store, "Gradle").await;
        let b = entity(&store, "Kotlin").await;
        store
            .merge_relationship(RelationshipDraft::new(tenant(), a.id.clone(), "USES", b.id.clone(), "x"))
            .await
            .unwrap();

        assert!(store.hard_delete_entity(&tenant(), &a.id, false).await.is_err());

        let report = store.hard_delete_entity(&tenant(), &a.id, true).await.unwrap();
        assert_eq!(report.entities_removed, 1);
        assert_eq!(report.relationships_removed, 1);

        let missing = store.hard_delete_entity(&tenant(), &a.id, true).await.unwrap();
        assert_eq!(missing, DeletionReport::default());
    }

    #[tokio::test]
    async fn test_delete_stale_counts_missing_stamp_as_stale() {
        let store = InMemoryGraphStore::new();
        let cutoff = Utc::now();
        let fresh = store
            .merge_entity(
                EntityDraft::new(tenant(), "Fresh", "Concept")
                    .with_source("file:src/a.rs")
                    .with_indexed_at(Some(cutoff + Duration::seconds(5))),
            )
            .await
            .unwrap();
        store
            .merge_entity(
                EntityDraft::new(tenant(), "Old", "Concept")
                    .with_source("file:src/b.rs")
                    .with_indexed_at(Some(cutoff - Duration::days(1))),
            )
            .await
            .unwrap();
        store
            .merge_entity(
                EntityDraft::new(tenant(), "Unstamped", "Concept")
                    .with_source("file:src/c.rs")
                    .with_indexed_at(None),
            )
            .await
            .unwrap();
        store
            .merge_entity(
                EntityDraft::new(tenant(), "Elsewhere", "Concept")
                    .with_source("web:example.org")
                    .with_indexed_at(None),
            )
            .await
            .unwrap();

        let report = store
            .delete_stale_entities(&tenant(), "file:", cutoff)
            .await
            .unwrap();
        assert_eq!(report.entities_removed, 2);
        assert!(store.get_entity(&tenant(), &fresh.id).await.unwrap().is_some());
        assert_eq!(store.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_find_candidates_batches_names() {
        let store = InMemoryGraphStore::new();
        entity(&store, "Kotlin").await;
        entity(&store, "Gromozeka").await;
        entity(&store, "Python").await;

        let names = vec!["kotlin".to_string(), "Gromozeka-lib".to_string()];
        let found = store.find_candidates(&tenant(), &names, 3, 10).await.unwrap();
        let found_names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(found_names, vec!["Gromozeka", "Kotlin"]);
    }
}

//! Knowledge graph types.
//!
//! Entities are graph nodes identified by a stable UUID and merged on the key
//! `(name, entity_type, tenant, source)`. Relationships are directed edges
//! carrying a natural-language `fact` and a validity interval.
//!
//! Entities are timeless: they are always valid from [`ALWAYS_VALID_FROM`] to
//! [`STILL_VALID`]. Relationships are bi-temporal: `created_at` records when the
//! system learned the fact and [`ValidityInterval`] records when it was true.
//!
//! # Example
//!
//! ```rust
//! use gromozeka_memory::models::graph::{EntityDraft, RelationshipDraft, TenantId};
//!
//! let tenant = TenantId::new("default");
//! let alice = EntityDraft::new(tenant.clone(), "Alice", "Person")
//!     .with_summary("Backend engineer");
//! let acme = EntityDraft::new(tenant.clone(), "Acme", "Organization");
//!
//! let works_at = RelationshipDraft::new(
//!     tenant,
//!     alice.proposed_id.clone(),
//!     "WORKS_AT",
//!     acme.proposed_id.clone(),
//!     "Alice works at Acme",
//! );
//! assert!(works_at.validity.is_current());
//! ```

use super::temporal::{ALWAYS_VALID_FROM, STILL_VALID, TemporalFilter, ValidityInterval};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Maximum length of an entity or relationship summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 500;

string_id!(
    /// Opaque tenant identifier scoping every graph read and write.
    TenantId
);

string_id!(
    /// Unique identifier for a graph entity.
    EntityId
);

string_id!(
    /// Unique identifier for a relationship.
    RelationshipId
);

impl EntityId {
    /// Generates a fresh random UUID identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl RelationshipId {
    /// Generates a fresh random UUID identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Truncates a summary to [`MAX_SUMMARY_CHARS`] characters.
///
/// Truncation counts `char`s, so multi-byte text is never split mid-character.
#[must_use]
pub fn truncate_summary(summary: &str) -> String {
    let trimmed = summary.trim();
    match trimmed.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((byte_idx, _)) => trimmed[..byte_idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// A stored graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, assigned on first write.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Display name.
    pub name: String,
    /// Primary type label (part of the merge key).
    pub entity_type: String,
    /// Additional labels.
    pub labels: BTreeSet<String>,
    /// Short description, at most [`MAX_SUMMARY_CHARS`] characters.
    pub summary: String,
    /// Optional embedding of the name and summary.
    pub embedding: Option<Vec<f32>>,
    /// Free-form attributes.
    pub attributes: Map<String, Value>,
    /// Discriminating source (part of the merge key, empty when unscoped).
    pub source: String,
    /// When the system first stored this entity.
    pub created_at: DateTime<Utc>,
    /// Last time a write refreshed this entity. `None` counts as stale.
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Entities are valid since the beginning of time.
    #[must_use]
    pub const fn valid_at(&self) -> DateTime<Utc> {
        ALWAYS_VALID_FROM
    }

    /// Entities are never invalidated.
    #[must_use]
    pub const fn invalid_at(&self) -> DateTime<Utc> {
        STILL_VALID
    }

    /// Checks the primary type and labels for `type_label`, case-insensitively.
    #[must_use]
    pub fn has_type(&self, type_label: &str) -> bool {
        self.entity_type.eq_ignore_ascii_case(type_label)
            || self
                .labels
                .iter()
                .any(|label| label.eq_ignore_ascii_case(type_label))
    }

    /// Builds the stored entity for a first write of `draft`.
    #[must_use]
    pub fn from_draft(draft: EntityDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.proposed_id,
            tenant: draft.tenant,
            name: draft.name,
            entity_type: draft.entity_type,
            labels: draft.labels,
            summary: draft.summary,
            embedding: draft.embedding,
            attributes: draft.attributes,
            source: draft.source,
            created_at: now,
            last_indexed_at: draft.indexed_at,
        }
    }

    /// Applies a repeated write: mutable fields are last-write-wins, the id
    /// and `created_at` are kept.
    pub fn absorb(&mut self, draft: EntityDraft) {
        self.labels = draft.labels;
        self.summary = draft.summary;
        if draft.embedding.is_some() {
            self.embedding = draft.embedding;
        }
        self.attributes.extend(draft.attributes);
        if draft.indexed_at.is_some() {
            self.last_indexed_at = draft.indexed_at;
        }
    }
}

/// An entity write request.
///
/// `proposed_id` is only used when the merge key is new; otherwise the stored
/// entity keeps its original id and callers must use the returned one.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    /// Identifier used if this write inserts a new entity.
    pub proposed_id: EntityId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Display name.
    pub name: String,
    /// Primary type label.
    pub entity_type: String,
    /// Labels; always includes `entity_type`.
    pub labels: BTreeSet<String>,
    /// Summary, truncated on construction.
    pub summary: String,
    /// Optional embedding.
    pub embedding: Option<Vec<f32>>,
    /// Attributes to merge into the stored map.
    pub attributes: Map<String, Value>,
    /// Discriminating source.
    pub source: String,
    /// Freshness stamp written with this draft.
    pub indexed_at: Option<DateTime<Utc>>,
}

impl EntityDraft {
    /// Creates a draft with a freshly generated proposed id.
    #[must_use]
    pub fn new(tenant: TenantId, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let mut labels = BTreeSet::new();
        labels.insert(entity_type.clone());
        Self {
            proposed_id: EntityId::generate(),
            tenant,
            name: name.into().trim().to_string(),
            entity_type,
            labels,
            summary: String::new(),
            embedding: None,
            attributes: Map::new(),
            source: String::new(),
            indexed_at: Some(Utc::now()),
        }
    }

    /// Sets the id used on insert.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.proposed_id = id;
        self
    }

    /// Sets the summary, truncated to [`MAX_SUMMARY_CHARS`].
    #[must_use]
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = truncate_summary(summary);
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Sets the embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sets the discriminating source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Overrides the freshness stamp. `None` leaves the stored stamp untouched.
    #[must_use]
    pub const fn with_indexed_at(mut self, indexed_at: Option<DateTime<Utc>>) -> Self {
        self.indexed_at = indexed_at;
        self
    }
}

/// A stored directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Stable identifier.
    pub id: RelationshipId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Source entity.
    pub source: EntityId,
    /// Target entity.
    pub target: EntityId,
    /// Free-text relation type, e.g. `WORKS_AT`.
    pub relation_type: String,
    /// Natural-language statement of the fact.
    pub fact: String,
    /// Optional summary.
    pub summary: Option<String>,
    /// Optional embedding of the fact.
    pub embedding: Option<Vec<f32>>,
    /// When the system recorded this edge.
    pub created_at: DateTime<Utc>,
    /// When the fact was true.
    pub validity: ValidityInterval,
}

impl Relationship {
    /// Builds the stored edge for a first write of `draft`.
    #[must_use]
    pub fn from_draft(draft: RelationshipDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.proposed_id,
            tenant: draft.tenant,
            source: draft.source,
            target: draft.target,
            relation_type: draft.relation_type,
            fact: draft.fact,
            summary: draft.summary,
            embedding: draft.embedding,
            created_at: now,
            validity: draft.validity,
        }
    }

    /// Applies a re-assertion of the same currently valid fact.
    ///
    /// The start of validity only moves forward. Historical drafts are never
    /// absorbed, see [`RelationshipDraft::is_historical`].
    pub fn absorb(&mut self, draft: RelationshipDraft) {
        self.fact = draft.fact;
        if draft.summary.is_some() {
            self.summary = draft.summary;
        }
        if draft.embedding.is_some() {
            self.embedding = draft.embedding;
        }
        if draft.validity.valid_at() > self.valid_at() {
            self.validity = ValidityInterval::since(draft.validity.valid_at());
        }
    }

    /// Start of validity.
    #[must_use]
    pub const fn valid_at(&self) -> DateTime<Utc> {
        self.validity.valid_at()
    }

    /// End of validity, or [`STILL_VALID`].
    #[must_use]
    pub const fn invalid_at(&self) -> DateTime<Utc> {
        self.validity.invalid_at()
    }

    /// Whether the fact has not been invalidated.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.validity.is_current()
    }

    /// Whether the fact was true at `at`.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.validity.contains(at)
    }

    /// Whether this edge touches `entity`.
    #[must_use]
    pub fn touches(&self, entity: &EntityId) -> bool {
        &self.source == entity || &self.target == entity
    }
}

/// A relationship write request, merged on `(source, target, relation_type,
/// tenant)` among currently valid edges.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDraft {
    /// Identifier used if this write inserts a new edge.
    pub proposed_id: RelationshipId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Source entity.
    pub source: EntityId,
    /// Target entity.
    pub target: EntityId,
    /// Relation type.
    pub relation_type: String,
    /// Fact text.
    pub fact: String,
    /// Optional summary.
    pub summary: Option<String>,
    /// Optional embedding.
    pub embedding: Option<Vec<f32>>,
    /// Validity interval; open-ended from now by default.
    pub validity: ValidityInterval,
}

impl RelationshipDraft {
    /// Creates a draft that is valid from now on.
    #[must_use]
    pub fn new(
        tenant: TenantId,
        source: EntityId,
        relation_type: impl Into<String>,
        target: EntityId,
        fact: impl Into<String>,
    ) -> Self {
        Self {
            proposed_id: RelationshipId::generate(),
            tenant,
            source,
            target,
            relation_type: relation_type.into(),
            fact: fact.into(),
            summary: None,
            embedding: None,
            validity: ValidityInterval::since(Utc::now()),
        }
    }

    /// Sets the validity start, keeping the interval open.
    #[must_use]
    pub const fn valid_since(mut self, valid_at: DateTime<Utc>) -> Self {
        self.validity = ValidityInterval::since(valid_at);
        self
    }

    /// Sets an explicit interval.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if `valid_at` is after a
    /// non-sentinel `invalid_at`.
    pub fn with_interval(mut self, valid_at: DateTime<Utc>, invalid_at: DateTime<Utc>) -> Result<Self> {
        self.validity = ValidityInterval::new(valid_at, invalid_at)?;
        Ok(self)
    }

    /// Sets the summary, truncated to [`MAX_SUMMARY_CHARS`].
    #[must_use]
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(truncate_summary(summary));
        self
    }

    /// Sets the embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the id used on insert.
    #[must_use]
    pub fn with_id(mut self, id: RelationshipId) -> Self {
        self.proposed_id = id;
        self
    }

    /// Whether the draft records a fact that has already stopped being true.
    ///
    /// Historical drafts are stored as their own edge and never merged into
    /// the currently valid one.
    #[must_use]
    pub fn is_historical(&self) -> bool {
        !self.validity.is_current()
    }
}

/// Query parameters for relationship reads.
#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
    /// Restrict to edges leaving this entity.
    pub source: Option<EntityId>,
    /// Restrict to edges entering this entity.
    pub target: Option<EntityId>,
    /// Restrict to edges touching this entity from either side.
    pub touching: Option<EntityId>,
    /// Restrict to this relation type (exact match).
    pub relation_type: Option<String>,
    /// Slice of history to read.
    pub temporal: TemporalFilter,
    /// Maximum results.
    pub limit: Option<usize>,
}

impl RelationshipQuery {
    /// Creates a query over currently valid edges.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by source entity.
    #[must_use]
    pub fn from_entity(mut self, id: EntityId) -> Self {
        self.source = Some(id);
        self
    }

    /// Filters by target entity.
    #[must_use]
    pub fn to_entity(mut self, id: EntityId) -> Self {
        self.target = Some(id);
        self
    }

    /// Filters by either endpoint.
    #[must_use]
    pub fn touching(mut self, id: EntityId) -> Self {
        self.touching = Some(id);
        self
    }

    /// Filters by relation type.
    #[must_use]
    pub fn with_type(mut self, relation_type: impl Into<String>) -> Self {
        self.relation_type = Some(relation_type.into());
        self
    }

    /// Sets the temporal slice.
    #[must_use]
    pub const fn with_temporal(mut self, temporal: TemporalFilter) -> Self {
        self.temporal = temporal;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks a relationship against every filter.
    #[must_use]
    pub fn matches(&self, rel: &Relationship) -> bool {
        self.source.as_ref().is_none_or(|id| &rel.source == id)
            && self.target.as_ref().is_none_or(|id| &rel.target == id)
            && self.touching.as_ref().is_none_or(|id| rel.touches(id))
            && self
                .relation_type
                .as_ref()
                .is_none_or(|t| &rel.relation_type == t)
            && self.temporal.admits(&rel.validity)
    }
}

/// Result of invalidating a fact.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidateOutcome {
    /// The currently valid edge was closed; carries the updated edge.
    Invalidated(Relationship),
    /// No currently valid edge matched.
    NotFound,
}

impl InvalidateOutcome {
    /// Whether an edge was invalidated.
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated(_))
    }
}

/// Counts of physically removed graph elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Entities removed.
    pub entities_removed: usize,
    /// Relationships removed.
    pub relationships_removed: usize,
}

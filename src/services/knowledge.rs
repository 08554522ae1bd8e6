//! Knowledge ingest: extraction, resolution and fact writes for one event.
//!
//! ```text
//! text ──► MentionExtractor ──► EntityResolver ──► FactStore
//!                                    │                 │
//!                         (one LLM call at most)   new entities get an
//!                                                  LLM summary + embedding
//! ```
//!
//! Summaries for every new entity of one ingest come from a single LLM call:
//!
//! ```json
//! {"summaries": [{"id": 0, "summary": "Gradle is a build tool."}]}
//! ```
//!
//! `id` is the entity's position in the prompt. Missing or malformed entries
//! leave that entity's summary empty.

use crate::config::ResolutionConfig;
use crate::embedding::Embedder;
use crate::llm::{LlmProvider, complete_within, extract_json_from_response};
use crate::models::{
    Entity, EntityDraft, EntityId, EntityTypeCatalog, ExtractedMention, Extraction,
    Relationship, RelationshipDraft, Resolution, TenantId,
};
use crate::services::{EntityResolver, FactStore, MentionExtractor};
use crate::storage::GraphStore;
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize each listed entity in one or two sentences, \
using only the given context. Respond with JSON only, in this shape:
{\"summaries\":[{\"id\":0,\"summary\":\"...\"}]}
`id` is the number in front of the entity.";

#[derive(Debug, Deserialize)]
struct RawSummaries {
    #[serde(default)]
    summaries: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    id: usize,
    summary: String,
}

/// Parses a batched summary response into position -> summary.
///
/// Entries with unknown positions, blank text or a repeated id are dropped.
fn parse_summaries(response: &str, count: usize) -> HashMap<usize, String> {
    let raw: RawSummaries = match serde_json::from_str(extract_json_from_response(response)) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable summary response");
            return HashMap::new();
        },
    };

    let mut summaries = HashMap::new();
    for value in raw.summaries {
        let Ok(entry) = serde_json::from_value::<RawSummary>(value) else {
            tracing::debug!("Dropping malformed summary entry");
            continue;
        };
        let text = entry.summary.trim();
        if entry.id >= count || text.is_empty() || summaries.contains_key(&entry.id) {
            tracing::debug!(id = entry.id, "Dropping summary entry");
            continue;
        }
        summaries.insert(entry.id, text.to_string());
    }
    summaries
}

/// Outcome of one ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// How each mention was resolved. Ids are the stored entity ids.
    pub resolution: Resolution,
    /// Entities written for newly created mentions.
    pub entities: Vec<Entity>,
    /// Relationships written or refreshed.
    pub relationships: Vec<Relationship>,
}

/// Turns text into graph facts.
pub struct KnowledgeService {
    extractor: MentionExtractor,
    resolver: EntityResolver,
    facts: FactStore,
    llm: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn Embedder>>,
    catalog: EntityTypeCatalog,
    config: ResolutionConfig,
}

impl KnowledgeService {
    /// Creates an ingest service over `graph`.
    #[must_use]
    pub fn new(
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmProvider>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            extractor: MentionExtractor::new(Arc::clone(&llm), config.llm_timeout),
            resolver: EntityResolver::new(Arc::clone(&graph), Arc::clone(&llm), config.clone()),
            facts: FactStore::new(graph),
            llm,
            embedder: None,
            catalog: EntityTypeCatalog::default(),
            config,
        }
    }

    /// Embeds new entities and facts with `embedder`.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replaces the entity type catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: EntityTypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// The fact store writes go through.
    #[must_use]
    pub const fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Extracts, resolves and stores the knowledge in `text`.
    ///
    /// `context` is extra surrounding text (for example earlier messages)
    /// shown to the resolution and summary prompts alongside `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails. LLM and embedding
    /// failures degrade instead.
    #[instrument(skip_all, fields(tenant = %tenant, text_len = text.len()))]
    pub async fn ingest(&self, tenant: &TenantId, text: &str, context: &str) -> Result<IngestReport> {
        let extraction = self.extractor.extract(text, &self.catalog).await;
        let context = if context.trim().is_empty() {
            text.to_string()
        } else {
            format!("{context}\n\n{text}")
        };
        self.ingest_extraction(tenant, &extraction, &context).await
    }

    /// Resolves and stores an existing extraction.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    #[instrument(skip_all, fields(tenant = %tenant, mentions = extraction.mentions.len()))]
    pub async fn ingest_extraction(
        &self,
        tenant: &TenantId,
        extraction: &Extraction,
        context: &str,
    ) -> Result<IngestReport> {
        if extraction.mentions.is_empty() {
            return Ok(IngestReport::default());
        }

        let mut resolution = self
            .resolver
            .resolve(tenant, &extraction.mentions, &self.catalog, context)
            .await?;

        // One entry per minted id; mentions sharing a new id are written once.
        let mut new_entities: Vec<(EntityId, &ExtractedMention)> = Vec::new();
        for &index in &resolution.created {
            let Some(minted) = resolution.entity_for(index) else {
                continue;
            };
            if new_entities.iter().any(|(id, _)| id == minted) {
                continue;
            }
            if let Some(mention) = extraction.mentions.iter().find(|m| m.source_index == index) {
                new_entities.push((minted.clone(), mention));
            }
        }
        let mut summaries = self.summarize(&new_entities, context).await;

        // Minted id -> stored id, in case the store kept an existing one.
        let mut stored_ids: HashMap<EntityId, EntityId> = HashMap::new();
        let mut entities = Vec::new();
        for (position, (minted, mention)) in new_entities.into_iter().enumerate() {
            let label = self.catalog.label(mention.type_id);
            let summary = summaries.remove(&position).unwrap_or_default();
            let mut draft = EntityDraft::new(tenant.clone(), mention.name.as_str(), label)
                .with_id(minted.clone())
                .with_summary(&summary);
            if let Some(embedding) = self.embed(&format!("{}: {summary}", mention.name)).await {
                draft = draft.with_embedding(embedding);
            }

            let entity = self.facts.save_entity(draft).await?;
            stored_ids.insert(minted, entity.id.clone());
            entities.push(entity);
        }
        for id in resolution.mapping.values_mut() {
            if let Some(stored) = stored_ids.get(id) {
                id.clone_from(stored);
            }
        }

        let mut relationships = Vec::new();
        for fact in &extraction.facts {
            let (Some(source), Some(target)) = (
                resolution.entity_for(fact.source_index),
                resolution.entity_for(fact.target_index),
            ) else {
                tracing::debug!(fact = %fact.fact, "Skipping fact with unresolved endpoint");
                continue;
            };
            let mut draft = RelationshipDraft::new(
                tenant.clone(),
                source.clone(),
                fact.relation_type.as_str(),
                target.clone(),
                fact.fact.as_str(),
            )
            .valid_since(fact.valid_at.unwrap_or_else(Utc::now));
            if let Some(embedding) = self.embed(&fact.fact).await {
                draft = draft.with_embedding(embedding);
            }
            relationships.push(self.facts.save_relationship(draft).await?);
        }

        tracing::info!(
            mentions = extraction.mentions.len(),
            new_entities = entities.len(),
            relationships = relationships.len(),
            "Ingested knowledge"
        );
        Ok(IngestReport {
            resolution,
            entities,
            relationships,
        })
    }

    /// Summaries by position in `entities`, from one LLM call.
    async fn summarize(
        &self,
        entities: &[(EntityId, &ExtractedMention)],
        context: &str,
    ) -> HashMap<usize, String> {
        if !self.config.summarize_entities || entities.is_empty() {
            return HashMap::new();
        }
        let listing: Vec<String> = entities
            .iter()
            .enumerate()
            .map(|(position, (_, mention))| {
                format!("{position}: {} ({})", mention.name, self.catalog.label(mention.type_id))
            })
            .collect();
        let user = format!("Entities:\n{}\n\nContext:\n{context}", listing.join("\n"));

        match complete_within(
            self.llm.as_ref(),
            "summary",
            SUMMARY_SYSTEM_PROMPT,
            &user,
            self.config.llm_timeout,
        )
        .await
        {
            Ok(response) => parse_summaries(&response, entities.len()),
            Err(e) => {
                tracing::warn!(error = %e, entities = entities.len(), "Entity summaries failed, leaving them empty");
                HashMap::new()
            },
        }
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, storing without one");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::ScriptedLlm;
    use crate::models::{ExtractedFact, ExtractedMention, MatchType, STILL_VALID};
    use crate::storage::InMemoryGraphStore;

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    fn no_summaries() -> ResolutionConfig {
        ResolutionConfig {
            summarize_entities: false,
            ..ResolutionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_entities_and_edges() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"entities":[{"name":"Alice","type_id":3},{"name":"Acme","type_id":4}],
                "relationships":[{"source":0,"target":1,"relation_type":"WORKS_AT","fact":"Alice works at Acme"}]}"#
                .to_string(),
            r#"{"summaries":[{"id":0,"summary":"Alice is an engineer."},{"id":1,"summary":"Acme is a company."}]}"#
                .to_string(),
        ]));
        let service = KnowledgeService::new(graph.clone(), llm.clone(), ResolutionConfig::default())
            .with_embedder(Arc::new(HashEmbedder::default()));

        let report = service.ingest(&tenant(), "Alice works at Acme", "").await.unwrap();

        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.entities[0].summary, "Alice is an engineer.");
        assert_eq!(report.entities[1].summary, "Acme is a company.");
        assert!(report.entities[0].embedding.is_some());
        assert_eq!(report.relationships.len(), 1);
        assert_eq!(report.relationships[0].invalid_at(), STILL_VALID);
        assert_eq!(llm.call_count(), 2);
        assert!(llm.prompts()[1].contains("0: Alice (Person)"));
        assert!(llm.prompts()[1].contains("1: Acme (Organization)"));
        assert_eq!(graph.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_summary_empty() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let llm = Arc::new(ScriptedLlm::failing());
        let service = KnowledgeService::new(graph, llm, ResolutionConfig::default());
        let extraction = Extraction {
            mentions: vec![ExtractedMention::new("Kotlin", 2, 0)],
            facts: vec![],
        };

        let report = service.ingest_extraction(&tenant(), &extraction, "ctx").await.unwrap();
        assert_eq!(report.entities.len(), 1);
        assert!(report.entities[0].summary.is_empty());
    }

    #[tokio::test]
    async fn test_one_summary_call_keeps_well_formed_entries() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"summaries":[
                {"id":1,"summary":"Gradle is a build tool."},
                {"id":7,"summary":"Out of range."},
                {"id":1,"summary":"Repeated."},
                {"id":"2","summary":"Wrong id type."}
            ]}"#
                .to_string(),
        ]));
        let service = KnowledgeService::new(graph, llm.clone(), ResolutionConfig::default());
        let extraction = Extraction {
            mentions: vec![
                ExtractedMention::new("Kotlin", 2, 0),
                ExtractedMention::new("Gradle", 2, 1),
                ExtractedMention::new("JetBrains", 4, 2),
            ],
            facts: vec![],
        };

        let report = service.ingest_extraction(&tenant(), &extraction, "ctx").await.unwrap();
        let summaries: Vec<&str> = report.entities.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["", "Gradle is a build tool.", ""]);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn test_parse_summaries_tolerates_garbage() {
        assert!(parse_summaries("no json here", 3).is_empty());
        let fenced = "```json\n{\"summaries\":[{\"id\":0,\"summary\":\" Kotlin \"}]}\n```";
        assert_eq!(parse_summaries(fenced, 1)[&0], "Kotlin");
    }

    #[tokio::test]
    async fn test_second_ingest_reuses_existing_entity() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let service = KnowledgeService::new(graph.clone(), llm.clone(), no_summaries());
        let extraction = Extraction {
            mentions: vec![
                ExtractedMention::new("Gradle", 2, 0),
                ExtractedMention::new("Kotlin", 2, 1),
            ],
            facts: vec![ExtractedFact {
                source_index: 0,
                target_index: 1,
                relation_type: "USES".to_string(),
                fact: "Gradle uses Kotlin".to_string(),
                valid_at: None,
            }],
        };

        let first = service.ingest_extraction(&tenant(), &extraction, "").await.unwrap();
        let second = service.ingest_extraction(&tenant(), &extraction, "").await.unwrap();

        assert_eq!(second.resolution.count(MatchType::Exact), 2);
        assert!(second.entities.is_empty());
        assert_eq!(first.relationships[0].id, second.relationships[0].id);
        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relationship_count(), 1);
        assert_eq!(llm.call_count(), 0);
    }
}

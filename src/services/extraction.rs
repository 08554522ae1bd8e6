//! Mention extraction: turns free text into entity mentions and facts.
//!
//! One LLM call per text with a JSON contract:
//!
//! ```json
//! {
//!   "entities": [{"name": "Gradle", "type_id": 2}],
//!   "relationships": [
//!     {"source": 0, "target": 1, "relation_type": "USES", "fact": "Gradle uses Kotlin",
//!      "valid_at": "2024-01-01T00:00:00Z"}
//!   ]
//! }
//! ```
//!
//! `source` and `target` are positions in the `entities` array. Extraction
//! degrades to an empty [`Extraction`] whenever the LLM fails or answers with
//! something unusable.

use crate::llm::{LlmProvider, complete_within, extract_json_from_response};
use crate::models::{EntityTypeCatalog, ExtractedFact, ExtractedMention, Extraction};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract entities and relationships from text.
Respond with JSON only, in this shape:
{\"entities\":[{\"name\":\"...\",\"type_id\":0}],
 \"relationships\":[{\"source\":0,\"target\":1,\"relation_type\":\"UPPER_SNAKE_CASE\",\"fact\":\"...\",\"valid_at\":\"RFC3339, optional\"}]}
`source` and `target` are positions in the entities array.
Use only these entity types (id: Label - description):";

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    relationships: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    type_id: i32,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    source: usize,
    target: usize,
    relation_type: String,
    fact: String,
    #[serde(default)]
    valid_at: Option<String>,
}

/// Normalizes a relation type to upper snake case: `"works at"` becomes `"WORKS_AT"`.
#[must_use]
pub fn normalize_relation_type(relation_type: &str) -> String {
    relation_type
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// LLM-backed mention extractor.
pub struct MentionExtractor {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl MentionExtractor {
    /// Creates an extractor whose LLM calls are bounded by `timeout`.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Extracts mentions and facts from `text`.
    ///
    /// Blank text yields an empty extraction without calling the LLM.
    /// Entities with blank names or type ids missing from `catalog` are
    /// dropped, along with any fact referring to them.
    #[instrument(skip(self, text, catalog), fields(text_len = text.len()))]
    pub async fn extract(&self, text: &str, catalog: &EntityTypeCatalog) -> Extraction {
        if text.trim().is_empty() {
            return Extraction::default();
        }

        let system = format!("{EXTRACTION_SYSTEM_PROMPT}\n{}", catalog.to_prompt_lines());
        let user = format!("Extract entities and relationships from this text:\n\n{text}");

        let response =
            match complete_within(self.llm.as_ref(), "extraction", &system, &user, self.timeout).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "Mention extraction failed, returning nothing");
                    return Extraction::default();
                },
            };

        let extraction = parse_extraction(&response, catalog);
        tracing::debug!(
            mentions = extraction.mentions.len(),
            facts = extraction.facts.len(),
            "Extracted mentions"
        );
        extraction
    }
}

/// Parses an extraction response, keeping every well-formed entry.
fn parse_extraction(response: &str, catalog: &EntityTypeCatalog) -> Extraction {
    let raw: RawExtraction = match serde_json::from_str(extract_json_from_response(response)) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable extraction response");
            return Extraction::default();
        },
    };

    // Raw entity position -> index among kept mentions.
    let mut positions: HashMap<usize, usize> = HashMap::new();
    let mut mentions = Vec::new();
    for (position, value) in raw.entities.into_iter().enumerate() {
        let Ok(entity) = serde_json::from_value::<RawEntity>(value) else {
            tracing::debug!(position, "Dropping malformed entity entry");
            continue;
        };
        let name = entity.name.trim();
        if name.is_empty() || catalog.get(entity.type_id).is_none() {
            tracing::debug!(position, type_id = entity.type_id, "Dropping entity entry");
            continue;
        }
        positions.insert(position, mentions.len());
        mentions.push(ExtractedMention::new(name, entity.type_id, mentions.len()));
    }

    let facts = raw
        .relationships
        .into_iter()
        .filter_map(|value| serde_json::from_value::<RawRelationship>(value).ok())
        .filter_map(|rel| {
            let source_index = *positions.get(&rel.source)?;
            let target_index = *positions.get(&rel.target)?;
            let relation_type = normalize_relation_type(&rel.relation_type);
            let fact = rel.fact.trim().to_string();
            if relation_type.is_empty() || fact.is_empty() {
                return None;
            }
            Some(ExtractedFact {
                source_index,
                target_index,
                relation_type,
                fact,
                valid_at: rel
                    .valid_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc)),
            })
        })
        .collect();

    Extraction { mentions, facts }
}

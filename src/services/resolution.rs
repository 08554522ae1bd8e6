//! Entity resolution: links extracted mentions to existing graph entities.
//!
//! Resolution runs in stages, each only looking at mentions the previous
//! stages left unresolved:
//!
//! 1. **Candidates**: one batched [`GraphStore::find_candidates`] lookup.
//! 2. **Exact**: normalized names are equal and the candidate has the
//!    mention's type.
//! 3. **Fuzzy**: fuzzy keys are equal, or within `fuzzy_max_distance` edits
//!    when both keys are at least `fuzzy_min_length` characters long.
//! 4. **LLM**: a single batched prompt for everything still unresolved.
//! 5. **Assembly**: the rest get fresh ids; same-name, same-type leftovers
//!    share one id.
//!
//! Store failures are errors. LLM failures, timeouts and malformed answers
//! only mean "no additional matches".

// Allow cast_precision_loss - name lengths are tiny.
#![allow(clippy::cast_precision_loss)]
// Allow cast_possible_truncation and cast_sign_loss - LLM indexes are range-checked first.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::config::ResolutionConfig;
use crate::llm::{LlmProvider, complete_within, extract_json_from_response};
use crate::models::resolution::{fuzzy_key, normalize_name};
use crate::models::{
    DedupMatch, Entity, EntityId, EntityTypeCatalog, ExtractedMention, MatchType, Resolution,
    TenantId,
};
use crate::storage::GraphStore;
use crate::Result;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Confidence recorded for LLM-judged duplicates.
const LLM_MATCH_CONFIDENCE: f32 = 0.8;

const RESOLUTION_SYSTEM_PROMPT: &str = "You decide whether newly mentioned entities are \
duplicates of existing entities. Two entities are duplicates only if they refer to the same \
real-world thing. Do not merge entities that are merely related or similar.
Respond with JSON only:
{\"resolutions\":[{\"id\":<entity id>,\"duplicate_idx\":<existing entity idx or -1>}]}";

/// Why an LLM resolution response could not be used at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionParseError {
    /// The response was blank.
    #[error("empty resolution response")]
    Empty,
    /// The response was not valid JSON.
    #[error("invalid resolution JSON: {0}")]
    InvalidJson(String),
    /// The JSON had no `resolutions` array.
    #[error("resolution response has no `resolutions` array")]
    MissingResolutions,
}

/// One accepted LLM decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionDecision {
    /// Extracted index of the mention.
    pub mention_index: usize,
    /// Candidate position, or `None` when the mention is new.
    pub duplicate_of: Option<usize>,
}

/// A response entry that was dropped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// The raw JSON entry.
    pub raw: String,
    /// Why it was dropped.
    pub reason: &'static str,
}

/// Strictly parsed LLM resolution answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionList {
    /// Accepted decisions in response order.
    pub decisions: Vec<ResolutionDecision>,
    /// Dropped entries.
    pub rejected: Vec<RejectedEntry>,
}

/// Parses an LLM resolution response.
///
/// Entries with an id outside `mention_ids`, a repeated id, a missing field or
/// a `duplicate_idx` outside `[-1, candidate_count)` are rejected
/// individually; the rest are accepted.
///
/// # Errors
///
/// Returns [`ResolutionParseError`] when the response as a whole is unusable.
pub fn parse_resolution_response(
    response: &str,
    mention_ids: &[usize],
    candidate_count: usize,
) -> std::result::Result<ResolutionList, ResolutionParseError> {
    if response.trim().is_empty() {
        return Err(ResolutionParseError::Empty);
    }
    let value: Value = serde_json::from_str(extract_json_from_response(response))
        .map_err(|e| ResolutionParseError::InvalidJson(e.to_string()))?;
    let entries = value
        .get("resolutions")
        .and_then(Value::as_array)
        .ok_or(ResolutionParseError::MissingResolutions)?;

    let mut list = ResolutionList::default();
    let mut seen = BTreeSet::new();
    for entry in entries {
        let reject = |reason| RejectedEntry {
            raw: entry.to_string(),
            reason,
        };
        let Some(id) = entry.get("id").and_then(Value::as_u64).map(|id| id as usize) else {
            list.rejected.push(reject("missing id"));
            continue;
        };
        if !mention_ids.contains(&id) {
            list.rejected.push(reject("unknown id"));
            continue;
        }
        let Some(duplicate_idx) = entry.get("duplicate_idx").and_then(Value::as_i64) else {
            list.rejected.push(reject("missing duplicate_idx"));
            continue;
        };
        let duplicate_of = match duplicate_idx {
            -1 => None,
            idx if idx >= 0 && (idx as u64) < candidate_count as u64 => Some(idx as usize),
            _ => {
                list.rejected.push(reject("duplicate_idx out of range"));
                continue;
            },
        };
        if !seen.insert(id) {
            list.rejected.push(reject("repeated id"));
            continue;
        }
        list.decisions.push(ResolutionDecision {
            mention_index: id,
            duplicate_of,
        });
    }
    Ok(list)
}

/// Resolves extracted mentions against the knowledge graph.
pub struct EntityResolver {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    config: ResolutionConfig,
}

impl EntityResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmProvider>,
        config: ResolutionConfig,
    ) -> Self {
        Self { graph, llm, config }
    }

    /// Maps every mention's `source_index` to an entity id.
    ///
    /// `context` is the surrounding text, shown to the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error only if the candidate lookup fails.
    #[instrument(skip_all, fields(tenant = %tenant, mentions = mentions.len()))]
    pub async fn resolve(
        &self,
        tenant: &TenantId,
        mentions: &[ExtractedMention],
        catalog: &EntityTypeCatalog,
        context: &str,
    ) -> Result<Resolution> {
        if mentions.is_empty() {
            return Ok(Resolution::default());
        }

        let names: Vec<String> = mentions.iter().map(|m| m.name.clone()).collect();
        let candidates = self
            .graph
            .find_candidates(
                tenant,
                &names,
                self.config.candidate_max_distance,
                self.config.candidate_limit,
            )
            .await?;

        let mut resolution = Resolution::default();
        for mention in mentions {
            let label = catalog.label(mention.type_id);
            let found = exact_match(mention, label, &candidates)
                .or_else(|| self.fuzzy_match(mention, label, &candidates));
            if let Some(found) = found {
                record(&mut resolution, found);
            }
        }

        let unresolved: Vec<&ExtractedMention> = mentions
            .iter()
            .filter(|m| !resolution.mapping.contains_key(&m.source_index))
            .collect();
        if !unresolved.is_empty() && !candidates.is_empty() {
            for found in self
                .llm_matches(&unresolved, &candidates, catalog, context)
                .await
            {
                record(&mut resolution, found);
            }
        }

        assign_new_ids(&mut resolution, mentions, catalog);

        for match_type in [MatchType::Exact, MatchType::Fuzzy, MatchType::Llm] {
            let count = resolution.count(match_type);
            if count > 0 {
                metrics::counter!("memory_resolution_total", "match_type" => match_type.as_str())
                    .increment(count as u64);
            }
        }
        if !resolution.created.is_empty() {
            metrics::counter!("memory_resolution_total", "match_type" => "new")
                .increment(resolution.created.len() as u64);
        }
        tracing::debug!(
            exact = resolution.count(MatchType::Exact),
            fuzzy = resolution.count(MatchType::Fuzzy),
            llm = resolution.count(MatchType::Llm),
            created = resolution.created.len(),
            "Resolved mentions"
        );

        Ok(resolution)
    }

    fn fuzzy_match(
        &self,
        mention: &ExtractedMention,
        label: &str,
        candidates: &[Entity],
    ) -> Option<DedupMatch> {
        let key = fuzzy_key(&mention.name);
        if key.is_empty() {
            return None;
        }
        let key_len = key.chars().count();

        candidates
            .iter()
            .filter(|c| c.has_type(label))
            .filter_map(|c| {
                let other = fuzzy_key(&c.name);
                let other_len = other.chars().count();
                if other.is_empty() {
                    return None;
                }
                let distance = strsim::levenshtein(&key, &other);
                let long_enough = key_len >= self.config.fuzzy_min_length
                    && other_len >= self.config.fuzzy_min_length;
                let accepted =
                    distance == 0 || (long_enough && distance <= self.config.fuzzy_max_distance);
                accepted.then_some((c, distance, key_len.max(other_len)))
            })
            .min_by_key(|(_, distance, _)| *distance)
            .map(|(c, distance, max_len)| DedupMatch {
                extracted_index: mention.source_index,
                candidate_id: c.id.clone(),
                match_type: MatchType::Fuzzy,
                confidence: 1.0 - distance as f32 / max_len as f32,
            })
    }

    async fn llm_matches(
        &self,
        unresolved: &[&ExtractedMention],
        candidates: &[Entity],
        catalog: &EntityTypeCatalog,
        context: &str,
    ) -> Vec<DedupMatch> {
        let prompt = build_resolution_prompt(unresolved, candidates, catalog, context);
        let response = match complete_within(
            self.llm.as_ref(),
            "resolution",
            RESOLUTION_SYSTEM_PROMPT,
            &prompt,
            self.config.llm_timeout,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "LLM resolution failed, treating mentions as new");
                return Vec::new();
            },
        };

        let ids: Vec<usize> = unresolved.iter().map(|m| m.source_index).collect();
        let list = match parse_resolution_response(&response, &ids, candidates.len()) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Unusable LLM resolution response");
                return Vec::new();
            },
        };
        for rejected in &list.rejected {
            tracing::warn!(entry = %rejected.raw, reason = rejected.reason, "Dropping resolution entry");
        }

        list.decisions
            .into_iter()
            .filter_map(|d| {
                let candidate = &candidates[d.duplicate_of?];
                Some(DedupMatch {
                    extracted_index: d.mention_index,
                    candidate_id: candidate.id.clone(),
                    match_type: MatchType::Llm,
                    confidence: LLM_MATCH_CONFIDENCE,
                })
            })
            .collect()
    }
}

fn exact_match(mention: &ExtractedMention, label: &str, candidates: &[Entity]) -> Option<DedupMatch> {
    let name = normalize_name(&mention.name);
    candidates
        .iter()
        .find(|c| c.has_type(label) && normalize_name(&c.name) == name)
        .map(|c| DedupMatch {
            extracted_index: mention.source_index,
            candidate_id: c.id.clone(),
            match_type: MatchType::Exact,
            confidence: 1.0,
        })
}

fn record(resolution: &mut Resolution, found: DedupMatch) {
    resolution
        .mapping
        .insert(found.extracted_index, found.candidate_id.clone());
    resolution.matches.push(found);
}

fn assign_new_ids(resolution: &mut Resolution, mentions: &[ExtractedMention], catalog: &EntityTypeCatalog) {
    let mut minted: HashMap<(String, &str), EntityId> = HashMap::new();
    for mention in mentions {
        if resolution.mapping.contains_key(&mention.source_index) {
            continue;
        }
        let key = (normalize_name(&mention.name), catalog.label(mention.type_id));
        let id = minted.entry(key).or_insert_with(EntityId::generate).clone();
        resolution.mapping.insert(mention.source_index, id);
        resolution.created.push(mention.source_index);
    }
}

fn build_resolution_prompt(
    unresolved: &[&ExtractedMention],
    candidates: &[Entity],
    catalog: &EntityTypeCatalog,
    context: &str,
) -> String {
    let mentions: Vec<Value> = unresolved
        .iter()
        .map(|m| {
            json!({
                "id": m.source_index,
                "name": m.name,
                "entity_type": catalog.label(m.type_id),
            })
        })
        .collect();
    let existing: Vec<Value> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            json!({
                "idx": idx,
                "name": c.name,
                "entity_types": c.labels,
                "summary": c.summary,
            })
        })
        .collect();

    format!(
        "<CONTEXT>\n{context}\n</CONTEXT>\n\n<NEW ENTITIES>\n{}\n</NEW ENTITIES>\n\n\
         <EXISTING ENTITIES>\n{}\n</EXISTING ENTITIES>\n\n\
         For each new entity, give the idx of the existing entity it duplicates, or -1.",
        Value::Array(mentions),
        Value::Array(existing),
    )
}

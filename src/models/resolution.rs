//! Entity resolution types and name matching helpers.
//!
//! Extraction produces [`ExtractedMention`]s; resolution maps each mention
//! index to an [`EntityId`], either an existing entity (recorded as a
//! [`DedupMatch`]) or a freshly minted one.
//!
//! # Name normalization
//!
//! | Helper | `"  Kotlin  Multiplatform "` | Used for |
//! |--------|------------------------------|----------|
//! | [`normalize_name`] | `"kotlin multiplatform"` | EXACT matches |
//! | [`fuzzy_key`] | `"kotlinmultiplatform"` | FUZZY matches |
//! | [`name_tokens`] | `["kotlin", "multiplatform"]` | candidate lookup |

use super::graph::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tokens shorter than this never make two names candidates of each other.
const MIN_SHARED_TOKEN_LEN: usize = 3;

/// An entity type known to extraction and resolution prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    /// Numeric id used in LLM prompts and responses.
    pub id: i32,
    /// Label stored on entities.
    pub label: String,
    /// Description shown to the LLM.
    pub description: String,
}

/// Catalog mapping numeric type ids to labels.
///
/// Id `0` is the generic fallback type and always exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeCatalog {
    types: Vec<EntityType>,
}

impl EntityTypeCatalog {
    /// Label of the generic fallback type.
    pub const FALLBACK_LABEL: &'static str = "Entity";

    /// Creates a catalog from explicit types, adding the fallback type if absent.
    #[must_use]
    pub fn new(mut types: Vec<EntityType>) -> Self {
        if !types.iter().any(|t| t.id == 0) {
            types.insert(
                0,
                EntityType {
                    id: 0,
                    label: Self::FALLBACK_LABEL.to_string(),
                    description: "Any entity that fits no other type".to_string(),
                },
            );
        }
        types.sort_by_key(|t| t.id);
        types.dedup_by_key(|t| t.id);
        Self { types }
    }

    /// Looks up a type by id.
    #[must_use]
    pub fn get(&self, id: i32) -> Option<&EntityType> {
        self.types.iter().find(|t| t.id == id)
    }

    /// Returns the label for `id`, or the fallback label for unknown ids.
    #[must_use]
    pub fn label(&self, id: i32) -> &str {
        self.get(id)
            .map_or(Self::FALLBACK_LABEL, |t| t.label.as_str())
    }

    /// Finds the id of a label, case-insensitively.
    #[must_use]
    pub fn id_for_label(&self, label: &str) -> Option<i32> {
        self.types
            .iter()
            .find(|t| t.label.eq_ignore_ascii_case(label))
            .map(|t| t.id)
    }

    /// Iterates over all types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter()
    }

    /// Renders the catalog as prompt lines: `id: Label - description`.
    #[must_use]
    pub fn to_prompt_lines(&self) -> String {
        self.types
            .iter()
            .map(|t| format!("{}: {} - {}", t.id, t.label, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for EntityTypeCatalog {
    fn default() -> Self {
        let entry = |id: i32, label: &str, description: &str| EntityType {
            id,
            label: label.to_string(),
            description: description.to_string(),
        };
        Self::new(vec![
            entry(0, Self::FALLBACK_LABEL, "Any entity that fits no other type"),
            entry(1, "Project", "A software project, repository or product"),
            entry(2, "Technology", "A language, framework, library, tool or service"),
            entry(3, "Person", "A named individual or user handle"),
            entry(4, "Organization", "A company, team or community"),
            entry(5, "Concept", "An abstract idea, pattern or practice"),
            entry(6, "Location", "A place, region or address"),
        ])
    }
}

/// An entity mention produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMention {
    /// Name as it appeared in the text.
    pub name: String,
    /// Catalog type id.
    pub type_id: i32,
    /// Position of the mention in the extraction batch.
    pub source_index: usize,
}

impl ExtractedMention {
    /// Creates a mention.
    #[must_use]
    pub fn new(name: impl Into<String>, type_id: i32, source_index: usize) -> Self {
        Self {
            name: name.into(),
            type_id,
            source_index,
        }
    }
}

/// A relationship fact produced by extraction, referring to mention indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFact {
    /// Index of the source mention.
    pub source_index: usize,
    /// Index of the target mention.
    pub target_index: usize,
    /// Relation type, upper snake case.
    pub relation_type: String,
    /// Natural-language fact.
    pub fact: String,
    /// When the fact became true, if stated.
    pub valid_at: Option<DateTime<Utc>>,
}

/// Output of mention extraction for one text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Entity mentions.
    pub mentions: Vec<ExtractedMention>,
    /// Relationship facts between mentions.
    pub facts: Vec<ExtractedFact>,
}

impl Extraction {
    /// Whether nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty() && self.facts.is_empty()
    }
}

/// How a mention was matched to an existing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Normalized names are equal.
    Exact,
    /// Names differ only by punctuation or a small typo.
    Fuzzy,
    /// The LLM judged them to be the same entity.
    Llm,
}

impl MatchType {
    /// Returns the match type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Llm => "llm",
        }
    }
}

/// A mention resolved to an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupMatch {
    /// Index of the mention in the extraction batch.
    pub extracted_index: usize,
    /// The existing entity.
    pub candidate_id: EntityId,
    /// How the match was made.
    pub match_type: MatchType,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Result of resolving one batch of mentions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Mention index to resolved entity id, for every mention.
    pub mapping: BTreeMap<usize, EntityId>,
    /// Mentions matched to existing entities.
    pub matches: Vec<DedupMatch>,
    /// Mentions that received freshly minted ids.
    pub created: Vec<usize>,
}

impl Resolution {
    /// Resolved id for a mention index.
    #[must_use]
    pub fn entity_for(&self, index: usize) -> Option<&EntityId> {
        self.mapping.get(&index)
    }

    /// Whether the mention was matched to an existing entity.
    #[must_use]
    pub fn is_existing(&self, index: usize) -> bool {
        self.matches.iter().any(|m| m.extracted_index == index)
    }

    /// Number of mentions matched by a given strategy.
    #[must_use]
    pub fn count(&self, match_type: MatchType) -> usize {
        self.matches
            .iter()
            .filter(|m| m.match_type == match_type)
            .count()
    }
}

/// Trims, collapses internal whitespace and lowercases a name.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keeps only lowercase alphanumerics: `"Gromozeka-Lib"` becomes `"gromozekalib"`.
#[must_use]
pub fn fuzzy_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits a name into lowercase alphanumeric tokens.
#[must_use]
pub fn name_tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether two names are close enough to be resolution candidates.
///
/// True when the normalized names are equal, share a token of at least three
/// characters, or are within `max_distance` Levenshtein edits.
#[must_use]
pub fn names_are_close(a: &str, b: &str, max_distance: usize) -> bool {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }
    let tokens_b = name_tokens(&nb);
    let shares_token = name_tokens(&na)
        .iter()
        .filter(|t| t.chars().count() >= MIN_SHARED_TOKEN_LEN)
        .any(|t| tokens_b.contains(t));
    shares_token || strsim::levenshtein(&na, &nb) <= max_distance
}

/// Rank of a candidate name against a batch of mention names; lower is closer.
///
/// The smallest Levenshtein distance between normalized names, so an exact
/// normalized match always ranks 0.
#[must_use]
pub fn candidate_rank(name: &str, mentions: &[String]) -> usize {
    let name = normalize_name(name);
    mentions
        .iter()
        .map(|m| strsim::levenshtein(&normalize_name(m), &name))
        .min()
        .unwrap_or(usize::MAX)
}

//! Keyword query parsing and tokenization shared by indexing and highlighting.
//!
//! Plain terms are OR-ed; double-quoted phrases are required.
//!
//! ```rust
//! use gromozeka_memory::models::KeywordQuery;
//!
//! let query = KeywordQuery::parse(r#"kotlin "coroutine scope" flows"#);
//! assert_eq!(query.terms, vec!["kotlin", "flows"]);
//! assert_eq!(query.phrases, vec![vec!["coroutine".to_string(), "scope".to_string()]]);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+").unwrap_or_else(|_| unreachable!()));

static PHRASE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap_or_else(|_| unreachable!()));

/// A lowercase token and its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpan {
    /// Lowercased token.
    pub token: String,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// Splits text into lowercase word tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Splits text into lowercase word tokens with their byte spans.
#[must_use]
pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    TOKEN_PATTERN
        .find_iter(text)
        .map(|m| TokenSpan {
            token: m.as_str().to_lowercase(),
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

/// A parsed keyword query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordQuery {
    /// Optional terms, deduplicated in query order.
    pub terms: Vec<String>,
    /// Required phrases, each a token sequence.
    pub phrases: Vec<Vec<String>>,
}

impl KeywordQuery {
    /// Parses a raw query string.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let phrases = PHRASE_PATTERN
            .captures_iter(query)
            .filter_map(|cap| cap.get(1))
            .map(|m| tokenize(m.as_str()))
            .filter(|tokens| !tokens.is_empty())
            .collect();

        let remainder = PHRASE_PATTERN.replace_all(query, " ");
        let mut terms: Vec<String> = Vec::new();
        for token in tokenize(&remainder) {
            if !terms.contains(&token) {
                terms.push(token);
            }
        }

        Self { terms, phrases }
    }

    /// Whether the query has no searchable tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty()
    }

    /// Every distinct token that contributes to relevance, terms first.
    #[must_use]
    pub fn scoring_terms(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.terms.iter().map(String::as_str).collect();
        for token in self.phrases.iter().flatten() {
            if !out.contains(&token.as_str()) {
                out.push(token);
            }
        }
        out
    }

    /// Whether a token sequence contains every required phrase.
    #[must_use]
    pub fn phrases_match(&self, tokens: &[String]) -> bool {
        self.phrases.iter().all(|phrase| {
            tokens
                .windows(phrase.len())
                .any(|window| window == phrase.as_slice())
        })
    }
}

//! Property-based tests for name normalization, query parsing and fusion.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Name normalization is idempotent and case-insensitive
//! - Candidate closeness is symmetric and reflexive
//! - Keyword query terms are unique
//! - Fused scores stay in `[0, 1]` and come out sorted

// Property tests use unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::unwrap_used)]

use chrono::{Duration, TimeZone, Utc};
use gromozeka_memory::models::resolution::{fuzzy_key, names_are_close, normalize_name};
use gromozeka_memory::models::{
    ConversationId, IndexedMessage, KeywordQuery, MessageId, MessageRole, TenantId, ThreadId,
};
use gromozeka_memory::services::fusion::{fuse, normalize_scores};
use gromozeka_memory::storage::IndexHit;
use proptest::prelude::*;

fn hit(id: usize, score: f32) -> IndexHit {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    IndexHit {
        doc: IndexedMessage {
            id: MessageId::new(format!("m{id}")),
            tenant: TenantId::new("t"),
            thread_id: ThreadId::new("th"),
            conversation_id: ConversationId::new("c"),
            project_id: None,
            role: MessageRole::User,
            text: String::new(),
            created_at: base + Duration::seconds(i64::try_from(id % 7).unwrap()),
        },
        score,
    }
}

proptest! {
    /// Property: normalizing twice changes nothing.
    #[test]
    fn prop_normalize_name_idempotent(name in "[a-zA-Z0-9 \t_-]{0,40}") {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }

    /// Property: case never affects the normalized name.
    #[test]
    fn prop_normalize_name_case_insensitive(name in "[a-zA-Z0-9 ]{0,40}") {
        prop_assert_eq!(normalize_name(&name.to_uppercase()), normalize_name(&name.to_lowercase()));
    }

    /// Property: fuzzy keys hold only lowercase alphanumerics.
    #[test]
    fn prop_fuzzy_key_alphanumeric(name in "[a-zA-Z0-9 ._-]{0,40}") {
        let key = fuzzy_key(&name);
        prop_assert!(key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    /// Property: closeness does not depend on argument order.
    #[test]
    fn prop_names_are_close_symmetric(
        a in "[a-zA-Z ]{1,20}",
        b in "[a-zA-Z ]{1,20}",
        max in 0usize..4,
    ) {
        prop_assert_eq!(names_are_close(&a, &b, max), names_are_close(&b, &a, max));
        if !normalize_name(&a).is_empty() {
            prop_assert!(names_are_close(&a, &a, max));
        }
    }

    /// Property: parsed terms contain no duplicates.
    #[test]
    fn prop_keyword_terms_unique(query in "[a-cA-C \"]{0,30}") {
        let parsed = KeywordQuery::parse(&query);
        let mut terms = parsed.terms.clone();
        terms.sort();
        terms.dedup();
        prop_assert_eq!(terms.len(), parsed.terms.len());
    }

    /// Property: normalized scores are in `[0, 1]`.
    #[test]
    fn prop_normalized_scores_in_range(scores in prop::collection::vec(-1000.0f32..1000.0, 0..20)) {
        let hits: Vec<IndexHit> = scores.iter().enumerate().map(|(i, &s)| hit(i, s)).collect();
        let normalized = normalize_scores(&hits);
        prop_assert_eq!(normalized.len(), hits.len());
        prop_assert!(normalized.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    /// Property: fused scores are in `[0, 1]` and sorted descending.
    #[test]
    fn prop_fused_scores_in_range_and_sorted(
        keyword in prop::collection::vec(0.0f32..50.0, 0..15),
        semantic in prop::collection::vec(-1.0f32..1.0, 0..15),
        wk in 0.0f32..=1.0,
    ) {
        let keyword: Vec<IndexHit> = keyword.iter().enumerate().map(|(i, &s)| hit(i, s)).collect();
        let semantic: Vec<IndexHit> = semantic.iter().enumerate().map(|(i, &s)| hit(i + 5, s)).collect();
        let fused = fuse(&keyword, &semantic, (wk, 1.0 - wk));

        prop_assert!(fused.iter().all(|f| (0.0..=1.0).contains(&f.score)));
        prop_assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));

        let mut ids: Vec<&MessageId> = fused.iter().map(|f| &f.doc.id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }
}

//! Score normalization and weighted fusion for hybrid search.
//!
//! Each candidate list is min-max normalized to `[0, 1]` (a list whose
//! scores are all equal normalizes to `1.0`), then combined as
//! `wk * keyword + ws * semantic`. A document missing from one list scores
//! `0` there.
//!
//! Results are ordered by fused score descending, then newer message first,
//! then message id.

use crate::models::{IndexedMessage, MessageId, ResultMatchType};
use crate::storage::IndexHit;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A document with its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// The index document.
    pub doc: IndexedMessage,
    /// Fused score in `[0, 1]`.
    pub score: f32,
    /// Normalized keyword score, when found by keyword search.
    pub keyword: Option<f32>,
    /// Normalized semantic score, when found by vector search.
    pub semantic: Option<f32>,
}

impl FusedHit {
    /// Which retrieval paths found the document.
    #[must_use]
    pub const fn match_type(&self) -> ResultMatchType {
        match (self.keyword, self.semantic) {
            (Some(_), Some(_)) => ResultMatchType::Hybrid,
            (None, Some(_)) => ResultMatchType::Semantic,
            _ => ResultMatchType::Keyword,
        }
    }
}

/// Min-max normalizes raw scores, in input order.
///
/// Non-finite scores count as the minimum.
#[must_use]
pub fn normalize_scores(hits: &[IndexHit]) -> Vec<f32> {
    let raw: Vec<f32> = hits
        .iter()
        .map(|h| if h.score.is_finite() { h.score } else { f32::NEG_INFINITY })
        .collect();
    let finite = raw.iter().copied().filter(|s| s.is_finite());
    let s_min = finite.clone().fold(f32::INFINITY, f32::min);
    let s_max = finite.fold(f32::NEG_INFINITY, f32::max);

    raw.iter()
        .map(|&s| {
            if !s.is_finite() {
                0.0
            } else if (s_max - s_min).abs() < f32::EPSILON {
                1.0
            } else {
                ((s - s_min) / (s_max - s_min)).clamp(0.0, 1.0)
            }
        })
        .collect()
}

/// Fuses keyword and semantic candidates with `(keyword, semantic)` weights.
///
/// Weights are expected to be non-negative and sum to 1.
#[must_use]
pub fn fuse(keyword: &[IndexHit], semantic: &[IndexHit], weights: (f32, f32)) -> Vec<FusedHit> {
    let (wk, ws) = weights;
    let mut fused: HashMap<MessageId, FusedHit> = HashMap::new();

    for (hit, score) in keyword.iter().zip(normalize_scores(keyword)) {
        fused.entry(hit.doc.id.clone()).or_insert_with(|| FusedHit {
            doc: hit.doc.clone(),
            score: 0.0,
            keyword: Some(score),
            semantic: None,
        });
    }
    for (hit, score) in semantic.iter().zip(normalize_scores(semantic)) {
        fused
            .entry(hit.doc.id.clone())
            .and_modify(|f| f.semantic = Some(score))
            .or_insert_with(|| FusedHit {
                doc: hit.doc.clone(),
                score: 0.0,
                keyword: None,
                semantic: Some(score),
            });
    }

    let mut hits: Vec<FusedHit> = fused
        .into_values()
        .map(|mut f| {
            let score = wk * f.keyword.unwrap_or(0.0) + ws * f.semantic.unwrap_or(0.0);
            f.score = score.clamp(0.0, 1.0);
            f
        })
        .collect();
    sort_fused(&mut hits);
    hits
}

/// Sorts by score desc, then `created_at` desc, then id.
pub fn sort_fused(hits: &mut [FusedHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.doc.created_at.cmp(&a.doc.created_at))
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationId, MessageRole, TenantId, ThreadId};
    use chrono::{DateTime, Duration, Utc};

    fn hit(id: &str, score: f32, created_at: DateTime<Utc>) -> IndexHit {
        IndexHit {
            doc: IndexedMessage {
                id: MessageId::new(id),
                tenant: TenantId::new("t1"),
                thread_id: ThreadId::new("th"),
                conversation_id: ConversationId::new("c"),
                project_id: None,
                role: MessageRole::User,
                text: id.to_string(),
                created_at,
            },
            score,
        }
    }

    #[test]
    fn test_normalize_min_max() {
        let now = Utc::now();
        let hits = [hit("a", 2.0, now), hit("b", 4.0, now), hit("c", 3.0, now)];
        assert_eq!(normalize_scores(&hits), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_normalize_all_equal_is_one() {
        let now = Utc::now();
        let hits = [hit("a", 0.3, now), hit("b", 0.3, now)];
        assert_eq!(normalize_scores(&hits), vec![1.0, 1.0]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_fuse_weights_and_match_types() {
        let now = Utc::now();
        let keyword = [hit("both", 5.0, now), hit("kw", 1.0, now)];
        let semantic = [hit("both", 0.9, now), hit("sem", 0.1, now)];

        let fused = fuse(&keyword, &semantic, (0.5, 0.5));
        let ids: Vec<&str> = fused.iter().map(|f| f.doc.id.as_str()).collect();
        assert_eq!(ids, vec!["both", "kw", "sem"]);
        assert!((fused[0].score - 1.0).abs() < f32::EPSILON);
        assert_eq!(fused[0].match_type(), ResultMatchType::Hybrid);
        assert_eq!(fused[1].match_type(), ResultMatchType::Keyword);
        assert_eq!(fused[2].match_type(), ResultMatchType::Semantic);
    }

    #[test]
    fn test_ties_prefer_newer_then_id() {
        let now = Utc::now();
        let keyword = [
            hit("b", 1.0, now - Duration::seconds(5)),
            hit("old", 1.0, now - Duration::seconds(60)),
            hit("a", 1.0, now - Duration::seconds(5)),
            hit("new", 1.0, now),
        ];
        let fused = fuse(&keyword, &[], (1.0, 0.0));
        let ids: Vec<&str> = fused.iter().map(|f| f.doc.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "a", "b", "old"]);
    }
}

use std::cmp::Ordering;

use crate::index::SearchHit;

/// Relevance thresholds for filtering search results.
pub mod threshold {
    pub const STRICT: f32 = 0.5;
    pub const MODERATE: f32 = 0.3;
    pub const RELAXED: f32 = 0.1;
    pub const NONE: f32 = 0.0;
}

/// Filtering layer over raw search hits.
///
/// Today the rerank step is a stable re-sort by score; the seam exists so a
/// learned reranker can slot in without touching callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reranker;

impl Reranker {
    /// Keep hits with `score >= min_relevance`. A threshold of 0.0 is the
    /// identity; 1.0 keeps only exact-similarity hits.
    pub fn filter_by_relevance(hits: Vec<SearchHit>, min_relevance: f32) -> Vec<SearchHit> {
        hits.into_iter()
            .filter(|hit| hit.score >= min_relevance)
            .collect()
    }

    /// Filter, then (when enabled) stable-sort by score descending.
    pub fn process(
        _query: &str,
        hits: Vec<SearchHit>,
        min_relevance: Option<f32>,
        enable_rerank: bool,
    ) -> Vec<SearchHit> {
        let mut hits = match min_relevance {
            Some(min) => Self::filter_by_relevance(hits, min),
            None => hits,
        };
        if enable_rerank {
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            source: "doc".to_string(),
            content: String::new(),
            score,
        }
    }

    #[test]
    fn zero_threshold_is_identity() {
        let hits = vec![hit("a", 0.9), hit("b", 0.1), hit("c", 0.0)];
        let filtered = Reranker::filter_by_relevance(hits.clone(), threshold::NONE);
        assert_eq!(filtered.len(), hits.len());
    }

    #[test]
    fn unit_threshold_keeps_only_exact_matches() {
        let hits = vec![hit("a", 1.0), hit("b", 0.999)];
        let filtered = Reranker::filter_by_relevance(hits, 1.0);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "a");
    }

    #[test]
    fn process_filters_then_sorts() {
        let hits = vec![hit("low", 0.2), hit("high", 0.8), hit("mid", 0.5)];
        let processed = Reranker::process("q", hits, Some(threshold::MODERATE), true);
        let ids: Vec<&str> = processed.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn rerank_is_stable_for_equal_scores() {
        let hits = vec![hit("first", 0.5), hit("second", 0.5)];
        let processed = Reranker::process("q", hits, None, true);
        assert_eq!(processed[0].id, "first");
        assert_eq!(processed[1].id, "second");
    }
}

//! Token-overlap similarity over context records

use super::models::{ContextRecord, SimilarContext};
use crate::config::RetrievalConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid identifier pattern"));

/// Lowercased identifiers and keywords of `text`
pub fn tokenize(text: &str) -> HashSet<String> {
    IDENTIFIER
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// |A ∩ B| / |A ∪ B|; two empty sets are identical
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Rank `records` against `snippet`
///
/// Records scoring below `caller_score - score_margin` are skipped. Results
/// need a similarity above zero and at or above the configured threshold,
/// and are ordered by similarity, then score, then recency.
pub fn find_similar<'a>(
    snippet: &str,
    caller_score: f64,
    records: impl IntoIterator<Item = &'a ContextRecord>,
    config: &RetrievalConfig,
) -> Vec<SimilarContext> {
    let query = tokenize(snippet);
    let floor = caller_score - config.score_margin;

    let mut matches: Vec<SimilarContext> = records
        .into_iter()
        .filter(|record| record.quality_score >= floor)
        .filter_map(|record| {
            let similarity = jaccard(&query, &tokenize(&record.original_code));
            (similarity > 0.0 && similarity >= config.similarity_threshold).then(|| SimilarContext {
                record: record.clone(),
                similarity,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(b.record.quality_score.total_cmp(&a.record.quality_score))
            .then(b.record.id.cmp(&a.record.id))
    });
    matches.truncate(config.max_results);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: i64, code: &str, score: f64) -> ContextRecord {
        ContextRecord {
            id,
            original_code: code.to_string(),
            improved_code: code.to_string(),
            quality_score: score,
            timestamp: Utc::now(),
            patterns: Vec::new(),
        }
    }

    #[test]
    fn test_identical_token_sets() {
        let a = tokenize("def f(x): return x + 1");
        let b = tokenize("def   F(X):\n    return x+1");
        assert_eq!(jaccard(&a, &b), 1.0);
    }

    #[test]
    fn test_disjoint_token_sets() {
        let a = tokenize("alpha beta");
        let b = tokenize("gamma delta");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn test_empty_sets() {
        let empty = tokenize("");
        assert_eq!(jaccard(&empty, &empty), 1.0);
        assert_eq!(jaccard(&empty, &tokenize("x")), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let a = tokenize("a b c");
        let b = tokenize("b c d");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_margin_filters_worse_exemplars() {
        let records = vec![
            record(1, "def ratio(a, b): return a / b", 30.0),
            record(2, "def ratio(a, b): return a / b", 45.0),
        ];
        let config = RetrievalConfig::default();
        let found = find_similar("def ratio(a, b): pass", 50.0, &records, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.id, 2);
    }

    #[test]
    fn test_ranking_and_disjoint_exclusion() {
        let records = vec![
            record(1, "import os", 90.0),
            record(2, "total = price * qty", 90.0),
            record(3, "total = price", 90.0),
        ];
        let config = RetrievalConfig::default();
        let found = find_similar("total = price", 50.0, &records, &config);
        let ids: Vec<i64> = found.iter().map(|s| s.record.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(found[0].similarity, 1.0);
    }

    #[test]
    fn test_threshold_and_limit() {
        let records: Vec<ContextRecord> = (0..20).map(|i| record(i, "a b c d", 80.0)).collect();
        let config = RetrievalConfig {
            similarity_threshold: 0.3,
            max_results: 5,
            ..Default::default()
        };
        assert_eq!(find_similar("a b c d", 50.0, &records, &config).len(), 5);
        assert!(find_similar("a x y z", 50.0, &records, &config).is_empty());
    }
}

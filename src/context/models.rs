//! Data models for assembled transformation context

use crate::analysis::{Issue, QualityScore};
use crate::memory::SimilarContext;
use crate::patterns::SafePattern;
use serde::{Deserialize, Serialize};

/// Everything the transformer gets to see about one snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredContext {
    pub original_code: String,
    pub issues: Vec<Issue>,
    pub quality_score: QualityScore,
    pub safe_patterns: Vec<SafePattern>,
    pub similar_contexts: Vec<SimilarContext>,
    pub constraints: Vec<String>,
    /// Plain-text rendering of the above
    pub prompt: String,
}

impl StructuredContext {
    /// Issue kinds in first-seen order
    pub fn issue_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = Vec::new();
        for issue in &self.issues {
            if !kinds.contains(&issue.kind) {
                kinds.push(issue.kind.clone());
            }
        }
        kinds
    }

    /// Template for `kind`, if one was assembled
    pub fn pattern_for(&self, kind: &str) -> Option<&SafePattern> {
        self.safe_patterns.iter().find(|p| p.kind == kind)
    }
}

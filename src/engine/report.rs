//! Report types returned by the engine operations

use crate::analysis::{AnalysisSummary, Issue, QualityScore, QualitySignal};
use crate::memory::{SimilarContext, StorageMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of `validate_and_improve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Safe,
    Improved,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Safe => "safe",
            ReportStatus::Improved => "improved",
        }
    }
}

/// What the memory contributed to a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInsights {
    pub similar_contexts: Vec<SimilarContext>,
    pub memory_size: usize,
    pub storage_mode: StorageMode,
    /// Name of the pattern source consulted
    pub pattern_source: String,
    pub safe_patterns: usize,
}

/// Result of `validate_and_improve`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub request_id: Uuid,
    pub status: ReportStatus,
    pub original_code: String,
    /// Equal to `original_code` unless a transformation was kept
    pub improved_code: String,
    /// Score of `improved_code`
    pub quality_score: QualityScore,
    pub original_score: f64,
    pub improved_score: f64,
    pub delta: f64,
    /// Issues found in the original code
    pub issues: Vec<Issue>,
    pub summary: AnalysisSummary,
    pub signals: Vec<QualitySignal>,
    /// Issue kinds whose fixer was applied
    pub patterns_used: Vec<String>,
    pub context_insights: ContextInsights,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub message: String,
}

impl Report {
    pub fn is_safe(&self) -> bool {
        self.status == ReportStatus::Safe
    }

    /// Render as JSON for a transport layer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Result of `learn`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnAck {
    pub patterns_learned: usize,
    pub memory_size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ReportStatus::Improved).unwrap(), "\"improved\"");
        assert_eq!(ReportStatus::Safe.as_str(), "safe");
    }

    #[test]
    fn test_ack_field_names() {
        let ack = LearnAck {
            patterns_learned: 2,
            memory_size: 7,
            warnings: Vec::new(),
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["patternsLearned"], 2);
        assert_eq!(json["memorySize"], 7);
        assert!(json.get("warnings").is_none());
    }
}

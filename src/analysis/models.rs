//! Data models for snippet analysis

use crate::config::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Safety penalty for one issue of this severity
    pub fn penalty(&self, config: &ScoringConfig) -> f64 {
        match self {
            Severity::Low => config.penalties.low,
            Severity::Medium => config.penalties.medium,
            Severity::High => config.penalties.high,
            Severity::Critical => config.penalties.critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue kind identifiers
pub mod kinds {
    pub const SYNTAX_ERROR: &str = "syntax_error";
    pub const DIVISION_BY_ZERO: &str = "division_by_zero";
    pub const NO_EXCEPTION_HANDLING: &str = "no_exception_handling";
    pub const EVAL_USAGE: &str = "eval_usage";
    pub const BARE_EXCEPT: &str = "bare_except";
}

/// A detected risk pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    /// 1-based line number
    pub line: usize,
    pub matched_text: String,
}

/// Positive idioms recognised while scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySignal {
    Docstring,
    TypeHints,
    MultiLine,
    InlineComments,
    Comprehension,
    TupleSwap,
    ContextManager,
    TypedException,
}

impl QualitySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualitySignal::Docstring => "docstring",
            QualitySignal::TypeHints => "type_hints",
            QualitySignal::MultiLine => "multi_line",
            QualitySignal::InlineComments => "inline_comments",
            QualitySignal::Comprehension => "comprehension",
            QualitySignal::TupleSwap => "tuple_swap",
            QualitySignal::ContextManager => "context_manager",
            QualitySignal::TypedException => "typed_exception",
        }
    }
}

/// Heuristic quality score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Raw readability points (before weighting)
    pub readability: f64,
    /// Raw performance points, may be negative
    pub performance: f64,
    /// Sum of safety penalties, zero or negative
    pub safety: f64,
    /// Weighted total clamped to [0, 100]
    pub total: f64,
}

impl QualityScore {
    /// Create a score with the total computed from the given weights
    pub fn new(readability: f64, performance: f64, safety: f64, config: &ScoringConfig) -> Self {
        let mut score = Self {
            readability,
            performance,
            safety,
            total: 0.0,
        };
        score.calculate_total(config);
        score
    }

    /// total = clamp(base + w_r * readability + w_p * performance + safety, 0, 100)
    pub fn calculate_total(&mut self, config: &ScoringConfig) {
        let raw = config.base
            + self.readability * config.readability_weight
            + self.performance * config.performance_weight
            + self.safety;

        self.total = if raw.is_finite() { raw.clamp(0.0, 100.0) } else { 0.0 };
    }
}

/// Counts attached to every analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total_issues: usize,
    pub critical_issues: usize,
    pub line_count: usize,
}

/// Result of analysing one snippet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub snippet: String,
    pub syntax_valid: bool,
    pub issues: Vec<Issue>,
    pub quality_score: QualityScore,
    pub signals: Vec<QualitySignal>,
    pub summary: AnalysisSummary,
}

impl Analysis {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Number of issues of one kind
    pub fn count_kind(&self, kind: &str) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    /// Distinct issue kinds in first-seen order
    pub fn kinds(&self) -> Vec<String> {
        let mut seen = indexmap::IndexSet::new();
        for issue in &self.issues {
            seen.insert(issue.kind.clone());
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_uses_weights() {
        let config = ScoringConfig::default();
        let score = QualityScore::new(30.0, 10.0, -15.0, &config);
        // 50 + 18 + 3 - 15
        assert!((score.total - 56.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_is_clamped() {
        let config = ScoringConfig::default();
        assert_eq!(QualityScore::new(0.0, 0.0, -300.0, &config).total, 0.0);
        assert_eq!(QualityScore::new(500.0, 0.0, 0.0, &config).total, 100.0);
    }

    #[test]
    fn test_non_finite_total_collapses_to_zero() {
        let config = ScoringConfig::default();
        assert_eq!(QualityScore::new(f64::NAN, 0.0, 0.0, &config).total, 0.0);
    }

    #[test]
    fn test_each_severity_has_one_penalty() {
        let config = ScoringConfig::default();
        assert_eq!(Severity::Critical.penalty(&config), 30.0);
        assert_eq!(Severity::High.penalty(&config), 15.0);
        assert_eq!(Severity::Medium.penalty(&config), 5.0);
        assert_eq!(Severity::Low.penalty(&config), 0.0);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}

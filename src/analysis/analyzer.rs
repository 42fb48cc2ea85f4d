//! Snippet analyzer: syntax check, rule matching and scoring

use super::lexer::MaskedSource;
use super::models::{kinds, Analysis, AnalysisSummary, Issue, Severity};
use super::rules::{RuleRegistry, SourceView};
use super::scoring::QualityScorer;
use super::syntax::check_syntax;
use crate::config::ScoringConfig;
use crate::metrics::ENGINE_METRICS;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Pure analyzer over a rule registry
#[derive(Clone)]
pub struct PatternAnalyzer {
    rules: Arc<RuleRegistry>,
    scorer: QualityScorer,
}

impl PatternAnalyzer {
    pub fn new(rules: Arc<RuleRegistry>, scoring: ScoringConfig) -> Self {
        Self {
            rules,
            scorer: QualityScorer::new(scoring),
        }
    }

    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    /// Analyze one snippet
    ///
    /// A parse failure becomes a `critical` `syntax_error` issue and the
    /// remaining rules still run.
    pub fn analyze(&self, snippet: &str) -> Analysis {
        let start = Instant::now();

        let mut issues: Vec<Issue> = Vec::new();
        let syntax = check_syntax(snippet);
        let syntax_valid = syntax.is_none();

        if let Some(fault) = syntax {
            issues.push(Issue {
                kind: kinds::SYNTAX_ERROR.to_string(),
                severity: Severity::Critical,
                description: format!("Syntax error: {}", fault.message),
                line: fault.line,
                matched_text: snippet
                    .split('\n')
                    .nth(fault.line.saturating_sub(1))
                    .unwrap_or("")
                    .trim()
                    .chars()
                    .take(120)
                    .collect(),
            });
        }

        let masked = MaskedSource::new(snippet);
        let view = SourceView::new(snippet, &masked);

        issues.extend(self.rules.detect(&view));
        issues.sort_by_key(|issue| issue.line);

        let signals = self.scorer.signals(&view);
        let quality_score = self.scorer.score(&view, &signals, &issues);

        let summary = AnalysisSummary {
            total_issues: issues.len(),
            critical_issues: issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count(),
            line_count: if snippet.is_empty() {
                0
            } else {
                snippet.lines().count()
            },
        };

        ENGINE_METRICS
            .analysis_duration
            .observe(start.elapsed().as_secs_f64());

        debug!(
            "Analyzed {} bytes: {} issue(s), score {:.1}",
            snippet.len(),
            issues.len(),
            quality_score.total
        );

        Analysis {
            snippet: snippet.to_string(),
            syntax_valid,
            issues,
            quality_score,
            signals,
            summary,
        }
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(RuleRegistry::builtin()), ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_snippet() {
        let analysis = PatternAnalyzer::default().analyze("def ratio(a,b): return a/b");
        assert!(analysis.syntax_valid);
        assert_eq!(analysis.issues.len(), 1);
        assert_eq!(analysis.issues[0].kind, kinds::DIVISION_BY_ZERO);
        assert_eq!(analysis.issues[0].severity, Severity::High);
        assert_eq!(analysis.issues[0].line, 1);
        assert_eq!(analysis.summary.total_issues, 1);
    }

    #[test]
    fn test_syntax_error_does_not_stop_rules() {
        let analysis = PatternAnalyzer::default().analyze("def f(:\n    return eval(x)\n");
        assert!(!analysis.syntax_valid);
        assert_eq!(analysis.count_kind(kinds::SYNTAX_ERROR), 1);
        assert_eq!(analysis.count_kind(kinds::EVAL_USAGE), 1);
        assert_eq!(analysis.summary.critical_issues, 2);
    }

    #[test]
    fn test_empty_snippet() {
        let analysis = PatternAnalyzer::default().analyze("");
        assert!(analysis.syntax_valid);
        assert!(analysis.issues.is_empty());
        assert_eq!(analysis.quality_score.total, 50.0);
        assert_eq!(analysis.summary.line_count, 0);
    }

    #[test]
    fn test_kinds_are_distinct_in_order() {
        let src = "a = eval(x)\nb = eval(y)\nc = p / q\n";
        let analysis = PatternAnalyzer::default().analyze(src);
        assert_eq!(analysis.issues.len(), 3);
        assert_eq!(
            analysis.kinds(),
            vec![kinds::EVAL_USAGE.to_string(), kinds::DIVISION_BY_ZERO.to_string()]
        );
    }

    #[test]
    fn test_garbage_input_scores_in_range() {
        let analysis = PatternAnalyzer::default().analyze("\u{0}\u{fffd}))((:::\"\"\"");
        assert!((0.0..=100.0).contains(&analysis.quality_score.total));
    }
}

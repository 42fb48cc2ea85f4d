//! Heuristic quality scoring

use super::layout::starts_with_word;
use super::models::{Issue, QualityScore, QualitySignal};
use super::rules::SourceView;
use crate::config::ScoringConfig;
use once_cell::sync::Lazy;
use regex::Regex;

static RETURN_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\)\s*->").expect("valid annotation pattern"));

static COMPREHENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\[{(][^\[\]{}()]*?\bfor\b[^\[\]{}()]*?\bin\b").expect("valid comprehension pattern")
});

static TUPLE_SWAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*([A-Za-z_][\w.]*)\s*,\s*([A-Za-z_][\w.]*)\s*=\s*([A-Za-z_][\w.]*)\s*,\s*([A-Za-z_][\w.]*)\s*$",
    )
    .expect("valid swap pattern")
});

static CACHE_DECORATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*@(?:functools\.)?(?:lru_cache|cache)\b").expect("valid decorator pattern")
});

static TYPED_EXCEPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*except\s+[A-Za-z_(]").expect("valid except pattern"));

static FUNCTION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)").expect("valid def pattern")
});

/// Computes readability, performance and safety sub-scores
#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: ScoringConfig,
}

impl QualityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Positive idioms present in the snippet
    pub fn signals(&self, view: &SourceView) -> Vec<QualitySignal> {
        let code = view.masked.code.as_str();
        let layout = &view.layout;
        let mut signals = Vec::new();

        if view.masked.has_docstring() {
            signals.push(QualitySignal::Docstring);
        }

        let has_def = (0..layout.len()).any(|i| function_name(layout.trimmed(i)).is_some());
        if has_def && RETURN_ANNOTATION.is_match(code) {
            signals.push(QualitySignal::TypeHints);
        }

        let code_lines = view
            .source
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .count();
        if code_lines > 1 {
            signals.push(QualitySignal::MultiLine);
        }

        if view.masked.has_comments() {
            signals.push(QualitySignal::InlineComments);
        }

        if COMPREHENSION.is_match(code) {
            signals.push(QualitySignal::Comprehension);
        }

        let swap = TUPLE_SWAP.captures_iter(code).any(|caps| {
            caps.get(1).map(|m| m.as_str()) == caps.get(4).map(|m| m.as_str())
                && caps.get(2).map(|m| m.as_str()) == caps.get(3).map(|m| m.as_str())
                && caps.get(1).map(|m| m.as_str()) != caps.get(2).map(|m| m.as_str())
        });
        if swap {
            signals.push(QualitySignal::TupleSwap);
        }

        if (0..layout.len()).any(|i| {
            let t = layout.trimmed(i);
            starts_with_word(t, "with") || t.starts_with("async with ")
        }) {
            signals.push(QualitySignal::ContextManager);
        }

        if TYPED_EXCEPT.is_match(code) {
            signals.push(QualitySignal::TypedException);
        }

        signals
    }

    /// Score a snippet given its signals and detected issues
    pub fn score(&self, view: &SourceView, signals: &[QualitySignal], issues: &[Issue]) -> QualityScore {
        let bonuses = &self.config.bonuses;

        let mut readability = 0.0;
        let mut performance = 0.0;

        for signal in signals {
            match signal {
                QualitySignal::Docstring => readability += bonuses.docstring,
                QualitySignal::TypeHints => readability += bonuses.type_hints,
                QualitySignal::MultiLine => readability += bonuses.multi_line,
                QualitySignal::InlineComments => readability += bonuses.inline_comments,
                QualitySignal::Comprehension => performance += bonuses.comprehension,
                QualitySignal::TupleSwap => performance += bonuses.tuple_swap,
                QualitySignal::ContextManager | QualitySignal::TypedException => {}
            }
        }

        if CACHE_DECORATOR.is_match(&view.masked.code) {
            performance -= bonuses.unnecessary_cache;
        }

        if has_unbounded_recursion(view) {
            performance -= bonuses.unbounded_recursion;
        }

        let safety: f64 = issues
            .iter()
            .map(|issue| -issue.severity.penalty(&self.config))
            .sum();

        QualityScore::new(readability, performance, safety, &self.config)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

fn function_name(trimmed: &str) -> Option<&str> {
    FUNCTION_NAME
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// A function that calls itself with no conditional anywhere in its body
fn has_unbounded_recursion(view: &SourceView) -> bool {
    let layout = &view.layout;

    (0..layout.len()).any(|i| {
        let Some(name) = function_name(layout.trimmed(i)) else {
            return false;
        };
        let Ok(call) = Regex::new(&format!(r"(?:^|[^.\w]){}\s*\(", regex::escape(name))) else {
            return false;
        };

        let end = layout.block_end(i);
        let header_end = layout.logical_end(i);
        let inline_body = layout
            .inline_suite_colon(i)
            .map(|colon| &layout.text(i)[colon + 1..]);

        let body: Vec<&str> = inline_body
            .into_iter()
            .chain(((header_end + 1)..=end).map(|j| layout.text(j)))
            .collect();

        let recursive = body.iter().any(|line| call.is_match(line));
        let bounded = body.iter().any(|line| {
            let t = line.trim();
            starts_with_word(t, "if")
                || starts_with_word(t, "elif")
                || starts_with_word(t, "while")
                || t.contains(" if ")
        });

        recursive && !bounded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lexer::MaskedSource;
    use crate::analysis::models::Severity;

    fn score_of(src: &str, issues: &[Issue]) -> (QualityScore, Vec<QualitySignal>) {
        let masked = MaskedSource::new(src);
        let view = SourceView::new(src, &masked);
        let scorer = QualityScorer::default();
        let signals = scorer.signals(&view);
        (scorer.score(&view, &signals, issues), signals)
    }

    fn issue(severity: Severity) -> Issue {
        Issue {
            kind: "k".to_string(),
            severity,
            description: String::new(),
            line: 1,
            matched_text: String::new(),
        }
    }

    #[test]
    fn test_empty_snippet_scores_base() {
        let (score, signals) = score_of("", &[]);
        assert!(signals.is_empty());
        assert_eq!(score.total, 50.0);
    }

    #[test]
    fn test_readability_bonuses() {
        let src = "def area(r: float) -> float:\n    \"\"\"Circle area.\"\"\"\n    # pi r squared\n    return 3.14159 * r * r\n";
        let (score, signals) = score_of(src, &[]);
        assert!(signals.contains(&QualitySignal::Docstring));
        assert!(signals.contains(&QualitySignal::TypeHints));
        assert!(signals.contains(&QualitySignal::MultiLine));
        assert!(signals.contains(&QualitySignal::InlineComments));
        assert_eq!(score.readability, 35.0);
        assert!((score.total - 71.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_signals() {
        let src = "squares = [x * x for x in items]\na, b = b, a\n";
        let (score, signals) = score_of(src, &[]);
        assert!(signals.contains(&QualitySignal::Comprehension));
        assert!(signals.contains(&QualitySignal::TupleSwap));
        assert_eq!(score.performance, 15.0);
    }

    #[test]
    fn test_swap_requires_mirrored_names() {
        let (_, signals) = score_of("a, b = c, d\n", &[]);
        assert!(!signals.contains(&QualitySignal::TupleSwap));
    }

    #[test]
    fn test_recursion_penalties() {
        let unbounded = "def walk(n):\n    return walk(n - 1)\n";
        let (score, _) = score_of(unbounded, &[]);
        assert_eq!(score.performance, -10.0);

        let bounded = "def fact(n):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n";
        let (score, _) = score_of(bounded, &[]);
        assert_eq!(score.performance, 0.0);

        let cached = "@lru_cache\ndef fact(n):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n";
        let (score, _) = score_of(cached, &[]);
        assert_eq!(score.performance, -5.0);
    }

    #[test]
    fn test_safety_penalties_per_severity() {
        let issues = vec![
            issue(Severity::Critical),
            issue(Severity::High),
            issue(Severity::Medium),
            issue(Severity::Low),
        ];
        let (score, _) = score_of("x", &issues);
        assert_eq!(score.safety, -50.0);
        assert_eq!(score.total, 0.0);
    }

    #[test]
    fn test_context_manager_and_typed_except_signals() {
        let src = "try:\n    with open(p) as f:\n        pass\nexcept OSError:\n    pass\n";
        let (_, signals) = score_of(src, &[]);
        assert!(signals.contains(&QualitySignal::ContextManager));
        assert!(signals.contains(&QualitySignal::TypedException));
    }
}

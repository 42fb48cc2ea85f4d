//! Context assembly

use super::models::StructuredContext;
use crate::analysis::Analysis;
use crate::config::AssemblerConfig;
use crate::memory::SimilarContext;
use crate::patterns::SafePattern;
use std::fmt::Write;

/// Merges an analysis with pattern hits and similar contexts
///
/// Pure: the same inputs always give the same context.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn assemble(
        &self,
        analysis: &Analysis,
        patterns: &[SafePattern],
        similar: &[SimilarContext],
    ) -> StructuredContext {
        let safe_patterns: Vec<SafePattern> =
            patterns.iter().take(self.config.max_patterns).cloned().collect();
        let similar_contexts: Vec<SimilarContext> =
            similar.iter().take(self.config.max_similar).cloned().collect();

        let mut context = StructuredContext {
            original_code: analysis.snippet.clone(),
            issues: analysis.issues.clone(),
            quality_score: analysis.quality_score.clone(),
            safe_patterns,
            similar_contexts,
            constraints: self.config.constraints.clone(),
            prompt: String::new(),
        };
        context.prompt = render_prompt(&context);
        context
    }
}

fn render_prompt(context: &StructuredContext) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Improve the following Python code.");
    let _ = writeln!(out, "Current quality score: {:.1}/100\n", context.quality_score.total);
    let _ = writeln!(out, "```python\n{}\n```\n", context.original_code.trim_end());

    if !context.issues.is_empty() {
        let _ = writeln!(out, "Issues:");
        for issue in &context.issues {
            let _ = writeln!(
                out,
                "- [{}] line {}: {} ({})",
                issue.severity.as_str(),
                issue.line,
                issue.description,
                issue.kind
            );
        }
        out.push('\n');
    }

    if !context.safe_patterns.is_empty() {
        let _ = writeln!(out, "Safe patterns:");
        for pattern in &context.safe_patterns {
            let _ = writeln!(out, "# {}\n{}", pattern.kind, pattern.template.trim_end());
        }
        out.push('\n');
    }

    if !context.similar_contexts.is_empty() {
        let _ = writeln!(out, "Similar past improvements:");
        for similar in &context.similar_contexts {
            let _ = writeln!(
                out,
                "- similarity {:.2}, score {:.1}:\n{}",
                similar.similarity,
                similar.record.quality_score,
                similar.record.improved_code.trim_end()
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Constraints:");
    for constraint in &context.constraints {
        let _ = writeln!(out, "- {}", constraint);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{kinds, PatternAnalyzer};
    use crate::memory::ContextRecord;
    use crate::patterns::PatternOrigin;
    use chrono::Utc;

    fn similar(id: i64) -> SimilarContext {
        SimilarContext {
            record: ContextRecord {
                id,
                original_code: "x = a / b".to_string(),
                improved_code: "try:\n    x = a / b\nexcept ZeroDivisionError:\n    x = None".to_string(),
                quality_score: 60.0,
                timestamp: Utc::now(),
                patterns: Vec::new(),
            },
            similarity: 0.5,
        }
    }

    #[test]
    fn test_caps_patterns_and_similar() {
        let analysis = PatternAnalyzer::default().analyze("x = a / b");
        let patterns: Vec<SafePattern> = (0..5)
            .map(|i| SafePattern::new(kinds::DIVISION_BY_ZERO, format!("t{}", i), PatternOrigin::Catalog))
            .collect();
        let similar: Vec<SimilarContext> = (0..5).map(similar).collect();

        let context = ContextAssembler::default().assemble(&analysis, &patterns, &similar);
        assert_eq!(context.safe_patterns.len(), 3);
        assert_eq!(context.similar_contexts.len(), 3);
        assert_eq!(context.safe_patterns[0].template, "t0");
        assert_eq!(context.issue_kinds(), vec![kinds::DIVISION_BY_ZERO.to_string()]);
    }

    #[test]
    fn test_constraints_and_prompt() {
        let analysis = PatternAnalyzer::default().analyze("y = eval(s)");
        let context = ContextAssembler::default().assemble(&analysis, &[], &[]);

        assert!(!context.constraints.is_empty());
        assert!(context.prompt.contains("eval_usage"));
        assert!(context.prompt.contains("Constraints:"));
        assert!(context.pattern_for(kinds::EVAL_USAGE).is_none());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let analysis = PatternAnalyzer::default().analyze("x = a / b");
        let assembler = ContextAssembler::default();
        let a = assembler.assemble(&analysis, &[], &[similar(1)]);
        let b = assembler.assemble(&analysis, &[], &[similar(1)]);
        assert_eq!(a, b);
    }
}

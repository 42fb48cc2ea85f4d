//! Applies the registered fixers for every issue kind in a context

use super::{FixError, FixerRegistry};
use crate::analysis::RuleRegistry;
use crate::context::StructuredContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Result of one transformation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformation {
    pub code: String,
    /// Kinds whose fixer changed the code
    pub applied: Vec<String>,
    /// Kinds with no rule or no fixer
    pub unfixable: Vec<String>,
}

impl Transformation {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Rule-keyed rewrite engine
pub struct Transformer {
    rules: Arc<RuleRegistry>,
    fixers: FixerRegistry,
}

impl Transformer {
    pub fn new(rules: Arc<RuleRegistry>, fixers: FixerRegistry) -> Self {
        Self { rules, fixers }
    }

    /// Built-in fixers over `rules`
    pub fn builtin(rules: Arc<RuleRegistry>) -> Self {
        Self::new(rules, FixerRegistry::builtin())
    }

    pub fn fixers(&self) -> &FixerRegistry {
        &self.fixers
    }

    /// Run the fixer of each distinct issue kind in first-seen order
    ///
    /// Kinds without a rule or fixer (such as `syntax_error`) are reported in
    /// `unfixable` and left alone. A rule naming a fixer that is not
    /// registered is an error.
    pub fn transform(&self, context: &StructuredContext) -> Result<Transformation, FixError> {
        let mut code = context.original_code.clone();
        let mut applied = Vec::new();
        let mut unfixable = Vec::new();

        for kind in context.issue_kinds() {
            let Some(rule) = self.rules.get(&kind) else {
                unfixable.push(kind);
                continue;
            };
            let Some(name) = rule.fixer else {
                unfixable.push(kind);
                continue;
            };
            let fixer = self
                .fixers
                .get(name)
                .ok_or_else(|| FixError::UnknownFixer(name.to_string()))?;

            let fixed = fixer.apply(&code, rule)?;
            if fixed != code {
                debug!("Fixer {} rewrote {} -> {} bytes", name, code.len(), fixed.len());
                code = fixed;
                applied.push(kind);
            }
        }

        Ok(Transformation {
            code,
            applied,
            unfixable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{kinds, PatternAnalyzer};
    use crate::context::ContextAssembler;

    fn context(src: &str) -> StructuredContext {
        let analysis = PatternAnalyzer::default().analyze(src);
        ContextAssembler::default().assemble(&analysis, &[], &[])
    }

    fn transformer() -> Transformer {
        Transformer::builtin(Arc::new(RuleRegistry::builtin()))
    }

    #[test]
    fn test_mixed_kinds_all_fixed() {
        let src = "def load(path, n):\n    data = eval(open(path).read())\n    try:\n        return len(data) / n\n    except:\n        return 0\n";
        let result = transformer().transform(&context(src)).unwrap();

        let after = PatternAnalyzer::default().analyze(&result.code);
        assert_eq!(after.count_kind(kinds::EVAL_USAGE), 0);
        assert_eq!(after.count_kind(kinds::NO_EXCEPTION_HANDLING), 0);
        assert_eq!(after.count_kind(kinds::BARE_EXCEPT), 0);
        assert!(after.syntax_valid, "{}", result.code);
        assert!(result.changed());
    }

    #[test]
    fn test_syntax_error_is_unfixable() {
        let result = transformer().transform(&context("def broken(:\n    pass")).unwrap();
        assert!(result.unfixable.contains(&kinds::SYNTAX_ERROR.to_string()));
    }

    #[test]
    fn test_clean_code_untouched() {
        let src = "x = 1\n";
        let result = transformer().transform(&context(src)).unwrap();
        assert_eq!(result.code, src);
        assert!(!result.changed());
    }

    #[test]
    fn test_missing_fixer_is_error() {
        let t = Transformer::new(Arc::new(RuleRegistry::builtin()), FixerRegistry::new());
        let err = t.transform(&context("eval(x)")).unwrap_err();
        assert_eq!(err, FixError::UnknownFixer("literal_eval".to_string()));
    }

    #[test]
    fn test_transform_twice_is_stable() {
        let t = transformer();
        let first = t.transform(&context("x = a / b\ny = eval(s)")).unwrap();
        let second = t.transform(&context(&first.code)).unwrap();
        assert_eq!(first.code, second.code);
        assert!(!second.changed());
    }
}

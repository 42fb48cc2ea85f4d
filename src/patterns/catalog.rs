//! Static catalog of safe rewrite templates

use super::models::{PatternOrigin, SafePattern};
use crate::analysis::kinds;
use indexmap::IndexMap;

const SAFE_DIVIDE: &str = r#"def safe_divide(numerator, denominator):
    try:
        return numerator / denominator
    except ZeroDivisionError:
        return None
"#;

const SAFE_READ: &str = r#"def read_text(path):
    try:
        with open(path, "r") as handle:
            return handle.read()
    except (FileNotFoundError, PermissionError):
        return ""
"#;

const SAFE_EVAL: &str = r#"import ast

def parse_literal(expression):
    try:
        return ast.literal_eval(expression)
    except (ValueError, SyntaxError):
        return None
"#;

const TYPED_EXCEPT: &str = r#"try:
    run()
except ValueError as exc:
    logger.warning("invalid value: %s", exc)
except Exception:
    logger.exception("unexpected failure")
"#;

/// Issue kind to template table, always available
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    entries: IndexMap<String, String>,
}

impl PatternCatalog {
    /// Templates for the built-in rules
    pub fn builtin() -> Self {
        let mut entries = IndexMap::new();
        entries.insert(kinds::DIVISION_BY_ZERO.to_string(), SAFE_DIVIDE.to_string());
        entries.insert(kinds::NO_EXCEPTION_HANDLING.to_string(), SAFE_READ.to_string());
        entries.insert(kinds::EVAL_USAGE.to_string(), SAFE_EVAL.to_string());
        entries.insert(kinds::BARE_EXCEPT.to_string(), TYPED_EXCEPT.to_string());
        Self { entries }
    }

    /// Add or replace the template for a kind
    pub fn insert(&mut self, kind: impl Into<String>, template: impl Into<String>) {
        self.entries.insert(kind.into(), template.into());
    }

    pub fn get(&self, kind: &str) -> Option<&str> {
        self.entries.get(kind).map(|t| t.as_str())
    }

    /// Templates for the given kinds, in the order asked
    pub fn lookup(&self, kinds: &[String]) -> Vec<SafePattern> {
        kinds
            .iter()
            .filter_map(|kind| {
                self.get(kind)
                    .map(|template| SafePattern::new(kind.clone(), template, PatternOrigin::Catalog))
            })
            .collect()
    }

    /// Every entry as a pattern
    pub fn all(&self) -> Vec<SafePattern> {
        self.entries
            .iter()
            .map(|(kind, template)| SafePattern::new(kind.clone(), template.clone(), PatternOrigin::Catalog))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

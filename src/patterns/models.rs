//! Data models for safe rewrite patterns

use serde::{Deserialize, Serialize};

/// Where a pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternOrigin {
    Catalog,
    Index,
    Learned,
}

/// A canonical rewrite template for one issue kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafePattern {
    pub kind: String,
    pub template: String,
    pub origin: PatternOrigin,
    /// Relevance score reported by the index, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

impl SafePattern {
    pub fn new(kind: impl Into<String>, template: impl Into<String>, origin: PatternOrigin) -> Self {
        Self {
            kind: kind.into(),
            template: template.into(),
            origin,
            relevance: None,
        }
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = Some(relevance);
        self
    }

    /// Stable content hash used for deduplication and index point ids
    pub fn content_hash(&self) -> String {
        template_hash(&self.kind, &self.template)
    }
}

/// Hex SHA-256 over kind and template
pub fn template_hash(kind: &str, template: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(template.as_bytes());
    hex::encode(hasher.finalize())
}

/// Patterns returned by a source, with any degradation warnings
#[derive(Debug, Clone, Default)]
pub struct PatternLookup {
    pub patterns: Vec<SafePattern>,
    pub warnings: Vec<String>,
}

impl PatternLookup {
    /// Append patterns whose template is not already present
    pub fn merge(&mut self, patterns: impl IntoIterator<Item = SafePattern>) {
        for pattern in patterns {
            if !self.patterns.iter().any(|p| p.template == pattern.template) {
                self.patterns.push(pattern);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_depends_on_kind_and_template() {
        let a = SafePattern::new("eval_usage", "ast.literal_eval(x)", PatternOrigin::Catalog);
        let b = SafePattern::new("bare_except", "ast.literal_eval(x)", PatternOrigin::Catalog);
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_merge_skips_duplicate_templates() {
        let mut lookup = PatternLookup::default();
        lookup.merge(vec![SafePattern::new("k", "t", PatternOrigin::Catalog)]);
        lookup.merge(vec![
            SafePattern::new("k", "t", PatternOrigin::Index),
            SafePattern::new("k", "u", PatternOrigin::Learned),
        ]);
        assert_eq!(lookup.patterns.len(), 2);
        assert_eq!(lookup.patterns[0].origin, PatternOrigin::Catalog);
    }
}

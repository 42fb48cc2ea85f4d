//! Rule-keyed rewrite engine
//!
//! Each detection rule names a fixer. Fixers only rewrite the sites their rule
//! reports, so running one on code it already fixed is a no-op, and fixers for
//! different kinds can run in any order.

use crate::analysis::DetectionRule;
use std::collections::HashMap;
use thiserror::Error;

pub mod edit;
pub mod fixers;
pub mod transformer;

pub use fixers::{GuardDivision, LiteralEval, ScopedOpen, TypedExcept};
pub use transformer::{Transformation, Transformer};

/// Fixer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixError {
    #[error("Line span {0}..={1} out of range")]
    InvalidSpan(usize, usize),

    #[error("No progress after {0} rewrite steps")]
    NoProgress(usize),

    #[error("No fixer registered under '{0}'")]
    UnknownFixer(String),

    #[error("Invalid pattern: {0}")]
    Pattern(String),
}

/// A rewrite for the sites of one detection rule
pub trait Fixer: Send + Sync {
    /// Fixer name (must be unique)
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Rewrite every site `rule` reports in `source`
    ///
    /// Returns the source unchanged when there is nothing to fix.
    fn apply(&self, source: &str, rule: &DetectionRule) -> Result<String, FixError>;
}

/// Fixers by name
pub struct FixerRegistry {
    fixers: HashMap<String, Box<dyn Fixer>>,
}

impl FixerRegistry {
    pub fn new() -> Self {
        Self {
            fixers: HashMap::new(),
        }
    }

    /// Fixers for the built-in rules
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(GuardDivision));
        registry.register(Box::new(ScopedOpen));
        registry.register(Box::new(LiteralEval));
        registry.register(Box::new(TypedExcept));
        registry
    }

    pub fn register(&mut self, fixer: Box<dyn Fixer>) {
        let name = fixer.name().to_string();
        self.fixers.insert(name, fixer);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Fixer> {
        self.fixers.get(name).map(|f| f.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fixers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FixerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

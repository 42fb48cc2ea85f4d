//! Python snippet analysis
//!
//! Syntax validation, declarative rule matching and heuristic scoring.

pub mod analyzer;
pub mod layout;
pub mod lexer;
pub mod models;
pub mod rules;
pub mod scoring;
pub mod syntax;

pub use analyzer::PatternAnalyzer;
pub use models::{kinds, Analysis, AnalysisSummary, Issue, QualityScore, QualitySignal, Severity};
pub use rules::{DetectionRule, Matcher, RuleRegistry, Site, SourceView};
pub use scoring::QualityScorer;

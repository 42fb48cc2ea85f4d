//! Safe rewrite patterns: static catalog and optional semantic index

pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod embedding;
pub mod models;
pub mod provider;
pub mod semantic_index;

pub use catalog::PatternCatalog;
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use embedding::HashEmbedder;
pub use models::{PatternLookup, PatternOrigin, SafePattern};
pub use provider::{
    build_pattern_source, select_pattern_source, CatalogPatternSource, IndexedPatternSource,
    PatternSource,
};
pub use semantic_index::{QdrantIndex, SemanticIndex};

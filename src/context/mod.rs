//! Context assembly for the transformer
//!
//! Combines an analysis with safe patterns, similar past contexts and a fixed
//! constraint list into one payload.

pub mod assembler;
pub mod models;

pub use assembler::ContextAssembler;
pub use models::StructuredContext;

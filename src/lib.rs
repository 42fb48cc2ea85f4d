//! Code quality feedback engine for Python snippets
//!
//! Detects risk patterns with a declarative rule registry, scores snippets
//! heuristically, rewrites them with rule-keyed fixers and learns from every
//! request through a bounded recency window over a durable history.

pub mod analysis;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod patterns;
pub mod telemetry;
pub mod transform;

pub use config::EngineConfig;
pub use engine::{ContextInsights, LearnAck, QualityEngine, Report, ReportStatus};
pub use error::{EngineError, Result};
pub use memory::MemoryInsights;

use tracing::info;

/// Initialize logging and build an engine from `config`
pub async fn init_engine(config: EngineConfig) -> Result<QualityEngine> {
    telemetry::init_tracing(&config.logging);
    info!("Initializing quality engine");

    QualityEngine::new(config).await
}

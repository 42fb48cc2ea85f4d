//! Engine orchestration and the reports it returns

pub mod orchestrator;
pub mod report;

pub use orchestrator::QualityEngine;
pub use report::{ContextInsights, LearnAck, Report, ReportStatus};

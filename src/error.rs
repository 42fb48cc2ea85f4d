//! Error types for the quality engine

use std::time::Duration;
use thiserror::Error;

/// Engine errors
///
/// Most of these never reach callers of the engine operations: the
/// orchestrator turns them into warnings on the report and degrades.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Semantic index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Semantic index timed out after {0:?}")]
    IndexTimeout(Duration),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Input rejected: {0}")]
    InputRejected(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Whether the error came from the persistence layer
    pub fn is_store(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::Sqlite(_))
    }

    /// Whether the error came from the semantic index
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            EngineError::IndexUnavailable(_) | EngineError::IndexTimeout(_)
        )
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Store(format!("{:#}", err))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(EngineError::Store("disk full".to_string()).is_store());
        assert!(EngineError::IndexTimeout(Duration::from_millis(10)).is_index());
        assert!(!EngineError::Transform("x".to_string()).is_index());
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err = anyhow::anyhow!("root cause").context("Failed to open database");
        let converted: EngineError = err.into();
        let message = converted.to_string();
        assert!(message.contains("Failed to open database"));
        assert!(message.contains("root cause"));
    }
}

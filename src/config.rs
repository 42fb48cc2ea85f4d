//! Configuration for the quality engine

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    #[serde(default)]
    pub semantic_index: SemanticIndexConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load from a config file, with `QUALITY_ENGINE__SECTION__KEY` overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix("QUALITY_ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overridden by individual environment variables
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(val) = std::env::var("QUALITY_DB_PATH") {
            config.memory.db_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("QUALITY_MEMORY_ENABLED") {
            config.memory.persistent = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("QUALITY_WINDOW_CAPACITY") {
            if let Ok(num) = val.parse() {
                config.memory.window_capacity = num;
            }
        }

        if let Ok(val) = std::env::var("QUALITY_MAX_SNIPPET_BYTES") {
            if let Ok(num) = val.parse() {
                config.limits.max_snippet_bytes = num;
            }
        }

        if let Ok(val) = std::env::var("QUALITY_INDEX_ENABLED") {
            config.semantic_index.enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("QDRANT_URL") {
            config.semantic_index.url = val;
        }

        if let Ok(val) = std::env::var("QUALITY_INDEX_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.semantic_index.timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("QUALITY_LOG_LEVEL") {
            config.logging.level = val;
        }

        if let Ok(val) = std::env::var("QUALITY_LOG_JSON") {
            config.logging.json = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.memory.window_capacity == 0 {
            return Err(EngineError::Configuration(
                "memory.window_capacity must be at least 1".to_string(),
            ));
        }

        if self.limits.max_snippet_bytes == 0 {
            return Err(EngineError::Configuration(
                "limits.max_snippet_bytes must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(EngineError::Configuration(format!(
                "retrieval.similarity_threshold {} outside [0, 1]",
                self.retrieval.similarity_threshold
            )));
        }

        if self.retrieval.score_margin < 0.0 {
            return Err(EngineError::Configuration(
                "retrieval.score_margin cannot be negative".to_string(),
            ));
        }

        self.scoring.validate()?;

        if self.semantic_index.enabled && self.semantic_index.vector_size == 0 {
            return Err(EngineError::Configuration(
                "semantic_index.vector_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Use the SQLite history (false = ephemeral only)
    #[serde(default = "default_persistent")]
    pub persistent: bool,

    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Number of recent context records kept in the window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

fn default_persistent() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/code_memory.db")
}

fn default_window_capacity() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persistent: default_persistent(),
            db_path: default_db_path(),
            window_capacity: default_window_capacity(),
        }
    }
}

/// Similarity retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Records scoring below `caller_score - score_margin` are skipped
    #[serde(default = "default_score_margin")]
    pub score_margin: f64,

    /// Minimum Jaccard similarity
    #[serde(default)]
    pub similarity_threshold: f64,

    /// Maximum records returned
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_score_margin() -> f64 {
    10.0
}

fn default_max_results() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            score_margin: default_score_margin(),
            similarity_threshold: 0.0,
            max_results: default_max_results(),
        }
    }
}

/// Quality scoring weights
///
/// Defaults reproduce the historical weighting, which favours readability
/// over performance. Tune per deployment rather than editing the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_base_score")]
    pub base: f64,

    #[serde(default = "default_readability_weight")]
    pub readability_weight: f64,

    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,

    #[serde(default)]
    pub penalties: SeverityPenalties,

    #[serde(default)]
    pub bonuses: SignalBonuses,
}

fn default_base_score() -> f64 {
    50.0
}

fn default_readability_weight() -> f64 {
    0.6
}

fn default_performance_weight() -> f64 {
    0.3
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: default_base_score(),
            readability_weight: default_readability_weight(),
            performance_weight: default_performance_weight(),
            penalties: SeverityPenalties::default(),
            bonuses: SignalBonuses::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.readability_weight < 0.0 || self.performance_weight < 0.0 {
            return Err(EngineError::Configuration(
                "scoring weights cannot be negative".to_string(),
            ));
        }

        let p = &self.penalties;
        if [p.critical, p.high, p.medium, p.low].iter().any(|v| *v < 0.0) {
            return Err(EngineError::Configuration(
                "severity penalties cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Safety penalty subtracted per issue, by severity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityPenalties {
    #[serde(default = "default_critical_penalty")]
    pub critical: f64,
    #[serde(default = "default_high_penalty")]
    pub high: f64,
    #[serde(default = "default_medium_penalty")]
    pub medium: f64,
    #[serde(default)]
    pub low: f64,
}

fn default_critical_penalty() -> f64 {
    30.0
}

fn default_high_penalty() -> f64 {
    15.0
}

fn default_medium_penalty() -> f64 {
    5.0
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            critical: default_critical_penalty(),
            high: default_high_penalty(),
            medium: default_medium_penalty(),
            low: 0.0,
        }
    }
}

/// Readability and performance adjustments per recognised signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBonuses {
    #[serde(default = "default_docstring_bonus")]
    pub docstring: f64,
    #[serde(default = "default_type_hints_bonus")]
    pub type_hints: f64,
    #[serde(default = "default_multi_line_bonus")]
    pub multi_line: f64,
    #[serde(default = "default_comments_bonus")]
    pub inline_comments: f64,
    #[serde(default = "default_comprehension_bonus")]
    pub comprehension: f64,
    #[serde(default = "default_tuple_swap_bonus")]
    pub tuple_swap: f64,
    /// Applied as a negative performance adjustment
    #[serde(default = "default_unbounded_recursion_penalty")]
    pub unbounded_recursion: f64,
    /// Applied as a negative performance adjustment
    #[serde(default = "default_unnecessary_cache_penalty")]
    pub unnecessary_cache: f64,
}

fn default_docstring_bonus() -> f64 {
    15.0
}

fn default_type_hints_bonus() -> f64 {
    10.0
}

fn default_multi_line_bonus() -> f64 {
    5.0
}

fn default_comments_bonus() -> f64 {
    5.0
}

fn default_comprehension_bonus() -> f64 {
    10.0
}

fn default_tuple_swap_bonus() -> f64 {
    5.0
}

fn default_unbounded_recursion_penalty() -> f64 {
    10.0
}

fn default_unnecessary_cache_penalty() -> f64 {
    5.0
}

impl Default for SignalBonuses {
    fn default() -> Self {
        Self {
            docstring: default_docstring_bonus(),
            type_hints: default_type_hints_bonus(),
            multi_line: default_multi_line_bonus(),
            inline_comments: default_comments_bonus(),
            comprehension: default_comprehension_bonus(),
            tuple_swap: default_tuple_swap_bonus(),
            unbounded_recursion: default_unbounded_recursion_penalty(),
            unnecessary_cache: default_unnecessary_cache_penalty(),
        }
    }
}

/// Input limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Snippets longer than this are truncated before analysis
    #[serde(default = "default_max_snippet_bytes")]
    pub max_snippet_bytes: usize,
}

fn default_max_snippet_bytes() -> usize {
    64 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_snippet_bytes: default_max_snippet_bytes(),
        }
    }
}

/// Context assembly caps and constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    #[serde(default = "default_pattern_cap")]
    pub max_patterns: usize,

    #[serde(default = "default_similar_cap")]
    pub max_similar: usize,

    #[serde(default = "default_constraints")]
    pub constraints: Vec<String>,
}

fn default_pattern_cap() -> usize {
    3
}

fn default_similar_cap() -> usize {
    3
}

fn default_constraints() -> Vec<String> {
    vec![
        "Always include error handling".to_string(),
        "Follow PEP8 guidelines".to_string(),
        "Use safe alternatives to dangerous functions".to_string(),
        "Preserve original behavior".to_string(),
    ]
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_patterns: default_pattern_cap(),
            max_similar: default_similar_cap(),
            constraints: default_constraints(),
        }
    }
}

/// Optional Qdrant-backed semantic index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIndexConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_index_url")]
    pub url: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_vector_size")]
    pub vector_size: usize,

    /// Per-lookup timeout in milliseconds
    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,

    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_size")]
    pub cache_max_size: u64,
}

fn default_index_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_name() -> String {
    "python_safe_patterns".to_string()
}

fn default_vector_size() -> usize {
    256
}

fn default_index_timeout_ms() -> u64 {
    500
}

fn default_top_k() -> usize {
    3
}

fn default_breaker_failures() -> usize {
    3
}

fn default_breaker_reset() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_size() -> u64 {
    1000
}

impl Default for SemanticIndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_index_url(),
            collection_name: default_collection_name(),
            vector_size: default_vector_size(),
            timeout_ms: default_index_timeout_ms(),
            top_k: default_top_k(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_size: default_cache_size(),
        }
    }
}

impl SemanticIndexConfig {
    /// Get lookup timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get circuit breaker reset timeout as Duration
    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }

    /// Get cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

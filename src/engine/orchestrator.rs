//! The quality engine: analyze, retrieve, assemble, transform, learn

use super::report::{ContextInsights, LearnAck, Report, ReportStatus};
use crate::analysis::{Analysis, AnalysisSummary, PatternAnalyzer, QualityScore, RuleRegistry};
use crate::config::EngineConfig;
use crate::context::{ContextAssembler, StructuredContext};
use crate::error::{EngineError, Result};
use crate::memory::{MemoryInsights, MemoryStore, PatternRecord, SimilarContext};
use crate::metrics::ENGINE_METRICS;
use crate::patterns::{build_pattern_source, PatternCatalog, PatternOrigin, PatternSource, SafePattern};
use crate::transform::{Transformation, Transformer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Code quality feedback engine
///
/// Owns its memory store and pattern source; nothing is shared globally, so
/// several engines (or tests) can run side by side.
pub struct QualityEngine {
    config: EngineConfig,
    analyzer: PatternAnalyzer,
    memory: Arc<MemoryStore>,
    patterns: Arc<dyn PatternSource>,
    assembler: ContextAssembler,
    transformer: Arc<Transformer>,
}

/// Original analysis plus what retrieval found for it
struct Inspection {
    analysis: Analysis,
    similar: Vec<SimilarContext>,
}

impl QualityEngine {
    /// Build an engine from configuration
    ///
    /// Fails only on invalid configuration. An unusable database or semantic
    /// index degrades to ephemeral memory or catalog-only lookups.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryStore::open(&config.memory).await);
        let patterns = build_pattern_source(PatternCatalog::builtin(), &config.semantic_index).await;

        info!(
            "Quality engine ready (memory: {}, patterns: {})",
            memory.mode().await.as_str(),
            patterns.name()
        );
        Ok(Self::from_parts(config, memory, patterns))
    }

    /// Assemble an engine around an existing store and pattern source
    pub fn from_parts(
        config: EngineConfig,
        memory: Arc<MemoryStore>,
        patterns: Arc<dyn PatternSource>,
    ) -> Self {
        let rules = Arc::new(RuleRegistry::builtin());
        Self {
            analyzer: PatternAnalyzer::new(rules.clone(), config.scoring.clone()),
            assembler: ContextAssembler::new(config.assembler.clone()),
            transformer: Arc::new(Transformer::builtin(rules)),
            memory,
            patterns,
            config,
        }
    }

    /// Replace the transformer
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn pattern_source(&self) -> &Arc<dyn PatternSource> {
        &self.patterns
    }

    /// Analyze a snippet on the blocking pool
    pub async fn analyze(&self, code: &str) -> Result<Analysis> {
        let analyzer = self.analyzer.clone();
        let code = code.to_string();
        Ok(tokio::task::spawn_blocking(move || analyzer.analyze(&code)).await?)
    }

    /// Analyze `code` and return an improved version with a report
    ///
    /// Never fails: store, index and transformation problems show up as
    /// warnings on the report.
    pub async fn validate_and_improve(&self, code: &str) -> Report {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let mut warnings = Vec::new();
        let code = self.clip(code, &mut warnings);

        let report = match self.inspect(code).await {
            Ok(inspection) if !inspection.analysis.has_issues() => {
                self.finish_safe(request_id, code, inspection, warnings).await
            }
            Ok(inspection) => self.improve(request_id, code, inspection, warnings).await,
            Err(e) => {
                error!("Analysis of request {} failed: {}", request_id, e);
                self.analysis_failed(request_id, code, e, warnings).await
            }
        };

        ENGINE_METRICS.record_validation(report.status.as_str());
        debug!(
            "Request {} finished as {} in {:?}",
            request_id,
            report.status.as_str(),
            start.elapsed()
        );
        report
    }

    /// Like [`validate_and_improve`](Self::validate_and_improve) for raw bytes
    ///
    /// Invalid UTF-8 is replaced and reported in the warnings.
    pub async fn validate_and_improve_bytes(&self, bytes: &[u8]) -> Report {
        match std::str::from_utf8(bytes) {
            Ok(code) => self.validate_and_improve(code).await,
            Err(e) => {
                let code = String::from_utf8_lossy(bytes).into_owned();
                let mut report = self.validate_and_improve(&code).await;
                report
                    .warnings
                    .insert(0, format!("Input is not valid UTF-8 ({}); invalid bytes were replaced", e));
                report
            }
        }
    }

    /// Record a known-good example with the patterns it demonstrates
    ///
    /// With no pattern names, the quality signals detected in `code` are
    /// learned instead.
    pub async fn learn(&self, code: &str, quality_score: f64, patterns: &[String]) -> LearnAck {
        ENGINE_METRICS.learn_requests.inc();
        let mut warnings = Vec::new();
        let code = self.clip(code, &mut warnings);

        let score = if quality_score.is_finite() {
            quality_score.clamp(0.0, 100.0)
        } else {
            warnings.push(format!("Quality score {} is not a number; using 0", quality_score));
            0.0
        };
        if score != quality_score && quality_score.is_finite() {
            warnings.push(format!("Quality score {} clamped to {}", quality_score, score));
        }

        let names: Vec<String> = if patterns.is_empty() {
            match self.analyze(code).await {
                Ok(analysis) => analysis.signals.iter().map(|s| s.as_str().to_string()).collect(),
                Err(e) => {
                    warnings.push(format!("Could not detect patterns: {}", e));
                    Vec::new()
                }
            }
        } else {
            patterns.to_vec()
        };

        let mut learned = Vec::new();
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            match self.memory.learn_pattern(name, code, score).await {
                Ok(record) => learned.push(record),
                Err(e) => warnings.push(format!("Failed to learn pattern '{}': {}", name, e)),
            }
        }

        let published: Vec<SafePattern> = learned
            .iter()
            .map(|r| SafePattern::new(r.kind.clone(), r.template.clone(), PatternOrigin::Learned))
            .collect();
        self.patterns.publish(&published).await;

        let patterns_learned = learned.len();
        self.record(code, code, score, learned, &mut warnings).await;
        self.push_store_warning(&mut warnings).await;

        info!("Learned {} pattern(s) from a {}-byte example", patterns_learned, code.len());
        LearnAck {
            patterns_learned,
            memory_size: self.memory.window_len().await,
            warnings,
        }
    }

    /// Memory statistics
    pub async fn get_insights(&self) -> MemoryInsights {
        self.memory.insights().await
    }

    /// Truncate oversize input at a char boundary
    fn clip<'a>(&self, code: &'a str, warnings: &mut Vec<String>) -> &'a str {
        let limit = self.config.limits.max_snippet_bytes;
        if code.len() <= limit {
            return code;
        }

        let mut end = limit;
        while !code.is_char_boundary(end) {
            end -= 1;
        }
        warn!("Snippet of {} bytes truncated to {}", code.len(), end);
        warnings.push(format!(
            "Input of {} bytes exceeds the {}-byte limit and was truncated",
            code.len(),
            limit
        ));
        &code[..end]
    }

    async fn inspect(&self, code: &str) -> Result<Inspection> {
        let analysis = self.analyze(code).await?;
        for issue in &analysis.issues {
            ENGINE_METRICS.record_issue(&issue.kind);
        }

        let similar = self
            .memory
            .find_similar(code, analysis.quality_score.total, &self.config.retrieval)
            .await;

        Ok(Inspection { analysis, similar })
    }

    async fn finish_safe(
        &self,
        request_id: Uuid,
        code: &str,
        inspection: Inspection,
        mut warnings: Vec<String>,
    ) -> Report {
        let Inspection { analysis, similar } = inspection;
        let score = analysis.quality_score.total;

        self.record(code, code, score, Vec::new(), &mut warnings).await;
        self.push_store_warning(&mut warnings).await;

        Report {
            request_id,
            status: ReportStatus::Safe,
            original_code: code.to_string(),
            improved_code: code.to_string(),
            original_score: score,
            improved_score: score,
            delta: 0.0,
            message: format!("No issues found (quality score {:.1})", score),
            issues: Vec::new(),
            summary: analysis.summary,
            signals: analysis.signals,
            quality_score: analysis.quality_score,
            patterns_used: Vec::new(),
            context_insights: self.insights_for(similar, 0).await,
            warnings,
        }
    }

    async fn improve(
        &self,
        request_id: Uuid,
        code: &str,
        inspection: Inspection,
        mut warnings: Vec<String>,
    ) -> Report {
        let Inspection { analysis, similar } = inspection;
        let kinds = analysis.kinds();

        let patterns = self.patterns_for(&kinds, code, &mut warnings).await;
        let context = self.assembler.assemble(&analysis, &patterns, &similar);

        let (transformation, improved) = match self.transform(&context, &analysis).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Request {}: {}", request_id, e);
                ENGINE_METRICS.transform_failures.inc();
                warnings.push(format!("{}; returning the original code", e));
                return self.unchanged(request_id, code, analysis, &context, warnings).await;
            }
        };

        let old_score = analysis.quality_score.total;
        let new_score = improved.quality_score.total;

        let fixed: Vec<&String> = kinds
            .iter()
            .filter(|kind| improved.count_kind(kind) == 0)
            .collect();

        let template_for = |kind: &str| {
            context
                .pattern_for(kind)
                .map(|p| p.template.clone())
                .or_else(|| self.patterns.catalog().get(kind).map(str::to_string))
                .unwrap_or_default()
        };

        if new_score > old_score {
            let mut learned = Vec::new();
            for kind in &fixed {
                let template = template_for(kind.as_str());
                match self.memory.learn_pattern(kind, &template, new_score).await {
                    Ok(record) => learned.push(SafePattern::new(
                        record.kind,
                        record.template,
                        PatternOrigin::Learned,
                    )),
                    Err(e) => warnings.push(format!("Failed to learn pattern '{}': {}", kind, e)),
                }
            }
            self.patterns.publish(&learned).await;
        }

        let records: Vec<PatternRecord> = transformation
            .applied
            .iter()
            .map(|kind| PatternRecord::observed(kind.clone(), template_for(kind.as_str()), new_score))
            .collect();
        self.record(code, &transformation.code, new_score, records, &mut warnings)
            .await;
        self.push_store_warning(&mut warnings).await;

        let removed = analysis.issues.len().saturating_sub(improved.issues.len());
        let delta = new_score - old_score;
        let message = if transformation.changed() {
            format!("Fixed {} issue(s) with {:+.1} quality improvement", removed, delta)
        } else {
            "No automatic fix available; code returned unchanged".to_string()
        };
        info!(
            "Request {}: {} issue(s), score {:.1} -> {:.1}",
            request_id,
            analysis.issues.len(),
            old_score,
            new_score
        );

        Report {
            request_id,
            status: ReportStatus::Improved,
            original_code: code.to_string(),
            improved_code: transformation.code,
            quality_score: improved.quality_score,
            original_score: old_score,
            improved_score: new_score,
            delta,
            issues: analysis.issues,
            summary: analysis.summary,
            signals: analysis.signals,
            patterns_used: transformation.applied,
            context_insights: self.insights_for(context.similar_contexts, context.safe_patterns.len()).await,
            warnings,
            message,
        }
    }

    /// Catalog/index patterns followed by learned recommendations
    async fn patterns_for(&self, kinds: &[String], code: &str, warnings: &mut Vec<String>) -> Vec<SafePattern> {
        let mut lookup = self.patterns.lookup(kinds, code).await;
        warnings.append(&mut lookup.warnings);

        match self
            .memory
            .recommendations(kinds, self.config.assembler.max_patterns)
            .await
        {
            Ok(records) => lookup.merge(
                records
                    .into_iter()
                    .map(|r| SafePattern::new(r.kind, r.template, PatternOrigin::Learned)),
            ),
            Err(e) => warnings.push(format!("Pattern recommendations unavailable: {}", e)),
        }

        lookup.patterns
    }

    /// Run the transformer and re-analyze its output
    ///
    /// A fixer panic or error fails the transformation. So does an output
    /// with more issues than the input, or one still flagging an applied kind.
    async fn transform(
        &self,
        context: &StructuredContext,
        original: &Analysis,
    ) -> Result<(Transformation, Analysis)> {
        let transformer = self.transformer.clone();
        let owned = context.clone();

        let transformation = tokio::task::spawn_blocking(move || transformer.transform(&owned))
            .await
            .map_err(|e| EngineError::Transform(format!("fixer panicked: {}", e)))?
            .map_err(|e| EngineError::Transform(e.to_string()))?;

        let improved = self.analyze(&transformation.code).await?;
        if improved.issues.len() > original.issues.len() {
            return Err(EngineError::Transform(format!(
                "rewrite raised the issue count from {} to {}",
                original.issues.len(),
                improved.issues.len()
            )));
        }
        if let Some(kind) = transformation
            .applied
            .iter()
            .find(|kind| improved.count_kind(kind) > 0)
        {
            return Err(EngineError::Transform(format!(
                "rewrite left {} {} issue(s) in place",
                improved.count_kind(kind),
                kind
            )));
        }

        Ok((transformation, improved))
    }

    /// Report for a failed transformation: original code, zero delta
    async fn unchanged(
        &self,
        request_id: Uuid,
        code: &str,
        analysis: Analysis,
        context: &StructuredContext,
        mut warnings: Vec<String>,
    ) -> Report {
        let score = analysis.quality_score.total;
        self.record(code, code, score, Vec::new(), &mut warnings).await;
        self.push_store_warning(&mut warnings).await;

        Report {
            request_id,
            status: ReportStatus::Improved,
            original_code: code.to_string(),
            improved_code: code.to_string(),
            original_score: score,
            improved_score: score,
            delta: 0.0,
            message: "Automatic fix failed; code returned unchanged".to_string(),
            issues: analysis.issues,
            summary: analysis.summary,
            signals: analysis.signals,
            quality_score: analysis.quality_score,
            patterns_used: Vec::new(),
            context_insights: self
                .insights_for(context.similar_contexts.clone(), context.safe_patterns.len())
                .await,
            warnings,
        }
    }

    /// Report when the snippet could not be analyzed at all
    async fn analysis_failed(
        &self,
        request_id: Uuid,
        code: &str,
        err: EngineError,
        mut warnings: Vec<String>,
    ) -> Report {
        warnings.push(format!("Analysis failed: {}", err));
        let scoring = &self.config.scoring;
        let baseline = QualityScore::new(0.0, 0.0, 0.0, scoring);

        Report {
            request_id,
            status: ReportStatus::Improved,
            original_code: code.to_string(),
            improved_code: code.to_string(),
            original_score: baseline.total,
            improved_score: baseline.total,
            delta: 0.0,
            message: "Analysis failed; code returned unchanged".to_string(),
            issues: Vec::new(),
            summary: AnalysisSummary {
                total_issues: 0,
                critical_issues: 0,
                line_count: code.lines().count(),
            },
            signals: Vec::new(),
            quality_score: baseline,
            patterns_used: Vec::new(),
            context_insights: self.insights_for(Vec::new(), 0).await,
            warnings,
        }
    }

    /// Append a context record; failures become warnings
    async fn record(
        &self,
        original: &str,
        improved: &str,
        score: f64,
        patterns: Vec<PatternRecord>,
        warnings: &mut Vec<String>,
    ) {
        if let Err(e) = self.memory.add_context(original, improved, score, patterns).await {
            warn!("Failed to record context: {}", e);
            warnings.push(format!("Context was not recorded: {}", e));
        }
    }

    async fn push_store_warning(&self, warnings: &mut Vec<String>) {
        if let Some(warning) = self.memory.warning().await {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
    }

    async fn insights_for(&self, similar: Vec<SimilarContext>, safe_patterns: usize) -> ContextInsights {
        ContextInsights {
            similar_contexts: similar,
            memory_size: self.memory.window_len().await,
            storage_mode: self.memory.mode().await,
            pattern_source: self.patterns.name().to_string(),
            safe_patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::kinds;
    use crate::patterns::CatalogPatternSource;

    fn engine() -> QualityEngine {
        let mut config = EngineConfig::default();
        config.memory.persistent = false;
        let memory = Arc::new(MemoryStore::ephemeral(config.memory.window_capacity));
        let patterns: Arc<dyn PatternSource> = Arc::new(CatalogPatternSource::new(PatternCatalog::builtin()));
        QualityEngine::from_parts(config, memory, patterns)
    }

    #[tokio::test]
    async fn test_clip_respects_char_boundaries() {
        let mut engine = engine();
        engine.config.limits.max_snippet_bytes = 5;
        let mut warnings = Vec::new();

        let clipped = engine.clip("abcdé", &mut warnings);
        assert_eq!(clipped, "abcd");
        assert_eq!(warnings.len(), 1);

        let mut none = Vec::new();
        assert_eq!(engine.clip("abc", &mut none), "abc");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_improved_report_shape() {
        let engine = engine();
        let report = engine.validate_and_improve("x = a / b").await;

        assert_eq!(report.status, ReportStatus::Improved);
        assert_eq!(report.patterns_used, vec![kinds::DIVISION_BY_ZERO.to_string()]);
        assert_eq!(report.context_insights.pattern_source, "catalog");
        assert_eq!(report.context_insights.safe_patterns, 1);
        assert!(report.delta > 0.0);
        assert!(report.message.starts_with("Fixed 1 issue(s)"));
        assert_eq!(engine.memory().window_len().await, 1);
    }

    #[tokio::test]
    async fn test_learned_fix_is_recommended_later() {
        let engine = engine();
        engine.validate_and_improve("y = eval(s)").await;

        let records = engine
            .memory()
            .recommendations(&[kinds::EVAL_USAGE.to_string()], 3)
            .await
            .unwrap();
        assert!(!records.is_empty());
        assert_eq!(records[0].kind, kinds::EVAL_USAGE);
    }

    #[tokio::test]
    async fn test_learn_without_patterns_uses_signals() {
        let engine = engine();
        let code = "def add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n";
        let ack = engine.learn(code, 90.0, &[]).await;

        assert!(ack.patterns_learned >= 2);
        assert_eq!(ack.memory_size, 1);
        assert!(ack.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_learn_clamps_score() {
        let engine = engine();
        let ack = engine.learn("x = 1", 250.0, &["constant".to_string()]).await;
        assert_eq!(ack.patterns_learned, 1);
        assert!(ack.warnings.iter().any(|w| w.contains("clamped")));

        let window = engine.memory().window_snapshot().await;
        assert_eq!(window[0].quality_score, 100.0);
    }
}

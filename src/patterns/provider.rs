//! Pattern source strategies: catalog only, or catalog plus semantic index
//!
//! The strategy is chosen once, at construction, behind a health check. The
//! indexed source still answers from the catalog first and treats every index
//! failure (error, timeout, open breaker) as "no extra patterns".

use super::cache::QueryCache;
use super::catalog::PatternCatalog;
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::models::{PatternLookup, SafePattern};
use super::semantic_index::{QdrantIndex, SemanticIndex};
use crate::config::SemanticIndexConfig;
use crate::error::EngineError;
use crate::metrics::ENGINE_METRICS;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEARCH_OPERATION: &str = "search";

#[async_trait]
pub trait PatternSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn catalog(&self) -> &PatternCatalog;

    /// Safe patterns for the given issue kinds
    async fn lookup(&self, kinds: &[String], snippet: &str) -> PatternLookup;

    /// Offer newly learned patterns to the source; best effort
    async fn publish(&self, _patterns: &[SafePattern]) {}
}

/// Static catalog only
pub struct CatalogPatternSource {
    catalog: PatternCatalog,
}

impl CatalogPatternSource {
    pub fn new(catalog: PatternCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl PatternSource for CatalogPatternSource {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    async fn lookup(&self, kinds: &[String], _snippet: &str) -> PatternLookup {
        PatternLookup {
            patterns: self.catalog.lookup(kinds),
            warnings: Vec::new(),
        }
    }
}

/// Catalog first, enriched by a semantic index behind a breaker, a cache and a timeout
pub struct IndexedPatternSource {
    catalog: PatternCatalog,
    index: Arc<dyn SemanticIndex>,
    breaker: CircuitBreaker,
    cache: QueryCache,
    timeout: Duration,
    top_k: usize,
}

impl IndexedPatternSource {
    pub fn new(catalog: PatternCatalog, index: Arc<dyn SemanticIndex>, config: &SemanticIndexConfig) -> Self {
        Self {
            catalog,
            index,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::from(config)),
            cache: QueryCache::new(config.cache_ttl(), config.cache_max_size),
            timeout: config.timeout(),
            top_k: config.top_k.max(1),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn search_index(&self, kinds: &[String], snippet: &str) -> Result<Vec<SafePattern>, String> {
        if self.breaker.is_open(SEARCH_OPERATION) {
            ENGINE_METRICS.record_index_lookup("breaker_open");
            return Err("Semantic index skipped (circuit open); using catalog patterns only".to_string());
        }

        let key = QueryCache::key(kinds, snippet);
        if let Some(hit) = self.cache.get(&key).await {
            debug!("Index lookup served from cache ({} pattern(s))", hit.len());
            ENGINE_METRICS.record_index_lookup("hit");
            return Ok(hit);
        }

        match tokio::time::timeout(self.timeout, self.index.search(kinds, snippet, self.top_k)).await {
            Ok(Ok(found)) => {
                self.breaker.mark_success(SEARCH_OPERATION);
                ENGINE_METRICS.record_index_lookup(if found.is_empty() { "empty" } else { "hit" });
                self.cache.store(key, found.clone()).await;
                Ok(found)
            }
            Ok(Err(e)) => {
                self.breaker.mark_failure(SEARCH_OPERATION);
                ENGINE_METRICS.record_index_lookup("error");
                warn!("Semantic index lookup failed, using catalog only: {}", e);
                Err(format!("{}; using catalog patterns only", e))
            }
            Err(_) => {
                self.breaker.mark_failure(SEARCH_OPERATION);
                ENGINE_METRICS.record_index_lookup("timeout");
                let e = EngineError::IndexTimeout(self.timeout);
                warn!("Semantic index lookup failed, using catalog only: {}", e);
                Err(format!("{}; using catalog patterns only", e))
            }
        }
    }
}

#[async_trait]
impl PatternSource for IndexedPatternSource {
    fn name(&self) -> &'static str {
        "catalog+index"
    }

    fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    async fn lookup(&self, kinds: &[String], snippet: &str) -> PatternLookup {
        let mut lookup = PatternLookup {
            patterns: self.catalog.lookup(kinds),
            warnings: Vec::new(),
        };

        match self.search_index(kinds, snippet).await {
            Ok(found) => lookup.merge(found),
            Err(warning) => lookup.warnings.push(warning),
        }
        lookup
    }

    async fn publish(&self, patterns: &[SafePattern]) {
        if patterns.is_empty() || self.breaker.is_open(SEARCH_OPERATION) {
            return;
        }

        match tokio::time::timeout(self.timeout, self.index.upsert(patterns)).await {
            Ok(Ok(())) => debug!("Published {} pattern(s) to the index", patterns.len()),
            Ok(Err(e)) => warn!("Failed to publish patterns to the index: {}", e),
            Err(_) => warn!("Publishing patterns to the index timed out"),
        }
    }
}

/// Pick the pattern source for an optional, already-constructed index
///
/// A present index is used only if it passes a health check; it is then
/// seeded with the catalog templates.
pub async fn select_pattern_source(
    catalog: PatternCatalog,
    index: Option<Arc<dyn SemanticIndex>>,
    config: &SemanticIndexConfig,
) -> Arc<dyn PatternSource> {
    let Some(index) = index else {
        return Arc::new(CatalogPatternSource::new(catalog));
    };

    match tokio::time::timeout(config.timeout(), index.health_check()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Semantic index failed health check, using catalog only: {}", e);
            return Arc::new(CatalogPatternSource::new(catalog));
        }
        Err(_) => {
            warn!("Semantic index health check timed out, using catalog only");
            return Arc::new(CatalogPatternSource::new(catalog));
        }
    }

    match tokio::time::timeout(config.timeout(), index.upsert(&catalog.all())).await {
        Ok(Ok(())) => debug!("Seeded index with {} catalog template(s)", catalog.len()),
        Ok(Err(e)) => warn!("Failed to seed index with catalog templates: {}", e),
        Err(_) => warn!("Seeding the index timed out"),
    }

    info!("Pattern source: catalog + semantic index");
    Arc::new(IndexedPatternSource::new(catalog, index, config))
}

/// Build the pattern source described by `config`
pub async fn build_pattern_source(catalog: PatternCatalog, config: &SemanticIndexConfig) -> Arc<dyn PatternSource> {
    if !config.enabled {
        info!("Pattern source: catalog only");
        return Arc::new(CatalogPatternSource::new(catalog));
    }

    let index: Option<Arc<dyn SemanticIndex>> =
        match tokio::time::timeout(config.timeout(), QdrantIndex::connect(config.clone())).await {
            Ok(Ok(index)) => Some(Arc::new(index)),
            Ok(Err(e)) => {
                warn!("Semantic index unavailable, using catalog only: {}", e);
                None
            }
            Err(_) => {
                warn!("Connecting to the semantic index timed out, using catalog only");
                None
            }
        };

    select_pattern_source(catalog, index, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::kinds;
    use crate::error::Result;
    use crate::patterns::models::PatternOrigin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Healthy(Vec<SafePattern>),
        Failing,
        Hanging,
    }

    struct FakeIndex {
        behavior: Behavior,
        searches: AtomicUsize,
        upserts: AtomicUsize,
    }

    impl FakeIndex {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                searches: AtomicUsize::new(0),
                upserts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SemanticIndex for FakeIndex {
        async fn health_check(&self) -> Result<()> {
            match self.behavior {
                Behavior::Failing => Err(EngineError::IndexUnavailable("connection refused".to_string())),
                _ => Ok(()),
            }
        }

        async fn search(&self, _kinds: &[String], _snippet: &str, _limit: usize) -> Result<Vec<SafePattern>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Healthy(patterns) => Ok(patterns.clone()),
                Behavior::Failing => Err(EngineError::IndexUnavailable("connection refused".to_string())),
                Behavior::Hanging => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn upsert(&self, _patterns: &[SafePattern]) -> Result<()> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> SemanticIndexConfig {
        SemanticIndexConfig {
            enabled: true,
            timeout_ms: 50,
            circuit_breaker_failures: 2,
            ..Default::default()
        }
    }

    fn eval_kind() -> Vec<String> {
        vec![kinds::EVAL_USAGE.to_string()]
    }

    #[tokio::test]
    async fn test_catalog_source() {
        let source = CatalogPatternSource::new(PatternCatalog::builtin());
        let lookup = source.lookup(&eval_kind(), "eval(x)").await;
        assert_eq!(lookup.patterns.len(), 1);
        assert!(lookup.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_indexed_source_merges_after_catalog() {
        let extra = SafePattern::new(kinds::EVAL_USAGE, "json.loads(x)", PatternOrigin::Index);
        let index = FakeIndex::new(Behavior::Healthy(vec![extra]));
        let source = IndexedPatternSource::new(PatternCatalog::builtin(), index.clone(), &config());

        let lookup = source.lookup(&eval_kind(), "eval(x)").await;
        assert_eq!(lookup.patterns.len(), 2);
        assert_eq!(lookup.patterns[0].origin, PatternOrigin::Catalog);
        assert_eq!(lookup.patterns[1].template, "json.loads(x)");

        // Second identical query is served from the cache
        source.lookup(&eval_kind(), "eval(x)").await;
        assert_eq!(index.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_index_falls_back_and_opens_breaker() {
        let index = FakeIndex::new(Behavior::Failing);
        let source = IndexedPatternSource::new(PatternCatalog::builtin(), index.clone(), &config());

        for _ in 0..3 {
            let lookup = source.lookup(&eval_kind(), "eval(x)").await;
            assert_eq!(lookup.patterns.len(), 1);
            assert_eq!(lookup.warnings.len(), 1);
        }
        // Third call skipped the index
        assert_eq!(index.searches.load(Ordering::SeqCst), 2);
        assert!(source.breaker().is_open(SEARCH_OPERATION));
    }

    #[tokio::test]
    async fn test_hanging_index_times_out() {
        let index = FakeIndex::new(Behavior::Hanging);
        let source = IndexedPatternSource::new(PatternCatalog::builtin(), index, &config());

        let started = std::time::Instant::now();
        let lookup = source.lookup(&eval_kind(), "eval(x)").await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(lookup.patterns.len(), 1);
        assert!(lookup.warnings[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_selection_behind_health_check() {
        let catalog = PatternCatalog::builtin();

        let none = select_pattern_source(catalog.clone(), None, &config()).await;
        assert_eq!(none.name(), "catalog");

        let unhealthy = select_pattern_source(catalog.clone(), Some(FakeIndex::new(Behavior::Failing)), &config()).await;
        assert_eq!(unhealthy.name(), "catalog");

        let healthy_index = FakeIndex::new(Behavior::Healthy(Vec::new()));
        let healthy = select_pattern_source(catalog, Some(healthy_index.clone()), &config()).await;
        assert_eq!(healthy.name(), "catalog+index");
        assert_eq!(healthy_index.upserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_index_builds_catalog_source() {
        let source = build_pattern_source(PatternCatalog::builtin(), &SemanticIndexConfig::default()).await;
        assert_eq!(source.name(), "catalog");
    }
}

//! Semantic index over safe rewrite templates, backed by Qdrant

use super::embedding::{point_id, HashEmbedder};
use super::models::{PatternOrigin, SafePattern};
use crate::config::SemanticIndexConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use qdrant_client::{
    client::{Payload, QdrantClient},
    qdrant::{
        condition::ConditionOneOf, r#match::MatchValue, value::Kind, vectors_config::Config,
        Condition, CreateCollection, Distance, FieldCondition, Filter, Match, PointStruct,
        SearchPoints, Value as QValue, VectorParams, VectorsConfig,
    },
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Broader similarity search over templates
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    /// Templates for `kinds`, ranked by similarity to `snippet`
    async fn search(&self, kinds: &[String], snippet: &str, limit: usize) -> Result<Vec<SafePattern>>;

    async fn upsert(&self, patterns: &[SafePattern]) -> Result<()>;
}

pub struct QdrantIndex {
    client: QdrantClient,
    config: SemanticIndexConfig,
    embedder: HashEmbedder,
}

impl QdrantIndex {
    /// Connect and make sure the collection exists
    pub async fn connect(config: SemanticIndexConfig) -> Result<Self> {
        let client = QdrantClient::from_url(&config.url)
            .build()
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to build client: {}", e)))?;

        let index = Self {
            client,
            embedder: HashEmbedder::new(config.vector_size),
            config,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Failed to list collections: {}", e)))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.config.collection_name);

        if !exists {
            info!("Creating pattern collection: {}", self.config.collection_name);

            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.config.collection_name.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(Config::Params(VectorParams {
                            size: self.config.vector_size as u64,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    EngineError::IndexUnavailable(format!("Failed to create collection: {}", e))
                })?;
        }

        Ok(())
    }

    fn kind_filter(kinds: &[String]) -> Option<Filter> {
        if kinds.is_empty() {
            return None;
        }

        let should = kinds
            .iter()
            .map(|kind| Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: "kind".to_string(),
                    r#match: Some(Match {
                        match_value: Some(MatchValue::Keyword(kind.clone())),
                    }),
                    ..Default::default()
                })),
            })
            .collect();

        Some(Filter {
            should,
            ..Default::default()
        })
    }
}

fn payload_str(payload: &HashMap<String, QValue>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl SemanticIndex for QdrantIndex {
    async fn health_check(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::IndexUnavailable(format!("Health check failed: {}", e)))
    }

    async fn search(&self, kinds: &[String], snippet: &str, limit: usize) -> Result<Vec<SafePattern>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.config.collection_name.clone(),
                vector: self.embedder.embed(snippet),
                filter: Self::kind_filter(kinds),
                limit: limit as u64,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Search failed: {}", e)))?;

        let patterns: Vec<SafePattern> = response
            .result
            .iter()
            .filter_map(|point| {
                let kind = payload_str(&point.payload, "kind")?;
                let template = payload_str(&point.payload, "template")?;
                Some(SafePattern::new(kind, template, PatternOrigin::Index).with_relevance(point.score))
            })
            .collect();

        debug!("Index returned {} pattern(s) for {} kind(s)", patterns.len(), kinds.len());
        Ok(patterns)
    }

    async fn upsert(&self, patterns: &[SafePattern]) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = patterns
            .iter()
            .map(|pattern| {
                let hash = pattern.content_hash();
                let mut payload = Payload::new();
                payload.insert("kind", pattern.kind.clone());
                payload.insert("template", pattern.template.clone());
                payload.insert("hash", hash.clone());

                PointStruct::new(point_id(&hash), self.embedder.embed(&pattern.template), payload)
            })
            .collect();

        self.client
            .upsert_points(&self.config.collection_name, None, points, None)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("Upsert failed: {}", e)))?;

        debug!("Upserted {} pattern(s) into the index", patterns.len());
        Ok(())
    }
}

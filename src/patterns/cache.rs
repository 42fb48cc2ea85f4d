//! TTL cache for semantic index query results

use super::models::SafePattern;
use moka::future::Cache;
use std::time::Duration;

/// Caches index hits keyed by issue kinds and snippet content
#[derive(Clone)]
pub struct QueryCache {
    entries: Cache<String, Vec<SafePattern>>,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_size)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    /// Cache key for a lookup
    pub fn key(kinds: &[String], snippet: &str) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for kind in kinds {
            hasher.update(kind.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"|");
        hasher.update(snippet.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Vec<SafePattern>> {
        self.entries.get(key).await
    }

    pub async fn store(&self, key: String, patterns: Vec<SafePattern>) {
        self.entries.insert(key, patterns).await;
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

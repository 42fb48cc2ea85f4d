//! Data models for the memory store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Learned safe-rewrite evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pub id: i64,
    pub kind: String,
    pub template: String,
    /// Running average of the scores it was observed with
    pub quality_score: f64,
    pub frequency: u64,
    /// Context record the pattern was first seen in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<i64>,
}

impl PatternRecord {
    /// A pattern observed once, not yet stored
    pub fn observed(kind: impl Into<String>, template: impl Into<String>, quality_score: f64) -> Self {
        Self {
            id: 0,
            kind: kind.into(),
            template: template.into(),
            quality_score,
            frequency: 1,
            history_id: None,
        }
    }
}

/// One `learn` or `validate_and_improve` outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    pub id: i64,
    pub original_code: String,
    pub improved_code: String,
    pub quality_score: f64,
    pub timestamp: DateTime<Utc>,
    pub patterns: Vec<PatternRecord>,
}

/// A context record ranked against a query snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarContext {
    #[serde(flatten)]
    pub record: ContextRecord,
    pub similarity: f64,
}

/// Whether records survive a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Durable,
    Ephemeral,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Durable => "durable",
            StorageMode::Ephemeral => "ephemeral",
        }
    }
}

/// Per-kind pattern figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternStat {
    pub kind: String,
    /// Distinct templates
    pub count: u64,
    pub total_frequency: u64,
    pub avg_score: f64,
}

/// Aggregate figures from a history backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStats {
    pub total: u64,
    pub avg_score: f64,
    pub max_score: Option<f64>,
    pub min_score: Option<f64>,
    pub learned_patterns: u64,
    pub pattern_stats: Vec<PatternStat>,
}

/// Memory insights reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInsights {
    pub active_memory_size: usize,
    pub total_history: u64,
    pub avg_quality_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quality_score: Option<f64>,
    pub learned_patterns: u64,
    pub pattern_statistics: Vec<PatternStat>,
    pub storage_mode: StorageMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Bounded recency window over context records
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    records: VecDeque<ContextRecord>,
    capacity: usize,
}

impl MemoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest record when full
    pub fn push(&mut self, record: ContextRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextRecord> {
        self.records.iter()
    }

    /// Records oldest first
    pub fn snapshot(&self) -> Vec<ContextRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> ContextRecord {
        ContextRecord {
            id,
            original_code: String::new(),
            improved_code: String::new(),
            quality_score: 50.0,
            timestamp: Utc::now(),
            patterns: Vec::new(),
        }
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = MemoryWindow::new(3);
        for id in 1..=5 {
            window.push(record(id));
            assert!(window.len() <= 3);
        }
        let ids: Vec<i64> = window.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = MemoryWindow::new(0);
        window.push(record(1));
        window.push(record(2));
        assert_eq!(window.len(), 1);
        assert_eq!(window.capacity(), 1);
    }

    #[test]
    fn test_similar_context_flattens_record() {
        let similar = SimilarContext {
            record: record(7),
            similarity: 0.5,
        };
        let json = serde_json::to_value(&similar).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["similarity"], 0.5);
        assert!(json.get("originalCode").is_some());
    }
}

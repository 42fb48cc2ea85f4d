//! History backends
//!
//! Backends are synchronous; the memory store runs them on the blocking pool.

use super::models::{ContextRecord, HistoryStats, PatternRecord, PatternStat, StorageMode};
use crate::patterns::models::template_hash;
use anyhow::{anyhow, Result};
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Mutex;

/// Durable or in-process storage of context records and learned patterns
pub trait HistoryBackend: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Append a context record and link its patterns
    ///
    /// Linked patterns are created if unknown but their frequency is not
    /// incremented; that is what [`learn_pattern`](Self::learn_pattern) does.
    fn add_context(
        &self,
        original: &str,
        improved: &str,
        score: f64,
        patterns: &[PatternRecord],
    ) -> Result<ContextRecord>;

    /// Insert a pattern, or bump its frequency and fold `score` into its average
    fn learn_pattern(&self, kind: &str, template: &str, score: f64) -> Result<PatternRecord>;

    /// The newest `limit` records, oldest first
    fn recent(&self, limit: usize) -> Result<Vec<ContextRecord>>;

    /// Learned patterns for `kinds`, most frequent then best scoring first
    fn recommendations(&self, kinds: &[String], limit: usize) -> Result<Vec<PatternRecord>>;

    fn stats(&self) -> Result<HistoryStats>;
}

#[derive(Default)]
struct EphemeralState {
    next_context_id: i64,
    next_pattern_id: i64,
    contexts: Vec<ContextRecord>,
    patterns: IndexMap<(String, String), PatternRecord>,
    /// Records counted before this backend took over but not held here
    carried: u64,
}

/// In-process backend used when durable storage is off or unavailable
pub struct EphemeralBackend {
    state: Mutex<EphemeralState>,
}

impl EphemeralBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EphemeralState {
                next_context_id: 1,
                next_pattern_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Take over from a failed backend, keeping ids and counts moving forward
    pub fn resume(seed: Vec<ContextRecord>, known_total: u64) -> Self {
        let next_context_id = seed.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let mut patterns = IndexMap::new();
        let mut next_pattern_id = 1;

        for pattern in seed.iter().flat_map(|r| r.patterns.iter()) {
            next_pattern_id = next_pattern_id.max(pattern.id + 1);
            patterns
                .entry((pattern.kind.clone(), template_hash(&pattern.kind, &pattern.template)))
                .or_insert_with(|| pattern.clone());
        }

        let carried = known_total.saturating_sub(seed.len() as u64);

        Self {
            state: Mutex::new(EphemeralState {
                next_context_id,
                next_pattern_id,
                contexts: seed,
                patterns,
                carried,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EphemeralState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("ephemeral history lock poisoned"))
    }
}

impl Default for EphemeralBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralState {
    fn ensure_pattern(&mut self, kind: &str, template: &str, score: f64, history_id: Option<i64>) -> PatternRecord {
        let key = (kind.to_string(), template_hash(kind, template));
        if let Some(existing) = self.patterns.get(&key) {
            return existing.clone();
        }

        let record = PatternRecord {
            id: self.next_pattern_id,
            kind: kind.to_string(),
            template: template.to_string(),
            quality_score: score,
            frequency: 1,
            history_id,
        };
        self.next_pattern_id += 1;
        self.patterns.insert(key, record.clone());
        record
    }
}

impl HistoryBackend for EphemeralBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::Ephemeral
    }

    fn add_context(
        &self,
        original: &str,
        improved: &str,
        score: f64,
        patterns: &[PatternRecord],
    ) -> Result<ContextRecord> {
        let mut state = self.lock()?;
        let id = state.next_context_id;
        state.next_context_id += 1;

        let linked = patterns
            .iter()
            .map(|p| state.ensure_pattern(&p.kind, &p.template, p.quality_score, Some(id)))
            .collect();

        let record = ContextRecord {
            id,
            original_code: original.to_string(),
            improved_code: improved.to_string(),
            quality_score: score,
            timestamp: Utc::now(),
            patterns: linked,
        };
        state.contexts.push(record.clone());
        Ok(record)
    }

    fn learn_pattern(&self, kind: &str, template: &str, score: f64) -> Result<PatternRecord> {
        let mut state = self.lock()?;
        let key = (kind.to_string(), template_hash(kind, template));

        if let Some(existing) = state.patterns.get_mut(&key) {
            let n = existing.frequency as f64;
            existing.quality_score = (existing.quality_score * n + score) / (n + 1.0);
            existing.frequency += 1;
            return Ok(existing.clone());
        }

        Ok(state.ensure_pattern(kind, template, score, None))
    }

    fn recent(&self, limit: usize) -> Result<Vec<ContextRecord>> {
        let state = self.lock()?;
        let skip = state.contexts.len().saturating_sub(limit);
        Ok(state.contexts[skip..].to_vec())
    }

    fn recommendations(&self, kinds: &[String], limit: usize) -> Result<Vec<PatternRecord>> {
        let state = self.lock()?;
        let mut found: Vec<PatternRecord> = state
            .patterns
            .values()
            .filter(|p| kinds.contains(&p.kind))
            .cloned()
            .collect();

        found.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.quality_score.total_cmp(&a.quality_score))
                .then(a.id.cmp(&b.id))
        });
        found.truncate(limit);
        Ok(found)
    }

    fn stats(&self) -> Result<HistoryStats> {
        let state = self.lock()?;
        let scores: Vec<f64> = state.contexts.iter().map(|c| c.quality_score).collect();

        let avg_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        let mut by_kind: IndexMap<String, PatternStat> = IndexMap::new();
        for pattern in state.patterns.values() {
            let stat = by_kind.entry(pattern.kind.clone()).or_insert_with(|| PatternStat {
                kind: pattern.kind.clone(),
                count: 0,
                total_frequency: 0,
                avg_score: 0.0,
            });
            stat.avg_score = (stat.avg_score * stat.count as f64 + pattern.quality_score)
                / (stat.count + 1) as f64;
            stat.count += 1;
            stat.total_frequency += pattern.frequency;
        }
        let mut pattern_stats: Vec<PatternStat> = by_kind.into_values().collect();
        pattern_stats.sort_by(|a, b| a.kind.cmp(&b.kind));

        Ok(HistoryStats {
            total: state.carried + state.contexts.len() as u64,
            avg_score,
            max_score: scores.iter().copied().reduce(f64::max),
            min_score: scores.iter().copied().reduce(f64::min),
            learned_patterns: state.patterns.len() as u64,
            pattern_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let backend = EphemeralBackend::new();
        let a = backend.add_context("a", "a", 50.0, &[]).unwrap();
        let b = backend.add_context("b", "b", 60.0, &[]).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(backend.stats().unwrap().total, 2);
    }

    #[test]
    fn test_learn_pattern_increments_frequency() {
        let backend = EphemeralBackend::new();
        backend.learn_pattern("eval_usage", "t", 80.0).unwrap();
        let again = backend.learn_pattern("eval_usage", "t", 60.0).unwrap();
        assert_eq!(again.frequency, 2);
        assert!((again.quality_score - 70.0).abs() < 1e-9);

        let other = backend.learn_pattern("eval_usage", "u", 90.0).unwrap();
        assert_eq!(other.frequency, 1);
        assert_eq!(backend.stats().unwrap().learned_patterns, 2);
    }

    #[test]
    fn test_add_context_links_without_counting() {
        let backend = EphemeralBackend::new();
        backend.learn_pattern("k", "t", 80.0).unwrap();
        let record = backend
            .add_context("o", "i", 80.0, &[PatternRecord::observed("k", "t", 80.0)])
            .unwrap();
        assert_eq!(record.patterns.len(), 1);
        assert_eq!(record.patterns[0].frequency, 1);
    }

    #[test]
    fn test_recommendations_order() {
        let backend = EphemeralBackend::new();
        backend.learn_pattern("k", "rare", 99.0).unwrap();
        backend.learn_pattern("k", "common", 70.0).unwrap();
        backend.learn_pattern("k", "common", 70.0).unwrap();
        backend.learn_pattern("other", "x", 99.0).unwrap();

        let found = backend.recommendations(&["k".to_string()], 5).unwrap();
        let templates: Vec<&str> = found.iter().map(|p| p.template.as_str()).collect();
        assert_eq!(templates, vec!["common", "rare"]);
    }

    #[test]
    fn test_resume_continues_ids_and_counts() {
        let first = EphemeralBackend::new();
        for i in 0..3 {
            first.add_context(&i.to_string(), "", 50.0, &[]).unwrap();
        }
        let seed = first.recent(2).unwrap();

        let resumed = EphemeralBackend::resume(seed, 10);
        let next = resumed.add_context("n", "n", 50.0, &[]).unwrap();
        assert_eq!(next.id, 4);
        assert_eq!(resumed.stats().unwrap().total, 11);
    }

    #[test]
    fn test_recent_returns_oldest_first() {
        let backend = EphemeralBackend::new();
        for i in 0..5 {
            backend.add_context(&i.to_string(), "", 50.0, &[]).unwrap();
        }
        let ids: Vec<i64> = backend.recent(2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }
}

//! Memory store: bounded recency window over an append-only history
//!
//! Writes are serialized and run on the blocking pool. Reads see either the
//! state before or after a write, never a partial one. If the durable backend
//! fails, the store switches to an ephemeral backend seeded from the window
//! and keeps going; the switch is reported through [`MemoryStore::warning`].

use super::backend::{EphemeralBackend, HistoryBackend};
use super::models::{
    ContextRecord, MemoryInsights, MemoryWindow, PatternRecord, SimilarContext, StorageMode,
};
use super::similarity;
use super::sqlite::SqliteBackend;
use crate::config::{MemoryConfig, RetrievalConfig};
use crate::error::{EngineError, Result};
use crate::metrics::ENGINE_METRICS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct MemoryStore {
    backend: RwLock<Arc<dyn HistoryBackend>>,
    window: RwLock<MemoryWindow>,
    writer: Mutex<()>,
    degraded: RwLock<Option<String>>,
    known_total: AtomicU64,
}

impl MemoryStore {
    /// Open the store described by `config`
    ///
    /// Never fails: an unusable database leaves the store in ephemeral mode
    /// with a warning.
    pub async fn open(config: &MemoryConfig) -> Self {
        if !config.persistent {
            info!("Memory store running in ephemeral mode");
            return Self::ephemeral(config.window_capacity);
        }

        let path = config.db_path.clone();
        let opened = tokio::task::spawn_blocking(move || SqliteBackend::open(path)).await;

        match opened {
            Ok(Ok(backend)) => Self::with_backend(Arc::new(backend), config.window_capacity).await,
            Ok(Err(e)) => Self::unavailable(format!("{:#}", e), config.window_capacity),
            Err(e) => Self::unavailable(e.to_string(), config.window_capacity),
        }
    }

    pub fn ephemeral(capacity: usize) -> Self {
        Self::build(Arc::new(EphemeralBackend::new()), MemoryWindow::new(capacity), 0, None)
    }

    /// Use `backend`, warming the window from its newest records
    pub async fn with_backend(backend: Arc<dyn HistoryBackend>, capacity: usize) -> Self {
        let warm_backend = backend.clone();
        let warmed = tokio::task::spawn_blocking(move || {
            let recent = warm_backend.recent(capacity.max(1))?;
            let stats = warm_backend.stats()?;
            Ok::<_, anyhow::Error>((recent, stats.total))
        })
        .await;

        match warmed {
            Ok(Ok((recent, total))) => {
                let mut window = MemoryWindow::new(capacity);
                for record in recent {
                    window.push(record);
                }
                info!(
                    "Memory store ready: {} record(s) in history, {} in window",
                    total,
                    window.len()
                );
                Self::build(backend, window, total, None)
            }
            Ok(Err(e)) => Self::unavailable(format!("{:#}", e), capacity),
            Err(e) => Self::unavailable(e.to_string(), capacity),
        }
    }

    fn unavailable(reason: String, capacity: usize) -> Self {
        warn!("Memory store unavailable, using ephemeral memory: {}", reason);
        ENGINE_METRICS.store_fallbacks.inc();
        Self::build(
            Arc::new(EphemeralBackend::new()),
            MemoryWindow::new(capacity),
            0,
            Some(fallback_warning(&reason)),
        )
    }

    fn build(
        backend: Arc<dyn HistoryBackend>,
        window: MemoryWindow,
        total: u64,
        degraded: Option<String>,
    ) -> Self {
        ENGINE_METRICS.memory_window_size.set(window.len() as i64);
        Self {
            backend: RwLock::new(backend),
            window: RwLock::new(window),
            writer: Mutex::new(()),
            degraded: RwLock::new(degraded),
            known_total: AtomicU64::new(total),
        }
    }

    pub async fn mode(&self) -> StorageMode {
        self.backend.read().await.mode()
    }

    /// Degradation warning, if the store fell back to ephemeral memory
    pub async fn warning(&self) -> Option<String> {
        self.degraded.read().await.clone()
    }

    pub async fn window_len(&self) -> usize {
        self.window.read().await.len()
    }

    pub async fn window_snapshot(&self) -> Vec<ContextRecord> {
        self.window.read().await.snapshot()
    }

    /// Append a context record to history and the window
    pub async fn add_context(
        &self,
        original: &str,
        improved: &str,
        score: f64,
        patterns: Vec<PatternRecord>,
    ) -> Result<ContextRecord> {
        let original = original.to_string();
        let improved = improved.to_string();

        let _guard = self.writer.lock().await;
        let record = self
            .write("add_context", move |backend| {
                backend.add_context(&original, &improved, score, &patterns)
            })
            .await?;

        self.known_total.fetch_add(1, Ordering::SeqCst);
        let mut window = self.window.write().await;
        window.push(record.clone());
        ENGINE_METRICS.memory_window_size.set(window.len() as i64);
        ENGINE_METRICS.contexts_recorded.inc();

        debug!("Recorded context {} (score {:.1})", record.id, score);
        Ok(record)
    }

    /// Record a safe rewrite pattern observation
    pub async fn learn_pattern(&self, kind: &str, template: &str, score: f64) -> Result<PatternRecord> {
        let kind = kind.to_string();
        let template = template.to_string();

        let _guard = self.writer.lock().await;
        self.write("learn_pattern", move |backend| {
            backend.learn_pattern(&kind, &template, score)
        })
        .await
    }

    /// Similar past contexts from the window
    pub async fn find_similar(
        &self,
        snippet: &str,
        caller_score: f64,
        config: &RetrievalConfig,
    ) -> Vec<SimilarContext> {
        let window = self.window.read().await;
        similarity::find_similar(snippet, caller_score, window.iter(), config)
    }

    /// Learned patterns for `kinds`, most frequent first
    pub async fn recommendations(&self, kinds: &[String], limit: usize) -> Result<Vec<PatternRecord>> {
        let kinds = kinds.to_vec();
        self.read(move |backend| backend.recommendations(&kinds, limit)).await
    }

    pub async fn insights(&self) -> MemoryInsights {
        let stats = match self.read(|backend| backend.stats()).await {
            Ok(stats) => stats,
            Err(e) => {
                self.degrade(&e.to_string()).await;
                self.read(|backend| backend.stats()).await.unwrap_or_default()
            }
        };

        MemoryInsights {
            active_memory_size: self.window_len().await,
            total_history: stats.total,
            avg_quality_score: stats.avg_score,
            max_quality_score: stats.max_score,
            min_quality_score: stats.min_score,
            learned_patterns: stats.learned_patterns,
            pattern_statistics: stats.pattern_stats,
            storage_mode: self.mode().await,
            warning: self.warning().await,
        }
    }

    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HistoryBackend) -> anyhow::Result<T> + Send + 'static,
    {
        let backend = self.backend.read().await.clone();
        let value = tokio::task::spawn_blocking(move || op(backend.as_ref())).await??;
        Ok(value)
    }

    /// Run a write, retrying once on the ephemeral backend if it fails
    async fn write<T, F>(&self, op_name: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&dyn HistoryBackend) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let backend = self.backend.read().await.clone();

        let first = {
            let op = op.clone();
            tokio::task::spawn_blocking(move || (*op)(backend.as_ref())).await
        };

        let reason = match first {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => e.to_string(),
        };

        warn!("Memory store {} failed: {}", op_name, reason);
        if self.mode().await == StorageMode::Ephemeral {
            return Err(EngineError::Store(reason));
        }

        self.degrade(&reason).await;
        let fallback = self.backend.read().await.clone();
        let value = tokio::task::spawn_blocking(move || (*op)(fallback.as_ref())).await??;
        Ok(value)
    }

    async fn degrade(&self, reason: &str) {
        let mut backend = self.backend.write().await;
        if backend.mode() == StorageMode::Ephemeral {
            return;
        }

        let seed = self.window.read().await.snapshot();
        let total = self.known_total.load(Ordering::SeqCst);
        *backend = Arc::new(EphemeralBackend::resume(seed, total));
        *self.degraded.write().await = Some(fallback_warning(reason));

        ENGINE_METRICS.store_fallbacks.inc();
        warn!("Memory store switched to ephemeral mode: {}", reason);
    }
}

fn fallback_warning(reason: &str) -> String {
    format!(
        "Memory store unavailable ({}); using ephemeral memory, history will not persist",
        reason
    )
}

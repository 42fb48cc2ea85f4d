//! Durable memory: persistence across restarts and degraded operation

use quality_engine::{
    analysis::kinds,
    config::{MemoryConfig, RetrievalConfig},
    memory::{MemoryStore, PatternRecord, StorageMode},
    EngineConfig, QualityEngine,
};
use std::sync::Arc;
use tempfile::TempDir;

fn durable_config(dir: &TempDir, window_capacity: usize) -> MemoryConfig {
    MemoryConfig {
        persistent: true,
        db_path: dir.path().join("memory").join("history.db"),
        window_capacity,
    }
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = durable_config(&dir, 3);

    {
        let store = MemoryStore::open(&config).await;
        assert_eq!(store.mode().await, StorageMode::Durable);
        for i in 0..5 {
            let patterns = vec![PatternRecord::observed(kinds::EVAL_USAGE, "ast.literal_eval(x)", 70.0)];
            store
                .add_context(&format!("v{} = eval(s)", i), "ok", 40.0 + i as f64, patterns)
                .await
                .unwrap();
        }
        assert_eq!(store.window_len().await, 3);
    }

    let reopened = MemoryStore::open(&config).await;
    let window = reopened.window_snapshot().await;
    assert_eq!(window.len(), 3);
    assert_eq!(window.last().unwrap().original_code, "v4 = eval(s)");
    assert_eq!(window[0].patterns.len(), 1);

    let insights = reopened.insights().await;
    assert_eq!(insights.total_history, 5);
    assert_eq!(insights.max_quality_score, Some(44.0));
    assert_eq!(insights.min_quality_score, Some(40.0));
    assert_eq!(insights.storage_mode, StorageMode::Durable);
    assert!(insights.warning.is_none());
}

#[tokio::test]
async fn test_learned_patterns_rank_by_frequency() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(&durable_config(&dir, 10)).await;

    store.learn_pattern(kinds::BARE_EXCEPT, "except Exception:", 60.0).await.unwrap();
    store.learn_pattern(kinds::BARE_EXCEPT, "except ValueError:", 90.0).await.unwrap();
    let again = store.learn_pattern(kinds::BARE_EXCEPT, "except Exception:", 80.0).await.unwrap();
    assert_eq!(again.frequency, 2);
    assert_eq!(again.quality_score, 70.0);

    let ranked = store
        .recommendations(&[kinds::BARE_EXCEPT.to_string()], 5)
        .await
        .unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].template, "except Exception:");
}

#[tokio::test]
async fn test_engine_insights_after_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.memory = durable_config(&dir, 50);

    {
        let engine = QualityEngine::new(config.clone()).await.unwrap();
        engine.validate_and_improve("x = a / b").await;
        engine.learn("def f():\n    return 1", 85.0, &["small_function".to_string()]).await;
    }

    let engine = QualityEngine::new(config).await.unwrap();
    let insights = engine.get_insights().await;
    assert_eq!(insights.total_history, 2);
    assert_eq!(insights.active_memory_size, 2);
    assert!(insights.learned_patterns >= 2);
    assert!(insights
        .pattern_statistics
        .iter()
        .any(|stat| stat.kind == kinds::DIVISION_BY_ZERO));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::open(&durable_config(&dir, 7)).await);
    assert_eq!(store.mode().await, StorageMode::Durable);

    let writers: Vec<_> = (0..100)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let patterns = vec![PatternRecord::observed(kinds::BARE_EXCEPT, "except Exception:", 60.0)];
                store
                    .add_context(&format!("value_{} = eval(s)", i), "ok", 60.0, patterns)
                    .await
                    .unwrap();
                store
                    .learn_pattern(kinds::EVAL_USAGE, "ast.literal_eval(s)", 70.0)
                    .await
                    .unwrap();
            })
        })
        .collect();

    let readers: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let retrieval = RetrievalConfig::default();
                for _ in 0..10 {
                    let insights = store.insights().await;
                    assert!(insights.total_history <= 100);
                    assert!(insights.active_memory_size <= 7);

                    for similar in store.find_similar("value = eval(s)", 60.0, &retrieval).await {
                        assert_eq!(similar.record.patterns.len(), 1);
                        assert_eq!(similar.record.improved_code, "ok");
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.await.unwrap();
    }

    let insights = store.insights().await;
    assert_eq!(insights.total_history, 100);
    assert_eq!(insights.active_memory_size, 7);
    let eval_stats = insights
        .pattern_statistics
        .iter()
        .find(|stat| stat.kind == kinds::EVAL_USAGE)
        .unwrap();
    assert_eq!(eval_stats.count, 1);
    assert_eq!(eval_stats.total_frequency, 100);

    let ids: std::collections::HashSet<i64> = store.window_snapshot().await.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 7);
}

#[tokio::test]
async fn test_unusable_database_degrades_to_ephemeral() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"plain file").unwrap();

    let mut config = EngineConfig::default();
    config.memory.db_path = blocker.join("history.db");
    let engine = QualityEngine::new(config).await.unwrap();

    let report = engine.validate_and_improve("y = eval(s)").await;
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("ephemeral memory")));
    assert_eq!(report.context_insights.storage_mode, StorageMode::Ephemeral);

    let ack = engine.learn("x = 1", 50.0, &["constant".to_string()]).await;
    assert_eq!(ack.patterns_learned, 1);
    assert_eq!(engine.get_insights().await.total_history, 2);
}

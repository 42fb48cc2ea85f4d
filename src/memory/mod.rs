//! Context memory: recency window, durable history and learned patterns

pub mod backend;
pub mod models;
pub mod similarity;
pub mod sqlite;
pub mod store;

pub use backend::{EphemeralBackend, HistoryBackend};
pub use models::{
    ContextRecord, HistoryStats, MemoryInsights, MemoryWindow, PatternRecord, PatternStat,
    SimilarContext, StorageMode,
};
pub use sqlite::SqliteBackend;
pub use store::MemoryStore;

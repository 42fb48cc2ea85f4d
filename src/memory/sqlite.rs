//! SQLite history backend

use super::backend::HistoryBackend;
use super::models::{ContextRecord, HistoryStats, PatternRecord, PatternStat, StorageMode};
use crate::patterns::models::template_hash;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original TEXT NOT NULL,
    improved TEXT NOT NULL,
    score REAL NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    template TEXT NOT NULL,
    template_hash TEXT NOT NULL,
    score REAL NOT NULL,
    frequency INTEGER NOT NULL DEFAULT 1,
    history_id INTEGER REFERENCES history(id),
    UNIQUE(kind, template_hash)
);

CREATE TABLE IF NOT EXISTS history_patterns (
    history_id INTEGER NOT NULL REFERENCES history(id),
    pattern_id INTEGER NOT NULL REFERENCES patterns(id),
    PRIMARY KEY (history_id, pattern_id)
);

CREATE INDEX IF NOT EXISTS idx_patterns_kind ON patterns(kind);
CREATE INDEX IF NOT EXISTS idx_history_patterns_history ON history_patterns(history_id);
"#;

const PATTERN_COLUMNS: &str = "id, kind, template, score, frequency, history_id";

/// Append-only history in a single SQLite file
///
/// Calls block; the memory store runs them on the blocking pool and
/// serializes writers, so the mutex is never held across an await.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("Failed to enable WAL journal")?;

        let backend = Self::init(conn)?;
        tracing::info!("Opened history database at {}", path.display());
        Ok(backend)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("history connection lock poisoned"))
    }

    fn patterns_for(conn: &Connection, history_id: i64) -> Result<Vec<PatternRecord>> {
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT p.id, p.kind, p.template, p.score, p.frequency, p.history_id
            FROM history_patterns hp
            JOIN patterns p ON p.id = hp.pattern_id
            WHERE hp.history_id = ?1
            ORDER BY p.id
            "#,
        )?;

        let rows = stmt.query_map(params![history_id], pattern_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load linked patterns")
    }
}

fn pattern_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatternRecord> {
    let frequency: i64 = row.get(4)?;
    Ok(PatternRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        template: row.get(2)?,
        quality_score: row.get(3)?,
        frequency: frequency.max(0) as u64,
        history_id: row.get(5)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in history: {}", raw))
}

fn upsert_link(tx: &Transaction<'_>, history_id: i64, pattern: &PatternRecord) -> Result<PatternRecord> {
    let hash = template_hash(&pattern.kind, &pattern.template);

    tx.execute(
        r#"
        INSERT INTO patterns (kind, template, template_hash, score, frequency, history_id)
        VALUES (?1, ?2, ?3, ?4, 1, ?5)
        ON CONFLICT(kind, template_hash) DO NOTHING
        "#,
        params![pattern.kind, pattern.template, hash, pattern.quality_score, history_id],
    )?;

    let stored = tx.query_row(
        &format!(
            "SELECT {} FROM patterns WHERE kind = ?1 AND template_hash = ?2",
            PATTERN_COLUMNS
        ),
        params![pattern.kind, hash],
        pattern_from_row,
    )?;

    tx.execute(
        "INSERT OR IGNORE INTO history_patterns (history_id, pattern_id) VALUES (?1, ?2)",
        params![history_id, stored.id],
    )?;

    Ok(stored)
}

impl HistoryBackend for SqliteBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::Durable
    }

    fn add_context(
        &self,
        original: &str,
        improved: &str,
        score: f64,
        patterns: &[PatternRecord],
    ) -> Result<ContextRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let timestamp = Utc::now();

        tx.execute(
            "INSERT INTO history (original, improved, score, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![original, improved, score, timestamp.to_rfc3339()],
        )
        .context("Failed to insert context record")?;
        let id = tx.last_insert_rowid();

        let linked = patterns
            .iter()
            .map(|p| upsert_link(&tx, id, p))
            .collect::<Result<Vec<_>>>()
            .context("Failed to link patterns")?;

        tx.commit().context("Failed to commit context record")?;

        tracing::debug!("Stored context record {} with {} pattern(s)", id, linked.len());
        Ok(ContextRecord {
            id,
            original_code: original.to_string(),
            improved_code: improved.to_string(),
            quality_score: score,
            timestamp,
            patterns: linked,
        })
    }

    fn learn_pattern(&self, kind: &str, template: &str, score: f64) -> Result<PatternRecord> {
        let conn = self.lock()?;
        let hash = template_hash(kind, template);

        conn.execute(
            r#"
            INSERT INTO patterns (kind, template, template_hash, score, frequency)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(kind, template_hash) DO UPDATE SET
                score = (patterns.score * patterns.frequency + excluded.score) / (patterns.frequency + 1),
                frequency = patterns.frequency + 1
            "#,
            params![kind, template, hash, score],
        )
        .context("Failed to upsert pattern")?;

        conn.query_row(
            &format!(
                "SELECT {} FROM patterns WHERE kind = ?1 AND template_hash = ?2",
                PATTERN_COLUMNS
            ),
            params![kind, hash],
            pattern_from_row,
        )
        .context("Failed to read back pattern")
    }

    fn recent(&self, limit: usize) -> Result<Vec<ContextRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, original, improved, score, timestamp
            FROM history
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load recent history")?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, original_code, improved_code, quality_score, raw_ts) in rows.into_iter().rev() {
            records.push(ContextRecord {
                id,
                original_code,
                improved_code,
                quality_score,
                timestamp: parse_timestamp(&raw_ts)?,
                patterns: Self::patterns_for(&conn, id)?,
            });
        }
        Ok(records)
    }

    fn recommendations(&self, kinds: &[String], limit: usize) -> Result<Vec<PatternRecord>> {
        if kinds.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            r#"
            SELECT {}
            FROM patterns
            WHERE kind IN ({})
            ORDER BY frequency DESC, score DESC, id ASC
            LIMIT {}
            "#,
            PATTERN_COLUMNS, placeholders, limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(kinds.iter()), pattern_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load pattern recommendations")
    }

    fn stats(&self) -> Result<HistoryStats> {
        let conn = self.lock()?;

        let (total, avg, max, min): (i64, Option<f64>, Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT COUNT(*), AVG(score), MAX(score), MIN(score) FROM history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .context("Failed to aggregate history")?;

        let learned: i64 = conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))
            .context("Failed to count patterns")?;

        let mut stmt = conn.prepare(
            r#"
            SELECT kind, COUNT(*), SUM(frequency), AVG(score)
            FROM patterns
            GROUP BY kind
            ORDER BY kind
            "#,
        )?;
        let pattern_stats = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                let total_frequency: i64 = row.get(2)?;
                Ok(PatternStat {
                    kind: row.get(0)?,
                    count: count.max(0) as u64,
                    total_frequency: total_frequency.max(0) as u64,
                    avg_score: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to aggregate patterns")?;

        Ok(HistoryStats {
            total: total.max(0) as u64,
            avg_score: avg.unwrap_or(0.0),
            max_score: max,
            min_score: min,
            learned_patterns: learned.max(0) as u64,
            pattern_stats,
        })
    }
}

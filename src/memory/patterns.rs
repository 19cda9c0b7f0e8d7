//! SQLite-backed pattern counter store used for novelty scoring

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Outcome of a [`PatternMemory::prune`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Rows removed for being below `min_count`
    pub below_threshold: usize,
    /// Rows removed to respect `max_rows`
    pub evicted: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.below_threshold + self.evicted
    }
}

/// Durable counter store over fixed-length substrings.
///
/// Independent of the generation model: it accumulates every recorded
/// text (corpus, replies, dreams) across training passes.
pub struct PatternMemory {
    conn: Mutex<Connection>,
}

impl PatternMemory {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Ephemeral store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                pattern TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_count ON patterns(count);
        "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::LockPoisoned("pattern memory"))
    }

    /// Increment the counter of every `n`-char window in `text`.
    ///
    /// Returns the number of windows recorded.
    pub fn record(&self, text: &str, n: usize) -> Result<usize> {
        let windows = windows(text, n);
        if windows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO patterns (pattern, count) VALUES (?1, 1)
                   ON CONFLICT(pattern) DO UPDATE SET count = count + 1"#,
            )?;
            for window in &windows {
                stmt.execute(params![window])?;
            }
        }
        tx.commit()?;

        Ok(windows.len())
    }

    /// Fraction of the `n`-char windows of `text` not yet in the store.
    ///
    /// Text shorter than `n` has no windows and scores 0.0.
    pub fn novelty(&self, text: &str, n: usize) -> Result<f64> {
        let windows = windows(text, n);
        if windows.is_empty() {
            return Ok(0.0);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM patterns WHERE pattern = ?1")?;
        let mut unseen = 0usize;
        for window in &windows {
            if !stmt.exists(params![window])? {
                unseen += 1;
            }
        }

        Ok(unseen as f64 / windows.len() as f64)
    }

    /// Drop rows below `min_count`, then evict the lowest counts until at
    /// most `max_rows` remain.
    pub fn prune(&self, min_count: u64, max_rows: usize) -> Result<PruneReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let below_threshold =
            tx.execute("DELETE FROM patterns WHERE count < ?1", params![min_count as i64])?;

        let rows: i64 = tx.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        let excess = (rows as usize).saturating_sub(max_rows);
        let evicted = if excess > 0 {
            tx.execute(
                r#"DELETE FROM patterns WHERE pattern IN (
                    SELECT pattern FROM patterns
                    ORDER BY count ASC, pattern ASC
                    LIMIT ?1
                )"#,
                params![excess as i64],
            )?
        } else {
            0
        };

        tx.commit()?;

        let report = PruneReport {
            below_threshold,
            evicted,
        };
        if report.total() > 0 {
            debug!(
                "Pruned {} patterns ({} below {}, {} over cap {})",
                report.total(),
                below_threshold,
                min_count,
                evicted,
                max_rows
            );
        }
        Ok(report)
    }

    /// Most frequent patterns, highest count first.
    pub fn top(&self, limit: usize) -> Result<Vec<(String, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pattern, count FROM patterns ORDER BY count DESC, pattern ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get(&self, pattern: &str) -> Result<Option<u64>> {
        let conn = self.lock()?;
        let count = conn
            .query_row(
                "SELECT count FROM patterns WHERE pattern = ?1",
                params![pattern],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(count.map(|c| c as u64))
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fraction of entries seen more than once; 0.0 for an empty store.
    pub fn resonance_fraction(&self) -> Result<f64> {
        let conn = self.lock()?;
        let (total, repeated): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN count > 1 THEN 1 ELSE 0 END), 0) FROM patterns",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(repeated as f64 / total as f64)
    }
}

/// All `n`-char windows of `text`, in order, with repeats.
fn windows(text: &str, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

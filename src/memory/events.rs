//! SQLite event record for the HTTP surface
//!
//! Every `/chat` and `/health` request leaves one row: kind, a
//! per-process sequence number, the client address and a unix timestamp.
//! With a TTL configured, each insert also drops rows older than the TTL.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Which endpoint produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Chat,
    Health,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Health => "health",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored row
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    pub index: i64,
    pub ip: String,
    pub ts: f64,
}

pub struct EventLog {
    conn: Mutex<Connection>,
    ttl: Option<Duration>,
    next_index: AtomicI64,
}

impl EventLog {
    /// Open (or create) the event table at `path`. `ttl` of `None` keeps
    /// every row.
    pub fn open<P: AsRef<Path>>(path: P, ttl: Option<Duration>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, ttl)
    }

    pub fn in_memory(ttl: Option<Duration>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, ttl)
    }

    fn from_connection(conn: Connection, ttl: Option<Duration>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_type TEXT,
                idx INTEGER,
                ip TEXT,
                ts REAL
            );
            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
        "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
            next_index: AtomicI64::new(0),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::LockPoisoned("event log"))
    }

    /// Record an event now. Returns its sequence number.
    pub fn record(&self, kind: EventKind, ip: &str) -> Result<i64> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.record_at(kind, ip, now)
    }

    /// Record an event stamped `ts` (unix seconds), then apply the TTL
    /// relative to `ts`.
    pub fn record_at(&self, kind: EventKind, ip: &str, ts: f64) -> Result<i64> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst) + 1;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO events (event_type, idx, ip, ts) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), index, ip, ts],
        )?;
        if let Some(ttl) = self.ttl {
            let cutoff = ts - ttl.as_secs_f64();
            tx.execute("DELETE FROM events WHERE ts < ?1", params![cutoff])?;
        }
        tx.commit()?;
        Ok(index)
    }

    /// Stored events of `kind`.
    pub fn count(&self, kind: EventKind) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE event_type = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT event_type, idx, ip, ts FROM events ORDER BY ts DESC, idx DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(Event {
                kind: row.get(0)?,
                index: row.get(1)?,
                ip: row.get(2)?,
                ts: row.get(3)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_numbers_events_in_order() {
        let log = EventLog::in_memory(None).unwrap();
        assert_eq!(log.record(EventKind::Chat, "127.0.0.1").unwrap(), 1);
        assert_eq!(log.record(EventKind::Health, "10.0.0.2").unwrap(), 2);
        assert_eq!(log.record(EventKind::Chat, "127.0.0.1").unwrap(), 3);

        assert_eq!(log.count(EventKind::Chat).unwrap(), 2);
        assert_eq!(log.count(EventKind::Health).unwrap(), 1);

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].index, 3);
        assert_eq!(recent[1].kind, "health");
        assert_eq!(recent[1].ip, "10.0.0.2");
    }

    #[test]
    fn test_ttl_drops_old_rows() {
        let log = EventLog::in_memory(Some(Duration::from_secs(60))).unwrap();
        log.record_at(EventKind::Chat, "a", 1_000.0).unwrap();
        log.record_at(EventKind::Chat, "b", 1_030.0).unwrap();
        assert_eq!(log.count(EventKind::Chat).unwrap(), 2);

        // 1_000 is now older than 61 seconds
        log.record_at(EventKind::Health, "c", 1_061.0).unwrap();
        assert_eq!(log.count(EventKind::Chat).unwrap(), 1);
        assert_eq!(log.count(EventKind::Health).unwrap(), 1);
    }

    #[test]
    fn test_zero_ttl_keeps_only_latest_instant() {
        let log = EventLog::in_memory(Some(Duration::ZERO)).unwrap();
        log.record_at(EventKind::Chat, "a", 5.0).unwrap();
        log.record_at(EventKind::Chat, "a", 6.0).unwrap();
        assert_eq!(log.count(EventKind::Chat).unwrap(), 1);
    }

    #[test]
    fn test_no_ttl_keeps_everything() {
        let log = EventLog::in_memory(None).unwrap();
        log.record_at(EventKind::Chat, "a", 1.0).unwrap();
        log.record_at(EventKind::Chat, "a", 1_000_000.0).unwrap();
        assert_eq!(log.count(EventKind::Chat).unwrap(), 2);
    }

    #[test]
    fn test_events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        EventLog::open(&path, None)
            .unwrap()
            .record(EventKind::Health, "::1")
            .unwrap();
        let log = EventLog::open(&path, None).unwrap();
        assert_eq!(log.count(EventKind::Health).unwrap(), 1);
    }
}

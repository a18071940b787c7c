//! Content-keyed event queue backed by SQLite

use crate::error::Result;
use crate::types::{content_key, Event};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// What `discard` did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discarded {
    /// The record was deleted
    Removed,
    /// The observed occurrences were removed; newer ones remain queued
    Trimmed { remaining: usize },
    /// Nothing stored under the key (already discarded)
    Absent,
    /// The stored occurrences no longer match what the caller saw; left alone
    Changed,
}

/// Durable, content-deduplicating queue of pending events.
///
/// A single connection guarded by a mutex; all operations serialize within
/// the process and each is one SQLite transaction.
pub struct EventStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl EventStore {
    /// Open or create a queue database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        // FULL: a committed queue() must survive power loss, not just a crash.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory queue (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation rolls its transaction back, so the
        // connection is still consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one occurrence of `details` at `timestamp`.
    ///
    /// Repeated payloads fold into the existing record by appending the
    /// timestamp. Returns once the change is committed to disk.
    pub fn queue(&self, details: &[u8], timestamp: DateTime<Utc>) -> Result<()> {
        let key = content_key(details);
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT timestamps FROM events WHERE key = ?1",
                [&key],
                |r| r.get(0),
            )
            .optional()?;

        let occurrences = match existing {
            Some(json) => {
                let mut timestamps = decode_timestamps(&json)?;
                timestamps.push(timestamp);
                tx.execute(
                    "UPDATE events SET timestamps = ?2 WHERE key = ?1",
                    params![key, encode_timestamps(&timestamps)?],
                )?;
                timestamps.len()
            }
            None => {
                tx.execute(
                    "INSERT INTO events (key, details, timestamps, queued_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        key,
                        details,
                        encode_timestamps(&[timestamp])?,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                1
            }
        };

        tx.commit()?;

        tracing::debug!(key = %&key[..12], occurrences, "Queued event");
        Ok(())
    }

    /// Snapshot of every queued event, oldest first.
    pub fn all(&self) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key, details, timestamps FROM events ORDER BY rowid ASC")?;

        let events = stmt
            .query_map([], |row| {
                let timestamps: String = row.get(2)?;
                Ok(Event {
                    key: row.get(0)?,
                    details: row.get(1)?,
                    timestamps: decode_timestamps(&timestamps)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    /// Remove the occurrences of `event` that the caller observed.
    ///
    /// Idempotent: discarding an already removed event succeeds. Occurrences
    /// appended after the caller's snapshot stay queued.
    pub fn discard(&self, event: &Event) -> Result<Discarded> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT timestamps FROM events WHERE key = ?1",
                [&event.key],
                |r| r.get(0),
            )
            .optional()?;

        let result = match stored {
            None => Discarded::Absent,
            Some(json) => {
                let stored = decode_timestamps(&json)?;
                if !stored.starts_with(&event.timestamps) {
                    Discarded::Changed
                } else if stored.len() == event.timestamps.len() {
                    tx.execute("DELETE FROM events WHERE key = ?1", [&event.key])?;
                    Discarded::Removed
                } else {
                    let remaining = &stored[event.timestamps.len()..];
                    tx.execute(
                        "UPDATE events SET timestamps = ?2 WHERE key = ?1",
                        params![event.key, encode_timestamps(remaining)?],
                    )?;
                    Discarded::Trimmed {
                        remaining: remaining.len(),
                    }
                }
            }
        };

        tx.commit()?;

        tracing::debug!(key = %event.short_key(), result = ?result, "Discarded event");
        Ok(result)
    }

    /// Number of queued events
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn encode_timestamps(timestamps: &[DateTime<Utc>]) -> rusqlite::Result<String> {
    serde_json::to_string(timestamps).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode_timestamps(json: &str) -> rusqlite::Result<Vec<DateTime<Utc>>> {
    serde_json::from_str(json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> EventStore {
        let store = EventStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_queue_creates_record() {
        let store = store();
        store.queue(b"{\"type\":\"rain\"}", at(100)).unwrap();

        let events = store.all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, content_key(b"{\"type\":\"rain\"}"));
        assert_eq!(events[0].details, b"{\"type\":\"rain\"}".to_vec());
        assert_eq!(events[0].timestamps, vec![at(100)]);
    }

    #[test]
    fn test_same_details_append_in_order() {
        let store = store();
        store.queue(b"D", at(200)).unwrap();
        store.queue(b"D", at(100)).unwrap();
        store.queue(b"D", at(200)).unwrap();

        let events = store.all().unwrap();
        assert_eq!(events.len(), 1);
        // insertion order, duplicates kept
        assert_eq!(events[0].timestamps, vec![at(200), at(100), at(200)]);
    }

    #[test]
    fn test_distinct_details_are_independent() {
        let store = store();
        store.queue(b"D1", at(1)).unwrap();
        store.queue(b"D2", at(1)).unwrap();

        let events = store.all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].details, b"D1".to_vec());
        assert_eq!(events[1].details, b"D2".to_vec());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_nanosecond_precision_preserved() {
        let store = store();
        let ts = crate::types::from_nanos(1_600_000_000_000_000_001);
        store.queue(b"D", ts).unwrap();
        assert_eq!(store.all().unwrap()[0].timestamps, vec![ts]);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let store = store();
        store.queue(b"D", at(1)).unwrap();
        let event = store.all().unwrap().remove(0);

        assert_eq!(store.discard(&event).unwrap(), Discarded::Removed);
        assert!(store.all().unwrap().is_empty());
        assert_eq!(store.discard(&event).unwrap(), Discarded::Absent);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_discard_keeps_occurrences_queued_after_snapshot() {
        let store = store();
        store.queue(b"D", at(1)).unwrap();
        let snapshot = store.all().unwrap().remove(0);

        store.queue(b"D", at(2)).unwrap();

        assert_eq!(
            store.discard(&snapshot).unwrap(),
            Discarded::Trimmed { remaining: 1 }
        );
        let events = store.all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamps, vec![at(2)]);
    }

    #[test]
    fn test_discard_leaves_changed_record_alone() {
        let store = store();
        store.queue(b"D", at(5)).unwrap();

        let stale = Event {
            key: content_key(b"D"),
            details: b"D".to_vec(),
            timestamps: vec![at(4)],
        };
        assert_eq!(store.discard(&stale).unwrap(), Discarded::Changed);
        assert_eq!(store.all().unwrap()[0].timestamps, vec![at(5)]);
    }

    #[test]
    fn test_discard_only_touches_its_key() {
        let store = store();
        store.queue(b"D1", at(1)).unwrap();
        store.queue(b"D2", at(1)).unwrap();

        let first = store.all().unwrap().remove(0);
        store.discard(&first).unwrap();

        let events = store.all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details, b"D2".to_vec());
    }
}

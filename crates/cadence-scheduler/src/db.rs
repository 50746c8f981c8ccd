use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;

use crate::error::Result;

/// Wait this long for another connection's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database file with WAL journaling and a busy timeout
/// so the engine and management handles can share it.
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Initialise the scheduler schema in `conn`.
///
/// Idempotent. Timestamps are fixed-width RFC 3339 UTC strings (see [`ts`]),
/// so lexical comparison in SQL is chronological comparison.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recurring_schedules (
            id               TEXT    NOT NULL PRIMARY KEY,
            owner_id         TEXT    NOT NULL,
            name             TEXT    NOT NULL,
            frequency        TEXT    NOT NULL,
            config           TEXT    NOT NULL,   -- JSON-encoded ScheduleConfig
            status           TEXT    NOT NULL DEFAULT 'draft',
            total_scheduled  INTEGER NOT NULL DEFAULT 0,
            total_sent       INTEGER NOT NULL DEFAULT 0,
            total_failed     INTEGER NOT NULL DEFAULT 0,
            next_send_at     TEXT,
            last_sent_at     TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_status_next
            ON recurring_schedules (status, next_send_at);
        CREATE INDEX IF NOT EXISTS idx_schedules_owner
            ON recurring_schedules (owner_id, created_at);

        CREATE TABLE IF NOT EXISTS occurrences (
            id               TEXT    NOT NULL PRIMARY KEY,
            schedule_id      TEXT    NOT NULL REFERENCES recurring_schedules (id),
            sequence_number  INTEGER NOT NULL,
            scheduled_at     TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'pending',
            result_ref       TEXT,
            error_message    TEXT,
            retry_count      INTEGER NOT NULL DEFAULT 0,
            next_retry_at    TEXT,               -- set only while awaiting a retry
            claimed_at       TEXT,
            completed_at     TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- Due selection: pending by scheduled_at, retries by next_retry_at.
        CREATE INDEX IF NOT EXISTS idx_occurrences_status_scheduled
            ON occurrences (status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_occurrences_status_retry
            ON occurrences (status, next_retry_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_occurrences_sequence
            ON occurrences (schedule_id, sequence_number);
        -- At most one live occurrence per slot.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_occurrences_slot
            ON occurrences (schedule_id, scheduled_at) WHERE status <> 'cancelled';
        ",
    )?;
    Ok(())
}

/// Storage form of an instant: microsecond precision, `Z` suffix, fixed width.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; `idx` is the column index for error reporting.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// Surface a malformed text column as a conversion failure.
pub(crate) fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('recurring_schedules', 'occurrences')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn timestamps_are_fixed_width_and_sortable() {
        let a: DateTime<Utc> = "2026-11-01T09:00:00Z".parse().unwrap();
        let b: DateTime<Utc> = "2026-11-01T09:00:00.5Z".parse().unwrap();
        assert_eq!(ts(a), "2026-11-01T09:00:00.000000Z");
        assert_eq!(ts(a).len(), ts(b).len());
        assert!(ts(a) < ts(b));
        assert_eq!(parse_ts(0, &ts(b)).unwrap(), b);
    }

    #[test]
    fn open_db_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(dir.path().join("cadence.db")).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}

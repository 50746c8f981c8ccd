//! SQLite-backed persistence for schedules and occurrences.
//!
//! Every state change goes through a short `IMMEDIATE` transaction that also
//! recomputes the schedule's derived counters, so readers never see counters
//! that disagree with the occurrence rows. The connection mutex is a plain
//! `std::sync::Mutex` and is never held across an `.await`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use cadence_core::{OccurrenceId, OwnerId, Page, Paged, ScheduleId};
use cadence_recurrence::ScheduleConfig;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::db::{bad_column, init_db, open_db, parse_opt_ts, parse_ts, ts};
use crate::delivery::DeliveryOutcome;
use crate::error::{Result, SchedulerError};
use crate::retry::RetryPolicy;
use crate::types::{Occurrence, OccurrenceState, RecurringSchedule, ScheduleStatus};

const SCHEDULE_COLS: &str = "id, owner_id, name, config, status, total_scheduled, total_sent,
     total_failed, next_send_at, last_sent_at, created_at, updated_at";

const OCCURRENCE_COLS: &str = "id, schedule_id, sequence_number, scheduled_at, status,
     result_ref, error_message, retry_count, next_retry_at, claimed_at, completed_at,
     created_at, updated_at";

/// How an execution attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Committed {
    Sent,
    Skipped,
    RetryScheduled { next_retry_at: DateTime<Utc> },
    Failed,
    /// The schedule was cancelled while the delivery ran.
    Cancelled,
    /// The occurrence was no longer `executing` (e.g. recovered as stale).
    Superseded,
}

/// Shared handle to the schedule database. Cheap to clone.
///
/// Open one store per process role (engine, management API); separate
/// connections to the same file serialize through SQLite's busy timeout.
#[derive(Clone)]
pub struct ScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(open_db(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside an `IMMEDIATE` transaction; commits on `Ok`, rolls
    /// back on `Err` (the transaction is dropped uncommitted).
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // --- schedules ---------------------------------------------------------

    /// Persist a new schedule in `draft`.
    pub fn insert_schedule(
        &self,
        owner_id: &OwnerId,
        name: &str,
        config: &ScheduleConfig,
        now: DateTime<Utc>,
    ) -> Result<RecurringSchedule> {
        let id = ScheduleId::new();
        let config_json = serde_json::to_string(config)?;
        let now_str = ts(now);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recurring_schedules
                 (id, owner_id, name, frequency, config, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6, ?6)",
                params![
                    id.as_str(),
                    owner_id.as_str(),
                    name,
                    config.frequency().to_string(),
                    config_json,
                    now_str
                ],
            )?;
            Ok(())
        })?;
        info!(schedule_id = %id, %name, frequency = %config.frequency(), "schedule created");
        Ok(RecurringSchedule {
            id,
            owner_id: owner_id.clone(),
            name: name.to_string(),
            config: config.clone(),
            status: ScheduleStatus::Draft,
            total_scheduled: 0,
            total_sent: 0,
            total_failed: 0,
            next_send_at: None,
            last_sent_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_schedule(&self, id: &ScheduleId) -> Result<RecurringSchedule> {
        self.with_conn(|conn| load_schedule(conn, id))
    }

    /// Schedules of one owner, newest first, optionally filtered by status.
    pub fn list_schedules(
        &self,
        owner_id: &OwnerId,
        status: Option<ScheduleStatus>,
        page: Page,
    ) -> Result<Paged<RecurringSchedule>> {
        let status = status.map(ScheduleStatus::as_str);
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM recurring_schedules
                 WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)",
                params![owner_id.as_str(), status],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SCHEDULE_COLS} FROM recurring_schedules
                 WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3 OFFSET ?4"
            ))?;
            let items = stmt
                .query_map(
                    params![owner_id.as_str(), status, page.limit, page.offset],
                    schedule_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Paged {
                items,
                total: total as u64,
            })
        })
    }

    // --- occurrences -------------------------------------------------------

    /// Occurrences of one schedule in ascending sequence order.
    pub fn list_occurrences(&self, id: &ScheduleId, page: Page) -> Result<Paged<Occurrence>> {
        self.with_conn(|conn| {
            load_status(conn, id)?;
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM occurrences WHERE schedule_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {OCCURRENCE_COLS} FROM occurrences
                 WHERE schedule_id = ?1
                 ORDER BY sequence_number
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let items = stmt
                .query_map(params![id.as_str(), page.limit, page.offset], occurrence_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Paged {
                items,
                total: total as u64,
            })
        })
    }

    pub fn get_occurrence(&self, id: &OccurrenceId) -> Result<Option<Occurrence>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {OCCURRENCE_COLS} FROM occurrences WHERE id = ?1"),
                [id.as_str()],
                occurrence_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Due occurrences of active schedules: pending ones whose time has come
    /// and retries whose backoff has elapsed, oldest slot first.
    pub fn due_occurrences(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Occurrence>> {
        let now_str = ts(now);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT o.id, o.schedule_id, o.sequence_number, o.scheduled_at, o.status,
                        o.result_ref, o.error_message, o.retry_count, o.next_retry_at,
                        o.claimed_at, o.completed_at, o.created_at, o.updated_at
                 FROM occurrences o
                 JOIN recurring_schedules s ON s.id = o.schedule_id
                 WHERE s.status = 'active'
                   AND ((o.status = 'pending' AND o.scheduled_at <= ?1)
                     OR (o.status = 'failed' AND o.next_retry_at IS NOT NULL
                         AND o.next_retry_at <= ?1))
                 ORDER BY o.scheduled_at, o.sequence_number
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![now_str, limit], occurrence_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Compare-and-swap claim. Succeeds only if the row is still in the
    /// state `observed` was read in, is still due, and its schedule is still
    /// active. `false` means somebody else got there first.
    pub fn claim(&self, observed: &Occurrence, now: DateTime<Utc>) -> Result<bool> {
        let now_str = ts(now);
        let claimed = self.with_tx(|tx| {
            let n = tx.execute(
                "UPDATE occurrences
                 SET status = 'executing', claimed_at = ?2, updated_at = ?2
                 WHERE id = ?1
                   AND status = ?3
                   AND ((status = 'pending' AND scheduled_at <= ?2)
                     OR (status = 'failed' AND next_retry_at IS NOT NULL
                         AND next_retry_at <= ?2))
                   AND EXISTS (SELECT 1 FROM recurring_schedules s
                               WHERE s.id = occurrences.schedule_id AND s.status = 'active')",
                params![observed.id.as_str(), now_str, observed.state.status_str()],
            )?;
            if n == 1 {
                recompute_counters(tx, &observed.schedule_id, now)?;
            }
            Ok(n == 1)
        })?;
        if !claimed {
            debug!(
                occurrence_id = %observed.id,
                schedule_id = %observed.schedule_id,
                "claim lost"
            );
        }
        Ok(claimed)
    }

    /// Record the result of one execution attempt.
    pub fn commit_outcome(
        &self,
        id: &OccurrenceId,
        outcome: &DeliveryOutcome,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<Committed> {
        self.with_tx(|tx| apply_outcome(tx, id, outcome, now, policy))
    }

    /// Occurrences stuck in `executing` since before `cutoff` are treated as
    /// failed attempts ("execution interrupted").
    pub fn recover_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<Vec<(Occurrence, Committed)>> {
        let cutoff_str = ts(cutoff);
        self.with_tx(|tx| {
            let stale = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT {OCCURRENCE_COLS} FROM occurrences
                     WHERE status = 'executing' AND claimed_at IS NOT NULL AND claimed_at < ?1
                     ORDER BY scheduled_at, sequence_number"
                ))?;
                let rows = stmt
                    .query_map([&cutoff_str], occurrence_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            let interrupted = DeliveryOutcome::Failed {
                error: "execution interrupted".to_string(),
            };
            let mut out = Vec::with_capacity(stale.len());
            for occ in stale {
                let committed = apply_outcome(tx, &occ.id, &interrupted, now, policy)?;
                out.push((occ, committed));
            }
            Ok(out)
        })
    }
}

// --- transaction-scoped helpers ------------------------------------------

pub(crate) fn load_schedule(conn: &Connection, id: &ScheduleId) -> Result<RecurringSchedule> {
    conn.query_row(
        &format!("SELECT {SCHEDULE_COLS} FROM recurring_schedules WHERE id = ?1"),
        [id.as_str()],
        schedule_from_row,
    )
    .optional()?
    .ok_or_else(|| SchedulerError::ScheduleNotFound {
        id: id.to_string(),
    })
}

pub(crate) fn load_status(conn: &Connection, id: &ScheduleId) -> Result<ScheduleStatus> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM recurring_schedules WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| SchedulerError::ScheduleNotFound {
        id: id.to_string(),
    })?;
    raw.parse()
        .map_err(|e: String| SchedulerError::Database(bad_column(0, e)))
}

/// Move a schedule from `from` to `to` if and only if it is still in `from`.
pub(crate) fn set_status(
    conn: &Connection,
    id: &ScheduleId,
    from: ScheduleStatus,
    to: ScheduleStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(SchedulerError::InvalidTransition { from, to });
    }
    let n = conn.execute(
        "UPDATE recurring_schedules SET status = ?3, updated_at = ?4
         WHERE id = ?1 AND status = ?2",
        params![id.as_str(), from.as_str(), to.as_str(), ts(now)],
    )?;
    if n == 0 {
        let actual = load_status(conn, id)?;
        return Err(SchedulerError::InvalidTransition { from: actual, to });
    }
    info!(schedule_id = %id, %from, %to, "schedule transition");
    Ok(())
}

/// Recompute derived counters and `next_send_at` from the occurrence rows.
pub(crate) fn recompute_counters(conn: &Connection, id: &ScheduleId, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE recurring_schedules SET
            total_scheduled = (SELECT COUNT(*) FROM occurrences WHERE schedule_id = ?1),
            total_sent      = (SELECT COUNT(*) FROM occurrences
                               WHERE schedule_id = ?1 AND status = 'sent'),
            total_failed    = (SELECT COUNT(*) FROM occurrences
                               WHERE schedule_id = ?1 AND status = 'failed'
                                 AND next_retry_at IS NULL),
            next_send_at    = (SELECT MIN(scheduled_at) FROM occurrences
                               WHERE schedule_id = ?1 AND status = 'pending'),
            updated_at      = ?2
         WHERE id = ?1",
        params![id.as_str(), ts(now)],
    )?;
    Ok(())
}

/// Pending, executing and awaiting-retry occurrences.
pub(crate) fn live_count(conn: &Connection, id: &ScheduleId) -> Result<u32> {
    let n: u32 = conn.query_row(
        "SELECT COUNT(*) FROM occurrences
         WHERE schedule_id = ?1
           AND (status IN ('pending', 'executing')
             OR (status = 'failed' AND next_retry_at IS NOT NULL))",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn apply_outcome(
    conn: &Connection,
    id: &OccurrenceId,
    outcome: &DeliveryOutcome,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Result<Committed> {
    let row: Option<(String, String, u32)> = conn
        .query_row(
            "SELECT schedule_id, status, retry_count FROM occurrences WHERE id = ?1",
            [id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((schedule_id, status, retry_count)) = row else {
        return Ok(Committed::Superseded);
    };
    if status != "executing" {
        debug!(occurrence_id = %id, %status, "outcome for an occurrence no longer executing");
        return Ok(Committed::Superseded);
    }
    let schedule_id = ScheduleId(schedule_id);
    let now_str = ts(now);

    let committed = if load_status(conn, &schedule_id)? == ScheduleStatus::Cancelled {
        let result_ref = match outcome {
            DeliveryOutcome::Delivered { result_ref } => result_ref.clone(),
            _ => None,
        };
        conn.execute(
            "UPDATE occurrences SET status = 'cancelled', result_ref = ?2,
                    error_message = 'schedule cancelled during execution',
                    next_retry_at = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'executing'",
            params![id.as_str(), result_ref, now_str],
        )?;
        Committed::Cancelled
    } else {
        match outcome {
            DeliveryOutcome::Delivered { result_ref } => {
                conn.execute(
                    "UPDATE occurrences SET status = 'sent', result_ref = ?2,
                            error_message = NULL, next_retry_at = NULL,
                            completed_at = ?3, updated_at = ?3
                     WHERE id = ?1 AND status = 'executing'",
                    params![id.as_str(), result_ref, now_str],
                )?;
                conn.execute(
                    "UPDATE recurring_schedules SET last_sent_at = ?2 WHERE id = ?1",
                    params![schedule_id.as_str(), now_str],
                )?;
                Committed::Sent
            }
            DeliveryOutcome::Skipped { reason } => {
                conn.execute(
                    "UPDATE occurrences SET status = 'skipped', error_message = ?2,
                            next_retry_at = NULL, completed_at = ?3, updated_at = ?3
                     WHERE id = ?1 AND status = 'executing'",
                    params![id.as_str(), reason, now_str],
                )?;
                Committed::Skipped
            }
            DeliveryOutcome::Failed { error } => {
                let retry_count = retry_count + 1;
                match policy.next_attempt(retry_count, now) {
                    Some(next_retry_at) => {
                        conn.execute(
                            "UPDATE occurrences SET status = 'failed', retry_count = ?2,
                                    error_message = ?3, next_retry_at = ?4, updated_at = ?5
                             WHERE id = ?1 AND status = 'executing'",
                            params![id.as_str(), retry_count, error, ts(next_retry_at), now_str],
                        )?;
                        Committed::RetryScheduled { next_retry_at }
                    }
                    None => {
                        conn.execute(
                            "UPDATE occurrences SET status = 'failed', retry_count = ?2,
                                    error_message = ?3, next_retry_at = NULL,
                                    completed_at = ?4, updated_at = ?4
                             WHERE id = ?1 AND status = 'executing'",
                            params![id.as_str(), retry_count, error, now_str],
                        )?;
                        Committed::Failed
                    }
                }
            }
        }
    };
    recompute_counters(conn, &schedule_id, now)?;
    Ok(committed)
}

// --- row mapping -----------------------------------------------------------

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<RecurringSchedule> {
    let config_json: String = row.get(3)?;
    let config: ScheduleConfig = serde_json::from_str(&config_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: String = row.get(4)?;
    Ok(RecurringSchedule {
        id: ScheduleId(row.get(0)?),
        owner_id: OwnerId(row.get(1)?),
        name: row.get(2)?,
        config,
        status: status.parse().map_err(|e| bad_column(4, e))?,
        total_scheduled: row.get(5)?,
        total_sent: row.get(6)?,
        total_failed: row.get(7)?,
        next_send_at: parse_opt_ts(8, row.get(8)?)?,
        last_sent_at: parse_opt_ts(9, row.get(9)?)?,
        created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        updated_at: parse_ts(11, &row.get::<_, String>(11)?)?,
    })
}

pub(crate) fn occurrence_from_row(row: &Row<'_>) -> rusqlite::Result<Occurrence> {
    let status: String = row.get(4)?;
    let next_retry_at = parse_opt_ts(8, row.get(8)?)?;
    let state = OccurrenceState::from_columns(&status, next_retry_at)
        .ok_or_else(|| bad_column(4, format!("unknown occurrence status: {status}")))?;
    Ok(Occurrence {
        id: OccurrenceId(row.get(0)?),
        schedule_id: ScheduleId(row.get(1)?),
        sequence_number: row.get(2)?,
        scheduled_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        state,
        result_ref: row.get(5)?,
        error_message: row.get(6)?,
        retry_count: row.get(7)?,
        claimed_at: parse_opt_ts(9, row.get(9)?)?,
        completed_at: parse_opt_ts(10, row.get(10)?)?,
        created_at: parse_ts(11, &row.get::<_, String>(11)?)?,
        updated_at: parse_ts(12, &row.get::<_, String>(12)?)?,
    })
}

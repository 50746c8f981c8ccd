//! Schedule State Machine: activation, pause, resume, cancel and the
//! completion check that runs after every execution round.

use cadence_core::ScheduleId;
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::ts;
use crate::error::{Result, SchedulerError};
use crate::materialize::{MaterializeReport, Materializer};
use crate::store::{live_count, load_schedule, load_status, recompute_counters, set_status, ScheduleStore};
use crate::types::{RecurringSchedule, ScheduleStatus};

/// Code attached when a schedule's start lies too far in the past.
pub const START_IN_PAST: &str = "START_IN_PAST";

/// How far in the past `start_at` may lie at activation time.
fn start_tolerance() -> TimeDelta {
    TimeDelta::hours(1)
}

/// One reason a schedule cannot be activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationIssue {
    pub code: String,
    pub message: String,
}

impl ActivationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Host-side prerequisites for activation (recipients resolvable, content
/// configured, ...). An empty list means ready.
pub trait ActivationGate: Send + Sync {
    fn check(&self, schedule: &RecurringSchedule) -> Vec<ActivationIssue>;
}

/// Gate that never objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ActivationGate for AlwaysReady {
    fn check(&self, _schedule: &RecurringSchedule) -> Vec<ActivationIssue> {
        Vec::new()
    }
}

/// Outcome of a resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// Pending occurrences whose time passed while paused, now `skipped`.
    pub missed: u32,
    pub materialized: MaterializeReport,
}

impl ScheduleStore {
    /// `draft → active`, then materialize the first window.
    pub fn activate(
        &self,
        id: &ScheduleId,
        gate: &dyn ActivationGate,
        materializer: &Materializer,
        now: DateTime<Utc>,
    ) -> Result<MaterializeReport> {
        let schedule = self.get_schedule(id)?;
        if schedule.status != ScheduleStatus::Draft {
            return Err(SchedulerError::InvalidTransition {
                from: schedule.status,
                to: ScheduleStatus::Active,
            });
        }

        let mut issues = gate.check(&schedule);
        if schedule.config.start_at < now - start_tolerance() {
            issues.push(ActivationIssue::new(
                START_IN_PAST,
                format!("start {} is more than an hour in the past", schedule.config.start_at),
            ));
        }
        if !issues.is_empty() {
            warn!(schedule_id = %id, issues = issues.len(), "activation refused");
            return Err(SchedulerError::ActivationRefused { issues });
        }

        self.with_tx(|tx| {
            set_status(tx, id, ScheduleStatus::Draft, ScheduleStatus::Active, now)?;
            Ok(settle(tx, materializer, id, None, now)?.unwrap_or_default())
        })
    }

    /// `active → paused`. Materialized occurrences stay as they are.
    pub fn pause(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<()> {
        self.with_tx(|tx| set_status(tx, id, ScheduleStatus::Active, ScheduleStatus::Paused, now))
    }

    /// `paused → active`. Pending occurrences whose time passed during the
    /// pause are marked `skipped`; the window is then refilled from `now`.
    ///
    /// Awaiting-retry occurrences are left as they are: a retry whose
    /// `next_retry_at` fell inside the pause is due again on the next tick.
    pub fn resume(
        &self,
        id: &ScheduleId,
        materializer: &Materializer,
        now: DateTime<Utc>,
    ) -> Result<ResumeReport> {
        self.with_tx(|tx| {
            set_status(tx, id, ScheduleStatus::Paused, ScheduleStatus::Active, now)?;
            let now_str = ts(now);
            let missed = tx.execute(
                "UPDATE occurrences
                 SET status = 'skipped', error_message = 'missed while paused',
                     completed_at = ?2, updated_at = ?2
                 WHERE schedule_id = ?1 AND status = 'pending' AND scheduled_at < ?2",
                params![id.as_str(), now_str],
            )? as u32;
            if missed > 0 {
                warn!(schedule_id = %id, count = missed, "occurrences missed while paused");
            }
            recompute_counters(tx, id, now)?;
            let materialized = settle(tx, materializer, id, Some(now), now)?.unwrap_or_default();
            Ok(ResumeReport { missed, materialized })
        })
    }

    /// Cancel from `draft`, `active` or `paused`. Pending and awaiting-retry
    /// occurrences become `cancelled`; finished ones are left alone and
    /// in-flight executions are converted when they commit.
    pub fn cancel(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<u32> {
        self.with_tx(|tx| {
            let from = load_status(tx, id)?;
            set_status(tx, id, from, ScheduleStatus::Cancelled, now)?;
            let cancelled = tx.execute(
                "UPDATE occurrences
                 SET status = 'cancelled', next_retry_at = NULL, updated_at = ?2
                 WHERE schedule_id = ?1
                   AND (status = 'pending' OR (status = 'failed' AND next_retry_at IS NOT NULL))",
                params![id.as_str(), ts(now)],
            )? as u32;
            recompute_counters(tx, id, now)?;
            info!(schedule_id = %id, occurrences = cancelled, "schedule cancelled");
            Ok(cancelled)
        })
    }

    /// Refill the window of an active schedule and complete it if the rule
    /// is exhausted. `None` when the schedule is not active.
    pub fn settle(
        &self,
        id: &ScheduleId,
        materializer: &Materializer,
        now: DateTime<Utc>,
    ) -> Result<Option<MaterializeReport>> {
        self.with_tx(|tx| settle(tx, materializer, id, None, now))
    }
}

pub(crate) fn settle(
    conn: &Connection,
    materializer: &Materializer,
    id: &ScheduleId,
    floor: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<MaterializeReport>> {
    let schedule = load_schedule(conn, id)?;
    if schedule.status != ScheduleStatus::Active {
        return Ok(None);
    }
    let report = materializer.extend(conn, &schedule, floor, now)?;
    if report.exhausted && live_count(conn, id)? == 0 {
        set_status(conn, id, ScheduleStatus::Active, ScheduleStatus::Completed, now)?;
        info!(schedule_id = %id, "schedule completed");
    }
    Ok(Some(report))
}

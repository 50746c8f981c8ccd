//! Occurrence Materializer: keeps a bounded window of future `pending`
//! occurrences per schedule.

use cadence_core::config::MaterializerConfig;
use cadence_core::OccurrenceId;
use cadence_recurrence::{RecurrenceRule, RuleContext};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::db::{parse_opt_ts, ts};
use crate::error::Result;
use crate::store::{live_count, recompute_counters};
use crate::types::RecurringSchedule;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub created: u32,
    /// No further candidate exists within the schedule's bounds.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct Materializer {
    window_size: u32,
    ctx: RuleContext,
}

impl Materializer {
    pub fn new(window_size: u32, ctx: RuleContext) -> Self {
        Self {
            window_size: window_size.max(1),
            ctx,
        }
    }

    pub fn from_config(cfg: &MaterializerConfig, ctx: RuleContext) -> Self {
        Self::new(cfg.window_size, ctx.with_scan_limit(cfg.scan_limit))
    }

    pub fn rule_context(&self) -> &RuleContext {
        &self.ctx
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Top the window up to `window_size` live occurrences.
    ///
    /// Continues after the latest materialized `scheduled_at` (or after
    /// `floor`, if later) with the next sequence number; stops at the
    /// `max_occurrences` sequence cap, at `end_at`, or when the rule runs
    /// dry. Must run inside the caller's transaction.
    pub(crate) fn extend(
        &self,
        conn: &Connection,
        schedule: &RecurringSchedule,
        floor: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<MaterializeReport> {
        let rule = RecurrenceRule::compile(&schedule.config, self.ctx.parser.as_ref())?;
        let id = &schedule.id;

        let (max_seq, last_at): (Option<u32>, Option<String>) = conn.query_row(
            "SELECT MAX(sequence_number), MAX(scheduled_at) FROM occurrences
             WHERE schedule_id = ?1",
            [id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let last_at = parse_opt_ts(1, last_at)?;
        let after = match (last_at, floor) {
            (Some(last), Some(floor)) => Some(last.max(floor)),
            (last, floor) => last.or(floor),
        };

        let cap = rule.max_occurrences();
        let capped = |seq: u32| cap.is_some_and(|c| seq > c);
        let mut next_seq = max_seq.unwrap_or(0) + 1;
        let need = self.window_size.saturating_sub(live_count(conn, id)?);

        let mut instants = rule
            .instants(after, self.ctx.holidays.as_ref(), self.ctx.scan_limit)
            .peekable();
        let now_str = ts(now);
        let mut created = 0;
        while created < need && !capped(next_seq) {
            let Some(at) = instants.next() else {
                break;
            };
            let at_str = ts(at);
            let taken: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM occurrences
                  WHERE schedule_id = ?1 AND scheduled_at = ?2 AND status <> 'cancelled')",
                params![id.as_str(), at_str],
                |row| row.get(0),
            )?;
            if taken {
                continue;
            }
            conn.execute(
                "INSERT INTO occurrences
                 (id, schedule_id, sequence_number, scheduled_at, status, retry_count,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
                params![OccurrenceId::new().as_str(), id.as_str(), next_seq, at_str, now_str],
            )?;
            debug!(schedule_id = %id, seq = next_seq, scheduled_at = %at, "occurrence materialized");
            next_seq += 1;
            created += 1;
        }
        let exhausted = capped(next_seq) || instants.peek().is_none();

        if created > 0 {
            recompute_counters(conn, id, now)?;
        }
        Ok(MaterializeReport { created, exhausted })
    }
}

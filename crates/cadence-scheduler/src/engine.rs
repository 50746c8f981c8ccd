use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::config::EngineConfig;
use cadence_core::ScheduleId;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryHandler, DeliveryOutcome, DeliveryRequest};
use crate::error::{Result, SchedulerError};
use crate::materialize::Materializer;
use crate::retry::RetryPolicy;
use crate::store::{Committed, ScheduleStore};
use crate::types::{Occurrence, TickReport};

/// Polls for due occurrences and executes them through a [`DeliveryHandler`].
///
/// Cheap to clone; every clone shares the same store and handler.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: ScheduleStore,
    handler: Arc<dyn DeliveryHandler>,
    materializer: Materializer,
    retry: RetryPolicy,
    batch_size: u32,
    max_concurrency: usize,
    delivery_timeout: Duration,
    stale_after: Duration,
    tick_interval: Duration,
}

impl ExecutionEngine {
    pub fn new(
        store: ScheduleStore,
        handler: Arc<dyn DeliveryHandler>,
        materializer: Materializer,
        cfg: &EngineConfig,
    ) -> Self {
        Self {
            store,
            handler,
            materializer,
            retry: RetryPolicy::from_config(cfg),
            batch_size: cfg.batch_size.max(1),
            max_concurrency: cfg.max_concurrency.max(1),
            delivery_timeout: Duration::from_secs(cfg.delivery_timeout_secs),
            stale_after: Duration::from_secs(cfg.stale_claim_secs),
            tick_interval: Duration::from_secs(cfg.tick_interval_secs.max(1)),
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Main loop. Ticks every `tick_interval` until `shutdown` broadcasts
    /// `true` or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            batch_size = self.batch_size,
            "execution engine started"
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(code = e.code(), "engine tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("execution engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// One polling round at `now`:
    /// recover stale claims, claim and execute due occurrences (groups of
    /// one schedule run sequentially, groups run concurrently), then refill
    /// windows and detect completion.
    ///
    /// Returns the first persistence error once every group has finished;
    /// work committed by other groups stays committed.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut touched = BTreeSet::new();

        let stale_cutoff = TimeDelta::from_std(self.stale_after)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for (occ, committed) in self.store.recover_stale(stale_cutoff, now, &self.retry)? {
            warn!(
                occurrence_id = %occ.id,
                schedule_id = %occ.schedule_id,
                seq = occ.sequence_number,
                "stale claim recovered"
            );
            report.recovered += 1;
            tally(&mut report, committed);
            touched.insert(occ.schedule_id);
        }

        let due = self.store.due_occurrences(now, self.batch_size)?;
        let groups = group_by_schedule(due);
        for (id, _) in &groups {
            touched.remove(id);
        }

        let results: Vec<(TickReport, Option<SchedulerError>)> = stream::iter(groups)
            .map(|(id, occs)| self.run_group(id, occs, now))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut first_err = None;
        for (group_report, err) in results {
            report.merge(group_report);
            if first_err.is_none() {
                first_err = err;
            }
        }
        // Recovered schedules with nothing due still need a completion check.
        for id in touched {
            if let Err(e) = self.store.settle(&id, &self.materializer, now) {
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        if report != TickReport::default() {
            info!(
                claimed = report.claimed,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                retry_scheduled = report.retry_scheduled,
                lost_claims = report.lost_claims,
                cancelled = report.cancelled,
                recovered = report.recovered,
                "tick complete"
            );
        }
        Ok(report)
    }

    async fn run_group(
        &self,
        id: ScheduleId,
        occs: Vec<Occurrence>,
        now: DateTime<Utc>,
    ) -> (TickReport, Option<SchedulerError>) {
        let mut report = TickReport::default();
        for occ in &occs {
            if let Err(e) = self.execute(occ, now, &mut report).await {
                error!(schedule_id = %id, occurrence_id = %occ.id, "execution aborted: {e}");
                return (report, Some(e));
            }
        }
        if let Err(e) = self.store.settle(&id, &self.materializer, now) {
            return (report, Some(e));
        }
        (report, None)
    }

    async fn execute(&self, occ: &Occurrence, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        if !self.store.claim(occ, now)? {
            report.lost_claims += 1;
            return Ok(());
        }
        report.claimed += 1;

        let request = DeliveryRequest {
            schedule_id: occ.schedule_id.clone(),
            occurrence_id: occ.id.clone(),
            sequence_number: occ.sequence_number,
            scheduled_at: occ.scheduled_at,
        };
        debug!(occurrence_id = %occ.id, schedule_id = %occ.schedule_id, seq = occ.sequence_number, "delivering");
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.delivery_timeout, self.handler.deliver(request)).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::Failed {
                error: format!("delivery timed out after {:?}", self.delivery_timeout),
            },
        };
        let finished = now + TimeDelta::from_std(started.elapsed()).unwrap_or_default();

        let committed = self.store.commit_outcome(&occ.id, &outcome, finished, &self.retry)?;
        match (&committed, &outcome) {
            (Committed::Sent, _) => {
                info!(occurrence_id = %occ.id, schedule_id = %occ.schedule_id, seq = occ.sequence_number, "occurrence sent");
            }
            (Committed::Skipped, DeliveryOutcome::Skipped { reason }) => {
                info!(occurrence_id = %occ.id, schedule_id = %occ.schedule_id, %reason, "occurrence skipped");
            }
            (Committed::RetryScheduled { next_retry_at }, DeliveryOutcome::Failed { error }) => {
                warn!(
                    occurrence_id = %occ.id,
                    schedule_id = %occ.schedule_id,
                    %next_retry_at,
                    "delivery failed, retry scheduled: {error}"
                );
            }
            (Committed::Failed, DeliveryOutcome::Failed { error }) => {
                warn!(occurrence_id = %occ.id, schedule_id = %occ.schedule_id, "delivery failed permanently: {error}");
            }
            (Committed::Cancelled, _) => {
                info!(occurrence_id = %occ.id, schedule_id = %occ.schedule_id, "schedule cancelled during delivery");
            }
            _ => {}
        }
        tally(report, committed);
        Ok(())
    }
}

fn tally(report: &mut TickReport, committed: Committed) {
    match committed {
        Committed::Sent => report.sent += 1,
        Committed::Skipped => report.skipped += 1,
        Committed::RetryScheduled { .. } => report.retry_scheduled += 1,
        Committed::Failed => report.failed += 1,
        Committed::Cancelled => report.cancelled += 1,
        Committed::Superseded => report.lost_claims += 1,
    }
}

/// Group due occurrences by schedule, keeping the query's order both across
/// groups and inside each group.
fn group_by_schedule(due: Vec<Occurrence>) -> Vec<(ScheduleId, Vec<Occurrence>)> {
    let mut index: HashMap<ScheduleId, usize> = HashMap::new();
    let mut groups: Vec<(ScheduleId, Vec<Occurrence>)> = Vec::new();
    for occ in due {
        match index.get(&occ.schedule_id) {
            Some(&i) => groups[i].1.push(occ),
            None => {
                index.insert(occ.schedule_id.clone(), groups.len());
                groups.push((occ.schedule_id.clone(), vec![occ]));
            }
        }
    }
    groups
}

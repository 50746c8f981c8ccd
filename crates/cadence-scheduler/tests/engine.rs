use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::{CadenceConfig, OwnerId, Page, ScheduleId};
use cadence_recurrence::{Limit, RuleContext, ScheduleConfig, Selector, TimeOfDay};
use cadence_scheduler::{
    DeliveryHandler, DeliveryOutcome, DeliveryRequest, OccurrenceState, ScheduleStatus,
    ScheduleStore, Scheduler, TickReport,
};
use chrono::{DateTime, Utc};

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Activation time used throughout: well before the first occurrence.
fn t0() -> DateTime<Utc> {
    at("2026-10-16T12:00:00Z")
}

fn daily(max: u32) -> ScheduleConfig {
    ScheduleConfig {
        selector: Selector::Daily,
        interval: 1,
        time_of_day: TimeOfDay::new(9, 0).unwrap(),
        timezone: chrono_tz::UTC,
        start_at: at("2026-11-01T00:00:00Z"),
        limit: Limit::Count { max_occurrences: max },
        skip_weekends: false,
        skip_holidays: false,
        holiday_region: "US".into(),
    }
}

/// Returns queued outcomes in order, then `Delivered` forever.
#[derive(Default)]
struct Scripted {
    outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    seen: Mutex<Vec<DeliveryRequest>>,
}

impl Scripted {
    fn with(outcomes: impl IntoIterator<Item = DeliveryOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            seen: Mutex::default(),
        })
    }

    fn delivering() -> Arc<Self> {
        Arc::default()
    }

    fn seen(&self) -> Vec<DeliveryRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryHandler for Scripted {
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome {
        self.seen.lock().unwrap().push(request.clone());
        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or(DeliveryOutcome::Delivered {
            result_ref: Some(format!("msg-{}", request.sequence_number)),
        })
    }
}

fn failed(msg: &str) -> DeliveryOutcome {
    DeliveryOutcome::Failed { error: msg.into() }
}

fn scheduler_with(handler: Arc<dyn DeliveryHandler>, config: &CadenceConfig) -> (Scheduler, ScheduleStore) {
    let store = ScheduleStore::open_in_memory().unwrap();
    let scheduler = Scheduler::new(store.clone(), handler, config, RuleContext::default());
    (scheduler, store)
}

fn active_schedule(scheduler: &Scheduler, config: &ScheduleConfig) -> ScheduleId {
    let id = scheduler
        .store()
        .insert_schedule(&OwnerId::from("acct"), "digest", config, t0())
        .unwrap()
        .id;
    scheduler.activate_at(&id, t0()).unwrap();
    id
}

#[tokio::test]
async fn due_occurrence_is_sent_and_window_extended() {
    let handler = Scripted::delivering();
    let (scheduler, _) = scheduler_with(handler.clone(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));

    // Nothing is due yet.
    let report = scheduler.tick_at(at("2026-11-01T08:59:00Z")).await.unwrap();
    assert_eq!(report, TickReport::default());

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.sent, 1);

    let occs = scheduler.list_occurrences(&id, Page::default()).unwrap();
    assert_eq!(occs.total, 6);
    assert_eq!(occs.items[0].state, OccurrenceState::Sent);
    assert_eq!(occs.items[0].result_ref.as_deref(), Some("msg-1"));
    assert!(occs.items[0].completed_at.is_some());

    let schedule = scheduler.get_schedule(&id).unwrap();
    assert_eq!(schedule.total_sent, 1);
    assert_eq!(schedule.total_scheduled, 6);
    assert_eq!(schedule.next_send_at, Some(at("2026-11-02T09:00:00Z")));
    assert!(schedule.last_sent_at.is_some());
    assert_eq!(handler.seen()[0].sequence_number, 1);
}

#[tokio::test]
async fn occurrences_run_in_sequence_order_per_schedule() {
    let handler = Scripted::delivering();
    let (scheduler, _) = scheduler_with(handler.clone(), &CadenceConfig::default());
    let a = active_schedule(&scheduler, &daily(20));
    let b = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-03T10:00:00Z")).await.unwrap();
    assert_eq!(report.sent, 6);

    for id in [&a, &b] {
        let seqs: Vec<u32> = handler
            .seen()
            .iter()
            .filter(|r| &r.schedule_id == id)
            .map(|r| r.sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}

#[tokio::test]
async fn batch_size_bounds_one_tick() {
    let mut config = CadenceConfig::default();
    config.engine.batch_size = 2;
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &config);
    active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-05T10:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 2);
    let report = scheduler.tick_at(at("2026-11-05T10:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 2);
}

#[tokio::test]
async fn retry_waits_for_backoff() {
    let handler = Scripted::with([failed("smtp 451")]);
    let (scheduler, _) = scheduler_with(handler.clone(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.retry_scheduled, 1);

    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    let OccurrenceState::AwaitingRetry { next_retry_at } = first.state else {
        panic!("expected awaiting retry, got {:?}", first.state);
    };
    assert!(next_retry_at >= at("2026-11-01T09:01:00Z"));
    assert_eq!(first.retry_count, 1);
    assert_eq!(first.error_message.as_deref(), Some("smtp 451"));
    // Awaiting a retry is not a terminal failure.
    assert_eq!(scheduler.get_schedule(&id).unwrap().total_failed, 0);

    let report = scheduler.tick_at(at("2026-11-01T09:00:30Z")).await.unwrap();
    assert_eq!(report.claimed, 0);

    let report = scheduler.tick_at(at("2026-11-01T09:02:00Z")).await.unwrap();
    assert_eq!(report.sent, 1);
    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    assert_eq!(first.state, OccurrenceState::Sent);
    assert_eq!(first.retry_count, 1);
    assert_eq!(handler.seen().len(), 2);
}

#[tokio::test]
async fn failure_becomes_terminal_after_max_retries() {
    let mut config = CadenceConfig::default();
    config.engine.max_retries = 1;
    let handler = Scripted::with([failed("boom"), failed("boom again")]);
    let (scheduler, _) = scheduler_with(handler, &config);
    let id = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.retry_scheduled, 1);
    let report = scheduler.tick_at(at("2026-11-01T09:05:00Z")).await.unwrap();
    assert_eq!(report.failed, 1);

    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    assert_eq!(first.state, OccurrenceState::Failed);
    assert_eq!(first.retry_count, 2);
    assert_eq!(scheduler.get_schedule(&id).unwrap().total_failed, 1);
}

#[tokio::test]
async fn skipped_outcome_is_recorded_with_reason() {
    let handler = Scripted::with([DeliveryOutcome::Skipped {
        reason: "no recipients".into(),
    }]);
    let (scheduler, _) = scheduler_with(handler, &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.skipped, 1);
    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    assert_eq!(first.state, OccurrenceState::Skipped);
    assert_eq!(first.error_message.as_deref(), Some("no recipients"));
}

struct Sleeper;

#[async_trait]
impl DeliveryHandler for Sleeper {
    async fn deliver(&self, _request: DeliveryRequest) -> DeliveryOutcome {
        tokio::time::sleep(Duration::from_secs(10)).await;
        DeliveryOutcome::Delivered { result_ref: None }
    }
}

#[tokio::test]
async fn timeout_counts_as_failure() {
    let (scheduler, _) = scheduler_with(Arc::new(Sleeper), &CadenceConfig::default());
    let scheduler = scheduler.with_engine(|e| e.with_delivery_timeout(Duration::from_millis(50)));
    let id = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.retry_scheduled, 1);
    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    assert!(matches!(first.state, OccurrenceState::AwaitingRetry { .. }));
    assert!(first.error_message.as_deref().unwrap().contains("timed out"));
}

/// Cancels its own schedule while "sending".
struct CancelDuringDelivery {
    store: ScheduleStore,
}

#[async_trait]
impl DeliveryHandler for CancelDuringDelivery {
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome {
        self.store
            .cancel(&request.schedule_id, at("2026-11-01T09:00:01Z"))
            .unwrap();
        DeliveryOutcome::Delivered {
            result_ref: Some("late".into()),
        }
    }
}

#[tokio::test]
async fn cancellation_during_delivery_wins_at_commit() {
    let store = ScheduleStore::open_in_memory().unwrap();
    let handler = Arc::new(CancelDuringDelivery {
        store: store.clone(),
    });
    let scheduler = Scheduler::new(store, handler, &CadenceConfig::default(), RuleContext::default());
    let id = active_schedule(&scheduler, &daily(20));

    let report = scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.sent, 0);

    let occs = scheduler.list_occurrences(&id, Page::default()).unwrap().items;
    assert!(occs.iter().all(|o| o.state == OccurrenceState::Cancelled));
    // No window extension after cancellation.
    assert_eq!(occs.len(), 5);
    let schedule = scheduler.get_schedule(&id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Cancelled);
    assert_eq!(schedule.total_sent, 0);
}

#[tokio::test]
async fn cancel_leaves_sent_occurrences_alone() {
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));
    scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();

    let cancelled = scheduler.cancel_at(&id, at("2026-11-01T10:00:00Z")).unwrap();
    assert_eq!(cancelled, 5);
    let occs = scheduler.list_occurrences(&id, Page::default()).unwrap().items;
    assert_eq!(occs[0].state, OccurrenceState::Sent);
    assert_eq!(
        occs.iter().filter(|o| o.state == OccurrenceState::Cancelled).count(),
        5
    );

    let report = scheduler.tick_at(at("2026-11-09T10:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn paused_schedules_are_not_executed() {
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));
    scheduler.pause_at(&id, at("2026-10-20T00:00:00Z")).unwrap();

    let report = scheduler.tick_at(at("2026-11-02T10:00:00Z")).await.unwrap();
    assert_eq!(report.claimed, 0);

    let resumed = scheduler.resume_at(&id, at("2026-11-02T10:00:00Z")).unwrap();
    assert_eq!(resumed.missed, 2);
    let report = scheduler.tick_at(at("2026-11-03T09:00:00Z")).await.unwrap();
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn schedule_completes_after_last_occurrence() {
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(2));

    scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(scheduler.get_schedule(&id).unwrap().status, ScheduleStatus::Active);
    scheduler.tick_at(at("2026-11-02T09:00:00Z")).await.unwrap();

    let schedule = scheduler.get_schedule(&id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.total_sent, 2);
    assert_eq!(schedule.total_scheduled, 2);
    assert_eq!(schedule.next_send_at, None);
}

#[tokio::test]
async fn date_bounded_schedule_completes_at_end_date() {
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    // end_at is exclusive: the Nov 3 09:00 slot never exists.
    let config = ScheduleConfig {
        limit: Limit::Until {
            end_at: at("2026-11-03T09:00:00Z"),
        },
        ..daily(1)
    };
    let id = active_schedule(&scheduler, &config);
    assert_eq!(scheduler.get_schedule(&id).unwrap().total_scheduled, 2);

    scheduler.tick_at(at("2026-11-01T09:00:00Z")).await.unwrap();
    assert_eq!(scheduler.get_schedule(&id).unwrap().status, ScheduleStatus::Active);
    scheduler.tick_at(at("2026-11-02T09:00:00Z")).await.unwrap();

    let schedule = scheduler.get_schedule(&id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.total_sent, 2);
    assert_eq!(schedule.total_scheduled, 2);
    assert_eq!(schedule.next_send_at, None);
}

#[tokio::test]
async fn stale_claims_are_recovered_as_failures() {
    let (scheduler, store) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    let id = active_schedule(&scheduler, &daily(20));

    // A worker claimed the first occurrence and died.
    let due = store.due_occurrences(at("2026-11-01T09:00:00Z"), 10).unwrap();
    assert!(store.claim(&due[0], at("2026-11-01T09:00:00Z")).unwrap());

    let report = scheduler.tick_at(at("2026-11-01T09:30:00Z")).await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.retry_scheduled, 1);

    let first = &scheduler.list_occurrences(&id, Page::default()).unwrap().items[0];
    assert!(matches!(first.state, OccurrenceState::AwaitingRetry { .. }));
    assert_eq!(first.error_message.as_deref(), Some("execution interrupted"));
}

#[tokio::test]
async fn preview_matches_materialized_slots() {
    let (scheduler, _) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    let config = daily(20);
    let id = active_schedule(&scheduler, &config);

    let preview = scheduler.preview_occurrences(&config, 5).unwrap();
    let stored: Vec<_> = scheduler
        .list_occurrences(&id, Page::default())
        .unwrap()
        .items
        .into_iter()
        .map(|o| o.scheduled_at)
        .collect();
    assert_eq!(preview, stored);
}

#[test]
fn concurrent_workers_claim_an_occurrence_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");
    let store = ScheduleStore::open(&path).unwrap();
    let scheduler = Scheduler::new(
        store.clone(),
        Scripted::delivering(),
        &CadenceConfig::default(),
        RuleContext::default(),
    );
    active_schedule(&scheduler, &daily(20));

    let now = at("2026-11-01T09:00:00Z");
    let observed = store.due_occurrences(now, 1).unwrap().remove(0);
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            let observed = observed.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let worker = ScheduleStore::open(&path).unwrap();
                barrier.wait();
                worker.claim(&observed, now).unwrap()
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);

    let occ = store.get_occurrence(&observed.id).unwrap().unwrap();
    assert_eq!(occ.state, OccurrenceState::Executing);
}

#[tokio::test]
async fn late_commit_on_reclaimed_occurrence_is_superseded() {
    let (scheduler, store) = scheduler_with(Scripted::delivering(), &CadenceConfig::default());
    active_schedule(&scheduler, &daily(20));
    let now = at("2026-11-01T09:00:00Z");
    let observed = store.due_occurrences(now, 1).unwrap().remove(0);

    assert!(store.claim(&observed, now).unwrap());
    // A second worker holding the same stale read loses.
    assert!(!store.claim(&observed, now).unwrap());

    let outcome = DeliveryOutcome::Delivered { result_ref: None };
    let policy = cadence_scheduler::RetryPolicy::default();
    let first = store.commit_outcome(&observed.id, &outcome, now, &policy).unwrap();
    let second = store.commit_outcome(&observed.id, &outcome, now, &policy).unwrap();
    assert_eq!(first, cadence_scheduler::Committed::Sent);
    assert_eq!(second, cadence_scheduler::Committed::Superseded);
}

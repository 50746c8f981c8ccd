use std::sync::Arc;

use cadence_core::{CadenceConfig, OwnerId, Page, Paged, ScheduleId};
use cadence_recurrence::{preview_occurrences, RuleContext, ScheduleConfig};
use chrono::{DateTime, Utc};

use crate::delivery::DeliveryHandler;
use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::lifecycle::{ActivationGate, AlwaysReady, ResumeReport};
use crate::materialize::{MaterializeReport, Materializer};
use crate::store::ScheduleStore;
use crate::types::{Occurrence, RecurringSchedule, ScheduleStatus, TickReport};

/// Management and execution entry point for recurring schedules.
///
/// The `*_at` variants take the clock reading explicitly; the plain ones use
/// `Utc::now()`.
pub struct Scheduler {
    store: ScheduleStore,
    engine: ExecutionEngine,
    materializer: Materializer,
    gate: Arc<dyn ActivationGate>,
}

impl Scheduler {
    pub fn new(
        store: ScheduleStore,
        handler: Arc<dyn DeliveryHandler>,
        config: &CadenceConfig,
        ctx: RuleContext,
    ) -> Self {
        let materializer = Materializer::from_config(&config.materializer, ctx);
        let engine = ExecutionEngine::new(store.clone(), handler, materializer.clone(), &config.engine);
        Self {
            store,
            engine,
            materializer,
            gate: Arc::new(AlwaysReady),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ActivationGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Replace the engine, e.g. to tune timeouts built from the same store.
    pub fn with_engine(mut self, f: impl FnOnce(ExecutionEngine) -> ExecutionEngine) -> Self {
        self.engine = f(self.engine);
        self
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Parser and holiday calendar shared by validation, preview and
    /// materialization.
    pub fn rule_context(&self) -> &RuleContext {
        self.materializer.rule_context()
    }

    /// A handle to the execution engine for [`ExecutionEngine::run`].
    pub fn engine(&self) -> ExecutionEngine {
        self.engine.clone()
    }

    /// Persist a validated config as a new `draft` schedule.
    pub fn create_schedule(
        &self,
        owner_id: &OwnerId,
        name: &str,
        config: &ScheduleConfig,
    ) -> Result<ScheduleId> {
        Ok(self.store.insert_schedule(owner_id, name, config, Utc::now())?.id)
    }

    pub fn activate(&self, id: &ScheduleId) -> Result<MaterializeReport> {
        self.activate_at(id, Utc::now())
    }

    pub fn activate_at(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<MaterializeReport> {
        self.store.activate(id, self.gate.as_ref(), &self.materializer, now)
    }

    pub fn pause(&self, id: &ScheduleId) -> Result<()> {
        self.pause_at(id, Utc::now())
    }

    pub fn pause_at(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<()> {
        self.store.pause(id, now)
    }

    pub fn resume(&self, id: &ScheduleId) -> Result<ResumeReport> {
        self.resume_at(id, Utc::now())
    }

    pub fn resume_at(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<ResumeReport> {
        self.store.resume(id, &self.materializer, now)
    }

    /// Returns the number of occurrences cancelled.
    pub fn cancel(&self, id: &ScheduleId) -> Result<u32> {
        self.cancel_at(id, Utc::now())
    }

    pub fn cancel_at(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<u32> {
        self.store.cancel(id, now)
    }

    /// Refill the window of an active schedule outside the tick loop.
    pub fn materialize_at(&self, id: &ScheduleId, now: DateTime<Utc>) -> Result<MaterializeReport> {
        Ok(self
            .store
            .settle(id, &self.materializer, now)?
            .unwrap_or_default())
    }

    /// The next `count` send instants of `config`, computed without storage.
    pub fn preview_occurrences(
        &self,
        config: &ScheduleConfig,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(preview_occurrences(
            config,
            count,
            self.materializer.rule_context(),
        )?)
    }

    pub fn get_schedule(&self, id: &ScheduleId) -> Result<RecurringSchedule> {
        self.store.get_schedule(id)
    }

    pub fn list_schedules(
        &self,
        owner_id: &OwnerId,
        status: Option<ScheduleStatus>,
        page: Page,
    ) -> Result<Paged<RecurringSchedule>> {
        self.store.list_schedules(owner_id, status, page)
    }

    pub fn list_occurrences(&self, id: &ScheduleId, page: Page) -> Result<Paged<Occurrence>> {
        self.store.list_occurrences(id, page)
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.engine.tick().await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.engine.tick_at(now).await
    }
}

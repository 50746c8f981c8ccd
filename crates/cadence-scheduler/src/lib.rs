//! `cadence-scheduler`: persistent execution side of the recurring schedule
//! engine, backed by SQLite.
//!
//! # Overview
//!
//! Schedules live in `recurring_schedules`, their concrete send slots in
//! `occurrences`. The [`Materializer`] keeps a bounded window of `pending`
//! occurrences per active schedule; the [`ExecutionEngine`] polls for due
//! ones, claims each with a compare-and-swap update, hands it to a
//! [`DeliveryHandler`] and records the outcome. The [`Scheduler`] facade
//! ties both to the schedule lifecycle.
//!
//! # Lifecycle
//!
//! | From      | To                         |
//! |-----------|----------------------------|
//! | `draft`   | `active`, `cancelled`      |
//! | `active`  | `paused`, `completed`, `cancelled` |
//! | `paused`  | `active`, `cancelled`      |

pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod materialize;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use delivery::{DeliveryHandler, DeliveryOutcome, DeliveryRequest};
pub use engine::ExecutionEngine;
pub use error::{Result, SchedulerError};
pub use lifecycle::{ActivationGate, ActivationIssue, AlwaysReady, ResumeReport, START_IN_PAST};
pub use materialize::{MaterializeReport, Materializer};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use store::{Committed, ScheduleStore};
pub use types::{Occurrence, OccurrenceState, RecurringSchedule, ScheduleStatus, TickReport};

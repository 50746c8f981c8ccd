use cadence_core::{OccurrenceId, OwnerId, ScheduleId};
use cadence_recurrence::{Frequency, ScheduleConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a recurring schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Created, not yet executing.
    Draft,
    /// Occurrences are materialized and executed as they come due.
    Active,
    /// Execution suspended; materialized occurrences are kept.
    Paused,
    /// Every occurrence within bounds has finished.
    Completed,
    /// Stopped by the operator; remaining occurrences were cancelled.
    Cancelled,
}

impl ScheduleStatus {
    /// Legal lifecycle edges. Everything else is an `InvalidTransition`.
    pub fn can_transition_to(self, to: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, to),
            (Draft, Active)
                | (Draft, Cancelled)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Draft => "draft",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ScheduleStatus::Draft),
            "active" => Ok(ScheduleStatus::Active),
            "paused" => Ok(ScheduleStatus::Paused),
            "completed" => Ok(ScheduleStatus::Completed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

/// Where one occurrence stands. Persisted as a status string plus the
/// `next_retry_at` column: `failed` with a retry time is `AwaitingRetry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OccurrenceState {
    Pending,
    Executing,
    Sent,
    AwaitingRetry { next_retry_at: DateTime<Utc> },
    Failed,
    Skipped,
    Cancelled,
}

impl OccurrenceState {
    /// Value of the `status` column.
    pub fn status_str(&self) -> &'static str {
        match self {
            OccurrenceState::Pending => "pending",
            OccurrenceState::Executing => "executing",
            OccurrenceState::Sent => "sent",
            OccurrenceState::AwaitingRetry { .. } | OccurrenceState::Failed => "failed",
            OccurrenceState::Skipped => "skipped",
            OccurrenceState::Cancelled => "cancelled",
        }
    }

    pub fn from_columns(status: &str, next_retry_at: Option<DateTime<Utc>>) -> Option<Self> {
        Some(match (status, next_retry_at) {
            ("pending", _) => OccurrenceState::Pending,
            ("executing", _) => OccurrenceState::Executing,
            ("sent", _) => OccurrenceState::Sent,
            ("failed", Some(next_retry_at)) => OccurrenceState::AwaitingRetry { next_retry_at },
            ("failed", None) => OccurrenceState::Failed,
            ("skipped", _) => OccurrenceState::Skipped,
            ("cancelled", _) => OccurrenceState::Cancelled,
            _ => return None,
        })
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            OccurrenceState::AwaitingRetry { next_retry_at } => Some(*next_retry_at),
            _ => None,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OccurrenceState::Sent
                | OccurrenceState::Failed
                | OccurrenceState::Skipped
                | OccurrenceState::Cancelled
        )
    }

    pub fn can_become(&self, next: &OccurrenceState) -> bool {
        use OccurrenceState::*;
        match (self, next) {
            (Pending, Executing | Cancelled | Skipped) => true,
            (AwaitingRetry { .. }, Executing | Cancelled) => true,
            (Executing, Sent | Skipped | Failed | AwaitingRetry { .. } | Cancelled) => true,
            _ => false,
        }
    }
}

/// A persisted recurring schedule with its derived counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: ScheduleId,
    pub owner_id: OwnerId,
    pub name: String,
    pub config: ScheduleConfig,
    pub status: ScheduleStatus,
    /// Occurrences materialized so far.
    pub total_scheduled: u32,
    pub total_sent: u32,
    /// Terminal failures only; occurrences awaiting a retry are not counted.
    pub total_failed: u32,
    /// `scheduled_at` of the earliest pending occurrence.
    pub next_send_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringSchedule {
    pub fn frequency(&self) -> Frequency {
        self.config.frequency()
    }
}

/// One concrete send slot of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub schedule_id: ScheduleId,
    /// 1-based, gap-free in materialization order, never reused.
    pub sequence_number: u32,
    pub scheduled_at: DateTime<Utc>,
    pub state: OccurrenceState,
    /// Opaque reference returned by the delivery handler.
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one engine tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub claimed: u32,
    pub sent: u32,
    pub skipped: u32,
    /// Terminal failures.
    pub failed: u32,
    pub retry_scheduled: u32,
    /// Due occurrences another worker claimed first.
    pub lost_claims: u32,
    /// Executions whose schedule was cancelled mid-flight.
    pub cancelled: u32,
    /// Stale claims recovered at the start of the tick.
    pub recovered: u32,
}

impl TickReport {
    pub fn merge(&mut self, other: TickReport) {
        self.claimed += other.claimed;
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.retry_scheduled += other.retry_scheduled;
        self.lost_claims += other.lost_claims;
        self.cancelled += other.cancelled;
        self.recovered += other.recovered;
    }
}

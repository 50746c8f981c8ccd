//! The "deliver one occurrence" seam between the engine and the transport.

use async_trait::async_trait;
use cadence_core::{OccurrenceId, ScheduleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a handler gets to know about the occurrence it delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub schedule_id: ScheduleId,
    pub occurrence_id: OccurrenceId,
    pub sequence_number: u32,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { result_ref: Option<String> },
    /// Nothing to do this time (e.g. no recipients). Not retried.
    Skipped { reason: String },
    /// Retried under the engine's retry policy.
    Failed { error: String },
}

/// Performs the actual send. Called at most once per claim; may be slow,
/// the engine bounds it with a timeout.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome;
}

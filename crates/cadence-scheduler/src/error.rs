use cadence_recurrence::CompileError;
use thiserror::Error;

use crate::lifecycle::ActivationIssue;
use crate::types::ScheduleStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored config no longer compiles. Never retried.
    #[error("Rule compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    /// Activation prerequisites not met; the schedule stays in `draft`.
    #[error("Activation refused: {}", .issues.iter().map(|i| i.code.as_str()).collect::<Vec<_>>().join(", "))]
    ActivationRefused { issues: Vec<ActivationIssue> },

    /// A thread panicked while holding the connection lock.
    #[error("Connection lock poisoned")]
    LockPoisoned,
}

impl SchedulerError {
    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Compile(_) => "COMPILE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::ScheduleNotFound { .. } => "SCHEDULE_NOT_FOUND",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::ActivationRefused { .. } => "ACTIVATION_REFUSED",
            SchedulerError::LockPoisoned => "LOCK_POISONED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

//! `cadence-core`: identifiers, configuration and the shared error type used
//! by every crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CoreError, Result};
pub use types::{OccurrenceId, OwnerId, Page, Paged, ScheduleId};

//! `cadence-recurrence`: calendar side of the recurring schedule engine.
//!
//! Pure functions only, no I/O:
//!
//! | Stage       | Entry point                                   |
//! |-------------|-----------------------------------------------|
//! | Validate    | [`validate_configuration`] → [`ScheduleConfig`] |
//! | Compile     | [`RecurrenceRule::compile`]                   |
//! | Enumerate   | [`RecurrenceRule::enumerate`] (dates), [`RecurrenceRule::instants`] (UTC instants) |
//! | Preview     | [`preview_occurrences`]                       |
//!
//! Custom rule strings and holiday lookups are pluggable through
//! [`CustomRuleParser`] and [`HolidayCalendar`], bundled in a [`RuleContext`].

pub mod compile;
pub mod context;
pub mod custom;
pub mod error;
pub mod holiday;
pub mod localize;
pub mod preview;
pub mod types;
pub mod validate;

pub use compile::{Dates, Instants, RecurrenceRule};
pub use context::{RuleContext, DEFAULT_SCAN_LIMIT};
pub use custom::{CronRuleParser, CustomRule, CustomRuleParser};
pub use error::{CompileError, Result};
pub use holiday::{FixedHolidays, HolidayCalendar, NoHolidays};
pub use preview::preview_occurrences;
pub use types::{
    Frequency, Limit, RawScheduleConfig, ScheduleConfig, Selector, TimeOfDay, Weekday,
    HOLIDAY_REGIONS,
};
pub use validate::{validate_configuration, FieldError, Validated, ValidationCode};

use std::fmt;
use std::sync::Arc;

use crate::custom::{CronRuleParser, CustomRuleParser};
use crate::holiday::{HolidayCalendar, NoHolidays};

/// Candidate dates inspected per enumeration when the caller sets no bound.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Collaborators shared by validation, compilation and preview.
#[derive(Clone)]
pub struct RuleContext {
    pub parser: Arc<dyn CustomRuleParser>,
    pub holidays: Arc<dyn HolidayCalendar>,
    /// Upper bound on candidate dates scanned while looking for instants.
    pub scan_limit: usize,
}

impl RuleContext {
    pub fn new(parser: Arc<dyn CustomRuleParser>, holidays: Arc<dyn HolidayCalendar>) -> Self {
        Self {
            parser,
            holidays,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_holidays(mut self, holidays: Arc<dyn HolidayCalendar>) -> Self {
        self.holidays = holidays;
        self
    }

    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }
}

impl Default for RuleContext {
    fn default() -> Self {
        Self::new(Arc::new(CronRuleParser), Arc::new(NoHolidays))
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("scan_limit", &self.scan_limit)
            .finish_non_exhaustive()
    }
}

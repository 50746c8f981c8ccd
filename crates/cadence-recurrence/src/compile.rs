//! Rule Compiler: normalized config → [`RecurrenceRule`] → lazy date and
//! instant sequences.
//!
//! Every enumeration is a pure function of `(rule, from, limit)`: the
//! interval phase is anchored on the start date, never on "the last date
//! produced", so a caller can restart from any date and get the same
//! sequence it would have seen by iterating from the beginning.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::error;

use crate::custom::{CustomRule, CustomRuleParser};
use crate::error::{CompileError, Result};
use crate::holiday::HolidayCalendar;
use crate::localize::{local_date, localize};
use crate::types::{ScheduleConfig, Selector, Weekday};

/// Custom rules give up after this many days without a match.
const CUSTOM_SCAN_DAYS: u64 = 5 * 366;

#[derive(Clone)]
enum DateSelector {
    Daily,
    Weekly(HashSet<chrono::Weekday>),
    MonthlyDay(u32),
    MonthlyNth { ordinal: u8, weekday: chrono::Weekday },
    Custom(Arc<dyn CustomRule>),
}

impl fmt::Debug for DateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSelector::Daily => write!(f, "Daily"),
            DateSelector::Weekly(days) => f.debug_tuple("Weekly").field(days).finish(),
            DateSelector::MonthlyDay(day) => f.debug_tuple("MonthlyDay").field(day).finish(),
            DateSelector::MonthlyNth { ordinal, weekday } => f
                .debug_struct("MonthlyNth")
                .field("ordinal", ordinal)
                .field("weekday", weekday)
                .finish(),
            DateSelector::Custom(rule) => f.debug_tuple("Custom").field(rule).finish(),
        }
    }
}

/// Immutable compiled form of a [`ScheduleConfig`].
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    selector: DateSelector,
    interval: u32,
    tz: Tz,
    time: NaiveTime,
    start_at: DateTime<Utc>,
    start_date: NaiveDate,
    end_at: Option<DateTime<Utc>>,
    /// Last local date that can still host an instant before `end_at`.
    last_date: Option<NaiveDate>,
    max_occurrences: Option<u32>,
    skip_weekends: bool,
    skip_holidays: bool,
    holiday_region: String,
}

impl RecurrenceRule {
    /// Compile a normalized config. Failure here means the validator let a
    /// bad config through; it is logged and never retried.
    pub fn compile(config: &ScheduleConfig, parser: &dyn CustomRuleParser) -> Result<Self> {
        Self::build(config, parser).inspect_err(|e| {
            error!(error = %e, "rule compilation failed for a validated config");
        })
    }

    fn build(config: &ScheduleConfig, parser: &dyn CustomRuleParser) -> Result<Self> {
        if config.interval == 0 {
            return Err(CompileError::InvalidParameter("interval must be >= 1".into()));
        }
        let selector = match &config.selector {
            Selector::Daily => DateSelector::Daily,
            Selector::Weekly { days } => {
                if days.is_empty() {
                    return Err(CompileError::InvalidParameter(
                        "weekly rule without weekdays".into(),
                    ));
                }
                DateSelector::Weekly(days.iter().map(|d| d.to_chrono()).collect())
            }
            Selector::MonthlyDay { day } => {
                if !(1..=31).contains(day) {
                    return Err(CompileError::InvalidParameter(format!(
                        "day of month {day} outside 1-31"
                    )));
                }
                DateSelector::MonthlyDay(u32::from(*day))
            }
            Selector::MonthlyNth { ordinal, weekday } => {
                if !(1..=5).contains(ordinal) {
                    return Err(CompileError::InvalidParameter(format!(
                        "week ordinal {ordinal} outside 1-5"
                    )));
                }
                DateSelector::MonthlyNth {
                    ordinal: *ordinal,
                    weekday: weekday.to_chrono(),
                }
            }
            Selector::Custom { rule } => {
                let compiled = parser.parse(rule).map_err(|reason| CompileError::CustomRule {
                    rule: rule.clone(),
                    reason,
                })?;
                DateSelector::Custom(compiled)
            }
        };

        let tz = config.timezone;
        let end_at = config.end_at();
        let last_date = end_at.map(|end| local_date(tz, end - chrono::Duration::seconds(1)));

        Ok(Self {
            selector,
            interval: config.interval,
            tz,
            time: config.time_of_day.to_naive(),
            start_at: config.start_at,
            start_date: local_date(tz, config.start_at),
            end_at,
            last_date,
            max_occurrences: config.max_occurrences(),
            skip_weekends: config.skip_weekends,
            skip_holidays: config.skip_holidays,
            holiday_region: config.holiday_region.clone(),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        self.end_at
    }

    pub fn max_occurrences(&self) -> Option<u32> {
        self.max_occurrences
    }

    /// Candidate calendar dates on or after `from` (never before the start
    /// date), ascending, at most `limit` of them. Finite when an end bound is
    /// set; otherwise `limit` is the safety cap.
    pub fn enumerate(&self, from: NaiveDate, limit: usize) -> Dates<'_> {
        Dates {
            rule: self,
            cursor: Some(from.max(self.start_date)),
            remaining: limit,
        }
    }

    /// Filtered send instants strictly after `after` (or from the start when
    /// `None`), honouring `start_at`, `end_at`, skip-weekend and skip-holiday.
    /// `scan_limit` caps the number of candidate dates inspected.
    ///
    /// `max_occurrences` is *not* applied here because it counts
    /// materialized occurrences, which only the caller knows.
    pub fn instants<'a>(
        &'a self,
        after: Option<DateTime<Utc>>,
        holidays: &'a dyn HolidayCalendar,
        scan_limit: usize,
    ) -> Instants<'a> {
        let from = after.map_or(self.start_date, |a| local_date(self.tz, a));
        Instants {
            rule: self,
            dates: self.enumerate(from, scan_limit),
            after,
            holidays,
            done: false,
        }
    }

    /// Place a date at the configured local time.
    pub fn place(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        localize(self.tz, date, self.time)
    }

    /// Whether a date is removed by the weekend / holiday filters.
    pub fn is_filtered(&self, date: NaiveDate, holidays: &dyn HolidayCalendar) -> bool {
        if self.skip_weekends && matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            return true;
        }
        self.skip_holidays && holidays.is_holiday(date, &self.holiday_region)
    }

    /// First date on or after `date` selected by the rule, ignoring bounds
    /// other than the start date.
    fn next_on_or_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        let date = date.max(self.start_date);
        let interval = i64::from(self.interval);
        match &self.selector {
            DateSelector::Daily => {
                let offset = (date - self.start_date).num_days();
                let rem = offset.rem_euclid(interval);
                if rem == 0 {
                    Some(date)
                } else {
                    date.checked_add_days(Days::new((interval - rem) as u64))
                }
            }
            DateSelector::Weekly(days) => {
                let anchor = week_start(self.start_date);
                let mut cursor = date;
                // At most two aligned weeks need inspecting.
                for _ in 0..3 {
                    let monday = week_start(cursor);
                    let week_idx = (monday - anchor).num_days() / 7;
                    let rem = week_idx.rem_euclid(interval);
                    if rem != 0 {
                        cursor = monday.checked_add_days(Days::new(((interval - rem) * 7) as u64))?;
                        continue;
                    }
                    let sunday = monday.checked_add_days(Days::new(6))?;
                    let mut day = cursor;
                    while day <= sunday {
                        if days.contains(&day.weekday()) {
                            return Some(day);
                        }
                        day = day.succ_opt()?;
                    }
                    cursor = monday.checked_add_days(Days::new((interval * 7) as u64))?;
                }
                None
            }
            DateSelector::MonthlyDay(_) | DateSelector::MonthlyNth { .. } => {
                let anchor = month_index(self.start_date);
                let mut month = first_of_month(date)?;
                for _ in 0..3 {
                    let rem = (month_index(month) - anchor).rem_euclid(interval);
                    if rem != 0 {
                        month = month.checked_add_months(Months::new((interval - rem) as u32))?;
                        continue;
                    }
                    let candidate = self.monthly_date(month)?;
                    if candidate >= date {
                        return Some(candidate);
                    }
                    month = month.checked_add_months(Months::new(self.interval))?;
                }
                None
            }
            DateSelector::Custom(rule) => {
                let mut day = date;
                for _ in 0..CUSTOM_SCAN_DAYS {
                    if rule.matches(day) {
                        return Some(day);
                    }
                    day = day.succ_opt()?;
                }
                None
            }
        }
    }

    fn monthly_date(&self, first: NaiveDate) -> Option<NaiveDate> {
        match self.selector {
            DateSelector::MonthlyDay(day) => {
                let last = last_day_of_month(first)?;
                first.with_day(day.min(last.day()))
            }
            DateSelector::MonthlyNth { ordinal, weekday } => nth_weekday(first, ordinal, weekday),
            _ => None,
        }
    }
}

/// Lazy, finite date sequence produced by [`RecurrenceRule::enumerate`].
#[derive(Debug)]
pub struct Dates<'a> {
    rule: &'a RecurrenceRule,
    cursor: Option<NaiveDate>,
    remaining: usize,
}

impl Iterator for Dates<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.remaining == 0 {
            return None;
        }
        let found = self.cursor.and_then(|c| self.rule.next_on_or_after(c));
        let found = match (found, self.rule.last_date) {
            (Some(d), Some(last)) if d > last => None,
            (d, _) => d,
        };
        match found {
            Some(d) => {
                self.remaining -= 1;
                self.cursor = d.succ_opt();
                Some(d)
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }
}

/// Filtered instants produced by [`RecurrenceRule::instants`].
pub struct Instants<'a> {
    rule: &'a RecurrenceRule,
    dates: Dates<'a>,
    after: Option<DateTime<Utc>>,
    holidays: &'a dyn HolidayCalendar,
    done: bool,
}

impl Iterator for Instants<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        while !self.done {
            let Some(date) = self.dates.next() else {
                self.done = true;
                break;
            };
            if self.rule.is_filtered(date, self.holidays) {
                continue;
            }
            let Some(at) = self.rule.place(date) else {
                continue;
            };
            if let Some(end) = self.rule.end_at {
                if at >= end {
                    self.done = true;
                    break;
                }
            }
            if at < self.rule.start_at || self.after.is_some_and(|a| at <= a) {
                continue;
            }
            return Some(at);
        }
        None
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn first_of_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)
}

/// Last calendar day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    first_of_month(date)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

/// `ordinal`-th `weekday` of the month starting at `first`; ordinal 5 counts
/// backward from the month end and always exists.
pub fn nth_weekday(first: NaiveDate, ordinal: u8, weekday: chrono::Weekday) -> Option<NaiveDate> {
    if ordinal >= 5 {
        let last = last_day_of_month(first)?;
        let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
        return Some(last - Days::new(u64::from(back)));
    }
    let ahead = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first.checked_add_days(Days::new(u64::from(ahead + 7 * (u32::from(ordinal) - 1))))
}

/// Convenience for callers holding the public weekday type.
pub fn nth_weekday_of(first: NaiveDate, ordinal: u8, weekday: Weekday) -> Option<NaiveDate> {
    nth_weekday(first, ordinal, weekday.to_chrono())
}

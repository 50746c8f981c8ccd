//! Recurrence Validator: raw, loosely-typed input → normalized
//! [`ScheduleConfig`] or the full list of field errors.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compile::RecurrenceRule;
use crate::context::RuleContext;
use crate::localize::{local_date, localize_naive};
use crate::types::{
    Frequency, Limit, RawScheduleConfig, ScheduleConfig, Selector, TimeOfDay, Weekday,
    DEFAULT_HOLIDAY_REGION, HOLIDAY_REGIONS,
};

pub const MAX_OCCURRENCES: i64 = 1000;
const MAX_DAILY_INTERVAL: i64 = 365;
const MAX_WEEKLY_INTERVAL: i64 = 52;
const MAX_MONTHLY_INTERVAL: i64 = 12;
/// Spans longer than this produce a warning.
const LONG_SPAN_DAYS: i64 = 365 * 2;

/// Machine-readable validation failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    InvalidValue,
    InvalidFormat,
    InvalidTimezone,
    PastDate,
    InvalidRange,
    MissingLimit,
    ConflictingLimits,
    LimitExceeded,
    InvalidRule,
    NoValidDates,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCode::Required => "REQUIRED",
            ValidationCode::InvalidValue => "INVALID_VALUE",
            ValidationCode::InvalidFormat => "INVALID_FORMAT",
            ValidationCode::InvalidTimezone => "INVALID_TIMEZONE",
            ValidationCode::PastDate => "PAST_DATE",
            ValidationCode::InvalidRange => "INVALID_RANGE",
            ValidationCode::MissingLimit => "MISSING_LIMIT",
            ValidationCode::ConflictingLimits => "CONFLICTING_LIMITS",
            ValidationCode::LimitExceeded => "LIMIT_EXCEEDED",
            ValidationCode::InvalidRule => "INVALID_RULE",
            ValidationCode::NoValidDates => "NO_VALID_DATES",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
}

impl FieldError {
    fn new(field: &str, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.code)
    }
}

/// A configuration that passed validation, with non-fatal remarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validated {
    pub config: ScheduleConfig,
    pub warnings: Vec<String>,
    /// When the last occurrence is expected to be sent. `end_at` for a
    /// date-bounded schedule; for a counted one, the `max_occurrences`-th
    /// instant, or `None` if it lies beyond the context's scan limit.
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Validate and normalize `raw`. `now` decides what counts as a past start
/// date (compared as local dates in the schedule zone).
///
/// Every field is checked; the error list is complete, not first-failure.
pub fn validate_configuration(
    raw: &RawScheduleConfig,
    now: DateTime<Utc>,
    ctx: &RuleContext,
) -> Result<Validated, Vec<FieldError>> {
    let mut v = Validator::default();
    let result = v.run(raw, now, ctx);
    match result {
        Some((config, rule)) if v.errors.is_empty() => Ok(Validated {
            estimated_completion: estimate_completion(&rule, ctx),
            config,
            warnings: v.warnings,
        }),
        _ => {
            debug!(errors = v.errors.len(), "schedule configuration rejected");
            Err(v.errors)
        }
    }
}

#[derive(Default)]
struct Validator {
    errors: Vec<FieldError>,
    warnings: Vec<String>,
}

impl Validator {
    fn fail(&mut self, field: &str, code: ValidationCode, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, code, message));
    }

    fn run(
        &mut self,
        raw: &RawScheduleConfig,
        now: DateTime<Utc>,
        ctx: &RuleContext,
    ) -> Option<(ScheduleConfig, RecurrenceRule)> {
        let timezone = self.timezone(raw.timezone.as_deref());
        let frequency = self.frequency(raw.frequency.as_deref());
        let time_of_day = self.time(raw.time.as_deref());
        let interval = self.interval(raw.interval, frequency);

        // An unknown zone was already reported; UTC keeps date parsing going.
        let tz = timezone.unwrap_or(chrono_tz::UTC);
        let start_at = self.start(raw.start_date.as_deref(), tz, now);
        let end_at = self.end(raw.end_date.as_deref(), tz, start_at);
        let limit = self.limit(raw, end_at);
        let selector = frequency.and_then(|f| self.selector(f, raw, ctx));
        let holiday_region = self.region(raw.holiday_region.as_deref());

        let config = ScheduleConfig {
            selector: selector?,
            interval: interval?,
            time_of_day: time_of_day?,
            timezone: timezone?,
            start_at: start_at?,
            limit: limit?,
            skip_weekends: raw.skip_weekends.unwrap_or(false),
            skip_holidays: raw.skip_holidays.unwrap_or(false),
            holiday_region: holiday_region?,
        };
        if !self.errors.is_empty() {
            return None;
        }
        let rule = self.has_dates(&config, ctx)?;
        Some((config, rule))
    }

    fn timezone(&mut self, raw: Option<&str>) -> Option<Tz> {
        let name = raw.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("UTC");
        match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                self.fail(
                    "timezone",
                    ValidationCode::InvalidTimezone,
                    format!("Unsupported timezone: {name}"),
                );
                None
            }
        }
    }

    fn frequency(&mut self, raw: Option<&str>) -> Option<Frequency> {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            self.fail("frequency", ValidationCode::Required, "Frequency is required");
            return None;
        };
        match raw.parse() {
            Ok(f) => Some(f),
            Err(_) => {
                self.fail("frequency", ValidationCode::InvalidValue, "Invalid frequency type");
                None
            }
        }
    }

    fn time(&mut self, raw: Option<&str>) -> Option<TimeOfDay> {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            self.fail("time", ValidationCode::Required, "Send time is required");
            return None;
        };
        match raw.parse() {
            Ok(t) => Some(t),
            Err(_) => {
                self.fail(
                    "time",
                    ValidationCode::InvalidFormat,
                    "Time must be in HH:MM format (24-hour)",
                );
                None
            }
        }
    }

    fn interval(&mut self, raw: Option<i64>, frequency: Option<Frequency>) -> Option<u32> {
        let value = raw.unwrap_or(1);
        let (max, unit) = match frequency {
            Some(Frequency::Daily) => (MAX_DAILY_INTERVAL, "days"),
            Some(Frequency::Weekly) => (MAX_WEEKLY_INTERVAL, "weeks"),
            Some(Frequency::Monthly) => (MAX_MONTHLY_INTERVAL, "months"),
            Some(Frequency::Custom) => {
                if value != 1 {
                    self.fail(
                        "interval",
                        ValidationCode::InvalidValue,
                        "Custom rules carry their own spacing; interval must be 1",
                    );
                    return None;
                }
                return Some(1);
            }
            None => (i64::from(u32::MAX), "units"),
        };
        if !(1..=max).contains(&value) {
            self.fail(
                "interval",
                ValidationCode::InvalidRange,
                format!("Interval must be between 1 and {max} {unit}"),
            );
            return None;
        }
        u32::try_from(value).ok()
    }

    fn start(&mut self, raw: Option<&str>, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            self.fail("start_date", ValidationCode::Required, "Start date is required");
            return None;
        };
        let Some(start) = parse_instant(raw, tz, false) else {
            self.fail(
                "start_date",
                ValidationCode::InvalidFormat,
                "Invalid start date format. Use YYYY-MM-DD or RFC 3339",
            );
            return None;
        };
        if local_date(tz, start) < local_date(tz, now) {
            self.fail(
                "start_date",
                ValidationCode::PastDate,
                "Start date must be today or in the future",
            );
            return None;
        }
        Some(start)
    }

    fn end(
        &mut self,
        raw: Option<&str>,
        tz: Tz,
        start: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let raw = raw.filter(|s| !s.trim().is_empty())?;
        let Some(end) = parse_instant(raw, tz, true) else {
            self.fail(
                "end_date",
                ValidationCode::InvalidFormat,
                "Invalid end date format. Use YYYY-MM-DD or RFC 3339",
            );
            return None;
        };
        if let Some(start) = start {
            if end <= start {
                self.fail(
                    "end_date",
                    ValidationCode::InvalidRange,
                    "End date must be after start date",
                );
                return None;
            }
            if (end - start).num_days() > LONG_SPAN_DAYS {
                self.warnings
                    .push("End date is more than 2 years after the start date".to_string());
            }
        }
        Some(end)
    }

    fn limit(&mut self, raw: &RawScheduleConfig, end_at: Option<DateTime<Utc>>) -> Option<Limit> {
        let has_end = raw.end_date.as_deref().is_some_and(|s| !s.trim().is_empty());
        match (has_end, raw.max_occurrences) {
            (false, None) => {
                self.fail(
                    "limits",
                    ValidationCode::MissingLimit,
                    "Must specify either an end date or maximum number of occurrences",
                );
                None
            }
            (true, Some(_)) => {
                self.fail(
                    "limits",
                    ValidationCode::ConflictingLimits,
                    "Cannot specify both end date and maximum occurrences",
                );
                None
            }
            (true, None) => end_at.map(|end_at| Limit::Until { end_at }),
            (false, Some(n)) if n < 1 => {
                self.fail(
                    "max_occurrences",
                    ValidationCode::InvalidValue,
                    "Maximum occurrences must be at least 1",
                );
                None
            }
            (false, Some(n)) if n > MAX_OCCURRENCES => {
                self.fail(
                    "max_occurrences",
                    ValidationCode::LimitExceeded,
                    format!("Maximum occurrences cannot exceed {MAX_OCCURRENCES}"),
                );
                None
            }
            (false, Some(n)) => u32::try_from(n)
                .ok()
                .map(|max_occurrences| Limit::Count { max_occurrences }),
        }
    }

    fn selector(
        &mut self,
        frequency: Frequency,
        raw: &RawScheduleConfig,
        ctx: &RuleContext,
    ) -> Option<Selector> {
        match frequency {
            Frequency::Daily => Some(Selector::Daily),
            Frequency::Weekly => self.weekly(&raw.days_of_week),
            Frequency::Monthly => self.monthly(raw),
            Frequency::Custom => self.custom(raw.custom_rule.as_deref(), ctx),
        }
    }

    fn weekly(&mut self, raw: &[String]) -> Option<Selector> {
        if raw.is_empty() {
            self.fail(
                "days_of_week",
                ValidationCode::Required,
                "At least one day must be selected for weekly frequency",
            );
            return None;
        }
        let mut days = BTreeSet::new();
        let mut ok = true;
        for day in raw {
            match day.parse::<Weekday>() {
                Ok(d) => {
                    days.insert(d);
                }
                Err(_) => {
                    ok = false;
                    self.fail(
                        "days_of_week",
                        ValidationCode::InvalidValue,
                        format!("Invalid day: {day}"),
                    );
                }
            }
        }
        ok.then_some(Selector::Weekly { days })
    }

    fn monthly(&mut self, raw: &RawScheduleConfig) -> Option<Selector> {
        let kind = raw
            .monthly_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("day_of_month");
        match kind {
            "day_of_month" => {
                let Some(day) = raw.day_of_month else {
                    self.fail("day_of_month", ValidationCode::Required, "Day of month is required");
                    return None;
                };
                if !(1..=31).contains(&day) {
                    self.fail(
                        "day_of_month",
                        ValidationCode::InvalidRange,
                        "Day of month must be between 1 and 31",
                    );
                    return None;
                }
                if day > 28 {
                    self.warnings.push(format!(
                        "Day {day} will fall back to the last day of months with fewer days \
                         (Feb: 28/29, Apr/Jun/Sep/Nov: 30)"
                    ));
                }
                u8::try_from(day).ok().map(|day| Selector::MonthlyDay { day })
            }
            "nth_weekday" => {
                let ordinal = match raw.week_number {
                    None => {
                        self.fail(
                            "week_number",
                            ValidationCode::Required,
                            "Week number is required for nth weekday",
                        );
                        None
                    }
                    Some(n) if !(1..=5).contains(&n) => {
                        self.fail(
                            "week_number",
                            ValidationCode::InvalidRange,
                            "Week number must be between 1 and 5 (5 = last)",
                        );
                        None
                    }
                    Some(n) => u8::try_from(n).ok(),
                };
                let weekday = raw.weekday.as_deref().and_then(|w| w.parse::<Weekday>().ok());
                if weekday.is_none() {
                    self.fail(
                        "weekday",
                        ValidationCode::Required,
                        "Valid weekday is required for nth weekday",
                    );
                }
                Some(Selector::MonthlyNth {
                    ordinal: ordinal?,
                    weekday: weekday?,
                })
            }
            other => {
                self.fail(
                    "monthly_type",
                    ValidationCode::InvalidValue,
                    format!("Unknown monthly type: {other} (expected day_of_month or nth_weekday)"),
                );
                None
            }
        }
    }

    fn custom(&mut self, raw: Option<&str>, ctx: &RuleContext) -> Option<Selector> {
        let Some(rule) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            self.fail(
                "custom_rule",
                ValidationCode::Required,
                "Custom rule is required for custom frequency",
            );
            return None;
        };
        match ctx.parser.parse(rule) {
            Ok(_) => Some(Selector::Custom {
                rule: rule.to_string(),
            }),
            Err(reason) => {
                self.fail(
                    "custom_rule",
                    ValidationCode::InvalidRule,
                    format!("Invalid custom rule: {reason}"),
                );
                None
            }
        }
    }

    fn region(&mut self, raw: Option<&str>) -> Option<String> {
        let region = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_HOLIDAY_REGION)
            .to_ascii_uppercase();
        if HOLIDAY_REGIONS.contains(&region.as_str()) {
            Some(region)
        } else {
            self.fail(
                "holiday_region",
                ValidationCode::InvalidValue,
                format!("Unknown holiday region: {region}"),
            );
            None
        }
    }

    /// The normalized config must produce at least one instant after filters.
    /// The compiled rule, provided it yields at least one instant.
    fn has_dates(&mut self, config: &ScheduleConfig, ctx: &RuleContext) -> Option<RecurrenceRule> {
        let rule = match RecurrenceRule::compile(config, ctx.parser.as_ref()) {
            Ok(rule) => rule,
            Err(e) => {
                self.fail("schedule", ValidationCode::InvalidRule, e.to_string());
                return None;
            }
        };
        if rule
            .instants(None, ctx.holidays.as_ref(), ctx.scan_limit)
            .next()
            .is_none()
        {
            self.fail(
                "schedule",
                ValidationCode::NoValidDates,
                "No valid send dates found with this configuration",
            );
            return None;
        }
        Some(rule)
    }
}

fn estimate_completion(rule: &RecurrenceRule, ctx: &RuleContext) -> Option<DateTime<Utc>> {
    if let Some(end_at) = rule.end_at() {
        return Some(end_at);
    }
    let n = rule.max_occurrences()? as usize;
    let mut instants = rule.instants(None, ctx.holidays.as_ref(), ctx.scan_limit);
    instants.nth(n.checked_sub(1)?)
}

/// `YYYY-MM-DD` (local midnight in `tz`), a naive local date-time, or
/// RFC 3339. A date-only value used as an end bound covers the whole day,
/// so it resolves to the following local midnight.
fn parse_instant(raw: &str, tz: Tz, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let date = if end_of_day {
            date.checked_add_days(Days::new(1))?
        } else {
            date
        };
        return localize_naive(tz, date.and_hms_opt(0, 0, 0)?);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|local| localize_naive(tz, local))
}

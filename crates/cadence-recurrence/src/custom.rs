//! Pluggable sub-compiler for `custom` frequency rule strings.
//!
//! The default parser reads cron expressions through the `cron` crate. Only
//! the date fields (day-of-month, month, day-of-week and the optional year)
//! decide which calendar days match; the send time always comes from the
//! schedule's `time_of_day`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use cron::Schedule;

/// A compiled custom rule: a predicate over local calendar dates.
pub trait CustomRule: Send + Sync + fmt::Debug {
    fn matches(&self, date: NaiveDate) -> bool;
}

/// Turns a rule string into a [`CustomRule`]. The error is a human-readable
/// reason suitable for a validation message.
pub trait CustomRuleParser: Send + Sync {
    fn parse(&self, rule: &str) -> Result<Arc<dyn CustomRule>, String>;
}

/// Default [`CustomRuleParser`] backed by cron expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronRuleParser;

impl CustomRuleParser for CronRuleParser {
    fn parse(&self, rule: &str) -> Result<Arc<dyn CustomRule>, String> {
        let normalized = normalize_cron(rule);
        let fields: Vec<&str> = normalized.split_whitespace().collect();
        if !(6..=7).contains(&fields.len()) {
            return Err(format!(
                "expected a 5- or 6-field cron expression, got {} fields",
                rule.split_whitespace().count()
            ));
        }
        // Reject the full expression first so time-field typos are reported too.
        Schedule::from_str(&normalized).map_err(|e| e.to_string())?;

        // Pin the time fields to midnight; only the date fields select days.
        let date_only = format!("0 0 0 {}", fields[3..].join(" "));
        let schedule = Schedule::from_str(&date_only).map_err(|e| e.to_string())?;
        Ok(Arc::new(CronDateRule { schedule }))
    }
}

/// Prepend a seconds field to a standard 5-field cron expression.
///
/// The `cron` crate wants `sec min hour day-of-month month day-of-week [year]`;
/// users write `min hour day-of-month month day-of-week`.
pub(crate) fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug)]
pub struct CronDateRule {
    schedule: Schedule,
}

impl CustomRule for CronDateRule {
    fn matches(&self, date: NaiveDate) -> bool {
        let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
            return false;
        };
        let midnight = Utc.from_utc_datetime(&midnight);
        // With the time fields pinned to 00:00:00 the first fire at or after
        // midnight lands on midnight itself iff the date matches.
        self.schedule
            .after(&(midnight - Duration::seconds(1)))
            .next()
            .is_some_and(|fire| fire == midnight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn normalize_adds_seconds_field() {
        assert_eq!(normalize_cron("0 9 1,15 * *"), "0 0 9 1,15 * *");
        assert_eq!(normalize_cron("  0 0 9 * * Mon  "), "0 0 9 * * Mon");
    }

    #[test]
    fn day_of_month_list() {
        let rule = CronRuleParser.parse("0 9 1,15 * *").unwrap();
        assert!(rule.matches(date(2026, 11, 1)));
        assert!(rule.matches(date(2026, 11, 15)));
        assert!(!rule.matches(date(2026, 11, 2)));
        assert!(!rule.matches(date(2026, 11, 30)));
    }

    #[test]
    fn weekday_names() {
        let rule = CronRuleParser.parse("30 8 * * Mon,Fri").unwrap();
        // 2026-11-02 is a Monday, 2026-11-06 a Friday.
        assert!(rule.matches(date(2026, 11, 2)));
        assert!(rule.matches(date(2026, 11, 6)));
        assert!(!rule.matches(date(2026, 11, 3)));
    }

    #[test]
    fn time_fields_do_not_affect_matching() {
        let rule = CronRuleParser.parse("59 23 * Dec *").unwrap();
        assert!(rule.matches(date(2026, 12, 24)));
        assert!(!rule.matches(date(2026, 11, 24)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(CronRuleParser.parse("every tuesday").is_err());
        assert!(CronRuleParser.parse("* *").is_err());
        assert!(CronRuleParser.parse("0 25 * * *").is_err());
    }
}

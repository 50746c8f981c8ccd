use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How often a schedule repeats. Derived from the [`Selector`] of a
/// normalized config; kept as its own type for listing and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "custom" => Ok(Frequency::Custom),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// Day of the week, ordered Monday first (ISO 8601).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Monday => chrono::Weekday::Mon,
            Weekday::Tuesday => chrono::Weekday::Tue,
            Weekday::Wednesday => chrono::Weekday::Wed,
            Weekday::Thursday => chrono::Weekday::Thu,
            Weekday::Friday => chrono::Weekday::Fri,
            Weekday::Saturday => chrono::Weekday::Sat,
            Weekday::Sunday => chrono::Weekday::Sun,
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl FromStr for Weekday {
    type Err = String;

    /// Accepts full English names and three-letter abbreviations, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Ok(Weekday::Monday),
            "tuesday" | "tue" => Ok(Weekday::Tuesday),
            "wednesday" | "wed" => Ok(Weekday::Wednesday),
            "thursday" | "thu" => Ok(Weekday::Thursday),
            "friday" | "fri" => Ok(Weekday::Friday),
            "saturday" | "sat" => Ok(Weekday::Saturday),
            "sunday" | "sun" => Ok(Weekday::Sunday),
            other => Err(format!("unknown weekday: {other}")),
        }
    }
}

/// Wall-clock send time, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    /// `H:MM` / `HH:MM` in 24-hour form. A trailing `:SS` is accepted and
    /// dropped, so `09:30:00` reads as `09:30`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("time must be HH:MM (24-hour), got {s:?}");
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(bad());
        }
        let digits = |p: &str, max_len: usize| {
            !p.is_empty() && p.len() <= max_len && p.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(parts[0], 2) || !(digits(parts[1], 2) && parts[1].len() == 2) {
            return Err(bad());
        }
        if parts.len() == 3 && !(digits(parts[2], 2) && parts[2].len() == 2) {
            return Err(bad());
        }
        let hour: u8 = parts[0].parse().map_err(|_| bad())?;
        let minute: u8 = parts[1].parse().map_err(|_| bad())?;
        if parts.len() == 3 {
            let second: u8 = parts[2].parse().map_err(|_| bad())?;
            if second > 59 {
                return Err(bad());
            }
        }
        TimeOfDay::new(hour, minute).ok_or_else(bad)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Which calendar dates a schedule lands on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    /// Every `interval` days.
    Daily,
    /// The listed weekdays of every `interval`-th week.
    Weekly { days: BTreeSet<Weekday> },
    /// Fixed day of every `interval`-th month. Days missing from a month
    /// (29-31) fall back to that month's last day.
    MonthlyDay { day: u8 },
    /// `ordinal`-th `weekday` of every `interval`-th month; ordinal 5 is the
    /// last one in the month.
    MonthlyNth { ordinal: u8, weekday: Weekday },
    /// Rule string handed to the custom-rule sub-compiler.
    Custom { rule: String },
}

impl Selector {
    pub fn frequency(&self) -> Frequency {
        match self {
            Selector::Daily => Frequency::Daily,
            Selector::Weekly { .. } => Frequency::Weekly,
            Selector::MonthlyDay { .. } | Selector::MonthlyNth { .. } => Frequency::Monthly,
            Selector::Custom { .. } => Frequency::Custom,
        }
    }
}

/// Termination mode. Exactly one is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Limit {
    /// No occurrence at or after this instant.
    Until { end_at: DateTime<Utc> },
    /// Stop after this many materialized occurrences.
    Count { max_occurrences: u32 },
}

/// A validated, normalized recurrence definition. Only
/// [`validate_configuration`](crate::validate::validate_configuration)
/// should build one from user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub selector: Selector,
    pub interval: u32,
    pub time_of_day: TimeOfDay,
    pub timezone: Tz,
    /// Inclusive lower bound.
    pub start_at: DateTime<Utc>,
    pub limit: Limit,
    #[serde(default)]
    pub skip_weekends: bool,
    #[serde(default)]
    pub skip_holidays: bool,
    #[serde(default = "default_region")]
    pub holiday_region: String,
}

impl ScheduleConfig {
    pub fn frequency(&self) -> Frequency {
        self.selector.frequency()
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        match self.limit {
            Limit::Until { end_at } => Some(end_at),
            Limit::Count { .. } => None,
        }
    }

    pub fn max_occurrences(&self) -> Option<u32> {
        match self.limit {
            Limit::Count { max_occurrences } => Some(max_occurrences),
            Limit::Until { .. } => None,
        }
    }
}

pub const DEFAULT_HOLIDAY_REGION: &str = "US";

/// Regions a holiday calendar is expected to understand.
pub const HOLIDAY_REGIONS: &[&str] = &["US", "UK", "EU", "CA", "AU"];

fn default_region() -> String {
    DEFAULT_HOLIDAY_REGION.to_string()
}

/// Unvalidated configuration as submitted by a caller. Every field is
/// optional and loosely typed so that validation can report all problems
/// at once instead of failing on the first deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawScheduleConfig {
    pub frequency: Option<String>,
    pub interval: Option<i64>,
    pub days_of_week: Vec<String>,
    /// `day_of_month` (default) or `nth_weekday`.
    pub monthly_type: Option<String>,
    pub day_of_month: Option<i64>,
    pub week_number: Option<i64>,
    pub weekday: Option<String>,
    pub custom_rule: Option<String>,
    pub time: Option<String>,
    pub timezone: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub max_occurrences: Option<i64>,
    pub skip_weekends: Option<bool>,
    pub skip_holidays: Option<bool>,
    pub holiday_region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_accepts_short_and_long_forms() {
        assert_eq!("9:05".parse::<TimeOfDay>().unwrap(), TimeOfDay::new(9, 5).unwrap());
        assert_eq!("23:59".parse::<TimeOfDay>().unwrap(), TimeOfDay::new(23, 59).unwrap());
        assert_eq!("07:30:00".parse::<TimeOfDay>().unwrap().to_string(), "07:30");
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        for bad in ["24:00", "12:60", "12:5", "noon", "12", "1:2:3:4", "-1:30", "12:30:61"] {
            assert!(bad.parse::<TimeOfDay>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn weekday_names_and_abbreviations() {
        assert_eq!("Monday".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("thu".parse::<Weekday>().unwrap(), Weekday::Thursday);
        assert!("funday".parse::<Weekday>().is_err());
        assert_eq!(Weekday::from(chrono::Weekday::Sun), Weekday::Sunday);
    }

    #[test]
    fn config_json_uses_tagged_selector_and_zone_name() {
        let cfg = ScheduleConfig {
            selector: Selector::MonthlyNth {
                ordinal: 2,
                weekday: Weekday::Tuesday,
            },
            interval: 1,
            time_of_day: TimeOfDay::new(9, 0).unwrap(),
            timezone: chrono_tz::Europe::Berlin,
            start_at: "2026-11-01T00:00:00Z".parse().unwrap(),
            limit: Limit::Count { max_occurrences: 3 },
            skip_weekends: false,
            skip_holidays: false,
            holiday_region: "US".to_string(),
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["selector"]["kind"], "monthly_nth");
        assert_eq!(json["timezone"], "Europe/Berlin");
        assert_eq!(json["time_of_day"], "09:00");
        let back: ScheduleConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }
}

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

/// Holiday lookup used by `skip_holidays`. Implemented by the host; the
/// engine only asks yes/no for a local date and a region code.
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate, region: &str) -> bool;
}

/// Calendar with no holidays at all. The default when the host supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHolidays;

impl HolidayCalendar for NoHolidays {
    fn is_holiday(&self, _date: NaiveDate, _region: &str) -> bool {
        false
    }
}

/// Explicit per-region date list, e.g. loaded from an operator-maintained file.
#[derive(Debug, Clone, Default)]
pub struct FixedHolidays {
    by_region: HashMap<String, HashSet<NaiveDate>>,
}

impl FixedHolidays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Region codes are case-insensitive.
    pub fn with(mut self, region: &str, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.by_region
            .entry(region.to_ascii_uppercase())
            .or_default()
            .extend(dates);
        self
    }
}

impl HolidayCalendar for FixedHolidays {
    fn is_holiday(&self, date: NaiveDate, region: &str) -> bool {
        self.by_region
            .get(&region.to_ascii_uppercase())
            .is_some_and(|dates| dates.contains(&date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_holidays_are_per_region() {
        let christmas = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        let thanksgiving = NaiveDate::from_ymd_opt(2026, 11, 26).unwrap();
        let cal = FixedHolidays::new()
            .with("us", [christmas, thanksgiving])
            .with("UK", [christmas]);

        assert!(cal.is_holiday(thanksgiving, "US"));
        assert!(!cal.is_holiday(thanksgiving, "UK"));
        assert!(cal.is_holiday(christmas, "uk"));
        assert!(!cal.is_holiday(christmas, "AU"));
        assert!(!NoHolidays.is_holiday(christmas, "US"));
    }
}

use std::sync::Arc;

use cadence_recurrence::{
    preview_occurrences, validate_configuration, FixedHolidays, RawScheduleConfig, RuleContext,
    ValidationCode,
};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};

fn now() -> DateTime<Utc> {
    "2026-10-16T10:00:00Z".parse().unwrap()
}

fn preview(raw: &RawScheduleConfig, count: usize, ctx: &RuleContext) -> Vec<DateTime<Utc>> {
    let validated = validate_configuration(raw, now(), ctx).expect("config should validate");
    preview_occurrences(&validated.config, count, ctx).unwrap()
}

fn raw_json(json: serde_json::Value) -> RawScheduleConfig {
    serde_json::from_value(json).unwrap()
}

#[test]
fn weekly_monday_thursday_from_a_wednesday() {
    // 2026-10-21 is a Wednesday.
    let raw = raw_json(serde_json::json!({
        "frequency": "weekly",
        "days_of_week": ["monday", "thursday"],
        "time": "10:00",
        "start_date": "2026-10-21",
        "max_occurrences": 4
    }));
    let at = preview(&raw, 10, &RuleContext::default());
    let dates: Vec<NaiveDate> = at.iter().map(|a| a.date_naive()).collect();
    assert_eq!(
        dates,
        vec![
            NaiveDate::from_ymd_opt(2026, 10, 22).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 26).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 29).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        ]
    );
}

#[test]
fn second_tuesday_for_three_months() {
    let raw = raw_json(serde_json::json!({
        "frequency": "monthly",
        "monthly_type": "nth_weekday",
        "week_number": 2,
        "weekday": "tuesday",
        "time": "09:00",
        "start_date": "2026-11-01",
        "max_occurrences": 3
    }));
    let at = preview(&raw, 10, &RuleContext::default());
    assert_eq!(at.len(), 3);
    let mut months = Vec::new();
    for a in &at {
        assert_eq!(a.weekday(), Weekday::Tue);
        assert!((8..=14).contains(&a.day()), "{a} is not a 2nd Tuesday");
        months.push(a.month());
    }
    assert_eq!(months, vec![11, 12, 1]);
}

#[test]
fn the_31st_in_april_is_the_30th() {
    let raw = raw_json(serde_json::json!({
        "frequency": "monthly",
        "day_of_month": 31,
        "time": "09:00",
        "start_date": "2027-04-01",
        "end_date": "2027-07-01"
    }));
    let validated = validate_configuration(&raw, now(), &RuleContext::default()).unwrap();
    assert_eq!(validated.warnings.len(), 1);
    let at = preview_occurrences(&validated.config, 10, &RuleContext::default()).unwrap();
    let days: Vec<(u32, u32)> = at.iter().map(|a| (a.month(), a.day())).collect();
    assert_eq!(days, vec![(4, 30), (5, 31), (6, 30)]);
}

#[test]
fn end_date_and_max_occurrences_conflict() {
    let raw = raw_json(serde_json::json!({
        "frequency": "daily",
        "time": "09:00",
        "start_date": "2026-11-01",
        "end_date": "2026-12-01",
        "max_occurrences": 5
    }));
    let errors = validate_configuration(&raw, now(), &RuleContext::default()).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.code == ValidationCode::ConflictingLimits && e.field == "limits"));
}

#[test]
fn preview_is_ascending_at_local_wall_time_across_dst() {
    // New York leaves DST on 2026-11-01.
    let raw = raw_json(serde_json::json!({
        "frequency": "daily",
        "time": "09:00",
        "timezone": "America/New_York",
        "start_date": "2026-10-30",
        "max_occurrences": 5
    }));
    let at = preview(&raw, 5, &RuleContext::default());
    assert!(at.windows(2).all(|w| w[0] < w[1]));
    for a in &at {
        let local = a.with_timezone(&chrono_tz::America::New_York);
        assert_eq!((local.hour(), local.minute()), (9, 0));
    }
    assert_eq!(at[1].hour(), 13); // Oct 31, EDT
    assert_eq!(at[2].hour(), 14); // Nov 1, EST
}

#[test]
fn filters_do_not_consume_occurrences() {
    // Starts on Friday 2026-11-06; Wednesday the 11th is a holiday.
    let holidays = FixedHolidays::new().with("US", [NaiveDate::from_ymd_opt(2026, 11, 11).unwrap()]);
    let ctx = RuleContext::default().with_holidays(Arc::new(holidays));
    let raw = raw_json(serde_json::json!({
        "frequency": "daily",
        "time": "09:00",
        "start_date": "2026-11-06",
        "max_occurrences": 5,
        "skip_weekends": true,
        "skip_holidays": true
    }));
    let at = preview(&raw, 10, &ctx);
    let days: Vec<u32> = at.iter().map(|a| a.day()).collect();
    assert_eq!(days, vec![6, 9, 10, 12, 13]);
}

#[test]
fn custom_cron_rule_preview() {
    let raw = raw_json(serde_json::json!({
        "frequency": "custom",
        "custom_rule": "0 9 * * Mon-Fri",
        "time": "07:45",
        "start_date": "2026-11-07",
        "max_occurrences": 3
    }));
    let at = preview(&raw, 10, &RuleContext::default());
    let days: Vec<u32> = at.iter().map(|a| a.day()).collect();
    // 7th and 8th are a weekend.
    assert_eq!(days, vec![9, 10, 11]);
    assert!(at.iter().all(|a| (a.hour(), a.minute()) == (7, 45)));
}

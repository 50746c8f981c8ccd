//! Placing a local calendar date + wall-clock time onto the UTC timeline.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Resolve `date` at `time` in `tz` to an absolute instant.
///
/// DST rules:
/// - ambiguous local time (clocks fall back): the earlier instant;
/// - non-existent local time (clocks spring forward): shifted forward by the
///   length of the gap, using the offset in force before the transition, so
///   02:30 in a one-hour gap becomes 03:30.
pub fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    localize_naive(tz, date.and_time(time))
}

pub fn localize_naive(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Offset that applied a day earlier, i.e. before the gap opened.
            let before = local.checked_sub_signed(Duration::hours(24))?;
            let offset = tz.offset_from_local_datetime(&before).earliest()?.fix();
            let utc = local.checked_sub_signed(Duration::seconds(i64::from(
                offset.local_minus_utc(),
            )))?;
            Some(Utc.from_utc_datetime(&utc))
        }
    }
}

/// Local calendar date of an instant in `tz`.
pub fn local_date(tz: Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

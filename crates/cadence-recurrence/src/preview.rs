use chrono::{DateTime, Utc};

use crate::compile::RecurrenceRule;
use crate::context::RuleContext;
use crate::error::Result;
use crate::types::ScheduleConfig;

/// The first `count` send instants of `config`, exactly as the materializer
/// would place them, without touching storage. Capped by `max_occurrences`.
pub fn preview_occurrences(
    config: &ScheduleConfig,
    count: usize,
    ctx: &RuleContext,
) -> Result<Vec<DateTime<Utc>>> {
    let rule = RecurrenceRule::compile(config, ctx.parser.as_ref())?;
    let cap = rule
        .max_occurrences()
        .map_or(count, |max| count.min(max as usize));
    Ok(rule
        .instants(None, ctx.holidays.as_ref(), ctx.scan_limit)
        .take(cap)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Limit, Selector, TimeOfDay};

    #[test]
    fn preview_is_capped_by_max_occurrences() {
        let cfg = ScheduleConfig {
            selector: Selector::Daily,
            interval: 1,
            time_of_day: TimeOfDay::new(8, 15).unwrap(),
            timezone: chrono_tz::Europe::Paris,
            start_at: "2026-11-01T00:00:00Z".parse().unwrap(),
            limit: Limit::Count { max_occurrences: 3 },
            skip_weekends: false,
            skip_holidays: false,
            holiday_region: "EU".into(),
        };
        let at = preview_occurrences(&cfg, 10, &RuleContext::default()).unwrap();
        assert_eq!(at.len(), 3);
        // Paris is UTC+1 in November.
        assert_eq!(at[0].to_rfc3339(), "2026-11-01T07:15:00+00:00");
        assert!(at.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Cron evaluation for repeatable jobs.
//!
//! The scheduler only needs "next trigger after instant T", so evaluation is
//! behind the [`CronEvaluator`] trait. [`StandardCron`] is the default,
//! backed by the `cron` crate.
//!
//! Accepted expressions:
//! - 5 fields: `minute hour day_of_month month day_of_week` (seconds = 0)
//! - 6 or 7 fields: `second minute hour day_of_month month day_of_week [year]`
//!
//! Timezones are IANA names (`"Europe/Berlin"`, `"UTC"`) resolved through
//! `chrono-tz`, so schedules follow daylight saving. Explicit offsets such as
//! `"+05:30"` are accepted as a fallback.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{QueueError, QueueResult};

/// Computes the next trigger instant for a cron expression.
pub trait CronEvaluator: Send + Sync + 'static {
    /// Check that the expression and timezone are usable.
    fn validate(&self, expr: &str, timezone: Option<&str>) -> QueueResult<()>;

    /// Next trigger strictly after `after`, or `None` if the schedule never fires again.
    fn next_after(
        &self,
        expr: &str,
        timezone: Option<&str>,
        after: DateTime<Utc>,
    ) -> QueueResult<Option<DateTime<Utc>>>;
}

/// Default evaluator backed by the `cron` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCron;

impl StandardCron {
    fn parse(expr: &str) -> QueueResult<Schedule> {
        let trimmed = expr.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        Schedule::from_str(&normalized).map_err(|e| {
            QueueError::Validation(format!("invalid cron expression '{}': {}", expr, e))
        })
    }
}

impl CronEvaluator for StandardCron {
    fn validate(&self, expr: &str, timezone: Option<&str>) -> QueueResult<()> {
        Self::parse(expr)?;
        parse_timezone(timezone)?;
        Ok(())
    }

    fn next_after(
        &self,
        expr: &str,
        timezone: Option<&str>,
        after: DateTime<Utc>,
    ) -> QueueResult<Option<DateTime<Utc>>> {
        let schedule = Self::parse(expr)?;
        Ok(match parse_timezone(timezone)? {
            CronTimezone::Named(tz) => next_in(&schedule, after, &tz),
            CronTimezone::Offset(offset) => next_in(&schedule, after, &offset),
        })
    }
}

fn next_in<Z: TimeZone>(schedule: &Schedule, after: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

/// Zone a cron expression is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronTimezone {
    Named(Tz),
    Offset(FixedOffset),
}

/// Resolve a timezone name or offset. `None` and empty strings mean UTC.
pub fn parse_timezone(timezone: Option<&str>) -> QueueResult<CronTimezone> {
    let tz = match timezone.map(str::trim) {
        None | Some("") => return Ok(CronTimezone::Named(chrono_tz::UTC)),
        Some(tz) => tz,
    };

    if let Ok(named) = tz.parse::<Tz>() {
        return Ok(CronTimezone::Named(named));
    }

    FixedOffset::from_str(tz).map(CronTimezone::Offset).map_err(|_| {
        QueueError::Validation(format!(
            "unsupported timezone '{}': expected a name such as 'Europe/Berlin' or an offset such as '+02:00'",
            tz
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_five_field_expression() {
        let next = StandardCron
            .next_after("*/15 * * * *", None, at(10, 7, 30))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(10, 15, 0));
    }

    #[test]
    fn test_six_field_expression() {
        let next = StandardCron
            .next_after("*/10 * * * * *", None, at(10, 0, 1))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(10, 0, 10));
    }

    #[test]
    fn test_next_is_strictly_after() {
        let next = StandardCron
            .next_after("0 * * * *", None, at(10, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(11, 0, 0));
    }

    #[test]
    fn test_timezone_offset_applies() {
        // 09:00 at +02:00 is 07:00 UTC.
        let next = StandardCron
            .next_after("0 9 * * *", Some("+02:00"), at(6, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.hour(), 7);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_invalid_expression() {
        let result = StandardCron.validate("not a cron", None);
        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[test]
    fn test_named_timezone_follows_daylight_saving() {
        // 09:00 in New York is 14:00 UTC in winter (EST) and 13:00 UTC in summer (EDT).
        let winter = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let next = StandardCron
            .next_after("0 9 * * *", Some("America/New_York"), winter)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap());

        let summer = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();
        let next = StandardCron
            .next_after("0 9 * * *", Some("America/New_York"), summer)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 15, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timezone_variants() {
        assert_eq!(parse_timezone(None).unwrap(), CronTimezone::Named(chrono_tz::UTC));
        assert_eq!(parse_timezone(Some("UTC")).unwrap(), CronTimezone::Named(chrono_tz::UTC));
        assert_eq!(
            parse_timezone(Some("America/New_York")).unwrap(),
            CronTimezone::Named(chrono_tz::America::New_York)
        );
        assert!(StandardCron.validate("0 9 * * *", Some("Asia/Kolkata")).is_ok());

        let CronTimezone::Offset(offset) = parse_timezone(Some("+05:30")).unwrap() else {
            panic!("expected a fixed offset");
        };
        assert_eq!(offset.local_minus_utc(), 19800);

        let err = parse_timezone(Some("Mars/Olympus_Mons")).unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }
}

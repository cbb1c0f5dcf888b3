//! Schedule expressions: cron sequences and one-off instants.

use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

/// How coarse one "period" of a schedule is, for catch-up deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodGranularity {
    /// Fires at most once per calendar day; periods are dates.
    Daily,
    /// Fires at most once per hour; periods are date + hour.
    Hourly,
    /// Fires more often than hourly, or exactly once; periods are the exact
    /// firing instant.
    Instant,
}

/// A parsed schedule expression.
///
/// Cron expressions yield an infinite firing sequence computed by a standard
/// cron calculator; the stored `last_invocation` is never consulted for
/// correctness. An RFC 3339 instant is a one-off.
#[derive(Debug, Clone)]
pub enum ScheduleExpression {
    /// A recurring cron schedule.
    Cron {
        /// The expression as written by the caller.
        raw: String,
        /// The parsed schedule (seconds field normalized in).
        schedule: Box<Schedule>,
        /// Period coarseness derived from the expression fields.
        granularity: PeriodGranularity,
    },
    /// A single absolute firing instant.
    OneOff(DateTime<Utc>),
}

/// Backward windows scanned to find the most recent past firing. Ordered
/// smallest first so dense schedules never iterate a long window.
const LOOKBACK_WINDOWS: [Duration; 5] = [
    Duration::hours(1),
    Duration::days(1),
    Duration::days(7),
    Duration::days(32),
    Duration::days(366),
];

impl ScheduleExpression {
    /// Parses an expression: RFC 3339 instants become one-offs, everything
    /// else must be a 5- or 6-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidExpression`] when the text is neither.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::OneOff(instant.with_timezone(&Utc)));
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        // The cron calculator wants a seconds field; classic 5-field
        // expressions get "0" prepended.
        let normalized = match fields.len() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(ScheduleError::invalid_expression(
                    expression,
                    format!("expected 5-7 cron fields or an RFC 3339 instant, got {n} fields"),
                ));
            }
        };

        let schedule = Schedule::from_str(&normalized)
            .map_err(|err| ScheduleError::invalid_expression(expression, err.to_string()))?;
        let granularity = granularity_of(&normalized);

        Ok(Self::Cron {
            raw: trimmed.to_string(),
            schedule: Box::new(schedule),
            granularity,
        })
    }

    /// Returns the next firing strictly after `after`, or `None` for an
    /// elapsed one-off.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { schedule, .. } => schedule.after(&after).next(),
            Self::OneOff(instant) => (*instant > after).then_some(*instant),
        }
    }

    /// Returns the most recent firing at or before `now`, if one exists
    /// within the lookback horizon (366 days).
    #[must_use]
    pub fn previous_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::OneOff(instant) => (*instant <= now).then_some(*instant),
            Self::Cron { schedule, .. } => {
                for window in LOOKBACK_WINDOWS {
                    let start = now - window;
                    let last = schedule
                        .after(&start)
                        .take_while(|instant| *instant <= now)
                        .last();
                    if last.is_some() {
                        return last;
                    }
                }
                None
            }
        }
    }

    /// The canonical deduplication key for a firing at `firing_time`.
    ///
    /// Daily schedules map to the calendar date, hourly schedules to date
    /// plus hour, everything denser (and one-offs) to the exact instant.
    #[must_use]
    pub fn period_identifier(&self, firing_time: DateTime<Utc>) -> String {
        let granularity = match self {
            Self::Cron { granularity, .. } => *granularity,
            Self::OneOff(_) => PeriodGranularity::Instant,
        };
        match granularity {
            PeriodGranularity::Daily => firing_time.format("%Y-%m-%d").to_string(),
            PeriodGranularity::Hourly => firing_time.format("%Y-%m-%dT%H").to_string(),
            PeriodGranularity::Instant => {
                firing_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            }
        }
    }

    /// Whether this expression fires exactly once.
    #[must_use]
    pub fn is_one_off(&self) -> bool {
        matches!(self, Self::OneOff(_))
    }
}

impl core::fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cron { raw, .. } => f.write_str(raw),
            Self::OneOff(instant) => {
                write!(
                    f,
                    "{}",
                    instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                )
            }
        }
    }
}

/// Derives period coarseness from a normalized (seconds-first) expression.
///
/// A wildcard or stepped minute field means sub-hourly firing; otherwise a
/// wildcard hour means hourly; otherwise the schedule fires at most once a
/// day per date.
fn granularity_of(normalized: &str) -> PeriodGranularity {
    let fields: Vec<&str> = normalized.split_whitespace().collect();
    let minute = fields.get(1).copied().unwrap_or("*");
    let hour = fields.get(2).copied().unwrap_or("*");

    let is_open = |field: &str| field.contains('*') || field.contains('/');
    if is_open(minute) {
        PeriodGranularity::Instant
    } else if is_open(hour) {
        PeriodGranularity::Hourly
    } else {
        PeriodGranularity::Daily
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn five_field_cron_parses() {
        let expr = ScheduleExpression::parse("0 7 * * *").unwrap();
        assert!(!expr.is_one_off());
        assert_eq!(expr.to_string(), "0 7 * * *");
    }

    #[test]
    fn rfc3339_parses_as_one_off() {
        let expr = ScheduleExpression::parse("2024-06-30T23:59:00Z").unwrap();
        assert!(expr.is_one_off());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ScheduleExpression::parse("whenever").is_err());
        assert!(ScheduleExpression::parse("0 7 * *").is_err());
    }

    #[test]
    fn next_after_daily() {
        let expr = ScheduleExpression::parse("0 7 * * *").unwrap();
        let next = expr.next_after(at(2024, 7, 1, 9, 30)).unwrap();
        assert_eq!(next, at(2024, 7, 2, 7, 0));
    }

    #[test]
    fn previous_fire_daily() {
        let expr = ScheduleExpression::parse("0 7 * * *").unwrap();
        let previous = expr.previous_fire(at(2024, 7, 1, 9, 30)).unwrap();
        assert_eq!(previous, at(2024, 7, 1, 7, 0));
    }

    #[test]
    fn previous_fire_finds_sparse_schedules() {
        // Fires on the 1st of January only; lookback must reach months back.
        let expr = ScheduleExpression::parse("0 0 1 1 *").unwrap();
        let previous = expr.previous_fire(at(2024, 7, 1, 0, 0)).unwrap();
        assert_eq!(previous, at(2024, 1, 1, 0, 0));
    }

    #[test]
    fn one_off_next_and_previous() {
        let expr = ScheduleExpression::parse("2024-06-30T23:59:00Z").unwrap();
        let instant = at(2024, 6, 30, 23, 59);

        assert_eq!(expr.next_after(at(2024, 6, 30, 0, 0)), Some(instant));
        assert_eq!(expr.next_after(instant), None);
        assert_eq!(expr.previous_fire(at(2024, 7, 1, 8, 0)), Some(instant));
        assert_eq!(expr.previous_fire(at(2024, 6, 30, 0, 0)), None);
    }

    #[test]
    fn period_identifier_daily() {
        let expr = ScheduleExpression::parse("0 7 * * *").unwrap();
        assert_eq!(expr.period_identifier(at(2024, 7, 1, 7, 0)), "2024-07-01");
    }

    #[test]
    fn period_identifier_hourly() {
        let expr = ScheduleExpression::parse("30 * * * *").unwrap();
        assert_eq!(
            expr.period_identifier(at(2024, 7, 1, 13, 30)),
            "2024-07-01T13"
        );
    }

    #[test]
    fn period_identifier_sub_hourly_is_exact_instant() {
        let expr = ScheduleExpression::parse("*/5 * * * *").unwrap();
        assert_eq!(
            expr.period_identifier(at(2024, 7, 1, 13, 35)),
            "2024-07-01T13:35:00Z"
        );
    }

    #[test]
    fn period_identifier_one_off_is_exact_instant() {
        let expr = ScheduleExpression::parse("2024-06-30T23:59:00Z").unwrap();
        assert_eq!(
            expr.period_identifier(at(2024, 6, 30, 23, 59)),
            "2024-06-30T23:59:00Z"
        );
    }
}

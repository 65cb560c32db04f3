//! Schedule resolution: declarative schedule → concrete trigger.
//!
//! Pure functions, no state or I/O. Every schedule variant is lowered to
//! either a single instant or a six-field cron rule (leading seconds) that
//! the engine evaluates in the configured reference timezone. Resolution is
//! deterministic: the same schedule and clock always produce the same
//! trigger, which is what lets jobs be rebuilt from task records alone
//! after a restart.

use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use taskd_core::types::Schedule;

use crate::error::{Result, SchedulerError};

/// Whether a past `once` instant is an error or an overdue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Creating or editing a task: a `once` instant must lie in the future.
    Create,
    /// Rebuilding jobs after a restart: a past `once` instant is legitimate
    /// and means "overdue, run immediately".
    Reload,
}

/// A resolved firing rule.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fire exactly once at the given instant.
    OneShot(DateTime<Utc>),
    /// Fire on every match of a six-field cron rule, evaluated in the
    /// reference timezone.
    Cron {
        schedule: CronSchedule,
        expression: String,
    },
}

impl Trigger {
    /// Next fire time strictly after `now`, or `None` when the trigger is
    /// spent.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::OneShot(at) => {
                if *at > now {
                    Some(*at)
                } else {
                    None
                }
            }
            Trigger::Cron { schedule, .. } => schedule
                .after(&now.with_timezone(&tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    /// First fire time when the trigger goes live at `now`. Unlike
    /// [`Trigger::next_after`], an already-passed one-shot clamps to `now`
    /// so an overdue job fires on the next tick.
    pub fn initial_fire(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::OneShot(at) => Some((*at).max(now)),
            Trigger::Cron { .. } => self.next_after(now, tz),
        }
    }
}

/// Resolve `schedule` into a [`Trigger`].
///
/// All validation failures are descriptive [`SchedulerError::InvalidSchedule`]
/// values; nothing is clamped or silently corrected.
pub fn resolve(schedule: &Schedule, now: DateTime<Utc>, tz: Tz, mode: ResolveMode) -> Result<Trigger> {
    match schedule {
        Schedule::Once { datetime } => {
            let at = parse_once_datetime(datetime, tz)?;
            if mode == ResolveMode::Create && at <= now {
                return Err(invalid(format!(
                    "once datetime '{datetime}' is not in the future"
                )));
            }
            Ok(Trigger::OneShot(at))
        }
        recurring => {
            let expression = lower_to_cron(recurring)?;
            let parsed = CronSchedule::from_str(&expression).map_err(|e| {
                invalid(format!("cron expression '{expression}' did not parse: {e}"))
            })?;
            Ok(Trigger::Cron {
                schedule: parsed,
                expression,
            })
        }
    }
}

/// Creation-time validation: surfaces `InvalidSchedule` to the caller
/// before any job is touched. Exposed for the task-management collaborator.
pub fn validate_for_create(schedule: &Schedule, now: DateTime<Utc>, tz: Tz) -> Result<()> {
    resolve(schedule, now, tz, ResolveMode::Create).map(|_| ())
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

/// Weekly-schedule weekday names, indexed 0 = Monday (ISO numbering).
const WEEKDAYS_FROM_MONDAY: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Custom-cron weekday names, indexed 0 = Sunday (Unix numbering).
const WEEKDAYS_FROM_SUNDAY: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn lower_to_cron(schedule: &Schedule) -> Result<String> {
    match schedule {
        Schedule::Once { .. } => unreachable!("one-shot schedules are not lowered"),
        Schedule::Minutes { value } => {
            ensure_interval(*value, "minute")?;
            Ok(format!("0 */{value} * * * *"))
        }
        Schedule::Hourly { value } => {
            ensure_interval(*value, "hour")?;
            Ok(format!("0 0 */{value} * * *"))
        }
        Schedule::Daily { time } => {
            let (hour, minute) = parse_hhmm(time)?;
            Ok(format!("0 {minute} {hour} * * *"))
        }
        Schedule::Weekly { day, time } => {
            let (hour, minute) = parse_hhmm(time)?;
            let weekday = WEEKDAYS_FROM_MONDAY
                .get(*day as usize)
                .ok_or_else(|| invalid(format!("weekday {day} is out of range 0-6")))?;
            Ok(format!("0 {minute} {hour} * * {weekday}"))
        }
        Schedule::Monthly { day, time } => {
            if !(1..=31).contains(day) {
                return Err(invalid(format!("day of month {day} is out of range 1-31")));
            }
            let (hour, minute) = parse_hhmm(time)?;
            Ok(format!("0 {minute} {hour} {day} * *"))
        }
        Schedule::Cron { expression } => normalize_cron(expression),
    }
}

/// Validate a user-supplied 5- or 6-field cron expression and rewrite it to
/// the six-field form the engine evaluates.
///
/// Field syntax is deliberately narrow: `*` or a single in-range number,
/// optionally with a `/step` suffix. Numeric weekdays (Unix numbering,
/// 0 = Sunday) are rewritten to symbolic names so the evaluation layer's own
/// weekday numbering can never shift their meaning.
fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => ("0".to_string(), &fields[..]),
        6 => (check_field(fields[0], "seconds", 0, 59)?, &fields[1..]),
        n => {
            return Err(invalid(format!(
                "cron expression must have 5 or 6 fields, got {n}"
            )))
        }
    };

    let minute = check_field(rest[0], "minute", 0, 59)?;
    let hour = check_field(rest[1], "hour", 0, 23)?;
    let dom = check_field(rest[2], "day of month", 1, 31)?;
    let month = check_field(rest[3], "month", 1, 12)?;
    let dow = check_weekday_field(rest[4])?;

    Ok(format!("{seconds} {minute} {hour} {dom} {month} {dow}"))
}

/// Validate one plain field: `*` or an in-range number, optional `/step`.
fn check_field(field: &str, name: &str, min: u32, max: u32) -> Result<String> {
    let (base, step) = split_step(field, name)?;
    if base != "*" {
        let value: u32 = base
            .parse()
            .map_err(|_| invalid(format!("{name} field '{field}' is not a number or '*'")))?;
        if value < min || value > max {
            return Err(invalid(format!(
                "{name} field '{field}' is out of range {min}-{max}"
            )));
        }
    }
    match step {
        Some(s) => Ok(format!("{base}/{s}")),
        None => Ok(base.to_string()),
    }
}

/// Weekday field: same syntax, but numbers are translated to names.
fn check_weekday_field(field: &str) -> Result<String> {
    let (base, step) = split_step(field, "weekday")?;
    let base = if base == "*" {
        "*".to_string()
    } else {
        let value: usize = base
            .parse()
            .map_err(|_| invalid(format!("weekday field '{field}' is not a number or '*'")))?;
        WEEKDAYS_FROM_SUNDAY
            .get(value)
            .ok_or_else(|| invalid(format!("weekday field '{field}' is out of range 0-6")))?
            .to_string()
    };
    match step {
        Some(s) => Ok(format!("{base}/{s}")),
        None => Ok(base),
    }
}

fn split_step<'a>(field: &'a str, name: &str) -> Result<(&'a str, Option<u32>)> {
    match field.split_once('/') {
        None => Ok((field, None)),
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| invalid(format!("step in {name} field '{field}' is not a number")))?;
            if step == 0 {
                return Err(invalid(format!(
                    "step in {name} field '{field}' must be at least 1"
                )));
            }
            Ok((base, Some(step)))
        }
    }
}

fn ensure_interval(value: u32, unit: &str) -> Result<()> {
    if value == 0 {
        return Err(invalid(format!("{unit} interval must be at least 1")));
    }
    Ok(())
}

fn parse_hhmm(time: &str) -> Result<(u32, u32)> {
    let parsed = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| invalid(format!("time '{time}' is not in HH:MM form")))?;
    use chrono::Timelike;
    Ok((parsed.hour(), parsed.minute()))
}

/// Parse a `once` datetime. Values with an offset are converted to the
/// reference timezone; naive values are interpreted in it directly.
fn parse_once_datetime(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| invalid(format!("datetime '{raw}' is not ISO-8601")))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        // DST fold: take the earlier of the two readings.
        LocalResult::Ambiguous(first, _) => Ok(first.with_timezone(&Utc)),
        LocalResult::None => Err(invalid(format!(
            "datetime '{raw}' does not exist in timezone {tz}"
        ))),
    }
}

fn invalid(message: String) -> SchedulerError {
    SchedulerError::InvalidSchedule(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};

    const TZ: Tz = chrono_tz::Asia::Shanghai;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        TZ.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn next_local(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<chrono_tz::Tz> {
        resolve(schedule, now, TZ, ResolveMode::Create)
            .unwrap()
            .next_after(now, TZ)
            .unwrap()
            .with_timezone(&TZ)
    }

    #[test]
    fn minutes_schedule_fires_on_the_interval() {
        // Creation at 10:00:00 → next fire 10:05:00.
        let now = local(2026, 3, 2, 10, 0, 0);
        let next = next_local(&Schedule::Minutes { value: 5 }, now);
        assert_eq!((next.hour(), next.minute(), next.second()), (10, 5, 0));
    }

    #[test]
    fn hourly_schedule_fires_at_top_of_hour() {
        let now = local(2026, 3, 2, 10, 20, 0);
        let next = next_local(&Schedule::Hourly { value: 2 }, now);
        assert_eq!((next.hour(), next.minute()), (12, 0));
    }

    #[test]
    fn daily_schedule_rolls_to_tomorrow_when_passed() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let next = next_local(
            &Schedule::Daily {
                time: "08:30".to_string(),
            },
            now,
        );
        assert_eq!((next.day(), next.hour(), next.minute()), (3, 8, 30));
    }

    #[test]
    fn weekly_day_zero_is_monday() {
        let now = local(2026, 3, 2, 10, 0, 0); // 2026-03-02 is a Monday
        let next = next_local(
            &Schedule::Weekly {
                day: 0,
                time: "09:00".to_string(),
            },
            now,
        );
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.day(), next.hour()), (9, 9)); // time already passed → next Monday
    }

    #[test]
    fn monthly_schedule_pins_day_of_month() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let next = next_local(
            &Schedule::Monthly {
                day: 15,
                time: "23:30".to_string(),
            },
            now,
        );
        assert_eq!((next.day(), next.hour(), next.minute()), (15, 23, 30));
    }

    #[test]
    fn custom_cron_weekday_one_is_monday() {
        // Unix numbering in user expressions: 1 = Monday.
        let now = local(2026, 3, 3, 12, 0, 0); // Tuesday
        let next = next_local(
            &Schedule::Cron {
                expression: "0 9 * * 1".to_string(),
            },
            now,
        );
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 0));
    }

    #[test]
    fn custom_cron_weekday_zero_is_sunday() {
        let now = local(2026, 3, 3, 12, 0, 0);
        let next = next_local(
            &Schedule::Cron {
                expression: "30 18 * * 0".to_string(),
            },
            now,
        );
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn six_field_cron_carries_seconds() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let next = next_local(
            &Schedule::Cron {
                expression: "30 5 * * * *".to_string(),
            },
            now,
        );
        assert_eq!((next.minute(), next.second()), (5, 30));
    }

    #[test]
    fn resolution_is_deterministic() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let schedule = Schedule::Cron {
            expression: "*/5 * * * *".to_string(),
        };
        let a = resolve(&schedule, now, TZ, ResolveMode::Create).unwrap();
        let b = resolve(&schedule, now, TZ, ResolveMode::Create).unwrap();
        assert_eq!(a.next_after(now, TZ), b.next_after(now, TZ));
    }

    #[test]
    fn once_naive_datetime_uses_reference_timezone() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let trigger = resolve(
            &Schedule::Once {
                datetime: "2026-03-02T11:30:00".to_string(),
            },
            now,
            TZ,
            ResolveMode::Create,
        )
        .unwrap();
        let at = trigger.next_after(now, TZ).unwrap();
        assert_eq!(at, local(2026, 3, 2, 11, 30, 0));
    }

    #[test]
    fn once_with_offset_is_converted() {
        let now = local(2026, 3, 2, 10, 0, 0);
        // 04:00 UTC == 12:00 Shanghai.
        let trigger = resolve(
            &Schedule::Once {
                datetime: "2026-03-02T04:00:00+00:00".to_string(),
            },
            now,
            TZ,
            ResolveMode::Create,
        )
        .unwrap();
        assert_eq!(
            trigger.next_after(now, TZ).unwrap(),
            local(2026, 3, 2, 12, 0, 0)
        );
    }

    #[test]
    fn once_in_the_past_fails_on_create_but_reloads_as_overdue() {
        let now = local(2026, 3, 2, 10, 0, 0);
        let schedule = Schedule::Once {
            datetime: "2026-03-01T09:00:00".to_string(),
        };

        assert!(matches!(
            resolve(&schedule, now, TZ, ResolveMode::Create),
            Err(SchedulerError::InvalidSchedule(_))
        ));

        let trigger = resolve(&schedule, now, TZ, ResolveMode::Reload).unwrap();
        // Spent as a future fire…
        assert!(trigger.next_after(now, TZ).is_none());
        // …but clamps to now when the job goes live, so it runs immediately.
        assert_eq!(trigger.initial_fire(now, TZ), Some(now));
    }

    #[test]
    fn validate_for_create_accepts_future_once() {
        let now = local(2026, 3, 2, 10, 0, 0);
        validate_for_create(
            &Schedule::Once {
                datetime: "2026-03-02T10:30:00".to_string(),
            },
            now,
            TZ,
        )
        .unwrap();
    }

    #[test]
    fn rejects_malformed_schedules() {
        let now = Utc::now();
        let bad = [
            Schedule::Minutes { value: 0 },
            Schedule::Hourly { value: 0 },
            Schedule::Daily {
                time: "25:00".to_string(),
            },
            Schedule::Daily {
                time: "0830".to_string(),
            },
            Schedule::Weekly {
                day: 7,
                time: "08:30".to_string(),
            },
            Schedule::Monthly {
                day: 0,
                time: "08:30".to_string(),
            },
            Schedule::Monthly {
                day: 32,
                time: "08:30".to_string(),
            },
            Schedule::Once {
                datetime: "next tuesday".to_string(),
            },
        ];
        for schedule in bad {
            assert!(
                matches!(
                    resolve(&schedule, now, TZ, ResolveMode::Create),
                    Err(SchedulerError::InvalidSchedule(_))
                ),
                "{schedule:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_malformed_cron_expressions() {
        let now = Utc::now();
        let bad = [
            "* * * *",           // 4 fields
            "* * * * * * *",     // 7 fields
            "60 * * * *",        // minute out of range
            "* 24 * * *",        // hour out of range
            "* * 0 * *",         // day of month out of range
            "* * * 13 *",        // month out of range
            "* * * * 8",         // weekday out of range
            "*/0 * * * *",       // zero step
            "1,2 * * * *",       // lists are not supported
            "1-5 * * * *",       // ranges are not supported
            "abc * * * *",       // not a number
        ];
        for expression in bad {
            let schedule = Schedule::Cron {
                expression: expression.to_string(),
            };
            assert!(
                matches!(
                    resolve(&schedule, now, TZ, ResolveMode::Create),
                    Err(SchedulerError::InvalidSchedule(_))
                ),
                "'{expression}' should be rejected"
            );
        }
    }

    #[test]
    fn step_fields_are_accepted() {
        let now = local(2026, 3, 2, 10, 0, 2);
        let next = next_local(
            &Schedule::Cron {
                expression: "*/10 * * * *".to_string(),
            },
            now,
        );
        assert_eq!((next.minute(), next.second()), (10, 0));
    }
}

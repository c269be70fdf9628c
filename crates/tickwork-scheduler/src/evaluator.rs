//! Cron due-checks.
//!
//! Two evaluators sit behind [`CronEvaluator::is_due`]:
//!
//! 1. A fast matcher for plain 5-field expressions (`*`, `N`, `N-M`, lists,
//!    `*/K`, `N-M/K`), evaluated against the wall-clock minute in the task's
//!    timezone.
//! 2. The general `cron` crate parser, used when the fast matcher cannot
//!    express the pattern (names such as `MON`, 6/7-field expressions, ...).
//!
//! `is_due` never fails: an expression neither evaluator understands is
//! logged and reported as not due.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

/// Stateless cron evaluation.
pub struct CronEvaluator;

impl CronEvaluator {
    /// Whether `expression` matches the minute containing `instant`, as seen
    /// on a wall clock in `timezone`.
    pub fn is_due(expression: &str, timezone: &str, instant: DateTime<Utc>) -> bool {
        match fast_is_due(expression, timezone, instant) {
            Ok(due) => due,
            Err(Unsupported(reason)) => {
                debug!(expression, %reason, "fast cron matcher declined");
                match general_is_due(expression, timezone, instant) {
                    Ok(due) => due,
                    Err(e) => {
                        warn!(expression, timezone, error = %e, "cron expression can never fire");
                        false
                    }
                }
            }
        }
    }

    /// Next occurrence strictly after `instant`.
    ///
    /// # Errors
    ///
    /// - `InvalidCronExpression` — the expression cannot be parsed, or has no
    ///   future occurrence.
    /// - `InvalidTimezone` — `timezone` is not an IANA name.
    pub fn next_date(
        expression: &str,
        timezone: &str,
        instant: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let tz = parse_timezone(timezone)?;
        let schedule = parse_schedule(expression)?;
        schedule
            .after(&instant.with_timezone(&tz))
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| SchedulerError::InvalidCronExpression {
                expr: expression.to_string(),
                reason: "no upcoming occurrence".to_string(),
            })
    }
}

pub(crate) fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))
}

// ---------------------------------------------------------------------------
// Fast path
// ---------------------------------------------------------------------------

/// The fast matcher cannot evaluate this expression; defer to the parser.
#[derive(Debug)]
struct Unsupported(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

const FIELDS: [Field; 5] = [
    Field::Minute,
    Field::Hour,
    Field::DayOfMonth,
    Field::Month,
    Field::DayOfWeek,
];

impl Field {
    /// Inclusive bounds. Day-of-week accepts 7 as a second spelling of Sunday.
    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 7),
        }
    }
}

fn fast_is_due(
    expression: &str,
    timezone: &str,
    instant: DateTime<Utc>,
) -> std::result::Result<bool, Unsupported> {
    let patterns: Vec<&str> = expression.split_whitespace().collect();
    if patterns.len() != 5 {
        return Err(Unsupported(format!("expected 5 fields, got {}", patterns.len())));
    }

    let tz = parse_timezone(timezone).map_err(|e| Unsupported(e.to_string()))?;
    let local = instant.with_timezone(&tz);
    let values = [
        local.minute(),
        local.hour(),
        local.day(),
        local.month(),
        local.weekday().num_days_from_sunday(),
    ];

    // Every field is parsed even after a miss, so a malformed field anywhere
    // always reaches the general parser instead of silently reading "not due".
    let mut due = true;
    for ((pattern, field), value) in patterns.iter().zip(FIELDS).zip(values) {
        due &= field_matches(pattern, field, value)?;
    }
    Ok(due)
}

fn field_matches(pattern: &str, field: Field, value: u32) -> std::result::Result<bool, Unsupported> {
    let mut hit = false;
    for part in pattern.split(',') {
        hit |= part_matches(part, field, value)?;
        if field == Field::DayOfWeek && value == 0 {
            hit |= part_matches(part, field, 7)?;
        }
    }
    Ok(hit)
}

fn part_matches(part: &str, field: Field, value: u32) -> std::result::Result<bool, Unsupported> {
    let (min, max) = field.bounds();

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step = parse_number(step, 1, u32::MAX)?;
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        let a = parse_number(a, min, max)?;
        let b = parse_number(b, min, max)?;
        if a > b {
            return Err(Unsupported(format!("wrapping range {range}")));
        }
        (a, b)
    } else {
        if step.is_some() {
            return Err(Unsupported(format!("start/step form {part}")));
        }
        let n = parse_number(range, min, max)?;
        (n, n)
    };

    if value < start || value > end {
        return Ok(false);
    }
    Ok(match step {
        Some(k) => (value - start) % k == 0,
        None => true,
    })
}

fn parse_number(token: &str, min: u32, max: u32) -> std::result::Result<u32, Unsupported> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Unsupported(format!("non-numeric token '{token}'")));
    }
    let n: u32 = token
        .parse()
        .map_err(|_| Unsupported(format!("number out of range '{token}'")))?;
    if n < min || n > max {
        return Err(Unsupported(format!("{n} outside {min}-{max}")));
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// General parser
// ---------------------------------------------------------------------------

fn general_is_due(expression: &str, timezone: &str, instant: DateTime<Utc>) -> Result<bool> {
    let tz = parse_timezone(timezone)?;
    let schedule = parse_schedule(expression)?;

    let from = (instant - Duration::minutes(1)).with_timezone(&tz);
    let Some(next) = schedule.after(&from).next() else {
        return Ok(false);
    };

    let local = instant.with_timezone(&tz);
    Ok((next.year(), next.month(), next.day(), next.hour(), next.minute())
        == (local.year(), local.month(), local.day(), local.hour(), local.minute()))
}

/// Parse with the `cron` crate.
///
/// 5-field expressions get a leading seconds field and their numeric
/// day-of-week values renumbered (the crate counts 1 = Sunday). 6 and 7-field
/// expressions are passed through in the crate's own dialect.
fn parse_schedule(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            day_of_week_for_parser(fields[4])
        ),
        6 | 7 => fields.join(" "),
        n => {
            return Err(SchedulerError::InvalidCronExpression {
                expr: expression.to_string(),
                reason: format!("expected 5 fields, got {n}"),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCronExpression {
        expr: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite a Unix day-of-week field (0/7 = Sunday) for the `cron` crate
/// (1 = Sunday). Numeric parts are expanded to explicit day lists; named or
/// unrecognised parts are left for the parser to accept or reject.
fn day_of_week_for_parser(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }

    let mut days: Vec<String> = Vec::new();
    for part in field.split(',') {
        match unix_days(part) {
            Some(list) => {
                for d in list {
                    let shifted = (d % 7 + 1).to_string();
                    if !days.contains(&shifted) {
                        days.push(shifted);
                    }
                }
            }
            None => days.push(part.to_string()),
        }
    }
    days.join(",")
}

fn unix_days(part: &str) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|k| *k > 0)?),
        None => (part, 1),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)
    } else {
        let n = range.parse::<u32>().ok()?;
        if part.contains('/') {
            (n, 7)
        } else {
            (n, n)
        }
    };

    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step).collect())
}

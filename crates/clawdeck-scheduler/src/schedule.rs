//! Schedule translation: declarative schedules to trigger rules.
//!
//! Daily schedules become tz-aware cron rules, intervals stay plain
//! durations, raw cron expressions are validated and passed through.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use clawdeck_types::{Schedule, ScheduledTask};

use crate::{Result, SchedulerError};

/// A validated trigger rule, ready to drive a timer.
#[derive(Debug, Clone)]
pub enum TriggerRule {
    /// Cron-style occurrences evaluated in a fixed timezone.
    Cron { schedule: CronSchedule, tz: Tz },
    /// A fixed period, counted from each fire.
    Every { minutes: i64 },
}

impl TriggerRule {
    /// The next moment this rule fires strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerRule::Cron { schedule, tz } => schedule
                .after(&now.with_timezone(tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            TriggerRule::Every { minutes } => Some(now + Duration::minutes(*minutes)),
        }
    }
}

/// Validate a schedule and build its trigger rule.
///
/// `default_tz` applies to daily schedules that don't carry their own
/// zone; it is the single configured default, nothing else supplies one.
pub fn trigger_rule(schedule: &Schedule, default_tz: &str) -> Result<TriggerRule> {
    match schedule {
        Schedule::Daily { time, timezone } => {
            let (hour, minute) = parse_hhmm(time)?;
            let tz = parse_tz(timezone.as_deref().unwrap_or(default_tz))?;
            // The cron crate wants a seconds field.
            let expression = format!("0 {minute} {hour} * * *");
            let schedule = CronSchedule::from_str(&expression)
                .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
            Ok(TriggerRule::Cron { schedule, tz })
        }
        Schedule::Interval { minutes } => {
            if *minutes < 1 {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "interval must be at least 1 minute, got {minutes}"
                )));
            }
            Ok(TriggerRule::Every { minutes: *minutes })
        }
        Schedule::Cron { expression } => {
            let normalized = normalize_cron(expression);
            let schedule = CronSchedule::from_str(&normalized).map_err(|e| {
                SchedulerError::InvalidSchedule(format!("cron '{expression}': {e}"))
            })?;
            let tz = parse_tz(default_tz)?;
            Ok(TriggerRule::Cron { schedule, tz })
        }
    }
}

/// Best-effort next-fire estimate for display.
///
/// Disabled tasks report none. Interval tasks are unknown until their
/// first run. Raw cron expressions are treated as opaque.
pub fn next_fire(
    task: &ScheduledTask,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !task.enabled {
        return None;
    }
    match &task.schedule {
        Schedule::Daily { .. } => trigger_rule(&task.schedule, default_tz)
            .ok()?
            .next_after(now),
        Schedule::Interval { minutes } => task
            .last_run_at
            .map(|last| last + Duration::minutes(*minutes)),
        Schedule::Cron { .. } => None,
    }
}

/// The cron crate parses 6/7 fields (with seconds); user-facing
/// expressions are 5-field, so prefix the seconds.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn parse_hhmm(time: &str) -> Result<(u32, u32)> {
    let invalid = || SchedulerError::InvalidSchedule(format!("daily time must be HH:MM, got '{time}'"));
    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("unknown timezone '{name}'")))
}

//! Next-update timestamp calculation
//!
//! Single source of truth for `next_update`, used by the scheduler loop,
//! the recovery machinery and the command surface alike so every observer
//! sees the same instant.
//!
//! Two modes exist. Interval mode anchors on `last_update` (or now, on the
//! first run) plus the configured number of days. Fixed-time mode anchors
//! on a wall-clock time; the first run is always at least `update_days`
//! calendar days away, so with `update_days = 1` the first fire lands
//! tomorrow at the fixed time even when today's occurrence is still ahead.

use super::types::Timestamp;
use chrono::{Duration, NaiveTime};
use shared::config::SchedulingConfig;
use shared::time::at_local_time;

/// Calculate the next update time from configuration and state.
///
/// Deterministic in `(config, last_update, now)`; the result carries the
/// zone of `now`.
pub fn next_update_time(
    config: &SchedulingConfig,
    last_update: Option<Timestamp>,
    now: Timestamp,
) -> Timestamp {
    match config.fixed_time() {
        Some(fixed) => next_fixed_time(now, fixed, config.update_days(), last_update),
        None => next_interval_time(now, config.update_days(), last_update),
    }
}

/// Time remaining until the next update. Negative when the computed instant
/// is already in the past (interval mode reports overdue fires this way).
pub fn time_until_next_update(
    config: &SchedulingConfig,
    last_update: Option<Timestamp>,
    now: Timestamp,
) -> Duration {
    next_update_time(config, last_update, now) - now
}

/// Check whether an update is currently due.
pub fn is_update_due(
    config: &SchedulingConfig,
    last_update: Option<Timestamp>,
    now: Timestamp,
) -> bool {
    now >= next_update_time(config, last_update, now)
}

/// Validate that a computed schedule time is reasonable: strictly in the
/// future and no more than a year away.
pub fn is_valid_schedule_time(schedule_time: Timestamp, now: Timestamp) -> bool {
    schedule_time > now && schedule_time <= now + Duration::days(365)
}

/// Validate a stored `next_update` against the calculator's expectations.
///
/// Returns a list of issues: a stored time in the past, one further out
/// than `2 × update_days`, or an interval to `last_update` that deviates
/// from `update_days` beyond tolerance (±1 day in fixed-time mode, one
/// second in interval mode).
pub fn validate_schedule_integrity(
    config: &SchedulingConfig,
    last_update: Option<Timestamp>,
    stored_next: Option<Timestamp>,
    now: Timestamp,
) -> Vec<String> {
    let mut issues = Vec::new();

    let Some(next) = stored_next else {
        return issues;
    };

    if next <= now {
        issues.push(format!("Next update time {next} is in the past"));
    }

    let max_future = now + Duration::days(i64::from(config.update_days()) * 2);
    if next > max_future {
        issues.push(format!(
            "Next update time {} is too far in the future (more than {} days)",
            next,
            config.update_days() * 2
        ));
    }

    if let Some(last) = last_update {
        let expected = Duration::days(i64::from(config.update_days()));
        let actual = next - last;
        let tolerance = if config.is_fixed_time_based() {
            Duration::days(1)
        } else {
            Duration::seconds(1)
        };
        if (actual - expected).abs() > tolerance {
            issues.push(format!(
                "Inconsistent interval: expected ~{} days, got {} days",
                expected.num_days(),
                actual.num_days()
            ));
        }
    }

    issues
}

/// Next update for interval-based scheduling.
///
/// With history this is `last_update + update_days` even when that instant
/// is already past; the caller decides whether to replay. Without history
/// the interval starts from now.
fn next_interval_time(now: Timestamp, update_days: u32, last_update: Option<Timestamp>) -> Timestamp {
    let interval = Duration::days(i64::from(update_days));
    match last_update {
        Some(last) => last.with_timezone(&now.timezone()) + interval,
        None => now + interval,
    }
}

/// Next update for fixed-time scheduling.
///
/// With history: the fixed time on `last_update.date + update_days`,
/// advanced in `update_days` steps until it is in the future. Without
/// history: the fixed time on `now.date + update_days` — never today, which
/// is what guarantees the first-run minimum spacing.
fn next_fixed_time(
    now: Timestamp,
    fixed: NaiveTime,
    update_days: u32,
    last_update: Option<Timestamp>,
) -> Timestamp {
    let zone = now.timezone();
    let step = i64::from(update_days);

    match last_update {
        Some(last) => {
            let last = last.with_timezone(&zone);
            let mut date = last.date_naive() + Duration::days(step);
            let mut candidate = at_local_time(&zone, date, fixed);
            while candidate <= now {
                date += Duration::days(step);
                candidate = at_local_time(&zone, date, fixed);
            }
            candidate
        }
        None => {
            let date = now.date_naive() + Duration::days(step);
            at_local_time(&zone, date, fixed)
        }
    }
}

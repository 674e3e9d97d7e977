//! Zone-aware time primitives for the graphing bot
//!
//! All components obtain the current time and perform zone conversions
//! through the [`Clock`] defined here; nothing else calls process time
//! directly. The module also renders chat-service timestamp tokens and
//! parses the fixed-update-time configuration format.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

/// Sentinel value that disables fixed-time scheduling.
pub const FIXED_TIME_DISABLED: &str = "disabled";

static SYSTEM_ZONE: OnceLock<Tz> = OnceLock::new();

static FIXED_TIME_RE: OnceLock<Regex> = OnceLock::new();

fn fixed_time_re() -> &'static Regex {
    FIXED_TIME_RE
        .get_or_init(|| Regex::new(r"^([01]?[0-9]|2[0-3]):([0-5][0-9])$").expect("static regex"))
}

/// Resolve the system time zone.
///
/// Resolution order: the `TZ` environment variable, then `/etc/timezone`,
/// then UTC. Invalid zone names fall through to the next source.
pub fn system_zone() -> Tz {
    *SYSTEM_ZONE.get_or_init(|| {
        if let Ok(name) = std::env::var("TZ") {
            if let Ok(zone) = name.trim().parse::<Tz>() {
                return zone;
            }
        }
        if let Ok(contents) = std::fs::read_to_string("/etc/timezone") {
            if let Ok(zone) = contents.trim().parse::<Tz>() {
                return zone;
            }
        }
        Tz::UTC
    })
}

/// Zone-aware clock handed to every component that needs the current time.
///
/// Production code constructs it with [`Clock::system`]; tests pin a zone
/// with [`Clock::with_zone`] so calculations are deterministic.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    zone: Tz,
}

impl Clock {
    /// Clock in the system time zone.
    pub fn system() -> Self {
        Self {
            zone: system_zone(),
        }
    }

    /// Clock pinned to an explicit zone.
    pub fn with_zone(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Current time in the clock's zone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.zone)
    }

    /// Attach the clock's zone to a naive datetime.
    ///
    /// On a fall-back ambiguity the first occurrence is chosen; inside a
    /// spring-forward gap the next valid instant is returned.
    pub fn ensure_zone_aware(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        resolve_local(&self.zone, naive)
    }

    /// Convert any zone-aware timestamp into the clock's zone.
    pub fn to_system_zone<Z: TimeZone>(&self, t: &DateTime<Z>) -> DateTime<Tz> {
        t.with_timezone(&self.zone)
    }

    /// Parse an ISO-8601 timestamp with offset and convert it into the
    /// clock's zone.
    pub fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Tz>> {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid timestamp: {raw}"))?;
        Ok(parsed.with_timezone(&self.zone))
    }
}

/// Resolve a local datetime in a zone, applying the DST policy: first
/// occurrence on fall-back ambiguity, next valid instant on spring-forward
/// gaps.
pub fn resolve_local(zone: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, _second) => first,
        LocalResult::None => {
            // Gap: probe forward in minute steps until the wall clock exists
            // again. Gaps are bounded (at most a few hours in any zone).
            let mut candidate = naive;
            for _ in 0..240 {
                candidate += Duration::minutes(1);
                if let LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) =
                    zone.from_local_datetime(&candidate)
                {
                    return dt;
                }
            }
            zone.from_utc_datetime(&naive)
        }
    }
}

/// Combine a calendar date with a wall-clock time in a zone.
pub fn at_local_time(zone: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    resolve_local(zone, date.and_time(time))
}

/// Check whether a fixed-time string is valid (`HH:MM` or the disable
/// sentinel).
pub fn is_valid_fixed_time(value: &str) -> bool {
    parse_fixed_time(value).is_ok()
}

/// Parse a fixed-time configuration string.
///
/// Returns `None` for the disable sentinel, the parsed wall-clock time for
/// `HH:MM`, and an error for anything else.
pub fn parse_fixed_time(value: &str) -> Result<Option<NaiveTime>> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case(FIXED_TIME_DISABLED) {
        return Ok(None);
    }

    let captures = fixed_time_re()
        .captures(trimmed)
        .ok_or_else(|| anyhow!("Invalid fixed time format: {value}"))?;
    let hours: u32 = captures[1].parse().context("Invalid hour")?;
    let minutes: u32 = captures[2].parse().context("Invalid minute")?;

    NaiveTime::from_hms_opt(hours, minutes, 0)
        .map(Some)
        .with_context(|| format!("Invalid fixed time format: {value}"))
}

/// Chat-service timestamp rendering styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStyle {
    ShortTime,
    LongTime,
    ShortDate,
    LongDate,
    ShortDateTime,
    LongDateTime,
    Relative,
}

impl TimestampStyle {
    fn token(self) -> char {
        match self {
            TimestampStyle::ShortTime => 't',
            TimestampStyle::LongTime => 'T',
            TimestampStyle::ShortDate => 'd',
            TimestampStyle::LongDate => 'D',
            TimestampStyle::ShortDateTime => 'f',
            TimestampStyle::LongDateTime => 'F',
            TimestampStyle::Relative => 'R',
        }
    }
}

/// Render a timestamp as the chat service's inline token (`<t:unix:STYLE>`).
pub fn format_for_chat<Z: TimeZone>(t: &DateTime<Z>, style: TimestampStyle) -> String {
    format!("<t:{}:{}>", t.timestamp(), style.token())
}

/// Format a duration as a readable uptime string, largest unit first.
pub fn format_duration_human(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!(
            "{} hour{}",
            hours,
            if hours == 1 { "" } else { "s" }
        ));
    }
    if minutes > 0 {
        parts.push(format!(
            "{} minute{}",
            minutes,
            if minutes == 1 { "" } else { "s" }
        ));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!(
            "{} second{}",
            seconds,
            if seconds == 1 { "" } else { "s" }
        ));
    }

    parts.join(", ")
}

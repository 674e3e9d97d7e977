//! Tests for the zone-aware time primitives

use crate::time::{
    format_duration_human, format_for_chat, is_valid_fixed_time, parse_fixed_time, resolve_local,
    Clock, TimestampStyle, FIXED_TIME_DISABLED,
};
use chrono::{Duration, NaiveDate, NaiveTime, Offset, TimeZone, Timelike};
use chrono_tz::Tz;

fn berlin() -> Tz {
    "Europe/Berlin".parse().unwrap()
}

#[test]
fn test_parse_fixed_time_valid() {
    assert_eq!(
        parse_fixed_time("23:59").unwrap(),
        Some(NaiveTime::from_hms_opt(23, 59, 0).unwrap())
    );
    assert_eq!(
        parse_fixed_time("00:00").unwrap(),
        Some(NaiveTime::from_hms_opt(0, 0, 0).unwrap())
    );
    assert_eq!(
        parse_fixed_time("7:05").unwrap(),
        Some(NaiveTime::from_hms_opt(7, 5, 0).unwrap())
    );
}

#[test]
fn test_parse_fixed_time_disabled() {
    assert_eq!(parse_fixed_time(FIXED_TIME_DISABLED).unwrap(), None);
    assert_eq!(parse_fixed_time("Disabled").unwrap(), None);
}

#[test]
fn test_parse_fixed_time_invalid() {
    assert!(parse_fixed_time("25:00").is_err());
    assert!(parse_fixed_time("12:60").is_err());
    assert!(parse_fixed_time("noon").is_err());
    assert!(parse_fixed_time("12").is_err());
    assert!(parse_fixed_time("").is_err());
}

#[test]
fn test_is_valid_fixed_time() {
    assert!(is_valid_fixed_time("23:59"));
    assert!(is_valid_fixed_time("disabled"));
    assert!(!is_valid_fixed_time("24:00"));
}

#[test]
fn test_clock_now_carries_zone() {
    let clock = Clock::with_zone(berlin());
    assert_eq!(clock.now().timezone(), berlin());
}

#[test]
fn test_ensure_zone_aware_attaches_zone() {
    let clock = Clock::with_zone(berlin());
    let naive = NaiveDate::from_ymd_opt(2025, 7, 25)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap();
    let aware = clock.ensure_zone_aware(naive);
    assert_eq!(aware.timezone(), berlin());
    assert_eq!(aware.naive_local(), naive);
}

#[test]
fn test_to_system_zone_converts_instant() {
    let clock = Clock::with_zone(berlin());
    let utc = chrono_tz::UTC.with_ymd_and_hms(2025, 7, 25, 12, 0, 0).unwrap();
    let local = clock.to_system_zone(&utc);
    assert_eq!(local, utc);
    // Berlin is UTC+2 in July
    assert_eq!(local.hour(), 14);
}

#[test]
fn test_parse_timestamp_roundtrip() {
    let clock = Clock::with_zone(berlin());
    let t = berlin().with_ymd_and_hms(2025, 7, 25, 23, 59, 0).unwrap();
    let parsed = clock.parse_timestamp(&t.to_rfc3339()).unwrap();
    assert_eq!(parsed, t);
}

#[test]
fn test_parse_timestamp_rejects_garbage() {
    let clock = Clock::with_zone(berlin());
    assert!(clock.parse_timestamp("not a timestamp").is_err());
}

#[test]
fn test_spring_forward_gap_resolves_to_next_valid_instant() {
    // 2025-03-30 02:30 does not exist in Berlin; clocks jump 02:00 -> 03:00
    let naive = NaiveDate::from_ymd_opt(2025, 3, 30)
        .unwrap()
        .and_hms_opt(2, 30, 0)
        .unwrap();
    let resolved = resolve_local(&berlin(), naive);
    assert!(resolved.naive_local() > naive);
    assert_eq!(resolved.hour(), 3);
}

#[test]
fn test_fall_back_ambiguity_picks_first_occurrence() {
    // 2025-10-26 02:30 occurs twice in Berlin; the first is still CEST (+2)
    let naive = NaiveDate::from_ymd_opt(2025, 10, 26)
        .unwrap()
        .and_hms_opt(2, 30, 0)
        .unwrap();
    let resolved = resolve_local(&berlin(), naive);
    assert_eq!(resolved.offset().fix().local_minus_utc(), 2 * 3600);
}

#[test]
fn test_format_for_chat_tokens() {
    let t = chrono_tz::UTC.with_ymd_and_hms(2025, 7, 25, 12, 0, 0).unwrap();
    let unix = t.timestamp();
    assert_eq!(
        format_for_chat(&t, TimestampStyle::LongDateTime),
        format!("<t:{unix}:F>")
    );
    assert_eq!(
        format_for_chat(&t, TimestampStyle::Relative),
        format!("<t:{unix}:R>")
    );
    assert_eq!(
        format_for_chat(&t, TimestampStyle::ShortTime),
        format!("<t:{unix}:t>")
    );
}

#[test]
fn test_format_duration_human() {
    assert_eq!(format_duration_human(Duration::seconds(0)), "0 seconds");
    assert_eq!(format_duration_human(Duration::seconds(1)), "1 second");
    assert_eq!(
        format_duration_human(Duration::seconds(90061)),
        "1 day, 1 hour, 1 minute, 1 second"
    );
    assert_eq!(
        format_duration_human(Duration::seconds(2 * 86_400 + 3 * 60)),
        "2 days, 3 minutes"
    );
}

//! Tests for error classification and the circuit breaker

use super::ts;
use crate::scheduling::error_handling::{CircuitBreaker, ErrorClassifier};
use crate::scheduling::types::{CircuitState, ErrorKind, RetryPolicy};
use anyhow::anyhow;
use chrono::Duration;
use shared::BotError;

fn test_policy() -> RetryPolicy {
    RetryPolicy::new(
        3,
        std::time::Duration::from_millis(10),
        std::time::Duration::from_secs(1),
        2.0,
        false,
        3,
        std::time::Duration::from_millis(100),
        2,
    )
    .unwrap()
}

#[test]
fn test_classifier_typed_errors() {
    let cases = [
        (BotError::TransientService("x".into()), ErrorKind::Transient),
        (BotError::Render("x".into()), ErrorKind::Transient),
        (BotError::RateLimited("x".into()), ErrorKind::RateLimited),
        (BotError::PermanentService("x".into()), ErrorKind::Permanent),
        (BotError::Permission("x".into()), ErrorKind::Permanent),
        (BotError::Config("x".into()), ErrorKind::Permanent),
        (BotError::Upload("x".into()), ErrorKind::Permanent),
        (BotError::State("x".into()), ErrorKind::Unknown),
    ];
    for (error, expected) in cases {
        assert_eq!(ErrorClassifier::classify(&anyhow!(error)), expected);
    }
}

#[test]
fn test_classifier_keyword_fallback() {
    assert_eq!(
        ErrorClassifier::classify(&anyhow!("connection reset by peer")),
        ErrorKind::Transient
    );
    assert_eq!(
        ErrorClassifier::classify(&anyhow!("DNS lookup failed").context("fetch")),
        ErrorKind::Transient
    );
    assert_eq!(
        ErrorClassifier::classify(&anyhow!("too many requests, slow down")),
        ErrorKind::RateLimited
    );
    assert_eq!(
        ErrorClassifier::classify(&anyhow!("server said: unauthorized")),
        ErrorKind::Permanent
    );
    assert_eq!(
        ErrorClassifier::classify(&anyhow!("something odd happened")),
        ErrorKind::Unknown
    );
}

#[test]
fn test_breaker_opens_after_threshold_failures() {
    let mut breaker = CircuitBreaker::new(test_policy());
    let now = ts(2025, 7, 16, 12, 0, 0);

    assert!(breaker.should_allow(now));
    breaker.record_failure(now, ErrorKind::Transient);
    breaker.record_failure(now, ErrorKind::Transient);
    assert_eq!(breaker.state(), CircuitState::Closed);

    breaker.record_failure(now, ErrorKind::Transient);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.should_allow(now + Duration::milliseconds(50)));
}

#[test]
fn test_breaker_recovers_through_half_open() {
    let mut breaker = CircuitBreaker::new(test_policy());
    let opened = ts(2025, 7, 16, 12, 0, 0);
    for _ in 0..3 {
        breaker.record_failure(opened, ErrorKind::Transient);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // After the recovery timeout the next probe is admitted
    let probe_time = opened + Duration::milliseconds(200);
    assert!(breaker.should_allow(probe_time));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_success(probe_time);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.record_success(probe_time);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.metrics().circuit_opened_at.is_none());
}

#[test]
fn test_breaker_half_open_failure_reopens() {
    let mut breaker = CircuitBreaker::new(test_policy());
    let opened = ts(2025, 7, 16, 12, 0, 0);
    for _ in 0..3 {
        breaker.record_failure(opened, ErrorKind::Transient);
    }

    let probe_time = opened + Duration::milliseconds(150);
    assert!(breaker.should_allow(probe_time));
    breaker.record_failure(probe_time, ErrorKind::Transient);
    assert_eq!(breaker.state(), CircuitState::Open);
    // The open window restarts from the probe failure
    assert_eq!(breaker.metrics().circuit_opened_at, Some(probe_time));
    assert!(!breaker.should_allow(probe_time + Duration::milliseconds(50)));
}

#[test]
fn test_breaker_success_resets_failure_streak() {
    let mut breaker = CircuitBreaker::new(test_policy());
    let now = ts(2025, 7, 16, 12, 0, 0);

    breaker.record_failure(now, ErrorKind::Transient);
    breaker.record_failure(now, ErrorKind::Transient);
    breaker.record_success(now);
    breaker.record_failure(now, ErrorKind::Transient);
    breaker.record_failure(now, ErrorKind::Transient);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_retry_policy_validation() {
    assert!(RetryPolicy::new(
        0,
        std::time::Duration::from_secs(1),
        std::time::Duration::from_secs(2),
        2.0,
        false,
        1,
        std::time::Duration::ZERO,
        1
    )
    .is_err());

    assert!(RetryPolicy::new(
        1,
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(2),
        2.0,
        false,
        1,
        std::time::Duration::ZERO,
        1
    )
    .is_err());

    assert!(RetryPolicy::new(
        1,
        std::time::Duration::from_secs(1),
        std::time::Duration::from_secs(2),
        0.5,
        false,
        1,
        std::time::Duration::ZERO,
        1
    )
    .is_err());
}

#[test]
fn test_retry_delay_curve() {
    let mut policy = test_policy();
    policy.base_delay = std::time::Duration::from_secs(1);
    policy.max_delay = std::time::Duration::from_secs(300);

    assert_eq!(policy.retry_delay_exact(0), std::time::Duration::ZERO);
    assert_eq!(policy.retry_delay_exact(1), std::time::Duration::from_secs(1));
    assert_eq!(policy.retry_delay_exact(2), std::time::Duration::from_secs(2));
    assert_eq!(policy.retry_delay_exact(3), std::time::Duration::from_secs(4));

    // Monotone non-decreasing and bounded by max_delay
    let mut previous = std::time::Duration::ZERO;
    for k in 0..20 {
        let delay = policy.retry_delay_exact(k);
        assert!(delay >= previous);
        assert!(delay <= policy.max_delay);
        previous = delay;
    }
    assert_eq!(policy.retry_delay_exact(15), policy.max_delay);
}

#[test]
fn test_retry_delay_jitter_bounds() {
    let mut policy = test_policy();
    policy.jitter = true;
    policy.base_delay = std::time::Duration::from_secs(4);

    for _ in 0..50 {
        let exact = policy.retry_delay_exact(2).as_secs_f64();
        let jittered = policy.retry_delay(2).as_secs_f64();
        assert!(jittered >= exact * 0.75 - f64::EPSILON);
        assert!(jittered <= exact * 1.25 + f64::EPSILON);
    }
}

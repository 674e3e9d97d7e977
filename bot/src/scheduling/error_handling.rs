//! Error classification and circuit breaker for the scheduling system
//!
//! The classifier maps a raised error to a retry class; the circuit breaker
//! gates execution after sustained failure. Classification is advisory:
//! callers decide what to do with it.

use super::types::{CircuitState, ErrorKind, ErrorMetrics, RetryPolicy, Timestamp};
use shared::BotError;
use tracing::{info, warn};

/// Classifies errors for appropriate retry handling.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error to determine the retry strategy.
    ///
    /// Typed [`BotError`] variants are mapped directly; everything else
    /// falls back to keyword matching on the error message chain.
    pub fn classify(error: &anyhow::Error) -> ErrorKind {
        if let Some(bot_error) = error.downcast_ref::<BotError>() {
            match bot_error {
                BotError::TransientService(_) | BotError::Render(_) => {
                    return ErrorKind::Transient
                }
                BotError::RateLimited(_) => return ErrorKind::RateLimited,
                BotError::PermanentService(_)
                | BotError::Config(_)
                | BotError::Permission(_)
                | BotError::Upload(_) => return ErrorKind::Permanent,
                BotError::State(_) | BotError::Scheduling(_) => return ErrorKind::Unknown,
            }
        }

        let message = format!("{error:#}").to_lowercase();

        // Network and timeout errors are usually transient
        const TRANSIENT_KEYWORDS: [&str; 9] = [
            "timeout",
            "timed out",
            "connection",
            "network",
            "dns",
            "socket",
            "temporar",
            "unavailable",
            "gateway",
        ];
        if TRANSIENT_KEYWORDS.iter().any(|kw| message.contains(kw)) {
            return ErrorKind::Transient;
        }

        const RATE_LIMIT_KEYWORDS: [&str; 4] =
            ["rate limit", "too many requests", "quota", "throttle"];
        if RATE_LIMIT_KEYWORDS.iter().any(|kw| message.contains(kw)) {
            return ErrorKind::RateLimited;
        }

        // Authentication and configuration errors are permanent
        const PERMANENT_KEYWORDS: [&str; 8] = [
            "unauthorized",
            "forbidden",
            "authentication",
            "permission",
            "invalid api",
            "bad request",
            "not found",
            "configuration",
        ];
        if PERMANENT_KEYWORDS.iter().any(|kw| message.contains(kw)) {
            return ErrorKind::Permanent;
        }

        ErrorKind::Unknown
    }
}

/// Circuit breaker preventing cascading failures.
///
/// Closed admits requests; Open denies them until `recovery_timeout` has
/// elapsed; HalfOpen admits a probe and closes again after
/// `success_threshold` consecutive successes.
#[derive(Debug)]
pub struct CircuitBreaker {
    policy: RetryPolicy,
    metrics: ErrorMetrics,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: ErrorMetrics::default(),
            state: CircuitState::Closed,
        }
    }

    /// Check whether a request should be allowed through the circuit.
    ///
    /// An Open circuit whose recovery timeout has elapsed transitions to
    /// HalfOpen and admits the probe.
    pub fn should_allow(&mut self, now: Timestamp) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovery =
                    chrono::Duration::from_std(self.policy.recovery_timeout).unwrap_or_default();
                if let Some(opened_at) = self.metrics.circuit_opened_at {
                    if now - opened_at >= recovery {
                        self.transition_to_half_open(now);
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self, now: Timestamp) {
        self.metrics.record_success(now);

        if self.state == CircuitState::HalfOpen
            && self.metrics.consecutive_successes >= self.policy.success_threshold
        {
            self.transition_to_closed();
        }
    }

    pub fn record_failure(&mut self, now: Timestamp, kind: ErrorKind) {
        self.metrics.record_failure(now, kind);

        match self.state {
            CircuitState::Closed => {
                if self.metrics.consecutive_failures >= self.policy.failure_threshold {
                    self.transition_to_open(now);
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(now),
            CircuitState::Open => {}
        }
    }

    fn transition_to_open(&mut self, now: Timestamp) {
        self.state = CircuitState::Open;
        self.metrics.circuit_opened_at = Some(now);
        warn!(
            "Circuit breaker opened after {} consecutive failures",
            self.metrics.consecutive_failures
        );
    }

    fn transition_to_half_open(&mut self, now: Timestamp) {
        self.state = CircuitState::HalfOpen;
        self.metrics.circuit_last_test = Some(now);
        info!("Circuit breaker transitioning to half-open for testing");
    }

    fn transition_to_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.metrics.circuit_opened_at = None;
        info!(
            "Circuit breaker closed after {} consecutive successes",
            self.metrics.consecutive_successes
        );
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn metrics(&self) -> &ErrorMetrics {
        &self.metrics
    }
}

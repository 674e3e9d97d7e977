//! Core types for the scheduling system
//!
//! Fundamental data structures shared by the scheduler, the task supervisor
//! and the recovery machinery: task status, error classification, retry
//! policy, error metrics and the scheduler's own state record.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use rand::Rng;
use shared::BotError;
use std::fmt;

/// Zone-aware timestamp used throughout the scheduling system.
pub type Timestamp = DateTime<Tz>;

/// Status of a supervised background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    Running,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Classification of an error for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Temporary errors that may resolve on retry (network, timeout)
    Transient,
    /// Errors that won't resolve with retry (config, auth)
    Permanent,
    /// Rate limiting errors
    RateLimited,
    /// Unclassified errors
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, rejecting requests
    Open,
    /// Testing if the service recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{label}")
    }
}

/// Configuration for retry policies and the circuit breaker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: std::time::Duration,
    /// Upper bound for any computed delay
    pub max_delay: std::time::Duration,
    /// Base for exponential backoff
    pub exponential_base: f64,
    /// Multiply delays by a uniform factor in [0.75, 1.25]
    pub jitter: bool,

    // Circuit breaker settings
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a half-open probe
    pub recovery_timeout: std::time::Duration,
    /// Consecutive successes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(300),
            exponential_base: 2.0,
            jitter: true,
            failure_threshold: 5,
            recovery_timeout: std::time::Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl RetryPolicy {
    /// Construct a validated retry policy.
    pub fn new(
        max_attempts: u32,
        base_delay: std::time::Duration,
        max_delay: std::time::Duration,
        exponential_base: f64,
        jitter: bool,
        failure_threshold: u32,
        recovery_timeout: std::time::Duration,
        success_threshold: u32,
    ) -> Result<Self, BotError> {
        let policy = Self {
            max_attempts,
            base_delay,
            max_delay,
            exponential_base,
            jitter,
            failure_threshold,
            recovery_timeout,
            success_threshold,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), BotError> {
        if self.max_attempts < 1 {
            return Err(BotError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(BotError::Config(
                "max_delay must be >= base_delay".to_string(),
            ));
        }
        if self.exponential_base < 1.0 {
            return Err(BotError::Config(
                "exponential_base must be >= 1".to_string(),
            ));
        }
        if self.failure_threshold < 1 {
            return Err(BotError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold < 1 {
            return Err(BotError::Config(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Compute the retry delay for the given consecutive failure count.
    ///
    /// `min(base_delay * exponential_base^(k-1), max_delay)`, multiplied by
    /// a uniform factor in [0.75, 1.25] when jitter is enabled. A count of
    /// zero yields no delay.
    pub fn retry_delay(&self, consecutive_failures: u32) -> std::time::Duration {
        if consecutive_failures == 0 {
            return std::time::Duration::ZERO;
        }

        let exponent = consecutive_failures.saturating_sub(1);
        let mut delay =
            self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent as i32);
        delay = delay.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let factor: f64 = rand::rng().random_range(0.75..=1.25);
            delay *= factor;
        }

        std::time::Duration::from_secs_f64(delay)
    }

    /// The deterministic delay curve without jitter, used by integrity
    /// checks and tests.
    pub fn retry_delay_exact(&self, consecutive_failures: u32) -> std::time::Duration {
        if consecutive_failures == 0 {
            return std::time::Duration::ZERO;
        }
        let exponent = consecutive_failures.saturating_sub(1);
        let delay =
            self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent as i32);
        std::time::Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Metrics for error tracking, including the circuit breaker bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ErrorMetrics {
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,

    // Error class counters
    pub transient_errors: u64,
    pub permanent_errors: u64,
    pub rate_limit_errors: u64,
    pub unknown_errors: u64,

    // Timing metrics
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    pub last_attempt: Option<Timestamp>,

    // Circuit breaker bookkeeping
    pub circuit_opened_at: Option<Timestamp>,
    pub circuit_last_test: Option<Timestamp>,
}

impl ErrorMetrics {
    pub fn record_attempt(&mut self, now: Timestamp) {
        self.total_attempts += 1;
        self.last_attempt = Some(now);
    }

    pub fn record_success(&mut self, now: Timestamp) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(now);
    }

    pub fn record_failure(&mut self, now: Timestamp, kind: ErrorKind) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_failure = Some(now);

        match kind {
            ErrorKind::Transient => self.transient_errors += 1,
            ErrorKind::Permanent => self.permanent_errors += 1,
            ErrorKind::RateLimited => self.rate_limit_errors += 1,
            ErrorKind::Unknown => self.unknown_errors += 1,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_attempts as f64
        }
    }
}

/// State tracking for the update scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    pub last_update: Option<Timestamp>,
    pub next_update: Option<Timestamp>,
    pub is_running: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl ScheduleState {
    /// Record a successful update. The failure counter resets but the last
    /// failure timestamp is kept for historical tracking.
    pub fn record_successful_update(&mut self, update_time: Timestamp) {
        self.last_update = Some(update_time);
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, failure_time: Timestamp, error: &str) {
        self.consecutive_failures += 1;
        self.last_failure = Some(failure_time);
        self.last_error = Some(error.to_string());
    }

    pub fn set_next_update(&mut self, next_time: Timestamp) {
        self.next_update = Some(next_time);
    }

    pub fn start_scheduler(&mut self) {
        self.is_running = true;
    }

    pub fn stop_scheduler(&mut self) {
        self.is_running = false;
    }
}

/// Why a missed fire was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedFireReason {
    /// The persisted next_update elapsed while the process was down
    MissedScheduled,
    /// An interval boundary passed without a run
    IntervalBackfill,
    /// Generic downtime detection
    Downtime,
}

impl fmt::Display for MissedFireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MissedFireReason::MissedScheduled => "missed_scheduled",
            MissedFireReason::IntervalBackfill => "interval_backfill",
            MissedFireReason::Downtime => "downtime",
        };
        write!(f, "{label}")
    }
}

/// A scheduled instant that elapsed while the process was down.
#[derive(Debug, Clone)]
pub struct MissedFire {
    pub scheduled_time: Timestamp,
    pub detected_at: Timestamp,
    pub reason: MissedFireReason,
}

/// Entry in the supervisor's bounded audit log.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub task: String,
    pub event: String,
    pub message: String,
}

/// How long a wait may run before the owning task must stamp a heartbeat.
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);

/// A task is considered stale when its heartbeat is older than this.
pub const STALE_THRESHOLD: Duration = Duration::minutes(5);

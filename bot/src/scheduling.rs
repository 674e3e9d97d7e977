//! Update scheduling for the graphing bot
//!
//! The [`UpdateScheduler`] owns the schedule state and runs one supervised
//! task (`update_scheduler`) that waits for the next computed instant and
//! then drives the update pipeline with retries, circuit-breaker gating and
//! persistence. Long waits are chunked so the task can stamp its supervisor
//! heartbeat, and `trigger_update` records the new `last_update` and
//! recomputes `next_update` before the render callback runs, so any embed
//! produced during the run already shows the upcoming fire.

pub mod calc;
pub mod error_handling;
pub mod recovery;
pub mod supervisor;
pub mod types;

use anyhow::{anyhow, Result};
use shared::config::SchedulingConfig;
use shared::time::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::state::StateStore;
use error_handling::{CircuitBreaker, ErrorClassifier};
use recovery::RecoveryManager;
use supervisor::{TaskBody, TaskSupervisor, SCHEDULER_TASK};
use types::{
    CircuitState, ErrorKind, ErrorMetrics, MissedFire, RetryPolicy, ScheduleState, TaskStatus,
    Timestamp, HEARTBEAT_INTERVAL,
};

/// Callback invoked for every update run; the orchestrator's entry point.
pub type UpdateCallback = Arc<dyn Fn() -> supervisor::TaskFuture + Send + Sync>;

/// Timeout for a single update callback invocation.
const UPDATE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

/// Wait applied while failure backoff is active before re-checking.
const BACKOFF_RECHECK: std::time::Duration = std::time::Duration::from_secs(300);

/// Outcome of a chunked wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Elapsed,
    Shutdown,
    ConfigChanged,
}

/// Snapshot of scheduler status for the command surface.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub is_started: bool,
    pub is_running: bool,
    pub last_update: Option<Timestamp>,
    pub next_update: Option<Timestamp>,
    pub consecutive_failures: u32,
    pub last_failure: Option<Timestamp>,
    pub update_days: Option<u32>,
    pub fixed_update_time: Option<String>,
    pub supervisor_healthy: bool,
    pub task_status: Option<TaskStatus>,
    pub breaker_state: CircuitState,
}

/// Result of a forced recovery pass.
#[derive(Debug)]
pub struct RecoveryReport {
    pub recovery_time: Timestamp,
    pub missed_fires: Vec<MissedFire>,
    pub state_after: ScheduleState,
}

struct SchedulerCore {
    clock: Clock,
    policy: RetryPolicy,
    supervisor: TaskSupervisor,
    store: Arc<StateStore>,
    recovery: RecoveryManager,
    state: RwLock<ScheduleState>,
    config: RwLock<Option<SchedulingConfig>>,
    callback: RwLock<Option<UpdateCallback>>,
    breaker: Mutex<CircuitBreaker>,
    metrics: Mutex<ErrorMetrics>,
    // Serialises the scheduled path and the manual force path so only one
    // trigger_update is in flight at a time.
    update_lock: Mutex<()>,
    config_changed: Notify,
    is_started: AtomicBool,
    recovery_enabled: AtomicBool,
}

/// Scheduler handle. Cheap to clone; all clones share the same core.
#[derive(Clone)]
pub struct UpdateScheduler {
    core: Arc<SchedulerCore>,
}

impl UpdateScheduler {
    pub fn new(clock: Clock, policy: RetryPolicy, store: Arc<StateStore>) -> Self {
        let supervisor = TaskSupervisor::new(clock, policy.clone());
        Self {
            core: Arc::new(SchedulerCore {
                clock,
                policy: policy.clone(),
                supervisor,
                recovery: RecoveryManager::new(Arc::clone(&store)),
                store,
                state: RwLock::new(ScheduleState::default()),
                config: RwLock::new(None),
                callback: RwLock::new(None),
                breaker: Mutex::new(CircuitBreaker::new(policy)),
                metrics: Mutex::new(ErrorMetrics::default()),
                update_lock: Mutex::new(()),
                config_changed: Notify::new(),
                is_started: AtomicBool::new(false),
                recovery_enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Set the callback invoked for every update run.
    pub async fn set_update_callback(&self, callback: UpdateCallback) {
        *self.core.callback.write().await = Some(callback);
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.core.recovery_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Start the scheduler with the given configuration.
    ///
    /// When recovery is enabled the persisted state is loaded first and
    /// reconciled: missed fires are detected and replayed through the
    /// callback, and inconsistent state is repaired.
    pub async fn start(&self, new_config: SchedulingConfig) -> Result<()> {
        if self.core.is_started.swap(true, Ordering::SeqCst) {
            warn!("Update scheduler already running");
            return Ok(());
        }

        info!(
            "Starting update scheduler (every {} days, fixed time: {})",
            new_config.update_days(),
            new_config.fixed_update_time()
        );

        if self.core.recovery_enabled.load(Ordering::SeqCst) {
            self.startup_recovery(&new_config).await;
        } else {
            *self.core.state.write().await = ScheduleState::default();
        }
        *self.core.config.write().await = Some(new_config.clone());

        self.core.supervisor.start().await;

        let core = Arc::clone(&self.core);
        let body: TaskBody = Arc::new(move || {
            let core = Arc::clone(&core);
            Box::pin(async move { scheduler_loop(core).await })
        });
        self.core.supervisor.add(SCHEDULER_TASK, body, true).await;

        self.core.state.write().await.start_scheduler();

        if self.core.recovery_enabled.load(Ordering::SeqCst) {
            let state = self.core.state.read().await.clone();
            if let Err(e) = self.core.store.save(&state, Some(&new_config)) {
                error!("Failed to save initial state: {:#}", e);
            }
        }

        Ok(())
    }

    /// Load persisted state and reconcile it against the new configuration.
    async fn startup_recovery(&self, new_config: &SchedulingConfig) {
        info!("Performing startup recovery");

        let (loaded_state, loaded_config) = self.core.store.load();
        if let Some(previous) = &loaded_config {
            if previous != new_config {
                info!("Configuration changed since last run");
            }
        }
        *self.core.state.write().await = loaded_state;

        let now = self.core.clock.now();
        let callback = self.core.callback.read().await.clone();
        let mut state = self.core.state.write().await;
        let result = match callback {
            Some(ref cb) => {
                let replay = move || cb();
                self.core
                    .recovery
                    .perform_recovery(now, &mut state, new_config, Some(&replay))
                    .await
            }
            None => {
                self.core
                    .recovery
                    .perform_recovery(now, &mut state, new_config, None)
                    .await
            }
        };

        match result {
            Ok(missed) if !missed.is_empty() => {
                info!("Recovery completed: replayed {} missed fires", missed.len());
            }
            Ok(_) => debug!("Recovery completed with no missed fires"),
            Err(e) => {
                error!("Recovery failed, starting with fresh state: {:#}", e);
                *state = ScheduleState::default();
            }
        }
    }

    /// Stop the scheduler and persist the final state.
    pub async fn stop(&self) {
        if !self.core.is_started.swap(false, Ordering::SeqCst) {
            debug!("Update scheduler not running");
            return;
        }

        info!("Stopping update scheduler");
        self.core.supervisor.stop().await;
        self.core.state.write().await.stop_scheduler();

        if self.core.recovery_enabled.load(Ordering::SeqCst) {
            let state = self.core.state.read().await.clone();
            let config = self.core.config.read().await.clone();
            if let Err(e) = self.core.store.save(&state, config.as_ref()) {
                error!("Failed to save state during shutdown: {:#}", e);
            }
        }

        info!("Update scheduler stopped");
    }

    /// Force an immediate update outside of the schedule.
    ///
    /// The run goes through the same critical section as scheduled fires,
    /// so the two paths never render concurrently and the natural cadence
    /// continues from the manual run's logical update time.
    pub async fn force_update(&self) -> Result<()> {
        info!("Forcing immediate graph update");
        trigger_update(&self.core).await
    }

    /// Apply a new scheduling configuration.
    ///
    /// The next update is recomputed from the current `last_update`, the
    /// state is persisted and the scheduler loop is woken so it re-reads
    /// the schedule.
    pub async fn update_config(&self, config: SchedulingConfig) -> Result<()> {
        let now = self.core.clock.now();
        let mut state = self.core.state.write().await;
        let next = calc::next_update_time(&config, state.last_update, now);
        state.set_next_update(next);
        let snapshot = state.clone();
        drop(state);

        *self.core.config.write().await = Some(config.clone());
        if self.core.recovery_enabled.load(Ordering::SeqCst) {
            self.core.store.save(&snapshot, Some(&config))?;
        }
        self.core.config_changed.notify_waiters();
        info!("Scheduler configuration updated, next update: {}", next);
        Ok(())
    }

    /// Force a recovery pass and return what it found and repaired.
    pub async fn force_recovery(&self) -> Result<RecoveryReport> {
        let config = self
            .core
            .config
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Cannot perform recovery: no configuration available"))?;

        info!("Forcing recovery operation");
        let now = self.core.clock.now();
        let callback = self.core.callback.read().await.clone();
        let mut state = self.core.state.write().await;

        let missed = match callback {
            Some(ref cb) => {
                let replay = move || cb();
                self.core
                    .recovery
                    .perform_recovery(now, &mut state, &config, Some(&replay))
                    .await?
            }
            None => {
                self.core
                    .recovery
                    .perform_recovery(now, &mut state, &config, None)
                    .await?
            }
        };

        Ok(RecoveryReport {
            recovery_time: now,
            missed_fires: missed,
            state_after: state.clone(),
        })
    }

    /// Validate schedule integrity and repair when necessary, returning the
    /// issues that were found.
    pub async fn validate_and_repair(&self) -> Result<Vec<String>> {
        let config = self
            .core
            .config
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Cannot validate schedule: no configuration available"))?;

        let now = self.core.clock.now();
        let mut state = self.core.state.write().await;
        let issues = self.core.recovery.validate_integrity(now, &state, &config);

        if !issues.is_empty() {
            info!("Schedule integrity issues detected, performing repairs");
            self.core.recovery.repair_state(now, &mut state, &config);
            if self.core.recovery_enabled.load(Ordering::SeqCst) {
                self.core.store.save(&state, Some(&config))?;
            }
        }

        Ok(issues)
    }

    pub async fn next_update_time(&self) -> Option<Timestamp> {
        if !self.core.is_started.load(Ordering::SeqCst) {
            return None;
        }
        self.core.state.read().await.next_update
    }

    pub async fn last_update_time(&self) -> Option<Timestamp> {
        self.core.state.read().await.last_update
    }

    /// Snapshot of the schedule state for observers.
    pub async fn state_snapshot(&self) -> ScheduleState {
        self.core.state.read().await.clone()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.core.state.read().await.clone();
        let config = self.core.config.read().await.clone();
        SchedulerStatus {
            is_started: self.core.is_started.load(Ordering::SeqCst),
            is_running: state.is_running,
            last_update: state.last_update,
            next_update: state.next_update,
            consecutive_failures: state.consecutive_failures,
            last_failure: state.last_failure,
            update_days: config.as_ref().map(|c| c.update_days()),
            fixed_update_time: config.map(|c| c.fixed_update_time().to_string()),
            supervisor_healthy: self.core.supervisor.is_healthy().await,
            task_status: self.core.supervisor.status(SCHEDULER_TASK).await,
            breaker_state: self.core.breaker.lock().await.state(),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        if !self.core.is_started.load(Ordering::SeqCst) {
            return false;
        }
        if !self.core.supervisor.is_healthy().await {
            return false;
        }
        matches!(
            self.core.supervisor.status(SCHEDULER_TASK).await,
            Some(TaskStatus::Running)
        )
    }

    pub async fn audit(&self, limit: usize) -> Vec<types::AuditEntry> {
        self.core.supervisor.audit(limit).await
    }

    /// Reset error state and the circuit breaker.
    pub async fn reset_error_state(&self) {
        info!("Resetting error state and circuit breaker");
        *self.core.metrics.lock().await = ErrorMetrics::default();
        *self.core.breaker.lock().await = CircuitBreaker::new(self.core.policy.clone());
        let mut state = self.core.state.write().await;
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.core.supervisor
    }

    /// Trigger an update directly. Exposed for the test suite; production
    /// paths go through the scheduler loop or [`Self::force_update`].
    #[doc(hidden)]
    pub async fn trigger_update_for_testing(&self) -> Result<()> {
        trigger_update(&self.core).await
    }

    /// Install a schedule state directly. Test-only seam.
    #[doc(hidden)]
    pub async fn set_state_for_testing(&self, state: ScheduleState) {
        *self.core.state.write().await = state;
    }

    /// Install a scheduling configuration without recomputing the schedule.
    /// Test-only seam.
    #[doc(hidden)]
    pub async fn set_config_for_testing(&self, config: SchedulingConfig) {
        *self.core.config.write().await = Some(config);
    }
}

/// Whether the loop should hold off because of recent failures.
///
/// Active when at least three consecutive failures occurred and the
/// exponential backoff window (`2^min(n,6)` hours) since the last failure
/// has not elapsed.
fn backoff_active(state: &ScheduleState, now: Timestamp) -> bool {
    if state.consecutive_failures < 3 {
        return false;
    }
    let Some(last_failure) = state.last_failure else {
        return false;
    };
    let capped = state.consecutive_failures.min(6);
    let backoff_until = last_failure + chrono::Duration::hours(1 << capped);
    now < backoff_until
}

/// Wait while stamping the supervisor heartbeat every chunk.
///
/// The wait is split into chunks no longer than the heartbeat interval;
/// each chunk races against shutdown and configuration changes.
async fn wait_with_heartbeats(core: &Arc<SchedulerCore>, total: chrono::Duration) -> WaitOutcome {
    let total = match total.to_std() {
        Ok(duration) => duration,
        Err(_) => return WaitOutcome::Elapsed,
    };

    let mut shutdown = core.supervisor.subscribe_shutdown();
    let mut elapsed = std::time::Duration::ZERO;

    while elapsed < total {
        if core.supervisor.is_shutting_down() {
            return WaitOutcome::Shutdown;
        }
        let chunk = HEARTBEAT_INTERVAL.min(total - elapsed);
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Shutdown requested during scheduler wait");
                return WaitOutcome::Shutdown;
            }
            _ = core.config_changed.notified() => {
                debug!("Configuration changed during scheduler wait");
                return WaitOutcome::ConfigChanged;
            }
            _ = tokio::time::sleep(chunk) => {
                elapsed += chunk;
                core.supervisor.stamp_heartbeat(SCHEDULER_TASK).await;
            }
        }
    }

    WaitOutcome::Elapsed
}

/// Main scheduler loop, run as the supervised `update_scheduler` task.
async fn scheduler_loop(core: Arc<SchedulerCore>) -> Result<()> {
    loop {
        let Some(config) = core.config.read().await.clone() else {
            error!("Scheduler loop started without configuration");
            return Ok(());
        };

        let now = core.clock.now();

        let state_snapshot = core.state.read().await.clone();
        if backoff_active(&state_snapshot, now) {
            info!("Skipping update due to recent failures (exponential backoff)");
            match wait_with_heartbeats(&core, chrono::Duration::from_std(BACKOFF_RECHECK).unwrap_or_default()).await {
                WaitOutcome::Shutdown => return Ok(()),
                _ => continue,
            }
        }

        let mut next = calc::next_update_time(&config, state_snapshot.last_update, now);
        if !calc::is_valid_schedule_time(next, now) {
            // Defensive fallback so a miscomputation cannot stall the loop
            error!("Invalid schedule time calculated: {}", next);
            next = now + chrono::Duration::hours(1);
        }
        core.state.write().await.set_next_update(next);

        let wait = next - now;
        if wait > chrono::Duration::zero() {
            info!(
                "Next update scheduled for: {} (wait time: {}s)",
                next,
                wait.num_seconds()
            );
            match wait_with_heartbeats(&core, wait).await {
                WaitOutcome::Shutdown => {
                    info!("Scheduler loop terminated due to shutdown request");
                    return Ok(());
                }
                WaitOutcome::ConfigChanged => continue,
                WaitOutcome::Elapsed => {}
            }
        }

        trigger_update(&core).await?;
    }
}

/// The update critical section.
///
/// Records the scheduled time as `last_update` and recomputes
/// `next_update` *before* invoking the callback, so every observer during
/// the run reads the upcoming fire rather than the executing one. Retries
/// with exponential backoff; permanent errors abort immediately.
async fn trigger_update(core: &Arc<SchedulerCore>) -> Result<()> {
    let _guard = core.update_lock.lock().await;

    let now = core.clock.now();
    if !core.breaker.lock().await.should_allow(now) {
        let message = "Update blocked by circuit breaker (too many recent failures)";
        warn!("{message}");
        core.supervisor
            .audit_event(SCHEDULER_TASK, "update_blocked", message)
            .await;
        return Err(anyhow!("{message}"));
    }

    let attempt_no = {
        let mut metrics = core.metrics.lock().await;
        metrics.record_attempt(now);
        metrics.total_attempts
    };
    let start_time = now;

    info!("Triggering scheduled graph update (attempt {attempt_no})");
    core.supervisor
        .audit_event(
            SCHEDULER_TASK,
            "update_started",
            &format!("Starting update attempt {attempt_no}"),
        )
        .await;

    let config = core.config.read().await.clone();
    let callback = core.callback.read().await.clone();

    // The scheduled instant is the logical update time regardless of
    // execution delays, so intervals stay anchored.
    let scheduled_time = core.state.read().await.next_update.unwrap_or(now);

    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..core.policy.max_attempts {
        if attempt > 0 {
            let delay = core.policy.retry_delay(attempt);
            info!(
                "Retrying update after {:.1}s delay (attempt {}/{})",
                delay.as_secs_f64(),
                attempt + 1,
                core.policy.max_attempts
            );
            core.supervisor
                .audit_event(
                    SCHEDULER_TASK,
                    "update_retry",
                    &format!("Retrying after {:.1}s (attempt {})", delay.as_secs_f64(), attempt + 1),
                )
                .await;
            tokio::time::sleep(delay).await;
        }

        // Update last_update and next_update BEFORE the callback runs so
        // downstream embeds created during the run read the future fire.
        {
            let mut state = core.state.write().await;
            state.record_successful_update(scheduled_time);
            if let Some(config) = &config {
                let next = calc::next_update_time(config, Some(scheduled_time), scheduled_time);
                state.set_next_update(next);
                info!("Next update scheduled for: {next}");
            }
        }

        let Some(callback) = callback.as_ref() else {
            let message = "No update callback set";
            error!("{message}");
            core.supervisor
                .audit_event(SCHEDULER_TASK, "update_error", message)
                .await;
            return Err(anyhow!("{message}"));
        };

        let result = tokio::time::timeout(UPDATE_TIMEOUT, callback()).await;

        match result {
            Ok(Ok(())) => {
                let finished = core.clock.now();
                let duration = finished - start_time;
                let success_rate = {
                    let mut metrics = core.metrics.lock().await;
                    metrics.record_success(finished);
                    metrics.success_rate()
                };
                core.breaker.lock().await.record_success(finished);

                let message = format!(
                    "Scheduled update completed successfully in {}s (success rate: {:.1}%)",
                    duration.num_seconds(),
                    success_rate * 100.0
                );
                info!("{message}");
                core.supervisor
                    .audit_event(SCHEDULER_TASK, "update_completed", &message)
                    .await;

                if core.recovery_enabled.load(Ordering::SeqCst) {
                    let state = core.state.read().await.clone();
                    if let Err(e) = core.store.save(&state, config.as_ref()) {
                        error!("Failed to save state after update: {:#}", e);
                    }
                }

                return Ok(());
            }
            Ok(Err(e)) => {
                let kind = ErrorClassifier::classify(&e);
                let message = format!(
                    "Update attempt {} failed with {} error: {:.200}",
                    attempt + 1,
                    kind,
                    format!("{e:#}")
                );
                warn!("{message}");
                core.supervisor
                    .audit_event(SCHEDULER_TASK, "update_attempt_failed", &message)
                    .await;
                last_error = Some(e);

                if kind == ErrorKind::Permanent {
                    error!("Permanent error detected, not retrying");
                    break;
                }
            }
            Err(_) => {
                let message = format!(
                    "Update attempt {} timed out after {} minutes",
                    attempt + 1,
                    UPDATE_TIMEOUT.as_secs() / 60
                );
                warn!("{message}");
                core.supervisor
                    .audit_event(SCHEDULER_TASK, "update_timeout", &message)
                    .await;
                last_error = Some(anyhow!(
                    "Update timed out after {} seconds",
                    UPDATE_TIMEOUT.as_secs()
                ));
            }
        }
    }

    // All attempts failed: record the definitive failure and persist it.
    let failure_time = core.clock.now();
    let error = last_error.unwrap_or_else(|| anyhow!("Update failed with no recorded error"));
    let kind = ErrorClassifier::classify(&error);

    core.state
        .write()
        .await
        .record_failure(failure_time, &format!("{error:#}"));
    core.metrics.lock().await.record_failure(failure_time, kind);
    core.breaker.lock().await.record_failure(failure_time, kind);

    let message = format!(
        "All {} update attempts failed. Last error ({}): {:.200}",
        core.policy.max_attempts,
        kind,
        format!("{error:#}")
    );
    error!("{message}");
    core.supervisor
        .audit_event(SCHEDULER_TASK, "update_failed", &message)
        .await;

    if core.breaker.lock().await.state() == CircuitState::Open {
        core.supervisor
            .audit_event(
                SCHEDULER_TASK,
                "circuit_breaker_opened",
                "Circuit breaker opened due to repeated failures",
            )
            .await;
    }

    if core.recovery_enabled.load(Ordering::SeqCst) {
        let state = core.state.read().await.clone();
        if let Err(e) = core.store.save(&state, config.as_ref()) {
            error!("Failed to save state after failed update: {:#}", e);
        }
    }

    Err(error)
}

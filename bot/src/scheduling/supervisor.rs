//! Background task supervision
//!
//! Manages a set of named long-running tasks: lifecycle, health heartbeats,
//! restart policy with exponential backoff, a per-task circuit breaker and
//! metrics, and a bounded audit log. The scheduler loop runs as one of
//! these tasks; it stamps its heartbeat through the supervisor during long
//! waits so the health watcher can tell a sleeping task from a dead one.

use super::error_handling::{CircuitBreaker, ErrorClassifier};
use super::types::{
    AuditEntry, CircuitState, ErrorKind, ErrorMetrics, RetryPolicy, TaskStatus, Timestamp,
    STALE_THRESHOLD,
};
use futures_util::future::BoxFuture;
use shared::time::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Name of the scheduler's supervised task. It is the one task that runs
/// without an outer timeout, since it paces itself.
pub const SCHEDULER_TASK: &str = "update_scheduler";

/// Outer timeout applied to every task except the scheduler loop.
const TASK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Interval between health checks.
const HEALTH_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Maximum number of retained audit entries.
const AUDIT_LOG_CAPACITY: usize = 1000;

/// Boxed future produced by a task body.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A task body is a factory so the supervisor can re-invoke it on restart.
pub type TaskBody = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Aggregate health information across all supervised tasks.
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub failed_tasks: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub overall_success_rate: f64,
    pub open_circuits: usize,
    pub is_healthy: bool,
    pub audit_log_entries: usize,
}

/// Per-task status snapshot.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub last_heartbeat: Option<Timestamp>,
    pub is_finished: bool,
}

struct SupervisorInner {
    clock: Clock,
    policy: RetryPolicy,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    statuses: Mutex<HashMap<String, TaskStatus>>,
    heartbeats: Mutex<HashMap<String, Timestamp>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    metrics: Mutex<HashMap<String, ErrorMetrics>>,
    audit_log: Mutex<VecDeque<AuditEntry>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

/// Supervisor for named background tasks.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<SupervisorInner>,
}

impl TaskSupervisor {
    pub fn new(clock: Clock, policy: RetryPolicy) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(SupervisorInner {
                clock,
                policy,
                shutdown,
                shutting_down: AtomicBool::new(false),
                tasks: Mutex::new(HashMap::new()),
                statuses: Mutex::new(HashMap::new()),
                heartbeats: Mutex::new(HashMap::new()),
                breakers: Mutex::new(HashMap::new()),
                metrics: Mutex::new(HashMap::new()),
                audit_log: Mutex::new(VecDeque::with_capacity(AUDIT_LOG_CAPACITY)),
                health_task: Mutex::new(None),
            }),
        }
    }

    /// Start the supervisor: spawns the health watcher and accepts task
    /// registrations.
    pub async fn start(&self) {
        info!("Starting task supervisor");
        self.inner.shutting_down.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            health_check_loop(inner).await;
        });
        *self.inner.health_task.lock().await = Some(handle);
    }

    /// Stop the supervisor and all managed tasks, waiting for them to
    /// terminate.
    pub async fn stop(&self) {
        info!("Stopping task supervisor");
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown.send(());

        if let Some(handle) = self.inner.health_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let handles: Vec<(String, JoinHandle<()>)> =
            self.inner.tasks.lock().await.drain().collect();
        for (name, handle) in handles {
            debug!("Waiting for task to terminate: {}", name);
            if tokio::time::timeout(std::time::Duration::from_secs(10), handle)
                .await
                .is_err()
            {
                warn!("Task {} did not terminate in time", name);
            }
        }

        self.inner.statuses.lock().await.clear();
        self.inner.heartbeats.lock().await.clear();
        info!("Task supervisor stopped");
    }

    /// A shutdown receiver for tasks that chunk their own waits.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a new background task, replacing any existing task of the
    /// same name.
    pub async fn add(&self, name: &str, body: TaskBody, restart_on_failure: bool) {
        if self.inner.tasks.lock().await.contains_key(name) {
            warn!("Task {} already exists, replacing it", name);
            self.remove(name).await;
        }

        info!("Adding background task: {}", name);
        let now = self.inner.clock.now();
        self.inner
            .breakers
            .lock()
            .await
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.inner.policy.clone()));
        self.inner
            .metrics
            .lock()
            .await
            .entry(name.to_string())
            .or_default();
        self.inner
            .statuses
            .lock()
            .await
            .insert(name.to_string(), TaskStatus::Running);
        self.inner
            .heartbeats
            .lock()
            .await
            .insert(name.to_string(), now);

        let inner = Arc::clone(&self.inner);
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            run_task(inner, task_name, body, restart_on_failure).await;
        });
        self.inner
            .tasks
            .lock()
            .await
            .insert(name.to_string(), handle);
    }

    /// Cancel and deregister a task.
    pub async fn remove(&self, name: &str) {
        let Some(handle) = self.inner.tasks.lock().await.remove(name) else {
            warn!("Task {} not found", name);
            return;
        };
        info!("Removing background task: {}", name);
        handle.abort();
        self.inner.statuses.lock().await.remove(name);
        self.inner.heartbeats.lock().await.remove(name);
    }

    /// Stamp the heartbeat of a task. Tasks call this during long chunked
    /// waits so they are not flagged as stale.
    pub async fn stamp_heartbeat(&self, name: &str) {
        let now = self.inner.clock.now();
        if let Some(entry) = self.inner.heartbeats.lock().await.get_mut(name) {
            *entry = now;
        }
    }

    /// Append an audit entry, also emitting it to the logger.
    pub async fn audit_event(&self, task: &str, event: &str, message: &str) {
        log_audit(&self.inner, task, event, message).await;
    }

    pub async fn status(&self, name: &str) -> Option<TaskStatus> {
        self.inner.statuses.lock().await.get(name).copied()
    }

    pub async fn status_all(&self) -> HashMap<String, TaskSnapshot> {
        let statuses = self.inner.statuses.lock().await;
        let heartbeats = self.inner.heartbeats.lock().await;
        let tasks = self.inner.tasks.lock().await;

        statuses
            .iter()
            .map(|(name, status)| {
                (
                    name.clone(),
                    TaskSnapshot {
                        status: *status,
                        last_heartbeat: heartbeats.get(name).copied(),
                        is_finished: tasks.get(name).map(|h| h.is_finished()).unwrap_or(true),
                    },
                )
            })
            .collect()
    }

    /// All tasks are healthy when no heartbeat is stale.
    pub async fn is_healthy(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner
            .heartbeats
            .lock()
            .await
            .values()
            .all(|heartbeat| now - *heartbeat <= STALE_THRESHOLD)
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let statuses = self.inner.statuses.lock().await;
        let total_tasks = statuses.len();
        let running_tasks = statuses
            .values()
            .filter(|s| **s == TaskStatus::Running)
            .count();
        let failed_tasks = statuses
            .values()
            .filter(|s| **s == TaskStatus::Failed)
            .count();
        drop(statuses);

        let metrics = self.inner.metrics.lock().await;
        let total_attempts: u64 = metrics.values().map(|m| m.total_attempts).sum();
        let total_successes: u64 = metrics.values().map(|m| m.total_successes).sum();
        drop(metrics);

        let open_circuits = self
            .inner
            .breakers
            .lock()
            .await
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .count();

        HealthSummary {
            total_tasks,
            running_tasks,
            failed_tasks,
            total_attempts,
            total_successes,
            overall_success_rate: if total_attempts > 0 {
                total_successes as f64 / total_attempts as f64
            } else {
                0.0
            },
            open_circuits,
            is_healthy: self.is_healthy().await && open_circuits == 0,
            audit_log_entries: self.inner.audit_log.lock().await.len(),
        }
    }

    /// The most recent audit entries, newest last.
    pub async fn audit(&self, limit: usize) -> Vec<AuditEntry> {
        let log = self.inner.audit_log.lock().await;
        log.iter()
            .skip(log.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub async fn task_metrics(&self, name: &str) -> Option<ErrorMetrics> {
        self.inner.metrics.lock().await.get(name).cloned()
    }

    pub async fn breaker_state(&self, name: &str) -> Option<CircuitState> {
        self.inner.breakers.lock().await.get(name).map(|b| b.state())
    }
}

async fn log_audit(inner: &SupervisorInner, task: &str, event: &str, message: &str) {
    let entry = AuditEntry {
        timestamp: inner.clock.now(),
        task: task.to_string(),
        event: event.to_string(),
        message: message.to_string(),
    };

    let mut log = inner.audit_log.lock().await;
    if log.len() >= AUDIT_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
    drop(log);

    info!("[AUDIT] {}: {} - {}", task, event, message);
}

async fn set_status(inner: &SupervisorInner, name: &str, status: TaskStatus) {
    inner
        .statuses
        .lock()
        .await
        .insert(name.to_string(), status);
}

/// Execution wrapper for a supervised task.
///
/// Runs the body with circuit-breaker gating, timeout protection (except
/// for the scheduler loop), classification-driven retries and audit
/// logging. A shutdown signal terminates the loop with a cancellation
/// audit.
async fn run_task(
    inner: Arc<SupervisorInner>,
    name: String,
    body: TaskBody,
    restart_on_failure: bool,
) {
    let mut shutdown = inner.shutdown.subscribe();

    while !inner.shutting_down.load(Ordering::SeqCst) {
        // Check the circuit breaker before attempting the operation
        let now = inner.clock.now();
        let allowed = inner
            .breakers
            .lock()
            .await
            .get_mut(&name)
            .map(|b| b.should_allow(now))
            .unwrap_or(true);
        if !allowed {
            log_audit(
                &inner,
                &name,
                "circuit_breaker_blocked",
                "Circuit breaker is open, blocking task execution",
            )
            .await;
            set_status(&inner, &name, TaskStatus::Failed).await;

            let wait = inner.policy.recovery_timeout.min(std::time::Duration::from_secs(60));
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(wait) => continue,
            }
        }

        set_status(&inner, &name, TaskStatus::Running).await;
        let now = inner.clock.now();
        if let Some(entry) = inner.heartbeats.lock().await.get_mut(&name) {
            *entry = now;
        }
        if let Some(metrics) = inner.metrics.lock().await.get_mut(&name) {
            metrics.record_attempt(now);
        }
        log_audit(&inner, &name, "task_started", "Task execution started").await;

        let work = body();
        // The scheduler loop paces itself and gets no outer timeout.
        let outcome: Option<anyhow::Result<()>> = if name == SCHEDULER_TASK {
            tokio::select! {
                result = work => Some(result),
                _ = shutdown.recv() => None,
            }
        } else {
            tokio::select! {
                result = tokio::time::timeout(TASK_TIMEOUT, work) => Some(match result {
                    Ok(inner_result) => inner_result,
                    Err(_) => Err(anyhow::anyhow!(
                        "Task timed out after {} seconds",
                        TASK_TIMEOUT.as_secs()
                    )),
                }),
                _ = shutdown.recv() => None,
            }
        };

        match outcome {
            None => {
                debug!("Task {} was cancelled", name);
                set_status(&inner, &name, TaskStatus::Cancelled).await;
                log_audit(&inner, &name, "task_cancelled", "Task was cancelled").await;
                return;
            }
            Some(Ok(())) => {
                let now = inner.clock.now();
                set_status(&inner, &name, TaskStatus::Idle).await;
                if let Some(breaker) = inner.breakers.lock().await.get_mut(&name) {
                    breaker.record_success(now);
                }
                let success_rate = {
                    let mut metrics = inner.metrics.lock().await;
                    match metrics.get_mut(&name) {
                        Some(m) => {
                            m.record_success(now);
                            m.success_rate()
                        }
                        None => 0.0,
                    }
                };
                log_audit(
                    &inner,
                    &name,
                    "task_completed",
                    "Task execution completed successfully",
                )
                .await;
                info!(
                    "Task {} completed successfully (success rate: {:.1}%)",
                    name,
                    success_rate * 100.0
                );
                return;
            }
            Some(Err(e)) => {
                let kind = ErrorClassifier::classify(&e);
                let now = inner.clock.now();
                set_status(&inner, &name, TaskStatus::Failed).await;
                if let Some(breaker) = inner.breakers.lock().await.get_mut(&name) {
                    breaker.record_failure(now, kind);
                }
                let consecutive = {
                    let mut metrics = inner.metrics.lock().await;
                    match metrics.get_mut(&name) {
                        Some(m) => {
                            m.record_failure(now, kind);
                            m.consecutive_failures
                        }
                        None => 1,
                    }
                };
                error!(
                    "Task {} failed with {} error (consecutive failures: {}): {:#}",
                    name, kind, consecutive, e
                );
                log_audit(
                    &inner,
                    &name,
                    "task_failed",
                    &format!("{} error: {:.200}", kind, format!("{e:#}")),
                )
                .await;

                if !restart_on_failure || kind == ErrorKind::Permanent {
                    error!("Task {} failed with {} error, not restarting", name, kind);
                    return;
                }

                let delay = inner.policy.retry_delay(consecutive);
                tokio::select! {
                    _ = shutdown.recv() => {
                        set_status(&inner, &name, TaskStatus::Cancelled).await;
                        log_audit(&inner, &name, "task_cancelled", "Task was cancelled").await;
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    set_status(&inner, &name, TaskStatus::Cancelled).await;
    log_audit(&inner, &name, "task_cancelled", "Task was cancelled").await;
}

/// Periodic health check for all managed tasks.
async fn health_check_loop(inner: Arc<SupervisorInner>) {
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Health check loop stopping");
                break;
            }
            _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {}
        }

        let now = inner.clock.now();
        let heartbeats = inner.heartbeats.lock().await.clone();
        let statuses = inner.statuses.lock().await.clone();
        for (name, heartbeat) in heartbeats {
            if now - heartbeat > STALE_THRESHOLD {
                let status = statuses
                    .get(&name)
                    .copied()
                    .unwrap_or(TaskStatus::Failed);
                warn!(
                    "Task {} appears stale (last heartbeat: {}, status: {})",
                    name, heartbeat, status
                );
            }
        }
    }
}

//! Recovery and schedule integrity management
//!
//! Detects fires missed while the process was down, validates the persisted
//! schedule against the calculator's expectations, repairs inconsistent
//! state and optionally replays missed fires through the update callback.

use super::calc;
use super::types::{MissedFire, MissedFireReason, ScheduleState, Timestamp};
use crate::state::StateStore;
use anyhow::Result;
use chrono::Duration;
use shared::config::SchedulingConfig;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Future type for the missed-fire replay callback.
pub type RecoveryCallback<'a> =
    &'a (dyn Fn() -> crate::scheduling::supervisor::TaskFuture + Send + Sync);

/// Manages recovery operations for the scheduler.
pub struct RecoveryManager {
    store: Arc<StateStore>,
}

impl RecoveryManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Detect fires missed between `last_update` and now.
    ///
    /// With no update history there is nothing to miss. A persisted
    /// `next_update` in the past becomes a `missed_scheduled` entry; in
    /// interval mode, every whole interval that elapsed beyond the first
    /// becomes an `interval_backfill` entry.
    pub fn detect_missed_fires(
        &self,
        now: Timestamp,
        last_update: Option<Timestamp>,
        stored_next: Option<Timestamp>,
        config: &SchedulingConfig,
    ) -> Vec<MissedFire> {
        let mut missed = Vec::new();

        let Some(last_update) = last_update else {
            debug!("No previous update history, no missed fires to detect");
            return missed;
        };

        if let Some(next) = stored_next {
            if next < now {
                warn!("Detected missed scheduled fire: {}", next);
                missed.push(MissedFire {
                    scheduled_time: next,
                    detected_at: now,
                    reason: MissedFireReason::MissedScheduled,
                });
            }
        }

        if config.is_interval_based() {
            let interval_days = i64::from(config.update_days());
            let missed_intervals = (now - last_update).num_days() / interval_days;

            if missed_intervals > 1 {
                for k in 1..missed_intervals {
                    let missed_time = last_update + Duration::days(interval_days * k);
                    if missed_time < now {
                        warn!("Detected missed interval fire: {}", missed_time);
                        missed.push(MissedFire {
                            scheduled_time: missed_time,
                            detected_at: now,
                            reason: MissedFireReason::IntervalBackfill,
                        });
                    }
                }
            }
        }

        info!("Detected {} missed fires", missed.len());
        missed
    }

    /// Validate schedule integrity, returning every inconsistency found.
    pub fn validate_integrity(
        &self,
        now: Timestamp,
        state: &ScheduleState,
        config: &SchedulingConfig,
    ) -> Vec<String> {
        let mut issues =
            calc::validate_schedule_integrity(config, state.last_update, state.next_update, now);

        if state.consecutive_failures > 10 {
            issues.push(format!(
                "Excessive consecutive failures: {}",
                state.consecutive_failures
            ));
        }

        if state.consecutive_failures > 0 {
            if let Some(last_failure) = state.last_failure {
                let age = now - last_failure;
                if age.num_days() > 7 {
                    issues.push(format!(
                        "Last failure is {} days old but consecutive_failures is {}",
                        age.num_days(),
                        state.consecutive_failures
                    ));
                }
            }
        }

        if issues.is_empty() {
            debug!("Schedule integrity validation passed");
        } else {
            warn!("Schedule integrity validation failed: {:?}", issues);
        }

        issues
    }

    /// Repair inconsistent schedule state in place.
    ///
    /// Replaces a stale or missing `next_update` with a freshly computed
    /// value, resets an old failure streak and clears a stale running flag.
    pub fn repair_state(
        &self,
        now: Timestamp,
        state: &mut ScheduleState,
        config: &SchedulingConfig,
    ) {
        info!("Attempting to repair schedule state");

        if state.next_update.map(|next| next <= now).unwrap_or(true) {
            let mut fresh = calc::next_update_time(config, state.last_update, now);
            // Interval mode anchors on last_update and may still point into
            // the past after long downtime; advance to the first step that
            // has not elapsed.
            let step = Duration::days(i64::from(config.update_days()));
            while fresh < now {
                fresh = fresh + step;
            }
            info!(
                "Repairing next_update: {:?} -> {}",
                state.next_update, fresh
            );
            state.set_next_update(fresh);
        }

        if state.consecutive_failures > 5 {
            if let Some(last_failure) = state.last_failure {
                let age = now - last_failure;
                if age.num_days() > 3 {
                    info!(
                        "Resetting consecutive failures from {} to 0 (last failure was {} days ago)",
                        state.consecutive_failures,
                        age.num_days()
                    );
                    state.consecutive_failures = 0;
                }
            }
        }

        if state.is_running {
            info!("Clearing running state during repair");
            state.stop_scheduler();
        }

        info!("Schedule state repair completed");
    }

    /// Perform the full recovery pass: detect missed fires, validate and
    /// repair the state, replay missed fires through the callback when one
    /// is supplied, then persist the final state.
    ///
    /// Replay is sequential; a failed replay is recorded and the remaining
    /// fires are still attempted.
    pub async fn perform_recovery(
        &self,
        now: Timestamp,
        state: &mut ScheduleState,
        config: &SchedulingConfig,
        callback: Option<RecoveryCallback<'_>>,
    ) -> Result<Vec<MissedFire>> {
        info!("Starting recovery process");

        let missed = self.detect_missed_fires(now, state.last_update, state.next_update, config);

        let issues = self.validate_integrity(now, state, config);
        if !issues.is_empty() {
            self.repair_state(now, state, config);
        }

        let mut processed = Vec::new();
        if let Some(callback) = callback {
            if !missed.is_empty() {
                info!("Replaying {} missed fires", missed.len());
                for fire in &missed {
                    info!(
                        "Replaying missed fire from {} ({})",
                        fire.scheduled_time, fire.reason
                    );
                    match callback().await {
                        Ok(()) => {
                            state.record_successful_update(now);
                            processed.push(fire.clone());
                        }
                        Err(e) => {
                            error!(
                                "Failed to replay missed fire from {}: {:#}",
                                fire.scheduled_time, e
                            );
                            state.record_failure(now, &format!("{e:#}"));
                            // Continue with the remaining missed fires
                        }
                    }
                }
            }
        }

        if let Err(e) = self.store.save(state, Some(config)) {
            error!("Failed to save recovered state: {:#}", e);
        } else {
            info!("Recovered state saved successfully");
        }

        info!(
            "Recovery process completed, replayed {} missed fires",
            processed.len()
        );
        Ok(processed)
    }
}

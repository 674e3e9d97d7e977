//! Persistent scheduler state
//!
//! Saves and loads the scheduler's state record to a versioned JSON file.
//! Writes are atomic: the record is written to a sibling temporary file,
//! fsynced, then renamed over the target, so a crash mid-write leaves the
//! previous record intact. Corrupted or version-mismatched files are
//! renamed aside and defaults returned; the store never crashes on bad
//! input.

use crate::scheduling::types::{ScheduleState, Timestamp};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::config::SchedulingConfig;
use shared::time::Clock;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Schema tag written into every state record.
const STATE_SCHEMA_VERSION: &str = "1.0";

/// On-disk shape of the scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentRecord {
    version: String,
    saved_at: String,
    state: PersistedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<PersistedScheduling>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    last_update: Option<String>,
    next_update: Option<String>,
    is_running: bool,
    consecutive_failures: u32,
    last_failure: Option<String>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedScheduling {
    update_days: u32,
    fixed_update_time: String,
}

/// Manages persistent state storage and recovery for the scheduler.
///
/// The store is the only writer of the on-disk record.
pub struct StateStore {
    path: PathBuf,
    clock: Clock,
}

impl StateStore {
    pub fn new(path: PathBuf, clock: Clock) -> Self {
        Self { path, clock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save the scheduler state atomically.
    pub fn save(&self, state: &ScheduleState, config: Option<&SchedulingConfig>) -> Result<()> {
        let record = PersistentRecord {
            version: STATE_SCHEMA_VERSION.to_string(),
            saved_at: self.clock.now().to_rfc3339(),
            state: PersistedState {
                last_update: state.last_update.map(|t| t.to_rfc3339()),
                next_update: state.next_update.map(|t| t.to_rfc3339()),
                is_running: state.is_running,
                consecutive_failures: state.consecutive_failures,
                last_failure: state.last_failure.map(|t| t.to_rfc3339()),
                last_error: state.last_error.clone(),
            },
            config: config.map(|c| PersistedScheduling {
                update_days: c.update_days(),
                fixed_update_time: c.fixed_update_time().to_string(),
            }),
        };

        let parent = self
            .path
            .parent()
            .context("State file path has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory {}", parent.display()))?;

        let payload = serde_json::to_vec_pretty(&record).context("Failed to serialize state")?;

        // Write to a sibling temp file, fsync, then rename over the target.
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&temp_path).with_context(|| {
                format!("Failed to create temp state file {}", temp_path.display())
            })?;
            file.write_all(&payload)
                .with_context(|| format!("Failed to write state to {}", temp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to fsync {}", temp_path.display()))?;
        }
        std::fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} over {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        debug!("State saved successfully to {}", self.path.display());
        Ok(())
    }

    /// Load the scheduler state.
    ///
    /// A missing file yields a default state. A corrupted or
    /// version-mismatched file is renamed aside with a dated suffix and a
    /// default state is returned.
    pub fn load(&self) -> (ScheduleState, Option<SchedulingConfig>) {
        if !self.path.exists() {
            debug!("No state file found, returning default state");
            return (ScheduleState::default(), None);
        }

        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to read state file: {}", e);
                return (ScheduleState::default(), None);
            }
        };

        let record: PersistentRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to parse state file (corrupted): {}", e);
                self.backup_corrupted();
                return (ScheduleState::default(), None);
            }
        };

        if record.version != STATE_SCHEMA_VERSION {
            warn!(
                "State file version {} is not compatible with {}",
                record.version, STATE_SCHEMA_VERSION
            );
            self.backup_corrupted();
            return (ScheduleState::default(), None);
        }

        let state = match self.restore_state(&record.state) {
            Ok(state) => state,
            Err(e) => {
                error!("State file contains invalid timestamps: {}", e);
                self.backup_corrupted();
                return (ScheduleState::default(), None);
            }
        };

        let config = record.config.and_then(|c| {
            match SchedulingConfig::new(c.update_days, c.fixed_update_time) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Persisted scheduling config is invalid, ignoring: {}", e);
                    None
                }
            }
        });

        info!("State loaded successfully from {}", self.path.display());
        debug!(
            "Loaded state: last_update={:?}, next_update={:?}",
            state.last_update, state.next_update
        );

        (state, config)
    }

    fn restore_state(&self, persisted: &PersistedState) -> Result<ScheduleState> {
        Ok(ScheduleState {
            last_update: self.parse_timestamp(&persisted.last_update)?,
            next_update: self.parse_timestamp(&persisted.next_update)?,
            is_running: persisted.is_running,
            consecutive_failures: persisted.consecutive_failures,
            last_failure: self.parse_timestamp(&persisted.last_failure)?,
            last_error: persisted.last_error.clone(),
        })
    }

    fn parse_timestamp(&self, raw: &Option<String>) -> Result<Option<Timestamp>> {
        raw.as_deref()
            .map(|value| self.clock.parse_timestamp(value))
            .transpose()
    }

    /// Rename a corrupted state file aside for debugging.
    fn backup_corrupted(&self) {
        if !self.path.exists() {
            return;
        }
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let backup = self.path.with_extension(format!("corrupted.{stamp}.json"));
        match std::fs::rename(&self.path, &backup) {
            Ok(()) => info!("Corrupted state file backed up to {}", backup.display()),
            Err(e) => error!("Failed to backup corrupted state file: {}", e),
        }
    }

    /// Delete the persistent state file.
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete state file {}", self.path.display()))?;
            info!("State file deleted: {}", self.path.display());
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

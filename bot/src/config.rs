//! Configuration management for the bot
//!
//! Loads the YAML configuration file, validates it, serves snapshots to
//! the rest of the service, applies hot edits atomically and publishes
//! change events consumed by the scheduler. A checksum of the raw file
//! detects on-disk edits so an operator can change the file without
//! restarting the bot.

use anyhow::{anyhow, Context, Result};
use shared::config::BotConfig;
use shared::time::Clock;
use shared::BotError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration file name inside the config directory.
pub const CONFIG_FILE: &str = "config.yml";

/// Template written when no configuration file exists yet. The required
/// keys must be filled in before the bot will start.
const CONFIG_TEMPLATE: &str = "\
# Bot configuration
#
# Required settings. The bot refuses to start until these are filled in.
api_key: \"\"
api_base_url: \"\"
chat_token: \"\"
channel_id: 0

# Schedule settings
update_days: 7
fixed_update_time: \"disabled\"
keep_days: 7
time_range_days: 30
time_range_months: 12
language: \"en\"
";

/// A configuration change notification.
///
/// `key` names the edited logical key, or `*` after a full on-disk reload.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
    pub key: String,
}

/// Manages the bot configuration file and the in-memory snapshot.
pub struct ConfigManager {
    path: PathBuf,
    clock: Clock,
    config: RwLock<BotConfig>,
    checksum: RwLock<String>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigManager {
    /// Load and validate the configuration file.
    ///
    /// A missing file gets a commented template written in its place and
    /// the load fails so the operator can fill in the required keys. A
    /// corrupted file is renamed aside, replaced with the template, and
    /// the load fails the same way.
    pub fn load(path: PathBuf, clock: Clock) -> Result<Self> {
        if !path.exists() {
            info!("No configuration file found, writing template");
            write_atomic(&path, CONFIG_TEMPLATE.as_bytes())?;
            return Err(anyhow!(BotError::Config(format!(
                "Configuration template written to {}; fill in the required keys and restart",
                path.display()
            ))));
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: BotConfig = match serde_yaml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                error!("Configuration file is corrupted: {}", e);
                backup_corrupted(&path, &clock);
                write_atomic(&path, CONFIG_TEMPLATE.as_bytes())?;
                return Err(anyhow!(BotError::Config(format!(
                    "Corrupted configuration backed up and replaced with a template: {e}"
                ))));
            }
        };

        config.validate()?;

        let checksum = checksum_of(&raw);
        info!("Configuration loaded from {}", path.display());

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            path,
            clock,
            config: RwLock::new(config),
            checksum: RwLock::new(checksum),
            events,
        })
    }

    /// A clone of the current configuration.
    pub async fn snapshot(&self) -> BotConfig {
        self.config.read().await.clone()
    }

    /// Subscribe to configuration change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// Apply a validated edit to a single logical key and persist it.
    ///
    /// The in-memory configuration is only replaced after the edited copy
    /// passed validation and reached disk, so a failed edit changes
    /// nothing.
    pub async fn edit(&self, key: &str, raw_value: &str) -> Result<()> {
        let mut edited = self.snapshot().await;
        edited.set_value(key, raw_value).map_err(anyhow::Error::from)?;
        edited.validate()?;

        let serialized = serde_yaml::to_string(&edited).context("Failed to serialize config")?;
        write_atomic(&self.path, serialized.as_bytes())?;

        *self.config.write().await = edited;
        *self.checksum.write().await = checksum_of(&serialized);

        info!("Configuration key {} updated", key);
        let _ = self.events.send(ConfigEvent {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Reload the configuration if the file changed on disk.
    ///
    /// Returns whether a reload happened. An unparsable or invalid file is
    /// logged and the current snapshot stays in effect.
    pub async fn reload_if_changed(&self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let checksum = checksum_of(&raw);

        if checksum == *self.checksum.read().await {
            return Ok(false);
        }

        debug!("Configuration file changed on disk, reloading");
        let config: BotConfig = match serde_yaml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring on-disk config change, parse failed: {}", e);
                return Ok(false);
            }
        };
        if let Err(e) = config.validate() {
            warn!("Ignoring on-disk config change, validation failed: {}", e);
            return Ok(false);
        }

        *self.config.write().await = config;
        *self.checksum.write().await = checksum;
        info!("Configuration reloaded from disk");
        let _ = self.events.send(ConfigEvent {
            key: "*".to_string(),
        });
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum_of(contents: &str) -> String {
    blake3::hash(contents.as_bytes()).to_hex().to_string()
}

/// Write a file atomically: temp sibling, fsync, rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("yml.tmp");
    {
        let mut file = std::fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to fsync {}", temp_path.display()))?;
    }
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} over {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn backup_corrupted(path: &Path, clock: &Clock) {
    let stamp = clock.now().format("%Y%m%d_%H%M%S");
    let backup = path.with_extension(format!("corrupted.{stamp}.yml"));
    match std::fs::rename(path, &backup) {
        Ok(()) => info!("Corrupted configuration backed up to {}", backup.display()),
        Err(e) => error!("Failed to backup corrupted configuration: {}", e),
    }
}

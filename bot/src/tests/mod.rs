//! Test modules for the bot crate

mod breaker_tests;
mod config_tests;
mod graphs_tests;
mod orchestrator_tests;
mod scheduler_tests;

use crate::analytics::{AnalyticsProvider, MediaType, MonthlyPlays, PlayRecord};
use crate::chat::ChatPoster;
use crate::config::ConfigManager;
use crate::scheduling::types::Timestamp;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use shared::config::BotConfig;
use shared::time::Clock;
use shared::BotError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Clock pinned to UTC for deterministic calculations.
pub fn utc_clock() -> Clock {
    Clock::with_zone(chrono_tz::UTC)
}

/// Build a UTC timestamp from literal components.
pub fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Timestamp {
    chrono_tz::UTC
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

/// A minimal valid bot configuration for tests.
pub fn test_config() -> BotConfig {
    let yaml = r#"
api_key: "abcdef123456"
api_base_url: "https://analytics.example.com"
chat_token: "token-value"
channel_id: 424242
time_range_days: 7
time_range_months: 3
"#;
    serde_yaml::from_str(yaml).unwrap()
}

/// Write a configuration to a temp directory and load a manager from it.
pub fn manager_with(dir: &TempDir, config: &BotConfig) -> Arc<ConfigManager> {
    let path = dir.path().join("config.yml");
    std::fs::write(&path, serde_yaml::to_string(config).unwrap()).unwrap();
    Arc::new(ConfigManager::load(path, utc_clock()).unwrap())
}

/// A play record fixture.
pub fn play(timestamp: Timestamp, user: &str, media_type: MediaType, platform: &str) -> PlayRecord {
    PlayRecord {
        timestamp: timestamp.with_timezone(&chrono::Utc),
        user: user.to_string(),
        media_type,
        platform: platform.to_string(),
        duration: Some(1800),
    }
}

/// Analytics fake serving canned data, optionally failing every call.
pub struct FakeAnalytics {
    pub plays: Vec<PlayRecord>,
    pub monthly: Vec<MonthlyPlays>,
    pub user_id: Option<u64>,
    pub fail_with: Option<String>,
}

impl FakeAnalytics {
    pub fn with_history(plays: Vec<PlayRecord>) -> Self {
        Self {
            plays,
            monthly: vec![
                MonthlyPlays {
                    month: "2025-06".to_string(),
                    movies: 10,
                    tv: 20,
                },
                MonthlyPlays {
                    month: "2025-07".to_string(),
                    movies: 5,
                    tv: 12,
                },
            ],
            user_id: Some(77),
            fail_with: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plays: Vec::new(),
            monthly: Vec::new(),
            user_id: None,
            fail_with: Some(message.to_string()),
        }
    }

    fn check(&self) -> Result<()> {
        match &self.fail_with {
            Some(message) => Err(anyhow!(BotError::TransientService(message.clone()))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AnalyticsProvider for FakeAnalytics {
    async fn play_history(&self, _days: u32) -> Result<Vec<PlayRecord>> {
        self.check()?;
        Ok(self.plays.clone())
    }

    async fn user_play_history(&self, _user_id: u64, _days: u32) -> Result<Vec<PlayRecord>> {
        self.check()?;
        Ok(self.plays.clone())
    }

    async fn lookup_user(&self, _identifier: &str) -> Result<Option<u64>> {
        self.check()?;
        Ok(self.user_id)
    }

    async fn plays_per_month(&self, _months: u32) -> Result<Vec<MonthlyPlays>> {
        self.check()?;
        Ok(self.monthly.clone())
    }
}

/// Chat fake recording every posting operation.
#[derive(Default)]
pub struct RecordingChat {
    pub posted: Mutex<Vec<(u64, Vec<PathBuf>)>>,
    pub dms: Mutex<Vec<(u64, Vec<PathBuf>)>>,
    pub delete_calls: AtomicUsize,
    pub dms_closed: bool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_closed_dms() -> Self {
        Self {
            dms_closed: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatPoster for RecordingChat {
    async fn post_files(&self, channel_id: u64, _content: &str, files: &[PathBuf]) -> Result<()> {
        self.posted
            .lock()
            .await
            .push((channel_id, files.to_vec()));
        Ok(())
    }

    async fn post_files_to_dm(&self, user_id: u64, _content: &str, files: &[PathBuf]) -> Result<()> {
        if self.dms_closed {
            return Err(anyhow!(BotError::Permission(
                "Direct messages are closed for this user".to_string()
            )));
        }
        self.dms.lock().await.push((user_id, files.to_vec()));
        Ok(())
    }

    async fn delete_recent_bot_messages(&self, _channel_id: u64, lookback: usize) -> Result<usize> {
        assert!(lookback <= 100);
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

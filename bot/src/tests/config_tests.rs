//! Tests for the configuration manager

use super::{test_config, utc_clock};
use crate::config::{ConfigManager, CONFIG_FILE};
use shared::config::BotConfig;
use tempfile::TempDir;

fn write_config(dir: &TempDir, config: &BotConfig) -> std::path::PathBuf {
    let path = dir.path().join(CONFIG_FILE);
    std::fs::write(&path, serde_yaml::to_string(config).unwrap()).unwrap();
    path
}

#[test]
fn test_load_missing_writes_template_and_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE);

    let result = ConfigManager::load(path.clone(), utc_clock());
    assert!(result.is_err());

    // A commented template was written for the operator to fill in
    let template = std::fs::read_to_string(&path).unwrap();
    assert!(template.contains("api_key"));
    assert!(template.contains("chat_token"));
}

#[tokio::test]
async fn test_load_valid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config());

    let manager = ConfigManager::load(path, utc_clock()).unwrap();
    let snapshot = manager.snapshot().await;
    assert_eq!(snapshot.channel_id, 424242);
    assert_eq!(snapshot.update_days, 7);
}

#[test]
fn test_load_corrupted_backs_up_and_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE);
    std::fs::write(&path, ":[ this is not yaml {{{").unwrap();

    let result = ConfigManager::load(path.clone(), utc_clock());
    assert!(result.is_err());

    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupted."))
        .collect();
    assert_eq!(backups.len(), 1);

    // The template took the corrupted file's place
    let replacement = std::fs::read_to_string(&path).unwrap();
    assert!(replacement.contains("api_key"));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.update_days = 0;
    let path = write_config(&dir, &config);

    assert!(ConfigManager::load(path, utc_clock()).is_err());
}

#[tokio::test]
async fn test_edit_persists_and_notifies() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config());
    let manager = ConfigManager::load(path.clone(), utc_clock()).unwrap();

    let mut events = manager.subscribe();
    manager.edit("update_days", "3").await.unwrap();

    assert_eq!(manager.snapshot().await.update_days, 3);

    let event = events.try_recv().unwrap();
    assert_eq!(event.key, "update_days");

    // The edit reached disk atomically
    let raw = std::fs::read_to_string(&path).unwrap();
    let on_disk: BotConfig = serde_yaml::from_str(&raw).unwrap();
    assert_eq!(on_disk.update_days, 3);
    assert!(!path.with_extension("yml.tmp").exists());
}

#[tokio::test]
async fn test_edit_failure_leaves_everything_untouched() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config());
    let original_raw = std::fs::read_to_string(&path).unwrap();
    let manager = ConfigManager::load(path.clone(), utc_clock()).unwrap();

    assert!(manager.edit("update_days", "9000").await.is_err());
    assert!(manager.edit("unknown_key", "1").await.is_err());

    assert_eq!(manager.snapshot().await.update_days, 7);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original_raw);
}

#[tokio::test]
async fn test_reload_if_changed_detects_external_edit() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config());
    let manager = ConfigManager::load(path.clone(), utc_clock()).unwrap();

    // Unchanged file: nothing happens
    assert!(!manager.reload_if_changed().await.unwrap());

    // An operator edits the file directly
    let mut edited = test_config();
    edited.keep_days = 21;
    std::fs::write(&path, serde_yaml::to_string(&edited).unwrap()).unwrap();

    assert!(manager.reload_if_changed().await.unwrap());
    assert_eq!(manager.snapshot().await.keep_days, 21);
}

#[tokio::test]
async fn test_reload_ignores_invalid_on_disk_edit() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config());
    let manager = ConfigManager::load(path.clone(), utc_clock()).unwrap();

    std::fs::write(&path, "garbage: [").unwrap();
    assert!(!manager.reload_if_changed().await.unwrap());

    // The previous snapshot stays in effect
    assert_eq!(manager.snapshot().await.keep_days, 7);
}

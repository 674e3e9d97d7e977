//! Tests for the update pipeline

use super::{manager_with, play, test_config, ts, utc_clock, FakeAnalytics, RecordingChat};
use crate::analytics::{AnalyticsProvider, MediaType};
use crate::chat::ChatPoster;
use crate::orchestrator::UpdateOrchestrator;
use crate::scheduling::error_handling::ErrorClassifier;
use crate::scheduling::types::ErrorKind;
use shared::config::BotConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_plays() -> Vec<crate::analytics::PlayRecord> {
    vec![
        play(ts(2025, 7, 20, 8, 0, 0), "alice", MediaType::Tv, "web"),
        play(ts(2025, 7, 20, 21, 0, 0), "bob", MediaType::Movie, "tv-app"),
        play(ts(2025, 7, 21, 9, 30, 0), "alice", MediaType::Tv, "mobile"),
    ]
}

struct Pipeline {
    _dir: TempDir,
    orchestrator: UpdateOrchestrator,
    chat: Arc<RecordingChat>,
    graphs_dir: std::path::PathBuf,
}

fn pipeline(config: BotConfig, analytics: FakeAnalytics) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let manager = manager_with(&dir, &config);
    let chat = Arc::new(RecordingChat::new());
    let graphs_dir = dir.path().join("graphs");

    let orchestrator = UpdateOrchestrator::new(
        utc_clock(),
        manager,
        Arc::new(analytics) as Arc<dyn AnalyticsProvider>,
        Arc::clone(&chat) as Arc<dyn ChatPoster>,
        graphs_dir.clone(),
    );

    Pipeline {
        _dir: dir,
        orchestrator,
        chat,
        graphs_dir,
    }
}

#[tokio::test]
async fn test_run_posts_all_enabled_graphs() {
    let config = test_config();
    let fixture = pipeline(config, FakeAnalytics::with_history(sample_plays()));

    fixture.orchestrator.run().await.unwrap();

    // Old artifact messages were cleared exactly once
    assert_eq!(fixture.chat.delete_calls.load(Ordering::SeqCst), 1);

    let posted = fixture.chat.posted.lock().await;
    assert_eq!(posted.len(), 1);
    let (channel, files) = &posted[0];
    assert_eq!(*channel, 424242);
    // All six graph types rendered and passed validation
    assert_eq!(files.len(), 6);
    for file in files {
        assert!(file.exists());
        assert_eq!(file.extension().unwrap(), "png");
    }
}

#[tokio::test]
async fn test_run_respects_graph_toggles() {
    let mut config = test_config();
    config.enable_top_10_users = false;
    config.enable_play_count_by_month = false;
    let fixture = pipeline(config, FakeAnalytics::with_history(sample_plays()));

    fixture.orchestrator.run().await.unwrap();

    let posted = fixture.chat.posted.lock().await;
    let (_, files) = &posted[0];
    assert_eq!(files.len(), 4);
    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert!(!names.iter().any(|n| n.contains("top_10_users")));
    assert!(!names.iter().any(|n| n.contains("play_count_by_month")));
}

#[tokio::test]
async fn test_run_with_no_enabled_graphs_is_permanent_failure() {
    let mut config = test_config();
    config.enable_daily_play_count = false;
    config.enable_play_count_by_dayofweek = false;
    config.enable_play_count_by_hourofday = false;
    config.enable_top_10_platforms = false;
    config.enable_top_10_users = false;
    config.enable_play_count_by_month = false;
    let fixture = pipeline(config, FakeAnalytics::with_history(sample_plays()));

    let error = fixture.orchestrator.run().await.unwrap_err();
    assert!(error.to_string().contains("No valid files"));
    // Retrying cannot help: classified permanent
    assert_eq!(ErrorClassifier::classify(&error), ErrorKind::Permanent);

    // Nothing was posted and nothing deleted
    assert!(fixture.chat.posted.lock().await.is_empty());
    assert_eq!(fixture.chat.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fetch_failure_propagates_classified() {
    let fixture = pipeline(
        test_config(),
        FakeAnalytics::failing("service temporarily unavailable"),
    );

    let error = fixture.orchestrator.run().await.unwrap_err();
    assert_eq!(ErrorClassifier::classify(&error), ErrorKind::Transient);
    assert!(fixture.chat.posted.lock().await.is_empty());
}

#[tokio::test]
async fn test_user_graphs_exclude_top_users() {
    let fixture = pipeline(test_config(), FakeAnalytics::with_history(sample_plays()));

    let files = fixture.orchestrator.render_user_graphs(77).await.unwrap();
    assert_eq!(files.len(), 5);
    for file in &files {
        assert!(file.exists());
        assert!(!file
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("top_10_users"));
        assert!(file.starts_with(fixture.graphs_dir.join("users")));
    }
}

#[tokio::test]
async fn test_concurrent_runs_serialise() {
    let fixture = pipeline(test_config(), FakeAnalytics::with_history(sample_plays()));
    let orchestrator = Arc::new(fixture.orchestrator);

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };
    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Both runs completed; posts never interleaved within a run
    let posted = fixture.chat.posted.lock().await;
    assert_eq!(posted.len(), 2);
    assert_eq!(fixture.chat.delete_calls.load(Ordering::SeqCst), 2);
}

//! Update orchestration
//!
//! The single entrypoint the scheduler and the manual command path both
//! call: fetch playback statistics, render the enabled graphs, validate
//! the artifacts against upload limits, post them to the target channel
//! and clean old artifacts up. Rendering is CPU-heavy and runs on the
//! blocking pool; the scheduled and manual paths serialise on one run
//! guard so two pipelines never overlap.

use crate::analytics::{AnalyticsProvider, MonthlyPlays};
use crate::chat::{ChatPoster, MAX_FILES_PER_MESSAGE};
use crate::config::ConfigManager;
use crate::graphs::{render_enabled_graphs, GraphDataset, GraphScope};
use anyhow::{anyhow, Context, Result};
use shared::time::Clock;
use shared::utils::{cleanup_old_files, validate_upload_file};
use shared::BotError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How many recent channel messages are scanned for old artifact posts.
const DELETE_LOOKBACK: usize = 50;

/// Orchestrates the fetch → render → validate → post → cleanup pipeline.
pub struct UpdateOrchestrator {
    clock: Clock,
    config: Arc<ConfigManager>,
    analytics: Arc<dyn AnalyticsProvider>,
    chat: Arc<dyn ChatPoster>,
    output_dir: PathBuf,
    run_guard: Mutex<()>,
}

impl UpdateOrchestrator {
    pub fn new(
        clock: Clock,
        config: Arc<ConfigManager>,
        analytics: Arc<dyn AnalyticsProvider>,
        chat: Arc<dyn ChatPoster>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            clock,
            config,
            analytics,
            chat,
            output_dir,
            run_guard: Mutex::new(()),
        }
    }

    /// Run the full update pipeline once.
    ///
    /// Per-graph render failures do not abort the run; they escalate it to
    /// a transient failure after posting whatever rendered, so the
    /// scheduler's retry loop takes another pass. Zero valid artifacts is
    /// permanent: retrying cannot help.
    pub async fn run(&self) -> Result<()> {
        let _guard = self.run_guard.lock().await;
        let config = self.config.snapshot().await;

        info!("Starting graph update pipeline");

        // 1. Fetch
        let plays = self
            .analytics
            .play_history(config.time_range_days)
            .await
            .context("Failed to fetch play history")?;
        let monthly = self
            .analytics
            .plays_per_month(config.time_range_months)
            .await
            .context("Failed to fetch monthly plays")?;
        info!(
            "Fetched {} plays and {} monthly buckets",
            plays.len(),
            monthly.len()
        );

        // 2. Render, off the reactor
        let dataset = GraphDataset { plays, monthly };
        let render_config = config.clone();
        let output_dir = self.output_dir.clone();
        let clock = self.clock;
        let (paths, failures) = tokio::task::spawn_blocking(move || {
            render_enabled_graphs(
                &render_config,
                &dataset,
                &output_dir,
                &clock,
                GraphScope::Server,
            )
        })
        .await
        .context("Render worker panicked")??;

        // 3. Validate against upload limits
        let valid = self.validated(paths, config.elevated_upload_limits);
        if valid.is_empty() {
            return Err(anyhow!(BotError::Upload(
                "No valid files to upload after rendering".to_string()
            )));
        }

        // 4. Post: clear previous artifact messages, then upload in batches
        self.chat
            .delete_recent_bot_messages(config.channel_id, DELETE_LOOKBACK)
            .await
            .context("Failed to delete previous artifact messages")?;

        let content = format!(
            "Playback statistics for the last {} days",
            config.time_range_days
        );
        for batch in valid.chunks(MAX_FILES_PER_MESSAGE) {
            self.chat
                .post_files(config.channel_id, &content, batch)
                .await
                .context("Failed to post graphs")?;
        }

        // 5. Cleanup old artifacts
        match cleanup_old_files(&self.output_dir, config.keep_days) {
            Ok(removed) if removed > 0 => info!("Cleaned up {} old artifacts", removed),
            Ok(_) => {}
            Err(e) => warn!("Artifact cleanup failed: {:#}", e),
        }

        if !failures.is_empty() {
            return Err(anyhow!(BotError::TransientService(format!(
                "{} of {} graphs failed to render",
                failures.len(),
                failures.len() + valid.len()
            ))));
        }

        info!("Graph update pipeline completed");
        Ok(())
    }

    /// Render the per-user graph subset and return the valid artifacts.
    ///
    /// The monthly bucket is derived from the user's own history since the
    /// service-wide monthly endpoint cannot be filtered per user.
    pub async fn render_user_graphs(&self, user_id: u64) -> Result<Vec<PathBuf>> {
        let config = self.config.snapshot().await;

        let plays = self
            .analytics
            .user_play_history(user_id, config.time_range_days)
            .await
            .context("Failed to fetch user play history")?;

        let monthly = monthly_from_history(&self.clock, &plays);
        let dataset = GraphDataset { plays, monthly };

        let render_config = config.clone();
        let output_dir = self.output_dir.join("users");
        let clock = self.clock;
        let (paths, failures) = tokio::task::spawn_blocking(move || {
            render_enabled_graphs(
                &render_config,
                &dataset,
                &output_dir,
                &clock,
                GraphScope::PerUser,
            )
        })
        .await
        .context("Render worker panicked")??;

        for (kind, error) in &failures {
            warn!("User graph {} failed: {:#}", kind.slug(), error);
        }

        Ok(self.validated(paths, config.elevated_upload_limits))
    }

    fn validated(&self, paths: Vec<PathBuf>, elevated: bool) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|path| {
                let validation = validate_upload_file(path, elevated);
                if !validation.valid {
                    warn!(
                        "Dropping invalid artifact {}: {}",
                        path.display(),
                        validation.error.as_deref().unwrap_or("unknown")
                    );
                }
                validation.valid
            })
            .collect()
    }
}

/// Aggregate a play history into monthly buckets, oldest first.
fn monthly_from_history(
    clock: &Clock,
    plays: &[crate::analytics::PlayRecord],
) -> Vec<MonthlyPlays> {
    let mut buckets: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for play in plays {
        let month = clock
            .to_system_zone(&play.timestamp)
            .format("%Y-%m")
            .to_string();
        let entry = buckets.entry(month).or_default();
        match play.media_type {
            crate::analytics::MediaType::Movie => entry.0 += 1,
            crate::analytics::MediaType::Tv => entry.1 += 1,
            _ => {}
        }
    }
    buckets
        .into_iter()
        .map(|(month, (movies, tv))| MonthlyPlays { month, movies, tv })
        .collect()
}

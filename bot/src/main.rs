//! Playback statistics graphing bot
//!
//! The bot periodically pulls playback statistics from a media-analytics
//! service, renders a set of time-series graphs and posts them to a chat
//! channel. A persistent, self-recovering scheduler drives the update
//! pipeline; slash-style command handlers expose configuration, manual
//! refreshes, per-user graphs and uptime.
// This is the main entry point. It is responsible for:
// - Initializing logging and configuration.
// - Wiring the clients, orchestrator, scheduler and command surface.
// - Managing the application's lifecycle, including graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

mod analytics;
mod chat;
mod commands;
mod config;
mod graphs;
mod orchestrator;
mod scheduling;
mod state;

use analytics::{AnalyticsProvider, HttpAnalyticsClient};
use chat::{ChatPoster, RestChatClient};
use commands::CommandSurface;
use config::{ConfigManager, CONFIG_FILE};
use orchestrator::UpdateOrchestrator;
use scheduling::types::RetryPolicy;
use scheduling::UpdateScheduler;
use shared::time::Clock;
use state::StateStore;

/// Interval between checks for on-disk configuration edits.
const CONFIG_WATCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Command-line arguments for the bot
#[derive(Parser, Debug)]
#[command(name = "bot")]
#[command(about = "Playback statistics graphing bot", long_about = None)]
struct CliArgs {
    /// Path to the configuration directory containing config.yml
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Override the data directory (state file and rendered graphs)
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Write logs to daily-rotated files in this directory as well
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

/// The main application structure, holding the wired components.
pub struct Bot {
    config: Arc<ConfigManager>,
    scheduler: UpdateScheduler,
    commands: Arc<CommandSurface>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Bot {
    /// Create and wire all components. Fails when the configuration cannot
    /// be loaded or validated.
    pub async fn new(config_dir: PathBuf, data_dir: Option<PathBuf>) -> Result<Self> {
        info!("Starting playback graphs bot");

        let clock = Clock::system();
        let config_path = config_dir.join(CONFIG_FILE);
        let config = Arc::new(ConfigManager::load(config_path, clock)?);

        // The data directory is a sibling of the config directory unless
        // overridden.
        let data_dir = data_dir.unwrap_or_else(|| {
            config_dir
                .parent()
                .map(|p| p.join("data"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        });
        info!("Data directory: {}", data_dir.display());

        let snapshot = config.snapshot().await;
        info!(
            channel_id = snapshot.channel_id,
            update_days = snapshot.update_days,
            fixed_update_time = %snapshot.fixed_update_time,
            "Configuration loaded"
        );

        let store = Arc::new(StateStore::new(
            data_dir.join("scheduler_state.json"),
            clock,
        ));

        let analytics: Arc<dyn AnalyticsProvider> = Arc::new(HttpAnalyticsClient::new(
            &snapshot.api_base_url,
            &snapshot.api_key,
        )?);
        let chat: Arc<dyn ChatPoster> = Arc::new(RestChatClient::new(&snapshot.chat_token)?);

        let orchestrator = Arc::new(UpdateOrchestrator::new(
            clock,
            Arc::clone(&config),
            Arc::clone(&analytics),
            Arc::clone(&chat),
            data_dir.join("graphs"),
        ));

        let scheduler = UpdateScheduler::new(clock, RetryPolicy::default(), store);
        let callback_orchestrator = Arc::clone(&orchestrator);
        scheduler
            .set_update_callback(Arc::new(move || {
                let orchestrator = Arc::clone(&callback_orchestrator);
                Box::pin(async move { orchestrator.run().await })
            }))
            .await;

        let commands = Arc::new(CommandSurface::new(
            clock,
            Arc::clone(&config),
            scheduler.clone(),
            Arc::clone(&orchestrator),
            analytics,
            chat,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            scheduler,
            commands,
            shutdown_tx,
        })
    }

    /// Start the scheduler and the housekeeping tasks.
    pub async fn start(&self) -> Result<()> {
        let scheduling = self
            .config
            .snapshot()
            .await
            .scheduling()
            .context("Invalid scheduling configuration")?;
        self.scheduler.start(scheduling).await?;

        self.commands
            .spawn_cooldown_sweeper(self.shutdown_tx.subscribe());
        self.spawn_config_listener();
        self.spawn_config_watcher();

        info!("Bot started");
        Ok(())
    }

    /// Re-apply the scheduling configuration whenever a schedule-affecting
    /// key changes.
    fn spawn_config_listener(&self) {
        let mut events = self.config.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let config = Arc::clone(&self.config);
        let scheduler = self.scheduler.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => match event {
                        Ok(event)
                            if event.key == "*" || shared::config::affects_schedule(&event.key) =>
                        {
                            match config.snapshot().await.scheduling() {
                                Ok(scheduling) => {
                                    if let Err(e) = scheduler.update_config(scheduling).await {
                                        error!("Failed to apply schedule change: {:#}", e);
                                    }
                                }
                                Err(e) => error!("Invalid scheduling configuration: {:#}", e),
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Config listener lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Config listener stopped");
        });
    }

    /// Detect configuration edits made directly on disk.
    fn spawn_config_watcher(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(CONFIG_WATCH_INTERVAL) => {
                        if let Err(e) = config.reload_if_changed().await {
                            warn!("Config reload check failed: {:#}", e);
                        }
                    }
                }
            }
            debug!("Config watcher stopped");
        });
    }

    /// Stop the housekeeping tasks and the scheduler, persisting state.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.scheduler.stop().await;
    }
}

// The `#[tokio::main]` attribute transforms the async main into a
// synchronous one that initializes a tokio runtime and runs the async code.
#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // `tracing_subscriber` configures how logs are processed and displayed;
    // RUST_LOG overrides the default filter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bot=info,shared=info"));

    // Keep the appender guard alive for the lifetime of the process.
    let _file_guard = match &cli_args.log_dir {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::daily(log_dir, "bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    };

    let bot = match Bot::new(cli_args.config_dir, cli_args.data_dir).await {
        Ok(bot) => bot,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = bot.start().await {
        error!("Failed to start: {:#}", e);
        std::process::exit(1);
    }

    // Set up signal handling for graceful shutdown.
    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("Received Ctrl+C");
        }
    };

    shutdown_signal.await;

    bot.shutdown().await;
    info!("Bot shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests;

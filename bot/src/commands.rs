//! Command surface
//!
//! Thin adapter binding the chat service's slash commands to the
//! scheduler, orchestrator and configuration manager. The transport layer
//! (command registration and dispatch) lives outside this crate; it calls
//! these handlers with a [`CommandContext`] describing the caller and
//! renders the returned [`CommandReply`].
//!
//! Every throttled command enforces a per-user and a global cooldown read
//! from configuration; engaged cooldowns answer with a relative timestamp
//! until release. Edit-style commands require the manage-guild permission,
//! which the transport resolves and passes in.

use crate::analytics::AnalyticsProvider;
use crate::chat::ChatPoster;
use crate::config::ConfigManager;
use crate::orchestrator::UpdateOrchestrator;
use crate::scheduling::types::Timestamp;
use crate::scheduling::UpdateScheduler;
use anyhow::Result;
use shared::config::{affects_schedule, is_configurable, CONFIGURABLE_KEYS};
use shared::time::{format_duration_human, format_for_chat, Clock, TimestampStyle};
use shared::BotError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

/// Interval between sweeps of expired cooldown entries.
const COOLDOWN_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Who invoked a command, as resolved by the transport layer.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub user_id: u64,
    pub user_name: String,
    /// Whether the caller holds the chat service's manage-guild permission
    pub has_manage_guild: bool,
}

/// A command response. All interaction responses are ephemeral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub ephemeral: bool,
}

impl CommandReply {
    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ephemeral: true,
        }
    }
}

#[derive(Debug, Default)]
struct CooldownTracker {
    per_user: HashMap<u64, Timestamp>,
    global_until: Option<Timestamp>,
}

/// The five command handlers plus cooldown bookkeeping.
pub struct CommandSurface {
    clock: Clock,
    start_time: Timestamp,
    config: Arc<ConfigManager>,
    scheduler: UpdateScheduler,
    orchestrator: Arc<UpdateOrchestrator>,
    analytics: Arc<dyn AnalyticsProvider>,
    chat: Arc<dyn ChatPoster>,
    cooldowns: Mutex<HashMap<&'static str, CooldownTracker>>,
}

impl CommandSurface {
    pub fn new(
        clock: Clock,
        config: Arc<ConfigManager>,
        scheduler: UpdateScheduler,
        orchestrator: Arc<UpdateOrchestrator>,
        analytics: Arc<dyn AnalyticsProvider>,
        chat: Arc<dyn ChatPoster>,
    ) -> Self {
        Self {
            start_time: clock.now(),
            clock,
            config,
            scheduler,
            orchestrator,
            analytics,
            chat,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Static metadata about the bot.
    pub fn about(&self) -> CommandReply {
        CommandReply::ephemeral(format!(
            "**Playback Graphs Bot** v{}\nRenders playback statistics and posts them on a schedule.\n{}",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY"),
        ))
    }

    /// Time since process start.
    pub fn uptime(&self) -> CommandReply {
        let now = self.clock.now();
        let uptime = format_duration_human(now - self.start_time);
        let since = format_for_chat(&self.start_time, TimestampStyle::LongDateTime);
        CommandReply::ephemeral(format!("Online for {uptime} (since {since})"))
    }

    /// View the configuration, or a single formatted value.
    pub async fn config_view(&self, key: Option<&str>) -> CommandReply {
        let config = self.config.snapshot().await;

        match key {
            Some(key) => match config.get_value(key) {
                Some(value) => CommandReply::ephemeral(format!("`{key}` = `{value}`")),
                None => CommandReply::ephemeral(format!("Unknown configuration key: `{key}`")),
            },
            None => {
                let mut lines = vec!["**Configuration**".to_string()];
                for key in CONFIGURABLE_KEYS {
                    if let Some(value) = config.get_value(key) {
                        lines.push(format!("`{key}` = `{value}`"));
                    }
                }
                CommandReply::ephemeral(lines.join("\n"))
            }
        }
    }

    /// Edit a configuration key.
    ///
    /// Validates and persists the new value, then refreshes the scheduler
    /// when the key affects the schedule (or the language changed).
    pub async fn config_edit(
        &self,
        ctx: &CommandContext,
        key: &str,
        value: &str,
    ) -> CommandReply {
        if !ctx.has_manage_guild {
            return CommandReply::ephemeral(
                "You need the Manage Server permission to edit the configuration.",
            );
        }

        if let Some(blocked) = self.check_cooldowns(ctx, "config").await {
            return blocked;
        }

        if !is_configurable(key) {
            return CommandReply::ephemeral(format!(
                "`{key}` is not an editable configuration key."
            ));
        }

        if let Err(e) = self.config.edit(key, value).await {
            // The in-memory configuration was not mutated
            return CommandReply::ephemeral(format!("Edit rejected: {e:#}"));
        }

        let mut reply = format!("`{key}` set to `{value}`.");
        if affects_schedule(key) || key == "language" {
            match self.refresh_scheduler().await {
                Ok(Some(next)) => {
                    reply.push_str(&format!(
                        " Next update: {}",
                        format_for_chat(&next, TimestampStyle::LongDateTime)
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Scheduler refresh after config edit failed: {:#}", e);
                    reply.push_str(" (scheduler refresh failed, see logs)");
                }
            }
        }

        self.engage_cooldowns(ctx, "config").await;
        info!("Command config_edit executed by {}", ctx.user_name);
        CommandReply::ephemeral(reply)
    }

    /// Force a full update run, disjoint from the scheduler's own pacing.
    pub async fn update_graphs(&self, ctx: &CommandContext) -> CommandReply {
        if !ctx.has_manage_guild {
            return CommandReply::ephemeral(
                "You need the Manage Server permission to trigger an update.",
            );
        }

        if let Some(blocked) = self.check_cooldowns(ctx, "update_graphs").await {
            return blocked;
        }

        info!("Manual graph update started by {}", ctx.user_name);
        match self.scheduler.force_update().await {
            Ok(()) => {
                self.engage_cooldowns(ctx, "update_graphs").await;
                let next = self.scheduler.next_update_time().await;
                let suffix = next
                    .map(|t| {
                        format!(
                            " Next scheduled update: {}",
                            format_for_chat(&t, TimestampStyle::LongDateTime)
                        )
                    })
                    .unwrap_or_default();
                CommandReply::ephemeral(format!("Graphs updated and posted.{suffix}"))
            }
            Err(e) => {
                error!("Manual graph update failed: {:#}", e);
                CommandReply::ephemeral(format!("Graph update failed: {e:#}"))
            }
        }
    }

    /// Render the caller's personal graphs and deliver them by direct
    /// message.
    pub async fn my_stats(&self, ctx: &CommandContext, identifier: &str) -> CommandReply {
        if let Some(blocked) = self.check_cooldowns(ctx, "my_stats").await {
            return blocked;
        }

        let user_id = match self.analytics.lookup_user(identifier).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                return CommandReply::ephemeral(
                    "No matching user found for that identifier.",
                )
            }
            Err(e) => {
                error!("User lookup failed: {:#}", e);
                return CommandReply::ephemeral("Could not reach the analytics service.");
            }
        };

        let files = match self.orchestrator.render_user_graphs(user_id).await {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => {
                return CommandReply::ephemeral(
                    "No graphs could be generated for your history.",
                )
            }
            Err(e) => {
                error!("Personal graph generation failed: {:#}", e);
                return CommandReply::ephemeral("Failed to generate your graphs.");
            }
        };

        match self
            .chat
            .post_files_to_dm(ctx.user_id, "Your personal playback statistics", &files)
            .await
        {
            Ok(()) => {
                self.engage_cooldowns(ctx, "my_stats").await;
                info!("Command my_stats executed by {}", ctx.user_name);
                CommandReply::ephemeral("Check your direct messages!")
            }
            Err(e) => {
                if let Some(BotError::Permission(_)) = e.downcast_ref::<BotError>() {
                    warn!("DM delivery failed, DMs closed for {}", ctx.user_name);
                    CommandReply::ephemeral(
                        "I couldn't message you. Please allow direct messages and try again.",
                    )
                } else {
                    error!("DM delivery failed: {:#}", e);
                    CommandReply::ephemeral("Failed to deliver your graphs.")
                }
            }
        }
    }

    /// Rebuild the scheduling configuration from the current snapshot and
    /// hand it to the scheduler.
    async fn refresh_scheduler(&self) -> Result<Option<Timestamp>> {
        let scheduling = self.config.snapshot().await.scheduling()?;
        self.scheduler.update_config(scheduling).await?;
        Ok(self.scheduler.next_update_time().await)
    }

    /// Cooldown values for a command, from the current configuration.
    async fn cooldown_settings(&self, command: &str) -> (i64, i64) {
        let config = self.config.snapshot().await;
        match command {
            "config" => (
                config.config_cooldown_minutes,
                config.config_global_cooldown_seconds,
            ),
            "update_graphs" => (
                config.update_graphs_cooldown_minutes,
                config.update_graphs_global_cooldown_seconds,
            ),
            "my_stats" => (
                config.my_stats_cooldown_minutes,
                config.my_stats_global_cooldown_seconds,
            ),
            _ => (0, 0),
        }
    }

    /// Check whether a command is on cooldown, returning the rejection
    /// reply when it is. A cooldown of zero or less is disabled.
    async fn check_cooldowns(
        &self,
        ctx: &CommandContext,
        command: &'static str,
    ) -> Option<CommandReply> {
        let (user_minutes, global_seconds) = self.cooldown_settings(command).await;
        if user_minutes <= 0 && global_seconds <= 0 {
            return None;
        }

        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock().await;
        let tracker = cooldowns.entry(command).or_default();
        tracker.per_user.retain(|_, until| *until > now);

        if global_seconds > 0 {
            if let Some(until) = tracker.global_until {
                if now < until {
                    return Some(CommandReply::ephemeral(format!(
                        "This command is busy. Try again {}.",
                        format_for_chat(&until, TimestampStyle::Relative)
                    )));
                }
            }
        }

        if user_minutes > 0 {
            if let Some(until) = tracker.per_user.get(&ctx.user_id) {
                if now < *until {
                    return Some(CommandReply::ephemeral(format!(
                        "You're on cooldown. Try again {}.",
                        format_for_chat(until, TimestampStyle::Relative)
                    )));
                }
            }
        }

        None
    }

    /// Engage cooldowns after a successful execution.
    async fn engage_cooldowns(&self, ctx: &CommandContext, command: &'static str) {
        let (user_minutes, global_seconds) = self.cooldown_settings(command).await;
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock().await;
        let tracker = cooldowns.entry(command).or_default();

        if user_minutes > 0 {
            tracker
                .per_user
                .insert(ctx.user_id, now + chrono::Duration::minutes(user_minutes));
        }
        if global_seconds > 0 {
            tracker.global_until = Some(now + chrono::Duration::seconds(global_seconds));
        }
    }

    /// Discard expired per-user cooldown entries.
    pub async fn sweep_expired_cooldowns(&self) {
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock().await;
        for tracker in cooldowns.values_mut() {
            tracker.per_user.retain(|_, until| *until > now);
            if tracker.global_until.map(|until| until <= now).unwrap_or(false) {
                tracker.global_until = None;
            }
        }
    }

    /// Periodically sweep expired cooldown entries until shutdown.
    pub fn spawn_cooldown_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let surface = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(COOLDOWN_SWEEP_INTERVAL) => {
                        surface.sweep_expired_cooldowns().await;
                    }
                }
            }
        })
    }
}

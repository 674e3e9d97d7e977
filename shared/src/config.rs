//! Configuration types and validation for the graphing bot
//!
//! This module defines the typed configuration schema loaded from the YAML
//! configuration file, the flat logical-key catalogue used by the command
//! surface for hot edits, and the scheduling value object consumed by the
//! scheduler.
// All accessors go through the typed struct; the key catalogue provides a
// bidirectional mapping between logical key names and struct fields so the
// command surface never touches serde shapes directly.

use crate::defaults::*;
use crate::time::{is_valid_fixed_time, parse_fixed_time};
use crate::utils::{validate_hex_color, validate_service_url};
use crate::BotError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Palette names recognised by the renderers. Anything else is rejected at
/// configuration time so a typo never silently falls back at render time.
pub const KNOWN_PALETTES: [&str; 14] = [
    "viridis", "plasma", "inferno", "magma", "cividis", "turbo", "tab10", "tab20", "set1", "set2",
    "pastel", "muted", "bright", "dark",
];

/// Check whether a palette name is recognised by the renderers.
pub fn is_known_palette(name: &str) -> bool {
    KNOWN_PALETTES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

/// The fixed catalogue of server graph types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    DailyPlayCount,
    PlayCountByDayOfWeek,
    PlayCountByHourOfDay,
    Top10Platforms,
    Top10Users,
    PlayCountByMonth,
}

impl GraphKind {
    pub const ALL: [GraphKind; 6] = [
        GraphKind::DailyPlayCount,
        GraphKind::PlayCountByDayOfWeek,
        GraphKind::PlayCountByHourOfDay,
        GraphKind::Top10Platforms,
        GraphKind::Top10Users,
        GraphKind::PlayCountByMonth,
    ];

    /// Stable identifier used in file names and configuration keys.
    pub fn slug(self) -> &'static str {
        match self {
            GraphKind::DailyPlayCount => "daily_play_count",
            GraphKind::PlayCountByDayOfWeek => "play_count_by_dayofweek",
            GraphKind::PlayCountByHourOfDay => "play_count_by_hourofday",
            GraphKind::Top10Platforms => "top_10_platforms",
            GraphKind::Top10Users => "top_10_users",
            GraphKind::PlayCountByMonth => "play_count_by_month",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GraphKind::DailyPlayCount => "Daily Play Count",
            GraphKind::PlayCountByDayOfWeek => "Play Count by Day of Week",
            GraphKind::PlayCountByHourOfDay => "Play Count by Hour of Day",
            GraphKind::Top10Platforms => "Top 10 Platforms",
            GraphKind::Top10Users => "Top 10 Users",
            GraphKind::PlayCountByMonth => "Play Count by Month",
        }
    }

    /// Graph types included in per-user stats. The top-users graph is
    /// meaningless for a single user and is excluded.
    pub fn per_user(self) -> bool {
        self != GraphKind::Top10Users
    }
}

/// Main bot configuration loaded from config.yml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// API key for the media-analytics service
    pub api_key: String,
    /// Base URL of the media-analytics service API
    pub api_base_url: String,
    /// Authentication token for the chat service
    pub chat_token: String,
    /// Chat channel id the graphs are posted to
    pub channel_id: u64,

    // Schedule settings
    /// Number of days between automatic updates (1-365)
    #[serde(default = "default_update_days")]
    pub update_days: u32,
    /// Fixed wall-clock time for updates ("HH:MM") or "disabled"
    #[serde(default = "default_fixed_update_time")]
    pub fixed_update_time: String,
    /// Number of days to keep rendered graph files
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
    /// Play-history window in days for the daily graphs
    #[serde(default = "default_time_range_days")]
    pub time_range_days: u32,
    /// Window in months for the monthly graph
    #[serde(default = "default_time_range_months")]
    pub time_range_months: u32,
    /// Interface language (en/da)
    #[serde(default = "default_language")]
    pub language: String,

    // Graph options
    /// Whether to censor usernames in graphs
    #[serde(default = "default_censor_usernames")]
    pub censor_usernames: bool,
    /// Whether to draw TV and movie plays as separate series
    #[serde(default = "default_media_type_separation")]
    pub enable_media_type_separation: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_daily_play_count: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_play_count_by_dayofweek: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_play_count_by_hourofday: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_top_10_platforms: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_top_10_users: bool,
    #[serde(default = "default_graph_enabled")]
    pub enable_play_count_by_month: bool,

    // Annotation options
    #[serde(default = "default_annotate")]
    pub annotate_daily_play_count: bool,
    #[serde(default = "default_annotate")]
    pub annotate_play_count_by_dayofweek: bool,
    #[serde(default = "default_annotate")]
    pub annotate_play_count_by_hourofday: bool,
    #[serde(default = "default_annotate")]
    pub annotate_top_10_platforms: bool,
    #[serde(default = "default_annotate")]
    pub annotate_top_10_users: bool,
    #[serde(default = "default_annotate")]
    pub annotate_play_count_by_month: bool,

    // Graph colours (hex: #RGB, #RGBA, #RRGGBB or #RRGGBBAA)
    #[serde(default = "default_tv_color")]
    pub tv_color: String,
    #[serde(default = "default_movie_color")]
    pub movie_color: String,
    #[serde(default = "default_annotation_color")]
    pub annotation_color: String,

    // Per-graph palettes (empty string uses colours/defaults)
    #[serde(default = "default_palette")]
    pub daily_play_count_palette: String,
    #[serde(default = "default_palette")]
    pub play_count_by_dayofweek_palette: String,
    #[serde(default = "default_palette")]
    pub play_count_by_hourofday_palette: String,
    #[serde(default = "default_palette")]
    pub top_10_platforms_palette: String,
    #[serde(default = "default_palette")]
    pub top_10_users_palette: String,
    #[serde(default = "default_palette")]
    pub play_count_by_month_palette: String,

    // Command cooldowns (0 or negative disables)
    #[serde(default = "default_cooldown_minutes")]
    pub config_cooldown_minutes: i64,
    #[serde(default = "default_global_cooldown_seconds")]
    pub config_global_cooldown_seconds: i64,
    #[serde(default = "default_cooldown_minutes")]
    pub update_graphs_cooldown_minutes: i64,
    #[serde(default = "default_global_cooldown_seconds")]
    pub update_graphs_global_cooldown_seconds: i64,
    #[serde(default = "default_cooldown_minutes")]
    pub my_stats_cooldown_minutes: i64,
    #[serde(default = "default_global_cooldown_seconds")]
    pub my_stats_global_cooldown_seconds: i64,

    // Upload settings
    /// Whether the target guild has elevated upload limits (25 MiB)
    #[serde(default = "default_elevated_upload_limits")]
    pub elevated_upload_limits: bool,
}

impl BotConfig {
    /// Validate the whole configuration, returning every problem found.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.api_key.trim().is_empty() {
            errors.push("api_key must not be empty".to_string());
        }
        if !validate_service_url(&self.api_base_url) {
            errors.push(format!("api_base_url is not a valid URL: {}", self.api_base_url));
        }
        if self.chat_token.trim().is_empty() {
            errors.push("chat_token must not be empty".to_string());
        }
        if self.channel_id == 0 {
            errors.push("channel_id must not be zero".to_string());
        }
        if !(1..=365).contains(&self.update_days) {
            errors.push(format!(
                "update_days must be between 1 and 365, got {}",
                self.update_days
            ));
        }
        if !is_valid_fixed_time(&self.fixed_update_time) {
            errors.push(format!(
                "fixed_update_time must be HH:MM or \"disabled\", got {}",
                self.fixed_update_time
            ));
        }
        if self.keep_days < 1 {
            errors.push("keep_days must be at least 1".to_string());
        }
        if self.time_range_days < 1 {
            errors.push("time_range_days must be at least 1".to_string());
        }
        if self.time_range_months < 1 {
            errors.push("time_range_months must be at least 1".to_string());
        }
        if !matches!(self.language.as_str(), "en" | "da") {
            errors.push(format!("language must be en or da, got {}", self.language));
        }

        for (key, value) in [
            ("tv_color", &self.tv_color),
            ("movie_color", &self.movie_color),
            ("annotation_color", &self.annotation_color),
        ] {
            if !validate_hex_color(value) {
                errors.push(format!("{key} is not a valid hex colour: {value}"));
            }
        }

        for kind in GraphKind::ALL {
            let palette = self.palette_for(kind);
            if !palette.is_empty() && !is_known_palette(palette) {
                errors.push(format!(
                    "{}_palette is not a recognised palette: {palette}",
                    kind.slug()
                ));
            }
        }

        errors
    }

    /// Validate the configuration, folding all problems into one error.
    pub fn validate(&self) -> Result<(), BotError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BotError::Config(errors.join("; ")))
        }
    }

    /// Build the scheduling value object from the current snapshot.
    pub fn scheduling(&self) -> Result<SchedulingConfig, BotError> {
        SchedulingConfig::new(self.update_days, self.fixed_update_time.clone())
    }

    pub fn is_graph_enabled(&self, kind: GraphKind) -> bool {
        match kind {
            GraphKind::DailyPlayCount => self.enable_daily_play_count,
            GraphKind::PlayCountByDayOfWeek => self.enable_play_count_by_dayofweek,
            GraphKind::PlayCountByHourOfDay => self.enable_play_count_by_hourofday,
            GraphKind::Top10Platforms => self.enable_top_10_platforms,
            GraphKind::Top10Users => self.enable_top_10_users,
            GraphKind::PlayCountByMonth => self.enable_play_count_by_month,
        }
    }

    pub fn is_annotated(&self, kind: GraphKind) -> bool {
        match kind {
            GraphKind::DailyPlayCount => self.annotate_daily_play_count,
            GraphKind::PlayCountByDayOfWeek => self.annotate_play_count_by_dayofweek,
            GraphKind::PlayCountByHourOfDay => self.annotate_play_count_by_hourofday,
            GraphKind::Top10Platforms => self.annotate_top_10_platforms,
            GraphKind::Top10Users => self.annotate_top_10_users,
            GraphKind::PlayCountByMonth => self.annotate_play_count_by_month,
        }
    }

    pub fn palette_for(&self, kind: GraphKind) -> &str {
        let palette = match kind {
            GraphKind::DailyPlayCount => &self.daily_play_count_palette,
            GraphKind::PlayCountByDayOfWeek => &self.play_count_by_dayofweek_palette,
            GraphKind::PlayCountByHourOfDay => &self.play_count_by_hourofday_palette,
            GraphKind::Top10Platforms => &self.top_10_platforms_palette,
            GraphKind::Top10Users => &self.top_10_users_palette,
            GraphKind::PlayCountByMonth => &self.play_count_by_month_palette,
        };
        palette.trim()
    }
}

/// Logical keys editable through the command surface. Secrets and the
/// channel binding are deliberately not listed; changing them requires a
/// restart with a new configuration file.
pub const CONFIGURABLE_KEYS: &[&str] = &[
    "update_days",
    "fixed_update_time",
    "keep_days",
    "time_range_days",
    "time_range_months",
    "language",
    "censor_usernames",
    "enable_media_type_separation",
    "enable_daily_play_count",
    "enable_play_count_by_dayofweek",
    "enable_play_count_by_hourofday",
    "enable_top_10_platforms",
    "enable_top_10_users",
    "enable_play_count_by_month",
    "annotate_daily_play_count",
    "annotate_play_count_by_dayofweek",
    "annotate_play_count_by_hourofday",
    "annotate_top_10_platforms",
    "annotate_top_10_users",
    "annotate_play_count_by_month",
    "tv_color",
    "movie_color",
    "annotation_color",
    "daily_play_count_palette",
    "play_count_by_dayofweek_palette",
    "play_count_by_hourofday_palette",
    "top_10_platforms_palette",
    "top_10_users_palette",
    "play_count_by_month_palette",
    "config_cooldown_minutes",
    "config_global_cooldown_seconds",
    "update_graphs_cooldown_minutes",
    "update_graphs_global_cooldown_seconds",
    "my_stats_cooldown_minutes",
    "my_stats_global_cooldown_seconds",
    "elevated_upload_limits",
];

/// Keys whose change requires the scheduler to recompute its schedule.
pub const SCHEDULE_AFFECTING_KEYS: &[&str] = &["update_days", "fixed_update_time"];

/// Check if a logical key is editable through the command surface.
pub fn is_configurable(key: &str) -> bool {
    CONFIGURABLE_KEYS.contains(&key)
}

/// Check if changing a logical key affects the computed schedule.
pub fn affects_schedule(key: &str) -> bool {
    SCHEDULE_AFFECTING_KEYS.contains(&key)
}

fn parse_bool(raw: &str) -> Result<bool, BotError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" => Ok(true),
        "false" | "0" | "no" | "off" | "f" => Ok(false),
        other => Err(BotError::Config(format!("Invalid boolean value: {other}"))),
    }
}

fn parse_int(key: &str, raw: &str) -> Result<i64, BotError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| BotError::Config(format!("Invalid integer for {key}: {raw}")))
}

impl BotConfig {
    /// Read the formatted value of a logical key.
    ///
    /// Returns `None` for unknown keys. Secrets are not reachable through
    /// the catalogue.
    pub fn get_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "update_days" => self.update_days.to_string(),
            "fixed_update_time" => self.fixed_update_time.clone(),
            "keep_days" => self.keep_days.to_string(),
            "time_range_days" => self.time_range_days.to_string(),
            "time_range_months" => self.time_range_months.to_string(),
            "language" => self.language.clone(),
            "censor_usernames" => self.censor_usernames.to_string(),
            "enable_media_type_separation" => self.enable_media_type_separation.to_string(),
            "enable_daily_play_count" => self.enable_daily_play_count.to_string(),
            "enable_play_count_by_dayofweek" => self.enable_play_count_by_dayofweek.to_string(),
            "enable_play_count_by_hourofday" => self.enable_play_count_by_hourofday.to_string(),
            "enable_top_10_platforms" => self.enable_top_10_platforms.to_string(),
            "enable_top_10_users" => self.enable_top_10_users.to_string(),
            "enable_play_count_by_month" => self.enable_play_count_by_month.to_string(),
            "annotate_daily_play_count" => self.annotate_daily_play_count.to_string(),
            "annotate_play_count_by_dayofweek" => self.annotate_play_count_by_dayofweek.to_string(),
            "annotate_play_count_by_hourofday" => self.annotate_play_count_by_hourofday.to_string(),
            "annotate_top_10_platforms" => self.annotate_top_10_platforms.to_string(),
            "annotate_top_10_users" => self.annotate_top_10_users.to_string(),
            "annotate_play_count_by_month" => self.annotate_play_count_by_month.to_string(),
            "tv_color" => self.tv_color.clone(),
            "movie_color" => self.movie_color.clone(),
            "annotation_color" => self.annotation_color.clone(),
            "daily_play_count_palette" => self.daily_play_count_palette.clone(),
            "play_count_by_dayofweek_palette" => self.play_count_by_dayofweek_palette.clone(),
            "play_count_by_hourofday_palette" => self.play_count_by_hourofday_palette.clone(),
            "top_10_platforms_palette" => self.top_10_platforms_palette.clone(),
            "top_10_users_palette" => self.top_10_users_palette.clone(),
            "play_count_by_month_palette" => self.play_count_by_month_palette.clone(),
            "config_cooldown_minutes" => self.config_cooldown_minutes.to_string(),
            "config_global_cooldown_seconds" => self.config_global_cooldown_seconds.to_string(),
            "update_graphs_cooldown_minutes" => self.update_graphs_cooldown_minutes.to_string(),
            "update_graphs_global_cooldown_seconds" => {
                self.update_graphs_global_cooldown_seconds.to_string()
            }
            "my_stats_cooldown_minutes" => self.my_stats_cooldown_minutes.to_string(),
            "my_stats_global_cooldown_seconds" => self.my_stats_global_cooldown_seconds.to_string(),
            "elevated_upload_limits" => self.elevated_upload_limits.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Parse, validate and assign a raw value to a logical key.
    ///
    /// The in-memory configuration is only mutated when the value passes
    /// validation; a failed edit leaves the snapshot untouched.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<(), BotError> {
        let raw = raw.trim();
        match key {
            "update_days" => {
                let days = parse_int(key, raw)?;
                if !(1..=365).contains(&days) {
                    return Err(BotError::Config(format!(
                        "update_days must be between 1 and 365, got {days}"
                    )));
                }
                self.update_days = days as u32;
            }
            "fixed_update_time" => {
                if !is_valid_fixed_time(raw) {
                    return Err(BotError::Config(format!(
                        "fixed_update_time must be HH:MM or \"disabled\", got {raw}"
                    )));
                }
                self.fixed_update_time = raw.to_ascii_lowercase();
            }
            "keep_days" => {
                let days = parse_int(key, raw)?;
                if days < 1 {
                    return Err(BotError::Config("keep_days must be at least 1".to_string()));
                }
                self.keep_days = days as u32;
            }
            "time_range_days" => {
                let days = parse_int(key, raw)?;
                if days < 1 {
                    return Err(BotError::Config(
                        "time_range_days must be at least 1".to_string(),
                    ));
                }
                self.time_range_days = days as u32;
            }
            "time_range_months" => {
                let months = parse_int(key, raw)?;
                if months < 1 {
                    return Err(BotError::Config(
                        "time_range_months must be at least 1".to_string(),
                    ));
                }
                self.time_range_months = months as u32;
            }
            "language" => {
                if !matches!(raw, "en" | "da") {
                    return Err(BotError::Config(format!(
                        "language must be en or da, got {raw}"
                    )));
                }
                self.language = raw.to_string();
            }
            "censor_usernames" => self.censor_usernames = parse_bool(raw)?,
            "enable_media_type_separation" => self.enable_media_type_separation = parse_bool(raw)?,
            "enable_daily_play_count" => self.enable_daily_play_count = parse_bool(raw)?,
            "enable_play_count_by_dayofweek" => {
                self.enable_play_count_by_dayofweek = parse_bool(raw)?
            }
            "enable_play_count_by_hourofday" => {
                self.enable_play_count_by_hourofday = parse_bool(raw)?
            }
            "enable_top_10_platforms" => self.enable_top_10_platforms = parse_bool(raw)?,
            "enable_top_10_users" => self.enable_top_10_users = parse_bool(raw)?,
            "enable_play_count_by_month" => self.enable_play_count_by_month = parse_bool(raw)?,
            "annotate_daily_play_count" => self.annotate_daily_play_count = parse_bool(raw)?,
            "annotate_play_count_by_dayofweek" => {
                self.annotate_play_count_by_dayofweek = parse_bool(raw)?
            }
            "annotate_play_count_by_hourofday" => {
                self.annotate_play_count_by_hourofday = parse_bool(raw)?
            }
            "annotate_top_10_platforms" => self.annotate_top_10_platforms = parse_bool(raw)?,
            "annotate_top_10_users" => self.annotate_top_10_users = parse_bool(raw)?,
            "annotate_play_count_by_month" => self.annotate_play_count_by_month = parse_bool(raw)?,
            "tv_color" | "movie_color" | "annotation_color" => {
                if !validate_hex_color(raw) {
                    return Err(BotError::Config(format!(
                        "{key} is not a valid hex colour: {raw}"
                    )));
                }
                let value = raw.to_ascii_lowercase();
                match key {
                    "tv_color" => self.tv_color = value,
                    "movie_color" => self.movie_color = value,
                    _ => self.annotation_color = value,
                }
            }
            "daily_play_count_palette"
            | "play_count_by_dayofweek_palette"
            | "play_count_by_hourofday_palette"
            | "top_10_platforms_palette"
            | "top_10_users_palette"
            | "play_count_by_month_palette" => {
                if !raw.is_empty() && !is_known_palette(raw) {
                    return Err(BotError::Config(format!(
                        "{key} is not a recognised palette: {raw}"
                    )));
                }
                let value = raw.to_ascii_lowercase();
                match key {
                    "daily_play_count_palette" => self.daily_play_count_palette = value,
                    "play_count_by_dayofweek_palette" => {
                        self.play_count_by_dayofweek_palette = value
                    }
                    "play_count_by_hourofday_palette" => {
                        self.play_count_by_hourofday_palette = value
                    }
                    "top_10_platforms_palette" => self.top_10_platforms_palette = value,
                    "top_10_users_palette" => self.top_10_users_palette = value,
                    _ => self.play_count_by_month_palette = value,
                }
            }
            "config_cooldown_minutes" => self.config_cooldown_minutes = parse_int(key, raw)?,
            "config_global_cooldown_seconds" => {
                self.config_global_cooldown_seconds = parse_int(key, raw)?
            }
            "update_graphs_cooldown_minutes" => {
                self.update_graphs_cooldown_minutes = parse_int(key, raw)?
            }
            "update_graphs_global_cooldown_seconds" => {
                self.update_graphs_global_cooldown_seconds = parse_int(key, raw)?
            }
            "my_stats_cooldown_minutes" => self.my_stats_cooldown_minutes = parse_int(key, raw)?,
            "my_stats_global_cooldown_seconds" => {
                self.my_stats_global_cooldown_seconds = parse_int(key, raw)?
            }
            "elevated_upload_limits" => self.elevated_upload_limits = parse_bool(raw)?,
            _ => {
                return Err(BotError::Config(format!(
                    "Unknown or non-editable configuration key: {key}"
                )))
            }
        }
        Ok(())
    }
}

/// Immutable scheduling configuration consumed by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulingConfig {
    update_days: u32,
    fixed_update_time: String,
}

impl SchedulingConfig {
    /// Construct a validated scheduling configuration.
    pub fn new(update_days: u32, fixed_update_time: String) -> Result<Self, BotError> {
        if !(1..=365).contains(&update_days) {
            return Err(BotError::Config(format!(
                "update_days must be between 1 and 365, got {update_days}"
            )));
        }
        if !is_valid_fixed_time(&fixed_update_time) {
            return Err(BotError::Config(format!(
                "fixed_update_time must be HH:MM or \"disabled\", got {fixed_update_time}"
            )));
        }
        Ok(Self {
            update_days,
            fixed_update_time: fixed_update_time.to_ascii_lowercase(),
        })
    }

    pub fn update_days(&self) -> u32 {
        self.update_days
    }

    pub fn fixed_update_time(&self) -> &str {
        &self.fixed_update_time
    }

    /// The parsed fixed time, or `None` in interval mode.
    ///
    /// Construction already validated the string, so parsing cannot fail
    /// here.
    pub fn fixed_time(&self) -> Option<NaiveTime> {
        parse_fixed_time(&self.fixed_update_time).ok().flatten()
    }

    pub fn is_interval_based(&self) -> bool {
        self.fixed_time().is_none()
    }

    pub fn is_fixed_time_based(&self) -> bool {
        !self.is_interval_based()
    }
}

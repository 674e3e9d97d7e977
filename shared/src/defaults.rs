//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

use crate::time::FIXED_TIME_DISABLED;

// Schedule defaults

/// Default number of days between automatic updates (7 days)
pub fn default_update_days() -> u32 {
    7
}

/// Default fixed update time (fixed-time scheduling disabled)
pub fn default_fixed_update_time() -> String {
    FIXED_TIME_DISABLED.to_string()
}

/// Default number of days to keep rendered graph files (7 days)
pub fn default_keep_days() -> u32 {
    7
}

/// Default play-history window for the daily graphs (30 days)
pub fn default_time_range_days() -> u32 {
    30
}

/// Default window for the monthly graph (12 months)
pub fn default_time_range_months() -> u32 {
    12
}

// Presentation defaults

/// Default interface language
pub fn default_language() -> String {
    "en".to_string()
}

/// Usernames are censored in graphs by default
pub fn default_censor_usernames() -> bool {
    true
}

/// Media type separation is enabled by default
pub fn default_media_type_separation() -> bool {
    true
}

/// Graph types are enabled by default
pub fn default_graph_enabled() -> bool {
    true
}

/// Value annotations are enabled by default
pub fn default_annotate() -> bool {
    true
}

/// Default colour for TV series data
pub fn default_tv_color() -> String {
    "#1f77b4".to_string()
}

/// Default colour for movie data
pub fn default_movie_color() -> String {
    "#ff7f0e".to_string()
}

/// Default colour for value annotations
pub fn default_annotation_color() -> String {
    "#2e2e2e".to_string()
}

/// Palettes are unset by default (empty string falls through to the
/// media-type or default colours)
pub fn default_palette() -> String {
    String::new()
}

// Cooldown defaults (0 disables the cooldown)

/// Default per-user cooldown in minutes
pub fn default_cooldown_minutes() -> i64 {
    0
}

/// Default global cooldown in seconds
pub fn default_global_cooldown_seconds() -> i64 {
    0
}

// Upload defaults

/// Standard upload size limits apply by default
pub fn default_elevated_upload_limits() -> bool {
    false
}

//! Priority-based colour and palette resolution
//!
//! Resolves the colour scheme for a graph type with a fixed priority rule:
//! a recognised per-graph palette wins, then media-type separation colours
//! when separation is enabled, then the built-in defaults. Every renderer
//! goes through [`effective_colors`] so the rule is applied uniformly.

use plotters::style::RGBColor;
use shared::config::{is_known_palette, BotConfig, GraphKind};
use tracing::warn;

/// The strategy the resolver picked for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorStrategy {
    /// A configured palette overrides everything
    Palette,
    /// Media-type separation colours (TV / movie)
    Separation,
    /// Built-in default colours
    Default,
}

/// Resolved colours for one graph type.
#[derive(Debug, Clone)]
pub struct ColorResolution {
    pub strategy: ColorStrategy,
    pub colors: Vec<RGBColor>,
}

/// Default series colour when nothing is configured.
const DEFAULT_SERIES_COLOR: RGBColor = RGBColor(0x1f, 0x77, 0xb4);

/// Parse a configured hex colour into an RGB value.
///
/// Accepts the same forms the config validator does; the alpha channel of
/// 4- and 8-digit forms is ignored. Invalid input falls back to the
/// default series colour.
pub fn parse_hex_color(value: &str) -> RGBColor {
    let digits = value.trim().trim_start_matches('#');

    let expand = |c: u8| (c << 4) | c;
    let nibble = |c: char| c.to_digit(16).map(|d| d as u8);

    let chars: Vec<u8> = match digits.chars().map(nibble).collect::<Option<Vec<u8>>>() {
        Some(chars) => chars,
        None => {
            warn!("Invalid hex colour '{}', using default", value);
            return DEFAULT_SERIES_COLOR;
        }
    };

    match chars.len() {
        3 | 4 => RGBColor(expand(chars[0]), expand(chars[1]), expand(chars[2])),
        6 | 8 => RGBColor(
            (chars[0] << 4) | chars[1],
            (chars[2] << 4) | chars[3],
            (chars[4] << 4) | chars[5],
        ),
        _ => {
            warn!("Invalid hex colour '{}', using default", value);
            DEFAULT_SERIES_COLOR
        }
    }
}

/// Resolve the effective colours for a graph type.
pub fn effective_colors(config: &BotConfig, kind: GraphKind) -> ColorResolution {
    // Priority 1: a recognised per-graph palette
    let palette = config.palette_for(kind);
    if !palette.is_empty() && is_known_palette(palette) {
        return ColorResolution {
            strategy: ColorStrategy::Palette,
            colors: palette_colors(palette),
        };
    }

    // Priority 2: media-type separation colours
    if config.enable_media_type_separation {
        return ColorResolution {
            strategy: ColorStrategy::Separation,
            colors: vec![
                parse_hex_color(&config.tv_color),
                parse_hex_color(&config.movie_color),
            ],
        };
    }

    // Priority 3: defaults
    ColorResolution {
        strategy: ColorStrategy::Default,
        colors: vec![DEFAULT_SERIES_COLOR],
    }
}

/// Expand a recognised palette name into its colour cycle.
pub fn palette_colors(name: &str) -> Vec<RGBColor> {
    let hex: &[&str] = match name.to_ascii_lowercase().as_str() {
        "viridis" => &[
            "#440154", "#46327e", "#365c8d", "#277f8e", "#1fa187", "#4ac16d", "#a0da39", "#fde725",
        ],
        "plasma" => &[
            "#0d0887", "#5302a3", "#8b0aa5", "#b83289", "#db5c68", "#f48849", "#febd2a", "#f0f921",
        ],
        "inferno" => &[
            "#000004", "#1b0c41", "#4a0c6b", "#781c6d", "#a52c60", "#cf4446", "#ed6925", "#fb9b06",
        ],
        "magma" => &[
            "#000004", "#180f3d", "#440f76", "#721f81", "#9e2f7f", "#cd4071", "#f1605d", "#fd9668",
        ],
        "cividis" => &[
            "#00224e", "#123570", "#3b496c", "#575d6d", "#707173", "#8a8678", "#a59c74", "#c3b369",
        ],
        "turbo" => &[
            "#30123b", "#4145ab", "#4675ed", "#39a2fc", "#1bcfd4", "#24eca6", "#61fc6c", "#a4fc3b",
        ],
        "tab10" => &[
            "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
            "#bcbd22", "#17becf",
        ],
        "tab20" => &[
            "#1f77b4", "#aec7e8", "#ff7f0e", "#ffbb78", "#2ca02c", "#98df8a", "#d62728", "#ff9896",
            "#9467bd", "#c5b0d5",
        ],
        "set1" => &[
            "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#ffff33", "#a65628", "#f781bf",
        ],
        "set2" => &[
            "#66c2a5", "#fc8d62", "#8da0cb", "#e78ac3", "#a6d854", "#ffd92f", "#e5c494", "#b3b3b3",
        ],
        "pastel" => &[
            "#a1c9f4", "#ffb482", "#8de5a1", "#ff9f9b", "#d0bbff", "#debb9b", "#fab0e4", "#cfcfcf",
        ],
        "muted" => &[
            "#4878d0", "#ee854a", "#6acc64", "#d65f5f", "#956cb4", "#8c613c", "#dc7ec0", "#797979",
        ],
        "bright" => &[
            "#023eff", "#ff7c00", "#1ac938", "#e8000b", "#8b2be2", "#9f4800", "#f14cc1", "#a3a3a3",
        ],
        "dark" => &[
            "#001c7f", "#b1400d", "#12711c", "#8c0800", "#591e71", "#592f0d", "#a23582", "#3c3c3c",
        ],
        other => {
            // Validated at configuration time, so this is unexpected
            warn!("Unrecognised palette '{}', using default colours", other);
            return vec![DEFAULT_SERIES_COLOR];
        }
    };

    hex.iter().map(|value| parse_hex_color(value)).collect()
}

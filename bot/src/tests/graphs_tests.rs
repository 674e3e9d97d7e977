//! Tests for palette resolution and graph generation

use super::{play, test_config, ts, utc_clock};
use crate::analytics::MediaType;
use crate::graphs::palette::{effective_colors, palette_colors, parse_hex_color, ColorStrategy};
use crate::graphs::{render_enabled_graphs, GraphDataset, GraphScope};
use plotters::style::RGBColor;
use shared::config::GraphKind;
use tempfile::TempDir;

#[test]
fn test_parse_hex_color_forms() {
    assert_eq!(parse_hex_color("#fff"), RGBColor(255, 255, 255));
    assert_eq!(parse_hex_color("#1f77b4"), RGBColor(0x1f, 0x77, 0xb4));
    assert_eq!(parse_hex_color("#1f77b4ff"), RGBColor(0x1f, 0x77, 0xb4));
    assert_eq!(parse_hex_color("#abc"), RGBColor(0xaa, 0xbb, 0xcc));
    // Invalid input falls back to the default series colour
    assert_eq!(parse_hex_color("chartreuse"), RGBColor(0x1f, 0x77, 0xb4));
}

#[test]
fn test_palette_overrides_separation() {
    let mut config = test_config();
    config.enable_media_type_separation = true;
    config.daily_play_count_palette = "viridis".to_string();

    let resolution = effective_colors(&config, GraphKind::DailyPlayCount);
    assert_eq!(resolution.strategy, ColorStrategy::Palette);
    assert_eq!(resolution.colors, palette_colors("viridis"));

    // Other graphs without a palette still separate
    let resolution = effective_colors(&config, GraphKind::Top10Users);
    assert_eq!(resolution.strategy, ColorStrategy::Separation);
}

#[test]
fn test_separation_uses_configured_colors() {
    let mut config = test_config();
    config.enable_media_type_separation = true;
    config.tv_color = "#112233".to_string();
    config.movie_color = "#445566".to_string();

    let resolution = effective_colors(&config, GraphKind::DailyPlayCount);
    assert_eq!(resolution.strategy, ColorStrategy::Separation);
    assert_eq!(
        resolution.colors,
        vec![RGBColor(0x11, 0x22, 0x33), RGBColor(0x44, 0x55, 0x66)]
    );
}

#[test]
fn test_default_strategy_when_nothing_configured() {
    let mut config = test_config();
    config.enable_media_type_separation = false;

    let resolution = effective_colors(&config, GraphKind::DailyPlayCount);
    assert_eq!(resolution.strategy, ColorStrategy::Default);
    assert_eq!(resolution.colors.len(), 1);
}

#[test]
fn test_palette_colors_known_names() {
    assert_eq!(palette_colors("tab10").len(), 10);
    assert_eq!(palette_colors("viridis").len(), 8);
    assert_eq!(palette_colors("Set1").len(), 8);
    // Unrecognised names degrade to the single default colour
    assert_eq!(palette_colors("sunburst").len(), 1);
}

#[test]
fn test_render_enabled_graphs_produces_artifacts() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let dataset = GraphDataset {
        plays: vec![
            play(ts(2025, 7, 20, 8, 0, 0), "alice", MediaType::Tv, "web"),
            play(ts(2025, 7, 20, 20, 0, 0), "bob", MediaType::Movie, "tv-app"),
        ],
        monthly: vec![crate::analytics::MonthlyPlays {
            month: "2025-07".to_string(),
            movies: 3,
            tv: 9,
        }],
    };

    let (paths, failures) =
        render_enabled_graphs(&config, &dataset, dir.path(), &utc_clock(), GraphScope::Server)
            .unwrap();

    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(paths.len(), 6);
    for path in &paths {
        let metadata = std::fs::metadata(path).unwrap();
        assert!(metadata.len() > 0, "{} is empty", path.display());
    }
}

#[test]
fn test_render_handles_empty_dataset() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let dataset = GraphDataset::default();

    let (paths, failures) =
        render_enabled_graphs(&config, &dataset, dir.path(), &utc_clock(), GraphScope::Server)
            .unwrap();

    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(paths.len(), 6);
}

#[test]
fn test_per_user_scope_excludes_top_users() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let dataset = GraphDataset::default();

    let (paths, _) =
        render_enabled_graphs(&config, &dataset, dir.path(), &utc_clock(), GraphScope::PerUser)
            .unwrap();

    assert_eq!(paths.len(), 5);
    assert!(!paths
        .iter()
        .any(|p| p.to_string_lossy().contains("top_10_users")));
}

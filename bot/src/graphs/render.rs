//! Graph renderers
//!
//! Each graph type is rendered from the dataset into a timestamped PNG in
//! the output directory. Drawing goes through a small set of chart helpers
//! so axis styling and annotation behaviour stay uniform; every helper
//! owns its drawing area for the duration of one render and releases it on
//! every exit path.
//!
//! Text rendering needs a registered font. The first render probes a set
//! of common system font locations; when none is found the charts are
//! still produced, just without captions, axis labels and annotations.

use super::palette::{self, ColorStrategy};
use super::GraphDataset;
use crate::analytics::{MediaType, PlayRecord};
use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, NaiveDate, Timelike};
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle, RGBColor};
use shared::config::{BotConfig, GraphKind};
use shared::time::Clock;
use shared::BotError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

const CHART_WIDTH: u32 = 1400;
const CHART_HEIGHT: u32 = 800;

/// Candidate font files, probed in order.
const FONT_CANDIDATES: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Register a usable sans-serif font once. Returns whether text rendering
/// is available.
fn ensure_font() -> bool {
    *FONT_AVAILABLE.get_or_init(|| {
        for candidate in FONT_CANDIDATES {
            if let Ok(bytes) = std::fs::read(candidate) {
                let leaked: &'static [u8] = Box::leak(bytes.into_boxed_slice());
                if register_font("sans-serif", FontStyle::Normal, leaked).is_ok() {
                    return true;
                }
            }
        }
        warn!("No usable font found, rendering graphs without text");
        false
    })
}

/// One named series of per-category values.
struct Series {
    label: String,
    values: Vec<u64>,
    color: RGBColor,
}

/// Render a single graph type and return the artifact path.
pub fn render_graph(
    kind: GraphKind,
    dataset: &GraphDataset,
    config: &BotConfig,
    output_dir: &Path,
    clock: &Clock,
) -> Result<PathBuf> {
    let stamp = clock.now().format("%Y%m%d_%H%M%S");
    let path = output_dir.join(format!("{}_{}.png", kind.slug(), stamp));

    let resolution = palette::effective_colors(config, kind);
    let annotate = config.is_annotated(kind);
    let annotation_color = palette::parse_hex_color(&config.annotation_color);
    let separated = resolution.strategy == ColorStrategy::Separation;

    match kind {
        GraphKind::DailyPlayCount => {
            let days = config.time_range_days;
            let dates = trailing_dates(clock, days);
            let categories: Vec<String> =
                dates.iter().map(|d| d.format("%m-%d").to_string()).collect();
            let series = bucketed_series(
                &dataset.plays,
                dates.len(),
                separated,
                &resolution.colors,
                |play| {
                    let date = clock.to_system_zone(&play.timestamp).date_naive();
                    dates.iter().position(|d| *d == date)
                },
            );
            draw_line_chart(
                &path,
                &format!("Daily Play Count (last {days} days)"),
                &categories,
                &series,
                annotate,
                annotation_color,
            )?;
        }
        GraphKind::PlayCountByDayOfWeek => {
            let categories: Vec<String> = [
                "Monday",
                "Tuesday",
                "Wednesday",
                "Thursday",
                "Friday",
                "Saturday",
                "Sunday",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            let series = bucketed_series(&dataset.plays, 7, separated, &resolution.colors, |play| {
                Some(
                    clock
                        .to_system_zone(&play.timestamp)
                        .weekday()
                        .num_days_from_monday() as usize,
                )
            });
            draw_bar_chart(
                &path,
                "Play Count by Day of Week",
                &categories,
                &series,
                &resolution.colors,
                annotate,
                annotation_color,
            )?;
        }
        GraphKind::PlayCountByHourOfDay => {
            let categories: Vec<String> = (0..24).map(|h| format!("{h:02}")).collect();
            let series =
                bucketed_series(&dataset.plays, 24, separated, &resolution.colors, |play| {
                    Some(clock.to_system_zone(&play.timestamp).hour() as usize)
                });
            draw_bar_chart(
                &path,
                "Play Count by Hour of Day",
                &categories,
                &series,
                &resolution.colors,
                annotate,
                annotation_color,
            )?;
        }
        GraphKind::Top10Platforms => {
            let categories = top_categories(&dataset.plays, 10, |play| play.platform.clone());
            let series = categorical_series(
                &dataset.plays,
                &categories,
                separated,
                &resolution.colors,
                |play| play.platform.clone(),
            );
            draw_bar_chart(
                &path,
                "Top 10 Platforms",
                &categories,
                &series,
                &resolution.colors,
                annotate,
                annotation_color,
            )?;
        }
        GraphKind::Top10Users => {
            let categories = top_categories(&dataset.plays, 10, |play| play.user.clone());
            let series = categorical_series(
                &dataset.plays,
                &categories,
                separated,
                &resolution.colors,
                |play| play.user.clone(),
            );
            let categories = if config.censor_usernames {
                censor_labels(categories.len())
            } else {
                categories
            };
            draw_bar_chart(
                &path,
                "Top 10 Users",
                &categories,
                &series,
                &resolution.colors,
                annotate,
                annotation_color,
            )?;
        }
        GraphKind::PlayCountByMonth => {
            let categories: Vec<String> =
                dataset.monthly.iter().map(|m| m.month.clone()).collect();
            let series = if separated {
                vec![
                    Series {
                        label: "TV".to_string(),
                        values: dataset.monthly.iter().map(|m| m.tv).collect(),
                        color: series_color(&resolution.colors, 0),
                    },
                    Series {
                        label: "Movies".to_string(),
                        values: dataset.monthly.iter().map(|m| m.movies).collect(),
                        color: series_color(&resolution.colors, 1),
                    },
                ]
            } else {
                vec![Series {
                    label: "Plays".to_string(),
                    values: dataset.monthly.iter().map(|m| m.tv + m.movies).collect(),
                    color: series_color(&resolution.colors, 0),
                }]
            };
            draw_bar_chart(
                &path,
                "Play Count by Month",
                &categories,
                &series,
                &resolution.colors,
                annotate,
                annotation_color,
            )?;
        }
    }

    Ok(path)
}

fn series_color(colors: &[RGBColor], index: usize) -> RGBColor {
    colors
        .get(index % colors.len().max(1))
        .copied()
        .unwrap_or(RGBColor(0x1f, 0x77, 0xb4))
}

/// Masked user labels, rank-ordered.
fn censor_labels(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("User {i}")).collect()
}

/// The trailing `days` calendar dates, oldest first, ending today.
fn trailing_dates(clock: &Clock, days: u32) -> Vec<NaiveDate> {
    let today = clock.now().date_naive();
    (0..days)
        .rev()
        .map(|offset| today - Duration::days(i64::from(offset)))
        .collect()
}

/// Build per-bucket series, split by media type when separation applies.
fn bucketed_series(
    plays: &[PlayRecord],
    buckets: usize,
    separated: bool,
    colors: &[RGBColor],
    bucket_of: impl Fn(&PlayRecord) -> Option<usize>,
) -> Vec<Series> {
    let count = |filter: Option<MediaType>| -> Vec<u64> {
        let mut values = vec![0u64; buckets];
        for play in plays {
            if let Some(media) = filter {
                if play.media_type != media {
                    continue;
                }
            }
            if let Some(index) = bucket_of(play) {
                if index < buckets {
                    values[index] += 1;
                }
            }
        }
        values
    };

    if separated {
        vec![
            Series {
                label: "TV".to_string(),
                values: count(Some(MediaType::Tv)),
                color: series_color(colors, 0),
            },
            Series {
                label: "Movies".to_string(),
                values: count(Some(MediaType::Movie)),
                color: series_color(colors, 1),
            },
        ]
    } else {
        vec![Series {
            label: "Plays".to_string(),
            values: count(None),
            color: series_color(colors, 0),
        }]
    }
}

/// The top `n` categories by total play count, descending.
fn top_categories(
    plays: &[PlayRecord],
    n: usize,
    category_of: impl Fn(&PlayRecord) -> String,
) -> Vec<String> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for play in plays {
        *counts.entry(category_of(play)).or_default() += 1;
    }
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().take(n).map(|(name, _)| name).collect()
}

/// Series over an explicit category list.
fn categorical_series(
    plays: &[PlayRecord],
    categories: &[String],
    separated: bool,
    colors: &[RGBColor],
    category_of: impl Fn(&PlayRecord) -> String,
) -> Vec<Series> {
    bucketed_series(plays, categories.len(), separated, colors, |play| {
        let category = category_of(play);
        categories.iter().position(|c| *c == category)
    })
}

fn render_error(title: &str, e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!(BotError::Render(format!("{title}: {e}")))
}

fn y_ceiling(series: &[Series]) -> u64 {
    let max_value = series
        .iter()
        .flat_map(|s| s.values.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1);
    max_value + max_value / 8 + 1
}

/// Draw grouped vertical bars. Single-series charts cycle the resolved
/// colours across bars; multi-series charts colour per series.
fn draw_bar_chart(
    path: &Path,
    title: &str,
    categories: &[String],
    series: &[Series],
    colors: &[RGBColor],
    annotate: bool,
    annotation_color: RGBColor,
) -> Result<()> {
    let with_text = ensure_font();

    let root = BitMapBackend::new(path, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render_error(title, e))?;

    let y_max = y_ceiling(series);
    let x_max = categories.len().max(1) as f64;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(24);
    if with_text {
        builder
            .caption(title, ("sans-serif", 36))
            .x_label_area_size(64)
            .y_label_area_size(64);
    }
    let mut chart = builder
        .build_cartesian_2d(0f64..x_max, 0u64..y_max)
        .map_err(|e| render_error(title, e))?;

    if with_text {
        let labels = categories.to_vec();
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(categories.len().max(1))
            .x_label_formatter(&move |x| {
                labels.get(x.floor() as usize).cloned().unwrap_or_default()
            })
            .y_desc("Plays")
            .draw()
            .map_err(|e| render_error(title, e))?;
    }

    let group_count = series.len().max(1) as f64;
    let slot_width = 0.8 / group_count;
    let cycle_colors = series.len() == 1 && colors.len() > 1;

    for (series_index, entry) in series.iter().enumerate() {
        let base_offset = 0.1 + series_index as f64 * slot_width;
        let entry_color = entry.color;
        let bar_colors: Vec<RGBColor> = entry
            .values
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if cycle_colors {
                    series_color(colors, i)
                } else {
                    entry_color
                }
            })
            .collect();

        chart
            .draw_series(entry.values.iter().enumerate().map(|(i, value)| {
                let x0 = i as f64 + base_offset;
                let x1 = x0 + slot_width;
                Rectangle::new([(x0, 0u64), (x1, *value)], bar_colors[i].filled())
            }))
            .map_err(|e| render_error(title, e))?
            .label(entry.label.clone())
            .legend(move |(x, y)| {
                Rectangle::new([(x, y - 6), (x + 12, y + 6)], entry_color.filled())
            });

        if annotate && with_text {
            let style = TextStyle::from(("sans-serif", 18)).color(&annotation_color);
            chart
                .draw_series(entry.values.iter().enumerate().filter(|(_, v)| **v > 0).map(
                    |(i, value)| {
                        let x = i as f64 + base_offset + slot_width / 2.0;
                        Text::new(value.to_string(), (x, *value), style.clone())
                    },
                ))
                .map_err(|e| render_error(title, e))?;
        }
    }

    if with_text && series.len() > 1 {
        chart
            .configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()
            .map_err(|e| render_error(title, e))?;
    }

    root.present().map_err(|e| render_error(title, e))?;
    Ok(())
}

/// Draw one or more line series over ordered categories.
fn draw_line_chart(
    path: &Path,
    title: &str,
    categories: &[String],
    series: &[Series],
    annotate: bool,
    annotation_color: RGBColor,
) -> Result<()> {
    let with_text = ensure_font();

    let root = BitMapBackend::new(path, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render_error(title, e))?;

    let y_max = y_ceiling(series);
    let x_max = categories.len().saturating_sub(1).max(1) as f64;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(24);
    if with_text {
        builder
            .caption(title, ("sans-serif", 36))
            .x_label_area_size(64)
            .y_label_area_size(64);
    }
    let mut chart = builder
        .build_cartesian_2d(0f64..x_max, 0u64..y_max)
        .map_err(|e| render_error(title, e))?;

    if with_text {
        let labels = categories.to_vec();
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(categories.len().clamp(2, 16))
            .x_label_formatter(&move |x| {
                labels.get(x.round() as usize).cloned().unwrap_or_default()
            })
            .y_desc("Plays")
            .draw()
            .map_err(|e| render_error(title, e))?;
    }

    for entry in series {
        let color = entry.color;
        chart
            .draw_series(LineSeries::new(
                entry
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, value)| (i as f64, *value)),
                color.stroke_width(3),
            ))
            .map_err(|e| render_error(title, e))?
            .label(entry.label.clone())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(3))
            });

        chart
            .draw_series(
                entry
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, value)| Circle::new((i as f64, *value), 3, color.filled())),
            )
            .map_err(|e| render_error(title, e))?;

        if annotate && with_text {
            let style = TextStyle::from(("sans-serif", 18)).color(&annotation_color);
            chart
                .draw_series(entry.values.iter().enumerate().filter(|(_, v)| **v > 0).map(
                    |(i, value)| Text::new(value.to_string(), (i as f64, *value), style.clone()),
                ))
                .map_err(|e| render_error(title, e))?;
        }
    }

    if with_text && series.len() > 1 {
        chart
            .configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()
            .map_err(|e| render_error(title, e))?;
    }

    root.present().map_err(|e| render_error(title, e))?;
    Ok(())
}

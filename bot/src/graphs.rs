//! Graph generation for the bot
//!
//! Turns fetched play history into rendered image artifacts. Each graph
//! type is a pure step from `(dataset, config)` to an image path; a
//! failure in one graph is recorded and the remaining graphs still render.
//! Colour selection goes through the palette resolver in every case.

pub mod palette;
pub mod render;

use crate::analytics::{MonthlyPlays, PlayRecord};
use anyhow::Result;
use shared::config::{BotConfig, GraphKind};
use shared::time::Clock;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Everything the renderers need for one generation pass.
#[derive(Debug, Clone, Default)]
pub struct GraphDataset {
    pub plays: Vec<PlayRecord>,
    pub monthly: Vec<MonthlyPlays>,
}

/// Which graph set to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphScope {
    /// All enabled server-wide graphs
    Server,
    /// The per-user subset (excludes the top-users graph)
    PerUser,
}

/// Render every enabled graph sequentially.
///
/// Returns the rendered artifact paths plus the per-graph failures; a
/// failed graph never aborts the others.
pub fn render_enabled_graphs(
    config: &BotConfig,
    dataset: &GraphDataset,
    output_dir: &Path,
    clock: &Clock,
    scope: GraphScope,
) -> Result<(Vec<PathBuf>, Vec<(GraphKind, anyhow::Error)>)> {
    std::fs::create_dir_all(output_dir)?;

    let kinds: Vec<GraphKind> = GraphKind::ALL
        .into_iter()
        .filter(|kind| config.is_graph_enabled(*kind))
        .filter(|kind| scope == GraphScope::Server || kind.per_user())
        .collect();

    info!("Starting generation of {} enabled graphs", kinds.len());

    let mut paths = Vec::new();
    let mut failures = Vec::new();

    for kind in kinds {
        match render::render_graph(kind, dataset, config, output_dir, clock) {
            Ok(path) => {
                debug!("Generated {}: {}", kind.slug(), path.display());
                paths.push(path);
            }
            Err(e) => {
                error!("Failed to generate {}: {:#}", kind.slug(), e);
                failures.push((kind, e));
            }
        }
    }

    info!("Successfully generated {} graphs", paths.len());
    Ok((paths, failures))
}

// Offline front end for the perception engine: reads one saved capture the
// way a sortie would and prints what it sees.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use sortie_engine::config::CombatConfig;
use sortie_engine::core_modules::graph_search::find_objectives;
use sortie_engine::core_modules::node_filter;
use sortie_engine::core_modules::perspective::PerspectiveModel;
use sortie_engine::core_modules::template::TemplateSet;
use sortie_engine::core_modules::tile_classifier::TileClass;
use sortie_engine::perception::MapPerception;
use sortie_engine::presets::{self, MapId};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "sortie-engine")]
#[command(about = "Map perception and fleet navigation for tile-based naval combat stages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the sea map in a saved 1920x1080 capture
    Analyze {
        screenshot: PathBuf,
        /// Directory holding the perception templates
        #[arg(long)]
        templates: PathBuf,
        /// Stage id; overrides the one in --config
        #[arg(long)]
        map: Option<String>,
        /// JSON run configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sortie_engine=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze { screenshot, templates, map, config } => {
            analyze(screenshot, templates, map, config)
        }
    }
}

fn analyze(
    screenshot: PathBuf,
    templates: PathBuf,
    map: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => CombatConfig::from_json_file(&path)?,
        None => CombatConfig::default(),
    };
    let map: MapId = match map {
        Some(id) => id.parse()?,
        None => config.map_id()?,
    };

    let screen = image::open(&screenshot)
        .with_context(|| format!("reading {}", screenshot.display()))?
        .to_rgb8();
    let templates = TemplateSet::load(&templates)
        .with_context(|| format!("loading templates from {}", templates.display()))?;

    let preset = presets::calibration_for(&map);
    let model = PerspectiveModel::from_points(&preset.source, &preset.destination)?;
    debug!(%map, canvas = ?model.canvas_size(), "calibrated");

    let perception = MapPerception::new(templates, config.merge_frames);
    let classified = perception
        .read_frame(&model, &screen)?
        .ok_or_else(|| anyhow!("no tile grid found in {}", screenshot.display()))?;

    let (rows, cols) = classified.grid.shape();
    info!(%map, rows, cols, "map read");
    println!("{}", classified.grid);

    let Some(&start) = classified.grid.find(TileClass::Character).first() else {
        println!("no character tile visible");
        return Ok(());
    };
    println!("character at {start}");

    let found = find_objectives(&classified.grid, start);
    let mut ranked: Vec<_> = found.iter().map(|o| o.index).collect();
    let order = &config.filter_exec_order;
    node_filter::apply_all(order, &mut ranked, &classified.nodes, &classified.grid);
    for index in ranked {
        let distance = found.iter().find(|o| o.index == index).map_or(0, |o| o.distance);
        let info =
            classified.nodes.get(&index).map(|n| format!(" {n:?}")).unwrap_or_default();
        println!("  {index} {:?} at {distance} moves{info}", classified.grid.get(index));
    }
    Ok(())
}

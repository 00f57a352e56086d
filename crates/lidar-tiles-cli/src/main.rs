//! lidar-tiles command-line interface.
//!
//! ```bash
//! lidar-tiles zones ./data
//! lidar-tiles summary ./data --zone Wet_Tropics
//! lidar-tiles mosaic ./data --zone Wet_Tropics --downsample 4 --output dem.tif
//! ```

use clap::{Parser, Subcommand};
use lidar_tiles::{
    list_zones, Catalog, CatalogConfig, CatalogError, InvalidTileId, MosaicOptions, MosaicProgress,
    ProgressCallback, TileId,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lidar-tiles")]
#[command(version, about = "Catalog, pair and mosaic LiDAR elevation and imagery tiles")]
struct Cli {
    /// YAML catalog configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where to scan: a root directory, or one zone below it.
#[derive(clap::Args)]
struct Location {
    /// Data root, or the tile directory itself when no zone is given
    root: PathBuf,

    /// Zone directory under the root
    #[arg(short, long)]
    zone: Option<String>,

    /// Ignore imagery files
    #[arg(long)]
    dem_only: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List zone directories under a data root
    Zones {
        /// Data root
        data_root: PathBuf,
    },
    /// Print tile counts for a catalog
    Summary {
        #[command(flatten)]
        location: Location,
    },
    /// List every tile pair
    Pairs {
        #[command(flatten)]
        location: Location,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Load one tile and describe it
    Load {
        #[command(flatten)]
        location: Location,

        /// 7-digit tile id
        tile_id: String,
    },
    /// Build a mosaic GeoTIFF
    Mosaic {
        #[command(flatten)]
        location: Location,

        /// Comma-separated tile ids (default: all tiles)
        #[arg(short, long, value_delimiter = ',')]
        tiles: Vec<String>,

        /// Keep every Nth pixel
        #[arg(short, long, default_value = "1")]
        downsample: u32,

        /// Elevation output file
        #[arg(short, long, default_value = "mosaic.tif")]
        output: PathBuf,

        /// Also write the imagery mosaic here
        #[arg(long)]
        imagery_output: Option<PathBuf>,
    },
    /// Save a catalog snapshot as JSON
    Index {
        #[command(flatten)]
        location: Location,

        /// Snapshot file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    TileId(#[from] InvalidTileId),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

type CliResult<T> = std::result::Result<T, CliError>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => CatalogConfig::from_yaml_file(path)?,
        None => CatalogConfig::default(),
    };

    match cli.command {
        Command::Zones { data_root } => {
            for zone in list_zones(&data_root)? {
                println!("{}", zone);
            }
        }
        Command::Summary { location } => {
            let catalog = open_catalog(&location, &config)?;
            print!("{}", catalog.summary());
            for warning in catalog.warnings() {
                warn!("{}", warning);
            }
        }
        Command::Pairs { location, json } => {
            let catalog = open_catalog(&location, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(catalog.pairs())?);
            } else {
                for pair in catalog.pairs() {
                    println!(
                        "{}\t{}\t{}",
                        pair.tile_id,
                        display_path(pair.elevation.as_ref().map(|f| f.path.as_path())),
                        display_path(pair.imagery.as_ref().map(|f| f.path.as_path()))
                    );
                }
            }
        }
        Command::Load { location, tile_id } => {
            let catalog = open_catalog(&location, &config)?;
            let tile_id: TileId = tile_id.parse()?;
            let tile = catalog.load_tile(&tile_id)?;
            let (width, height) = tile.elevation.dimensions();
            let bounds = tile.elevation.bounds();
            println!("Tile {}", tile_id);
            println!("  Size:      {}x{}", width, height);
            println!("  Transform: {:?}", tile.elevation.transform().to_gdal());
            println!(
                "  Bounds:    x {:.2}..{:.2}, y {:.2}..{:.2}",
                bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y
            );
            match tile.elevation.crs() {
                Some(crs) => println!("  CRS:       {}", crs),
                None => println!("  CRS:       unknown"),
            }
            match tile.elevation.stats() {
                Some(s) => println!(
                    "  Elevation: {:.2}..{:.2} m, mean {:.2} m, {}/{} valid",
                    s.min, s.max, s.mean, s.valid, s.total
                ),
                None => println!("  Elevation: no valid pixels"),
            }
            println!("  Imagery:   {}", if tile.imagery.is_some() { "yes" } else { "no" });
        }
        Command::Mosaic {
            location,
            tiles,
            downsample,
            output,
            imagery_output,
        } => {
            let catalog = open_catalog(&location, &config)?;
            let ids = if tiles.is_empty() {
                catalog.tile_ids().cloned().collect()
            } else {
                tiles
                    .iter()
                    .map(|s| s.trim().parse())
                    .collect::<std::result::Result<Vec<TileId>, _>>()?
            };
            let options = MosaicOptions {
                downsample,
                include_imagery: imagery_output.is_some(),
                ..MosaicOptions::default()
            };
            let progress: ProgressCallback = Box::new(|p: &MosaicProgress| {
                info!(
                    "[{}/{}] {} {}",
                    p.processed,
                    p.total,
                    p.tile_id,
                    if p.placed { "placed" } else { "skipped" }
                );
            });

            let start = Instant::now();
            let report = catalog.build_mosaic(&ids, &options, Some(&progress))?;
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            let result = &report.result;
            if result.is_empty() {
                warn!("No tiles placed; nothing written");
                return Ok(());
            }
            let (width, height) = result.dimensions();
            info!(
                "Mosaic {}x{} px, {}x{} tiles, built in {:.2?}",
                width,
                height,
                result.grid_rows,
                result.grid_cols,
                start.elapsed()
            );
            result.elevation.write_geotiff(&output)?;
            println!("Wrote {}", output.display());
            if let (Some(path), Some(imagery)) = (&imagery_output, &result.imagery) {
                imagery.write_geotiff(path)?;
                println!("Wrote {}", path.display());
            }
        }
        Command::Index { location, output } => {
            let catalog = open_catalog(&location, &config)?;
            catalog.snapshot()?.save(&output)?;
            println!("Wrote snapshot of {} tiles to {}", catalog.len(), output.display());
        }
    }
    Ok(())
}

fn open_catalog(location: &Location, config: &CatalogConfig) -> CliResult<Catalog> {
    let config = if location.dem_only {
        config.clone().elevation_only()
    } else {
        config.clone()
    };
    let catalog = match &location.zone {
        Some(zone) => Catalog::for_zone(&location.root, zone, &config)?,
        None => Catalog::build(&location.root, &config)?,
    };
    Ok(catalog)
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

//! Example: catalog a zone and write a downsampled mosaic.
//!
//! Usage: cargo run --example build_mosaic -- <data_root> <zone> [downsample] [output.tif]

use lidar_tiles::{Catalog, CatalogConfig, MosaicOptions, MosaicProgress, ProgressCallback};
use std::env;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <data_root> <zone> [downsample] [output.tif]", args[0]);
        eprintln!("Example: {} ./data Wet_Tropics 4 mosaic.tif", args[0]);
        std::process::exit(1);
    }

    let data_root = &args[1];
    let zone = &args[2];
    let downsample: u32 = args
        .get(3)
        .map(|s| s.parse().expect("Invalid downsample factor"))
        .unwrap_or(4);
    let output = args.get(4).map(|s| s.as_str()).unwrap_or("mosaic.tif");

    println!("Scanning {}/{}...", data_root, zone);
    let start = Instant::now();
    let catalog = Catalog::for_zone(data_root, zone, &CatalogConfig::default())
        .expect("Failed to build catalog");
    println!("Cataloged {} tiles in {:.3}s", catalog.len(), start.elapsed().as_secs_f64());
    println!("{}", catalog.summary());

    let progress: ProgressCallback = Box::new(|p: &MosaicProgress| {
        let status = if p.placed { "placed" } else { "skipped" };
        println!("  [{}/{}] {} {}", p.processed, p.total, p.tile_id, status);
    });

    let mosaic_start = Instant::now();
    let report = catalog
        .build_full_mosaic(&MosaicOptions::downsampled(downsample), Some(&progress))
        .expect("Failed to build mosaic");
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }

    let (width, height) = report.result.dimensions();
    println!(
        "Mosaic {}x{} ({}x{} tiles) in {:.3}s",
        width,
        height,
        report.result.grid_rows,
        report.result.grid_cols,
        mosaic_start.elapsed().as_secs_f64()
    );

    if report.result.is_empty() {
        println!("Nothing to write");
        return;
    }
    if let Some(stats) = report.result.elevation.stats() {
        println!("Elevation: {:.1} m to {:.1} m (mean {:.1} m)", stats.min, stats.max, stats.mean);
    }
    report.result.elevation.write_geotiff(output).expect("Failed to write mosaic");
    println!("Wrote {}", output);
}

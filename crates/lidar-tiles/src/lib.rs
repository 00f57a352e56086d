//! # lidar-tiles
//!
//! Catalog and mosaic builder for LiDAR elevation (DEM) and orthophoto
//! (ORTHO) GeoTIFF tiles.
//!
//! ## Overview
//!
//! Survey deliveries scatter tiles across deeply nested folders, and the two
//! providers name them differently:
//!
//! | Provider | Elevation                | Imagery            |
//! |----------|--------------------------|--------------------|
//! | NHP      | `EGM-NHP_2123200.tif`    | `NHP_2123200.tif`  |
//! | NMCG     | `EGM-NMCG_2073200.tif`   | `NMCG_2073200.tif` |
//!
//! What they share is a 7-digit [`TileId`]. This crate:
//! - walks a directory tree and classifies rasters by filename prefix or
//!   parent directory ([`scan_directory`]),
//! - pairs elevation and imagery by tile id in linear time ([`pair_tiles`]),
//! - loads single tiles with their geotransform and CRS, resampling imagery
//!   onto the elevation grid ([`Catalog::load_pair`]),
//! - assembles any subset of tiles into one georeferenced mosaic
//!   ([`Catalog::build_mosaic`]).
//!
//! Elevation no-data is [`NO_DATA`] (NaN), never zero.
//!
//! ## Example
//!
//! ```no_run
//! use lidar_tiles::{Catalog, CatalogConfig, MosaicOptions};
//!
//! let config = CatalogConfig::default();
//! let catalog = Catalog::for_zone("data", "Wet_Tropics", &config)?;
//! println!("{}", catalog.summary());
//!
//! let pair = catalog.first_complete_pair()?;
//! let tile = catalog.load_pair(pair)?;
//! println!("{} is {:?} pixels", pair.tile_id, tile.elevation.dimensions());
//!
//! let report = catalog.build_full_mosaic(&MosaicOptions::downsampled(4), None)?;
//! for warning in &report.warnings {
//!     eprintln!("warning: {}", warning);
//! }
//! report.result.elevation.write_geotiff("mosaic.tif")?;
//! # Ok::<(), lidar_tiles::CatalogError>(())
//! ```
//!
//! A scanned catalog can be frozen with [`Catalog::snapshot`] and restored
//! with [`CatalogSnapshot::into_catalog`], which refuses snapshots whose
//! tree has changed since.

mod catalog;
mod config;
mod discovery;
mod error;
mod geo;
pub mod metrics;
mod mosaic;
mod pairing;
mod raster;
mod resample;
mod snapshot;
mod tile_id;

pub use catalog::{list_zones, Catalog, CatalogSummary, ScanCounts, SUMMARY_SAMPLE_SIZE};
pub use config::{CatalogConfig, RasterRole, Resampling, RolePattern, RoleRule};
pub use discovery::{scan_directory, RasterFileRef, ScanReport};
pub use error::{CatalogError, MosaicWarning, RasterLoadError, ScanWarning};
pub use geo::{Bounds, Crs, GeoTransform, GEO_EPSILON};
pub use mosaic::{
    assemble, MosaicOptions, MosaicProgress, MosaicReport, MosaicResult, ProgressCallback,
    TilePlacement, DEFAULT_MAX_PIXELS,
};
pub use pairing::{pair_tiles, PairingOutcome, TilePair};
pub use raster::{
    is_no_data, ElevationRaster, ElevationStats, ImageryRaster, LoadedTile, RasterHeader, NO_DATA,
};
pub use resample::{resample_u8, stride_downsample};
pub use snapshot::{fingerprint_tree, CatalogSnapshot, SnapshotTile, SNAPSHOT_VERSION};
pub use tile_id::{InvalidTileId, TileId, TILE_ID_DIGITS};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

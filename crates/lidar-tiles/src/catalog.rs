//! The tile catalog: scan, pair and look up tiles of one survey zone.

use crate::config::CatalogConfig;
use crate::discovery::{scan_directory, RasterFileRef};
use crate::metrics::metric_defs;
use crate::mosaic::{place_tiles, MosaicOptions, MosaicProgress, MosaicReport, ProgressCallback};
use crate::pairing::{pair_tiles, TilePair};
use crate::raster::{LoadedTile, RasterHeader};
use crate::tile_id::TileId;
use crate::{CatalogError, MosaicWarning, RasterLoadError, Result, ScanWarning};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Number of pairs listed in a [`CatalogSummary`].
pub const SUMMARY_SAMPLE_SIZE: usize = 5;

/// File counts from the scan that built a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounts {
    /// Elevation files found, including unparseable and duplicate ones.
    pub elevation_files: usize,
    /// Imagery files found, including unparseable and duplicate ones.
    pub imagery_files: usize,
    /// Files without a tile id.
    pub unparseable: usize,
    /// Raster files no role rule matched.
    pub unrecognized: usize,
}

/// Paired tiles of one directory tree.
///
/// A catalog is built by scanning and never changes afterwards; rebuild it to
/// pick up changes on disk. It holds file references only, every load reads
/// from disk.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    zone: Option<String>,
    config: CatalogConfig,
    pairs: Vec<TilePair>,
    index: HashMap<TileId, usize>,
    warnings: Vec<ScanWarning>,
    counts: ScanCounts,
    headers: HashMap<TileId, RasterHeader>,
}

impl Catalog {
    /// Scan `root` and pair everything found.
    ///
    /// An empty tree gives an empty catalog, not an error.
    pub fn build<P: AsRef<Path>>(root: P, config: &CatalogConfig) -> Result<Self> {
        let report = scan_directory(root.as_ref(), config)?;
        let root = root.as_ref().canonicalize()?;
        let counts = ScanCounts {
            elevation_files: report.elevation.len(),
            imagery_files: report.imagery.len(),
            unparseable: report.unparseable(),
            unrecognized: report.unrecognized.len(),
        };
        let outcome = pair_tiles(&report.elevation, &report.imagery);

        let mut warnings = report.warnings;
        warnings.extend(outcome.duplicates);

        let catalog = Self::from_parts(root, None, config.clone(), outcome.pairs, warnings, counts);
        info!(
            "Catalog {}: {} tiles ({} complete)",
            catalog.root.display(),
            catalog.len(),
            catalog.complete_pairs().count()
        );
        Ok(catalog)
    }

    /// Build the catalog of one zone directory under `data_root`.
    pub fn for_zone<P: AsRef<Path>>(
        data_root: P,
        zone: &str,
        config: &CatalogConfig,
    ) -> Result<Self> {
        let mut catalog = Self::build(data_root.as_ref().join(zone), config)?;
        catalog.zone = Some(zone.to_string());
        Ok(catalog)
    }

    pub(crate) fn from_parts(
        root: PathBuf,
        zone: Option<String>,
        config: CatalogConfig,
        pairs: Vec<TilePair>,
        warnings: Vec<ScanWarning>,
        counts: ScanCounts,
    ) -> Self {
        let index = pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| (pair.tile_id.clone(), i))
            .collect();
        Self {
            root,
            zone,
            config,
            pairs,
            index,
            warnings,
            counts,
            headers: HashMap::new(),
        }
    }

    /// Attach elevation headers recorded in a snapshot.
    pub(crate) fn with_headers(mut self, headers: HashMap<TileId, RasterHeader>) -> Self {
        self.headers = headers;
        self
    }

    /// Root directory that was scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Zone name, when built with [`Catalog::for_zone`].
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Configuration used for the scan and for loads.
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// All pairs, sorted by tile id.
    pub fn pairs(&self) -> &[TilePair] {
        &self.pairs
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no tile was found.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Look up a tile.
    pub fn get(&self, tile_id: &TileId) -> Option<&TilePair> {
        self.index.get(tile_id).map(|&i| &self.pairs[i])
    }

    /// Look up a tile by its digit string.
    pub fn get_str(&self, tile_id: &str) -> Option<&TilePair> {
        TileId::parse(tile_id).and_then(|id| self.get(&id))
    }

    /// Tile ids in ascending order.
    pub fn tile_ids(&self) -> impl Iterator<Item = &TileId> {
        self.pairs.iter().map(|p| &p.tile_id)
    }

    /// Pairs with both elevation and imagery.
    pub fn complete_pairs(&self) -> impl Iterator<Item = &TilePair> {
        self.pairs.iter().filter(|p| p.is_complete())
    }

    /// The complete pair with the lowest tile id.
    pub fn first_complete_pair(&self) -> Result<&TilePair> {
        self.complete_pairs()
            .next()
            .ok_or_else(|| CatalogError::EmptyCatalog(self.root.clone()))
    }

    /// Fail with [`CatalogError::EmptyCatalog`] if no tile was found.
    pub fn require_tiles(&self) -> Result<&Self> {
        if self.is_empty() {
            return Err(CatalogError::EmptyCatalog(self.root.clone()));
        }
        Ok(self)
    }

    /// Warnings from scanning and pairing.
    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    /// File counts from the scan.
    pub fn counts(&self) -> ScanCounts {
        self.counts
    }

    /// Counts and a sample of pairs.
    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            zone: self.zone.clone(),
            root: self.root.clone(),
            elevation_files: self.counts.elevation_files,
            imagery_files: self.counts.imagery_files,
            complete_pairs: self.complete_pairs().count(),
            elevation_only: self.pairs.iter().filter(|p| p.is_elevation_only()).count(),
            imagery_only: self.pairs.iter().filter(|p| p.is_imagery_only()).count(),
            unparseable: self.counts.unparseable,
            unrecognized: self.counts.unrecognized,
            warnings: self.warnings.len(),
            sample: self.pairs.iter().take(SUMMARY_SAMPLE_SIZE).cloned().collect(),
        }
    }

    /// Load a pair's elevation and, if present and enabled, its imagery
    /// resampled onto the elevation grid.
    pub fn load_pair(&self, pair: &TilePair) -> Result<LoadedTile> {
        let elevation_file = elevation_of(pair)?;
        let elevation = elevation_file.load_elevation(&self.config)?;
        let imagery = match &pair.imagery {
            Some(file) if self.config.include_imagery => {
                Some(file.load_imagery(Some(&elevation), &self.config)?)
            }
            _ => None,
        };
        Ok(LoadedTile::new(pair.tile_id.clone(), elevation, imagery))
    }

    /// Load a tile by id.
    pub fn load_tile(&self, tile_id: &TileId) -> Result<LoadedTile> {
        let pair = self
            .get(tile_id)
            .ok_or_else(|| CatalogError::UnknownTile(tile_id.clone()))?;
        self.load_pair(pair)
    }

    /// Read the elevation header of a tile without decoding pixels.
    pub fn read_header(&self, tile_id: &TileId) -> Result<RasterHeader> {
        let pair = self
            .get(tile_id)
            .ok_or_else(|| CatalogError::UnknownTile(tile_id.clone()))?;
        Ok(elevation_of(pair)?.read_header()?)
    }

    /// Elevation header stored in the snapshot this catalog was restored
    /// from. Scanned catalogs have none; use [`Catalog::read_header`].
    pub fn cached_header(&self, tile_id: &TileId) -> Option<&RasterHeader> {
        self.headers.get(tile_id)
    }

    /// Assemble the requested tiles into one mosaic.
    ///
    /// Tiles are loaded in ascending id order. Unknown ids, imagery-only
    /// tiles and tiles that fail to load are reported as warnings and the
    /// build continues; imagery that fails to load leaves the tile's
    /// elevation in place. Only invalid options and an oversized output are
    /// errors. `progress` is called once per requested tile.
    pub fn build_mosaic(
        &self,
        tile_ids: &[TileId],
        options: &MosaicOptions,
        progress: Option<&ProgressCallback>,
    ) -> Result<MosaicReport> {
        options.validate()?;
        let start = Instant::now();

        let mut requested: Vec<&TileId> = tile_ids.iter().collect();
        requested.sort();
        requested.dedup();
        let total = requested.len();

        let mut warnings = Vec::new();
        let mut loaded = Vec::with_capacity(total);
        for (i, tile_id) in requested.into_iter().enumerate() {
            let tile = self.load_for_mosaic(tile_id, options, &mut warnings);
            let placed = tile.is_some();
            loaded.extend(tile);
            if let Some(callback) = progress {
                callback(&MosaicProgress {
                    processed: i + 1,
                    total,
                    tile_id: tile_id.clone(),
                    placed,
                });
            }
        }

        let placed = loaded.len();
        let mut report = place_tiles(loaded, options)?;
        warnings.append(&mut report.warnings);
        for warning in &warnings {
            warn!("{}", warning);
        }
        report.warnings = warnings;

        metric_defs::TILES_PLACED.increment(placed as u64);
        metric_defs::MOSAIC_SECONDS.record(start.elapsed().as_secs_f64());
        info!(
            "Mosaic of {}/{} tiles built in {:.2?} with {} warnings",
            placed,
            total,
            start.elapsed(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Mosaic every tile in the catalog.
    pub fn build_full_mosaic(
        &self,
        options: &MosaicOptions,
        progress: Option<&ProgressCallback>,
    ) -> Result<MosaicReport> {
        let ids: Vec<TileId> = self.tile_ids().cloned().collect();
        self.build_mosaic(&ids, options, progress)
    }

    fn load_for_mosaic(
        &self,
        tile_id: &TileId,
        options: &MosaicOptions,
        warnings: &mut Vec<MosaicWarning>,
    ) -> Option<LoadedTile> {
        let Some(pair) = self.get(tile_id) else {
            warnings.push(MosaicWarning::UnknownTile(tile_id.clone()));
            return None;
        };
        let Some(elevation_file) = &pair.elevation else {
            warnings.push(MosaicWarning::MissingElevation(tile_id.clone()));
            return None;
        };

        let elevation = match elevation_file.load_elevation(&self.config) {
            Ok(raster) => raster,
            Err(err) => {
                metric_defs::TILE_LOAD_FAILURES.increment(1);
                warnings.push(MosaicWarning::unavailable(tile_id, err));
                return None;
            }
        };

        let imagery = match &pair.imagery {
            Some(file) if options.include_imagery => {
                match file.load_imagery(Some(&elevation), &self.config) {
                    Ok(img) => Some(img),
                    Err(err) => {
                        metric_defs::TILE_LOAD_FAILURES.increment(1);
                        warnings.push(MosaicWarning::imagery_unavailable(tile_id, err));
                        None
                    }
                }
            }
            _ => None,
        };

        debug!("Loaded tile {} for mosaic", tile_id);
        let tile = LoadedTile::new(tile_id.clone(), elevation, imagery);
        Some(if options.downsample > 1 {
            tile.downsample(options.downsample)
        } else {
            tile
        })
    }
}

fn elevation_of(pair: &TilePair) -> std::result::Result<&RasterFileRef, RasterLoadError> {
    match (&pair.elevation, &pair.imagery) {
        (Some(file), _) => Ok(file),
        (None, Some(img)) => Err(RasterLoadError::new(&img.path, "tile has no elevation raster")),
        (None, None) => Err(RasterLoadError::new(Path::new(""), "tile has no rasters")),
    }
}

/// List zone directories under a data root, sorted by name.
///
/// Hidden directories are skipped.
pub fn list_zones<P: AsRef<Path>>(data_root: P) -> Result<Vec<String>> {
    let data_root = data_root.as_ref();
    if !data_root.is_dir() {
        return Err(CatalogError::RootNotFound(data_root.to_path_buf()));
    }
    let mut zones = Vec::new();
    for entry in std::fs::read_dir(data_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                zones.push(name.to_string());
            }
        }
    }
    zones.sort();
    Ok(zones)
}

/// Counts and a few example pairs of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    /// Zone name, if any.
    pub zone: Option<String>,
    /// Scanned directory.
    pub root: PathBuf,
    /// Elevation files found.
    pub elevation_files: usize,
    /// Imagery files found.
    pub imagery_files: usize,
    /// Tiles with both rasters.
    pub complete_pairs: usize,
    /// Tiles with elevation only.
    pub elevation_only: usize,
    /// Tiles with imagery only.
    pub imagery_only: usize,
    /// Files without a tile id.
    pub unparseable: usize,
    /// Raster files of unknown role.
    pub unrecognized: usize,
    /// Scan and pairing warnings.
    pub warnings: usize,
    /// First few pairs by tile id.
    pub sample: Vec<TilePair>,
}

impl fmt::Display for CatalogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => writeln!(f, "Zone {} ({})", zone, self.root.display())?,
            None => writeln!(f, "Catalog {}", self.root.display())?,
        }
        writeln!(f, "  Elevation files:  {}", self.elevation_files)?;
        writeln!(f, "  Imagery files:    {}", self.imagery_files)?;
        writeln!(f, "  Complete pairs:   {}", self.complete_pairs)?;
        writeln!(f, "  Elevation only:   {}", self.elevation_only)?;
        writeln!(f, "  Imagery only:     {}", self.imagery_only)?;
        writeln!(f, "  Unparseable:      {}", self.unparseable)?;
        writeln!(f, "  Unrecognized:     {}", self.unrecognized)?;
        writeln!(f, "  Warnings:         {}", self.warnings)?;
        for pair in &self.sample {
            let name = |file: &Option<RasterFileRef>| {
                file.as_ref()
                    .map(|r| r.file_name().to_string())
                    .unwrap_or_else(|| "-".to_string())
            };
            writeln!(
                f,
                "  {}  {:<28} {}",
                pair.tile_id,
                name(&pair.elevation),
                name(&pair.imagery)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoTransform;
    use crate::raster::{ElevationRaster, ImageryRaster};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn write_dem(path: &Path, origin_x: f64, fill: f32) {
        let transform = GeoTransform::north_up(origin_x, 6_210_000.0, 1.0, 1.0);
        write_dem_with(path, transform, fill);
    }

    fn write_dem_with(path: &Path, transform: GeoTransform, fill: f32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        ElevationRaster::new(4, 4, vec![fill; 16], transform, None)
            .write_geotiff(path)
            .unwrap();
    }

    fn write_ortho(path: &Path, origin_x: f64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let transform = GeoTransform::north_up(origin_x, 6_210_000.0, 0.5, 0.5);
        ImageryRaster::new(8, 8, vec![200; 8 * 8 * 3], transform, None)
            .write_geotiff(path)
            .unwrap();
    }

    fn id(s: &str) -> TileId {
        TileId::parse(s).unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.warnings().is_empty());
        assert!(matches!(catalog.require_tiles(), Err(CatalogError::EmptyCatalog(_))));
        assert!(matches!(catalog.first_complete_pair(), Err(CatalogError::EmptyCatalog(_))));
    }

    #[test]
    fn test_lookup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_dem(&dir.path().join("DEM/EGM-NHP_2123200.tif"), 0.0, 1.0);
        write_dem(&dir.path().join("DEM/EGM-NMCG_2073200.tif"), 4.0, 2.0);
        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();

        for pair in catalog.pairs() {
            assert_eq!(catalog.get(&pair.tile_id), Some(pair));
            assert_eq!(catalog.get_str(pair.tile_id.as_str()), Some(pair));
        }
        assert!(catalog.get_str("9999999").is_none());
        assert!(catalog.get_str("not-an-id").is_none());
    }

    #[test]
    fn test_load_pair_aligns_imagery() {
        let dir = tempfile::tempdir().unwrap();
        write_dem(&dir.path().join("DEM/EGM-NHP_2123200.tif"), 0.0, 12.0);
        write_ortho(&dir.path().join("ORTHO/NHP_2123200.tif"), 0.0);
        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();

        let pair = catalog.first_complete_pair().unwrap();
        let tile = catalog.load_pair(pair).unwrap();
        let imagery = tile.imagery.unwrap();
        assert_eq!(imagery.dimensions(), tile.elevation.dimensions());
        assert!(imagery.transform().approx_eq(tile.elevation.transform()));
        assert_eq!(tile.elevation.get(0, 0), Some(12.0));
    }

    #[test]
    fn test_mosaic_skips_broken_and_unknown_tiles() {
        let dir = tempfile::tempdir().unwrap();
        write_dem(&dir.path().join("EGM-NHP_0000001.tif"), 0.0, 1.0);
        write_dem(&dir.path().join("EGM-NHP_0000003.tif"), 8.0, 3.0);
        let broken = dir.path().join("EGM-NHP_0000002.tif");
        fs::write(&broken, b"garbage").unwrap();
        write_ortho(&dir.path().join("NHP_0000004.tif"), 12.0);

        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let progress: ProgressCallback = Box::new(move |p: &MosaicProgress| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(p.processed <= p.total);
        });

        let ids = [id("0000003"), id("0000001"), id("0000002"), id("0000004"), id("0000009")];
        let report = catalog
            .build_mosaic(&ids, &MosaicOptions::default(), Some(&progress))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.result.tile_ids, vec![id("0000001"), id("0000003")]);
        assert_eq!(report.result.dimensions(), (12, 4));
        assert_eq!(report.result.elevation.get(5, 0), None);
        assert_eq!(report.result.elevation.get(9, 0), Some(3.0));

        assert!(report.warnings.iter().any(|w| matches!(
            w,
            MosaicWarning::TileUnavailable { path, .. } if path.ends_with("EGM-NHP_0000002.tif")
        )));
        assert!(report.warnings.contains(&MosaicWarning::MissingElevation(id("0000004"))));
        assert!(report.warnings.contains(&MosaicWarning::UnknownTile(id("0000009"))));
    }

    #[test]
    fn test_zero_pixel_size_tile_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let good = GeoTransform::north_up(0.0, 100.0, 1.0, 1.0);
        let flat = GeoTransform::north_up(4.0, 100.0, 0.0, 0.0);
        write_dem_with(&dir.path().join("EGM-NHP_0000001.tif"), good, 1.0);
        write_dem_with(&dir.path().join("EGM-NHP_0000002.tif"), flat, 2.0);
        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();

        let unbounded = MosaicOptions {
            max_pixels: None,
            ..MosaicOptions::default()
        };
        for options in [MosaicOptions::default(), unbounded] {
            let report = catalog.build_full_mosaic(&options, None).unwrap();
            assert_eq!(report.result.tile_ids, vec![id("0000001")]);
            assert_eq!(report.result.dimensions(), (4, 4));
            match report.warnings.as_slice() {
                [MosaicWarning::TileUnavailable { tile_id, reason, .. }] => {
                    assert_eq!(tile_id, &id("0000002"));
                    assert!(reason.contains("degenerate pixel size"), "{}", reason);
                }
                other => panic!("unexpected warnings {:?}", other),
            }
        }
    }

    #[test]
    fn test_mosaic_of_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::build(dir.path(), &CatalogConfig::default()).unwrap();
        let report = catalog.build_full_mosaic(&MosaicOptions::default(), None).unwrap();
        assert!(report.result.is_empty());
        assert_eq!(report.warnings, vec![MosaicWarning::NoOverlap]);
    }

    #[test]
    fn test_zones_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        write_dem(&dir.path().join("Wet_Tropics/DEM/EGM-NHP_2123200.tif"), 0.0, 1.0);
        write_ortho(&dir.path().join("Wet_Tropics/ORTHO/NHP_2123200.tif"), 0.0);
        fs::create_dir_all(dir.path().join("Burdekin")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();

        assert_eq!(list_zones(dir.path()).unwrap(), vec!["Burdekin", "Wet_Tropics"]);

        let catalog =
            Catalog::for_zone(dir.path(), "Wet_Tropics", &CatalogConfig::default()).unwrap();
        assert_eq!(catalog.zone(), Some("Wet_Tropics"));
        let summary = catalog.summary();
        assert_eq!(summary.complete_pairs, 1);
        assert_eq!(summary.elevation_files, 1);
        assert_eq!(summary.imagery_files, 1);
        let text = summary.to_string();
        assert!(text.contains("Wet_Tropics"));
        assert!(text.contains("EGM-NHP_2123200.tif"));
    }

    #[test]
    fn test_missing_zone_is_root_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Catalog::for_zone(dir.path(), "Nowhere", &CatalogConfig::default()).unwrap_err();
        assert!(matches!(err, CatalogError::RootNotFound(_)));
    }
}

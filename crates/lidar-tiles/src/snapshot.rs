//! Serialized catalogs that can be reused while the tree is unchanged.
//!
//! A snapshot records a fingerprint of every raster file under the root
//! (relative path, size and modification time). Adding, removing, renaming
//! or rewriting a raster changes the fingerprint, and a stale snapshot is
//! refused instead of silently serving old pairs.

use crate::catalog::{Catalog, ScanCounts};
use crate::config::{CatalogConfig, RasterRole};
use crate::discovery::{scan_directory, RasterFileRef};
use crate::pairing::TilePair;
use crate::raster::RasterHeader;
use crate::tile_id::TileId;
use crate::{CatalogError, Result, ScanWarning};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One tile as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTile {
    /// Tile id.
    pub tile_id: TileId,
    /// Elevation file, if any.
    pub elevation: Option<PathBuf>,
    /// Imagery file, if any.
    pub imagery: Option<PathBuf>,
    /// Elevation dimensions and georeferencing, when the header was readable.
    pub header: Option<RasterHeader>,
}

impl SnapshotTile {
    fn into_parts(self) -> (TilePair, Option<RasterHeader>) {
        let pair = TilePair {
            elevation: self.elevation.map(|p| RasterFileRef::new(p, RasterRole::Elevation)),
            imagery: self.imagery.map(|p| RasterFileRef::new(p, RasterRole::Imagery)),
            tile_id: self.tile_id,
        };
        (pair, self.header)
    }
}

/// A catalog frozen to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Format version, see [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// Scanned root.
    pub root: PathBuf,
    /// Zone name, if any.
    pub zone: Option<String>,
    /// When the snapshot was taken.
    pub built_at: DateTime<Utc>,
    /// SHA-256 over the raster files under the root, hex encoded.
    pub fingerprint: String,
    /// Configuration the catalog was built with.
    pub config: CatalogConfig,
    /// File counts from the scan.
    pub counts: ScanCounts,
    /// Scan and pairing warnings.
    pub warnings: Vec<ScanWarning>,
    /// Tiles sorted by id.
    pub tiles: Vec<SnapshotTile>,
}

impl CatalogSnapshot {
    /// Write as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Saved snapshot of {} tiles to {}", self.tiles.len(), path.as_ref().display());
        Ok(())
    }

    /// Read a snapshot written by [`CatalogSnapshot::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Check whether the files under the root still match the fingerprint.
    pub fn is_fresh(&self) -> Result<bool> {
        if self.version != SNAPSHOT_VERSION || !self.root.is_dir() {
            return Ok(false);
        }
        Ok(fingerprint_tree(&self.root, &self.config)? == self.fingerprint)
    }

    /// Turn the snapshot back into a catalog without rescanning.
    ///
    /// Stored headers are served by [`Catalog::cached_header`]. Fails with
    /// [`CatalogError::StaleSnapshot`] when the tree changed.
    pub fn into_catalog(self) -> Result<Catalog> {
        if !self.is_fresh()? {
            return Err(CatalogError::StaleSnapshot(self.root));
        }
        debug!("Snapshot of {} is fresh", self.root.display());
        let mut pairs = Vec::with_capacity(self.tiles.len());
        let mut headers = HashMap::new();
        for tile in self.tiles {
            let (pair, header) = tile.into_parts();
            if let Some(header) = header {
                headers.insert(pair.tile_id.clone(), header);
            }
            pairs.push(pair);
        }
        let catalog = Catalog::from_parts(
            self.root,
            self.zone,
            self.config,
            pairs,
            self.warnings,
            self.counts,
        );
        Ok(catalog.with_headers(headers))
    }
}

impl Catalog {
    /// Capture the catalog and a fingerprint of its tree.
    ///
    /// Elevation headers come from [`Catalog::cached_header`] or are read
    /// from disk; unreadable ones are stored as `None`.
    pub fn snapshot(&self) -> Result<CatalogSnapshot> {
        let tiles = self
            .pairs()
            .iter()
            .map(|pair| {
                let header = self.cached_header(&pair.tile_id).copied().or_else(|| {
                    let file = pair.elevation.as_ref()?;
                    file.read_header()
                        .map_err(|err| debug!("No header for snapshot: {}", err))
                        .ok()
                });
                SnapshotTile {
                    tile_id: pair.tile_id.clone(),
                    elevation: pair.elevation.as_ref().map(|f| f.path.clone()),
                    imagery: pair.imagery.as_ref().map(|f| f.path.clone()),
                    header,
                }
            })
            .collect();

        Ok(CatalogSnapshot {
            version: SNAPSHOT_VERSION,
            root: self.root().to_path_buf(),
            zone: self.zone().map(str::to_string),
            built_at: Utc::now(),
            fingerprint: fingerprint_tree(self.root(), self.config())?,
            config: self.config().clone(),
            counts: self.counts(),
            warnings: self.warnings().to_vec(),
            tiles,
        })
    }
}

/// SHA-256 over the sorted relative path, size and modification time of
/// every raster file the scan would consider.
pub fn fingerprint_tree(root: &Path, config: &CatalogConfig) -> Result<String> {
    let report = scan_directory(root, config)?;
    let root = root.canonicalize()?;
    let mut paths: Vec<&Path> = report
        .elevation
        .iter()
        .chain(&report.imagery)
        .map(|f| f.path.as_path())
        .chain(report.unrecognized.iter().map(PathBuf::as_path))
        .collect();
    paths.sort();

    let mut hasher = Sha256::new();
    for path in paths {
        let relative = path.strip_prefix(&root).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let meta = std::fs::metadata(path)?;
        hasher.update(meta.len().to_le_bytes());
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        hasher.update(modified.as_secs().to_le_bytes());
        hasher.update(modified.subsec_nanos().to_le_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

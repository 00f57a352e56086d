//! Error and warning types for the tile catalog.
//!
//! Hard failures are [`CatalogError`]. Problems with a single file never
//! abort a scan or a mosaic; they are collected as [`ScanWarning`] or
//! [`MosaicWarning`] values and handed back next to the result.

use crate::tile_id::TileId;
use crate::RasterRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a catalog-level operation.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The scan root does not exist or is not a directory.
    #[error("Catalog root not found: {0}")]
    RootNotFound(PathBuf),

    /// I/O error outside of a per-file scan step.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Downsampling factor must be at least 1.
    #[error("Invalid downsample factor {0} (must be >= 1)")]
    InvalidDownsample(u32),

    /// The requested mosaic would exceed the configured pixel budget.
    #[error(
        "Mosaic of {width}x{height} pixels exceeds the limit of {limit} pixels; \
         increase the downsample factor"
    )]
    MosaicTooLarge {
        /// Output width in pixels.
        width: usize,
        /// Output height in pixels.
        height: usize,
        /// Configured maximum pixel count.
        limit: usize,
    },

    /// The catalog holds no usable tiles.
    #[error("No tiles found under {0}")]
    EmptyCatalog(PathBuf),

    /// A snapshot no longer matches the directory it was built from.
    #[error("Snapshot of {0} is stale; rebuild the catalog")]
    StaleSnapshot(PathBuf),

    /// The tile id is not present in the catalog.
    #[error("Tile {0} is not in the catalog")]
    UnknownTile(TileId),

    /// A raster could not be loaded.
    #[error(transparent)]
    Raster(#[from] RasterLoadError),
}

/// A raster file that could not be opened or decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to load raster {}: {reason}", path.display())]
pub struct RasterLoadError {
    /// File that failed to load.
    pub path: PathBuf,
    /// Human-readable cause.
    pub reason: String,
}

impl RasterLoadError {
    /// Create a load error for `path` from any displayable cause.
    pub fn new(path: &Path, reason: impl fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Non-fatal conditions recorded while scanning a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanWarning {
    /// A directory or entry could not be read; the scan went on without it.
    DirectoryUnreadable {
        /// Path that failed, when known.
        path: Option<PathBuf>,
        /// Underlying error.
        reason: String,
    },
    /// No 7-digit tile id in the filename; the file is excluded from pairing.
    UnparseableFilename {
        /// File without an id.
        path: PathBuf,
    },
    /// A second file claimed an already-taken (tile id, role) slot.
    DuplicateTile {
        /// Contested tile.
        tile_id: TileId,
        /// Role of both files.
        role: RasterRole,
        /// File that was kept.
        kept: PathBuf,
        /// File that was discarded.
        discarded: PathBuf,
    },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanWarning::DirectoryUnreadable { path: Some(path), reason } => {
                write!(f, "unreadable directory {}: {}", path.display(), reason)
            }
            ScanWarning::DirectoryUnreadable { path: None, reason } => {
                write!(f, "unreadable directory entry: {}", reason)
            }
            ScanWarning::UnparseableFilename { path } => {
                write!(f, "no tile id in filename {}", path.display())
            }
            ScanWarning::DuplicateTile {
                tile_id,
                role,
                kept,
                discarded,
            } => write!(
                f,
                "duplicate {} file for tile {}: kept {}, ignored {}",
                role,
                tile_id,
                kept.display(),
                discarded.display()
            ),
        }
    }
}

/// Per-tile problems collected during mosaic assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MosaicWarning {
    /// The elevation raster failed to load; the tile was left out.
    TileUnavailable {
        /// Tile that was skipped.
        tile_id: TileId,
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
    /// The imagery raster failed to load; elevation was still placed.
    ImageryUnavailable {
        /// Affected tile.
        tile_id: TileId,
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },
    /// Requested tile id is not in the catalog.
    UnknownTile(TileId),
    /// The tile has imagery but no elevation raster.
    MissingElevation(TileId),
    /// Nothing could be placed; the result is empty.
    NoOverlap,
}

impl MosaicWarning {
    pub(crate) fn unavailable(tile_id: &TileId, err: RasterLoadError) -> Self {
        MosaicWarning::TileUnavailable {
            tile_id: tile_id.clone(),
            path: err.path,
            reason: err.reason,
        }
    }

    pub(crate) fn imagery_unavailable(tile_id: &TileId, err: RasterLoadError) -> Self {
        MosaicWarning::ImageryUnavailable {
            tile_id: tile_id.clone(),
            path: err.path,
            reason: err.reason,
        }
    }
}

impl fmt::Display for MosaicWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MosaicWarning::TileUnavailable {
                tile_id,
                path,
                reason,
            } => write!(
                f,
                "tile {} unavailable ({}): {}",
                tile_id,
                path.display(),
                reason
            ),
            MosaicWarning::ImageryUnavailable {
                tile_id,
                path,
                reason,
            } => write!(
                f,
                "imagery for tile {} unavailable ({}): {}",
                tile_id,
                path.display(),
                reason
            ),
            MosaicWarning::UnknownTile(id) => write!(f, "tile {} is not in the catalog", id),
            MosaicWarning::MissingElevation(id) => {
                write!(f, "tile {} has no elevation raster", id)
            }
            MosaicWarning::NoOverlap => write!(f, "no requested tile could be placed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_load_error_carries_path() {
        let err = RasterLoadError::new(Path::new("/data/DEM/EGM-NHP_2123200.tif"), "truncated");
        let message = err.to_string();
        assert!(message.contains("EGM-NHP_2123200.tif"));
        assert!(message.contains("truncated"));

        let catalog_err: CatalogError = err.clone().into();
        assert!(matches!(catalog_err, CatalogError::Raster(e) if e == err));
    }

    #[test]
    fn test_mosaic_warning_from_load_error() {
        let id = TileId::parse("2123200").unwrap();
        let err = RasterLoadError::new(Path::new("/x/a.tif"), "bad header");
        let warning = MosaicWarning::unavailable(&id, err);
        match &warning {
            MosaicWarning::TileUnavailable { tile_id, path, .. } => {
                assert_eq!(tile_id, &id);
                assert_eq!(path, Path::new("/x/a.tif"));
            }
            other => panic!("unexpected warning {:?}", other),
        }
        assert!(warning.to_string().contains("2123200"));
    }
}

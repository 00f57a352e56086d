//! Recursive discovery of elevation and imagery rasters.

use crate::config::{CatalogConfig, RasterRole};
use crate::metrics::metric_defs;
use crate::tile_id::TileId;
use crate::{CatalogError, Result, ScanWarning};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A raster file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterFileRef {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// Detected role.
    pub role: RasterRole,
    /// Tile id from the filename, `None` if the name carries no id.
    pub tile_id: Option<TileId>,
}

impl RasterFileRef {
    /// Build a reference, deriving the tile id from the filename.
    pub fn new(path: impl Into<PathBuf>, role: RasterRole) -> Self {
        let path = path.into();
        let tile_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(TileId::from_filename);
        Self {
            path,
            role,
            tile_id,
        }
    }

    /// The file name, or an empty string for odd paths.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Everything a directory scan produced.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Elevation candidates in traversal order.
    pub elevation: Vec<RasterFileRef>,
    /// Imagery candidates in traversal order.
    pub imagery: Vec<RasterFileRef>,
    /// Raster files that matched no role rule.
    pub unrecognized: Vec<PathBuf>,
    /// Imagery files dropped because imagery is disabled.
    pub imagery_skipped: usize,
    /// Non-fatal problems.
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    /// Number of candidates without a tile id.
    pub fn unparseable(&self) -> usize {
        self.elevation
            .iter()
            .chain(&self.imagery)
            .filter(|f| f.tile_id.is_none())
            .count()
    }

    /// Number of accepted raster files.
    pub fn candidate_count(&self) -> usize {
        self.elevation.len() + self.imagery.len()
    }
}

/// Recursively scan `root` for raster tiles.
///
/// Only a missing root is fatal. Unreadable directories and files without a
/// tile id are recorded as warnings and the walk goes on. Directory entries
/// are visited in file-name order, so repeated scans of an unchanged tree
/// produce identical reports.
pub fn scan_directory(root: &Path, config: &CatalogConfig) -> Result<ScanReport> {
    if !root.is_dir() {
        return Err(CatalogError::RootNotFound(root.to_path_buf()));
    }
    let root = root.canonicalize()?;
    let mut report = ScanReport::default();

    let walker = WalkDir::new(&root)
        .follow_links(config.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| config.is_excluded_dir(name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable path during scan: {}", err);
                report.warnings.push(ScanWarning::DirectoryUnreadable {
                    path: err.path().map(Path::to_path_buf),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let Some(filename) = entry.file_name().to_str() else {
            debug!("Skipping non UTF-8 filename {}", entry.path().display());
            continue;
        };
        if !config.is_raster_filename(filename) {
            continue;
        }

        let dirs = relative_dirs(&root, entry.path());
        let Some(role) = config.classify(&dirs, filename) else {
            debug!("No role rule matches {}", entry.path().display());
            report.unrecognized.push(entry.path().to_path_buf());
            continue;
        };
        if role == RasterRole::Imagery && !config.include_imagery {
            report.imagery_skipped += 1;
            continue;
        }

        let file = RasterFileRef::new(entry.path(), role);
        if file.tile_id.is_none() {
            debug!("No tile id in {}", file.path.display());
            report
                .warnings
                .push(ScanWarning::UnparseableFilename {
                    path: file.path.clone(),
                });
        }
        match role {
            RasterRole::Elevation => report.elevation.push(file),
            RasterRole::Imagery => report.imagery.push(file),
        }
    }

    metric_defs::FILES_SCANNED.increment(report.candidate_count() as u64);
    metric_defs::SCAN_WARNINGS.increment(report.warnings.len() as u64);
    info!(
        "Scanned {}: {} elevation, {} imagery, {} unrecognized, {} warnings",
        root.display(),
        report.elevation.len(),
        report.imagery.len(),
        report.unrecognized.len(),
        report.warnings.len()
    );
    Ok(report)
}

/// Names of the directories between `root` and the file at `path`.
fn relative_dirs<'a>(root: &Path, path: &'a Path) -> Vec<&'a str> {
    path.strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect()
        })
        .unwrap_or_default()
}

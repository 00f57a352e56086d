//! Metric declarations for catalog builds and mosaic assembly.
//!
//! Metrics go through the [`metrics`] facade. Without an installed recorder
//! every call is a no-op, so the library never requires one.
//!
//! ```rust
//! use lidar_tiles::metrics::{metric_defs, MetricKind};
//!
//! assert_eq!(metric_defs::FILES_SCANNED.kind, MetricKind::Counter);
//! ```

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "lidar_tiles.catalog.files_scanned").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement.
    pub unit: Unit,
}

impl Metric {
    /// Creates a counter metric.
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit: Unit::Count,
        }
    }

    /// Creates a histogram metric.
    pub const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
        }
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }

    /// Increments a counter metric.
    pub(crate) fn increment(&self, value: u64) {
        debug_assert_eq!(self.kind, MetricKind::Counter);
        metrics::counter!(self.name).increment(value);
    }

    /// Records a histogram sample.
    pub(crate) fn record(&self, value: f64) {
        debug_assert_eq!(self.kind, MetricKind::Histogram);
        metrics::histogram!(self.name).record(value);
    }
}

/// All metrics emitted by this crate.
pub mod metric_defs {
    use super::Metric;
    use metrics::Unit;

    /// Raster files accepted by discovery.
    pub const FILES_SCANNED: Metric = Metric::counter(
        "lidar_tiles.catalog.files_scanned",
        "Raster files accepted by directory discovery",
    );

    /// Tile pairs produced by pairing.
    pub const PAIRS_BUILT: Metric =
        Metric::counter("lidar_tiles.catalog.pairs_built", "Tile pairs produced by pairing");

    /// Warnings recorded during scans.
    pub const SCAN_WARNINGS: Metric = Metric::counter(
        "lidar_tiles.catalog.scan_warnings",
        "Non-fatal problems recorded while scanning",
    );

    /// Tiles placed into mosaics.
    pub const TILES_PLACED: Metric =
        Metric::counter("lidar_tiles.mosaic.tiles_placed", "Tiles placed into mosaics");

    /// Tiles left out of mosaics because they failed to load.
    pub const TILE_LOAD_FAILURES: Metric = Metric::counter(
        "lidar_tiles.mosaic.tile_load_failures",
        "Tiles skipped because their raster failed to load",
    );

    /// Wall time spent assembling a mosaic.
    pub const MOSAIC_SECONDS: Metric = Metric::histogram(
        "lidar_tiles.mosaic.duration",
        "Wall time of a mosaic build",
        Unit::Seconds,
    );

    /// Every metric, for bulk registration.
    pub const ALL: &[Metric] = &[
        FILES_SCANNED,
        PAIRS_BUILT,
        SCAN_WARNINGS,
        TILES_PLACED,
        TILE_LOAD_FAILURES,
        MOSAIC_SECONDS,
    ];
}

/// Register descriptions for every metric. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

//! Mosaic assembly: placing loaded tiles onto one shared pixel grid.
//!
//! The output grid covers the union of all tile footprints at the finest
//! pixel size among them. Every output pixel inside a tile's footprint takes
//! the nearest source pixel. Tiles are placed in ascending tile id order and
//! later tiles overwrite earlier ones, except that no-data source pixels never
//! overwrite anything.

use crate::geo::{Bounds, GeoTransform, GEO_EPSILON};
use crate::raster::{is_no_data, ElevationRaster, ImageryRaster, LoadedTile};
use crate::tile_id::TileId;
use crate::{CatalogError, MosaicWarning, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default output budget: 16k x 16k pixels.
pub const DEFAULT_MAX_PIXELS: usize = 16_384 * 16_384;

/// Options for [`Catalog::build_mosaic`](crate::Catalog::build_mosaic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicOptions {
    /// Keep every `downsample`-th pixel of each tile. Must be at least 1.
    ///
    /// Footprints stay clipped to each tile's full-resolution extent. When a
    /// tile's size is not a multiple of the factor, its last pixel is still
    /// sampled and the tile edge is rounded to the nearest output pixel.
    pub downsample: u32,
    /// Also build an imagery mosaic.
    pub include_imagery: bool,
    /// Refuse to build outputs with more pixels than this.
    pub max_pixels: Option<usize>,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            downsample: 1,
            include_imagery: true,
            max_pixels: Some(DEFAULT_MAX_PIXELS),
        }
    }
}

impl MosaicOptions {
    /// Options with the given downsample factor.
    pub fn downsampled(factor: u32) -> Self {
        Self {
            downsample: factor,
            ..Self::default()
        }
    }

    /// Fail with [`CatalogError::InvalidDownsample`] on a zero factor.
    pub fn validate(&self) -> Result<()> {
        if self.downsample == 0 {
            return Err(CatalogError::InvalidDownsample(self.downsample));
        }
        Ok(())
    }
}

/// Progress of a mosaic build, reported once per requested tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicProgress {
    /// Tiles handled so far, including this one.
    pub processed: usize,
    /// Tiles requested.
    pub total: usize,
    /// Tile just handled.
    pub tile_id: TileId,
    /// Whether the tile made it into the mosaic.
    pub placed: bool,
}

/// Callback invoked with mosaic progress.
pub type ProgressCallback = Box<dyn Fn(&MosaicProgress) + Send + Sync>;

/// Where one tile landed in the mosaic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePlacement {
    /// Tile that was placed.
    pub tile_id: TileId,
    /// Row in the tile layout, 0 is northernmost.
    pub grid_row: usize,
    /// Column in the tile layout, 0 is westernmost.
    pub grid_col: usize,
    /// Output pixel row of the tile's top edge.
    pub pixel_row: usize,
    /// Output pixel column of the tile's left edge.
    pub pixel_col: usize,
    /// Footprint width in output pixels.
    pub width: usize,
    /// Footprint height in output pixels.
    pub height: usize,
}

/// A combined elevation grid and, optionally, imagery on the same grid.
#[derive(Debug, Clone)]
pub struct MosaicResult {
    /// Combined elevation, no-data where no tile covers.
    pub elevation: ElevationRaster,
    /// Combined imagery, black where no tile covers.
    pub imagery: Option<ImageryRaster>,
    /// Pixel-to-world mapping of both grids.
    pub transform: GeoTransform,
    /// Placed tiles, sorted.
    pub tile_ids: Vec<TileId>,
    /// Per-tile placement, in tile id order.
    pub placements: Vec<TilePlacement>,
    /// Rows in the tile layout.
    pub grid_rows: usize,
    /// Columns in the tile layout.
    pub grid_cols: usize,
    /// Downsample factor that was applied to every tile.
    pub downsample: u32,
}

impl MosaicResult {
    /// A mosaic with no tiles and a 0x0 grid.
    pub fn empty(downsample: u32) -> Self {
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0, 1.0);
        Self {
            elevation: ElevationRaster::no_data(0, 0, transform, None),
            imagery: None,
            transform,
            tile_ids: Vec::new(),
            placements: Vec::new(),
            grid_rows: 0,
            grid_cols: 0,
            downsample,
        }
    }

    /// True when no tile was placed.
    pub fn is_empty(&self) -> bool {
        self.tile_ids.is_empty()
    }

    /// `(width, height)` of the output grid.
    pub fn dimensions(&self) -> (usize, usize) {
        self.elevation.dimensions()
    }

    /// World bounds of the output grid.
    pub fn bounds(&self) -> Bounds {
        self.elevation.bounds()
    }

    /// Placement of a tile, if it was placed.
    pub fn placement(&self, tile_id: &TileId) -> Option<&TilePlacement> {
        self.placements.iter().find(|p| &p.tile_id == tile_id)
    }
}

/// A mosaic together with the problems met while building it.
#[derive(Debug, Clone)]
pub struct MosaicReport {
    /// The mosaic, possibly empty.
    pub result: MosaicResult,
    /// Per-tile problems; the build continued past each of them.
    pub warnings: Vec<MosaicWarning>,
}

/// Downsample loaded tiles and assemble them.
///
/// Tiles are taken at full resolution; `options.downsample` is applied here.
pub fn assemble(tiles: Vec<LoadedTile>, options: &MosaicOptions) -> Result<MosaicReport> {
    options.validate()?;
    let tiles = if options.downsample > 1 {
        tiles.iter().map(|t| t.downsample(options.downsample)).collect()
    } else {
        tiles
    };
    place_tiles(tiles, options)
}

/// Assemble tiles that were already downsampled by `options.downsample`.
pub(crate) fn place_tiles(
    mut tiles: Vec<LoadedTile>,
    options: &MosaicOptions,
) -> Result<MosaicReport> {
    tiles.sort_by(|a, b| a.tile_id.cmp(&b.tile_id));
    tiles.dedup_by(|a, b| a.tile_id == b.tile_id);
    tiles.retain(|t| {
        let usable = t.elevation.width() > 0
            && t.elevation.height() > 0
            && t.elevation.transform().has_valid_pixel_size();
        if !usable {
            debug!("Dropping tile {} with an empty grid or pixel size", t.tile_id);
        }
        usable
    });

    if tiles.is_empty() {
        return Ok(MosaicReport {
            result: MosaicResult::empty(options.downsample),
            warnings: vec![MosaicWarning::NoOverlap],
        });
    }

    let grid = OutputGrid::covering(&tiles);
    let (width, height) = (grid.width, grid.height);
    if let Some(limit) = options.max_pixels {
        if width.saturating_mul(height) > limit {
            return Err(CatalogError::MosaicTooLarge { width, height, limit });
        }
    }
    debug!(
        "Mosaic grid {}x{} at {:.3}x{:.3} for {} tiles",
        width,
        height,
        grid.res_x,
        grid.res_y,
        tiles.len()
    );

    let transform =
        GeoTransform::north_up(grid.bounds.min_x, grid.bounds.max_y, grid.res_x, grid.res_y);
    let crs = tiles.iter().find_map(|t| t.elevation.crs());
    let mut elevation = ElevationRaster::no_data(width, height, transform, crs);
    let mut imagery = options
        .include_imagery
        .then(|| ImageryRaster::black(width, height, transform, crs));

    let (rows, cols, grid_rows, grid_cols) = grid_layout(&tiles);
    let mut placements = Vec::with_capacity(tiles.len());
    for (i, tile) in tiles.iter().enumerate() {
        let footprint = grid.footprint(&tile.extent);
        place_elevation(&mut elevation, &tile.elevation, &footprint);
        if let Some(out) = imagery.as_mut() {
            let transform = tile.elevation.transform();
            match &tile.imagery {
                Some(img) => place_imagery(out, img, transform, &footprint),
                None => place_imagery(out, &tile.elevation.to_grayscale(), transform, &footprint),
            }
        }
        placements.push(TilePlacement {
            tile_id: tile.tile_id.clone(),
            grid_row: rows[i],
            grid_col: cols[i],
            pixel_row: footprint.row,
            pixel_col: footprint.col,
            width: footprint.width,
            height: footprint.height,
        });
    }

    info!(
        "Assembled mosaic of {} tiles ({}x{} pixels, {}x{} tile grid)",
        tiles.len(),
        width,
        height,
        grid_rows,
        grid_cols
    );
    Ok(MosaicReport {
        result: MosaicResult {
            elevation,
            imagery,
            transform,
            tile_ids: tiles.into_iter().map(|t| t.tile_id).collect(),
            placements,
            grid_rows,
            grid_cols,
            downsample: options.downsample,
        },
        warnings: Vec::new(),
    })
}

/// Shape of the output grid.
struct OutputGrid {
    bounds: Bounds,
    res_x: f64,
    res_y: f64,
    width: usize,
    height: usize,
}

/// Output pixel window covered by one tile, clipped to the grid.
struct Footprint {
    row: usize,
    col: usize,
    width: usize,
    height: usize,
}

impl OutputGrid {
    fn covering(tiles: &[LoadedTile]) -> Self {
        let mut bounds = tiles[0].extent;
        let (mut res_x, mut res_y) = tiles[0].elevation.transform().resolution();
        for tile in &tiles[1..] {
            bounds = bounds.union(&tile.extent);
            let (rx, ry) = tile.elevation.transform().resolution();
            res_x = res_x.min(rx);
            res_y = res_y.min(ry);
        }
        Self {
            bounds,
            res_x,
            res_y,
            width: pixel_span(bounds.width(), res_x),
            height: pixel_span(bounds.height(), res_y),
        }
    }

    fn footprint(&self, tile: &Bounds) -> Footprint {
        let col = ((tile.min_x - self.bounds.min_x) / self.res_x).round().max(0.0) as usize;
        let row = ((self.bounds.max_y - tile.max_y) / self.res_y).round().max(0.0) as usize;
        let col = col.min(self.width);
        let row = row.min(self.height);
        Footprint {
            row,
            col,
            width: pixel_span(tile.width(), self.res_x).min(self.width - col),
            height: pixel_span(tile.height(), self.res_y).min(self.height - row),
        }
    }

    fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.bounds.min_x + (col as f64 + 0.5) * self.res_x,
            self.bounds.max_y - (row as f64 + 0.5) * self.res_y,
        )
    }
}

/// Whole pixels needed to cover `extent`, tolerant of float noise.
fn pixel_span(extent: f64, resolution: f64) -> usize {
    (extent / resolution - GEO_EPSILON).ceil().max(0.0) as usize
}

/// Nearest source pixel for an output pixel center, clamped into the source.
fn source_pixel(
    transform: &GeoTransform,
    width: usize,
    height: usize,
    x: f64,
    y: f64,
) -> (usize, usize) {
    let (col, row) = transform.world_to_pixel(x, y);
    let col = (col.floor().max(0.0) as usize).min(width - 1);
    let row = (row.floor().max(0.0) as usize).min(height - 1);
    (col, row)
}

fn place_elevation(out: &mut ElevationRaster, tile: &ElevationRaster, fp: &Footprint) {
    let grid = grid_of(out);
    let (src_w, src_h) = tile.dimensions();
    let out_w = out.width();
    let src = tile.data();
    let dst = out.data_mut();
    for row in fp.row..fp.row + fp.height {
        for col in fp.col..fp.col + fp.width {
            let (x, y) = grid.pixel_center(col, row);
            let (sc, sr) = source_pixel(tile.transform(), src_w, src_h, x, y);
            let value = src[sr * src_w + sc];
            if !is_no_data(value) {
                dst[row * out_w + col] = value;
            }
        }
    }
}

fn place_imagery(
    out: &mut ImageryRaster,
    tile: &ImageryRaster,
    transform: &GeoTransform,
    fp: &Footprint,
) {
    let grid = grid_of_imagery(out);
    let (src_w, src_h) = tile.dimensions();
    if src_w == 0 || src_h == 0 {
        return;
    }
    let out_w = out.width();
    let src = tile.rgb();
    let dst = out.rgb_mut();
    for row in fp.row..fp.row + fp.height {
        for col in fp.col..fp.col + fp.width {
            let (x, y) = grid.pixel_center(col, row);
            let (sc, sr) = source_pixel(transform, src_w, src_h, x, y);
            let s = (sr * src_w + sc) * 3;
            let d = (row * out_w + col) * 3;
            dst[d..d + 3].copy_from_slice(&src[s..s + 3]);
        }
    }
}

fn grid_of(out: &ElevationRaster) -> OutputGrid {
    let (res_x, res_y) = out.transform().resolution();
    OutputGrid {
        bounds: out.bounds(),
        res_x,
        res_y,
        width: out.width(),
        height: out.height(),
    }
}

fn grid_of_imagery(out: &ImageryRaster) -> OutputGrid {
    let (res_x, res_y) = out.transform().resolution();
    OutputGrid {
        bounds: out.transform().bounds(out.width(), out.height()),
        res_x,
        res_y,
        width: out.width(),
        height: out.height(),
    }
}

/// Row and column of each tile in the tile layout.
///
/// Tile origins closer than half the smallest tile extent share a row or
/// column. Columns run west to east, rows north to south.
fn grid_layout(tiles: &[LoadedTile]) -> (Vec<usize>, Vec<usize>, usize, usize) {
    let bounds: Vec<Bounds> = tiles.iter().map(|t| t.extent).collect();
    let tol_x = bounds.iter().map(Bounds::width).fold(f64::INFINITY, f64::min) / 2.0;
    let tol_y = bounds.iter().map(Bounds::height).fold(f64::INFINITY, f64::min) / 2.0;

    let xs: Vec<f64> = bounds.iter().map(|b| b.min_x).collect();
    let ys: Vec<f64> = bounds.iter().map(|b| -b.max_y).collect();
    let (cols, grid_cols) = cluster_ranks(&xs, tol_x);
    let (rows, grid_rows) = cluster_ranks(&ys, tol_y);
    (rows, cols, grid_rows, grid_cols)
}

/// Rank of each value after merging values within `tolerance` of the
/// previous cluster member, ascending. Returns ranks and cluster count.
fn cluster_ranks(values: &[f64], tolerance: f64) -> (Vec<usize>, usize) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0; values.len()];
    let mut rank = 0;
    let mut last: Option<f64> = None;
    for idx in order {
        let v = values[idx];
        if let Some(prev) = last {
            if v - prev > tolerance {
                rank += 1;
            }
        }
        ranks[idx] = rank;
        last = Some(v);
    }
    let count = if values.is_empty() { 0 } else { rank + 1 };
    (ranks, count)
}

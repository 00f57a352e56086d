//! Georeferencing: affine geotransforms, bounds and CRS codes.
//!
//! GeoTIFF stores the pixel-to-world mapping either as a
//! `ModelTransformation` matrix or as a `ModelTiepoint` plus
//! `ModelPixelScale` pair. Both are read into a GDAL-style [`GeoTransform`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek};
use tiff::decoder::Decoder;
use tiff::tags::Tag;

/// ModelPixelScaleTag.
pub(crate) const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
/// ModelTiepointTag.
pub(crate) const TAG_MODEL_TIEPOINT: u16 = 33922;
/// ModelTransformationTag.
pub(crate) const TAG_MODEL_TRANSFORMATION: u16 = 34264;
/// GeoKeyDirectoryTag.
pub(crate) const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
/// GDAL_NODATA (ASCII).
pub(crate) const TAG_GDAL_NODATA: u16 = 42113;

const KEY_GT_MODEL_TYPE: u16 = 1024;
const KEY_GT_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Tolerance for comparing world coordinates and pixel sizes.
pub const GEO_EPSILON: f64 = 1e-6;

/// Map a numeric tag to the decoder's tag type, known or not.
pub(crate) fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Affine mapping from pixel (column, row) to projected world coordinates.
///
/// Same layout as GDAL: `x = origin_x + col * pixel_width + row * row_rotation`,
/// `y = origin_y + col * col_rotation + row * pixel_height`. North-up rasters
/// have zero rotation and a negative `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// World X of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// Pixel width in world units.
    pub pixel_width: f64,
    /// Row rotation term.
    pub row_rotation: f64,
    /// World Y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Column rotation term.
    pub col_rotation: f64,
    /// Pixel height in world units (negative for north-up).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform from the top-left corner and positive pixel sizes.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Build from GDAL's six-coefficient order.
    pub fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            origin_x: c[0],
            pixel_width: c[1],
            row_rotation: c[2],
            origin_y: c[3],
            col_rotation: c[4],
            pixel_height: c[5],
        }
    }

    /// Coefficients in GDAL order.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// True when either rotation term is non-zero.
    pub fn is_rotated(&self) -> bool {
        self.row_rotation.abs() > f64::EPSILON || self.col_rotation.abs() > f64::EPSILON
    }

    /// Absolute pixel size `(x, y)` in world units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// Whether both pixel sizes are finite and non-zero.
    pub fn has_valid_pixel_size(&self) -> bool {
        let (x, y) = self.resolution();
        x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0
    }

    /// World coordinate of a (fractional) pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate. Ignores rotation.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// World bounds of a `width` x `height` raster.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(width as f64, height as f64);
        Bounds {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Transform of the same raster sampled every `factor` pixels.
    pub fn downsampled(&self, factor: u32) -> Self {
        let f = f64::from(factor.max(1));
        Self {
            pixel_width: self.pixel_width * f,
            row_rotation: self.row_rotation * f,
            col_rotation: self.col_rotation * f,
            pixel_height: self.pixel_height * f,
            ..*self
        }
    }

    /// Approximate equality within [`GEO_EPSILON`].
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal())
            .all(|(a, b)| (a - b).abs() <= GEO_EPSILON)
    }

    /// Read the transform from GeoTIFF tags.
    ///
    /// Returns `Ok(None)` when the file carries no georeferencing.
    pub(crate) fn read_from<R: Read + Seek>(
        decoder: &mut Decoder<R>,
    ) -> tiff::TiffResult<Option<Self>> {
        let pixel_is_point = read_geo_keys(decoder)
            .map(|keys| {
                key_value(&keys, KEY_GT_RASTER_TYPE).is_some_and(|v| v != RASTER_PIXEL_IS_AREA)
            })
            .unwrap_or(false);

        let transform = if let Ok(m) = decoder.get_tag_f64_vec(geo_tag(TAG_MODEL_TRANSFORMATION)) {
            if m.len() < 8 {
                return Ok(None);
            }
            Some(Self {
                origin_x: m[3],
                pixel_width: m[0],
                row_rotation: m[1],
                origin_y: m[7],
                col_rotation: m[4],
                pixel_height: m[5],
            })
        } else {
            let tiepoint = decoder.get_tag_f64_vec(geo_tag(TAG_MODEL_TIEPOINT));
            let scale = decoder.get_tag_f64_vec(geo_tag(TAG_MODEL_PIXEL_SCALE));
            match (tiepoint, scale) {
                (Ok(tie), Ok(scale)) if tie.len() >= 6 && scale.len() >= 2 => {
                    // Tiepoint: raster (i, j, k) maps to model (x, y, z).
                    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
                    Some(Self::north_up(
                        x - i * scale[0],
                        y + j * scale[1],
                        scale[0],
                        scale[1],
                    ))
                }
                _ => None,
            }
        };

        // PixelIsPoint anchors the tiepoint at the pixel center.
        Ok(transform.map(|t| {
            if pixel_is_point {
                let (x, y) = t.pixel_to_world(-0.5, -0.5);
                Self {
                    origin_x: x,
                    origin_y: y,
                    ..t
                }
            } else {
                t
            }
        }))
    }

    /// ModelPixelScale and ModelTiepoint values for a north-up transform.
    pub(crate) fn to_geotiff_tags(&self) -> ([f64; 3], [f64; 6]) {
        (
            [self.pixel_width.abs(), self.pixel_height.abs(), 0.0],
            [0.0, 0.0, 0.0, self.origin_x, self.origin_y, 0.0],
        )
    }
}

/// Axis-aligned bounding box in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Width in world units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in world units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Check whether the boxes share interior area.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Check whether a point is inside (edges included).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Coordinate reference system, identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    /// EPSG code.
    pub epsg: u16,
    /// Geographic (lat/lon) rather than projected.
    pub geographic: bool,
}

impl Crs {
    /// Projected CRS with the given EPSG code.
    pub fn projected(epsg: u16) -> Self {
        Self {
            epsg,
            geographic: false,
        }
    }

    /// Read the CRS from the GeoKeyDirectory, if it names an EPSG code.
    pub(crate) fn read_from<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<Self> {
        let keys = read_geo_keys(decoder)?;
        if let Some(code) = key_value(&keys, KEY_PROJECTED_CS_TYPE).filter(|c| *c != USER_DEFINED) {
            return Some(Self::projected(code));
        }
        key_value(&keys, KEY_GEOGRAPHIC_TYPE)
            .filter(|c| *c != USER_DEFINED)
            .map(|epsg| Self {
                epsg,
                geographic: true,
            })
    }

    /// GeoKeyDirectory entries describing this CRS.
    pub(crate) fn to_geo_keys(self) -> Vec<u16> {
        let (model, key) = if self.geographic {
            (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
        } else {
            (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
        };
        vec![
            1, 1, 0, 3, // version, revision, minor, key count
            KEY_GT_MODEL_TYPE, 0, 1, model,
            KEY_GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
            key, 0, 1, self.epsg,
        ]
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<Vec<u16>> {
    decoder
        .get_tag_u16_vec(geo_tag(TAG_GEO_KEY_DIRECTORY))
        .ok()
        .filter(|keys| keys.len() >= 4)
}

/// Look up a short-valued key stored inline in the directory.
fn key_value(keys: &[u16], key_id: u16) -> Option<u16> {
    keys[4..]
        .chunks_exact(4)
        .find(|entry| entry[0] == key_id && entry[1] == 0)
        .map(|entry| entry[3])
}

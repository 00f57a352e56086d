//! Single raster tiles: decoding GeoTIFF elevation and imagery grids.

use crate::config::{CatalogConfig, Resampling};
use crate::discovery::RasterFileRef;
use crate::geo::{
    geo_tag, Bounds, Crs, GeoTransform, TAG_GDAL_NODATA, TAG_GEO_KEY_DIRECTORY,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT,
};
use crate::resample::{resample_u8, stride_downsample};
use crate::tile_id::TileId;
use crate::{CatalogError, RasterLoadError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::ColorType;
use tracing::debug;

/// No-data sentinel for elevation grids.
///
/// Pixels without a valid reading hold NaN; never read them as zero elevation.
pub const NO_DATA: f32 = f32::NAN;

/// Check whether an elevation value is the no-data sentinel.
pub fn is_no_data(value: f32) -> bool {
    value.is_nan()
}

/// Grid dimensions, georeferencing and CRS of a raster, read without pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterHeader {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Pixel-to-world mapping.
    pub transform: GeoTransform,
    /// Coordinate reference system, if declared.
    pub crs: Option<Crs>,
}

impl RasterHeader {
    /// World bounds of the raster.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// Summary statistics of valid elevation pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationStats {
    /// Lowest valid elevation.
    pub min: f32,
    /// Highest valid elevation.
    pub max: f32,
    /// Mean of valid elevations.
    pub mean: f64,
    /// Number of valid pixels.
    pub valid: usize,
    /// Total number of pixels.
    pub total: usize,
}

/// An elevation grid with its georeferencing.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    /// Elevations in row-major order (north to south, west to east).
    data: Vec<f32>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    crs: Option<Crs>,
}

impl ElevationRaster {
    /// Wrap an existing buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        transform: GeoTransform,
        crs: Option<Crs>,
    ) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "elevation buffer does not match {}x{}",
            width,
            height
        );
        Self {
            data,
            width,
            height,
            transform,
            crs,
        }
    }

    /// A grid where every pixel is no-data.
    pub fn no_data(width: usize, height: usize, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self::new(width, height, vec![NO_DATA; width * height], transform, crs)
    }

    /// Load an elevation GeoTIFF.
    ///
    /// GDAL_NODATA pixels and values outside the configured valid range
    /// become [`NO_DATA`].
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        config: &CatalogConfig,
    ) -> std::result::Result<Self, RasterLoadError> {
        let path = path.as_ref();
        let load_err = |e: tiff::TiffError| RasterLoadError::new(path, e);

        let mut decoder = open_decoder(path)?;
        let header = read_header(&mut decoder, path)?;
        let samples = samples_per_pixel(decoder.colortype().map_err(load_err)?);
        let nodata = read_nodata_value(&mut decoder);

        let mut data = decode_to_f32(decoder.read_image().map_err(load_err)?)
            .ok_or_else(|| RasterLoadError::new(path, "unsupported elevation sample type"))?;
        if samples > 1 {
            data = data.into_iter().step_by(samples).collect();
        }
        if data.len() != header.width * header.height {
            return Err(RasterLoadError::new(
                path,
                format!("expected {} pixels, decoded {}", header.width * header.height, data.len()),
            ));
        }

        let valid_range = config.elevation_valid_range;
        for value in &mut data {
            let is_nodata = nodata.is_some_and(|nd| (*value - nd).abs() < 0.001);
            let out_of_range = valid_range.is_some_and(|(lo, hi)| *value < lo || *value > hi);
            if is_nodata || out_of_range {
                *value = NO_DATA;
            }
        }

        debug!("Loaded elevation {} ({}x{})", path.display(), header.width, header.height);
        Ok(Self::new(header.width, header.height, data, header.transform, header.crs))
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Raw elevations, row-major, NaN for no-data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Pixel-to-world mapping.
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Coordinate reference system, if known.
    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    /// World bounds.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    /// Elevation at a pixel, `None` when out of range or no-data.
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let value = self.data[row * self.width + col];
        (!is_no_data(value)).then_some(value)
    }

    /// Elevation of the pixel containing a world coordinate.
    pub fn elevation_at(&self, x: f64, y: f64) -> Option<f32> {
        let (col, row) = self.transform.world_to_pixel(x, y);
        if col < 0.0 || row < 0.0 {
            return None;
        }
        self.get(col.floor() as usize, row.floor() as usize)
    }

    /// Statistics over valid pixels, `None` if every pixel is no-data.
    pub fn stats(&self) -> Option<ElevationStats> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid = 0usize;
        for &v in self.data.iter().filter(|v| !is_no_data(**v)) {
            min = min.min(v);
            max = max.max(v);
            sum += f64::from(v);
            valid += 1;
        }
        (valid > 0).then(|| ElevationStats {
            min,
            max,
            mean: sum / valid as f64,
            valid,
            total: self.data.len(),
        })
    }

    /// Every `factor`-th pixel, with the transform scaled to match.
    pub fn downsample(&self, factor: u32) -> Self {
        let (data, width, height) =
            stride_downsample(&self.data, self.width, self.height, 1, factor);
        Self::new(width, height, data, self.transform.downsampled(factor), self.crs)
    }

    /// Grayscale relief image, stretched between this grid's min and max.
    ///
    /// No-data pixels are black.
    pub fn to_grayscale(&self) -> ImageryRaster {
        let (lo, hi) = self
            .stats()
            .map(|s| (s.min, s.max))
            .unwrap_or((0.0, 0.0));
        let span = hi - lo;
        let mut rgb = Vec::with_capacity(self.data.len() * 3);
        for &v in &self.data {
            let level = if is_no_data(v) {
                0
            } else if span <= f32::EPSILON {
                128
            } else {
                (((v - lo) / span) * 255.0).round() as u8
            };
            rgb.extend_from_slice(&[level, level, level]);
        }
        ImageryRaster::new(self.width, self.height, rgb, self.transform, self.crs)
    }

    /// Write as a single-band float32 GeoTIFF.
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let write_err = |e: tiff::TiffError| CatalogError::Raster(RasterLoadError::new(path, e));

        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?)).map_err(write_err)?;
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(self.width as u32, self.height as u32)
            .map_err(write_err)?;
        write_geo_tags(image.encoder(), &self.transform, self.crs).map_err(write_err)?;
        image
            .encoder()
            .write_tag(geo_tag(TAG_GDAL_NODATA), "nan")
            .map_err(write_err)?;
        image.write_data(&self.data).map_err(write_err)?;
        Ok(())
    }
}

/// An RGB image grid with its georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryRaster {
    /// Interleaved RGB samples, row-major.
    rgb: Vec<u8>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    crs: Option<Crs>,
}

impl ImageryRaster {
    /// Wrap an interleaved RGB buffer.
    ///
    /// # Panics
    /// Panics if `rgb.len() != width * height * 3`.
    pub fn new(
        width: usize,
        height: usize,
        rgb: Vec<u8>,
        transform: GeoTransform,
        crs: Option<Crs>,
    ) -> Self {
        assert_eq!(rgb.len(), width * height * 3, "RGB buffer does not match {}x{}", width, height);
        Self {
            rgb,
            width,
            height,
            transform,
            crs,
        }
    }

    /// An all-black image.
    pub fn black(width: usize, height: usize, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self::new(width, height, vec![0; width * height * 3], transform, crs)
    }

    /// Load an imagery GeoTIFF as 8-bit RGB.
    ///
    /// Gray images are replicated to three channels, alpha is dropped and
    /// 16-bit channels are scaled to 8 bits by each channel's maximum.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, RasterLoadError> {
        let path = path.as_ref();
        let load_err = |e: tiff::TiffError| RasterLoadError::new(path, e);

        let mut decoder = open_decoder(path)?;
        let header = read_header(&mut decoder, path)?;
        let color = decoder.colortype().map_err(load_err)?;
        let samples = samples_per_pixel(color);
        let pixels = header.width * header.height;

        let channels: Vec<u8> = match decoder.read_image().map_err(load_err)? {
            DecodingResult::U8(data) => data,
            DecodingResult::U16(data) => scale_u16_channels(&data, samples),
            _ => {
                return Err(RasterLoadError::new(
                    path,
                    format!("unsupported imagery sample type for {:?}", color),
                ))
            }
        };
        if channels.len() != pixels * samples {
            return Err(RasterLoadError::new(
                path,
                format!("expected {} samples, decoded {}", pixels * samples, channels.len()),
            ));
        }

        let rgb: Vec<u8> = match samples {
            1 | 2 => channels
                .chunks_exact(samples)
                .flat_map(|px| [px[0], px[0], px[0]])
                .collect(),
            3 => channels,
            _ => channels
                .chunks_exact(samples)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };

        debug!("Loaded imagery {} ({}x{})", path.display(), header.width, header.height);
        Ok(Self::new(header.width, header.height, rgb, header.transform, header.crs))
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Interleaved RGB samples.
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub(crate) fn rgb_mut(&mut self) -> &mut [u8] {
        &mut self.rgb
    }

    /// Pixel-to-world mapping.
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Coordinate reference system, if known.
    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    /// RGB triple at a pixel.
    pub fn pixel(&self, col: usize, row: usize) -> Option<[u8; 3]> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let idx = (row * self.width + col) * 3;
        Some([self.rgb[idx], self.rgb[idx + 1], self.rgb[idx + 2]])
    }

    /// Resample onto an elevation grid so the two are pixel-aligned.
    ///
    /// The result has the elevation grid's dimensions and geotransform.
    pub fn aligned_to(&self, elevation: &ElevationRaster, method: Resampling) -> Self {
        let (w, h) = elevation.dimensions();
        let rgb = resample_u8(&self.rgb, self.width, self.height, 3, w, h, method);
        Self::new(w, h, rgb, *elevation.transform(), elevation.crs().or(self.crs))
    }

    /// Every `factor`-th pixel, with the transform scaled to match.
    pub fn downsample(&self, factor: u32) -> Self {
        let (rgb, width, height) = stride_downsample(&self.rgb, self.width, self.height, 3, factor);
        Self::new(width, height, rgb, self.transform.downsampled(factor), self.crs)
    }

    /// Write as an 8-bit RGB GeoTIFF.
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let write_err = |e: tiff::TiffError| CatalogError::Raster(RasterLoadError::new(path, e));

        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?)).map_err(write_err)?;
        let mut image = encoder
            .new_image::<colortype::RGB8>(self.width as u32, self.height as u32)
            .map_err(write_err)?;
        write_geo_tags(image.encoder(), &self.transform, self.crs).map_err(write_err)?;
        image.write_data(&self.rgb).map_err(write_err)?;
        Ok(())
    }
}

/// One tile's elevation grid and, when available, its aligned imagery.
#[derive(Debug, Clone)]
pub struct LoadedTile {
    /// Tile the rasters belong to.
    pub tile_id: TileId,
    /// Elevation grid.
    pub elevation: ElevationRaster,
    /// Imagery on the elevation grid, if the tile has any.
    pub imagery: Option<ImageryRaster>,
    /// World bounds at full resolution. Downsampling leaves this unchanged,
    /// so mosaics clip each tile's footprint to its real extent.
    pub extent: Bounds,
}

impl LoadedTile {
    /// A tile whose extent is the elevation grid's bounds.
    pub fn new(
        tile_id: TileId,
        elevation: ElevationRaster,
        imagery: Option<ImageryRaster>,
    ) -> Self {
        let extent = elevation.bounds();
        Self {
            tile_id,
            elevation,
            imagery,
            extent,
        }
    }

    /// Both rasters sampled every `factor` pixels.
    ///
    /// A size that is not a multiple of `factor` rounds up, so the
    /// downsampled grid may reach past [`LoadedTile::extent`].
    pub fn downsample(&self, factor: u32) -> Self {
        Self {
            tile_id: self.tile_id.clone(),
            elevation: self.elevation.downsample(factor),
            imagery: self.imagery.as_ref().map(|img| img.downsample(factor)),
            extent: self.extent,
        }
    }
}

impl RasterFileRef {
    /// Read dimensions, geotransform and CRS without decoding pixels.
    pub fn read_header(&self) -> std::result::Result<RasterHeader, RasterLoadError> {
        let mut decoder = open_decoder(&self.path)?;
        read_header(&mut decoder, &self.path)
    }

    /// Load this file as an elevation grid.
    pub fn load_elevation(
        &self,
        config: &CatalogConfig,
    ) -> std::result::Result<ElevationRaster, RasterLoadError> {
        ElevationRaster::from_file(&self.path, config)
    }

    /// Load this file as imagery, aligned to `elevation` when given.
    pub fn load_imagery(
        &self,
        elevation: Option<&ElevationRaster>,
        config: &CatalogConfig,
    ) -> std::result::Result<ImageryRaster, RasterLoadError> {
        let imagery = ImageryRaster::from_file(&self.path)?;
        Ok(match elevation {
            Some(dem) => imagery.aligned_to(dem, config.resampling),
            None => imagery,
        })
    }
}

fn open_decoder(path: &Path) -> std::result::Result<Decoder<BufReader<File>>, RasterLoadError> {
    let file = File::open(path).map_err(|e| RasterLoadError::new(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| RasterLoadError::new(path, e))?;

    // LiDAR tiles can be large; allow up to 1 GB per buffer.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    Ok(decoder.with_limits(limits))
}

fn read_header<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> std::result::Result<RasterHeader, RasterLoadError> {
    let (width, height) = decoder.dimensions().map_err(|e| RasterLoadError::new(path, e))?;
    let transform = GeoTransform::read_from(decoder)
        .map_err(|e| RasterLoadError::new(path, e))?
        .ok_or_else(|| RasterLoadError::new(path, "missing GeoTIFF georeferencing tags"))?;
    if transform.is_rotated() {
        return Err(RasterLoadError::new(path, "rotated geotransforms are not supported"));
    }
    if !transform.has_valid_pixel_size() {
        return Err(RasterLoadError::new(path, "degenerate pixel size"));
    }
    let crs = Crs::read_from(decoder);
    Ok(RasterHeader {
        width: width as usize,
        height: height as usize,
        transform,
        crs,
    })
}

fn samples_per_pixel(color: ColorType) -> usize {
    match color {
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) | ColorType::YCbCr(_) => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        _ => 1,
    }
}

fn decode_to_f32(result: DecodingResult) -> Option<Vec<f32>> {
    let data = match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(data)
}

/// Scale 16-bit channels to 8 bits, each by its own maximum when it exceeds 255.
fn scale_u16_channels(data: &[u16], samples: usize) -> Vec<u8> {
    let samples = samples.max(1);
    let mut max = vec![0u16; samples];
    for px in data.chunks_exact(samples) {
        for (m, &v) in max.iter_mut().zip(px) {
            *m = (*m).max(v);
        }
    }
    data.iter()
        .enumerate()
        .map(|(i, &v)| {
            let channel_max = max[i % samples];
            if channel_max > 255 {
                (u32::from(v) * 255 / u32::from(channel_max)) as u8
            } else {
                v as u8
            }
        })
        .collect()
}

/// GDAL_NODATA value, if the file declares one.
fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    decoder
        .get_tag_ascii_string(geo_tag(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').parse().ok())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    transform: &GeoTransform,
    crs: Option<Crs>,
) -> tiff::TiffResult<()> {
    let (scale, tiepoint) = transform.to_geotiff_tags();
    dir.write_tag(geo_tag(TAG_MODEL_PIXEL_SCALE), scale.as_slice())?;
    dir.write_tag(geo_tag(TAG_MODEL_TIEPOINT), tiepoint.as_slice())?;
    if let Some(crs) = crs {
        dir.write_tag(geo_tag(TAG_GEO_KEY_DIRECTORY), crs.to_geo_keys().as_slice())?;
    }
    Ok(())
}

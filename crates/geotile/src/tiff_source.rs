//! GeoTIFF raster source.
//!
//! Reads the affine transform from the `ModelTiepoint` + `ModelPixelScale`
//! (or `ModelTransformation`) tags, the CRS from the GeoKey directory and the
//! no-data value from the `GDAL_NODATA` tag. Block reads decode only the
//! strips or tiles overlapping the requested window.

use crate::grid::BlockCoords;
use crate::source::{DataType, RasterMeta, RasterSource};
use crate::transform::AffineTransform;
use crate::{GeoTileError, Result};
use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::{debug, warn};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// A GeoTIFF file opened for block reads.
pub struct TiffSource {
    decoder: Decoder<BufReader<File>>,
    meta: RasterMeta,
    path: PathBuf,
    /// Samples per pixel, interleaved within each chunk.
    samples: usize,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
}

impl std::fmt::Debug for TiffSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffSource")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("chunk", &(self.chunk_width, self.chunk_height))
            .finish()
    }
}

impl TiffSource {
    /// Open a GeoTIFF and read its metadata. Pixel data is read on demand.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        // Large rasters are read chunk by chunk, but a single strip of a wide
        // image can still exceed the default limits
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;

        let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
        if planar != 1 {
            return Err(GeoTileError::UnsupportedDataLayout(format!(
                "{}: planar configuration {} (only pixel-interleaved images are supported)",
                path.display(),
                planar
            )));
        }

        let samples = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
        let data_type = Self::read_data_type(&mut decoder, path)?;
        let transform = Self::read_geotransform(&mut decoder, path)?;
        let crs = Self::read_crs(&mut decoder);
        let no_data = Self::read_nodata_value(&mut decoder);

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = chunk_width as usize;
        let chunk_height = chunk_height as usize;
        let chunks_across = (width as usize).div_ceil(chunk_width.max(1));

        let meta = RasterMeta::new(samples, height as usize, width as usize, data_type, transform, crs)
            .with_no_data(no_data);

        debug!(
            "Opened {}: {} bands, {}x{} pixels, {:?}, chunks {}x{}",
            path.display(),
            samples,
            width,
            height,
            data_type,
            chunk_width,
            chunk_height
        );

        Ok(Self {
            decoder,
            meta,
            path: path.to_path_buf(),
            samples,
            chunk_width,
            chunk_height,
            chunks_across,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Determine the sample type from `BitsPerSample` and `SampleFormat`.
    fn read_data_type<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<DataType> {
        let bits = decoder
            .get_tag_u32_vec(Tag::BitsPerSample)
            .ok()
            .and_then(|bits| bits.first().copied())
            .unwrap_or(1);
        let format = decoder
            .get_tag_u32_vec(Tag::SampleFormat)
            .ok()
            .and_then(|formats| formats.first().copied())
            .unwrap_or(1);

        DataType::from_tiff(bits, format).ok_or_else(|| {
            GeoTileError::UnsupportedDataLayout(format!(
                "{}: {} bits per sample with sample format {}",
                path.display(),
                bits,
                format
            ))
        })
    }

    /// Read the affine transform from GeoTIFF tags.
    fn read_geotransform<R: std::io::Read + Seek>(
        decoder: &mut Decoder<R>,
        path: &Path,
    ) -> Result<AffineTransform> {
        // First try ModelTiepoint and ModelPixelScale
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE));

        if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
            if tiepoint.len() >= 6 && scale.len() >= 2 {
                // Tiepoint format: [i, j, k, x, y, z] where (i,j) is pixel coords and (x,y) is geo coords
                let (i, j) = (tiepoint[0], tiepoint[1]);
                let (tie_x, tie_y) = (tiepoint[3], tiepoint[4]);
                let (scale_x, scale_y) = (scale[0], scale[1]);

                // Rows grow southward, so the y scale is stored positive
                return AffineTransform::new(tie_x - i * scale_x, scale_x, 0.0, tie_y + j * scale_y, 0.0, -scale_y)
                    .map_err(|e| GeoTileError::InvalidGeoTiff(format!("{}: {}", path.display(), e)));
            }
        }

        if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION)) {
            if matrix.len() >= 8 {
                // Row-major 4x4: x = a*i + b*j + d, y = e*i + f*j + h
                return AffineTransform::new(matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5])
                    .map_err(|e| GeoTileError::InvalidGeoTiff(format!("{}: {}", path.display(), e)));
            }
        }

        warn!("{} has no georeferencing tags, using pixel coordinates", path.display());
        Ok(AffineTransform::default())
    }

    /// Read the CRS as `EPSG:<code>` from the GeoKey directory.
    fn read_crs<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> String {
        let Ok(keys) = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY)) else {
            return String::new();
        };

        // Header: [version, revision, minor, key count], then 4 shorts per key:
        // [key id, tag location, count, value]
        let Some(key_count) = keys.get(3).map(|&n| n as usize) else {
            return String::new();
        };

        let code = keys[4..]
            .chunks_exact(4)
            .take(key_count)
            .filter(|entry| entry[1] == 0)
            .find(|entry| entry[0] == PROJECTED_CS_TYPE_KEY)
            .or_else(|| {
                keys[4..]
                    .chunks_exact(4)
                    .take(key_count)
                    .filter(|entry| entry[1] == 0)
                    .find(|entry| entry[0] == GEOGRAPHIC_TYPE_KEY)
            })
            .map(|entry| entry[3]);

        match code {
            Some(code) if code != USER_DEFINED && code != 0 => format!("EPSG:{}", code),
            _ => String::new(),
        }
    }

    /// Try to read the no-data value from GDAL_NODATA tag.
    fn read_nodata_value<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
        // GDAL_NODATA is stored as an ASCII string
        decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok())
    }

    /// Decode one strip or tile into interleaved `f64` samples.
    fn decode_chunk(&mut self, chunk_index: u32) -> Result<Vec<f64>> {
        let result = self.decoder.read_chunk(chunk_index)?;

        Ok(match result {
            DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::F64(data) => data,
            DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
            DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        })
    }
}

impl RasterSource for TiffSource {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn read_block(&mut self, band: usize, block: &BlockCoords) -> Result<Array2<f64>> {
        let data = self.read_bands(&[band], block)?;
        Ok(data.index_axis_move(Axis(0), 0))
    }

    fn read_bands(&mut self, bands: &[usize], block: &BlockCoords) -> Result<Array3<f64>> {
        for &band in bands {
            self.meta.check_band(band)?;
        }
        self.meta.check_block(block)?;

        let mut out = Array3::zeros((bands.len(), block.height, block.width));

        let x_end = block.x_offset + block.width;
        let y_end = block.y_offset + block.height;
        let first_chunk_row = block.y_offset / self.chunk_height;
        let last_chunk_row = (y_end - 1) / self.chunk_height;
        let first_chunk_col = block.x_offset / self.chunk_width;
        let last_chunk_col = (x_end - 1) / self.chunk_width;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let index = (chunk_row * self.chunks_across + chunk_col) as u32;
                let (data_width, _) = self.decoder.chunk_data_dimensions(index);
                let data_width = data_width as usize;
                let chunk = self.decode_chunk(index)?;

                let origin_x = chunk_col * self.chunk_width;
                let origin_y = chunk_row * self.chunk_height;
                let rows_in_chunk = chunk.len() / (data_width * self.samples).max(1);

                let ys = block.y_offset.max(origin_y)..y_end.min(origin_y + rows_in_chunk);
                let xs = block.x_offset.max(origin_x)..x_end.min(origin_x + data_width);

                for y in ys {
                    for x in xs.clone() {
                        let pixel = ((y - origin_y) * data_width + (x - origin_x)) * self.samples;
                        for (i, &band) in bands.iter().enumerate() {
                            out[[i, y - block.y_offset, x - block.x_offset]] = chunk[pixel + band - 1];
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Write a `[band][row][col]` array as a GeoTIFF with `f64` samples.
///
/// One, three or four bands are supported (gray, RGB, RGBA layouts).
pub fn write_geotiff<P: AsRef<Path>>(
    path: P,
    data: &Array3<f64>,
    transform: &AffineTransform,
    crs: &str,
    no_data: Option<f64>,
) -> Result<()> {
    let path = path.as_ref();
    let (bands, rows, cols) = data.dim();
    if !matches!(bands, 1 | 3 | 4) {
        return Err(GeoTileError::UnsupportedDataLayout(format!(
            "cannot write {} bands to {} (1, 3 or 4 supported)",
            bands,
            path.display()
        )));
    }

    // Pixel-interleaved samples
    let mut samples = Vec::with_capacity(bands * rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            for band in 0..bands {
                samples.push(data[[band, row, col]]);
            }
        }
    }

    let tags = GeoTags::new(transform, crs, no_data);
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;

    match bands {
        1 => write_image::<colortype::Gray64Float, _>(&mut encoder, cols, rows, &samples, &tags)?,
        3 => write_image::<colortype::RGB64Float, _>(&mut encoder, cols, rows, &samples, &tags)?,
        _ => write_image::<colortype::RGBA64Float, _>(&mut encoder, cols, rows, &samples, &tags)?,
    }

    debug!("Wrote {} ({} bands, {}x{})", path.display(), bands, cols, rows);
    Ok(())
}

/// GeoTIFF tag values for a written image.
struct GeoTags {
    tiepoint: Option<[f64; 6]>,
    pixel_scale: Option<[f64; 3]>,
    transformation: Option<[f64; 16]>,
    geo_keys: Option<Vec<u16>>,
    no_data: Option<String>,
}

impl GeoTags {
    fn new(transform: &AffineTransform, crs: &str, no_data: Option<f64>) -> Self {
        let rotated = transform.rotation_x != 0.0 || transform.rotation_y != 0.0;
        let t = transform;

        let (tiepoint, pixel_scale, transformation) = if rotated {
            let matrix = [
                t.pixel_width, t.rotation_x, 0.0, t.origin_x,
                t.rotation_y, t.pixel_height, 0.0, t.origin_y,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            (None, None, Some(matrix))
        } else {
            (
                Some([0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0]),
                Some([t.pixel_width, -t.pixel_height, 0.0]),
                None,
            )
        };

        let geo_keys = crs
            .strip_prefix("EPSG:")
            .and_then(|code| code.trim().parse::<u16>().ok())
            .map(|code| {
                // EPSG 4000-4999 are geographic systems
                let geographic = (4000..5000).contains(&code);
                let (model, key) = if geographic {
                    (2, GEOGRAPHIC_TYPE_KEY)
                } else {
                    (1, PROJECTED_CS_TYPE_KEY)
                };
                vec![1, 1, 0, 2, GT_MODEL_TYPE_KEY, 0, 1, model, key, 0, 1, code]
            });

        Self {
            tiepoint,
            pixel_scale,
            transformation,
            geo_keys,
            no_data: no_data.map(|v| v.to_string()),
        }
    }
}

fn write_image<C, W>(
    encoder: &mut TiffEncoder<W>,
    width: usize,
    height: usize,
    samples: &[f64],
    tags: &GeoTags,
) -> Result<()>
where
    C: ColorType<Inner = f64>,
    W: Write + Seek,
{
    let mut image = encoder.new_image::<C>(width as u32, height as u32)?;

    {
        let dir = image.encoder();
        if let Some(scale) = &tags.pixel_scale {
            dir.write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])?;
        }
        if let Some(tiepoint) = &tags.tiepoint {
            dir.write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])?;
        }
        if let Some(matrix) = &tags.transformation {
            dir.write_tag(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION), &matrix[..])?;
        }
        if let Some(keys) = &tags.geo_keys {
            dir.write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &keys[..])?;
        }
        if let Some(no_data) = &tags.no_data {
            dir.write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), no_data.as_str())?;
        }
    }

    image.write_data(samples)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_tags_north_up() {
        let transform = AffineTransform::from_gdal([500_000.0, 30.0, 0.0, 4_200_000.0, 0.0, -30.0]).unwrap();
        let tags = GeoTags::new(&transform, "EPSG:32610", Some(-9999.0));

        assert_eq!(tags.tiepoint, Some([0.0, 0.0, 0.0, 500_000.0, 4_200_000.0, 0.0]));
        assert_eq!(tags.pixel_scale, Some([30.0, 30.0, 0.0]));
        assert!(tags.transformation.is_none());
        assert_eq!(tags.geo_keys.as_ref().unwrap()[8], PROJECTED_CS_TYPE_KEY);
        assert_eq!(tags.geo_keys.as_ref().unwrap()[11], 32610);
        assert_eq!(tags.no_data.as_deref(), Some("-9999"));
    }

    #[test]
    fn test_geo_tags_rotated_and_geographic() {
        let transform = AffineTransform::from_gdal([10.0, 0.5, 0.1, 50.0, 0.2, -0.5]).unwrap();
        let tags = GeoTags::new(&transform, "EPSG:4326", None);

        assert!(tags.tiepoint.is_none());
        let matrix = tags.transformation.unwrap();
        assert_eq!(matrix[3], 10.0);
        assert_eq!(matrix[7], 50.0);
        assert_eq!(tags.geo_keys.unwrap()[8], GEOGRAPHIC_TYPE_KEY);
    }

    #[test]
    fn test_geo_tags_without_epsg() {
        let tags = GeoTags::new(&AffineTransform::default(), "LOCAL_CS[\"x\"]", None);
        assert!(tags.geo_keys.is_none());
    }
}

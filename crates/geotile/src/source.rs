//! Raster data sources.
//!
//! [`RasterSource`] is the boundary to whatever actually stores the pixels.
//! Sources expose their metadata and serve rectangular block reads with
//! 1-indexed band addressing.

use crate::grid::BlockCoords;
use crate::transform::AffineTransform;
use crate::{GeoTileError, Result};
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Sample type of the stored raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Map TIFF `BitsPerSample` / `SampleFormat` to a data type.
    ///
    /// Sample format 1 is unsigned, 2 signed, 3 IEEE float.
    pub fn from_tiff(bits: u32, sample_format: u32) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(DataType::U8),
            (1, 16) => Some(DataType::U16),
            (1, 32) => Some(DataType::U32),
            (1, 64) => Some(DataType::U64),
            (2, 8) => Some(DataType::I8),
            (2, 16) => Some(DataType::I16),
            (2, 32) => Some(DataType::I32),
            (2, 64) => Some(DataType::I64),
            (3, 32) => Some(DataType::F32),
            (3, 64) => Some(DataType::F64),
            _ => None,
        }
    }

    /// Whether the type can hold NaN or infinity.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }
}

/// Metadata of an opened raster. Read-only once the source is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMeta {
    /// Number of bands.
    pub band_count: usize,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Stored sample type.
    pub data_type: DataType,
    /// No-data value shared by all bands, if any.
    pub no_data: Option<f64>,
    /// Pixel/coordinate mapping.
    pub transform: AffineTransform,
    /// Spatial reference, e.g. `EPSG:4326`. Empty when unknown.
    pub crs: String,
    /// Band descriptions in stored order.
    pub band_names: Vec<String>,
}

impl RasterMeta {
    /// Metadata with default band names.
    pub fn new(
        band_count: usize,
        rows: usize,
        cols: usize,
        data_type: DataType,
        transform: AffineTransform,
        crs: impl Into<String>,
    ) -> Self {
        Self {
            band_count,
            rows,
            cols,
            data_type,
            no_data: None,
            transform,
            crs: crs.into(),
            band_names: (1..=band_count).map(|b| format!("Band {}", b)).collect(),
        }
    }

    /// Set the no-data value.
    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    /// `(bands, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.band_count, self.rows, self.cols)
    }

    /// Fail unless `block` lies inside the raster.
    pub fn check_block(&self, block: &BlockCoords) -> Result<()> {
        if block.fits_within(self.rows, self.cols) {
            Ok(())
        } else {
            Err(GeoTileError::SourceNotInitialized(format!(
                "block {:?} outside raster extent {}x{}",
                block, self.cols, self.rows
            )))
        }
    }

    /// Fail unless `band` is a valid 1-indexed band.
    pub fn check_band(&self, band: usize) -> Result<()> {
        if band == 0 || band > self.band_count {
            return Err(GeoTileError::InvalidBand {
                band: band.wrapping_sub(1),
                band_count: self.band_count,
            });
        }
        Ok(())
    }
}

/// Something that stores raster pixels and can read blocks of them.
///
/// Reads take `&mut self`: a source is a single-reader handle. Callers that
/// want to process tiles in parallel open one source per worker.
pub trait RasterSource {
    /// Metadata of the source.
    fn meta(&self) -> &RasterMeta;

    /// Read one band (1-indexed) of a block as `[row][col]`.
    fn read_block(&mut self, band: usize, block: &BlockCoords) -> Result<Array2<f64>>;

    /// Read several bands (1-indexed) of a block as `[band][row][col]`.
    ///
    /// Sources that store bands interleaved should override this to decode
    /// each block once.
    fn read_bands(&mut self, bands: &[usize], block: &BlockCoords) -> Result<Array3<f64>> {
        let mut out = Array3::zeros((bands.len(), block.height, block.width));
        for (i, &band) in bands.iter().enumerate() {
            let data = self.read_block(band, block)?;
            out.index_axis_mut(Axis(0), i).assign(&data);
        }
        Ok(out)
    }
}

impl<S: RasterSource + ?Sized> RasterSource for Box<S> {
    fn meta(&self) -> &RasterMeta {
        (**self).meta()
    }

    fn read_block(&mut self, band: usize, block: &BlockCoords) -> Result<Array2<f64>> {
        (**self).read_block(band, block)
    }

    fn read_bands(&mut self, bands: &[usize], block: &BlockCoords) -> Result<Array3<f64>> {
        (**self).read_bands(bands, block)
    }
}

/// Raster held in memory as a `[band][row][col]` array.
///
/// Counts block reads, which makes it useful for checking how much of a
/// raster an operation touches.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Array3<f64>,
    meta: RasterMeta,
    reads: usize,
}

impl MemorySource {
    /// Wrap an array with the given georeferencing.
    pub fn new(data: Array3<f64>, transform: AffineTransform, crs: impl Into<String>) -> Self {
        let (bands, rows, cols) = data.dim();
        let meta = RasterMeta::new(bands, rows, cols, DataType::F64, transform, crs);
        Self { data, meta, reads: 0 }
    }

    /// Set the no-data value.
    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.meta.no_data = Some(no_data);
        self
    }

    /// Number of band-block reads served so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Reset the read counter.
    pub fn reset_reads(&mut self) {
        self.reads = 0;
    }

    /// The underlying array.
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }
}

impl RasterSource for MemorySource {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn read_block(&mut self, band: usize, block: &BlockCoords) -> Result<Array2<f64>> {
        self.meta.check_band(band)?;
        self.meta.check_block(block)?;
        self.reads += 1;

        Ok(self
            .data
            .slice(s![
                band - 1,
                block.y_offset..block.y_offset + block.height,
                block.x_offset..block.x_offset + block.width
            ])
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp_source() -> MemorySource {
        let data = Array::from_shape_fn((2, 4, 5), |(b, r, c)| (b * 100 + r * 10 + c) as f64);
        MemorySource::new(data, AffineTransform::default(), "EPSG:32610")
    }

    #[test]
    fn test_read_block_window() {
        let mut source = ramp_source();
        let block = source.read_block(2, &BlockCoords::new(1, 2, 3, 2)).unwrap();

        assert_eq!(block.dim(), (2, 3));
        assert_eq!(block[[0, 0]], 121.0);
        assert_eq!(block[[1, 2]], 133.0);
        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_read_bands_stacks_in_request_order() {
        let mut source = ramp_source();
        let block = source.read_bands(&[2, 1], &BlockCoords::new(0, 0, 2, 2)).unwrap();

        assert_eq!(block.dim(), (2, 2, 2));
        assert_eq!(block[[0, 1, 1]], 111.0);
        assert_eq!(block[[1, 1, 1]], 11.0);
    }

    #[test]
    fn test_read_outside_extent_fails() {
        let mut source = ramp_source();
        let result = source.read_block(1, &BlockCoords::new(4, 0, 2, 1));
        assert!(matches!(result, Err(GeoTileError::SourceNotInitialized(_))));
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn test_invalid_band() {
        let mut source = ramp_source();
        assert!(matches!(
            source.read_block(3, &BlockCoords::new(0, 0, 1, 1)),
            Err(GeoTileError::InvalidBand { band: 2, band_count: 2 })
        ));
        assert!(source.read_block(0, &BlockCoords::new(0, 0, 1, 1)).is_err());
    }

    #[test]
    fn test_data_type_from_tiff() {
        assert_eq!(DataType::from_tiff(32, 3), Some(DataType::F32));
        assert_eq!(DataType::from_tiff(16, 2), Some(DataType::I16));
        assert_eq!(DataType::from_tiff(12, 1), None);
        assert!(!DataType::U8.is_float());
    }

    #[test]
    fn test_meta_default_band_names() {
        let source = ramp_source();
        assert_eq!(source.meta().band_names, vec!["Band 1", "Band 2"]);
        assert_eq!(source.meta().shape(), (2, 4, 5));
    }
}

//! Raster handle with a tile grid cache.

use crate::grid::{BlockCoords, Bounds, PixelWindow, TileGrid, TileSize};
use crate::reader::{empty_bands, read_tile, ReadOptions, TileIter};
use crate::sampler::{check_crs, parse_points, sample_points, SamplePoint, SampleResult};
use crate::source::{RasterMeta, RasterSource};
use crate::tiff_source::TiffSource;
use crate::transform::AffineTransform;
use crate::Result;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Key of a cached grid: tile size plus the pixel window it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridKey {
    tile_size: TileSize,
    window: PixelWindow,
}

/// Options for [`Raster::extract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOptions {
    /// Tile size used to locate points. `None` treats the whole raster as
    /// one tile.
    pub tile_size: Option<TileSize>,
    /// 0-indexed bands in output order. `None` returns every band.
    pub band_order: Option<Vec<usize>>,
    /// Spatial reference of the input geometries. Checked against the
    /// raster when set.
    pub geometry_crs: Option<String>,
    /// Replace non-finite values before sampling.
    pub finite_only: bool,
    /// Replacement for non-finite values.
    pub nan_replacement: Option<f64>,
}

/// Summary statistics of one band.
///
/// Non-finite and no-data values are left out. All fields except `count`
/// are `None` when the band holds no valid value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    /// 0-indexed band.
    pub band: usize,
    /// Band description.
    pub name: String,
    /// Number of valid values.
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation.
    pub stddev: Option<f64>,
}

/// Running statistics, updated one tile at a time.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn finish(self, band: usize, name: String) -> BandStats {
        let valid = self.count > 0;
        let pick = |v: f64| valid.then_some(v);
        BandStats {
            band,
            name,
            count: self.count,
            min: pick(self.min),
            max: pick(self.max),
            mean: pick(self.mean),
            stddev: pick((self.m2 / self.count.max(1) as f64).sqrt()),
        }
    }
}

/// An opened raster.
///
/// Wraps a [`RasterSource`] and caches the tile grids built over it, keyed
/// by tile size and pixel window. Grids are immutable and shared through
/// `Arc`, so a cached grid can outlive later cache changes.
///
/// # Example
///
/// ```no_run
/// use geotile::{Raster, ReadOptions, TileSize};
///
/// let mut raster = Raster::open("dem.tif")?;
/// for tile in raster.tiles(TileSize::square(256)?, &ReadOptions::default())? {
///     let tile = tile?;
///     println!("tile at {:?}", tile.tie_point);
/// }
/// # Ok::<(), geotile::GeoTileError>(())
/// ```
#[derive(Debug)]
pub struct Raster<S: RasterSource = TiffSource> {
    name: String,
    source: S,
    grids: HashMap<GridKey, Arc<TileGrid>>,
}

impl Raster<TiffSource> {
    /// Open a GeoTIFF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = TiffSource::open(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let meta = source.meta();
        info!(
            "Opened raster {} ({} bands, {}x{}, {})",
            path.display(),
            meta.band_count,
            meta.cols,
            meta.rows,
            if meta.crs.is_empty() { "no CRS" } else { meta.crs.as_str() }
        );

        Ok(Self::from_source(name, source))
    }
}

impl<S: RasterSource> Raster<S> {
    /// Wrap an already opened source.
    pub fn from_source(name: impl Into<String>, source: S) -> Self {
        Self {
            name: name.into(),
            source,
            grids: HashMap::new(),
        }
    }

    /// Name of the raster, the file stem for files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata of the underlying source.
    pub fn meta(&self) -> &RasterMeta {
        self.source.meta()
    }

    /// `(bands, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.meta().shape()
    }

    /// Pixel/coordinate mapping of the raster.
    pub fn transform(&self) -> &AffineTransform {
        &self.meta().transform
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the wrapped source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Give back the source, dropping cached grids.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Closed ring around the whole raster, starting at the top-left corner.
    pub fn bounds(&self) -> [(f64, f64); 5] {
        let meta = self.meta();
        meta.transform.corner_ring(0, 0, meta.cols, meta.rows)
    }

    /// `(xmin, xmax, ymin, ymax)` of the raster.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let meta = self.meta();
        meta.transform.extent(meta.rows, meta.cols)
    }

    /// Pixel window for optional bounds; the full raster when `None`.
    pub fn pixel_window(&self, bounds: Option<&Bounds>) -> Result<PixelWindow> {
        let meta = self.meta();
        match bounds {
            Some(bounds) => bounds.to_window(&meta.transform, meta.rows, meta.cols),
            None => Ok(PixelWindow::full(meta.rows, meta.cols)),
        }
    }

    /// Tile grid for `tile_size` over `bounds`, built once and then served
    /// from the cache.
    pub fn tile_grid(&mut self, tile_size: TileSize, bounds: Option<&Bounds>) -> Result<Arc<TileGrid>> {
        let window = self.pixel_window(bounds)?;
        let key = GridKey { tile_size, window };

        if let Some(grid) = self.grids.get(&key) {
            debug!("Grid cache hit for {:?}", key);
            return Ok(Arc::clone(grid));
        }

        let grid = Arc::new(TileGrid::build(self.transform(), window, tile_size));
        debug!("Built grid of {} tiles for {:?}", grid.len(), key);
        self.grids.insert(key, Arc::clone(&grid));
        Ok(grid)
    }

    /// Number of cached grids.
    pub fn cached_grid_count(&self) -> usize {
        self.grids.len()
    }

    /// Drop all cached grids.
    pub fn clear_grid_cache(&mut self) {
        self.grids.clear();
    }

    /// Read an arbitrary pixel block.
    pub fn read_window(&mut self, block: &BlockCoords, options: &ReadOptions) -> Result<Array3<f64>> {
        let bands = options.bands.resolve(self.meta().band_count)?;
        let replacement = options.replacement_for(self.meta());
        read_tile(&mut self.source, block, &bands, options.finite_only, replacement)
    }

    /// Iterate the tiles of the whole raster.
    pub fn tiles(&mut self, tile_size: TileSize, options: &ReadOptions) -> Result<TileIter<'_, S>> {
        let grid = self.tile_grid(tile_size, None)?;
        TileIter::new(&mut self.source, grid, options)
    }

    /// Iterate the tiles covering `bounds`.
    pub fn tiles_within(
        &mut self,
        tile_size: TileSize,
        bounds: &Bounds,
        options: &ReadOptions,
    ) -> Result<TileIter<'_, S>> {
        let grid = self.tile_grid(tile_size, Some(bounds))?;
        TileIter::new(&mut self.source, grid, options)
    }

    /// Sample band values at WKT point geometries.
    pub fn extract<W: AsRef<str>>(
        &mut self,
        wkts: &[W],
        ids: Option<&[String]>,
        options: &SampleOptions,
    ) -> Result<Vec<SampleResult>> {
        let points = parse_points(wkts, ids)?;
        self.extract_points(&points, options)
    }

    /// Sample band values at already parsed points.
    pub fn extract_points(&mut self, points: &[SamplePoint], options: &SampleOptions) -> Result<Vec<SampleResult>> {
        if let Some(crs) = &options.geometry_crs {
            check_crs(crs, &self.meta().crs)?;
        }

        let (band_count, rows, cols) = self.shape();
        let tile_size = match options.tile_size {
            Some(size) => size,
            None => TileSize::new(cols, rows)?,
        };
        let bands = options
            .band_order
            .clone()
            .unwrap_or_else(|| (0..band_count).collect());
        let replacement = options.nan_replacement.or(self.meta().no_data).unwrap_or(0.0);

        let grid = self.tile_grid(tile_size, None)?;
        sample_points(&mut self.source, &grid, points, &bands, options.finite_only, replacement)
    }

    /// Per-band statistics, computed one tile at a time.
    pub fn band_stats(&mut self, tile_size: TileSize) -> Result<Vec<BandStats>> {
        let no_data = self.meta().no_data;
        let names = self.meta().band_names.clone();
        let mut acc = vec![Accumulator::new(); names.len()];

        for tile in self.tiles(tile_size, &ReadOptions::default().keep_non_finite())? {
            let Some(data) = tile?.data else { continue };
            for (band, values) in data.axis_iter(Axis(0)).enumerate() {
                values
                    .iter()
                    .filter(|v| v.is_finite() && Some(**v) != no_data)
                    .for_each(|&v| acc[band].push(v));
            }
        }

        Ok(acc
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(band, (acc, name))| acc.finish(band, name))
            .collect())
    }

    /// 0-indexed bands without a single finite value.
    pub fn empty_bands(&mut self, tile_size: TileSize) -> Result<Vec<usize>> {
        let band_count = self.meta().band_count;
        let mut has_value = vec![false; band_count];

        for tile in self.tiles(tile_size, &ReadOptions::default().keep_non_finite())? {
            let Some(data) = tile?.data else { continue };
            let empty = empty_bands(&data);
            for (band, seen) in has_value.iter_mut().enumerate() {
                *seen |= !empty.contains(&band);
            }
            if has_value.iter().all(|&v| v) {
                break;
            }
        }

        Ok((0..band_count).filter(|&b| !has_value[b]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::GeoTileError;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn raster(bands: usize) -> Raster<MemorySource> {
        let data = Array::from_shape_fn((bands, 8, 8), |(b, r, c)| (b * 100 + r * 8 + c) as f64);
        let transform = AffineTransform::from_gdal([0.0, 1.0, 0.0, 8.0, 0.0, -1.0]).unwrap();
        Raster::from_source("ramp", MemorySource::new(data, transform, "EPSG:3857"))
    }

    #[test]
    fn test_bounds_and_extent() {
        let raster = raster(1);
        assert_eq!(
            raster.bounds(),
            [(0.0, 8.0), (8.0, 8.0), (8.0, 0.0), (0.0, 0.0), (0.0, 8.0)]
        );
        assert_eq!(raster.extent(), (0.0, 8.0, 0.0, 8.0));
    }

    #[test]
    fn test_grid_cache_keyed_by_size_and_window() {
        let mut raster = raster(1);
        let size = TileSize::square(4).unwrap();

        let a = raster.tile_grid(size, None).unwrap();
        let b = raster.tile_grid(size, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(raster.cached_grid_count(), 1);

        let bounds = Bounds::Pixel { xmin: 0, xmax: 4, ymin: 0, ymax: 4 };
        let c = raster.tile_grid(size, Some(&bounds)).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(raster.cached_grid_count(), 2);

        raster.tile_grid(TileSize::square(3).unwrap(), None).unwrap();
        assert_eq!(raster.cached_grid_count(), 3);

        raster.clear_grid_cache();
        assert_eq!(raster.cached_grid_count(), 0);
        // Grids handed out earlier stay usable
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_tiles_reads_lazily() {
        let mut raster = raster(2);
        let options = ReadOptions::default().with_bands(1);

        let mut tiles = raster.tiles(TileSize::square(4).unwrap(), &options).unwrap();
        let first = tiles.next().unwrap().unwrap();
        drop(tiles);

        assert_eq!(raster.source().reads(), 1);
        let data = first.single_band().unwrap();
        assert_eq!(data[[0, 0]], 100.0);
    }

    #[test]
    fn test_extract_default_single_tile() {
        let mut raster = raster(2);
        let results = raster
            .extract(&["POINT(2.5 5.5)", "POINT(20 20)"], None, &SampleOptions::default())
            .unwrap();

        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].values, vec![18.0, 118.0]);
        assert!(!results[1].is_resolved());
        assert_eq!(raster.source().reads(), 2);
    }

    #[test]
    fn test_extract_replaces_non_finite_samples() {
        let mut data = Array::from_shape_fn((1, 8, 8), |(_, r, c)| (r * 8 + c) as f64);
        data[[0, 2, 2]] = f64::NAN;
        let transform = AffineTransform::from_gdal([0.0, 1.0, 0.0, 8.0, 0.0, -1.0]).unwrap();
        let points = vec![SamplePoint::new("hole", 2.5, 5.5), SamplePoint::new("ok", 3.5, 5.5)];

        let mut options = SampleOptions {
            tile_size: Some(TileSize::square(4).unwrap()),
            finite_only: true,
            nan_replacement: Some(-1.0),
            ..Default::default()
        };

        // Explicit replacement wins over the no-data value
        let source = MemorySource::new(data.clone(), transform, "").with_no_data(-9999.0);
        let mut raster = Raster::from_source("holes", source);
        let results = raster.extract_points(&points, &options).unwrap();
        assert_eq!(results[0].values, vec![-1.0]);
        assert_eq!(results[1].values, vec![19.0]);

        // Without one, the no-data value is used
        options.nan_replacement = None;
        let results = raster.extract_points(&points, &options).unwrap();
        assert_eq!(results[0].values, vec![-9999.0]);

        // And zero when the raster has no no-data value
        let mut raster = Raster::from_source("holes", MemorySource::new(data.clone(), transform, ""));
        let results = raster.extract_points(&points, &options).unwrap();
        assert_eq!(results[0].values, vec![0.0]);

        // Kept as read when not finite-only
        options.finite_only = false;
        let results = raster.extract_points(&points, &options).unwrap();
        assert!(results[0].values[0].is_nan());
    }

    #[test]
    fn test_extract_band_order_and_crs() {
        let mut raster = raster(2);
        let options = SampleOptions {
            tile_size: Some(TileSize::square(4).unwrap()),
            band_order: Some(vec![1, 0]),
            geometry_crs: Some("epsg:3857".to_string()),
            ..Default::default()
        };
        let results = raster.extract(&["POINT(6.5 1.5)"], None, &options).unwrap();
        assert_eq!(results[0].values, vec![154.0, 54.0]);

        let wrong = SampleOptions {
            geometry_crs: Some("EPSG:4326".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            raster.extract(&["POINT(1 1)"], None, &wrong),
            Err(GeoTileError::CoordinateSystemMismatch { .. })
        ));
    }

    #[test]
    fn test_band_stats_skip_no_data_and_nan() {
        let mut data = Array3::from_elem((1, 2, 3), 1.0);
        data[[0, 0, 1]] = 3.0;
        data[[0, 1, 0]] = f64::NAN;
        data[[0, 1, 2]] = -9999.0;
        let source = MemorySource::new(data, AffineTransform::default(), "").with_no_data(-9999.0);
        let mut raster = Raster::from_source("stats", source);

        let stats = raster.band_stats(TileSize::square(2).unwrap()).unwrap();
        let band = &stats[0];
        assert_eq!(band.count, 4);
        assert_eq!(band.min, Some(1.0));
        assert_eq!(band.max, Some(3.0));
        assert_relative_eq!(band.mean.unwrap(), 1.5);
        assert_relative_eq!(band.stddev.unwrap(), 0.75f64.sqrt());
    }

    #[test]
    fn test_empty_bands() {
        let mut data = Array3::from_elem((2, 4, 4), f64::NAN);
        data[[0, 3, 3]] = 1.0;
        let mut raster = Raster::from_source("sparse", MemorySource::new(data, AffineTransform::default(), ""));

        assert_eq!(raster.empty_bands(TileSize::square(2).unwrap()).unwrap(), vec![1]);
        let stats = raster.band_stats(TileSize::square(4).unwrap()).unwrap();
        assert_eq!(stats[1].count, 0);
        assert_eq!(stats[1].mean, None);
    }
}

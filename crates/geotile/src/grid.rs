//! Tile grid construction.
//!
//! A [`TileGrid`] partitions a pixel window of a raster into rectangular
//! blocks. Tiles are stored in row-major scan order (y outer, x inner), which
//! matches raster storage order. Edge tiles are clipped to the window, never
//! padded and never skipped.

use crate::transform::AffineTransform;
use crate::{GeoTileError, Result};
use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Width and height of a tile in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileSize {
    /// Columns per tile.
    pub width: usize,
    /// Rows per tile.
    pub height: usize,
}

impl TileSize {
    /// Create a tile size, rejecting zero dimensions.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GeoTileError::InvalidTileSize { width, height });
        }
        Ok(Self { width, height })
    }

    /// Square tile.
    pub fn square(size: usize) -> Result<Self> {
        Self::new(size, size)
    }
}

/// Half-open pixel window `[xmin, xmax) x [ymin, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    /// First column.
    pub xmin: usize,
    /// One past the last column.
    pub xmax: usize,
    /// First row.
    pub ymin: usize,
    /// One past the last row.
    pub ymax: usize,
}

impl PixelWindow {
    /// Window covering a whole `rows` x `cols` raster.
    pub fn full(rows: usize, cols: usize) -> Self {
        Self {
            xmin: 0,
            xmax: cols,
            ymin: 0,
            ymax: rows,
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.xmax - self.xmin
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.ymax - self.ymin
    }
}

/// Bounding sub-rectangle requested by a caller, as `(xmin, xmax, ymin, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Bounds {
    /// Pixel coordinates; `xmax`/`ymax` are exclusive.
    Pixel {
        xmin: i64,
        xmax: i64,
        ymin: i64,
        ymax: i64,
    },
    /// Coordinates in the raster's spatial reference.
    Crs {
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
    },
}

impl Bounds {
    /// Resolve into a pixel window clamped to a `rows` x `cols` raster.
    ///
    /// CRS bounds are converted by mapping all four corners to pixels and
    /// taking the min/max. An empty window after clamping is an error.
    pub fn to_window(&self, transform: &AffineTransform, rows: usize, cols: usize) -> Result<PixelWindow> {
        let (xmin, xmax, ymin, ymax) = match *self {
            Bounds::Pixel { xmin, xmax, ymin, ymax } => (xmin, xmax, ymin, ymax),
            Bounds::Crs { xmin, xmax, ymin, ymax } => {
                let corners = [(xmin, ymax), (xmax, ymax), (xmax, ymin), (xmin, ymin)];
                let pixels: Vec<(i64, i64)> = corners
                    .iter()
                    .map(|&(x, y)| transform.coord_to_pixel(x, y))
                    .collect();

                let px = pixels.iter().map(|p| p.0);
                let py = pixels.iter().map(|p| p.1);
                (
                    px.clone().min().unwrap_or(0),
                    px.max().unwrap_or(0),
                    py.clone().min().unwrap_or(0),
                    py.max().unwrap_or(0),
                )
            }
        };

        let xmin = xmin.max(0);
        let ymin = ymin.max(0);
        let xmax = xmax.min(cols as i64);
        let ymax = ymax.min(rows as i64);

        if xmin >= xmax || ymin >= ymax {
            return Err(GeoTileError::InvalidBounds { xmin, xmax, ymin, ymax });
        }

        Ok(PixelWindow {
            xmin: xmin as usize,
            xmax: xmax as usize,
            ymin: ymin as usize,
            ymax: ymax as usize,
        })
    }
}

/// Pixel rectangle of a tile: `(x_offset, y_offset, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockCoords {
    /// First column.
    pub x_offset: usize,
    /// First row.
    pub y_offset: usize,
    /// Columns in the block.
    pub width: usize,
    /// Rows in the block.
    pub height: usize,
}

impl BlockCoords {
    /// Create a block.
    pub fn new(x_offset: usize, y_offset: usize, width: usize, height: usize) -> Self {
        Self {
            x_offset,
            y_offset,
            width,
            height,
        }
    }

    /// Check the block is non-empty and inside a `rows` x `cols` raster.
    pub fn fits_within(&self, rows: usize, cols: usize) -> bool {
        self.width > 0
            && self.height > 0
            && self.x_offset + self.width <= cols
            && self.y_offset + self.height <= rows
    }
}

/// A single cell of a [`TileGrid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// Pixel rectangle of the tile.
    pub block: BlockCoords,
    /// Coordinate of the tile's top-left pixel corner.
    pub tie_point: (f64, f64),
    /// Closed ring of the tile's four corners in CRS space.
    pub boundary: [(f64, f64); 5],
    /// `(xmin, ymin)` of the window the grid was built over.
    pub first_pixel: (usize, usize),
}

impl TileDescriptor {
    /// Boundary ring as a polygon.
    pub fn boundary_polygon(&self) -> Polygon<f64> {
        Polygon::new(LineString::from(self.boundary.to_vec()), vec![])
    }

    /// Transform anchored at this tile's tie point.
    pub fn local_transform(&self, raster: &AffineTransform) -> AffineTransform {
        raster.with_origin(self.tie_point)
    }
}

/// Ordered grid of tiles over a pixel window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    tiles: Vec<TileDescriptor>,
    window: PixelWindow,
    tile_size: TileSize,
}

impl TileGrid {
    /// Build the grid for `window` with tiles of `tile_size`.
    pub fn build(transform: &AffineTransform, window: PixelWindow, tile_size: TileSize) -> Self {
        let mut tiles = Vec::new();

        for y in (window.ymin..window.ymax).step_by(tile_size.height) {
            let rows = tile_size.height.min(window.ymax - y);

            for x in (window.xmin..window.xmax).step_by(tile_size.width) {
                let cols = tile_size.width.min(window.xmax - x);

                let tie_point = transform.pixel_to_coord(x as f64, y as f64, false);
                tiles.push(TileDescriptor {
                    block: BlockCoords::new(x, y, cols, rows),
                    tie_point,
                    boundary: transform.corner_ring(x, y, cols, rows),
                    first_pixel: (window.xmin, window.ymin),
                });
            }
        }

        debug!(
            "Built tile grid of {} tiles ({}x{}) over window {:?}",
            tiles.len(),
            tile_size.width,
            tile_size.height,
            window
        );

        Self {
            tiles,
            window,
            tile_size,
        }
    }

    /// Tiles in scan order.
    pub fn tiles(&self) -> &[TileDescriptor] {
        &self.tiles
    }

    /// Iterate over tiles in scan order.
    pub fn iter(&self) -> std::slice::Iter<'_, TileDescriptor> {
        self.tiles.iter()
    }

    /// Tile at position `index` in scan order.
    pub fn get(&self, index: usize) -> Option<&TileDescriptor> {
        self.tiles.get(index)
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Window the grid covers.
    pub fn window(&self) -> PixelWindow {
        self.window
    }

    /// Nominal tile size (edge tiles may be smaller).
    pub fn tile_size(&self) -> TileSize {
        self.tile_size
    }
}

impl<'a> IntoIterator for &'a TileGrid {
    type Item = &'a TileDescriptor;
    type IntoIter = std::slice::Iter<'a, TileDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_up_8x8() -> AffineTransform {
        AffineTransform::from_gdal([0.0, 1.0, 0.0, 8.0, 0.0, -1.0]).unwrap()
    }

    #[test]
    fn test_8x8_grid_with_4x4_tiles() {
        let grid = TileGrid::build(&north_up_8x8(), PixelWindow::full(8, 8), TileSize::square(4).unwrap());

        let blocks: Vec<_> = grid.iter().map(|t| t.block).collect();
        assert_eq!(
            blocks,
            vec![
                BlockCoords::new(0, 0, 4, 4),
                BlockCoords::new(4, 0, 4, 4),
                BlockCoords::new(0, 4, 4, 4),
                BlockCoords::new(4, 4, 4, 4),
            ]
        );
        assert_eq!(grid.len(), 4);
        assert_eq!(grid.tiles()[1].tie_point, (4.0, 8.0));
        assert_eq!(grid.tiles()[2].tie_point, (0.0, 4.0));
    }

    #[test]
    fn test_edge_tiles_are_clipped() {
        let transform = north_up_8x8();
        let grid = TileGrid::build(&transform, PixelWindow::full(5, 10), TileSize::new(4, 3).unwrap());

        let first_row: Vec<usize> = grid
            .iter()
            .filter(|t| t.block.y_offset == 0)
            .map(|t| t.block.width)
            .collect();
        assert_eq!(first_row, vec![4, 4, 2]);

        let heights: Vec<usize> = grid
            .iter()
            .filter(|t| t.block.x_offset == 0)
            .map(|t| t.block.height)
            .collect();
        assert_eq!(heights, vec![3, 2]);
    }

    #[test]
    fn test_tiles_cover_window_exactly() {
        let transform = north_up_8x8();
        for (rows, cols) in [(8, 8), (7, 13), (1, 1), (100, 3)] {
            for (tw, th) in [(1, 1), (3, 2), (4, 4), (16, 5)] {
                let grid = TileGrid::build(&transform, PixelWindow::full(rows, cols), TileSize::new(tw, th).unwrap());

                let mut hits = vec![0u32; rows * cols];
                for tile in &grid {
                    let b = tile.block;
                    assert!(b.fits_within(rows, cols));
                    for y in b.y_offset..b.y_offset + b.height {
                        for x in b.x_offset..b.x_offset + b.width {
                            hits[y * cols + x] += 1;
                        }
                    }
                }
                assert!(hits.iter().all(|&h| h == 1), "gap or overlap for {rows}x{cols} / {tw}x{th}");
            }
        }
    }

    #[test]
    fn test_scan_order_is_row_major() {
        let grid = TileGrid::build(&north_up_8x8(), PixelWindow::full(8, 8), TileSize::new(3, 3).unwrap());
        let offsets: Vec<(usize, usize)> = grid.iter().map(|t| (t.block.y_offset, t.block.x_offset)).collect();
        let mut sorted = offsets.clone();
        sorted.sort();
        assert_eq!(offsets, sorted);
    }

    #[test]
    fn test_boundary_ring_is_closed_rectangle() {
        for transform in [
            north_up_8x8(),
            AffineTransform::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap(),
        ] {
            let grid = TileGrid::build(&transform, PixelWindow::full(8, 8), TileSize::square(4).unwrap());
            for tile in &grid {
                assert_eq!(tile.boundary[0], tile.boundary[4]);
                assert_eq!(tile.boundary[0], tile.tie_point);

                use geo::Area;
                assert_eq!(tile.boundary_polygon().unsigned_area(), 16.0);
            }
        }
    }

    #[test]
    fn test_sub_window_grid() {
        let window = Bounds::Pixel { xmin: 2, xmax: 7, ymin: 1, ymax: 4 }
            .to_window(&north_up_8x8(), 8, 8)
            .unwrap();
        let grid = TileGrid::build(&north_up_8x8(), window, TileSize::square(4).unwrap());

        assert_eq!(grid.len(), 2);
        assert_eq!(grid.tiles()[0].block, BlockCoords::new(2, 1, 4, 3));
        assert_eq!(grid.tiles()[1].block, BlockCoords::new(6, 1, 1, 3));
        assert!(grid.iter().all(|t| t.first_pixel == (2, 1)));
    }

    #[test]
    fn test_pixel_bounds_are_clamped() {
        let window = Bounds::Pixel { xmin: -5, xmax: 50, ymin: -1, ymax: 3 }
            .to_window(&north_up_8x8(), 8, 8)
            .unwrap();
        assert_eq!(window, PixelWindow { xmin: 0, xmax: 8, ymin: 0, ymax: 3 });
    }

    #[test]
    fn test_crs_bounds_to_window() {
        let window = Bounds::Crs { xmin: 1.5, xmax: 6.0, ymin: 2.0, ymax: 7.5 }
            .to_window(&north_up_8x8(), 8, 8)
            .unwrap();
        assert_eq!(window, PixelWindow { xmin: 1, xmax: 6, ymin: 0, ymax: 6 });
    }

    #[test]
    fn test_degenerate_bounds_fail() {
        let transform = north_up_8x8();
        let outside = Bounds::Crs { xmin: 20.0, xmax: 30.0, ymin: 2.0, ymax: 7.0 };
        assert!(matches!(
            outside.to_window(&transform, 8, 8),
            Err(GeoTileError::InvalidBounds { .. })
        ));

        let empty = Bounds::Pixel { xmin: 3, xmax: 3, ymin: 0, ymax: 8 };
        assert!(empty.to_window(&transform, 8, 8).is_err());
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        assert!(matches!(
            TileSize::new(0, 4),
            Err(GeoTileError::InvalidTileSize { width: 0, height: 4 })
        ));
    }
}

//! # geotile
//!
//! Tile-grid reading and point sampling for georeferenced rasters.
//!
//! A raster is opened once ([`Raster::open`] for GeoTIFF files, or
//! [`Raster::from_source`] for any [`RasterSource`]) and then queried:
//!
//! - [`AffineTransform`] maps between pixel indices and coordinates in the
//!   raster's spatial reference.
//! - [`TileGrid`] partitions a pixel window into row-major tiles, clipping
//!   the last row and column to the window. Grids are cached per raster.
//! - [`TileIter`] reads the tiles of a grid lazily, one block at a time,
//!   optionally replacing non-finite values.
//! - [`Raster::extract`] samples band values at WKT points, reading only the
//!   tiles that contain a point.
//!
//! ## Example
//!
//! ```no_run
//! use geotile::{Raster, SampleOptions, TileSize};
//!
//! let mut raster = Raster::open("scene.tif")?;
//! println!("extent: {:?}", raster.extent());
//!
//! let options = SampleOptions {
//!     tile_size: Some(TileSize::square(512)?),
//!     ..Default::default()
//! };
//! for sample in raster.extract(&["POINT(512034.5 4102201.0)"], None, &options)? {
//!     println!("{}: {:?}", sample.id, sample.values);
//! }
//! # Ok::<(), geotile::GeoTileError>(())
//! ```

mod config;
mod error;
mod grid;
mod raster;
mod reader;
mod sampler;
mod source;
mod split;
mod tiff_source;
mod transform;

pub use config::TilingConfig;
pub use error::GeoTileError;
pub use grid::{BlockCoords, Bounds, PixelWindow, TileDescriptor, TileGrid, TileSize};
pub use raster::{BandStats, Raster, SampleOptions};
pub use reader::{empty_bands, read_tile, replace_non_finite, BandSelection, ReadOptions, TileBlock, TileIter};
pub use sampler::{check_crs, parse_points, sample_points, SamplePoint, SampleResult};
pub use source::{DataType, MemorySource, RasterMeta, RasterSource};
pub use split::split_to_dir;
pub use tiff_source::{write_geotiff, TiffSource};
pub use transform::AffineTransform;

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, GeoTileError>;

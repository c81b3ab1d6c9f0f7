//! Splitting a raster into GeoTIFF tiles on disk.

use crate::grid::TileSize;
use crate::raster::Raster;
use crate::reader::{empty_bands, read_tile};
use crate::source::RasterSource;
use crate::tiff_source::write_geotiff;
use crate::{GeoTileError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Write every tile of `raster` to `out_dir` as its own GeoTIFF.
///
/// Files are named `<name>_<x + 1>_<y + 1>.tif`, where `x`/`y` are the pixel
/// offsets of the tile's top-left corner. Edge tiles are clipped to the
/// raster. Tiles in which some band holds no finite value are not written.
///
/// Returns the written paths in grid order.
pub fn split_to_dir<S: RasterSource, P: AsRef<Path>>(
    raster: &mut Raster<S>,
    tile_width: usize,
    tile_height: usize,
    out_dir: P,
) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    let (band_count, rows, cols) = raster.shape();

    if tile_width == 0 || tile_height == 0 || tile_width > cols || tile_height > rows {
        return Err(GeoTileError::OversizedTile {
            tile_width,
            tile_height,
            cols,
            rows,
        });
    }
    if !matches!(band_count, 1 | 3 | 4) {
        return Err(GeoTileError::UnsupportedDataLayout(format!(
            "cannot split a {}-band raster (1, 3 or 4 supported)",
            band_count
        )));
    }

    std::fs::create_dir_all(out_dir)?;

    let grid = raster.tile_grid(TileSize::new(tile_width, tile_height)?, None)?;
    let transform = *raster.transform();
    let crs = raster.meta().crs.clone();
    let no_data = raster.meta().no_data;
    let stem = match raster.name() {
        "" => "tile".to_string(),
        name => name.to_string(),
    };
    let bands: Vec<usize> = (1..=band_count).collect();

    let mut written = Vec::new();
    let mut skipped = 0;

    for tile in grid.iter() {
        let data = read_tile(raster.source_mut(), &tile.block, &bands, false, 0.0)?;

        let empty = empty_bands(&data);
        if !empty.is_empty() {
            debug!("Skipping tile {:?}: bands {:?} hold no finite value", tile.block, empty);
            skipped += 1;
            continue;
        }

        let path = out_dir.join(format!(
            "{}_{}_{}.tif",
            stem,
            tile.block.x_offset + 1,
            tile.block.y_offset + 1
        ));
        write_geotiff(&path, &data, &tile.local_transform(&transform), &crs, no_data)?;
        written.push(path);
    }

    info!(
        "Wrote {} tiles of {}x{} to {} ({} empty tiles skipped)",
        written.len(),
        tile_width,
        tile_height,
        out_dir.display(),
        skipped
    );

    Ok(written)
}

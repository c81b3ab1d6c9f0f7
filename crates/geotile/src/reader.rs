//! Block-wise tile reading.
//!
//! [`read_tile`] reads one block for a set of bands and optionally replaces
//! non-finite values. [`TileIter`] walks a [`TileGrid`] lazily, reading each
//! tile only when it is pulled, so at most one tile is held in memory.

use crate::grid::{BlockCoords, TileDescriptor, TileGrid};
use crate::source::{RasterMeta, RasterSource};
use crate::{GeoTileError, Result};
use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Which bands to read, 0-indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BandSelection {
    /// Every band in stored order.
    #[default]
    All,
    /// A single band.
    One(usize),
    /// Bands in the given order.
    List(Vec<usize>),
}

impl BandSelection {
    /// Resolve to 1-indexed source bands, checking each against `band_count`.
    pub fn resolve(&self, band_count: usize) -> Result<Vec<usize>> {
        let bands: Vec<usize> = match self {
            BandSelection::All => (0..band_count).collect(),
            BandSelection::One(band) => vec![*band],
            BandSelection::List(bands) => bands.clone(),
        };

        bands
            .into_iter()
            .map(|band| {
                if band < band_count {
                    Ok(band + 1)
                } else {
                    Err(GeoTileError::InvalidBand { band, band_count })
                }
            })
            .collect()
    }
}

impl From<usize> for BandSelection {
    fn from(band: usize) -> Self {
        BandSelection::One(band)
    }
}

impl From<Vec<usize>> for BandSelection {
    fn from(bands: Vec<usize>) -> Self {
        BandSelection::List(bands)
    }
}

/// Options for reading tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// Bands to read.
    pub bands: BandSelection,
    /// Replace NaN and infinity after reading.
    pub finite_only: bool,
    /// Replacement for non-finite values. Defaults to the raster's no-data
    /// value, else 0.
    pub nan_replacement: Option<f64>,
    /// Read pixel data at all; when false only tie points are produced.
    pub get_array: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            bands: BandSelection::All,
            finite_only: true,
            nan_replacement: None,
            get_array: true,
        }
    }
}

impl ReadOptions {
    /// Read the given bands.
    pub fn with_bands(mut self, bands: impl Into<BandSelection>) -> Self {
        self.bands = bands.into();
        self
    }

    /// Keep non-finite values as read.
    pub fn keep_non_finite(mut self) -> Self {
        self.finite_only = false;
        self
    }

    /// Replace non-finite values with `value`.
    pub fn with_nan_replacement(mut self, value: f64) -> Self {
        self.nan_replacement = Some(value);
        self
    }

    /// Effective replacement value for a raster.
    pub fn replacement_for(&self, meta: &RasterMeta) -> f64 {
        self.nan_replacement.or(meta.no_data).unwrap_or(0.0)
    }
}

/// Replace NaN and infinite values in place. Returns how many were replaced.
pub fn replace_non_finite(array: &mut Array3<f64>, replacement: f64) -> usize {
    let mut replaced = 0;
    array.iter_mut().filter(|v| !v.is_finite()).for_each(|v| {
        *v = replacement;
        replaced += 1;
    });
    replaced
}

/// Bands (positions along axis 0) that hold no finite value.
pub fn empty_bands(array: &Array3<f64>) -> Vec<usize> {
    array
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, band)| !band.iter().any(|v| v.is_finite()))
        .map(|(i, _)| i)
        .collect()
}

/// Read a block for the given 1-indexed `bands` as `[band][row][col]`.
pub fn read_tile<S: RasterSource + ?Sized>(
    source: &mut S,
    block: &BlockCoords,
    bands: &[usize],
    finite_only: bool,
    nan_replacement: f64,
) -> Result<Array3<f64>> {
    source.meta().check_block(block)?;

    let mut array = source.read_bands(bands, block)?;

    if finite_only {
        let replaced = replace_non_finite(&mut array, nan_replacement);
        if replaced > 0 {
            debug!(
                "Replaced {} non-finite values with {} in block {:?}",
                replaced, nan_replacement, block
            );
        }
    }

    Ok(array)
}

/// One element of a tile iteration.
#[derive(Debug, Clone)]
pub struct TileBlock {
    /// Coordinate of the tile's top-left corner.
    pub tie_point: (f64, f64),
    /// Pixel rectangle the data came from.
    pub block: BlockCoords,
    /// `[band][row][col]` data, absent when arrays were not requested.
    pub data: Option<Array3<f64>>,
}

impl TileBlock {
    /// The data as a 2D `[row][col]` view when exactly one band was read.
    pub fn single_band(&self) -> Option<ArrayView2<'_, f64>> {
        match &self.data {
            Some(data) if data.len_of(Axis(0)) == 1 => Some(data.index_axis(Axis(0), 0)),
            _ => None,
        }
    }
}

/// Lazy iterator over the tiles of a grid.
///
/// Each call to `next` performs one blocking read. The sequence cannot be
/// restarted; after a read error it is exhausted.
pub struct TileIter<'a, S: RasterSource + ?Sized> {
    source: &'a mut S,
    grid: Arc<TileGrid>,
    next: usize,
    bands: Vec<usize>,
    get_array: bool,
    finite_only: bool,
    replacement: f64,
    failed: bool,
}

impl<'a, S: RasterSource + ?Sized> TileIter<'a, S> {
    /// Iterate `grid` over `source` with the given options.
    pub fn new(source: &'a mut S, grid: Arc<TileGrid>, options: &ReadOptions) -> Result<Self> {
        let bands = options.bands.resolve(source.meta().band_count)?;
        let replacement = options.replacement_for(source.meta());

        Ok(Self {
            source,
            grid,
            next: 0,
            bands,
            get_array: options.get_array,
            finite_only: options.finite_only,
            replacement,
            failed: false,
        })
    }

    /// Grid being iterated.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    fn read(&mut self, tile: &TileDescriptor) -> Result<TileBlock> {
        let data = if self.get_array {
            Some(read_tile(
                &mut *self.source,
                &tile.block,
                &self.bands,
                self.finite_only,
                self.replacement,
            )?)
        } else {
            None
        };

        Ok(TileBlock {
            tie_point: tile.tie_point,
            block: tile.block,
            data,
        })
    }
}

impl<S: RasterSource + ?Sized> Iterator for TileIter<'_, S> {
    type Item = Result<TileBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let grid = Arc::clone(&self.grid);
        let tile = grid.get(self.next)?;
        self.next += 1;

        trace!("Reading tile {}/{} at {:?}", self.next, grid.len(), tile.block);

        let result = self.read(tile);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = self.grid.len().saturating_sub(self.next);
        (0, Some(remaining))
    }
}

impl<S: RasterSource + ?Sized> std::iter::FusedIterator for TileIter<'_, S> {}

//! Point sampling against a tile grid.
//!
//! Points are matched to tiles by intersecting them with each tile's boundary
//! polygon. Only tiles that contain at least one unresolved point are read,
//! each at most once, so sampling a few scattered points costs a few tile
//! reads rather than a pass over the whole raster.
//!
//! A tile claims a point only when the point's pixel, computed from the tile's
//! tie point with floor division, lies inside the tile. Pixels are half-open,
//! so a point on an edge shared by two tiles belongs to the tile that holds
//! that pixel in the full raster, and the sampled value does not depend on the
//! tile size. Should several tiles still qualify, the first in scan order wins
//! and later tiles never revisit a resolved point.

use crate::grid::TileGrid;
use crate::reader::read_tile;
use crate::source::RasterSource;
use crate::{GeoTileError, Result};
use geo::{Geometry, Intersects, Point};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, trace};
use wkt::Wkt;

/// A point to sample, with its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    /// Identifier reported with the result.
    pub id: String,
    /// Location in the raster's spatial reference.
    pub point: Point<f64>,
}

impl SamplePoint {
    /// Create a sample point.
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            point: Point::new(x, y),
        }
    }
}

/// Band values sampled for one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Identifier of the sampled point.
    pub id: String,
    /// Values in the requested band order. Empty when no tile contains the
    /// point.
    pub values: Vec<f64>,
}

impl SampleResult {
    /// Whether the point fell inside the sampled grid.
    pub fn is_resolved(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Parse WKT point geometries into sample points.
///
/// `ids` defaults to `1..=N`. A `MULTIPOINT` expands into one sample per part,
/// identified as `<id>_1`, `<id>_2`, ... in part order.
pub fn parse_points<S: AsRef<str>>(wkts: &[S], ids: Option<&[String]>) -> Result<Vec<SamplePoint>> {
    if let Some(ids) = ids {
        if ids.len() != wkts.len() {
            return Err(GeoTileError::IdentifierCountMismatch {
                geometries: wkts.len(),
                ids: ids.len(),
            });
        }
    }

    let mut points = Vec::with_capacity(wkts.len());

    for (i, wkt) in wkts.iter().enumerate() {
        let id = match ids {
            Some(ids) => ids[i].clone(),
            None => (i + 1).to_string(),
        };

        match parse_geometry(wkt.as_ref())? {
            Geometry::Point(point) => points.push(SamplePoint { id, point }),
            Geometry::MultiPoint(multi) => {
                points.extend(multi.0.into_iter().enumerate().map(|(part, point)| SamplePoint {
                    id: format!("{}_{}", id, part + 1),
                    point,
                }));
            }
            other => return Err(GeoTileError::UnsupportedGeometry(geometry_name(&other).to_string())),
        }
    }

    Ok(points)
}

fn parse_geometry(wkt: &str) -> Result<Geometry<f64>> {
    let parsed = Wkt::<f64>::from_str(wkt).map_err(|reason| GeoTileError::InvalidWkt {
        wkt: wkt.to_string(),
        reason: reason.to_string(),
    })?;

    Geometry::try_from(parsed).map_err(|e| GeoTileError::InvalidWkt {
        wkt: wkt.to_string(),
        reason: e.to_string(),
    })
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) => "LINE",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        _ => "GEOMETRY",
    }
}

/// Fail when the geometries' CRS differs from the raster's.
///
/// Comparison ignores surrounding and repeated whitespace and ASCII case. An
/// empty CRS on either side means "unknown" and is not checked.
pub fn check_crs(geometry_crs: &str, raster_crs: &str) -> Result<()> {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    let (geometry, raster) = (normalize(geometry_crs), normalize(raster_crs));

    if geometry.is_empty() || raster.is_empty() || geometry == raster {
        Ok(())
    } else {
        Err(GeoTileError::CoordinateSystemMismatch {
            geometry: geometry_crs.to_string(),
            raster: raster_crs.to_string(),
        })
    }
}

/// Sample `points` from `source` using the tiles of `grid`.
///
/// `bands` holds 0-indexed bands in output order. Returns one result per
/// point, in input order.
pub fn sample_points<S: RasterSource + ?Sized>(
    source: &mut S,
    grid: &TileGrid,
    points: &[SamplePoint],
    bands: &[usize],
    finite_only: bool,
    nan_replacement: f64,
) -> Result<Vec<SampleResult>> {
    let band_count = source.meta().band_count;
    if let Some(&band) = bands.iter().find(|&&b| b >= band_count) {
        return Err(GeoTileError::InvalidBand { band, band_count });
    }

    let transform = source.meta().transform;
    let all_bands: Vec<usize> = (1..=band_count).collect();

    let mut values: Vec<Option<Vec<f64>>> = vec![None; points.len()];
    let mut unresolved: Vec<usize> = (0..points.len()).collect();
    let mut tiles_read = 0;

    for tile in grid {
        if unresolved.is_empty() {
            break;
        }

        let boundary = tile.boundary_polygon();
        let local = tile.local_transform(&transform);
        let (width, height) = (tile.block.width as i64, tile.block.height as i64);

        let mut hits: Vec<(usize, usize, usize)> = Vec::new();
        unresolved.retain(|&i| {
            let point = &points[i].point;
            if !boundary.intersects(point) {
                return true;
            }
            let (px, py) = local.coord_to_pixel(point.x(), point.y());
            if (0..width).contains(&px) && (0..height).contains(&py) {
                hits.push((i, px as usize, py as usize));
                false
            } else {
                true
            }
        });

        if hits.is_empty() {
            continue;
        }

        let array = read_tile(&mut *source, &tile.block, &all_bands, finite_only, nan_replacement)?;
        tiles_read += 1;

        for (i, px, py) in hits {
            trace!("Point {} -> tile {:?} pixel ({}, {})", points[i].id, tile.block, px, py);
            values[i] = Some(bands.iter().map(|&b| array[[b, py, px]]).collect());
        }
    }

    debug!(
        "Sampled {} points from {} of {} tiles ({} outside the grid)",
        points.len(),
        tiles_read,
        grid.len(),
        unresolved.len()
    );

    Ok(points
        .iter()
        .zip(values)
        .map(|(point, values)| SampleResult {
            id: point.id.clone(),
            values: values.unwrap_or_default(),
        })
        .collect())
}

//! Affine mapping between pixel space and spatial-reference space.

use crate::{GeoTileError, Result};
use serde::{Deserialize, Serialize};

/// Six-coefficient affine transform in GDAL order:
/// `(origin_x, pixel_width, rotation_x, origin_y, rotation_y, pixel_height)`.
///
/// `pixel_height` is negative for north-up rasters. The rotation terms are
/// carried as metadata; the pixel/coordinate conversions use the axis-aligned
/// terms only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    /// X coordinate of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// Pixel size along x.
    pub pixel_width: f64,
    /// Row rotation term.
    pub rotation_x: f64,
    /// Y coordinate of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Column rotation term.
    pub rotation_y: f64,
    /// Pixel size along y (usually negative).
    pub pixel_height: f64,
}

impl AffineTransform {
    /// Create a transform, rejecting zero pixel dimensions.
    pub fn new(
        origin_x: f64,
        pixel_width: f64,
        rotation_x: f64,
        origin_y: f64,
        rotation_y: f64,
        pixel_height: f64,
    ) -> Result<Self> {
        if pixel_width == 0.0 || pixel_height == 0.0 || !pixel_width.is_finite() || !pixel_height.is_finite() {
            return Err(GeoTileError::InvalidTransform {
                pixel_width,
                pixel_height,
            });
        }

        Ok(Self {
            origin_x,
            pixel_width,
            rotation_x,
            origin_y,
            rotation_y,
            pixel_height,
        })
    }

    /// Create a north-up transform without rotation.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Result<Self> {
        Self::new(origin_x, pixel_width, 0.0, origin_y, 0.0, pixel_height)
    }

    /// Create from a GDAL-style coefficient array.
    pub fn from_gdal(coeffs: [f64; 6]) -> Result<Self> {
        Self::new(coeffs[0], coeffs[1], coeffs[2], coeffs[3], coeffs[4], coeffs[5])
    }

    /// Convert to a GDAL-style coefficient array.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.rotation_x,
            self.origin_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Top-left corner of pixel (0, 0).
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_x, self.origin_y)
    }

    /// Signed pixel size `(pixel_width, pixel_height)`.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, self.pixel_height)
    }

    /// The same pixel size anchored at another origin (e.g. a tile tie point).
    pub fn with_origin(&self, origin: (f64, f64)) -> Self {
        Self {
            origin_x: origin.0,
            origin_y: origin.1,
            ..*self
        }
    }

    /// Convert a pixel location to a coordinate.
    ///
    /// With `pixel_center` the coordinate of the pixel center is returned,
    /// otherwise the top-left corner.
    pub fn pixel_to_coord(&self, px: f64, py: f64, pixel_center: bool) -> (f64, f64) {
        let (half_x, half_y) = if pixel_center {
            (self.pixel_width / 2.0, self.pixel_height / 2.0)
        } else {
            (0.0, 0.0)
        };

        (
            px * self.pixel_width + self.origin_x + half_x,
            py * self.pixel_height + self.origin_y + half_y,
        )
    }

    /// Convert a sequence of pixel locations, preserving order.
    pub fn pixels_to_coords(&self, pixels: &[(f64, f64)], pixel_center: bool) -> Vec<(f64, f64)> {
        pixels
            .iter()
            .map(|&(px, py)| self.pixel_to_coord(px, py, pixel_center))
            .collect()
    }

    /// Convert a coordinate to the pixel containing it.
    ///
    /// Uses floor division, so coordinates left of / above the origin map to
    /// negative pixels regardless of the sign of the pixel size.
    pub fn coord_to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        (
            ((x - self.origin_x) / self.pixel_width).floor() as i64,
            ((y - self.origin_y) / self.pixel_height).floor() as i64,
        )
    }

    /// Convert a sequence of coordinates. Absent coordinates map to `None`.
    pub fn coords_to_pixels(&self, coords: &[Option<(f64, f64)>]) -> Vec<Option<(i64, i64)>> {
        coords
            .iter()
            .map(|coord| coord.map(|(x, y)| self.coord_to_pixel(x, y)))
            .collect()
    }

    /// Spatial extent `(xmin, xmax, ymin, ymax)` of a `rows` x `cols` raster.
    pub fn extent(&self, rows: usize, cols: usize) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.pixel_to_coord(0.0, 0.0, false);
        let (x1, y1) = self.pixel_to_coord(cols as f64, rows as f64, false);
        (x0.min(x1), x0.max(x1), y0.min(y1), y0.max(y1))
    }

    /// Closed ring of the four corners of a pixel rectangle, starting at its
    /// top-left corner.
    pub fn corner_ring(&self, x: usize, y: usize, width: usize, height: usize) -> [(f64, f64); 5] {
        let tie = self.pixel_to_coord(x as f64, y as f64, false);
        let dx = self.pixel_width * width as f64;
        let dy = self.pixel_height * height as f64;

        [
            tie,
            (tie.0 + dx, tie.1),
            (tie.0 + dx, tie.1 + dy),
            (tie.0, tie.1 + dy),
            tie,
        ]
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        // GDAL's default for rasters without georeferencing
        Self {
            origin_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            origin_y: 0.0,
            rotation_y: 0.0,
            pixel_height: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn north_up_8x8() -> AffineTransform {
        AffineTransform::from_gdal([0.0, 1.0, 0.0, 8.0, 0.0, -1.0]).unwrap()
    }

    #[test]
    fn test_rejects_zero_pixel_size() {
        assert!(matches!(
            AffineTransform::from_gdal([0.0, 0.0, 0.0, 8.0, 0.0, -1.0]),
            Err(GeoTileError::InvalidTransform { .. })
        ));
        assert!(AffineTransform::from_gdal([0.0, 1.0, 0.0, 8.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_pixel_to_coord_center_and_corner() {
        let t = north_up_8x8();

        let (x, y) = t.pixel_to_coord(2.0, 2.0, false);
        assert_relative_eq!(x, 2.0);
        assert_relative_eq!(y, 6.0);

        let (x, y) = t.pixel_to_coord(2.0, 2.0, true);
        assert_relative_eq!(x, 2.5);
        assert_relative_eq!(y, 5.5);
    }

    #[test]
    fn test_coord_to_pixel_floors() {
        let t = north_up_8x8();
        assert_eq!(t.coord_to_pixel(2.5, 5.5), (2, 2));
        assert_eq!(t.coord_to_pixel(0.0, 8.0), (0, 0));
        // Left of and above the origin
        assert_eq!(t.coord_to_pixel(-0.5, 8.5), (-1, -1));
    }

    #[test]
    fn test_sequences_preserve_order_and_absent_entries() {
        let t = north_up_8x8();

        let coords = t.pixels_to_coords(&[(0.0, 0.0), (3.0, 1.0)], false);
        assert_eq!(coords, vec![(0.0, 8.0), (3.0, 7.0)]);

        let pixels = t.coords_to_pixels(&[Some((2.5, 5.5)), None, Some((7.9, 0.1))]);
        assert_eq!(pixels, vec![Some((2, 2)), None, Some((7, 7))]);
    }

    #[test]
    fn test_round_trip_is_exact() {
        let transforms = [
            north_up_8x8(),
            AffineTransform::from_gdal([500_000.0, 30.0, 0.0, 4_200_000.0, 0.0, -30.0]).unwrap(),
            // South-up
            AffineTransform::from_gdal([-180.0, 0.5, 0.0, -90.0, 0.0, 0.5]).unwrap(),
        ];

        for t in &transforms {
            for py in 0..20 {
                for px in 0..20 {
                    let (x, y) = t.pixel_to_coord(px as f64, py as f64, false);
                    assert_eq!(t.coord_to_pixel(x, y), (px, py));
                }
            }
        }
    }

    #[test]
    fn test_with_origin_keeps_pixel_size() {
        let t = north_up_8x8().with_origin((4.0, 4.0));
        assert_eq!(t.pixel_size(), (1.0, -1.0));
        assert_eq!(t.coord_to_pixel(4.5, 3.5), (0, 0));
    }

    #[test]
    fn test_extent_and_ring() {
        let t = north_up_8x8();
        assert_eq!(t.extent(8, 8), (0.0, 8.0, 0.0, 8.0));

        let ring = t.corner_ring(4, 0, 4, 4);
        assert_eq!(ring[0], (4.0, 8.0));
        assert_eq!(ring[2], (8.0, 4.0));
        assert_eq!(ring[0], ring[4]);
    }
}

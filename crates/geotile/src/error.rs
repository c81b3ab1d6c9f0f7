//! Error types for the geotile crate.

use thiserror::Error;

/// Errors that can occur when tiling, reading or sampling a raster.
#[derive(Debug, Error)]
pub enum GeoTileError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - tags present but unusable.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// The TIFF sample layout cannot be read block-wise.
    #[error("Unsupported data layout: {0}")]
    UnsupportedDataLayout(String),

    /// Affine transform with a zero pixel dimension.
    #[error("Invalid affine transform: pixel width ({pixel_width}) and height ({pixel_height}) must be non-zero")]
    InvalidTransform {
        /// Pixel width of the rejected transform.
        pixel_width: f64,
        /// Pixel height of the rejected transform.
        pixel_height: f64,
    },

    /// The requested pixel window is empty after clamping to the raster.
    #[error("Invalid bounds: pixel window x {xmin}..{xmax}, y {ymin}..{ymax} is empty")]
    InvalidBounds {
        /// Window minimum column.
        xmin: i64,
        /// Window maximum column (exclusive).
        xmax: i64,
        /// Window minimum row.
        ymin: i64,
        /// Window maximum row (exclusive).
        ymax: i64,
    },

    /// Tile width or height of zero.
    #[error("Invalid tile size {width}x{height}: both dimensions must be positive")]
    InvalidTileSize {
        /// Requested tile width.
        width: usize,
        /// Requested tile height.
        height: usize,
    },

    /// Tile larger than the raster it should cover.
    #[error("Tile size {tile_width}x{tile_height} is larger than raster {cols}x{rows}")]
    OversizedTile {
        /// Requested tile width.
        tile_width: usize,
        /// Requested tile height.
        tile_height: usize,
        /// Raster columns.
        cols: usize,
        /// Raster rows.
        rows: usize,
    },

    /// Band index outside the raster's band range (0-indexed).
    #[error("Band {band} out of range (raster has {band_count} bands)")]
    InvalidBand {
        /// Requested band (0-indexed).
        band: usize,
        /// Number of bands in the raster.
        band_count: usize,
    },

    /// The data source cannot serve the read.
    #[error("Raster source not initialized: {0}")]
    SourceNotInitialized(String),

    /// Geometry type the sampler cannot handle.
    #[error("Unsupported geometry type {0} (only POINT and MULTIPOINT are supported)")]
    UnsupportedGeometry(String),

    /// Geometry CRS differs from the raster CRS.
    #[error("Coordinate system mismatch: geometries in '{geometry}', raster in '{raster}'")]
    CoordinateSystemMismatch {
        /// CRS string supplied with the geometries.
        geometry: String,
        /// CRS string of the raster.
        raster: String,
    },

    /// WKT string that could not be parsed.
    #[error("Invalid WKT '{wkt}': {reason}")]
    InvalidWkt {
        /// The offending WKT string.
        wkt: String,
        /// Parser message.
        reason: String,
    },

    /// Identifier list does not match the geometry list.
    #[error("Got {ids} identifiers for {geometries} geometries")]
    IdentifierCountMismatch {
        /// Number of geometries.
        geometries: usize,
        /// Number of identifiers.
        ids: usize,
    },

    /// Configuration file could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

//! Tiling configuration loaded from YAML.
//!
//! ```yaml
//! tile_width: 512
//! tile_height: 512
//! bands: [0, 2]
//! finite_only: true
//! nan_replacement: -9999.0
//! bounds:
//!   type: crs
//!   xmin: 500000.0
//!   xmax: 510000.0
//!   ymin: 4100000.0
//!   ymax: 4110000.0
//! ```

use crate::grid::{Bounds, TileSize};
use crate::reader::{BandSelection, ReadOptions};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_tile_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// Defaults for tiled reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TilingConfig {
    #[serde(default = "default_tile_size")]
    pub tile_width: usize,
    #[serde(default = "default_tile_size")]
    pub tile_height: usize,
    /// 0-indexed bands; all bands when omitted.
    #[serde(default)]
    pub bands: BandSelection,
    #[serde(default = "default_true")]
    pub finite_only: bool,
    #[serde(default)]
    pub nan_replacement: Option<f64>,
    /// Restrict tiling to a sub-rectangle.
    #[serde(default)]
    pub bounds: Option<Bounds>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_width: default_tile_size(),
            tile_height: default_tile_size(),
            bands: BandSelection::All,
            finite_only: default_true(),
            nan_replacement: None,
            bounds: None,
        }
    }
}

impl TilingConfig {
    /// Parse from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Configured tile size, validated.
    pub fn tile_size(&self) -> Result<TileSize> {
        TileSize::new(self.tile_width, self.tile_height)
    }

    /// Read options carrying the configured bands and non-finite handling.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            bands: self.bands.clone(),
            finite_only: self.finite_only,
            nan_replacement: self.nan_replacement,
            get_array: true,
        }
    }
}

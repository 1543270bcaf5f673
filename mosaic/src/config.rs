//! Run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{ConfigError, Error, Result};
use crate::matching::PatchMatcherConfig;
use crate::output::OutputType;
use crate::ransac::RansacConfig;

/// Granularity the rendering tile size is rounded up to.
pub const TILE_MULTIPLE: usize = 16;

// =============================================================================
// Orientation
// =============================================================================

/// Direction along which the strip images follow each other.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Orientation {
    #[default]
    Horizontal,
    /// Recognized but not supported.
    Vertical,
}

impl Orientation {
    pub fn parse(name: &str) -> std::result::Result<Self, ConfigError> {
        name.parse()
            .map_err(|_| ConfigError::UnsupportedOrientation(name.to_string()))
    }
}

// =============================================================================
// Config
// =============================================================================

/// Parameters of one mosaic run. Read-only once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Strip images in placement order.
    pub images: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub orientation: Orientation,
    /// Width in pixels of the region searched for matches on each side of a pair.
    pub overlap_width: usize,
    /// Blend padding in pixels; 0 means `overlap_width`.
    pub blend_radius: usize,
    /// 1-based band index.
    pub band: usize,
    /// Samples less than or equal to this are invalid; overrides the file's nodata.
    pub input_nodata: Option<f64>,
    /// Value written where no image contributes.
    pub output_nodata: Option<f64>,
    pub output_type: OutputType,
    /// Requested rendering tile edge in pixels.
    pub tile_size: usize,
    pub ransac: RansacConfig,
    pub matcher: PatchMatcherConfig,
    /// Rendering threads; `None` uses rayon's global pool.
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            output: None,
            orientation: Orientation::Horizontal,
            overlap_width: 2000,
            blend_radius: 0,
            band: 1,
            input_nodata: None,
            output_nodata: None,
            output_type: OutputType::Float32,
            tile_size: 256,
            ransac: RansacConfig::default(),
            matcher: PatchMatcherConfig::default(),
            threads: None,
        }
    }
}

impl Config {
    /// Loads a YAML config. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml_str(&text).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> std::result::Result<Self, serde_yml::Error> {
        serde_yml::from_str(text)
    }

    /// Checks the parameters without touching any file.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.images.is_empty() {
            return Err(ConfigError::NoImages);
        }
        if self.output.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::MissingOutput);
        }
        if self.orientation != Orientation::Horizontal {
            return Err(ConfigError::UnsupportedOrientation(
                self.orientation.to_string(),
            ));
        }
        if self.overlap_width == 0 {
            return Err(ConfigError::ZeroOverlap);
        }
        if self.band == 0 {
            return Err(ConfigError::ZeroBand);
        }
        Ok(())
    }

    pub fn effective_blend_radius(&self) -> usize {
        if self.blend_radius == 0 {
            self.overlap_width
        } else {
            self.blend_radius
        }
    }

    /// Tile size used for rendering: at least twice the blend radius, in
    /// which case it is rounded up to [`TILE_MULTIPLE`].
    pub fn effective_tile_size(&self) -> usize {
        let min_size = 2 * self.effective_blend_radius();
        if self.tile_size < min_size {
            min_size.div_ceil(TILE_MULTIPLE) * TILE_MULTIPLE
        } else {
            self.tile_size.max(1)
        }
    }
}

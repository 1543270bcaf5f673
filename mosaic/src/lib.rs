//! Mosaic - blends a strip of overlapping raster images into one composite.
//!
//! The pipeline:
//! - Aligns each image to its predecessor from feature matches in their
//!   expected overlap (RANSAC affine fit)
//! - Chains the pairwise transforms into one placement per image
//! - Renders the canvas tile by tile, weighting every image by its distance
//!   from the edges of its valid data
//! - Writes the result as a single-band TIFF of the requested sample type
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mosaic::{Config, LogProgress, PatchMatcher, run};
//!
//! let config = Config {
//!     images: vec!["strip_0.tif".into(), "strip_1.tif".into()],
//!     output: Some("mosaic.tif".into()),
//!     overlap_width: 500,
//!     ..Default::default()
//! };
//! let summary = run(&config, &PatchMatcher::default(), &LogProgress)?;
//! println!("{}x{}", summary.canvas_width, summary.canvas_height);
//! ```

pub mod align;
pub mod config;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod matching;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod ransac;
pub mod raster;
pub mod render;
pub mod transform;
pub mod weights;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{Config, Orientation};
pub use error::{AlignmentError, ConfigError, Error, Result};

// ============================================================================
// Geometry
// ============================================================================

pub use geometry::Rect;
pub use transform::AffineTransform;

// ============================================================================
// Alignment
// ============================================================================

pub use align::{PairAligner, PairwiseAligner, overlap_regions};
pub use layout::{Layout, LayoutChainBuilder, Placement};
pub use matching::{FeatureMatcher, PatchMatcher, PatchMatcherConfig, PointMatch};
pub use ransac::{RansacConfig, RansacEstimator, RansacFit};

// ============================================================================
// Rendering and I/O
// ============================================================================

pub use output::{OutputType, write_raster};
pub use raster::{MemoryRaster, RasterSource, SourceImage, TiffRaster, open_raster};
pub use render::{MosaicRenderer, RasterView};
pub use weights::{CenterlineSpans, WeightFieldConfig, centerline_weights};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{RunSummary, run};
pub use progress::{LogProgress, MosaicProgress, MosaicStage, NoProgress, ProgressObserver};

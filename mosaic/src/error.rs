//! Error types for mosaic runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Invalid run parameters, detected before any image is opened.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("No images to mosaic")]
    NoImages,

    #[error("Missing output image name")]
    MissingOutput,

    #[error("Unsupported orientation '{0}', only 'horizontal' is supported")]
    UnsupportedOrientation(String),

    #[error(
        "Unsupported output type '{0}', expected one of Float32, Byte, UInt16, Int16, UInt32, Int32"
    )]
    UnsupportedOutputType(String),

    #[error("Overlap width must be greater than zero")]
    ZeroOverlap,

    #[error("Band numbers start at 1")]
    ZeroBand,

    #[error("Band {band} requested but '{path}' has {band_count} band(s)")]
    BandOutOfRange {
        band: usize,
        band_count: usize,
        path: PathBuf,
    },

    #[error("Overlap region of image {index} is empty")]
    EmptyOverlapRegion { index: usize },
}

/// Failure to place an image relative to its predecessor.
#[derive(Debug, Error, PartialEq)]
pub enum AlignmentError {
    #[error("No feature matches between images {first} and {second}")]
    NoMatches { first: usize, second: usize },

    #[error(
        "Only {count} feature match(es) between images {first} and {second}, at least 3 are needed"
    )]
    TooFewMatches {
        first: usize,
        second: usize,
        count: usize,
    },

    #[error("RANSAC found no affine fit between images {first} and {second} from {matches} matches")]
    RansacFailed {
        first: usize,
        second: usize,
        matches: usize,
    },

    #[error("Chained transform of image {index} is not invertible")]
    Singular { index: usize },
}

/// Errors that can occur during a mosaic run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode TIFF '{path}': {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Failed to read image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image_lib::ImageError,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Unsupported raster '{path}': {reason}")]
    UnsupportedRaster { path: PathBuf, reason: String },

    #[error("Failed to build render thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        Error::Tiff {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::UnsupportedRaster {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

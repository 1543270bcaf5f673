//! Raster sources and the per-image band view used by the pipeline.

mod memory;
mod tiff_raster;

pub use memory::MemoryRaster;
pub use tiff_raster::TiffRaster;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::Buffer2;

use crate::error::{ConfigError, Error, Result};
use crate::geometry::Rect;

/// GDAL's private TIFF tag holding the nodata value as ASCII text.
pub const GDAL_NODATA_TAG: u16 = 42113;

/// Read access to a multi-band raster.
///
/// Implementations must allow concurrent `read_region` calls.
pub trait RasterSource: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;
    /// Nodata value recorded with the raster, if any.
    fn nodata(&self) -> Option<f64>;
    /// Samples of `band` (0-based) inside `rect`, which must lie within the raster.
    fn read_region(&self, band: usize, rect: Rect) -> Result<Buffer2<f32>>;
}

/// Opens a raster, choosing the reader by file extension.
pub fn open_raster(path: &Path) -> Result<Arc<dyn RasterSource>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("tif" | "tiff") => Ok(Arc::new(TiffRaster::open(path)?)),
        Some("png" | "jpg" | "jpeg") => Ok(Arc::new(MemoryRaster::open(path)?)),
        _ => Err(Error::unsupported(path, "unrecognized file extension")),
    }
}

/// One band of a source raster together with its validity rule.
///
/// A sample is invalid when it is NaN or, if a nodata value is known, less
/// than or equal to it.
#[derive(Clone)]
pub struct SourceImage {
    raster: Arc<dyn RasterSource>,
    band: usize,
    nodata: Option<f64>,
    name: PathBuf,
}

impl std::fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceImage")
            .field("name", &self.name)
            .field("band", &self.band)
            .field("nodata", &self.nodata)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl SourceImage {
    /// Opens `path` and selects `band` (1-based).
    ///
    /// `nodata_override` replaces any nodata value stored in the file.
    pub fn open(path: &Path, band: usize, nodata_override: Option<f64>) -> Result<Self> {
        let raster = open_raster(path)?;
        Self::from_raster(raster, path, band, nodata_override)
    }

    /// Wraps an already opened raster. `band` is 1-based.
    pub fn from_raster(
        raster: Arc<dyn RasterSource>,
        name: impl Into<PathBuf>,
        band: usize,
        nodata_override: Option<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if band == 0 {
            return Err(ConfigError::ZeroBand.into());
        }
        let band_count = raster.band_count();
        if band > band_count {
            return Err(ConfigError::BandOutOfRange {
                band,
                band_count,
                path: name,
            }
            .into());
        }

        let nodata = nodata_override
            .or_else(|| raster.nodata())
            .filter(|v| !v.is_nan());

        Ok(Self {
            raster,
            band: band - 1,
            nodata,
            name,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.raster.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.raster.height()
    }

    /// The image's own pixel extent, anchored at the origin.
    #[inline]
    pub fn extent(&self) -> Rect {
        Rect::from_size(self.width(), self.height())
    }

    /// Effective nodata threshold; `None` means only NaN is invalid.
    #[inline]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    #[inline]
    pub fn is_valid(&self, value: f32) -> bool {
        !value.is_nan() && self.nodata.is_none_or(|nodata| value as f64 > nodata)
    }

    pub fn read_region(&self, rect: Rect) -> Result<Buffer2<f32>> {
        self.raster.read_region(self.band, rect)
    }

    /// Like [`read_region`](Self::read_region) with invalid samples replaced by NaN.
    pub fn read_masked(&self, rect: Rect) -> Result<Buffer2<f32>> {
        let mut region = self.read_region(rect)?;
        for v in region.iter_mut() {
            if !self.is_valid(*v) {
                *v = f32::NAN;
            }
        }
        Ok(region)
    }
}

use std::path::Path;

use common::Buffer2;
use image_lib::{DynamicImage, ImageBuffer, Pixel};

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::raster::RasterSource;

/// Fully decoded raster held in memory, one grid per band.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    bands: Vec<Buffer2<f32>>,
    nodata: Option<f64>,
}

impl MemoryRaster {
    /// # Panics
    ///
    /// Panics if `bands` is empty or the bands differ in size.
    pub fn new(bands: Vec<Buffer2<f32>>) -> Self {
        assert!(!bands.is_empty(), "MemoryRaster needs at least one band");
        let (width, height) = (bands[0].width(), bands[0].height());
        assert!(
            bands
                .iter()
                .all(|b| b.width() == width && b.height() == height),
            "all bands must have the same size"
        );
        Self {
            bands,
            nodata: None,
        }
    }

    pub fn from_band(band: Buffer2<f32>) -> Self {
        Self::new(vec![band])
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Decodes a PNG or JPEG file. Samples keep their stored integer values.
    pub fn open(path: &Path) -> Result<Self> {
        let image = image_lib::open(path).map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let bands = match &image {
            DynamicImage::ImageLuma8(b) => split_bands(b),
            DynamicImage::ImageLumaA8(b) => split_bands(b),
            DynamicImage::ImageRgb8(b) => split_bands(b),
            DynamicImage::ImageRgba8(b) => split_bands(b),
            DynamicImage::ImageLuma16(b) => split_bands(b),
            DynamicImage::ImageLumaA16(b) => split_bands(b),
            DynamicImage::ImageRgb16(b) => split_bands(b),
            DynamicImage::ImageRgba16(b) => split_bands(b),
            DynamicImage::ImageRgb32F(b) => split_bands(b),
            DynamicImage::ImageRgba32F(b) => split_bands(b),
            other => {
                return Err(Error::unsupported(
                    path,
                    format!("pixel layout {:?}", other.color()),
                ));
            }
        };

        Ok(Self::new(bands))
    }
}

fn split_bands<P>(buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> Vec<Buffer2<f32>>
where
    P: Pixel,
    P::Subpixel: Into<f32>,
{
    let (width, height) = (buffer.width() as usize, buffer.height() as usize);
    let channels = P::CHANNEL_COUNT as usize;
    let raw = buffer.as_raw();
    (0..channels)
        .map(|c| {
            let samples = raw
                .iter()
                .skip(c)
                .step_by(channels)
                .map(|&s| s.into())
                .collect();
            Buffer2::new(width, height, samples)
        })
        .collect()
}

impl RasterSource for MemoryRaster {
    fn width(&self) -> usize {
        self.bands[0].width()
    }

    fn height(&self) -> usize {
        self.bands[0].height()
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_region(&self, band: usize, rect: Rect) -> Result<Buffer2<f32>> {
        let grid = &self.bands[band];
        if !Rect::from_size(grid.width(), grid.height()).contains_rect(&rect) {
            return Err(Error::unsupported(
                "<memory>",
                format!("region {rect} outside {}x{} raster", grid.width(), grid.height()),
            ));
        }
        Ok(grid.crop(
            rect.x_min as usize,
            rect.y_min as usize,
            rect.width(),
            rect.height(),
        ))
    }
}

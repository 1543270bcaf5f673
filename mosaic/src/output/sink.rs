use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tiff::encoder::{TiffEncoder, TiffValue, colortype};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::output::{OutputType, round_and_clamp};
use crate::progress::{MosaicStage, ProgressObserver, report_progress};
use crate::raster::GDAL_NODATA_TAG;
use crate::render::RasterView;

/// Tallest stripe rendered and held in memory at once.
pub(crate) const MAX_STRIPE_ROWS: usize = 256;

/// Renders `view` and writes it to a single-band TIFF at `path`.
///
/// The canvas is produced in horizontal stripes of at most
/// [`MAX_STRIPE_ROWS`] rows, split into tiles `tile_size` wide. The tiles of
/// a stripe are rendered in parallel, converted to `output_type` and written
/// as one TIFF strip.
///
/// The TIFF is written next to `path` and renamed into place once complete,
/// so a failed run leaves no partial output behind.
pub fn write_raster(
    path: &Path,
    view: &dyn RasterView,
    nodata: f64,
    output_type: OutputType,
    tile_size: usize,
    progress: &dyn ProgressObserver,
) -> Result<()> {
    info!(
        path = %path.display(),
        width = view.width(),
        height = view.height(),
        %output_type,
        tile_size,
        "Writing mosaic"
    );

    let partial = partial_path(path);
    let nodata_tag = output_type.nodata_tag(nodata);
    let job = StripeJob {
        path,
        view,
        tile_size,
        stripe_rows: tile_size.clamp(1, MAX_STRIPE_ROWS),
        nodata_tag: &nodata_tag,
        progress,
    };

    match job.encode(&partial, output_type) {
        Ok(()) => fs::rename(&partial, path).map_err(|e| Error::io(path, e)),
        Err(err) => {
            if let Err(remove) = fs::remove_file(&partial) {
                warn!(path = %partial.display(), error = %remove, "Failed to remove partial output");
            }
            Err(err)
        }
    }
}

/// Sibling of `path` that receives the output until it is complete.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("mosaic"));
    name.push(".partial");
    path.with_file_name(name)
}

struct StripeJob<'a> {
    /// Final output path, used in error messages.
    path: &'a Path,
    view: &'a dyn RasterView,
    tile_size: usize,
    stripe_rows: usize,
    nodata_tag: &'a str,
    progress: &'a dyn ProgressObserver,
}

impl StripeJob<'_> {
    fn encode(&self, target: &Path, output_type: OutputType) -> Result<()> {
        let file = File::create(target).map_err(|e| Error::io(self.path, e))?;
        let mut writer = BufWriter::new(file);

        let written = match output_type {
            OutputType::Float32 => self.write::<colortype::Gray32Float, _, _>(&mut writer, |v| v),
            OutputType::Byte => {
                self.write::<colortype::Gray8, _, _>(&mut writer, |v| round_and_clamp::<u8>(v as f64))
            }
            OutputType::UInt16 => {
                self.write::<colortype::Gray16, _, _>(&mut writer, |v| round_and_clamp::<u16>(v as f64))
            }
            OutputType::Int16 => {
                self.write::<colortype::GrayI16, _, _>(&mut writer, |v| round_and_clamp::<i16>(v as f64))
            }
            OutputType::UInt32 => {
                self.write::<colortype::Gray32, _, _>(&mut writer, |v| round_and_clamp::<u32>(v as f64))
            }
            OutputType::Int32 => {
                self.write::<colortype::GrayI32, _, _>(&mut writer, |v| round_and_clamp::<i32>(v as f64))
            }
        };
        written?;

        writer.flush().map_err(|e| Error::io(self.path, e))
    }

    fn write<C, W, F>(&self, writer: W, convert: F) -> Result<()>
    where
        C: colortype::ColorType,
        C::Inner: Clone + Send,
        [C::Inner]: TiffValue,
        W: Write + Seek,
        F: Fn(f32) -> C::Inner + Sync,
    {
        let tiff_err = |e| Error::tiff(self.path, e);
        let (width, height) = (self.view.width(), self.view.height());

        let mut encoder = TiffEncoder::new(writer).map_err(tiff_err)?;
        let mut image = encoder
            .new_image::<C>(width as u32, height as u32)
            .map_err(tiff_err)?;
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA_TAG), self.nodata_tag)
            .map_err(tiff_err)?;
        image
            .rows_per_strip(self.stripe_rows as u32)
            .map_err(tiff_err)?;

        let stripes = Rect::from_size(width, height).tiles(width.max(1), self.stripe_rows);
        let total = stripes.len();
        for (index, stripe) in stripes.iter().enumerate() {
            let samples = self.render_stripe(stripe, &convert)?;
            image.write_strip(&samples).map_err(tiff_err)?;

            debug!(stripe = index, rows = stripe.height(), "Wrote stripe");
            report_progress(self.progress, MosaicStage::Rendering, index + 1, total);
        }

        image.finish().map_err(tiff_err)
    }

    /// Converted samples of `stripe` in row-major order. Each tile is
    /// converted as soon as it is rendered.
    fn render_stripe<T, F>(&self, stripe: &Rect, convert: &F) -> Result<Vec<T>>
    where
        T: Clone + Send,
        F: Fn(f32) -> T + Sync,
    {
        let tiles = stripe.tiles(self.tile_size, stripe.height());
        let converted: Vec<Vec<T>> = tiles
            .par_iter()
            .map(|tile| -> Result<Vec<T>> {
                let pixels = self.view.render(*tile)?;
                Ok(pixels.iter().map(|&v| convert(v)).collect())
            })
            .collect::<Result<_>>()?;

        let mut samples = Vec::with_capacity(stripe.area());
        for y in 0..stripe.height() {
            for (tile, values) in tiles.iter().zip(&converted) {
                let w = tile.width();
                samples.extend_from_slice(&values[y * w..(y + 1) * w]);
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Buffer2;
    use crate::progress::{MosaicProgress, NoProgress};
    use crate::raster::{RasterSource, TiffRaster};
    use crate::testing::scratch_path;
    use std::sync::Mutex;

    /// Value `x + 0.25 * y - 3`, NaN in the first column.
    struct Gradient {
        width: usize,
        height: usize,
    }

    impl RasterView for Gradient {
        fn width(&self) -> usize {
            self.width
        }

        fn height(&self) -> usize {
            self.height
        }

        fn render(&self, region: Rect) -> Result<Buffer2<f32>> {
            Ok(Buffer2::from_fn(region.width(), region.height(), |x, y| {
                let gx = region.x_min as usize + x;
                let gy = region.y_min as usize + y;
                if gx == 0 {
                    f32::NAN
                } else {
                    gx as f32 + 0.25 * gy as f32 - 3.0
                }
            }))
        }
    }

    #[test]
    fn test_float_round_trip() {
        let path = scratch_path("sink_float.tif");
        let view = Gradient {
            width: 37,
            height: 21,
        };
        write_raster(&path, &view, f64::NAN, OutputType::Float32, 16, &NoProgress).unwrap();

        let raster = TiffRaster::open(&path).unwrap();
        assert_eq!((raster.width(), raster.height()), (37, 21));
        assert!(raster.nodata().is_some_and(f64::is_nan));

        let read = raster.read_region(0, Rect::from_size(37, 21)).unwrap();
        let expected = view.render(Rect::from_size(37, 21)).unwrap();
        for (a, b) in read.iter().zip(expected.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()), "{a} vs {b}");
        }
    }

    #[test]
    fn test_byte_output_rounds_and_clamps() {
        let path = scratch_path("sink_byte.tif");
        let view = Gradient {
            width: 20,
            height: 8,
        };
        write_raster(&path, &view, -5.0, OutputType::Byte, 16, &NoProgress).unwrap();

        let raster = TiffRaster::open(&path).unwrap();
        assert_eq!(raster.nodata(), Some(0.0));
        let read = raster.read_region(0, Rect::from_size(20, 8)).unwrap();
        assert_eq!(read[(0, 0)], 0.0);
        assert_eq!(read[(1, 0)], 0.0);
        assert_eq!(read[(5, 2)], 3.0);
        assert_eq!(read[(19, 7)], 18.0);
    }

    #[test]
    fn test_signed_output_keeps_negatives() {
        let path = scratch_path("sink_i16.tif");
        let view = Gradient {
            width: 6,
            height: 3,
        };
        write_raster(&path, &view, -32768.0, OutputType::Int16, 16, &NoProgress).unwrap();

        let raster = TiffRaster::open(&path).unwrap();
        assert_eq!(raster.nodata(), Some(-32768.0));
        let read = raster.read_region(0, Rect::from_size(6, 3)).unwrap();
        assert_eq!(read[(1, 0)], -2.0);
        assert_eq!(read[(2, 2)], -1.0);
    }

    #[test]
    fn test_reports_one_step_per_stripe() {
        let path = scratch_path("sink_progress.tif");
        let view = Gradient {
            width: 10,
            height: 40,
        };
        let seen = Mutex::new(Vec::new());
        let observer = |p: MosaicProgress| seen.lock().unwrap().push((p.stage, p.current, p.total));
        write_raster(&path, &view, 0.0, OutputType::UInt16, 16, &observer).unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], (MosaicStage::Rendering, 3, 3));
    }

    /// Fails on any region reaching row `fail_row`.
    struct FailingView {
        fail_row: i64,
    }

    impl RasterView for FailingView {
        fn width(&self) -> usize {
            8
        }

        fn height(&self) -> usize {
            40
        }

        fn render(&self, region: Rect) -> Result<Buffer2<f32>> {
            if region.y_max > self.fail_row {
                return Err(Error::unsupported("<view>", "render failed"));
            }
            Ok(Buffer2::new_filled(region.width(), region.height(), 1.0))
        }
    }

    #[test]
    fn test_failed_render_leaves_previous_output() {
        let path = scratch_path("sink_failed.tif");
        std::fs::write(&path, b"previous").unwrap();

        let view = FailingView { fail_row: 20 };
        let err = write_raster(&path, &view, 0.0, OutputType::Byte, 16, &NoProgress).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRaster { .. }));

        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_failed_render_creates_no_file() {
        let path = scratch_path("sink_failed_new.tif");
        let _ = std::fs::remove_file(&path);

        let view = FailingView { fail_row: 0 };
        assert!(write_raster(&path, &view, 0.0, OutputType::Float32, 16, &NoProgress).is_err());
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    /// Records the tallest region it was asked for.
    struct TallestRegion {
        tallest: Mutex<usize>,
    }

    impl RasterView for TallestRegion {
        fn width(&self) -> usize {
            30
        }

        fn height(&self) -> usize {
            600
        }

        fn render(&self, region: Rect) -> Result<Buffer2<f32>> {
            let mut tallest = self.tallest.lock().unwrap();
            *tallest = (*tallest).max(region.height());
            Ok(Buffer2::from_fn(region.width(), region.height(), |x, y| {
                (region.x_min as usize + x + region.y_min as usize + y) as f32
            }))
        }
    }

    #[test]
    fn test_large_tiles_render_in_short_stripes() {
        let path = scratch_path("sink_short_stripes.tif");
        let view = TallestRegion {
            tallest: Mutex::new(0),
        };
        let seen = Mutex::new(0usize);
        let observer = |p: MosaicProgress| *seen.lock().unwrap() = p.total;
        write_raster(&path, &view, 0.0, OutputType::UInt16, 4000, &observer).unwrap();

        assert_eq!(*view.tallest.lock().unwrap(), MAX_STRIPE_ROWS);
        assert_eq!(*seen.lock().unwrap(), 3);

        let raster = TiffRaster::open(&path).unwrap();
        let read = raster.read_region(0, Rect::from_size(30, 600)).unwrap();
        assert_eq!(read[(0, 0)], 0.0);
        assert_eq!(read[(29, 599)], 628.0);
        assert_eq!(read[(7, 300)], 307.0);
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let partial = partial_path(Path::new("/data/out/mosaic.tif"));
        assert_eq!(partial, Path::new("/data/out/mosaic.tif.partial"));
    }
}

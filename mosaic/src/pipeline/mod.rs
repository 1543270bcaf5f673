//! End-to-end mosaic run: validate, open, align, render, write.

#[cfg(test)]
mod tests;

use tracing::info;

use crate::align::PairwiseAligner;
use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::layout::LayoutChainBuilder;
use crate::matching::FeatureMatcher;
use crate::output::write_raster;
use crate::progress::ProgressObserver;
use crate::ransac::RansacEstimator;
use crate::raster::SourceImage;
use crate::render::MosaicRenderer;
use crate::transform::AffineTransform;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub canvas_width: usize,
    pub canvas_height: usize,
    /// Source-to-canvas transform of every image, in input order.
    pub transforms: Vec<AffineTransform>,
    /// Nodata value the output was written with, before type conversion.
    pub output_nodata: f64,
}

/// Output nodata: the configured value, else the first image's nodata, else NaN.
pub fn resolve_output_nodata(config: &Config, images: &[SourceImage]) -> f64 {
    config
        .output_nodata
        .or_else(|| images.first().and_then(SourceImage::nodata))
        .unwrap_or(f64::NAN)
}

/// Runs the whole pipeline described by `config`.
///
/// Configuration errors are reported before any image is opened. Alignment
/// errors abort the run before the output file is created.
pub fn run(
    config: &Config,
    matcher: &dyn FeatureMatcher,
    progress: &dyn ProgressObserver,
) -> Result<RunSummary> {
    config.validate()?;
    let output = config.output.as_deref().ok_or(ConfigError::MissingOutput)?;

    let blend_radius = config.effective_blend_radius();
    let tile_size = config.effective_tile_size();
    info!(
        images = config.images.len(),
        overlap_width = config.overlap_width,
        blend_radius,
        tile_size,
        "Starting mosaic"
    );

    let images = config
        .images
        .iter()
        .map(|path| SourceImage::open(path, config.band, config.input_nodata))
        .collect::<Result<Vec<_>>>()?;

    let aligner = PairwiseAligner::new(
        matcher,
        RansacEstimator::new(config.ransac.clone()),
        config.overlap_width,
    );
    let layout = LayoutChainBuilder::new(&aligner, progress).build(&images)?;

    let output_nodata = resolve_output_nodata(config, &images);
    let write = || -> Result<()> {
        let renderer = MosaicRenderer::new(&images, &layout, blend_radius, output_nodata)?;
        write_raster(
            output,
            &renderer,
            output_nodata,
            config.output_type,
            tile_size,
            progress,
        )
    };

    match config.threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?;
            pool.install(write)?;
        }
        None => write()?,
    }

    info!(
        path = %output.display(),
        width = layout.width(),
        height = layout.height(),
        "Mosaic written"
    );

    Ok(RunSummary {
        canvas_width: layout.width(),
        canvas_height: layout.height(),
        transforms: layout.transforms(),
        output_nodata,
    })
}

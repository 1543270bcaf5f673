use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::{LogConfig, setup_logging};
use mosaic::{Config, LogProgress, Orientation, OutputType, PatchMatcher, run};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "image_mosaic")]
#[command(about = "Blend a strip of overlapping images into one mosaic")]
struct Cli {
    /// Input images in strip order
    images: Vec<PathBuf>,

    /// Output image
    #[arg(short = 'o', long = "output-image")]
    output: Option<PathBuf>,

    /// YAML file with run options; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image layout, only horizontal is supported
    #[arg(long)]
    orientation: Option<String>,

    /// Size of the overlap region searched for matches
    #[arg(long)]
    overlap_width: Option<usize>,

    /// Size to blend over, defaults to the overlap width
    #[arg(long)]
    blend_radius: Option<usize>,

    /// Band to use for multi-band images (1-based)
    #[arg(long)]
    band: Option<usize>,

    /// Input values less than or equal to this are invalid
    #[arg(long, allow_hyphen_values = true)]
    input_nodata_value: Option<f64>,

    /// Nodata value written to the output
    #[arg(long, allow_hyphen_values = true)]
    output_nodata_value: Option<f64>,

    /// Output type: Byte, UInt16, Int16, UInt32, Int32 or Float32.
    /// Integer outputs are rounded, then clamped to the type's range.
    #[arg(long = "ot")]
    output_type: Option<String>,

    /// Rendering tile size in pixels
    #[arg(long)]
    tile_size: Option<usize>,

    /// Rendering threads
    #[arg(long)]
    threads: Option<usize>,

    /// RANSAC iterations per search round
    #[arg(long)]
    ransac_iterations: Option<usize>,

    /// RANSAC inlier distance in pixels
    #[arg(long)]
    inlier_threshold: Option<f64>,

    /// Seed for reproducible RANSAC sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };

        if !self.images.is_empty() {
            config.images = self.images;
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }
        if let Some(orientation) = &self.orientation {
            config.orientation = Orientation::parse(orientation)?;
        }
        if let Some(output_type) = &self.output_type {
            config.output_type = OutputType::parse(output_type)?;
        }
        if let Some(v) = self.overlap_width {
            config.overlap_width = v;
        }
        if let Some(v) = self.blend_radius {
            config.blend_radius = v;
        }
        if let Some(v) = self.band {
            config.band = v;
        }
        if let Some(v) = self.input_nodata_value {
            config.input_nodata = Some(v);
        }
        if let Some(v) = self.output_nodata_value {
            config.output_nodata = Some(v);
        }
        if let Some(v) = self.tile_size {
            config.tile_size = v;
        }
        if let Some(v) = self.threads {
            config.threads = Some(v);
        }
        if let Some(v) = self.ransac_iterations {
            config.ransac.iterations = v;
        }
        if let Some(v) = self.inlier_threshold {
            config.ransac.inlier_threshold = v;
        }
        if let Some(v) = self.seed {
            config.ransac.seed = Some(v);
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&LogConfig {
        level: cli.log_level.clone(),
        directory: cli.log_dir.clone(),
        ..Default::default()
    })?;

    let config = cli.into_config()?;
    info!(
        blend_radius = config.effective_blend_radius(),
        tile_size = config.effective_tile_size(),
        "Using blend radius and tile size"
    );

    let matcher = PatchMatcher::new(config.matcher.clone());
    let summary = run(&config, &matcher, &LogProgress).context("Mosaic failed")?;

    info!(
        width = summary.canvas_width,
        height = summary.canvas_height,
        "Done"
    );
    Ok(())
}

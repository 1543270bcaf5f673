//! Testing utilities for mosaic.

#![allow(dead_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::Buffer2;
use glam::DVec2;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::matching::{FeatureMatcher, PointMatch};
use crate::raster::{GDAL_NODATA_TAG, MemoryRaster, SourceImage};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Path for a test output file inside a per-process scratch directory.
pub fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mosaic-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("Failed to create scratch directory");
    dir.join(name)
}

/// Uniform noise in `[1, 1000)`, reproducible from `seed`.
pub fn noise_ground(width: usize, height: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Buffer2::from_fn(width, height, |_, _| rng.random_range(1.0f32..1000.0))
}

/// Wraps an in-memory band as band 1 of a source image.
pub fn memory_image(pixels: Buffer2<f32>, name: &str, nodata: Option<f64>) -> SourceImage {
    let raster = Arc::new(MemoryRaster::from_band(pixels));
    SourceImage::from_raster(raster, name, 1, nodata).expect("band 1 always exists")
}

/// Writes a single-band `f32` TIFF, optionally tagged with a nodata value.
pub fn write_tiff_f32(path: &Path, pixels: &Buffer2<f32>, nodata: Option<f64>) {
    let file = BufWriter::new(File::create(path).expect("Failed to create test TIFF"));
    let mut encoder = TiffEncoder::new(file).expect("Failed to start TIFF");
    let mut image = encoder
        .new_image::<colortype::Gray32Float>(pixels.width() as u32, pixels.height() as u32)
        .expect("Failed to start TIFF image");
    if let Some(nodata) = nodata {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA_TAG), format!("{nodata}").as_str())
            .expect("Failed to write nodata tag");
    }
    image.write_data(pixels.pixels()).expect("Failed to write TIFF data");
}

/// Matcher for pure integer translations.
///
/// Finds the shift `(dx, dy)` minimising the mean absolute difference
/// `|a(x + dx, y + dy) - b(x, y)|` and reports matches on a regular grid of
/// the overlap.
#[derive(Debug, Clone, Copy)]
pub struct BlockSearchMatcher {
    pub max_shift: i64,
    pub grid_step: usize,
}

impl Default for BlockSearchMatcher {
    fn default() -> Self {
        Self {
            max_shift: 16,
            grid_step: 4,
        }
    }
}

impl BlockSearchMatcher {
    fn best_shift(&self, a: &Buffer2<f32>, b: &Buffer2<f32>) -> Option<(i64, i64)> {
        let mut best: Option<(f64, i64, i64)> = None;
        for dy in -self.max_shift..=self.max_shift {
            for dx in -self.max_shift..=self.max_shift {
                let mut sum = 0.0f64;
                let mut count = 0usize;
                let mut columns = std::collections::HashSet::new();
                for y in 0..b.height() as i64 {
                    for x in 0..b.width() as i64 {
                        let (Some(va), Some(vb)) = (a.checked_get(x + dx, y + dy), b.checked_get(x, y))
                        else {
                            continue;
                        };
                        if va.is_nan() || vb.is_nan() {
                            continue;
                        }
                        sum += (va - vb).abs() as f64;
                        count += 1;
                        columns.insert(x);
                    }
                }
                if columns.len() < 3 {
                    continue;
                }
                let mean = sum / count as f64;
                if best.is_none_or(|(m, _, _)| mean < m) {
                    best = Some((mean, dx, dy));
                }
            }
        }
        best.map(|(_, dx, dy)| (dx, dy))
    }
}

impl FeatureMatcher for BlockSearchMatcher {
    fn find_matches(&self, a: &Buffer2<f32>, b: &Buffer2<f32>) -> Vec<PointMatch> {
        let Some((dx, dy)) = self.best_shift(a, b) else {
            return Vec::new();
        };
        let mut matches = Vec::new();
        for y in (0..b.height() as i64).step_by(self.grid_step) {
            for x in (0..b.width() as i64).step_by(self.grid_step) {
                let (Some(va), Some(vb)) = (a.checked_get(x + dx, y + dy), b.checked_get(x, y))
                else {
                    continue;
                };
                if va.is_nan() || vb.is_nan() {
                    continue;
                }
                matches.push(PointMatch::new(
                    DVec2::new((x + dx) as f64, (y + dy) as f64),
                    DVec2::new(x as f64, y as f64),
                ));
            }
        }
        matches
    }
}

/// Matcher returning a fixed list.
#[derive(Debug, Clone, Default)]
pub struct FixedMatcher(pub Vec<PointMatch>);

impl FeatureMatcher for FixedMatcher {
    fn find_matches(&self, _a: &Buffer2<f32>, _b: &Buffer2<f32>) -> Vec<PointMatch> {
        self.0.clone()
    }
}

/// Matcher that must never be consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicMatcher;

impl FeatureMatcher for PanicMatcher {
    fn find_matches(&self, _a: &Buffer2<f32>, _b: &Buffer2<f32>) -> Vec<PointMatch> {
        panic!("matcher must not be called");
    }
}

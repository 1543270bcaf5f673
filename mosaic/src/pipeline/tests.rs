use super::*;
use crate::error::{AlignmentError, Error};
use crate::geometry::Rect;
use crate::matching::PatchMatcher;
use crate::output::OutputType;
use crate::progress::{MosaicProgress, MosaicStage, NoProgress};
use crate::raster::{RasterSource, TiffRaster};
use crate::ransac::RansacConfig;
use crate::testing::{
    BlockSearchMatcher, FixedMatcher, PanicMatcher, init_tracing, memory_image, noise_ground,
    scratch_path, write_tiff_f32,
};
use common::Buffer2;
use std::path::PathBuf;
use std::sync::Mutex;

/// Two 100x100 strips cut from one ground image, the second starting 90
/// columns to the right.
fn write_strip_pair(prefix: &str) -> (Buffer2<f32>, Vec<PathBuf>) {
    let ground = noise_ground(190, 100, 33);
    let left = scratch_path(&format!("{prefix}_left.tif"));
    let right = scratch_path(&format!("{prefix}_right.tif"));
    write_tiff_f32(&left, &ground.crop(0, 0, 100, 100), None);
    write_tiff_f32(&right, &ground.crop(90, 0, 100, 100), None);
    (ground, vec![left, right])
}

fn strip_config(images: Vec<PathBuf>, output: PathBuf) -> Config {
    Config {
        images,
        output: Some(output),
        overlap_width: 20,
        tile_size: 32,
        ransac: RansacConfig {
            seed: Some(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn read_output(path: &std::path::Path) -> Buffer2<f32> {
    let raster = TiffRaster::open(path).unwrap();
    raster
        .read_region(0, Rect::from_size(raster.width(), raster.height()))
        .unwrap()
}

#[test]
fn test_two_strips_end_to_end() {
    init_tracing();
    let (ground, images) = write_strip_pair("e2e");
    let output = scratch_path("e2e_out.tif");
    let config = strip_config(images, output.clone());

    let summary = run(&config, &BlockSearchMatcher::default(), &NoProgress).unwrap();

    assert_eq!((summary.canvas_width, summary.canvas_height), (190, 100));
    assert_eq!(summary.transforms[0], AffineTransform::IDENTITY);
    assert!(
        summary.transforms[1].max_abs_diff(&AffineTransform::translation(90.0, 0.0)) < 1e-6,
        "got {}",
        summary.transforms[1]
    );
    assert!(summary.output_nodata.is_nan());

    let out = read_output(&output);
    assert_eq!((out.width(), out.height()), (190, 100));
    for y in 0..100 {
        for x in 0..190 {
            if x < 90 || x >= 100 {
                assert_eq!(out[(x, y)], ground[(x, y)], "pixel ({x}, {y})");
            } else {
                assert!((out[(x, y)] - ground[(x, y)]).abs() < 1e-3, "pixel ({x}, {y})");
            }
        }
    }
}

#[test]
fn test_default_matcher_aligns_narrow_overlap() {
    init_tracing();
    let (_, images) = write_strip_pair("patch");
    let config = strip_config(images, scratch_path("patch_out.tif"));

    let matcher = PatchMatcher::new(config.matcher.clone());
    let summary = run(&config, &matcher, &NoProgress).unwrap();

    assert_eq!((summary.canvas_width, summary.canvas_height), (190, 100));
    assert!(
        summary.transforms[1].max_abs_diff(&AffineTransform::translation(90.0, 0.0)) < 1e-6,
        "got {}",
        summary.transforms[1]
    );
}

#[test]
fn test_single_image_skips_alignment() {
    let pixels = noise_ground(48, 20, 5);
    let input = scratch_path("single_in.tif");
    write_tiff_f32(&input, &pixels, Some(-1.0));
    let output = scratch_path("single_out.tif");
    let config = strip_config(vec![input], output.clone());

    let summary = run(&config, &PanicMatcher, &NoProgress).unwrap();
    assert_eq!((summary.canvas_width, summary.canvas_height), (48, 20));
    assert_eq!(summary.output_nodata, -1.0);

    assert_eq!(read_output(&output), pixels);
    assert_eq!(TiffRaster::open(&output).unwrap().nodata(), Some(-1.0));
}

#[test]
fn test_vertical_rejected_before_opening_files() {
    let config = Config {
        images: vec![PathBuf::from("/nonexistent/a.tif")],
        output: Some(scratch_path("never_written.tif")),
        orientation: crate::config::Orientation::Vertical,
        ..Default::default()
    };
    let err = run(&config, &PanicMatcher, &NoProgress).unwrap_err();
    assert!(matches!(
        err,
        Error::Configuration(ConfigError::UnsupportedOrientation(_))
    ));
}

#[test]
fn test_missing_input_is_io_error() {
    let config = strip_config(
        vec![PathBuf::from("/nonexistent/a.tif")],
        scratch_path("missing_in.tif"),
    );
    let err = run(&config, &PanicMatcher, &NoProgress).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_band_out_of_range() {
    let input = scratch_path("band_in.tif");
    write_tiff_f32(&input, &noise_ground(8, 8, 1), None);
    let mut config = strip_config(vec![input], scratch_path("band_out.tif"));
    config.band = 2;
    let err = run(&config, &PanicMatcher, &NoProgress).unwrap_err();
    assert!(matches!(
        err,
        Error::Configuration(ConfigError::BandOutOfRange { band: 2, band_count: 1, .. })
    ));
}

#[test]
fn test_alignment_failure_writes_nothing() {
    let (_, images) = write_strip_pair("nomatch");
    let output = scratch_path("nomatch_out.tif");
    let _ = std::fs::remove_file(&output);
    let config = strip_config(images, output.clone());

    let err = run(&config, &FixedMatcher::default(), &NoProgress).unwrap_err();
    assert!(matches!(
        err,
        Error::Alignment(AlignmentError::NoMatches { first: 0, second: 1 })
    ));
    assert!(!output.exists());
}

#[test]
fn test_integer_output_with_threads_and_progress() {
    let (ground, images) = write_strip_pair("int");
    let output = scratch_path("int_out.tif");
    let mut config = strip_config(images, output.clone());
    config.output_type = OutputType::UInt16;
    config.output_nodata = Some(0.0);
    config.threads = Some(2);

    let seen = Mutex::new(Vec::new());
    let observer = |p: MosaicProgress| seen.lock().unwrap().push(p);
    let summary = run(&config, &BlockSearchMatcher::default(), &observer).unwrap();
    assert_eq!(summary.output_nodata, 0.0);

    let out = read_output(&output);
    assert_eq!(out[(3, 7)], ground[(3, 7)].round());
    assert_eq!(out[(150, 60)], ground[(150, 60)].round());

    let seen = seen.into_inner().unwrap();
    assert_eq!(
        seen.iter().filter(|p| p.stage == MosaicStage::Aligning).count(),
        1
    );
    let rendering: Vec<_> = seen
        .iter()
        .filter(|p| p.stage == MosaicStage::Rendering)
        .collect();
    assert_eq!(rendering.last().map(|p| (p.current, p.total)), Some((3, 3)));
}

#[test]
fn test_output_nodata_resolution() {
    let with_nodata = memory_image(Buffer2::new_filled(4, 4, 1.0), "a.tif", Some(-5.0));
    let without = memory_image(Buffer2::new_filled(4, 4, 1.0), "b.tif", None);
    let mut config = Config::default();

    assert_eq!(resolve_output_nodata(&config, &[with_nodata.clone()]), -5.0);
    assert!(resolve_output_nodata(&config, &[without.clone(), with_nodata.clone()]).is_nan());

    config.output_nodata = Some(7.0);
    assert_eq!(resolve_output_nodata(&config, &[with_nodata]), 7.0);
}

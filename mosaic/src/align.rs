//! Pairwise alignment of consecutive strip images.

use glam::DVec2;
use tracing::{debug, info};

use crate::error::{AlignmentError, ConfigError, Result};
use crate::geometry::Rect;
use crate::matching::FeatureMatcher;
use crate::ransac::{AFFINE_SAMPLE_SIZE, RansacEstimator};
use crate::raster::SourceImage;
use crate::transform::AffineTransform;

/// Estimates the transform between two neighbouring images.
pub trait PairAligner: Sync {
    /// Returns the transform mapping pixels of `second` into the pixel frame
    /// of `first`. `first_index` is the position of `first` in the strip;
    /// `second` sits at `first_index + 1`.
    fn align(
        &self,
        first_index: usize,
        first: &SourceImage,
        second: &SourceImage,
    ) -> Result<AffineTransform>;
}

/// Expected overlap of a horizontal pair: the trailing `overlap_width`
/// columns of `first` and the leading `overlap_width` columns of `second`,
/// each narrowed to the image width.
pub fn overlap_regions(first: &SourceImage, second: &SourceImage, overlap_width: usize) -> (Rect, Rect) {
    let w1 = first.width();
    let w2 = second.width();
    let roi1 = Rect::new(
        (w1 - overlap_width.min(w1)) as i64,
        0,
        w1 as i64,
        first.height() as i64,
    );
    let roi2 = Rect::from_size(overlap_width.min(w2), second.height());
    (roi1, roi2)
}

/// Feature-based aligner: matches the overlap regions and fits an affine
/// transform to the matches with RANSAC.
pub struct PairwiseAligner<'a> {
    matcher: &'a dyn FeatureMatcher,
    ransac: RansacEstimator,
    overlap_width: usize,
}

impl<'a> PairwiseAligner<'a> {
    pub fn new(matcher: &'a dyn FeatureMatcher, ransac: RansacEstimator, overlap_width: usize) -> Self {
        Self {
            matcher,
            ransac,
            overlap_width,
        }
    }
}

impl PairAligner for PairwiseAligner<'_> {
    fn align(
        &self,
        first_index: usize,
        first: &SourceImage,
        second: &SourceImage,
    ) -> Result<AffineTransform> {
        let second_index = first_index + 1;
        let (roi1, roi2) = overlap_regions(first, second, self.overlap_width);
        if roi1.is_empty() {
            return Err(ConfigError::EmptyOverlapRegion { index: first_index }.into());
        }
        if roi2.is_empty() {
            return Err(ConfigError::EmptyOverlapRegion {
                index: second_index,
            }
            .into());
        }

        let region1 = first.read_masked(roi1)?;
        let region2 = second.read_masked(roi2)?;
        let matches = self.matcher.find_matches(&region1, &region2);

        info!(
            first = first_index,
            second = second_index,
            matches = matches.len(),
            "Matched overlap regions"
        );

        if matches.is_empty() {
            return Err(AlignmentError::NoMatches {
                first: first_index,
                second: second_index,
            }
            .into());
        }
        if matches.len() < AFFINE_SAMPLE_SIZE {
            return Err(AlignmentError::TooFewMatches {
                first: first_index,
                second: second_index,
                count: matches.len(),
            }
            .into());
        }

        let offset1 = DVec2::new(roi1.x_min as f64, roi1.y_min as f64);
        let offset2 = DVec2::new(roi2.x_min as f64, roi2.y_min as f64);
        let (to, from): (Vec<DVec2>, Vec<DVec2>) = matches
            .iter()
            .map(|m| (m.a + offset1, m.b + offset2))
            .unzip();

        let fit = self
            .ransac
            .fit(&from, &to)
            .ok_or(AlignmentError::RansacFailed {
                first: first_index,
                second: second_index,
                matches: matches.len(),
            })?;

        debug!(
            inliers = fit.inliers.len(),
            required = fit.required_inliers,
            "RANSAC fit"
        );
        info!(
            first = first_index,
            second = second_index,
            transform = %fit.transform,
            "Fitted pair transform"
        );

        Ok(fit.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::matching::PointMatch;
    use crate::ransac::RansacConfig;
    use crate::testing::{BlockSearchMatcher, FixedMatcher, init_tracing, memory_image, noise_ground};
    use common::Buffer2;

    fn seeded_ransac() -> RansacEstimator {
        RansacEstimator::new(RansacConfig {
            seed: Some(42),
            ..Default::default()
        })
    }

    fn blank(width: usize, height: usize) -> SourceImage {
        memory_image(Buffer2::new_filled(width, height, 1.0), "blank.tif", None)
    }

    #[test]
    fn test_overlap_regions_trailing_and_leading() {
        let (roi1, roi2) = overlap_regions(&blank(100, 50), &blank(80, 60), 20);
        assert_eq!(roi1, Rect::new(80, 0, 100, 50));
        assert_eq!(roi2, Rect::new(0, 0, 20, 60));
    }

    #[test]
    fn test_overlap_regions_clamped_to_width() {
        let (roi1, roi2) = overlap_regions(&blank(10, 5), &blank(15, 5), 2000);
        assert_eq!(roi1, Rect::new(0, 0, 10, 5));
        assert_eq!(roi2, Rect::new(0, 0, 15, 5));
    }

    #[test]
    fn test_recovers_translation() {
        init_tracing();
        let ground = noise_ground(190, 100, 7);
        let first = memory_image(ground.crop(0, 0, 100, 100), "a.tif", None);
        let second = memory_image(ground.crop(90, 0, 100, 100), "b.tif", None);

        let matcher = BlockSearchMatcher::default();
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let transform = aligner.align(0, &first, &second).unwrap();

        let expected = AffineTransform::translation(90.0, 0.0);
        assert!(
            transform.max_abs_diff(&expected) < 1e-6,
            "got {transform}"
        );
    }

    #[test]
    fn test_region_offsets_are_applied() {
        let matches = vec![
            PointMatch::new(DVec2::new(2.0, 3.0), DVec2::new(2.0, 3.0)),
            PointMatch::new(DVec2::new(15.0, 4.0), DVec2::new(15.0, 4.0)),
            PointMatch::new(DVec2::new(6.0, 40.0), DVec2::new(6.0, 40.0)),
            PointMatch::new(DVec2::new(11.0, 22.0), DVec2::new(11.0, 22.0)),
        ];
        let matcher = FixedMatcher(matches);
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let transform = aligner.align(3, &blank(100, 50), &blank(100, 50)).unwrap();
        assert!(transform.max_abs_diff(&AffineTransform::translation(80.0, 0.0)) < 1e-9);
    }

    #[test]
    fn test_zero_matches_is_fatal() {
        let matcher = FixedMatcher::default();
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let err = aligner.align(2, &blank(50, 50), &blank(50, 50)).unwrap_err();
        assert!(matches!(
            err,
            Error::Alignment(AlignmentError::NoMatches {
                first: 2,
                second: 3
            })
        ));
    }

    #[test]
    fn test_two_matches_are_too_few() {
        let matcher = FixedMatcher(vec![
            PointMatch::new(DVec2::new(1.0, 1.0), DVec2::new(1.0, 1.0)),
            PointMatch::new(DVec2::new(5.0, 9.0), DVec2::new(5.0, 9.0)),
        ]);
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let err = aligner.align(0, &blank(50, 50), &blank(50, 50)).unwrap_err();
        assert!(matches!(
            err,
            Error::Alignment(AlignmentError::TooFewMatches { count: 2, .. })
        ));
    }

    #[test]
    fn test_degenerate_matches_fail_ransac() {
        let collinear = (0..6)
            .map(|i| {
                let p = DVec2::new(i as f64, 2.0 * i as f64);
                PointMatch::new(p, p)
            })
            .collect();
        let matcher = FixedMatcher(collinear);
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let err = aligner.align(0, &blank(50, 50), &blank(50, 50)).unwrap_err();
        assert!(matches!(
            err,
            Error::Alignment(AlignmentError::RansacFailed { matches: 6, .. })
        ));
    }

    #[test]
    fn test_empty_image_has_empty_region() {
        let matcher = FixedMatcher::default();
        let aligner = PairwiseAligner::new(&matcher, seeded_ransac(), 20);
        let err = aligner.align(0, &blank(50, 50), &blank(50, 0)).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigError::EmptyOverlapRegion { index: 1 })
        ));
    }
}

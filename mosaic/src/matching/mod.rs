//! Point correspondences between two overlapping image regions.

mod patch;

pub use patch::{PatchMatcher, PatchMatcherConfig};

use common::Buffer2;
use glam::DVec2;

/// A pair of corresponding points, each in its own region's local pixel
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    pub a: DVec2,
    pub b: DVec2,
}

impl PointMatch {
    pub fn new(a: DVec2, b: DVec2) -> Self {
        Self { a, b }
    }
}

/// Finds correspondences between two regions.
///
/// Invalid samples arrive as NaN and must not produce matches.
pub trait FeatureMatcher: Send + Sync {
    fn find_matches(&self, a: &Buffer2<f32>, b: &Buffer2<f32>) -> Vec<PointMatch>;
}

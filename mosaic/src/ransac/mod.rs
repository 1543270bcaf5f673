//! RANSAC (Random Sample Consensus) affine fitting.
//!
//! Fits an affine transform to point correspondences that may contain gross
//! mismatches:
//! 1. Randomly sample minimal point sets
//! 2. Fit a candidate affine transform to each sample
//! 3. Count correspondences within the inlier threshold
//! 4. Keep the best candidate meeting the required inlier count
//! 5. Refine with least squares on its inliers
//!
//! When no candidate reaches the required count, the requirement is relaxed
//! and the search repeats until the minimal sample size is reached.


use glam::DVec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transform::AffineTransform;

/// Correspondences needed to determine an affine transform.
pub const AFFINE_SAMPLE_SIZE: usize = 3;

/// Divisor applied to the required inlier count on each relaxation step.
const RELAX_FACTOR: f64 = 1.5;

/// RANSAC configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Candidate models drawn per search round.
    pub iterations: usize,
    /// Inlier distance threshold in pixels.
    pub inlier_threshold: f64,
    /// Fraction of all correspondences that must agree with a model initially.
    pub min_inlier_fraction: f64,
    /// Lower the required inlier count when no model satisfies it.
    pub relax_min_inliers: bool,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            inlier_threshold: 10.0,
            min_inlier_fraction: 0.5,
            relax_min_inliers: true,
            seed: None,
        }
    }
}

/// Result of a successful fit.
#[derive(Debug, Clone)]
pub struct RansacFit {
    /// Refined transform mapping `from` points onto `to` points.
    pub transform: AffineTransform,
    /// Indices of correspondences consistent with `transform`.
    pub inliers: Vec<usize>,
    /// Inlier count the accepted model had to reach.
    pub required_inliers: usize,
}

/// RANSAC estimator for robust affine fitting.
pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Fits `to ≈ T(from)`.
    ///
    /// Returns `None` if there are fewer than [`AFFINE_SAMPLE_SIZE`]
    /// correspondences or no model is found even at the minimal requirement.
    pub fn fit(&self, from: &[DVec2], to: &[DVec2]) -> Option<RansacFit> {
        assert_eq!(from.len(), to.len(), "correspondence lists differ in length");
        let n = from.len();
        if n < AFFINE_SAMPLE_SIZE {
            return None;
        }

        let mut rng: ChaCha8Rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };

        let mut required =
            ((n as f64 * self.config.min_inlier_fraction) as usize).max(AFFINE_SAMPLE_SIZE);

        loop {
            if let Some(fit) = self.search(&mut rng, from, to, required) {
                debug!(
                    inliers = fit.inliers.len(),
                    total = n,
                    required,
                    "RANSAC accepted model"
                );
                return Some(fit);
            }

            if !self.config.relax_min_inliers || required <= AFFINE_SAMPLE_SIZE {
                return None;
            }

            let relaxed = ((required as f64 / RELAX_FACTOR) as usize).max(AFFINE_SAMPLE_SIZE);
            warn!(
                from = required,
                to = relaxed,
                "No RANSAC model reached the inlier minimum, relaxing"
            );
            required = relaxed;
        }
    }

    /// One search round: best candidate with at least `required` inliers.
    fn search(
        &self,
        rng: &mut ChaCha8Rng,
        from: &[DVec2],
        to: &[DVec2],
        required: usize,
    ) -> Option<RansacFit> {
        let n = from.len();
        let threshold = self.config.inlier_threshold;

        let mut sample_indices: Vec<usize> = Vec::with_capacity(AFFINE_SAMPLE_SIZE);
        let mut sample_from: Vec<DVec2> = Vec::with_capacity(AFFINE_SAMPLE_SIZE);
        let mut sample_to: Vec<DVec2> = Vec::with_capacity(AFFINE_SAMPLE_SIZE);

        let mut best: Option<(AffineTransform, Vec<usize>)> = None;

        for _ in 0..self.config.iterations {
            random_sample_into(rng, n, AFFINE_SAMPLE_SIZE, &mut sample_indices);

            sample_from.clear();
            sample_to.clear();
            for &i in &sample_indices {
                sample_from.push(from[i]);
                sample_to.push(to[i]);
            }

            let Some(candidate) = estimate_affine(&sample_from, &sample_to) else {
                continue;
            };

            let inliers = count_inliers(from, to, &candidate, threshold);
            let best_count = best.as_ref().map_or(0, |(_, b)| b.len());
            if inliers.len() >= required && inliers.len() > best_count {
                best = Some((candidate, inliers));
            }
        }

        let (candidate, inliers) = best?;

        // Final refinement with least squares on all inliers
        let inlier_from: Vec<DVec2> = inliers.iter().map(|&i| from[i]).collect();
        let inlier_to: Vec<DVec2> = inliers.iter().map(|&i| to[i]).collect();

        let (transform, inliers) = match estimate_affine(&inlier_from, &inlier_to) {
            Some(refined) => {
                let refined_inliers = count_inliers(from, to, &refined, threshold);
                if refined_inliers.len() >= inliers.len() {
                    (refined, refined_inliers)
                } else {
                    (candidate, inliers)
                }
            }
            None => (candidate, inliers),
        };

        Some(RansacFit {
            transform,
            inliers,
            required_inliers: required,
        })
    }
}

/// Draws `k` distinct indices from `0..n` into `buffer`.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm for sampling without replacement
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}

/// Indices `i` with `|T(from[i]) - to[i]| < threshold`.
fn count_inliers(
    from: &[DVec2],
    to: &[DVec2],
    transform: &AffineTransform,
    threshold: f64,
) -> Vec<usize> {
    from.iter()
        .zip(to)
        .enumerate()
        .filter(|(_, (f, t))| transform.apply(**f).distance(**t) < threshold)
        .map(|(i, _)| i)
        .collect()
}

pub(crate) fn centroid(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    points.iter().copied().sum::<DVec2>() / points.len() as f64
}

/// Least-squares affine fit through the normal equations.
///
/// Both point sets are shifted to their centroids first so that large pixel
/// coordinates do not swamp the 3x3 system.
pub(crate) fn estimate_affine(from: &[DVec2], to: &[DVec2]) -> Option<AffineTransform> {
    if from.len() < AFFINE_SAMPLE_SIZE || from.len() != to.len() {
        return None;
    }

    let from_center = centroid(from);
    let to_center = centroid(to);

    // Solve: to = A * from + b, one 3x3 system per output coordinate
    //   [sum_xx  sum_xy  sum_x ] [a]   [sum_x_tx]
    //   [sum_xy  sum_yy  sum_y ] [b] = [sum_y_tx]
    //   [sum_x   sum_y   n     ] [e]   [sum_tx  ]
    let n = from.len() as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_tx = 0.0;
    let mut sum_ty = 0.0;
    let mut sum_x_tx = 0.0;
    let mut sum_y_tx = 0.0;
    let mut sum_x_ty = 0.0;
    let mut sum_y_ty = 0.0;

    for (f, t) in from.iter().zip(to) {
        let r = *f - from_center;
        let t = *t - to_center;
        sum_x += r.x;
        sum_y += r.y;
        sum_xx += r.x * r.x;
        sum_xy += r.x * r.y;
        sum_yy += r.y * r.y;
        sum_tx += t.x;
        sum_ty += t.y;
        sum_x_tx += r.x * t.x;
        sum_y_tx += r.y * t.x;
        sum_x_ty += r.x * t.y;
        sum_y_ty += r.y * t.y;
    }

    let det = sum_xx * (sum_yy * n - sum_y * sum_y) - sum_xy * (sum_xy * n - sum_y * sum_x)
        + sum_x * (sum_xy * sum_y - sum_yy * sum_x);

    if det.abs() < 1e-10 {
        return None;
    }

    let inv_det = 1.0 / det;

    let m00 = (sum_yy * n - sum_y * sum_y) * inv_det;
    let m01 = (sum_x * sum_y - sum_xy * n) * inv_det;
    let m02 = (sum_xy * sum_y - sum_yy * sum_x) * inv_det;
    let m10 = (sum_y * sum_x - sum_xy * n) * inv_det;
    let m11 = (sum_xx * n - sum_x * sum_x) * inv_det;
    let m12 = (sum_xy * sum_x - sum_xx * sum_y) * inv_det;
    let m20 = (sum_xy * sum_y - sum_x * sum_yy) * inv_det;
    let m21 = (sum_xy * sum_x - sum_y * sum_xx) * inv_det;
    let m22 = (sum_xx * sum_yy - sum_xy * sum_xy) * inv_det;

    let a = m00 * sum_x_tx + m01 * sum_y_tx + m02 * sum_tx;
    let b = m10 * sum_x_tx + m11 * sum_y_tx + m12 * sum_tx;
    let e = m20 * sum_x_tx + m21 * sum_y_tx + m22 * sum_tx;

    let c = m00 * sum_x_ty + m01 * sum_y_ty + m02 * sum_ty;
    let d = m10 * sum_x_ty + m11 * sum_y_ty + m12 * sum_ty;
    let f = m20 * sum_x_ty + m21 * sum_y_ty + m22 * sum_ty;

    // undo the centroid shift: to = A (from - fc) + [e, f] + tc
    let centered = AffineTransform::from_params([a, b, e, c, d, f]);
    let shift_in = AffineTransform::translation(-from_center.x, -from_center.y);
    let shift_out = AffineTransform::translation(to_center.x, to_center.y);
    let transform = shift_out.compose(&centered).compose(&shift_in);

    if transform.is_finite() && transform.determinant().abs() > 1e-12 {
        Some(transform)
    } else {
        None
    }
}

//! Corner detection and normalized patch matching.

use common::Buffer2;
use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FeatureMatcher, PointMatch};

/// Configuration for [`PatchMatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchMatcherConfig {
    /// Maximum corners kept per region.
    pub max_features: usize,
    /// Corners scoring below this fraction of the strongest response are dropped.
    pub quality_level: f64,
    /// Largest descriptor patch radius; patches are `2r + 1` pixels square.
    /// Narrow regions use a smaller radius, see [`PatchMatcher::patch_radius_for`].
    pub patch_radius: usize,
    /// Minimum normalized correlation for a match.
    pub min_correlation: f64,
    /// Lowe ratio between best and second-best descriptor distance.
    pub ratio_threshold: f64,
    /// Keep only mutual best matches.
    pub cross_check: bool,
}

impl Default for PatchMatcherConfig {
    fn default() -> Self {
        Self {
            max_features: 4000,
            quality_level: 0.01,
            patch_radius: 7,
            min_correlation: 0.8,
            ratio_threshold: 0.8,
            cross_check: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    x: usize,
    y: usize,
    score: f64,
}

/// Zero-mean, unit-norm patch around a corner.
#[derive(Debug, Clone)]
struct Descriptor {
    x: usize,
    y: usize,
    values: Vec<f64>,
}

/// Best and second-best correlation of one descriptor against a set.
#[derive(Debug, Clone, Copy)]
struct BestPair {
    index: usize,
    best: f64,
    second: Option<f64>,
}

/// Default matcher: Shi-Tomasi corners described by normalized patches.
#[derive(Debug, Clone, Default)]
pub struct PatchMatcher {
    config: PatchMatcherConfig,
}

impl PatchMatcher {
    pub fn new(config: PatchMatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatchMatcherConfig {
        &self.config
    }

    /// Patch radius used for regions whose smaller side is `min_side`: the
    /// configured radius, capped at a sixth of that side but never below 2.
    pub fn patch_radius_for(&self, min_side: usize) -> usize {
        self.config.patch_radius.min((min_side / 6).max(2))
    }

    fn detect(&self, image: &Buffer2<f32>, radius: usize) -> Vec<Corner> {
        let (width, height) = (image.width(), image.height());
        let margin = radius.max(2);
        if width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }

        let at = |x: usize, y: usize| image[(x, y)] as f64;

        let rows: Vec<Vec<f64>> = (0..height)
            .into_par_iter()
            .map(|y| {
                let mut row = vec![0.0; width];
                if y < margin || y >= height - margin {
                    return row;
                }
                for x in margin..width - margin {
                    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
                    for wy in y - 1..=y + 1 {
                        for wx in x - 1..=x + 1 {
                            let gx = at(wx + 1, wy) - at(wx - 1, wy);
                            let gy = at(wx, wy + 1) - at(wx, wy - 1);
                            sxx += gx * gx;
                            syy += gy * gy;
                            sxy += gx * gy;
                        }
                    }
                    let trace = sxx + syy;
                    let term = ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt();
                    let lambda_min = (trace - term) * 0.5;
                    // NaN windows fail this comparison
                    if lambda_min > 0.0 {
                        row[x] = lambda_min;
                    }
                }
                row
            })
            .collect();
        let scores = Buffer2::new(width, height, rows.concat());

        let max_score = scores.iter().copied().fold(0.0, f64::max);
        if max_score <= 0.0 {
            return Vec::new();
        }
        let threshold = max_score * self.config.quality_level;

        let mut corners = Vec::new();
        for y in margin..height - margin {
            for x in margin..width - margin {
                let score = scores[(x, y)];
                if score <= 0.0 || score < threshold {
                    continue;
                }
                if is_local_max(&scores, x, y) {
                    corners.push(Corner { x, y, score });
                }
            }
        }

        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(self.config.max_features);
        corners
    }

    fn describe(&self, image: &Buffer2<f32>, corners: &[Corner], radius: usize) -> Vec<Descriptor> {
        let r = radius;
        corners
            .iter()
            .filter_map(|c| {
                let mut values = Vec::with_capacity((2 * r + 1) * (2 * r + 1));
                for y in c.y - r..=c.y + r {
                    for x in c.x - r..=c.x + r {
                        let v = image[(x, y)];
                        if v.is_nan() {
                            return None;
                        }
                        values.push(v as f64);
                    }
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                values.iter_mut().for_each(|v| *v -= mean);
                let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm < 1e-9 {
                    return None;
                }
                values.iter_mut().for_each(|v| *v /= norm);
                Some(Descriptor {
                    x: c.x,
                    y: c.y,
                    values,
                })
            })
            .collect()
    }

    fn passes_ratio(&self, pair: &BestPair) -> bool {
        if pair.best < self.config.min_correlation {
            return false;
        }
        let Some(second) = pair.second else {
            return true;
        };
        let best_dist = correlation_distance(pair.best);
        let second_dist = correlation_distance(second);
        if second_dist <= 0.0 {
            return false;
        }
        best_dist <= self.config.ratio_threshold * second_dist
    }
}

/// Euclidean distance between unit vectors with correlation `c`.
#[inline]
fn correlation_distance(c: f64) -> f64 {
    (2.0 - 2.0 * c).max(0.0).sqrt()
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Ties are broken towards the first pixel in raster order.
fn is_local_max(scores: &Buffer2<f64>, x: usize, y: usize) -> bool {
    let score = scores[(x, y)];
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            if (nx, ny) == (x, y) {
                continue;
            }
            let other = scores[(nx, ny)];
            let earlier = (ny, nx) < (y, x);
            if other > score || (earlier && other == score) {
                return false;
            }
        }
    }
    true
}

fn best_pair(query: &Descriptor, train: &[Descriptor]) -> Option<BestPair> {
    let mut result: Option<BestPair> = None;
    for (index, t) in train.iter().enumerate() {
        let c = dot(&query.values, &t.values);
        result = Some(match result {
            None => BestPair {
                index,
                best: c,
                second: None,
            },
            Some(p) if c > p.best => BestPair {
                index,
                best: c,
                second: Some(p.best),
            },
            Some(p) => BestPair {
                second: Some(p.second.map_or(c, |s| s.max(c))),
                ..p
            },
        });
    }
    result
}

impl FeatureMatcher for PatchMatcher {
    fn find_matches(&self, a: &Buffer2<f32>, b: &Buffer2<f32>) -> Vec<PointMatch> {
        let min_side = a.width().min(a.height()).min(b.width()).min(b.height());
        let radius = self.patch_radius_for(min_side);
        if radius < self.config.patch_radius {
            debug!(
                radius,
                configured = self.config.patch_radius,
                "Shrinking patch radius for narrow region"
            );
        }

        let desc_a = self.describe(a, &self.detect(a, radius), radius);
        let desc_b = self.describe(b, &self.detect(b, radius), radius);
        if desc_a.is_empty() || desc_b.is_empty() {
            debug!(
                corners_a = desc_a.len(),
                corners_b = desc_b.len(),
                "No descriptors to match"
            );
            return Vec::new();
        }

        let reverse: Vec<Option<usize>> = if self.config.cross_check {
            desc_b
                .par_iter()
                .map(|d| best_pair(d, &desc_a).map(|p| p.index))
                .collect()
        } else {
            Vec::new()
        };

        let matches: Vec<PointMatch> = desc_a
            .par_iter()
            .enumerate()
            .filter_map(|(query_idx, q)| {
                let pair = best_pair(q, &desc_b)?;
                if !self.passes_ratio(&pair) {
                    return None;
                }
                if self.config.cross_check && reverse[pair.index] != Some(query_idx) {
                    return None;
                }
                let t = &desc_b[pair.index];
                Some(PointMatch::new(
                    DVec2::new(q.x as f64, q.y as f64),
                    DVec2::new(t.x as f64, t.y as f64),
                ))
            })
            .collect();

        debug!(
            descriptors_a = desc_a.len(),
            descriptors_b = desc_b.len(),
            matches = matches.len(),
            "Patch matching done"
        );
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::noise_ground;

    fn small_patches() -> PatchMatcher {
        PatchMatcher::new(PatchMatcherConfig {
            patch_radius: 3,
            ..Default::default()
        })
    }

    #[test]
    fn test_matches_follow_shift() {
        let ground = noise_ground(100, 60, 11);
        let a = ground.crop(0, 0, 70, 60);
        let b = ground.crop(30, 0, 70, 60);

        let matches = small_patches().find_matches(&a, &b);
        assert!(matches.len() >= 10, "only {} matches", matches.len());
        for m in &matches {
            assert_eq!(m.a.x - m.b.x, 30.0, "bad match {m:?}");
            assert_eq!(m.a.y, m.b.y, "bad match {m:?}");
        }
    }

    #[test]
    fn test_flat_images_have_no_matches() {
        let flat = Buffer2::new_filled(40, 40, 5.0f32);
        assert!(small_patches().find_matches(&flat, &flat).is_empty());
    }

    #[test]
    fn test_nan_region_yields_no_corners() {
        let matcher = small_patches();
        let mut image = noise_ground(40, 40, 3);
        for y in 0..40 {
            for x in 0..20 {
                image[(x, y)] = f32::NAN;
            }
        }
        let corners = matcher.detect(&image, 3);
        assert!(!corners.is_empty());
        let descriptors = matcher.describe(&image, &corners, 3);
        assert!(descriptors.iter().all(|d| d.x >= 20 + 3));
    }

    #[test]
    fn test_max_features_caps_corners() {
        let matcher = PatchMatcher::new(PatchMatcherConfig {
            patch_radius: 3,
            max_features: 5,
            ..Default::default()
        });
        let corners = matcher.detect(&noise_ground(50, 50, 8), 3);
        assert_eq!(corners.len(), 5);
        assert!(corners.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_tiny_region_is_ignored() {
        let image = noise_ground(6, 6, 1);
        assert!(small_patches().detect(&image, 3).is_empty());
    }

    #[test]
    fn test_patch_radius_shrinks_for_narrow_regions() {
        let matcher = PatchMatcher::default();
        assert_eq!(matcher.patch_radius_for(2000), 7);
        assert_eq!(matcher.patch_radius_for(20), 3);
        assert_eq!(matcher.patch_radius_for(5), 2);
    }

    #[test]
    fn test_default_matches_narrow_overlap() {
        // 20-column regions sharing only 10 columns
        let ground = noise_ground(30, 100, 33);
        let a = ground.crop(0, 0, 20, 100);
        let b = ground.crop(10, 0, 20, 100);

        let matches = PatchMatcher::default().find_matches(&a, &b);
        assert!(matches.len() >= 3, "only {} matches", matches.len());
        for m in &matches {
            assert_eq!(m.a - m.b, DVec2::new(10.0, 0.0), "bad match {m:?}");
        }
    }

    #[test]
    fn test_ratio_rejects_ambiguous_match() {
        let matcher = small_patches();
        let ambiguous = BestPair {
            index: 0,
            best: 0.95,
            second: Some(0.94),
        };
        assert!(!matcher.passes_ratio(&ambiguous));
        let distinct = BestPair {
            index: 0,
            best: 1.0,
            second: Some(0.2),
        };
        assert!(matcher.passes_ratio(&distinct));
        let weak = BestPair {
            index: 0,
            best: 0.5,
            second: None,
        };
        assert!(!matcher.passes_ratio(&weak));
    }
}

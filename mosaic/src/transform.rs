//! 2-D affine transform between pixel frames.

use std::fmt;

use glam::{DAffine2, DMat2, DVec2};
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Determinant magnitude below which a transform is treated as singular.
const SINGULAR_DET: f64 = 1e-12;

/// Affine map `p -> M * p + t`.
///
/// Parameter order follows the row-major homogeneous matrix:
/// ```text
/// | a  b  e |
/// | c  d  f |
/// | 0  0  1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    inner: DAffine2,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        inner: DAffine2::IDENTITY,
    };

    pub fn new(linear: DMat2, translation: DVec2) -> Self {
        Self {
            inner: DAffine2::from_mat2_translation(linear, translation),
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            inner: DAffine2::from_translation(DVec2::new(dx, dy)),
        }
    }

    /// Builds from `[a, b, e, c, d, f]`: `x' = a*x + b*y + e`, `y' = c*x + d*y + f`.
    pub fn from_params([a, b, e, c, d, f]: [f64; 6]) -> Self {
        // glam stores columns
        let linear = DMat2::from_cols(DVec2::new(a, c), DVec2::new(b, d));
        Self::new(linear, DVec2::new(e, f))
    }

    #[inline]
    pub fn params(&self) -> [f64; 6] {
        let m = self.inner.matrix2;
        let t = self.inner.translation;
        [m.x_axis.x, m.y_axis.x, t.x, m.x_axis.y, m.y_axis.y, t.y]
    }

    #[inline]
    pub fn linear(&self) -> DMat2 {
        self.inner.matrix2
    }

    #[inline]
    pub fn offset(&self) -> DVec2 {
        self.inner.translation
    }

    /// Full 3x3 homogeneous matrix, row-major.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        let [a, b, e, c, d, f] = self.params();
        [[a, b, e], [c, d, f], [0.0, 0.0, 1.0]]
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        self.inner.transform_point2(p)
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        self.inner.matrix2.determinant()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.inner.is_finite()
    }

    /// `self ∘ other`: the result applies `other` first, then `self`.
    #[inline]
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        Self {
            inner: self.inner * other.inner,
        }
    }

    /// Returns `None` for singular or non-finite transforms.
    pub fn inverse(&self) -> Option<AffineTransform> {
        if !self.is_finite() || self.determinant().abs() < SINGULAR_DET {
            return None;
        }
        Some(Self {
            inner: self.inner.inverse(),
        })
    }

    /// Integer box covering the image of `rect` under this transform.
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        let corners = rect.corners().map(|c| self.apply(c));
        Rect::covering(&corners)
    }

    /// Largest absolute difference between corresponding parameters.
    pub fn max_abs_diff(&self, other: &AffineTransform) -> f64 {
        self.params()
            .iter()
            .zip(other.params())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, e, c, d, ty] = self.params();
        write!(
            f,
            "Affine([{:.6}, {:.6}; {:.6}, {:.6}], t=({:.3}, {:.3}))",
            a, b, c, d, e, ty
        )
    }
}

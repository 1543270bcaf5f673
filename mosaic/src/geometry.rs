//! Integer rectangles in pixel space.

use std::fmt;

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Values within this distance of an integer are treated as that integer when
/// rounding continuous coordinates onto the pixel grid.
pub(crate) const GRID_SNAP: f64 = 1e-6;

/// Rounds `v` to the nearest integer if it is within [`GRID_SNAP`] of one.
#[inline]
pub(crate) fn snap_to_grid(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < GRID_SNAP { r } else { v }
}

/// Axis-aligned rectangle with half-open bounds.
///
/// A pixel at `(x, y)` is inside if `x_min <= x < x_max` and
/// `y_min <= y < y_max`. Coordinates are signed because canvas boxes may
/// extend above or left of the first image's origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl Rect {
    #[inline]
    pub const fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Rectangle anchored at the origin.
    #[inline]
    pub const fn from_size(width: usize, height: usize) -> Self {
        Self::new(0, 0, width as i64, height as i64)
    }

    /// Rectangle with top-left corner `(x, y)` and the given size.
    #[inline]
    pub const fn from_origin_size(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self::new(x, y, x + width as i64, y + height as i64)
    }

    /// Smallest integer rectangle covering every point.
    ///
    /// Returns an empty rectangle for an empty slice.
    pub fn covering(points: &[DVec2]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        let (mut lo, mut hi) = (*first, *first);
        for p in &points[1..] {
            lo = lo.min(*p);
            hi = hi.max(*p);
        }
        Self::new(
            snap_to_grid(lo.x).floor() as i64,
            snap_to_grid(lo.y).floor() as i64,
            snap_to_grid(hi.x).ceil() as i64,
            snap_to_grid(hi.y).ceil() as i64,
        )
    }

    #[inline]
    pub const fn width(&self) -> usize {
        if self.x_max > self.x_min {
            (self.x_max - self.x_min) as usize
        } else {
            0
        }
    }

    #[inline]
    pub const fn height(&self) -> usize {
        if self.y_max > self.y_min {
            (self.y_max - self.y_min) as usize
        } else {
            0
        }
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }

    #[inline]
    pub const fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
    }

    /// True if `other` lies entirely inside `self`.
    #[inline]
    pub const fn contains_rect(&self, other: &Rect) -> bool {
        other.x_min >= self.x_min
            && other.x_max <= self.x_max
            && other.y_min >= self.y_min
            && other.y_max <= self.y_max
    }

    #[inline]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Overlap of two rectangles, `None` when it has no area.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x_min.max(other.x_min),
            self.y_min.max(other.y_min),
            self.x_max.min(other.x_max),
            self.y_max.min(other.y_max),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    /// Smallest rectangle containing both. Empty operands are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::new(
            self.x_min.min(other.x_min),
            self.y_min.min(other.y_min),
            self.x_max.max(other.x_max),
            self.y_max.max(other.y_max),
        )
    }

    /// Grows the rectangle by `amount` on every side.
    #[inline]
    pub const fn expand(&self, amount: i64) -> Rect {
        Rect::new(
            self.x_min - amount,
            self.y_min - amount,
            self.x_max + amount,
            self.y_max + amount,
        )
    }

    #[inline]
    pub const fn translate(&self, dx: i64, dy: i64) -> Rect {
        Rect::new(self.x_min + dx, self.y_min + dy, self.x_max + dx, self.y_max + dy)
    }

    /// The four corners as continuous points, in the order
    /// top-left, top-right, bottom-left, bottom-right.
    pub fn corners(&self) -> [DVec2; 4] {
        let (x0, y0) = (self.x_min as f64, self.y_min as f64);
        let (x1, y1) = (self.x_max as f64, self.y_max as f64);
        [
            DVec2::new(x0, y0),
            DVec2::new(x1, y0),
            DVec2::new(x0, y1),
            DVec2::new(x1, y1),
        ]
    }

    /// Splits the rectangle into a row-major grid of tiles of at most
    /// `tile_width x tile_height`.
    pub fn tiles(&self, tile_width: usize, tile_height: usize) -> Vec<Rect> {
        assert!(tile_width > 0 && tile_height > 0, "tile size must be > 0");
        let mut tiles = Vec::new();
        let mut y = self.y_min;
        while y < self.y_max {
            let y_end = (y + tile_height as i64).min(self.y_max);
            let mut x = self.x_min;
            while x < self.x_max {
                let x_end = (x + tile_width as i64).min(self.x_max);
                tiles.push(Rect::new(x, y, x_end, y_end));
                x = x_end;
            }
            y = y_end;
        }
        tiles
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) -> ({}, {}) [{}x{}]",
            self.x_min,
            self.y_min,
            self.x_max,
            self.y_max,
            self.width(),
            self.height()
        )
    }
}

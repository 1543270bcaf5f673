//! Centerline distance weighting.
//!
//! Each valid pixel is weighted by how far it sits from the ends of its row's
//! and its column's valid run. The row and column confidences are linear ramps
//! that peak at the run's midpoint and fall towards its ends; the pixel takes
//! the smaller of the two. Invalid pixels are classified as holes (inside both
//! the row and column runs) or border (outside the data footprint).

use common::Buffer2;

use crate::geometry::Rect;

/// Weights assigned to invalid pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightFieldConfig {
    /// Weight for an invalid pixel enclosed by valid data.
    pub hole_fill: f64,
    /// Weight for an invalid pixel outside the data footprint.
    pub border_fill: f64,
}

impl Default for WeightFieldConfig {
    fn default() -> Self {
        Self {
            hole_fill: 0.0,
            border_fill: -1.0,
        }
    }
}

/// Valid extent of a single row or column.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    min: usize,
    max: usize,
}

impl Span {
    #[inline]
    fn include(span: &mut Option<Span>, pos: usize) {
        match span {
            Some(s) => {
                s.min = s.min.min(pos);
                s.max = s.max.max(pos);
            }
            None => *span = Some(Span { min: pos, max: pos }),
        }
    }

    fn merge(span: &mut Option<Span>, other: Option<Span>) {
        if let Some(o) = other {
            Span::include(span, o.min);
            Span::include(span, o.max);
        }
    }

    #[inline]
    fn contains(&self, pos: usize) -> bool {
        pos >= self.min && pos <= self.max
    }

    /// Linear confidence in `(0, 1]` for a position inside the span.
    ///
    /// The half-width counts pixels rather than pixel distances so that the
    /// outermost pixels keep a small positive weight.
    #[inline]
    fn confidence(&self, pos: usize) -> f64 {
        let center = (self.min + self.max) as f64 / 2.0;
        let half_width = (self.max - self.min + 1) as f64 / 2.0;
        ((half_width - (pos as f64 - center).abs()) / half_width).clamp(0.0, 1.0)
    }
}

/// Valid runs of every row and column of a mask.
///
/// Runs can be gathered piecewise with [`include`](Self::include) and
/// [`merge`](Self::merge), then queried for any region of the mask.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterlineSpans {
    rows: Vec<Option<Span>>,
    cols: Vec<Option<Span>>,
}

impl CenterlineSpans {
    /// Spans of an all-invalid `width` x `height` mask.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            rows: vec![None; height],
            cols: vec![None; width],
        }
    }

    pub fn from_mask(mask: &Buffer2<bool>) -> Self {
        let mut spans = Self::new(mask.width(), mask.height());
        spans.include(mask, 0, 0);
        spans
    }

    pub fn width(&self) -> usize {
        self.cols.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Adds the valid pixels of `part`, whose top-left pixel is `(x0, y0)`.
    pub fn include(&mut self, part: &Buffer2<bool>, x0: usize, y0: usize) {
        assert!(
            x0 + part.width() <= self.width() && y0 + part.height() <= self.height(),
            "part at ({x0}, {y0}) outside {}x{} spans",
            self.width(),
            self.height()
        );
        for (y, row) in part.rows().enumerate() {
            for (x, _) in row.iter().enumerate().filter(|(_, valid)| **valid) {
                Span::include(&mut self.rows[y0 + y], x0 + x);
                Span::include(&mut self.cols[x0 + x], y0 + y);
            }
        }
    }

    pub fn merge(&mut self, other: &CenterlineSpans) {
        assert_eq!(
            (self.width(), self.height()),
            (other.width(), other.height()),
            "merged spans differ in size"
        );
        for (span, other) in self.rows.iter_mut().zip(&other.rows) {
            Span::merge(span, *other);
        }
        for (span, other) in self.cols.iter_mut().zip(&other.cols) {
            Span::merge(span, *other);
        }
    }

    /// Weight field over `roi`. `valid(x, y)` reports the mask at a pixel of
    /// `roi`, in the same coordinates as the spans.
    pub fn weights(
        &self,
        roi: Rect,
        valid: impl Fn(usize, usize) -> bool,
        config: &WeightFieldConfig,
    ) -> Buffer2<f64> {
        assert!(
            Rect::from_size(self.width(), self.height()).contains_rect(&roi),
            "weight roi {} outside {}x{} mask",
            roi,
            self.width(),
            self.height()
        );

        let x0 = roi.x_min as usize;
        let y0 = roi.y_min as usize;
        Buffer2::from_fn(roi.width(), roi.height(), |rx, ry| {
            let (x, y) = (x0 + rx, y0 + ry);
            let row_span = self.rows[y];
            let col_span = self.cols[x];

            if valid(x, y) {
                // a valid pixel always lies inside its own row and column runs
                match (row_span, col_span) {
                    (Some(r), Some(c)) => r.confidence(x).min(c.confidence(y)),
                    _ => 0.0,
                }
            } else {
                let inner_row = col_span.is_some_and(|c| c.contains(y));
                let inner_col = row_span.is_some_and(|r| r.contains(x));
                if inner_row && inner_col {
                    config.hole_fill
                } else {
                    config.border_fill
                }
            }
        })
    }
}

/// Computes the blend weight field of `mask` (true = valid).
///
/// Row and column runs are measured over the whole mask; the returned grid
/// covers `roi` (the whole mask when `None`). `roi` must lie inside the mask.
pub fn centerline_weights(
    mask: &Buffer2<bool>,
    roi: Option<Rect>,
    config: &WeightFieldConfig,
) -> Buffer2<f64> {
    let roi = roi.unwrap_or(Rect::from_size(mask.width(), mask.height()));
    CenterlineSpans::from_mask(mask).weights(roi, |x, y| mask[(x, y)], config)
}

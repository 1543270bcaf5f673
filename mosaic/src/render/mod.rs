//! Lazy tiled rendering of the mosaic canvas.
//!
//! Every tile is computed from scratch: for each image whose canvas box meets
//! the tile, the source region behind the tile is read, bilinearly resampled
//! onto the canvas grid and weighted by its centerline weight field.
//! Contributions are accumulated in `f64` and normalized by the total weight.
//!
//! The valid runs behind the weights are measured once per image, over its
//! whole canvas box, when the renderer is built. A pixel's weight therefore
//! does not depend on the tile containing it, and any tiling rendered in any
//! order or in parallel produces the same pixels.


use common::Buffer2;
use glam::DVec2;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::Result;
use crate::geometry::{Rect, snap_to_grid};
use crate::layout::{Layout, Placement};
use crate::raster::SourceImage;
use crate::transform::AffineTransform;
use crate::weights::{CenterlineSpans, WeightFieldConfig};

/// Canvas rows resampled at once while measuring an image's valid runs.
const SPAN_BAND_ROWS: usize = 256;

/// A raster that produces any requested region on demand.
pub trait RasterView: Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    /// Renders `region`, given in output pixel coordinates.
    fn render(&self, region: Rect) -> Result<Buffer2<f32>>;
}

/// One image's resampled samples and clamped weights over a canvas area.
#[derive(Debug, Clone)]
pub(crate) struct Contribution {
    /// Canvas area covered, in canvas coordinates.
    pub area: Rect,
    pub values: Buffer2<f32>,
    pub valid: Buffer2<bool>,
    pub weights: Buffer2<f64>,
    /// Ceiling applied to `weights`, `None` when the blend radius is zero.
    pub ceiling: Option<f64>,
}

/// Composites a [`Layout`] of source images.
///
/// Borrows the images and layout for its own lifetime only.
pub struct MosaicRenderer<'a> {
    images: &'a [SourceImage],
    layout: &'a Layout,
    blend_radius: usize,
    nodata: f64,
    /// Valid runs of each image's resampled mask over its canvas box.
    spans: Vec<CenterlineSpans>,
}

impl<'a> MosaicRenderer<'a> {
    /// Measures the valid runs of every placed image, reading each image once.
    ///
    /// # Panics
    ///
    /// Panics if `images` and `layout` differ in length.
    pub fn new(
        images: &'a [SourceImage],
        layout: &'a Layout,
        blend_radius: usize,
        nodata: f64,
    ) -> Result<Self> {
        assert_eq!(
            images.len(),
            layout.len(),
            "layout must place every image exactly once"
        );
        let spans = images
            .iter()
            .zip(layout.placements())
            .map(|(image, placement)| measure_spans(image, placement))
            .collect::<Result<Vec<_>>>()?;
        debug!(images = images.len(), "Measured valid runs");

        Ok(Self {
            images,
            layout,
            blend_radius,
            nodata,
            spans,
        })
    }

    pub fn nodata(&self) -> f64 {
        self.nodata
    }

    /// `blend_radius / (min(box width, box height) / 2 + blend_radius)` for
    /// the canvas box of image `index`, `None` when the blend radius is zero.
    pub(crate) fn ceiling(&self, index: usize) -> Option<f64> {
        let bbox = &self.layout.placements()[index].bbox;
        (self.blend_radius > 0).then(|| {
            let r = self.blend_radius as f64;
            r / (bbox.width().min(bbox.height()) as f64 / 2.0 + r)
        })
    }

    /// Resampled samples and weights of image `index` over the part of
    /// `canvas_region` it covers. `None` when it covers nothing.
    pub(crate) fn contribution(&self, index: usize, canvas_region: &Rect) -> Result<Option<Contribution>> {
        let image = &self.images[index];
        let placement = &self.layout.placements()[index];
        let bbox = placement.bbox;

        let Some(area) = bbox.intersection(canvas_region) else {
            return Ok(None);
        };
        let Some((values, valid)) = resample_area(image, placement, &area)? else {
            return Ok(None);
        };

        let local = area.translate(-bbox.x_min, -bbox.y_min);
        let (lx, ly) = (local.x_min as usize, local.y_min as usize);
        let mut weights = self.spans[index].weights(
            local,
            |x, y| valid[(x - lx, y - ly)],
            &WeightFieldConfig::default(),
        );

        let ceiling = self.ceiling(index);
        if let Some(ceiling) = ceiling {
            for w in weights.iter_mut() {
                *w = w.min(ceiling);
            }
        }

        Ok(Some(Contribution {
            area,
            values,
            valid,
            weights,
            ceiling,
        }))
    }
}

/// Valid runs of `image` resampled over its whole canvas box, gathered in
/// parallel bands of rows.
fn measure_spans(image: &SourceImage, placement: &Placement) -> Result<CenterlineSpans> {
    let bbox = placement.bbox;
    let (width, height) = (bbox.width(), bbox.height());
    let bands = bbox.tiles(width.max(1), SPAN_BAND_ROWS);

    let parts = bands
        .par_iter()
        .map(|band| -> Result<CenterlineSpans> {
            let mut part = CenterlineSpans::new(width, height);
            if let Some((_, mask)) = resample_area(image, placement, band)? {
                part.include(
                    &mask,
                    (band.x_min - bbox.x_min) as usize,
                    (band.y_min - bbox.y_min) as usize,
                );
            }
            Ok(part)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut spans = CenterlineSpans::new(width, height);
    for part in &parts {
        spans.merge(part);
    }
    trace!(image = %image.name().display(), %bbox, bands = parts.len(), "Measured valid runs");
    Ok(spans)
}

/// Reads the source samples behind canvas area `area` and resamples them.
/// `None` when `area` maps entirely outside the image.
fn resample_area(
    image: &SourceImage,
    placement: &Placement,
    area: &Rect,
) -> Result<Option<(Buffer2<f32>, Buffer2<bool>)>> {
    let Some(source_rect) = placement
        .inverse
        .transform_rect(area)
        .expand(1)
        .intersection(&image.extent())
    else {
        return Ok(None);
    };
    let source = image.read_region(source_rect)?;
    Ok(Some(resample(image, &source, source_rect, &placement.inverse, area)))
}

/// Bilinearly resamples `source` (the samples of `source_rect`) onto the
/// canvas pixels of `target`.
///
/// A resampled pixel is valid only if every source sample with non-zero
/// kernel weight exists and is valid; pixels mapping outside the source are
/// invalid.
fn resample(
    image: &SourceImage,
    source: &Buffer2<f32>,
    source_rect: Rect,
    inverse: &AffineTransform,
    target: &Rect,
) -> (Buffer2<f32>, Buffer2<bool>) {
    let (width, height) = (target.width(), target.height());
    let mut values = Buffer2::new_filled(width, height, 0.0f32);
    let mut mask = Buffer2::new_filled(width, height, false);
    let origin = DVec2::new(source_rect.x_min as f64, source_rect.y_min as f64);

    for ty in 0..height {
        for tx in 0..width {
            let canvas = DVec2::new(
                (target.x_min + tx as i64) as f64,
                (target.y_min + ty as i64) as f64,
            );
            let p = inverse.apply(canvas) - origin;
            let (sx, sy) = (snap_to_grid(p.x), snap_to_grid(p.y));
            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = (sx - x0, sy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);

            let taps = [
                (x0, y0, (1.0 - fx) * (1.0 - fy)),
                (x0 + 1, y0, fx * (1.0 - fy)),
                (x0, y0 + 1, (1.0 - fx) * fy),
                (x0 + 1, y0 + 1, fx * fy),
            ];

            let mut sum = 0.0f64;
            let mut valid = true;
            for (x, y, k) in taps {
                if k <= 0.0 {
                    continue;
                }
                match source.checked_get(x, y) {
                    Some(&v) if image.is_valid(v) => sum += k * v as f64,
                    _ => {
                        valid = false;
                        break;
                    }
                }
            }

            if valid {
                values[(tx, ty)] = sum as f32;
                mask[(tx, ty)] = true;
            }
        }
    }

    (values, mask)
}

impl RasterView for MosaicRenderer<'_> {
    fn width(&self) -> usize {
        self.layout.width()
    }

    fn height(&self) -> usize {
        self.layout.height()
    }

    fn render(&self, region: Rect) -> Result<Buffer2<f32>> {
        let canvas = self.layout.canvas();
        let canvas_region = region.translate(canvas.x_min, canvas.y_min);
        let (width, height) = (region.width(), region.height());

        let mut sum = Buffer2::new_filled(width, height, self.nodata);
        let mut total = Buffer2::new_filled(width, height, 0.0f64);
        let mut contributors = 0usize;

        for index in 0..self.images.len() {
            let Some(c) = self.contribution(index, &canvas_region)? else {
                continue;
            };
            contributors += 1;

            let dx = (c.area.x_min - canvas_region.x_min) as usize;
            let dy = (c.area.y_min - canvas_region.y_min) as usize;
            for y in 0..c.area.height() {
                for x in 0..c.area.width() {
                    let w = c.weights[(x, y)];
                    if !c.valid[(x, y)] || w <= 0.0 {
                        continue;
                    }
                    let value = c.values[(x, y)] as f64 * w;
                    let (tx, ty) = (dx + x, dy + y);
                    if total[(tx, ty)] == 0.0 {
                        sum[(tx, ty)] = value;
                        total[(tx, ty)] = w;
                    } else {
                        sum[(tx, ty)] += value;
                        total[(tx, ty)] += w;
                    }
                }
            }
        }

        trace!(%region, contributors, "Rendered tile");

        let pixels = sum
            .iter()
            .zip(total.iter())
            .map(|(&s, &w)| if w > 0.0 { (s / w) as f32 } else { self.nodata as f32 })
            .collect();
        Ok(Buffer2::new(width, height, pixels))
    }
}

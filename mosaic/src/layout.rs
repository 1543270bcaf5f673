//! Chaining pairwise transforms into canvas placements.

use tracing::{debug, info};

use crate::align::PairAligner;
use crate::error::{AlignmentError, ConfigError, Result};
use crate::geometry::Rect;
use crate::progress::{MosaicStage, ProgressObserver, report_progress};
use crate::raster::SourceImage;
use crate::transform::AffineTransform;

/// Where one image lands on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Source pixel frame to canvas frame.
    pub transform: AffineTransform,
    /// Canvas frame to source pixel frame.
    pub inverse: AffineTransform,
    /// Canvas box the image may contribute to.
    pub bbox: Rect,
}

/// Placements of all images plus the covering canvas, both in the frame of
/// the first image.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    placements: Vec<Placement>,
    canvas: Rect,
}

impl Layout {
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Canvas box; output pixel `(0, 0)` sits at its top-left corner.
    pub fn canvas(&self) -> Rect {
        self.canvas
    }

    pub fn width(&self) -> usize {
        self.canvas.width()
    }

    pub fn height(&self) -> usize {
        self.canvas.height()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn transforms(&self) -> Vec<AffineTransform> {
        self.placements.iter().map(|p| p.transform).collect()
    }
}

/// Walks the strip in order, aligning each image to its predecessor.
pub struct LayoutChainBuilder<'a> {
    aligner: &'a dyn PairAligner,
    progress: &'a dyn ProgressObserver,
}

impl<'a> LayoutChainBuilder<'a> {
    pub fn new(aligner: &'a dyn PairAligner, progress: &'a dyn ProgressObserver) -> Self {
        Self { aligner, progress }
    }

    pub fn build(&self, images: &[SourceImage]) -> Result<Layout> {
        let Some(first) = images.first() else {
            return Err(ConfigError::NoImages.into());
        };

        let mut transforms = Vec::with_capacity(images.len());
        let mut footprints = Vec::with_capacity(images.len());
        transforms.push(AffineTransform::IDENTITY);
        footprints.push(first.extent());
        let mut canvas = first.extent();

        let pairs = images.len() - 1;
        for (i, pair) in images.windows(2).enumerate() {
            let relative = self.aligner.align(i, &pair[0], &pair[1])?;
            let absolute = transforms[i].compose(&relative);
            let footprint = absolute.transform_rect(&pair[1].extent());
            canvas = canvas.union(&footprint);

            transforms.push(absolute);
            footprints.push(footprint);
            report_progress(self.progress, MosaicStage::Aligning, i + 1, pairs);
        }

        let mut placements = Vec::with_capacity(images.len());
        for (index, (transform, footprint)) in transforms.into_iter().zip(footprints).enumerate() {
            let inverse = transform
                .inverse()
                .ok_or(AlignmentError::Singular { index })?;
            let bbox = if index == 0 {
                footprint
            } else {
                footprint.expand(1).intersection(&canvas).unwrap_or_default()
            };
            debug!(index, %bbox, %transform, "Placed image");
            placements.push(Placement {
                transform,
                inverse,
                bbox,
            });
        }

        info!(
            images = placements.len(),
            width = canvas.width(),
            height = canvas.height(),
            %canvas,
            "Layout complete"
        );

        Ok(Layout { placements, canvas })
    }
}

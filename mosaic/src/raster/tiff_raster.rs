use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use common::Buffer2;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::raster::{GDAL_NODATA_TAG, RasterSource};

/// Lazily read TIFF file.
///
/// Only the header is decoded on open. Every `read_region` call opens its own
/// decoder and decodes the strips or tiles touching the region, so concurrent
/// reads never share decoder state.
#[derive(Debug, Clone)]
pub struct TiffRaster {
    path: PathBuf,
    width: usize,
    height: usize,
    samples_per_pixel: usize,
    nodata: Option<f64>,
}

impl TiffRaster {
    pub fn open(path: &Path) -> Result<Self> {
        let mut decoder = open_decoder(path)?;
        let tiff_err = |e| Error::tiff(path, e);

        let (width, height) = decoder.dimensions().map_err(tiff_err)?;
        let samples_per_pixel = match decoder.find_tag(Tag::SamplesPerPixel).map_err(tiff_err)? {
            Some(value) => value.into_u32().map_err(tiff_err)? as usize,
            None => 1,
        };
        if samples_per_pixel > 1 {
            let planar = match decoder
                .find_tag(Tag::PlanarConfiguration)
                .map_err(tiff_err)?
            {
                Some(value) => value.into_u32().map_err(tiff_err)?,
                None => 1,
            };
            if planar != 1 {
                return Err(Error::unsupported(path, "planar sample layout"));
            }
        }

        let nodata = match decoder
            .find_tag(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
            .map_err(tiff_err)?
        {
            Some(value) => parse_nodata(&value.into_string().map_err(tiff_err)?),
            None => None,
        };

        debug!(
            path = %path.display(),
            width,
            height,
            samples_per_pixel,
            ?nodata,
            "Opened TIFF"
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            samples_per_pixel: samples_per_pixel.max(1),
            nodata,
        })
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    Ok(Decoder::new(BufReader::new(file))
        .map_err(|e| Error::tiff(path, e))?
        .with_limits(Limits::unlimited()))
}

/// GDAL writes the nodata tag as text, optionally padded.
fn parse_nodata(text: &str) -> Option<f64> {
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    text.parse::<f64>().ok()
}

fn samples_as_f32(path: &Path, data: DecodingResult) -> Result<Vec<f32>> {
    Ok(match data {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|s| s as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::unsupported(path, "sample format")),
    })
}

impl RasterSource for TiffRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn band_count(&self) -> usize {
        self.samples_per_pixel
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_region(&self, band: usize, rect: Rect) -> Result<Buffer2<f32>> {
        let path = self.path.as_path();
        if band >= self.samples_per_pixel {
            return Err(Error::unsupported(path, format!("band index {band}")));
        }
        if !Rect::from_size(self.width, self.height).contains_rect(&rect) {
            return Err(Error::unsupported(
                path,
                format!("region {rect} outside {}x{} raster", self.width, self.height),
            ));
        }

        let mut out = Buffer2::new_filled(rect.width(), rect.height(), f32::NAN);
        if rect.is_empty() {
            return Ok(out);
        }

        let mut decoder = open_decoder(path)?;
        let (chunk_w, chunk_h) = decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w.max(1) as i64, chunk_h.max(1) as i64);
        let chunks_across = (self.width as i64 + chunk_w - 1) / chunk_w;
        let spp = self.samples_per_pixel;

        for cy in rect.y_min / chunk_h..=(rect.y_max - 1) / chunk_h {
            for cx in rect.x_min / chunk_w..=(rect.x_max - 1) / chunk_w {
                let index = (cy * chunks_across + cx) as u32;
                let (data_w, data_h) = decoder.chunk_data_dimensions(index);
                let origin_x = cx * chunk_w;
                let origin_y = cy * chunk_h;
                let chunk_rect = Rect::from_origin_size(
                    origin_x,
                    origin_y,
                    data_w as usize,
                    data_h as usize,
                );
                let Some(overlap) = chunk_rect.intersection(&rect) else {
                    continue;
                };

                let data = decoder
                    .read_chunk(index)
                    .map_err(|e| Error::tiff(path, e))?;
                let samples = samples_as_f32(path, data)?;
                let data_w = data_w as usize;

                for y in overlap.y_min..overlap.y_max {
                    let src_row = (y - origin_y) as usize * data_w;
                    let dst_y = (y - rect.y_min) as usize;
                    for x in overlap.x_min..overlap.x_max {
                        let src = (src_row + (x - origin_x) as usize) * spp + band;
                        out[((x - rect.x_min) as usize, dst_y)] =
                            samples.get(src).copied().unwrap_or(f32::NAN);
                    }
                }
            }
        }

        Ok(out)
    }
}

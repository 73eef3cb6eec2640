use image::{RgbaImage, imageops};
use rayon::prelude::*;

use crate::error::PipelineError;
use crate::io::{ImageSource, encode_png};
use crate::ops::crop::{CropInfo, CropResolution, LegacyHeuristic, resolve_crop_with};
use crate::ops::mask::compute_mask;

/// Knobs for a composition run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComposeOptions {
    pub legacy: LegacyHeuristic,
    /// Reject sources larger than this on either axis.
    pub max_dimension: u32,
    /// Apply the mask with rayon.
    pub parallel: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            legacy: LegacyHeuristic::default(),
            max_dimension: 16_384,
            parallel: true,
        }
    }
}

/// Pixels produced by [`compose`].
#[derive(Debug)]
pub struct Composite {
    pub pixels: RgbaImage,
    pub crop: Option<CropResolution>,
    /// Set when the mask could not be built; `pixels` is then unmasked.
    pub warning: Option<PipelineError>,
}

/// Crop `source` and clip it to the rounded-rect/ellipse mask.
///
/// Output alpha is `min(source alpha, mask)`, so masking an already masked
/// buffer with the same radius changes nothing.  `previous_output` is the size
/// of the texture a legacy crop produced last time, if known.
pub fn compose(
    source: &RgbaImage,
    crop: Option<&CropInfo>,
    radius_pct: u8,
    opts: &ComposeOptions,
    previous_output: Option<(u32, u32)>,
) -> Composite {
    let resolution = crop.map(|c| {
        resolve_crop_with(
            c,
            source.width(),
            source.height(),
            &opts.legacy,
            previous_output,
        )
    });

    let mut pixels = match resolution {
        Some(res) => {
            let r = res.rect;
            imageops::crop_imm(source, r.x, r.y, r.width, r.height).to_image()
        }
        None => source.clone(),
    };

    let warning = match compute_mask(pixels.width(), pixels.height(), radius_pct) {
        Ok(path) if path.is_identity() => None,
        Ok(path) => {
            let mask = path.rasterize();
            let w = pixels.width() as usize;
            let apply_row = |(row, chunk): (usize, &mut [u8])| {
                for (col, px) in chunk.chunks_exact_mut(4).enumerate() {
                    let m = mask.get_pixel(col as u32, row as u32).0[0];
                    px[3] = px[3].min(m);
                }
            };
            if opts.parallel {
                pixels.par_chunks_mut(w * 4).enumerate().for_each(apply_row);
            } else {
                pixels.chunks_mut(w * 4).enumerate().for_each(apply_row);
            }
            None
        }
        Err(e) => {
            crate::log_warn!("Mask skipped: {}", e);
            Some(e)
        }
    };

    Composite {
        pixels,
        crop: resolution,
        warning,
    }
}

/// Result of composing an encoded source image.
#[derive(Debug)]
pub struct ComposeOutcome {
    pub image: ImageSource,
    pub crop: Option<CropResolution>,
    /// Recoverable failure; `image` then holds the unmodified source (decode or
    /// encode failure) or the unmasked crop (mask failure).
    pub warning: Option<PipelineError>,
}

/// Decode, compose and re-encode.  Never fails: a source that cannot be
/// decoded is handed back unchanged with the error as a warning.
pub fn compose_source(
    source: &ImageSource,
    crop: Option<&CropInfo>,
    radius_pct: u8,
    opts: &ComposeOptions,
    previous_output: Option<(u32, u32)>,
) -> ComposeOutcome {
    if crop.is_none() && radius_pct == 0 {
        return ComposeOutcome {
            image: source.clone(),
            crop: None,
            warning: None,
        };
    }

    let pixels = match source.decode(opts.max_dimension) {
        Ok(p) => p,
        Err(e) => {
            crate::log_warn!("Using unmodified source image: {}", e);
            return ComposeOutcome {
                image: source.clone(),
                crop: None,
                warning: Some(e),
            };
        }
    };

    let composite = compose(&pixels, crop, radius_pct, opts, previous_output);
    match encode_png(&composite.pixels) {
        Ok(bytes) => ComposeOutcome {
            image: ImageSource::png(bytes),
            crop: composite.crop,
            warning: composite.warning,
        },
        Err(e) => {
            crate::log_warn!("Using unmodified source image: {}", e);
            ComposeOutcome {
                image: source.clone(),
                crop: composite.crop,
                warning: Some(e),
            }
        }
    }
}

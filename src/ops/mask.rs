use image::{GrayImage, Luma};
use rayon::prelude::*;

use crate::error::PipelineError;

/// Radius percentage at (or above) which the mask becomes a full ellipse.
pub const FULL_ELLIPSE_PCT: u8 = 50;

/// Clip outline for a decal texture, described in the buffer's pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClipPath {
    /// No clipping: the whole rectangle stays opaque.
    Full { width: u32, height: u32 },
    /// Rectangle with elliptical corners of radii `(rx, ry)` pixels.
    RoundedRect {
        width: u32,
        height: u32,
        rx: f64,
        ry: f64,
    },
    /// Ellipse inscribed in the `width × height` box.
    Ellipse { width: u32, height: u32 },
}

/// Build the clip path for a `width × height` buffer.
///
/// `radius_pct` is a percentage of each half-side: `0` leaves the buffer
/// unclipped, `50` and above give the inscribed ellipse.
pub fn compute_mask(width: u32, height: u32, radius_pct: u8) -> Result<ClipPath, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions { width, height });
    }
    if radius_pct == 0 {
        return Ok(ClipPath::Full { width, height });
    }
    if radius_pct >= FULL_ELLIPSE_PCT {
        return Ok(ClipPath::Ellipse { width, height });
    }
    let hx = width as f64 / 2.0;
    let hy = height as f64 / 2.0;
    let k = radius_pct as f64 / 100.0;
    Ok(ClipPath::RoundedRect {
        width,
        height,
        rx: (k * hx).min(hx),
        ry: (k * hy).min(hy),
    })
}

impl ClipPath {
    pub fn width(&self) -> u32 {
        match *self {
            ClipPath::Full { width, .. }
            | ClipPath::RoundedRect { width, .. }
            | ClipPath::Ellipse { width, .. } => width,
        }
    }

    pub fn height(&self) -> u32 {
        match *self {
            ClipPath::Full { height, .. }
            | ClipPath::RoundedRect { height, .. }
            | ClipPath::Ellipse { height, .. } => height,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, ClipPath::Full { .. })
    }

    /// Corner radius as a fraction of the half-sides: 0 = rectangle, 1 = ellipse.
    fn corner_fraction(&self) -> f64 {
        match *self {
            ClipPath::Full { .. } => 0.0,
            ClipPath::Ellipse { .. } => 1.0,
            ClipPath::RoundedRect { width, rx, .. } => (rx / (width as f64 / 2.0)).clamp(0.0, 1.0),
        }
    }

    /// Signed distance (pixels, negative inside) of pixel centre `(x, y)`.
    ///
    /// Evaluated on the unit square where the outline is a circular-cornered
    /// box, then scaled by the longer half-side.  The unit-square distance
    /// never decreases as the corner fraction grows, so larger radii always
    /// clip a superset of pixels.
    pub fn signed_distance(&self, x: u32, y: u32) -> f64 {
        let hx = self.width() as f64 / 2.0;
        let hy = self.height() as f64 / 2.0;
        let u = (x as f64 + 0.5 - hx) / hx;
        let v = (y as f64 + 0.5 - hy) / hy;
        sdf_rounded_box(u, v, 1.0, 1.0, self.corner_fraction()) * hx.max(hy)
    }

    /// Mask value for one pixel: 255 fully inside, 0 fully outside.
    pub fn coverage(&self, x: u32, y: u32) -> u8 {
        if self.is_identity() {
            return 255;
        }
        let cov = smoothstep(0.5, -0.5, self.signed_distance(x, y));
        (cov * 255.0).round().clamp(0.0, 255.0) as u8
    }

    /// Rasterize into an 8-bit alpha mask (rows in parallel).
    pub fn rasterize(&self) -> GrayImage {
        let (w, h) = (self.width(), self.height());
        if self.is_identity() {
            return GrayImage::from_pixel(w, h, Luma([255]));
        }
        let mut buf = vec![0u8; w as usize * h as usize];
        buf.par_chunks_mut(w as usize)
            .enumerate()
            .for_each(|(row, row_buf)| {
                for (col, px) in row_buf.iter_mut().enumerate() {
                    *px = self.coverage(col as u32, row as u32);
                }
            });
        GrayImage::from_raw(w, h, buf).unwrap_or_else(|| GrayImage::new(w, h))
    }
}

// ============================================================================
// SDF helpers: signed distance, negative inside
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f64, py: f64, hx: f64, hy: f64) -> f64 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for a rounded box.
#[inline]
fn sdf_rounded_box(px: f64, py: f64, hx: f64, hy: f64, r: f64) -> f64 {
    let r = r.min(hx).min(hy);
    sdf_box(px, py, hx - r, hy - r) - r
}

/// Smoothstep between edge0 and edge1.
#[inline]
fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque_count(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == 255).count()
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        assert!(matches!(
            compute_mask(0, 10, 20),
            Err(PipelineError::InvalidDimensions { width: 0, height: 10 })
        ));
        assert!(compute_mask(10, 0, 0).is_err());
    }

    #[test]
    fn zero_radius_is_identity() {
        let path = compute_mask(17, 9, 0).unwrap();
        assert!(path.is_identity());
        assert_eq!(opaque_count(&path.rasterize()), 17 * 9);
    }

    #[test]
    fn fifty_and_above_share_the_full_ellipse() {
        let a = compute_mask(40, 24, 50).unwrap();
        let b = compute_mask(40, 24, 90).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rasterize(), b.rasterize());
    }

    #[test]
    fn corner_radii_follow_each_axis() {
        match compute_mask(200, 100, 20).unwrap() {
            ClipPath::RoundedRect { rx, ry, .. } => {
                assert!((rx - 20.0).abs() < 1e-9);
                assert!((ry - 10.0).abs() < 1e-9);
            }
            other => panic!("unexpected clip path {:?}", other),
        }
    }

    #[test]
    fn opaque_area_never_grows_with_radius() {
        for &(w, h) in &[(64u32, 64u32), (90, 40), (13, 31)] {
            let mut previous = usize::MAX;
            for pct in 0..=50u8 {
                let count = opaque_count(&compute_mask(w, h, pct).unwrap().rasterize());
                assert!(
                    count <= previous,
                    "{}x{}: radius {}% made {} opaque pixels, previous step had {}",
                    w, h, pct, count, previous
                );
                previous = count;
            }
        }
    }

    #[test]
    fn ellipse_clears_corners_and_keeps_centre() {
        let mask = compute_mask(32, 32, 50).unwrap().rasterize();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(31, 31).0[0], 0);
        assert_eq!(mask.get_pixel(16, 16).0[0], 255);
        // Edge midpoints touch the outline.
        assert!(mask.get_pixel(16, 0).0[0] > 200);
    }

    #[test]
    fn pixels_outside_the_outline_are_never_opaque() {
        let path = compute_mask(48, 30, 35).unwrap();
        for y in 0..30 {
            for x in 0..48 {
                if path.signed_distance(x, y) > 0.0 {
                    assert!(path.coverage(x, y) < 255, "pixel ({}, {}) left opaque", x, y);
                }
            }
        }
    }
}

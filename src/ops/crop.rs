use serde::{Deserialize, Serialize};

// ============================================================================
// CROP DESCRIPTORS
// ============================================================================

/// Crop rectangle measured in the natural pixel space of the image it was
/// drawn on.  A natural size of 0 means "unknown": the crop is then taken to
/// be relative to whatever image it is applied to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NaturalCrop {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub natural_width: u32,
    pub natural_height: u32,
}

/// Crop rectangle captured in on-screen display pixels by older presets.
///
/// The display size the user was looking at is not stored, so converting to
/// natural pixels is an estimate (see [`LegacyHeuristic`]).  Only the
/// [`NaturalCrop`] form is guaranteed to replay exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LegacyCrop {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub natural_width: Option<u32>,
    pub natural_height: Option<u32>,
}

/// A layer's crop, in one of the two on-disk shapes.
///
/// Serialized as the flat `{x, y, width, height, naturalWidth, naturalHeight,
/// format}` object; `format: "natural"` selects [`CropInfo::Natural`], anything
/// else is read as [`CropInfo::LegacyDisplay`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "CropInfoRecord", into = "CropInfoRecord")]
pub enum CropInfo {
    Natural(NaturalCrop),
    LegacyDisplay(LegacyCrop),
}

impl CropInfo {
    /// Crop in natural pixels of a `natural_width × natural_height` image.
    pub fn natural(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        natural_width: u32,
        natural_height: u32,
    ) -> Self {
        CropInfo::Natural(NaturalCrop {
            x,
            y,
            width,
            height,
            natural_width,
            natural_height,
        })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, CropInfo::LegacyDisplay(_))
    }
}

const NATURAL_FORMAT: &str = "natural";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropInfoRecord {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    natural_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    natural_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

fn natural_dim(v: Option<f64>) -> Option<u32> {
    v.filter(|d| d.is_finite() && *d >= 1.0).map(|d| d.round() as u32)
}

impl From<CropInfoRecord> for CropInfo {
    fn from(r: CropInfoRecord) -> Self {
        if r.format.as_deref() == Some(NATURAL_FORMAT) {
            CropInfo::Natural(NaturalCrop {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                natural_width: natural_dim(r.natural_width).unwrap_or(0),
                natural_height: natural_dim(r.natural_height).unwrap_or(0),
            })
        } else {
            CropInfo::LegacyDisplay(LegacyCrop {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                natural_width: natural_dim(r.natural_width),
                natural_height: natural_dim(r.natural_height),
            })
        }
    }
}

impl From<CropInfo> for CropInfoRecord {
    fn from(c: CropInfo) -> Self {
        match c {
            CropInfo::Natural(n) => CropInfoRecord {
                x: n.x,
                y: n.y,
                width: n.width,
                height: n.height,
                unit: Some("px".to_string()),
                natural_width: (n.natural_width > 0).then_some(n.natural_width as f64),
                natural_height: (n.natural_height > 0).then_some(n.natural_height as f64),
                format: Some(NATURAL_FORMAT.to_string()),
            },
            CropInfo::LegacyDisplay(l) => CropInfoRecord {
                x: l.x,
                y: l.y,
                width: l.width,
                height: l.height,
                unit: None,
                natural_width: l.natural_width.map(f64::from),
                natural_height: l.natural_height.map(f64::from),
                format: None,
            },
        }
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Integer rectangle inside an image's natural pixel grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Result of resolving a crop against a concrete image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropResolution {
    pub rect: PixelRect,
    /// The scaled rectangle left the image bounds (or collapsed below one
    /// pixel) and was clamped.
    pub clamped: bool,
    /// The rectangle came from a legacy display-space crop and is a best-effort
    /// estimate.
    pub estimated: bool,
}

/// How a legacy display-space crop is mapped back to natural pixels.
///
/// The legacy cropper showed the image scaled to fit a bounded box; that box
/// is assumed to be `display_width × display_height`, grown by
/// `overflow_pad` whenever the crop reaches past it.  When the image the crop
/// originally produced is still around, its size gives the exact scale instead.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LegacyHeuristic {
    pub display_width: f64,
    pub display_height: f64,
    pub overflow_pad: f64,
}

impl Default for LegacyHeuristic {
    fn default() -> Self {
        Self {
            display_width: 800.0,
            display_height: 600.0,
            overflow_pad: 1.05,
        }
    }
}

impl LegacyHeuristic {
    /// Display-to-natural scale factors for a legacy crop on an image whose
    /// natural size is `natural_w × natural_h`.
    pub fn display_scale(
        &self,
        crop: &LegacyCrop,
        natural_w: f64,
        natural_h: f64,
        previous_output: Option<(u32, u32)>,
    ) -> (f64, f64) {
        // Output size = display crop size * (natural / display).
        if let Some((ow, oh)) = previous_output
            && crop.width > 0.0
            && crop.height > 0.0
            && ow > 0
            && oh > 0
        {
            return (ow as f64 / crop.width, oh as f64 / crop.height);
        }

        let aspect = natural_w / natural_h;
        let (mut est_w, mut est_h) = if aspect > self.display_width / self.display_height {
            (self.display_width, self.display_width / aspect)
        } else {
            (self.display_height * aspect, self.display_height)
        };

        let right = crop.x + crop.width;
        let bottom = crop.y + crop.height;
        if right > est_w {
            est_w = right * self.overflow_pad;
            est_h = est_w / aspect;
        }
        if bottom > est_h {
            est_h = bottom * self.overflow_pad;
            est_w = est_h * aspect;
        }

        (natural_w / est_w, natural_h / est_h)
    }
}

/// Resolve `crop` against an image of `target_w × target_h` natural pixels.
///
/// `None` means "use the full image".
pub fn resolve_crop(
    crop: Option<&CropInfo>,
    target_w: u32,
    target_h: u32,
) -> Option<CropResolution> {
    crop.map(|c| resolve_crop_with(c, target_w, target_h, &LegacyHeuristic::default(), None))
}

/// Resolve with an explicit legacy heuristic and, for legacy crops, the size
/// of the image the crop previously produced (if known).
pub fn resolve_crop_with(
    crop: &CropInfo,
    target_w: u32,
    target_h: u32,
    legacy: &LegacyHeuristic,
    previous_output: Option<(u32, u32)>,
) -> CropResolution {
    let target_w = target_w.max(1);
    let target_h = target_h.max(1);
    let tw = target_w as f64;
    let th = target_h as f64;

    let (x, y, w, h, estimated) = match crop {
        CropInfo::Natural(n) => {
            let ref_w = if n.natural_width > 0 { n.natural_width as f64 } else { tw };
            let ref_h = if n.natural_height > 0 { n.natural_height as f64 } else { th };
            let sx = tw / ref_w;
            let sy = th / ref_h;
            (n.x * sx, n.y * sy, n.width * sx, n.height * sy, false)
        }
        CropInfo::LegacyDisplay(l) => {
            let ref_w = l.natural_width.map_or(tw, f64::from);
            let ref_h = l.natural_height.map_or(th, f64::from);
            let (dsx, dsy) = legacy.display_scale(l, ref_w, ref_h, previous_output);
            let sx = dsx * tw / ref_w;
            let sy = dsy * th / ref_h;
            crate::log_info!(
                "Legacy display-space crop estimated at scale {:.4}x{:.4} against {}x{}",
                sx,
                sy,
                target_w,
                target_h
            );
            (l.x * sx, l.y * sy, l.width * sx, l.height * sy, true)
        }
    };

    let (rect, clamped) = clamp_rect(x, y, w, h, target_w, target_h);
    if clamped {
        crate::log_warn!(
            "Crop ({:.2}, {:.2}, {:.2}x{:.2}) exceeded {}x{} and was clamped to {:?}",
            x,
            y,
            w,
            h,
            target_w,
            target_h,
            rect
        );
    }

    CropResolution {
        rect,
        clamped,
        estimated,
    }
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() { v } else { fallback }
}

/// Slack for float noise from scaling when checking the image bounds.
const BOUNDS_EPSILON: f64 = 1e-6;

/// Hard-clamp origin into the image and extent to the remaining span
/// (at least one pixel per axis), then round to the pixel grid.
fn clamp_rect(x: f64, y: f64, w: f64, h: f64, target_w: u32, target_h: u32) -> (PixelRect, bool) {
    let tw = target_w as f64;
    let th = target_h as f64;

    let safe_x = finite_or(x, 0.0).clamp(0.0, tw - 1.0);
    let safe_y = finite_or(y, 0.0).clamp(0.0, th - 1.0);
    let safe_w = finite_or(w, 0.0).min(tw - safe_x);
    let safe_h = finite_or(h, 0.0).min(th - safe_y);

    let px = (safe_x.round() as u32).min(target_w - 1);
    let py = (safe_y.round() as u32).min(target_h - 1);
    let pw = (safe_w.round().max(1.0) as u32).min(target_w - px).max(1);
    let ph = (safe_h.round().max(1.0) as u32).min(target_h - py).max(1);

    let rect = PixelRect {
        x: px,
        y: py,
        width: pw,
        height: ph,
    };
    let inside = [x, y, w, h].iter().all(|v| v.is_finite())
        && x >= -BOUNDS_EPSILON
        && y >= -BOUNDS_EPSILON
        && x + w <= tw + BOUNDS_EPSILON
        && y + h <= th + BOUNDS_EPSILON
        && w >= 1.0 - BOUNDS_EPSILON
        && h >= 1.0 - BOUNDS_EPSILON;
    (rect, !inside)
}

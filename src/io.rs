use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

// ============================================================================
// IMAGE PAYLOADS
// ============================================================================

/// An image as the pipeline stores and exchanges it.
///
/// Uploaded and composited images are kept as encoded bytes (`Embedded`) so a
/// layer can always be re-derived from its untouched original.  Built-in decal
/// textures are referenced by path (`Uri`) and are never decoded in-process.
///
/// Serialized as a single JSON string: `data:<mime>;base64,<payload>` for
/// embedded images, the raw reference otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    Embedded { mime: String, bytes: Arc<[u8]> },
    Uri(String),
}

impl ImageSource {
    /// Wrap encoded image bytes, sniffing the mime type from the header.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let mime = mime_for(&bytes).to_string();
        ImageSource::Embedded { mime, bytes }
    }

    /// Wrap PNG bytes produced by [`encode_png`].
    pub fn png(bytes: Vec<u8>) -> Self {
        ImageSource::Embedded {
            mime: "image/png".to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn uri(reference: impl Into<String>) -> Self {
        ImageSource::Uri(reference.into())
    }

    /// Encoded bytes, if this image is held in memory.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            ImageSource::Embedded { bytes, .. } => Some(bytes.as_ref()),
            ImageSource::Uri(_) => None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, ImageSource::Embedded { .. })
    }

    /// Decode to RGBA8, rejecting anything larger than `max_dimension` per axis.
    pub fn decode(&self, max_dimension: u32) -> Result<RgbaImage, PipelineError> {
        match self {
            ImageSource::Embedded { bytes, .. } => decode_rgba(bytes, max_dimension),
            ImageSource::Uri(reference) => Err(PipelineError::ImageDecode(format!(
                "'{}' is an external reference, not embedded image data",
                reference
            ))),
        }
    }

    /// Pixel dimensions read from the header, without decoding pixel data.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.bytes().and_then(image_dimensions)
    }

    /// `data:` URL (embedded) or the raw reference (external).
    pub fn to_data_url(&self) -> String {
        match self {
            ImageSource::Embedded { mime, bytes } => {
                format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
            }
            ImageSource::Uri(reference) => reference.clone(),
        }
    }

    /// Inverse of [`ImageSource::to_data_url`].  Strings that are not base64
    /// `data:` URLs are kept as external references.
    pub fn from_data_url(s: &str) -> Result<Self, PipelineError> {
        let Some(rest) = s.strip_prefix("data:") else {
            return Ok(ImageSource::Uri(s.to_string()));
        };
        let Some((mime, payload)) = rest.split_once(";base64,") else {
            return Ok(ImageSource::Uri(s.to_string()));
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| PipelineError::ImageDecode(format!("Bad base64 payload: {}", e)))?;
        Ok(ImageSource::Embedded {
            mime: mime.to_string(),
            bytes: bytes.into(),
        })
    }
}

impl Serialize for ImageSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for ImageSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageSource::from_data_url(&s).map_err(serde::de::Error::custom)
    }
}

fn mime_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::Ico) => "image/x-icon",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

/// Header-only dimension probe.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Decode any supported raster format to RGBA8.  Sources without an alpha
/// channel come back fully opaque.
pub fn decode_rgba(bytes: &[u8], max_dimension: u32) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::ImageDecode("Image data is empty".into()));
    }
    if let Some((w, h)) = image_dimensions(bytes)
        && (w > max_dimension || h > max_dimension)
    {
        return Err(PipelineError::ImageDecode(format!(
            "Image size {}x{} exceeds maximum allowed {}x{}",
            w, h, max_dimension, max_dimension
        )));
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::ImageDecode(e.to_string()))?
        .to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(PipelineError::ImageDecode(
            "Image dimensions cannot be zero".into(),
        ));
    }
    Ok(img)
}

/// Encode RGBA8 pixels as PNG.  Safe to call from worker threads.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    let encoder = PngEncoder::new(&mut cursor);
    #[allow(deprecated)]
    encoder
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ColorType::Rgba8,
        )
        .map_err(|e| PipelineError::ImageEncode(e.to_string()))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        encode_png(&img).unwrap()
    }

    #[test]
    fn data_url_round_trip_keeps_bytes() {
        let src = ImageSource::from_bytes(sample_png());
        let url = src.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ImageSource::from_data_url(&url).unwrap(), src);
    }

    #[test]
    fn plain_paths_stay_external() {
        let src = ImageSource::from_data_url("./threejs.png").unwrap();
        assert_eq!(src, ImageSource::uri("./threejs.png"));
        assert!(src.decode(64).is_err());
    }

    #[test]
    fn dimensions_read_from_header() {
        let src = ImageSource::from_bytes(sample_png());
        assert_eq!(src.dimensions(), Some((3, 2)));
    }

    #[test]
    fn oversized_images_are_rejected() {
        let err = decode_rgba(&sample_png(), 2).unwrap_err();
        assert!(matches!(err, PipelineError::ImageDecode(_)));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_rgba(b"definitely not an image", 1024).unwrap_err();
        assert!(matches!(err, PipelineError::ImageDecode(_)));
    }
}

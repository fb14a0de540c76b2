//! grounding-preprocess – patch-aligned resize and upload encoding for
//! screenshots.
//!
//! The resized copy exists only for transmission to the model endpoint.
//! Scoring always runs against the original decoded dimensions, which are
//! returned alongside the encoded payload.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use image::ImageFormat;
use thiserror::Error;

/// Dimension alignment fixed by the transmission contract (patch 16, merge 2).
pub const ALIGN_FACTOR: u32 = 16 * 2;
/// Lower bound on `h * w` after resizing.
pub const MIN_PIXELS: u32 = 16 * 16 * 4;
/// Upper bound on `h * w` after resizing.
pub const MAX_PIXELS: u32 = 6_553_600;

const MAX_ASPECT_RATIO: f64 = 200.0;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("image not found: {0}")]
    ImageMissing(String),
    #[error("aspect ratio {0:.1} exceeds the limit of 200")]
    AspectRatioTooExtreme(f64),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),
}

/// Base64 PNG payload plus the dimensions of the image as decoded from disk.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64_png: String,
    pub width: u32,
    pub height: u32,
}

/// Compute a resized `(height, width)` aligned to `factor` and bounded by
/// `[min_pixels, max_pixels]`.
///
/// Both dimensions are rounded to the nearest multiple of `factor` (at least
/// one multiple). If the aligned product overshoots `max_pixels` the image is
/// scaled down by `sqrt(max_pixels / (h*w))` and floored back onto the
/// alignment; if it undershoots `min_pixels` it is scaled up by
/// `sqrt(min_pixels / (h*w))` and ceiled onto the alignment.
pub fn smart_resize(
    height: u32,
    width: u32,
    factor: u32,
    min_pixels: u32,
    max_pixels: u32,
) -> Result<(u32, u32), PreprocessError> {
    let (h, w) = (height as f64, width as f64);
    let ratio = h.max(w) / h.min(w);
    if ratio > MAX_ASPECT_RATIO {
        return Err(PreprocessError::AspectRatioTooExtreme(ratio));
    }

    let f = factor as f64;
    let mut h_bar = ((h / f).round() * f).max(f);
    let mut w_bar = ((w / f).round() * f).max(f);

    if h_bar * w_bar > max_pixels as f64 {
        let beta = (h * w / max_pixels as f64).sqrt();
        h_bar = (h / beta / f).floor() * f;
        w_bar = (w / beta / f).floor() * f;
    } else if h_bar * w_bar < min_pixels as f64 {
        let beta = (min_pixels as f64 / (h * w)).sqrt();
        h_bar = (h * beta / f).ceil() * f;
        w_bar = (w * beta / f).ceil() * f;
    }

    Ok((h_bar as u32, w_bar as u32))
}

/// Decode the image at `path`, smart-resize it for transmission, and return
/// the resized copy as a base64 PNG together with the original dimensions.
///
/// A missing file is reported as [`PreprocessError::ImageMissing`] so the
/// caller can drop the case without treating it as a pipeline failure.
pub fn encode_for_upload(path: &Path) -> Result<EncodedImage, PreprocessError> {
    if !path.is_file() {
        return Err(PreprocessError::ImageMissing(path.display().to_string()));
    }

    let decoded = image::open(path)
        .map_err(|source| PreprocessError::Decode {
            path: path.display().to_string(),
            source,
        })?
        .to_rgb8();
    let (width, height) = decoded.dimensions();

    let (resized_h, resized_w) =
        smart_resize(height, width, ALIGN_FACTOR, MIN_PIXELS, MAX_PIXELS)?;
    let resized = image::imageops::resize(&decoded, resized_w, resized_h, FilterType::CatmullRom);

    let mut buffer = Cursor::new(Vec::new());
    resized
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(PreprocessError::Encode)?;

    Ok(EncodedImage {
        base64_png: STANDARD.encode(buffer.into_inner()),
        width,
        height,
    })
}

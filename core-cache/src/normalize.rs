//! Image normalization pipeline.
//!
//! Decode, gate, fit-inside resize (never upscaling), flatten alpha
//! onto a white background, and re-encode as JPEG. Images the pipeline
//! rejects are permanent failures: the caller tombstones the row so the
//! download is not retried forever.

use crate::error::CacheError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Formats the pipeline accepts. HEIF content is rejected here: the
/// decoder stack cannot read it, so it would fail the decode gate
/// anyway.
const SUPPORTED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// Smallest acceptable side of the decoded input and of the output.
const MIN_DIMENSION: u32 = 100;

/// Largest acceptable side of the decoded input.
const MAX_DIMENSION: u32 = 16_384;

/// A normalized image ready for the cache.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Run the full pipeline on raw downloaded bytes.
pub fn normalize(
    raw: &[u8],
    show_width: u32,
    show_height: u32,
    jpeg_quality: u8,
) -> Result<Normalized, CacheError> {
    let format = image::guess_format(raw)
        .map_err(|e| CacheError::Validation(format!("unrecognized image data: {}", e)))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(CacheError::Validation(format!(
            "unsupported format {:?}",
            format
        )));
    }

    let img = image::load_from_memory_with_format(raw, format)
        .map_err(|e| CacheError::Validation(format!("decode failed: {}", e)))?;

    let (width, height) = img.dimensions();
    if width.min(height) < MIN_DIMENSION {
        return Err(CacheError::Validation(format!(
            "too small: {}x{}",
            width, height
        )));
    }
    if width.max(height) > MAX_DIMENSION {
        return Err(CacheError::Validation(format!(
            "too large: {}x{}",
            width, height
        )));
    }

    // Fit inside the show target; images that already fit pass through
    // unscaled.
    let resized = if width > show_width || height > show_height {
        img.resize(show_width, show_height, FilterType::Lanczos3)
    } else {
        img
    };

    let (out_width, out_height) = resized.dimensions();
    if out_width.min(out_height) < MIN_DIMENSION {
        return Err(CacheError::Validation(format!(
            "degenerate aspect ratio after resize: {}x{}",
            out_width, out_height
        )));
    }

    let flattened = flatten_onto_white(&resized);

    let mut cursor = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut cursor, jpeg_quality);
    DynamicImage::ImageRgb8(flattened)
        .write_with_encoder(encoder)
        .map_err(|e| CacheError::Validation(format!("encode failed: {}", e)))?;

    debug!(
        in_dims = %format!("{}x{}", width, height),
        out_dims = %format!("{}x{}", out_width, out_height),
        "Image normalized"
    );

    Ok(Normalized {
        bytes: cursor.into_inner(),
        width: out_width,
        height: out_height,
    })
}

/// Composite transparent pixels over white. JPEG has no alpha channel.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut canvas = RgbImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |c: u8| -> u8 { ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8 };
        canvas.put_pixel(
            x,
            y,
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }

    canvas
}

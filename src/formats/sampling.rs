//! Two-pass bounded image decoding.
//!
//! The header is read first so the reduction factor is known before any
//! pixels are allocated for the final cover. JPEG sources are reduced inside
//! the DCT; other formats decode under explicit allocation limits.

use crate::error::{AppError, Result};
use crate::formats::CoverBounds;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::{Decoder as JpegScaleDecoder, PixelFormat as JpegPixelFormat};
use std::io::Cursor;

/// Largest source side accepted by the generic decoder.
const MAX_SOURCE_DIM: u32 = 20_000;

/// Allocation ceiling for a single decode.
const MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Largest reduction the JPEG decoder performs by itself.
const MAX_JPEG_SCALE: u32 = 8;

/// Largest power-of-two reduction that keeps the image at or above the bounds.
pub fn calculate_sample_size(
    raw_width: u32,
    raw_height: u32,
    max_width: u32,
    max_height: u32,
) -> u32 {
    let max_width = max_width.max(1);
    let max_height = max_height.max(1);
    let mut sample = 1;

    if raw_width > max_width || raw_height > max_height {
        let half_width = raw_width / 2;
        let half_height = raw_height / 2;

        while half_width / sample >= max_width && half_height / sample >= max_height {
            sample *= 2;
        }
    }

    sample
}

/// Read only the image header and return its native size.
pub fn read_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let dimensions = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()?;

    Ok(dimensions)
}

/// Decode encoded image bytes, subsampled to roughly fit `bounds`.
///
/// The result is opaque 8-bit RGB; any alpha channel is dropped.
pub fn decode_sampled(data: &[u8], bounds: CoverBounds) -> Result<RgbImage> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let format = reader.format();
    let (width, height) = reader.into_dimensions()?;

    let sample = calculate_sample_size(width, height, bounds.max_width, bounds.max_height);
    let target = ((width / sample).max(1), (height / sample).max(1));

    let decoded = if format == Some(ImageFormat::Jpeg) && sample > 1 {
        match decode_jpeg_scaled(data, sample) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(error = %e, "Scaled JPEG decode failed, using full decoder");
                decode_limited(data)?
            }
        }
    } else {
        decode_limited(data)?
    };

    let sampled = if (decoded.width(), decoded.height()) != target {
        decoded.thumbnail_exact(target.0, target.1)
    } else {
        decoded
    };

    tracing::trace!(width, height, sample, "Decoded cover image");

    Ok(sampled.into_rgb8())
}

/// Full decode bounded by [`Limits`].
fn decode_limited(data: &[u8]) -> Result<DynamicImage> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIM);
    limits.max_image_height = Some(MAX_SOURCE_DIM);
    limits.max_alloc = Some(MAX_DECODE_BYTES);

    let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    reader.limits(limits);

    Ok(reader.decode()?)
}

/// Decode a JPEG reduced by up to 1/8 during the DCT.
fn decode_jpeg_scaled(data: &[u8], sample: u32) -> Result<DynamicImage> {
    let jpeg_error = |e: jpeg_decoder::Error| AppError::InvalidFormat(format!("JPEG: {}", e));

    let mut decoder = JpegScaleDecoder::new(Cursor::new(data));
    decoder.set_max_decoding_buffer_size(MAX_DECODE_BYTES as usize);
    decoder.read_info().map_err(jpeg_error)?;

    let info = decoder
        .info()
        .ok_or_else(|| AppError::InvalidFormat("JPEG header missing".into()))?;
    let scale = sample.min(MAX_JPEG_SCALE);
    let requested_w = (u32::from(info.width) / scale).max(1) as u16;
    let requested_h = (u32::from(info.height) / scale).max(1) as u16;
    decoder.scale(requested_w, requested_h).map_err(jpeg_error)?;

    let pixels = decoder.decode().map_err(jpeg_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| AppError::InvalidFormat("JPEG output metadata missing".into()))?;
    let (w, h) = (u32::from(info.width), u32::from(info.height));

    let image = match info.pixel_format {
        JpegPixelFormat::RGB24 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        JpegPixelFormat::L8 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        other => {
            return Err(AppError::InvalidFormat(format!(
                "Unsupported JPEG pixel format {:?}",
                other
            )));
        }
    };

    image.ok_or_else(|| AppError::InvalidFormat("JPEG buffer size mismatch".into()))
}

//! Format-preserving recompression of product images.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use std::io::Cursor;

/// Quality used when none is configured (out of 100).
pub const DEFAULT_QUALITY: u8 = 50;

/// Re-encoded image bytes together with the format they were encoded in.
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl TransformedImage {
    /// File extension used for the stored object.
    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            _ => "bin",
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Decodes an image and re-encodes it in the same format at reduced quality.
#[derive(Debug, Clone, Copy)]
pub struct Recompressor {
    quality: u8,
}

impl Default for Recompressor {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl Recompressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Recompress `source`, keeping its format.
    ///
    /// JPEG is re-encoded lossily at the configured quality. PNG and WebP have
    /// no lossy encoder in the image stack, so they are re-encoded losslessly
    /// (PNG with the strongest compression level); a lossy WebP source would
    /// grow that way. Whenever the re-encoded image is not smaller than the
    /// source, the source bytes are returned unchanged.
    pub fn transform(&self, source: &[u8]) -> Result<TransformedImage, TransformError> {
        let format = image::guess_format(source).map_err(TransformError::Decode)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) {
            return Err(TransformError::Unsupported(format!("{:?}", format)));
        }

        let img = image::load_from_memory_with_format(source, format)
            .map_err(TransformError::Decode)?;

        let mut bytes = Vec::new();
        match format {
            ImageFormat::Jpeg => self.encode_jpeg(&img, &mut bytes)?,
            ImageFormat::Png => encode_png(&img, &mut bytes)?,
            _ => encode_webp(&img, &mut bytes)?,
        }

        if bytes.len() >= source.len() {
            bytes = source.to_vec();
        }

        Ok(TransformedImage { bytes, format })
    }

    fn encode_jpeg(&self, img: &DynamicImage, out: &mut Vec<u8>) -> Result<(), TransformError> {
        let encoder = JpegEncoder::new_with_quality(Cursor::new(out), self.quality);
        let (width, height) = (img.width(), img.height());

        // JPEG carries no alpha channel.
        let result = if img.color().has_color() {
            let rgb = img.to_rgb8();
            encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        } else {
            let luma = img.to_luma8();
            encoder.write_image(luma.as_raw(), width, height, ExtendedColorType::L8)
        };
        result.map_err(TransformError::Encode)
    }
}

fn encode_png(img: &DynamicImage, out: &mut Vec<u8>) -> Result<(), TransformError> {
    let encoder =
        PngEncoder::new_with_quality(Cursor::new(out), CompressionType::Best, FilterType::Adaptive);
    img.write_with_encoder(encoder).map_err(TransformError::Encode)
}

fn encode_webp(img: &DynamicImage, out: &mut Vec<u8>) -> Result<(), TransformError> {
    let encoder = WebPEncoder::new_lossless(Cursor::new(out));
    let rgba = img.to_rgba8();
    encoder
        .write_image(rgba.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(TransformError::Encode)
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),
}

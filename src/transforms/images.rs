//! Raster image recompression.

use crate::build::{Artifact, ArtifactKind, Produced, StageContext, Transform, TransformError};
use crate::config::PngCompression;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat, ImageResult};

/// Re-encode images, keeping the original bytes unless the result is
/// strictly smaller.
///
/// PNG recompression is lossless. JPEGs are only re-encoded when a lossy
/// quality is set. Other formats pass through untouched.
#[derive(Debug, Clone, Copy)]
pub struct Compress {
    png: PngCompression,
    jpeg_quality: Option<u8>,
}

impl Default for Compress {
    fn default() -> Self {
        Self { png: PngCompression::Best, jpeg_quality: None }
    }
}

impl Compress {
    pub fn new(png: PngCompression, jpeg_quality: Option<u8>) -> Self {
        Self { png, jpeg_quality: jpeg_quality.map(|q| q.clamp(1, 100)) }
    }

    fn compress(&self, input: &Artifact, ctx: &StageContext<'_>) -> Result<Artifact, TransformError> {
        let bytes = input.content();
        let (format, encoding) = match (image::guess_format(bytes), self.jpeg_quality) {
            (Ok(ImageFormat::Png), _) => (ImageFormat::Png, Encoding::Png(self.png)),
            (Ok(ImageFormat::Jpeg), Some(quality)) => (ImageFormat::Jpeg, Encoding::Jpeg(quality)),
            (Ok(ImageFormat::Jpeg), None) => {
                tracing::debug!(artifact = input.id(), "lossy jpeg disabled, copied as is");
                return Ok(input.clone());
            }
            _ => {
                tracing::debug!(artifact = input.id(), "not a recompressible image, copied as is");
                return Ok(input.clone());
            }
        };

        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ctx.error(input.id(), format!("failed to decode image: {}", e)))?;
        let encoded = match encoding {
            Encoding::Png(compression) => encode_png(&decoded, compression),
            Encoding::Jpeg(quality) => encode_jpeg(&decoded, quality),
        }
        .map_err(|e| ctx.error(input.id(), format!("failed to encode image: {}", e)))?;

        if encoded.len() < bytes.len() {
            tracing::debug!(
                artifact = input.id(),
                before = bytes.len(),
                after = encoded.len(),
                saved = bytes.len() - encoded.len(),
                "compressed image"
            );
            Ok(input.derive(input.id(), ArtifactKind::RasterImage, encoded))
        } else {
            tracing::debug!(artifact = input.id(), size = bytes.len(), "already optimal");
            Ok(input.clone())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Encoding {
    Png(PngCompression),
    Jpeg(u8),
}

fn encode_png(img: &DynamicImage, compression: PngCompression) -> ImageResult<Vec<u8>> {
    let compression = match compression {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive).write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        img.color(),
    )?;
    Ok(out)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    match img.color() {
        ColorType::L8 => encoder.write_image(img.as_bytes(), img.width(), img.height(), ColorType::L8)?,
        _ => {
            let rgb = img.to_rgb8();
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?
        }
    }
    Ok(out)
}

impl Transform for Compress {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        inputs.iter().map(|input| self.compress(input, ctx).map(Produced::new)).collect()
    }
}

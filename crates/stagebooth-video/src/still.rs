//! Still encoding for captured composites.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use crate::VideoError;

/// Output format of a captured still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg {
        quality: u8,
    },
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

/// A final encoded composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl CapturedImage {
    /// `data:` URL form, suitable for handing straight to a web view.
    pub fn to_data_url(&self) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{b64}", self.format.mime_type())
    }
}

/// Encode `canvas` into `format`. JPEG drops the alpha channel.
pub fn encode(canvas: &RgbaImage, format: ImageFormat) -> Result<CapturedImage, VideoError> {
    let (width, height) = canvas.dimensions();
    let mut bytes = Vec::with_capacity((width as usize) * (height as usize) / 4);

    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                canvas.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        ImageFormat::Jpeg { quality } => {
            let rgb = DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
        }
    }

    tracing::debug!(width, height, len = bytes.len(), "composite encoded as {}", format.mime_type());

    Ok(CapturedImage {
        width,
        height,
        format,
        bytes,
    })
}

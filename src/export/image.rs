use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        })
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(anyhow!(CodedError::usage(
                ErrorCode::UnsupportedFormat,
                format!("unsupported image format '{other}' (expected png, jpeg or webp)")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExportOptions {
    pub format: ImageFormat,
    /// 0.0..=1.0; only JPEG uses it.
    pub quality: f32,
    pub transparent: bool,
    pub high_quality: bool,
    /// Capture size; the engine's current size when unset.
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for ImageExportOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 0.92,
            transparent: false,
            high_quality: false,
            width: None,
            height: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageExport {
    pub format: ImageFormat,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for ImageExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageExport")
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl ImageExport {
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Summary carried by the `export-complete` event.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "mime": self.mime,
            "width": self.width,
            "height": self.height,
            "bytes": self.bytes.len(),
            "dataUrl": self.data_url(),
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write image {}", path.display()))
    }
}

pub fn jpeg_quality(quality: f32) -> u8 {
    (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encodes a captured frame. JPEG drops the alpha channel; WebP is lossless.
pub fn encode_frame(frame: &RgbaImage, format: ImageFormat, quality: f32) -> Result<ImageExport> {
    let (width, height) = frame.dimensions();
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => PngEncoder::new(&mut bytes)
            .write_image(frame.as_raw(), width, height, ExtendedColorType::Rgba8)
            .context("failed to encode png")?,
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality))
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .context("failed to encode jpeg")?;
        }
        ImageFormat::Webp => WebPEncoder::new_lossless(&mut bytes)
            .write_image(frame.as_raw(), width, height, ExtendedColorType::Rgba8)
            .context("failed to encode webp")?,
    }
    Ok(ImageExport {
        format,
        mime: format.mime(),
        bytes,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn frame() -> RgbaImage {
        RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 60, y as u8 * 80, 128, 200]))
    }

    #[test]
    fn png_keeps_alpha() {
        let export = encode_frame(&frame(), ImageFormat::Png, 0.92).expect("png");
        let decoded = image::load_from_memory(&export.bytes).expect("decode").to_rgba8();
        assert_eq!(decoded, frame());
        assert!(export.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn jpeg_quality_scales_from_unit_interval() {
        assert_eq!(jpeg_quality(0.92), 92);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(3.0), 100);
        let export = encode_frame(&frame(), ImageFormat::Jpeg, 0.5).expect("jpeg");
        assert_eq!(export.mime, "image/jpeg");
        assert_eq!(&export.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JPG".parse::<ImageFormat>().expect("jpg"), ImageFormat::Jpeg);
        assert_eq!(
            ImageFormat::from_path(Path::new("out/frame.webp")),
            Some(ImageFormat::Webp)
        );
        assert!("gif".parse::<ImageFormat>().is_err());
    }
}

//! Cropping and re-encoding frames for transport.

mod annotate;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};

use crate::error::{BridgeError, Result};
use crate::frame::Frame;
use crate::roi::RegionOfInterest;

pub use annotate::{annotate, annotate_labeled, LabelFont, SYSTEM_FONTS};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotFormat {
    #[default]
    Jpeg,
    Png,
}

impl SnapshotFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "image/jpeg",
            SnapshotFormat::Png => "image/png",
        }
    }

    fn from_image_format(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => SnapshotFormat::Png,
            _ => SnapshotFormat::Jpeg,
        }
    }
}

/// Encoded image bytes plus the dimensions that were encoded.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: SnapshotFormat,
}

impl EncodedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SnapshotEncoder {
    quality: u8,
}

impl SnapshotEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(BridgeError::config(format!(
                "jpeg quality {} is outside 1..=100",
                quality
            )));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode `frame`, cropped to `roi` when given.
    ///
    /// Waits on the frame's device fence before reading pixels. The crop
    /// buffer is dropped before returning.
    pub fn encode(
        &self,
        frame: &Frame,
        roi: Option<RegionOfInterest>,
        format: SnapshotFormat,
    ) -> Result<EncodedImage> {
        let rgb = frame
            .to_rgb_image()
            .map_err(|err| BridgeError::capture("frame buffer", err))?;
        match roi {
            Some(roi) => {
                let crop =
                    image::imageops::crop_imm(&rgb, roi.left, roi.top, roi.width(), roi.height())
                        .to_image();
                self.encode_rgb(&crop, format)
            }
            None => self.encode_rgb(&rgb, format),
        }
    }

    pub fn encode_rgb(&self, image: &RgbImage, format: SnapshotFormat) -> Result<EncodedImage> {
        let (width, height) = image.dimensions();
        let mut bytes = Vec::new();
        match format {
            SnapshotFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(image)?
            }
            SnapshotFormat::Png => PngEncoder::new(&mut bytes).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?,
        }
        Ok(EncodedImage {
            bytes,
            width,
            height,
            format,
        })
    }
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Decode an inbound JPEG or PNG payload. Other formats decode but are
/// re-encoded as JPEG.
pub fn decode_image(bytes: &[u8]) -> Result<(RgbImage, SnapshotFormat)> {
    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    Ok((decoded.into_rgb8(), SnapshotFormat::from_image_format(format)))
}

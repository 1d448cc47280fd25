//! In-memory frames produced by capture sources.
//!
//! A `Frame` lives for exactly one pipeline iteration: the source produces
//! it, inference and encoding borrow it, and it is dropped before the worker
//! sleeps. Frames are deliberately not `Clone`.
//!
//! Buffers may be written asynchronously by a device (CUDA-mapped memory on
//! the Jetson). Every host-side read goes through `host_pixels`, which first
//! waits on the attached `DeviceSync`.

mod normalize;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use normalize::normalize_to_rgb;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Gray8,
    Nv12,
}

impl PixelFormat {
    /// Buffer length for a `width` x `height` frame, `None` on overflow.
    pub fn expected_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb8 => pixels.checked_mul(3),
            PixelFormat::Rgba8 => pixels.checked_mul(4),
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        }
    }
}

/// Completes outstanding device-side writes to a frame buffer.
pub trait DeviceSync: Send + Sync {
    fn synchronize(&self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    device_sync: Option<Arc<dyn DeviceSync>>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = format
            .expected_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame of {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            device_sync: None,
            captured_at: Instant::now(),
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb8,
            device_sync: None,
            captured_at: Instant::now(),
        }
    }

    /// Attach a fence that must complete before host reads.
    pub fn with_device_sync(mut self, sync: Arc<dyn DeviceSync>) -> Self {
        self.device_sync = Some(sync);
        self
    }

    pub fn synchronize(&self) -> Result<()> {
        match &self.device_sync {
            Some(sync) => sync.synchronize().context("device synchronization failed"),
            None => Ok(()),
        }
    }

    /// Host view of the buffer after device work has completed.
    pub fn host_pixels(&self) -> Result<&[u8]> {
        self.synchronize()?;
        Ok(&self.data)
    }

    /// Copy of the frame as packed RGB8, converting from the capture format.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let pixels = self.host_pixels()?;
        let rgb = normalize_to_rgb(pixels, self.width, self.height, self.format)?;
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("rgb buffer does not match frame dimensions"))
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pixel content is never printed.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

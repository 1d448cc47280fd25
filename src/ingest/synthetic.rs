use anyhow::{anyhow, Result as AnyResult};

use super::{FrameSource, SourceStats, SourceUri};
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;

/// Synthetic RGB source for `stub://` inputs.
///
/// Draws a bright square that moves a few pixels per frame over a dark
/// gradient, so the motion backend has something to find. `fail_on_capture`
/// makes the n-th capture fail, simulating a disconnected device.
pub struct SyntheticSource {
    input: String,
    width: u32,
    height: u32,
    frame_count: u64,
    fail_on: Option<u64>,
    connected: bool,
    last_error: Option<String>,
}

impl SyntheticSource {
    pub fn new(input: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            input: input.into(),
            width,
            height,
            frame_count: 0,
            fail_on: None,
            connected: false,
            last_error: None,
        }
    }

    pub(crate) fn from_uri(input: &str, uri: &SourceUri) -> Result<Self> {
        let width = uri.param("width")?.unwrap_or(DEFAULT_WIDTH);
        let height = uri.param("height")?.unwrap_or(DEFAULT_HEIGHT);
        let mut source = Self::new(input, width.max(1), height.max(1));
        source.fail_on = uri.param("fail_on")?;
        Ok(source)
    }

    /// Fail the `call`-th capture (1-based) and every capture after it.
    pub fn fail_on_capture(mut self, call: u64) -> Self {
        self.fail_on = Some(call);
        self
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let side = (w.min(h) / 4).max(1);
        let offset = (self.frame_count as usize * 3) % w.saturating_sub(side).max(1);
        let top = (h - side) / 2;

        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * 3;
                let inside = x >= offset && x < offset + side && y >= top && y < top + side;
                let value = if inside { 230 } else { ((x + y) % 64) as u8 };
                pixels[idx] = value;
                pixels[idx + 1] = value;
                pixels[idx + 2] = value / 2;
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn input(&self) -> &str {
        &self.input
    }

    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> AnyResult<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.input,
            self.width,
            self.height
        );
        Ok(())
    }

    fn capture(&mut self) -> AnyResult<Frame> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.input));
        }
        let call = self.frame_count + 1;
        if self.fail_on.is_some_and(|n| call >= n) {
            let message = format!("synthetic capture {} failed", call);
            self.last_error = Some(message.clone());
            return Err(anyhow!(message));
        }
        self.frame_count = call;
        Frame::new(
            self.generate_pixels(),
            self.width,
            self.height,
            PixelFormat::Rgb8,
        )
    }

    fn is_healthy(&self) -> bool {
        self.connected && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            input: self.input.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_produces_frames() -> AnyResult<()> {
        let mut source = SyntheticSource::new("stub://test", 64, 48);
        source.connect()?;

        let frame = source.capture()?;
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.byte_len(), 64 * 48 * 3);
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> AnyResult<()> {
        let mut source = SyntheticSource::new("stub://test", 64, 48);
        source.connect()?;
        let a = source.capture()?.to_rgb_image()?;
        let b = source.capture()?.to_rgb_image()?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn fails_from_configured_call_onward() -> AnyResult<()> {
        let mut source = SyntheticSource::new("stub://test", 8, 8).fail_on_capture(3);
        source.connect()?;
        assert!(source.capture().is_ok());
        assert!(source.capture().is_ok());
        assert!(source.capture().is_err());
        assert!(source.capture().is_err());
        assert!(!source.is_healthy());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn capture_requires_connect() {
        let mut source = SyntheticSource::new("stub://test", 8, 8);
        assert!(source.capture().is_err());
    }
}

//! V4L2 frame source.
//!
//! Captures RGB24 frames from a local device node (e.g. /dev/video0) through
//! memory-mapped buffers. Frames are copied out of the mapped buffer before
//! the next dequeue.

use std::time::{Duration, Instant};

use anyhow::{Context, Result as AnyResult};
use ouroboros::self_referencing;

use super::{FrameSource, SourceStats, SourceUri};
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};

const BUFFER_COUNT: u32 = 4;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Input string the source was opened from.
    pub input: String,
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. 0 keeps the driver default.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            input: "/dev/video0".to_string(),
            device: "/dev/video0".to_string(),
            target_fps: 0,
            width: 640,
            height: 480,
        }
    }
}

impl V4l2Config {
    pub(crate) fn from_uri(input: &str, uri: &SourceUri) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            input: input.to_string(),
            device: uri.path.clone(),
            target_fps: uri.param("fps")?.unwrap_or(defaults.target_fps),
            width: uri.param("width")?.unwrap_or(defaults.width),
            height: uri.param("height")?.unwrap_or(defaults.height),
        })
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<V4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn input(&self) -> &str {
        &self.config.input
    }

    fn connect(&mut self) -> AnyResult<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = device
            .set_format(&format)
            .with_context(|| format!("set RGB3 format on {}", self.config.device))?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!(
                "{} does not support RGB3 capture (driver chose {})",
                self.config.device,
                format.fourcc
            );
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn capture(&mut self) -> AnyResult<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            PixelFormat::Rgb8,
        )
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            input: self.config.input.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn close(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reads_uri_params() {
        let uri = SourceUri::parse("v4l2:///dev/video1?width=1280&height=720&fps=15").unwrap();
        let config = V4l2Config::from_uri("cam", &uri).unwrap();
        assert_eq!(config.device, "/dev/video1");
        assert_eq!((config.width, config.height, config.target_fps), (1280, 720, 15));
    }

    #[test]
    fn bare_device_path_uses_defaults() {
        let uri = SourceUri::parse("/dev/video0").unwrap();
        let config = V4l2Config::from_uri("/dev/video0", &uri).unwrap();
        assert_eq!(config.device, "/dev/video0");
        assert_eq!((config.width, config.height), (640, 480));
    }

    #[test]
    fn missing_device_fails_to_connect() {
        let mut source = V4l2Source::new(V4l2Config {
            device: "/dev/video-missing".to_string(),
            ..V4l2Config::default()
        });
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
    }
}

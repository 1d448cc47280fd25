//! HTTP snapshot source.
//!
//! Fetches one JPEG (or PNG) per capture from a camera's snapshot URL.

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result as AnyResult};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpSnapshotSource {
    url: String,
    agent: Option<ureq::Agent>,
    frame_count: u64,
    last_error: Option<String>,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: None,
            frame_count: 0,
            last_error: None,
        }
    }

    fn fetch(&self, agent: &ureq::Agent) -> AnyResult<Frame> {
        let response = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot from {}", self.url));
        }
        let image = image::load_from_memory(&bytes).context("decode snapshot")?;
        Ok(Frame::from_rgb_image(image.into_rgb8()))
    }
}

impl FrameSource for HttpSnapshotSource {
    fn input(&self) -> &str {
        &self.url
    }

    fn connect(&mut self) -> AnyResult<()> {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        // A first fetch proves the URL serves an image.
        self.fetch(&agent)?;
        self.agent = Some(agent);
        self.last_error = None;
        log::info!("HttpSnapshotSource: connected to {}", self.url);
        Ok(())
    }

    fn capture(&mut self) -> AnyResult<Frame> {
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| anyhow!("{} is not connected", self.url))?;
        match self.fetch(&agent) {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(frame)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.agent.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            input: self.url.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn close(&mut self) {
        self.agent = None;
    }
}

//! Frame capture sources.
//!
//! `open_source` resolves a camera input string to a source:
//! - `stub://name?width=W&height=H&fail_on=N` synthetic frames (tests, dry runs)
//! - a local path, taken verbatim, or a percent-encoded `file://` URI to a
//!   still image or a directory of images
//! - `http(s)://` single-JPEG snapshot URLs (feature: ingest-http)
//! - `v4l2:///dev/videoN` or `/dev/videoN` (feature: ingest-v4l2)
//!
//! Sources produce one `Frame` per `capture` call and never retain it.
//! Raw frame content is never logged.

pub mod file;
#[cfg(feature = "ingest-http")]
pub mod http;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::collections::HashMap;

use anyhow::Result as AnyResult;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::frame::Frame;

pub use file::ImageFileSource;
#[cfg(feature = "ingest-http")]
pub use http::HttpSnapshotSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A capture device owned by exactly one camera worker.
pub trait FrameSource: Send {
    /// The input string this source was opened from.
    fn input(&self) -> &str;

    fn connect(&mut self) -> AnyResult<()>;

    /// Capture the next frame. Blocks until one is available.
    fn capture(&mut self) -> AnyResult<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the device. Further captures fail.
    fn close(&mut self) {}
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub input: String,
    pub last_error: Option<String>,
}

/// Parsed camera input string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SourceUri {
    pub scheme: String,
    pub path: String,
    pub params: HashMap<String, String>,
}

impl SourceUri {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BridgeError::config("camera input must not be empty"));
        }
        // Bare paths are taken verbatim: no query string, no escapes.
        if input.starts_with("/dev/video") {
            return Ok(Self::bare("v4l2", input));
        }
        if !input.contains("://") {
            return Ok(Self::bare("file", input));
        }

        let url = Url::parse(input)
            .map_err(|e| BridgeError::config(format!("invalid camera input {}: {}", input, e)))?;
        let scheme = url.scheme().to_string();
        let path = match scheme.as_str() {
            "file" => url
                .to_file_path()
                .map_err(|_| {
                    BridgeError::config(format!("camera input {} is not a local file path", input))
                })?
                .to_string_lossy()
                .into_owned(),
            _ => format!("{}{}", url.host_str().unwrap_or_default(), url.path()),
        };
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Ok(Self {
            scheme,
            path,
            params,
        })
    }

    fn bare(scheme: &str, path: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            path: path.to_string(),
            params: HashMap::new(),
        }
    }

    pub fn param<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                BridgeError::config(format!("invalid value '{}' for input parameter {}", raw, key))
            }),
        }
    }
}

/// Open the source named by `input`. Does not connect.
pub fn open_source(input: &str) -> Result<Box<dyn FrameSource>> {
    let uri = SourceUri::parse(input)?;
    match uri.scheme.as_str() {
        "stub" => Ok(Box::new(SyntheticSource::from_uri(input, &uri)?)),
        "file" => Ok(Box::new(ImageFileSource::new(input, &uri.path))),
        #[cfg(feature = "ingest-http")]
        "http" | "https" => Ok(Box::new(HttpSnapshotSource::new(input))),
        #[cfg(feature = "ingest-v4l2")]
        "v4l2" => Ok(Box::new(V4l2Source::new(V4l2Config::from_uri(input, &uri)?))),
        other => Err(BridgeError::config(format!(
            "unsupported camera input scheme '{}' in {}",
            other, input
        ))),
    }
}

//! Still-image frame source.
//!
//! Serves a single image file, or cycles through the images of a directory in
//! name order. Every capture decodes from disk, so files can be replaced
//! while the bridge runs.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result as AnyResult};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

pub struct ImageFileSource {
    input: String,
    path: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageFileSource {
    pub fn new(input: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            path: path.as_ref().to_path_buf(),
            files: Vec::new(),
            next_index: 0,
            frame_count: 0,
            last_error: None,
        }
    }

    fn load_current(&mut self) -> AnyResult<Frame> {
        let path = self
            .files
            .get(self.next_index)
            .ok_or_else(|| anyhow!("{} is not connected", self.input))?;
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .into_rgb8();
        self.next_index = (self.next_index + 1) % self.files.len();
        Ok(Frame::from_rgb_image(image))
    }
}

impl FrameSource for ImageFileSource {
    fn input(&self) -> &str {
        &self.input
    }

    fn connect(&mut self) -> AnyResult<()> {
        let files = if self.path.is_dir() {
            list_images(&self.path)?
        } else if self.path.is_file() {
            vec![self.path.clone()]
        } else {
            return Err(anyhow!("{} does not exist", self.path.display()));
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        log::info!(
            "ImageFileSource: connected to {} ({} images)",
            self.path.display(),
            files.len()
        );
        self.files = files;
        self.next_index = 0;
        Ok(())
    }

    fn capture(&mut self) -> AnyResult<Frame> {
        match self.load_current() {
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
        !self.files.is_empty() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            input: self.input.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn close(&mut self) {
        self.files.clear();
    }
}

fn list_images(dir: &Path) -> AnyResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

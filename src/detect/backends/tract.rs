#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::kind::ModelKind;
use crate::frame::Frame;

const INPUT_SIZE: u32 = 224;

/// ONNX image classifier running on the CPU through tract.
///
/// The frame is resized to the model input and scaled to `[0, 1]`. Class
/// labels are read from `<model>.labels` (one per line) when present.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: Vec<String>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_size = INPUT_SIZE;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = load_labels(&labels_path(model_path))?;
        Ok(Self {
            model,
            labels,
            input_size,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let rgb = frame.to_rgb_image()?;
        let resized = imageops::resize(&rgb, self.input_size, self.input_size, FilterType::Triangle);
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, kind: ModelKind) -> bool {
        matches!(kind, ModelKind::Classifier)
    }

    fn classify(&mut self, frame: &Frame) -> Result<(u32, f32)> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        scores
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, score)| (idx as u32, score))
            .ok_or_else(|| anyhow!("model output was empty"))
    }

    fn class_label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

fn labels_path(model_path: &Path) -> PathBuf {
    let mut path = model_path.as_os_str().to_owned();
    path.push(".labels");
    PathBuf::from(path)
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    Ok(raw.lines().map(|line| line.trim().to_string()).collect())
}

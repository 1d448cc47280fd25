use std::fmt;

use crate::detect::backend::InferenceBackend;
use crate::detect::kind::ModelKind;
use crate::detect::overlay::Overlay;
use crate::detect::result::DetectionResult;
use crate::error::{BridgeError, Result};
use crate::frame::Frame;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Everything needed to build an adapter: kind, network, threshold, backend, overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    /// Network identifier passed to the backend (model name or file path).
    pub network: String,
    pub threshold: f32,
    /// Registry name of the backend; empty selects the registry default.
    pub backend: String,
    pub overlay: Overlay,
}

impl ModelSpec {
    pub fn new(kind: ModelKind, network: impl Into<String>) -> Self {
        Self {
            kind,
            network: network.into(),
            threshold: DEFAULT_THRESHOLD,
            backend: String::new(),
            overlay: kind.default_overlay().parse().unwrap_or_default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.trim().is_empty() {
            return Err(BridgeError::config("model network must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(BridgeError::config(format!(
                "threshold {} for {} is outside [0, 1]",
                self.threshold, self.network
            )));
        }
        Ok(())
    }
}

/// Loaded model plus the parameters it was built with.
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    network: String,
    threshold: f32,
    overlay: Overlay,
}

/// Uniform `infer` over the supported model kinds, resolved once at construction.
pub enum InferenceAdapter {
    Classifier(ModelHandle),
    Detector(ModelHandle),
    PoseEstimator(ModelHandle),
}

impl InferenceAdapter {
    pub fn new(spec: &ModelSpec, mut backend: Box<dyn InferenceBackend>) -> Result<Self> {
        spec.validate()?;
        if !backend.supports(spec.kind) {
            return Err(BridgeError::config(format!(
                "backend '{}' cannot run {} models",
                backend.name(),
                spec.kind
            )));
        }
        backend
            .warm_up()
            .map_err(|err| BridgeError::inference(&spec.network, err))?;

        let handle = ModelHandle {
            backend,
            network: spec.network.clone(),
            threshold: spec.threshold,
            overlay: spec.overlay,
        };
        log::info!(
            "InferenceAdapter: loaded {} model {} (threshold {})",
            spec.kind,
            spec.network,
            spec.threshold
        );
        Ok(match spec.kind {
            ModelKind::Classifier => InferenceAdapter::Classifier(handle),
            ModelKind::Detector => InferenceAdapter::Detector(handle),
            ModelKind::PoseEstimator => InferenceAdapter::PoseEstimator(handle),
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            InferenceAdapter::Classifier(_) => ModelKind::Classifier,
            InferenceAdapter::Detector(_) => ModelKind::Detector,
            InferenceAdapter::PoseEstimator(_) => ModelKind::PoseEstimator,
        }
    }

    fn handle(&self) -> &ModelHandle {
        match self {
            InferenceAdapter::Classifier(h)
            | InferenceAdapter::Detector(h)
            | InferenceAdapter::PoseEstimator(h) => h,
        }
    }

    pub fn network(&self) -> &str {
        &self.handle().network
    }

    pub fn threshold(&self) -> f32 {
        self.handle().threshold
    }

    pub fn overlay(&self) -> Overlay {
        self.handle().overlay
    }

    pub fn backend_name(&self) -> &'static str {
        self.handle().backend.name()
    }

    /// Run the model with its configured threshold.
    pub fn run(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let threshold = self.threshold();
        self.infer(frame, threshold)
    }

    /// Run the model. Backend failures surface as `BridgeError::Inference`.
    pub fn infer(&mut self, frame: &Frame, threshold: f32) -> Result<DetectionResult> {
        let outcome = match self {
            InferenceAdapter::Classifier(h) => h
                .backend
                .classify(frame)
                .map(|(class_id, confidence)| DetectionResult::Classification {
                    class_id,
                    confidence,
                }),
            InferenceAdapter::Detector(h) => h
                .backend
                .detect(frame, threshold)
                .map(|detections| DetectionResult::Detections { detections }),
            InferenceAdapter::PoseEstimator(h) => {
                let overlay = h.overlay;
                h.backend
                    .estimate_pose(frame, &overlay)
                    .map(|poses| DetectionResult::Poses { poses })
            }
        };
        outcome.map_err(|err| BridgeError::inference(self.network(), err))
    }

    pub fn class_label(&self, class_id: u32) -> String {
        self.handle().backend.class_label(class_id)
    }

    /// Reply label for an on-demand request: the first detection's class
    /// (`None` when nothing was found), the class of a classification, or the
    /// number of poses.
    pub fn reply_label(&self, result: &DetectionResult) -> String {
        match result {
            DetectionResult::Classification { class_id, .. } => self.class_label(*class_id),
            DetectionResult::Detections { detections } => detections
                .first()
                .map(|d| self.class_label(d.class_id))
                .unwrap_or_else(|| "None".to_string()),
            DetectionResult::Poses { poses } => poses.len().to_string(),
        }
    }
}

impl fmt::Debug for InferenceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceAdapter")
            .field("kind", &self.kind())
            .field("network", &self.network())
            .field("backend", &self.backend_name())
            .field("threshold", &self.threshold())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{StubBackend, StubResponse};
    use crate::detect::result::Detection;
    use crate::frame::PixelFormat;

    fn frame() -> Frame {
        Frame::new(vec![0; 4 * 4 * 3], 4, 4, PixelFormat::Rgb8).unwrap()
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        let spec = ModelSpec::new(ModelKind::Detector, "ssd-mobilenet-v2").with_threshold(1.5);
        let err = InferenceAdapter::new(&spec, Box::new(StubBackend::new())).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn rejects_backend_without_kind_support() {
        let spec = ModelSpec::new(ModelKind::Classifier, "resnet18");
        let backend = StubBackend::new().with_kinds(&[ModelKind::Detector]);
        let err = InferenceAdapter::new(&spec, Box::new(backend)).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn detector_surfaces_backend_errors() {
        let backend = StubBackend::new();
        backend.script().push(StubResponse::Fail("cuda oom".into()));
        let spec = ModelSpec::new(ModelKind::Detector, "ssd-mobilenet-v2");
        let mut adapter = InferenceAdapter::new(&spec, Box::new(backend)).unwrap();

        let err = adapter.run(&frame()).unwrap_err();
        match err {
            BridgeError::Inference { network, cause } => {
                assert_eq!(network, "ssd-mobilenet-v2");
                assert!(cause.to_string().contains("cuda oom"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn classifier_ignores_threshold() {
        let backend = StubBackend::new();
        backend.script().push(StubResponse::Classification(7, 0.05));
        let spec = ModelSpec::new(ModelKind::Classifier, "resnet18").with_threshold(0.9);
        let mut adapter = InferenceAdapter::new(&spec, Box::new(backend)).unwrap();

        let result = adapter.run(&frame()).unwrap();
        assert_eq!(
            result,
            DetectionResult::Classification {
                class_id: 7,
                confidence: 0.05
            }
        );
    }

    #[test]
    fn reply_label_uses_first_detection() {
        let backend = StubBackend::new().with_labels(&["person", "dog"]);
        let spec = ModelSpec::new(ModelKind::Detector, "ssd-mobilenet-v2");
        let adapter = InferenceAdapter::new(&spec, Box::new(backend)).unwrap();

        let result = DetectionResult::Detections {
            detections: vec![
                Detection::new(1, 0.9, (0.0, 0.0, 1.0, 1.0)),
                Detection::new(0, 0.8, (0.0, 0.0, 1.0, 1.0)),
            ],
        };
        assert_eq!(adapter.reply_label(&result), "dog");
        assert_eq!(adapter.reply_label(&DetectionResult::empty_detections()), "None");
    }
}

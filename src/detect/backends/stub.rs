use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceBackend;
use crate::detect::kind::ModelKind;
use crate::detect::overlay::Overlay;
use crate::detect::result::{Detection, Pose};
use crate::frame::Frame;

/// Scripted reply for the stub backend.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Classification(u32, f32),
    Detections(Vec<Detection>),
    Poses(Vec<Pose>),
    Fail(String),
}

#[derive(Default)]
struct ScriptState {
    queued: VecDeque<StubResponse>,
    fallback: Option<StubResponse>,
    calls: usize,
}

/// Shared handle used to feed replies to a `StubBackend` after it has been
/// moved into a worker.
#[derive(Clone, Default)]
pub struct StubScript {
    state: Arc<Mutex<ScriptState>>,
}

impl StubScript {
    /// Queue a reply for the next call.
    pub fn push(&self, response: StubResponse) {
        if let Ok(mut state) = self.state.lock() {
            state.queued.push_back(response);
        }
    }

    /// Reply used whenever the queue is empty.
    pub fn set_fallback(&self, response: StubResponse) {
        if let Ok(mut state) = self.state.lock() {
            state.fallback = Some(response);
        }
    }

    /// Number of model calls served so far.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|state| state.calls).unwrap_or(0)
    }

    fn next(&self) -> Result<Option<StubResponse>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("stub script lock poisoned"))?;
        state.calls += 1;
        let next = state.queued.pop_front().or_else(|| state.fallback.clone());
        Ok(next)
    }
}

/// Deterministic backend for tests and dry runs. Supports every model kind.
pub struct StubBackend {
    script: StubScript,
    kinds: Vec<ModelKind>,
    labels: Vec<String>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: StubScript::default(),
            kinds: vec![
                ModelKind::Classifier,
                ModelKind::Detector,
                ModelKind::PoseEstimator,
            ],
            labels: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: StubScript) -> Self {
        self.script = script;
        self
    }

    pub fn with_kinds(mut self, kinds: &[ModelKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn script(&self) -> StubScript {
        self.script.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, kind: ModelKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn classify(&mut self, _frame: &Frame) -> Result<(u32, f32)> {
        match self.script.next()? {
            None => Ok((0, 0.0)),
            Some(StubResponse::Classification(class_id, confidence)) => Ok((class_id, confidence)),
            Some(StubResponse::Fail(message)) => Err(anyhow!(message)),
            Some(other) => Err(anyhow!("stub scripted {:?} for classify", other)),
        }
    }

    fn detect(&mut self, _frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        match self.script.next()? {
            None => Ok(Vec::new()),
            Some(StubResponse::Detections(detections)) => Ok(detections
                .into_iter()
                .filter(|d| d.confidence >= threshold)
                .collect()),
            Some(StubResponse::Fail(message)) => Err(anyhow!(message)),
            Some(other) => Err(anyhow!("stub scripted {:?} for detect", other)),
        }
    }

    fn estimate_pose(&mut self, _frame: &Frame, _overlay: &Overlay) -> Result<Vec<Pose>> {
        match self.script.next()? {
            None => Ok(Vec::new()),
            Some(StubResponse::Poses(poses)) => Ok(poses),
            Some(StubResponse::Fail(message)) => Err(anyhow!(message)),
            Some(other) => Err(anyhow!("stub scripted {:?} for estimate_pose", other)),
        }
    }

    fn class_label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

//! Periodic capture -> inference -> crop -> publish loop for one camera.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::lifecycle::{Lifecycle, LoopControl, LoopExit, Worker, WorkerEvent, WorkerState};
use crate::detect::{BackendRegistry, DetectionResult, InferenceAdapter, ModelSpec};
use crate::discovery::{sanitize_for_id, DeviceContext, EntityConfig, PublishableEntity};
use crate::error::{BridgeError, Result};
use crate::frame::Frame;
use crate::ingest::{open_source, FrameSource};
use crate::mqtt::SharedBus;
use crate::roi;
use crate::snapshot::{SnapshotEncoder, SnapshotFormat, DEFAULT_JPEG_QUALITY};

pub const DEFAULT_CAMERA_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub name: String,
    /// Source URI, see `ingest::open_source`.
    pub input: String,
    pub interval: Duration,
    pub jpeg_quality: u8,
    /// Per-frame inference; `None` publishes the raw feed only.
    pub inference: Option<ModelSpec>,
}

impl CameraSettings {
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            interval: DEFAULT_CAMERA_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            inference: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_inference(mut self, spec: ModelSpec) -> Self {
        self.inference = Some(spec);
        self
    }
}

struct InferenceEntities {
    label: PublishableEntity,
    timestamp: PublishableEntity,
    picture: PublishableEntity,
}

struct CameraEntities {
    camera: PublishableEntity,
    inference: Option<InferenceEntities>,
}

impl CameraEntities {
    fn register(bus: &SharedBus, ctx: &DeviceContext, name: &str, with_inference: bool) -> Result<Self> {
        let id = sanitize_for_id(name);
        let camera = PublishableEntity::register(
            bus.clone(),
            ctx,
            EntityConfig::camera(name, &format!("jetson_cam_{}", id)),
        )?;
        let inference = if with_inference {
            Some(InferenceEntities {
                label: PublishableEntity::register(
                    bus.clone(),
                    ctx,
                    EntityConfig::text(
                        &format!("{} Label", name),
                        &format!("jetson_cam_inference_label_{}", id),
                    ),
                )?,
                timestamp: PublishableEntity::register(
                    bus.clone(),
                    ctx,
                    EntityConfig::sensor(
                        &format!("{} Inference Timestamp", name),
                        &format!("jetson_cam_inference_timestamp_{}", id),
                    )
                    .with_device_class("timestamp"),
                )?,
                picture: PublishableEntity::register(
                    bus.clone(),
                    ctx,
                    EntityConfig::camera(
                        &format!("{} Inference", name),
                        &format!("jetson_cam_inference_picture_{}", id),
                    ),
                )?,
            })
        } else {
            None
        };
        Ok(Self { camera, inference })
    }

    fn close(&self) -> Result<()> {
        let mut first_err = None;
        let mut entities = vec![&self.camera];
        if let Some(inf) = &self.inference {
            entities.extend([&inf.label, &inf.timestamp, &inf.picture]);
        }
        for entity in entities {
            if let Err(err) = entity.close() {
                log::warn!("failed to close entity {}: {}", entity.unique_id(), err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Everything one loop iteration touches. Moves into the loop thread.
struct CameraPipeline {
    name: String,
    source: Box<dyn FrameSource>,
    adapter: Option<InferenceAdapter>,
    encoder: SnapshotEncoder,
    entities: Arc<CameraEntities>,
}

impl CameraPipeline {
    fn run_iteration(&mut self) -> Result<()> {
        let frame = self
            .source
            .capture()
            .map_err(|err| BridgeError::capture(self.source.input(), err))?;

        if let Some(result) = self.infer(&frame) {
            self.publish_inference(&frame, &result)?;
        }

        let full = self.encoder.encode(&frame, None, SnapshotFormat::Jpeg)?;
        self.entities.camera.publish_image(full.as_bytes())?;
        log::debug!(
            "{}: published {}x{} frame ({} bytes)",
            self.name,
            full.width,
            full.height,
            full.len()
        );
        Ok(())
    }

    /// Inference errors are logged and treated as an empty result so the
    /// camera feed stays live.
    fn infer(&mut self, frame: &Frame) -> Option<DetectionResult> {
        let adapter = self.adapter.as_mut()?;
        match adapter.run(frame) {
            Ok(result) => Some(result),
            Err(err) => {
                log::warn!("{}: inference failed, skipping frame: {}", self.name, err);
                Some(DetectionResult::empty_detections())
            }
        }
    }

    fn publish_inference(&self, frame: &Frame, result: &DetectionResult) -> Result<()> {
        let (Some(entities), Some(adapter)) = (&self.entities.inference, &self.adapter) else {
            return Ok(());
        };
        let boxes = result.boxes();
        let Some(region) = roi::reduce(&boxes, frame.width, frame.height) else {
            return Ok(());
        };
        let label = match result {
            DetectionResult::Poses { poses } => poses.len().to_string(),
            _ => roi::dominant_class(&boxes)
                .map(|class_id| adapter.class_label(class_id))
                .unwrap_or_default(),
        };
        let crop = self.encoder.encode(frame, Some(region), SnapshotFormat::Jpeg)?;
        entities.label.publish_state(&label)?;
        entities
            .timestamp
            .publish_state(&chrono::Local::now().to_rfc3339())?;
        entities.picture.publish_image(crop.as_bytes())?;
        log::debug!(
            "{}: {} in region {}x{} at ({}, {})",
            self.name,
            label,
            region.width(),
            region.height(),
            region.left,
            region.top
        );
        Ok(())
    }

    fn run(&mut self, control: &LoopControl, interval: Duration) -> LoopExit {
        loop {
            if control.should_stop() {
                return LoopExit::Stopped;
            }
            if let Err(err) = self.run_iteration() {
                return LoopExit::Failed(Arc::new(err));
            }
            if control.pause(interval) {
                return LoopExit::Stopped;
            }
        }
    }
}

/// Owns one capture source and its model. The bus is shared.
pub struct CameraWorker {
    settings: CameraSettings,
    bus: SharedBus,
    ctx: DeviceContext,
    registry: Arc<BackendRegistry>,
    source: Option<Box<dyn FrameSource>>,
    adapter: Option<InferenceAdapter>,
    entities: Option<Arc<CameraEntities>>,
    lifecycle: Lifecycle<CameraPipeline>,
}

impl CameraWorker {
    pub fn new(settings: CameraSettings, bus: SharedBus, ctx: DeviceContext) -> Self {
        let lifecycle = Lifecycle::new(format!("camera-{}", settings.name));
        Self {
            settings,
            bus,
            ctx,
            registry: Arc::new(BackendRegistry::with_builtins()),
            source: None,
            adapter: None,
            entities: None,
            lifecycle,
        }
    }

    /// Use `source` instead of opening `settings.input`.
    pub fn with_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a prebuilt adapter instead of building one from `settings.inference`.
    pub fn with_adapter(mut self, adapter: InferenceAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn last_exit(&self) -> Option<LoopExit> {
        self.lifecycle.last_exit()
    }
}

impl Worker for CameraWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn initialize(&mut self) -> Result<()> {
        if self.state() != WorkerState::Uninitialized {
            return Err(BridgeError::config(format!(
                "{} is already initialized",
                self.name()
            )));
        }
        let adapter = match (self.adapter.take(), &self.settings.inference) {
            (Some(adapter), _) => Some(adapter),
            (None, Some(spec)) => Some(self.registry.build_adapter(spec)?),
            (None, None) => None,
        };
        let encoder = SnapshotEncoder::new(self.settings.jpeg_quality)?;
        let mut source = match self.source.take() {
            Some(source) => source,
            None if self.settings.input.trim().is_empty() => {
                return Err(BridgeError::config(format!(
                    "{} has no input source",
                    self.name()
                )))
            }
            None => open_source(&self.settings.input)?,
        };
        source
            .connect()
            .map_err(|err| BridgeError::capture(source.input(), err))?;

        let entities = Arc::new(CameraEntities::register(
            &self.bus,
            &self.ctx,
            &self.settings.name,
            adapter.is_some(),
        )?);
        self.entities = Some(Arc::clone(&entities));
        self.lifecycle.set_ready(CameraPipeline {
            name: self.name().to_string(),
            source,
            adapter,
            encoder,
            entities,
        })
    }

    fn start(&mut self) -> Result<()> {
        let interval = self.settings.interval;
        self.lifecycle
            .start(move |pipeline, control| pipeline.run(control, interval))
    }

    fn request_stop(&mut self) -> Result<()> {
        self.lifecycle.signal_stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.lifecycle.stop()
    }

    fn close(&mut self) -> Result<()> {
        // A panicked loop took the source down with it; entities still go.
        let stopped = match self.lifecycle.close() {
            Ok(Some(mut pipeline)) => {
                pipeline.source.close();
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        let closed = match self.entities.take() {
            Some(entities) => entities.close(),
            None => Ok(()),
        };
        stopped.and(closed)
    }

    fn attach_events(&mut self, events: Sender<WorkerEvent>) {
        self.lifecycle.attach_events(events);
    }
}

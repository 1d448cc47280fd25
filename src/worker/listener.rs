//! On-demand inference: images arriving on a command topic are run through
//! a model and the label plus an annotated reply are published back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use super::lifecycle::{Lifecycle, LoopControl, LoopExit, Worker, WorkerEvent, WorkerState};
use crate::detect::{BackendRegistry, DetectionResult, InferenceAdapter, ModelSpec};
use crate::discovery::{sanitize_for_id, DeviceContext, EntityConfig, PublishableEntity};
use crate::error::{BridgeError, Result};
use crate::frame::Frame;
use crate::mqtt::{InboundMessage, MessageHandler, SharedBus};
use crate::snapshot::{annotate, annotate_labeled, decode_image, LabelFont, SnapshotEncoder};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Where inbound requests are processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// On the bus dispatch thread. A slow model stalls every subscription.
    Inline,
    /// On the listener's own thread behind a bounded queue. A full queue
    /// rejects the request with `Backpressure`.
    Queued { capacity: usize },
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch::Queued {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListenerSettings {
    pub name: String,
    pub model: ModelSpec,
    pub dispatch: Dispatch,
    /// Font for class names in label tags. None tries `SYSTEM_FONTS`.
    pub label_font: Option<PathBuf>,
}

impl ListenerSettings {
    pub fn new(name: impl Into<String>, model: ModelSpec) -> Self {
        Self {
            name: name.into(),
            model,
            dispatch: Dispatch::default(),
            label_font: None,
        }
    }

    pub fn with_label_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.label_font = Some(path.into());
        self
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }
}

struct ListenerEntities {
    label: PublishableEntity,
    picture: PublishableEntity,
}

impl ListenerEntities {
    fn register(bus: &SharedBus, ctx: &DeviceContext, name: &str) -> Result<Self> {
        let id = sanitize_for_id(name);
        let label = PublishableEntity::register(
            bus.clone(),
            ctx,
            EntityConfig::text(
                &format!("{} Inference", name),
                &format!("jetson_inference_{}", id),
            ),
        )?;
        let picture = PublishableEntity::register(
            bus.clone(),
            ctx,
            EntityConfig::camera(
                &format!("{} Inference Camera", name),
                &format!("jetson_inference_camera_{}", id),
            ),
        );
        match picture {
            Ok(picture) => Ok(Self { label, picture }),
            Err(err) => {
                let _ = label.close();
                Err(err)
            }
        }
    }

    fn close(&self) -> Result<()> {
        let label = self.label.close();
        let picture = self.picture.close();
        label.and(picture)
    }
}

/// Model plus output entities. Shared between the bus callback (inline) or
/// the queue thread (queued) and the worker, which locks it once on stop to
/// wait out an in-flight request.
struct ListenerPipeline {
    name: String,
    adapter: InferenceAdapter,
    encoder: SnapshotEncoder,
    font: Option<LabelFont>,
    entities: Arc<ListenerEntities>,
}

impl ListenerPipeline {
    fn handle(&mut self, payload: &[u8]) -> Result<()> {
        let (image, format) = decode_image(payload)?;
        let frame = Frame::from_rgb_image(image.clone());
        let result = self.adapter.run(&frame)?;
        let label = self.adapter.reply_label(&result);
        log::debug!("{}: request answered with '{}'", self.name, label);

        match &result {
            DetectionResult::Detections { detections } if detections.is_empty() => {
                self.entities.label.publish_state(&label)
            }
            DetectionResult::Classification { .. } => {
                self.entities.label.publish_state(&label)?;
                self.entities.picture.publish_image(payload)
            }
            DetectionResult::Detections { .. } | DetectionResult::Poses { .. } => {
                let mut annotated = image;
                let overlay = self.adapter.overlay();
                match &self.font {
                    Some(font) => {
                        let adapter = &self.adapter;
                        annotate_labeled(&mut annotated, &result, overlay, font, &|id| {
                            adapter.class_label(id)
                        })
                    }
                    None => annotate(&mut annotated, &result, overlay),
                }
                let reply = self.encoder.encode_rgb(&annotated, format)?;
                self.entities.label.publish_state(&label)?;
                self.entities.picture.publish_image(reply.as_bytes())
            }
        }
    }
}

fn lock(pipeline: &Mutex<ListenerPipeline>) -> MutexGuard<'_, ListenerPipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_failure(events: &Option<Sender<WorkerEvent>>, worker: &str, err: BridgeError) {
    log::warn!("{}: request failed: {}", worker, err);
    if let Some(events) = events {
        let _ = events.send(WorkerEvent::RequestFailed {
            worker: worker.to_string(),
            error: Arc::new(err),
        });
    }
}

fn drain_queue(
    requests: Receiver<Vec<u8>>,
    pipeline: Arc<Mutex<ListenerPipeline>>,
    control: &LoopControl,
    events: Option<Sender<WorkerEvent>>,
    worker: String,
) -> LoopExit {
    loop {
        select! {
            recv(requests) -> payload => {
                let Ok(payload) = payload else {
                    return LoopExit::Stopped;
                };
                if control.should_stop() {
                    return LoopExit::Stopped;
                }
                if let Err(err) = lock(&pipeline).handle(&payload) {
                    report_failure(&events, &worker, err);
                }
            }
            recv(control.stop_signal()) -> _ => return LoopExit::Stopped,
        }
    }
}

/// Answers inference requests published on its text entity's command topic.
pub struct InferenceListener {
    settings: ListenerSettings,
    bus: SharedBus,
    ctx: DeviceContext,
    registry: Arc<BackendRegistry>,
    adapter: Option<InferenceAdapter>,
    pipeline: Option<Arc<Mutex<ListenerPipeline>>>,
    entities: Option<Arc<ListenerEntities>>,
    command_topic: Option<String>,
    accepting: Arc<AtomicBool>,
    lifecycle: Lifecycle<()>,
}

impl InferenceListener {
    pub fn new(settings: ListenerSettings, bus: SharedBus, ctx: DeviceContext) -> Self {
        let lifecycle = Lifecycle::new(format!("listener-{}", settings.name));
        Self {
            settings,
            bus,
            ctx,
            registry: Arc::new(BackendRegistry::with_builtins()),
            adapter: None,
            pipeline: None,
            entities: None,
            command_topic: None,
            accepting: Arc::new(AtomicBool::new(false)),
            lifecycle,
        }
    }

    /// Use a prebuilt adapter instead of building one from `settings.model`.
    pub fn with_adapter(mut self, adapter: InferenceAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Topic requests are published to; known after `initialize`.
    pub fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }

    fn inline_handler(&self, pipeline: Arc<Mutex<ListenerPipeline>>) -> MessageHandler {
        let accepting = Arc::clone(&self.accepting);
        let events = self.lifecycle.events();
        let worker = self.name().to_string();
        Arc::new(move |message: &InboundMessage| {
            if !accepting.load(Ordering::SeqCst) {
                log::debug!("{}: dropping request after stop", worker);
                return Ok(());
            }
            if let Err(err) = lock(&pipeline).handle(&message.payload) {
                report_failure(&events, &worker, err);
            }
            Ok(())
        })
    }

    fn queued_handler(&self, requests: Sender<Vec<u8>>) -> MessageHandler {
        let accepting = Arc::clone(&self.accepting);
        let worker = self.name().to_string();
        Arc::new(move |message: &InboundMessage| {
            if !accepting.load(Ordering::SeqCst) {
                log::debug!("{}: dropping request after stop", worker);
                return Ok(());
            }
            match requests.try_send(message.payload.clone()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    log::warn!("{}: request queue full, rejecting", worker);
                    Err(BridgeError::Backpressure(worker.clone()))
                }
                Err(TrySendError::Disconnected(_)) => Err(BridgeError::NotRunning(worker.clone())),
            }
        })
    }

    fn detach(&self) -> Result<()> {
        let Some(topic) = &self.command_topic else {
            return Ok(());
        };
        let unsubscribed = self.bus.unsubscribe(topic);
        self.bus.remove_callback(topic);
        unsubscribed
    }
}

impl Worker for InferenceListener {
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
        if let Dispatch::Queued { capacity: 0 } = self.settings.dispatch {
            return Err(BridgeError::config(format!(
                "{} queue capacity must be at least 1",
                self.name()
            )));
        }
        let font = match &self.settings.label_font {
            Some(path) => Some(LabelFont::load(path)?),
            None => LabelFont::discover(),
        };
        if font.is_none() {
            log::debug!("{}: no label font, tags carry no text", self.name());
        }
        let adapter = match self.adapter.take() {
            Some(adapter) => adapter,
            None => self.registry.build_adapter(&self.settings.model)?,
        };
        let entities = Arc::new(ListenerEntities::register(
            &self.bus,
            &self.ctx,
            &self.settings.name,
        )?);
        self.command_topic = entities.label.command_topic();
        self.pipeline = Some(Arc::new(Mutex::new(ListenerPipeline {
            name: self.name().to_string(),
            adapter,
            encoder: SnapshotEncoder::default(),
            font,
            entities: Arc::clone(&entities),
        })));
        self.entities = Some(entities);
        self.lifecycle.set_ready(())
    }

    fn start(&mut self) -> Result<()> {
        let (Some(topic), Some(pipeline)) = (self.command_topic.clone(), self.pipeline.clone())
        else {
            return Err(BridgeError::config(format!(
                "{} must be initialized before start",
                self.name()
            )));
        };

        let handler = match self.settings.dispatch {
            Dispatch::Inline => {
                self.lifecycle.start_idle()?;
                self.inline_handler(pipeline)
            }
            Dispatch::Queued { capacity } => {
                let (tx, rx) = bounded(capacity);
                let events = self.lifecycle.events();
                let worker = self.name().to_string();
                self.lifecycle.start(move |_, control| {
                    drain_queue(rx, pipeline, control, events, worker)
                })?;
                self.queued_handler(tx)
            }
        };

        self.accepting.store(true, Ordering::SeqCst);
        self.bus.register_callback(&topic, handler);
        if let Err(err) = self.bus.subscribe(&topic) {
            self.accepting.store(false, Ordering::SeqCst);
            self.bus.remove_callback(&topic);
            let _ = self.lifecycle.stop();
            return Err(err);
        }
        log::info!("{}: listening on {}", self.name(), topic);
        Ok(())
    }

    fn request_stop(&mut self) -> Result<()> {
        self.lifecycle.signal_stop()?;
        self.accepting.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.lifecycle.signal_stop()?;
        self.accepting.store(false, Ordering::SeqCst);
        let detached = self.detach();
        if let Some(pipeline) = &self.pipeline {
            drop(lock(pipeline));
        }
        self.lifecycle.join()?;
        detached
    }

    fn close(&mut self) -> Result<()> {
        if self.state() == WorkerState::Closed {
            return Ok(());
        }
        let stopped = match self.stop() {
            Ok(()) | Err(BridgeError::NotRunning(_)) => Ok(()),
            Err(err) => Err(err),
        };
        let closed = match self.entities.take() {
            Some(entities) => entities.close(),
            None => Ok(()),
        };
        self.pipeline = None;
        self.lifecycle.close()?;
        stopped.and(closed)
    }

    fn attach_events(&mut self, events: Sender<WorkerEvent>) {
        self.lifecycle.attach_events(events);
    }
}

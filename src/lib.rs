//! Jetson Nano to Home Assistant bridge.
//!
//! Captures frames from one or more cameras, optionally runs an inference
//! model on each, and publishes snapshots, labels and board telemetry to an
//! MQTT broker as Home Assistant discovery entities.
//!
//! # Module Structure
//!
//! - `frame`: captured frames and pixel normalisation
//! - `ingest`: frame sources (synthetic, still files, HTTP snapshots, V4L2)
//! - `detect`: model kinds, the inference adapter and its backends
//! - `roi`: reduction of detections to one crop region
//! - `snapshot`: JPEG/PNG encoding and overlay annotation
//! - `telemetry`: board metrics and identity
//! - `mqtt`: the message bus and its rumqttc and in-memory implementations
//! - `discovery`: Home Assistant entities
//! - `worker`: camera, hardware and listener workers plus their supervisor
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod mqtt;
pub mod roi;
pub mod snapshot;
pub mod telemetry;
pub mod worker;

pub use config::BridgeConfig;
pub use detect::{
    BackendRegistry, Detection, DetectionResult, InferenceAdapter, InferenceBackend, ModelKind,
    ModelSpec, Overlay,
};
pub use discovery::{DeviceContext, DeviceInfo, EntityConfig, PublishableEntity, TopicScheme};
pub use error::{BridgeError, Result};
pub use frame::{Frame, PixelFormat};
pub use ingest::{open_source, FrameSource};
pub use mqtt::{MemoryBus, MessageBus, MqttBus, SharedBus};
pub use roi::RegionOfInterest;
pub use snapshot::{EncodedImage, SnapshotEncoder, SnapshotFormat};
pub use telemetry::{BoardInfo, TelemetrySnapshot, TelemetrySource};
pub use worker::{
    CameraSettings, CameraWorker, Dispatch, HardwareSensorWorker, InferenceListener,
    ListenerSettings, Supervisor, Worker, WorkerEvent, WorkerState,
};

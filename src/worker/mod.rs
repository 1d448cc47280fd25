//! Independently lifecycled loops: one per camera, one for board telemetry,
//! one per inference listener, and the supervisor that owns them.

pub mod camera;
pub mod hardware;
pub mod lifecycle;
pub mod listener;
pub mod supervisor;

pub use camera::{CameraSettings, CameraWorker, DEFAULT_CAMERA_INTERVAL};
pub use hardware::{HardwareSensorWorker, DEFAULT_HARDWARE_INTERVAL};
pub use lifecycle::{Lifecycle, LoopControl, LoopExit, Worker, WorkerEvent, WorkerState};
pub use listener::{Dispatch, InferenceListener, ListenerSettings, DEFAULT_QUEUE_CAPACITY};
pub use supervisor::Supervisor;

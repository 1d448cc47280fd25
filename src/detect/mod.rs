mod adapter;
mod backend;
pub mod backends;
mod kind;
mod overlay;
mod registry;
mod result;

pub use adapter::{InferenceAdapter, ModelHandle, ModelSpec, DEFAULT_THRESHOLD};
pub use backend::InferenceBackend;
pub use backends::{MotionBackend, StubBackend, StubResponse, StubScript};
pub use kind::ModelKind;
pub use overlay::Overlay;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{Detection, DetectionResult, Keypoint, Pose};

//! Error taxonomy shared by every worker and collaborator wrapper.
//!
//! Backends (capture devices, model runtimes, the MQTT client) report failures
//! as `anyhow::Error`; the bridge wraps them into a `BridgeError` variant that
//! says which stage failed so supervisors can decide what is fatal.

use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid configuration: unknown model kind, missing input source, bad threshold.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The frame or telemetry source failed. Ends the owning worker loop.
    #[error("capture failed on {input}: {cause:#}")]
    Capture { input: String, cause: anyhow::Error },

    /// The model call failed.
    #[error("inference failed on {network}: {cause:#}")]
    Inference {
        network: String,
        cause: anyhow::Error,
    },

    /// The message bus rejected a publish or subscription change.
    #[error("publish to {topic} failed: {cause:#}")]
    Publish { topic: String, cause: anyhow::Error },

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("{0} is not running")]
    NotRunning(String),

    /// The listener request queue is full.
    #[error("{0} request queue is full")]
    Backpressure(String),

    #[error("{0} worker thread panicked")]
    WorkerPanicked(String),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn capture(input: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Capture {
            input: input.into(),
            cause: cause.into(),
        }
    }

    pub fn inference(network: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Inference {
            network: network.into(),
            cause: cause.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Publish {
            topic: topic.into(),
            cause: cause.into(),
        }
    }

    /// False for lifecycle misuse and listener backpressure, which leave the
    /// worker untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyRunning(_) | Self::NotRunning(_) | Self::Backpressure(_)
        )
    }
}

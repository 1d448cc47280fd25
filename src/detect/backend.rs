use anyhow::{anyhow, Result};

use crate::detect::kind::ModelKind;
use crate::detect::overlay::Overlay;
use crate::detect::result::{Detection, Pose};
use crate::frame::Frame;

/// Model runtime behind an `InferenceAdapter`.
///
/// A backend instance is owned by exactly one adapter and is only ever called
/// from that adapter's worker thread. Implementations read the frame through
/// `Frame::host_pixels` or `Frame::to_rgb_image`, never keep it past the call,
/// and apply the confidence threshold themselves for detection and pose
/// models.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can run the given model kind.
    fn supports(&self, kind: ModelKind) -> bool;

    /// Best class for the frame, regardless of threshold.
    fn classify(&mut self, _frame: &Frame) -> Result<(u32, f32)> {
        Err(anyhow!("{} does not support classification", self.name()))
    }

    fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
        Err(anyhow!("{} does not support detection", self.name()))
    }

    /// `overlay` lets device-side runtimes render in place; host backends may ignore it.
    fn estimate_pose(&mut self, _frame: &Frame, _overlay: &Overlay) -> Result<Vec<Pose>> {
        Err(anyhow!("{} does not support pose estimation", self.name()))
    }

    fn class_label(&self, class_id: u32) -> String {
        format!("class_{}", class_id)
    }

    /// Optional warm-up hook, run once when the adapter is built.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

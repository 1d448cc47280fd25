use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Model kinds the bridge knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Classifier,
    Detector,
    PoseEstimator,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Classifier => "classifier",
            ModelKind::Detector => "detector",
            ModelKind::PoseEstimator => "pose",
        }
    }

    /// Overlay drawn on listener replies when none is configured.
    pub fn default_overlay(self) -> &'static str {
        match self {
            ModelKind::Classifier => "none",
            ModelKind::Detector => "box,labels,conf",
            ModelKind::PoseEstimator => "links,keypoints",
        }
    }

    /// Whether the model applies the confidence threshold itself.
    pub fn uses_threshold(self) -> bool {
        !matches!(self, ModelKind::Classifier)
    }
}

impl FromStr for ModelKind {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "classifier" | "classification" | "imagenet" => Ok(ModelKind::Classifier),
            "detector" | "detection" | "detectnet" => Ok(ModelKind::Detector),
            "pose" | "pose-estimator" | "pose_estimator" | "posenet" => {
                Ok(ModelKind::PoseEstimator)
            }
            other => Err(BridgeError::config(format!(
                "unsupported model kind '{}' (expected classifier, detector or pose)",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_aliases() {
        assert_eq!("detectNet".parse::<ModelKind>().unwrap(), ModelKind::Detector);
        assert_eq!("imageNet".parse::<ModelKind>().unwrap(), ModelKind::Classifier);
        assert_eq!(" poseNet ".parse::<ModelKind>().unwrap(), ModelKind::PoseEstimator);
    }

    #[test]
    fn rejects_unknown_kind_as_configuration_error() {
        let err = "segNet".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(err.to_string().contains("segnet"));
    }
}

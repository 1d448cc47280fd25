use serde::Serialize;

/// One model-reported bounding box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bounds: (f32, f32, f32, f32)) -> Self {
        let (left, top, right, bottom) = bounds;
        Self {
            class_id,
            confidence,
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Keypoint {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

/// Pose-estimator output. Links index into `keypoints`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub links: Vec<(usize, usize)>,
}

impl Pose {
    /// Bounding box of all keypoints, `None` for an empty pose.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.keypoints.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.keypoints.iter().fold(init, |(l, t, r, b), kp| {
            (l.min(kp.x), t.min(kp.y), r.max(kp.x), b.max(kp.y))
        }))
    }
}

/// Uniform inference output, one shape per model kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionResult {
    Classification { class_id: u32, confidence: f32 },
    Detections { detections: Vec<Detection> },
    Poses { poses: Vec<Pose> },
}

impl DetectionResult {
    pub fn empty_detections() -> Self {
        DetectionResult::Detections {
            detections: Vec::new(),
        }
    }

    /// Boxes usable for region reduction. Poses contribute their keypoint bounds;
    /// classifications have no geometry.
    pub fn boxes(&self) -> Vec<Detection> {
        match self {
            DetectionResult::Classification { .. } => Vec::new(),
            DetectionResult::Detections { detections } => detections.clone(),
            DetectionResult::Poses { poses } => poses
                .iter()
                .filter_map(|pose| pose.bounds().map(|b| Detection::new(0, 1.0, b)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DetectionResult::Classification { .. } => false,
            DetectionResult::Detections { detections } => detections.is_empty(),
            DetectionResult::Poses { poses } => poses.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_bounds_cover_all_keypoints() {
        let pose = Pose {
            keypoints: vec![
                Keypoint { id: 0, x: 10.0, y: 40.0 },
                Keypoint { id: 1, x: 25.0, y: 12.0 },
                Keypoint { id: 2, x: 18.0, y: 55.0 },
            ],
            links: vec![(0, 1), (1, 2)],
        };
        assert_eq!(pose.bounds(), Some((10.0, 12.0, 25.0, 55.0)));
        assert_eq!(Pose::default().bounds(), None);
    }

    #[test]
    fn classification_has_no_boxes() {
        let result = DetectionResult::Classification {
            class_id: 3,
            confidence: 0.2,
        };
        assert!(result.boxes().is_empty());
        assert!(!result.is_empty());
    }
}

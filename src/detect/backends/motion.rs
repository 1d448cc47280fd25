use anyhow::Result;

use crate::detect::backend::InferenceBackend;
use crate::detect::kind::ModelKind;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Per-pixel luma change that counts as motion.
const PIXEL_DELTA: u8 = 25;
/// Changed-pixel fraction reported with full confidence.
const FULL_CONFIDENCE_FRACTION: f32 = 0.01;

/// CPU frame-difference detector.
///
/// Compares each frame with the previous one and reports a single `motion`
/// box around the changed pixels. The first frame only primes the baseline.
#[derive(Default)]
pub struct MotionBackend {
    previous: Option<(u32, u32, Vec<u8>)>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn supports(&self, kind: ModelKind) -> bool {
        matches!(kind, ModelKind::Detector)
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let luma = to_luma(frame)?;
        let detection = match &self.previous {
            Some((w, h, prev)) if *w == frame.width && *h == frame.height => {
                changed_region(prev, &luma, frame.width)
            }
            _ => None,
        };
        self.previous = Some((frame.width, frame.height, luma));

        Ok(detection
            .filter(|d| d.confidence >= threshold)
            .into_iter()
            .collect())
    }

    fn class_label(&self, _class_id: u32) -> String {
        "motion".to_string()
    }
}

fn changed_region(previous: &[u8], current: &[u8], width: u32) -> Option<Detection> {
    let mut changed = 0usize;
    let (mut left, mut top, mut right, mut bottom) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (idx, (a, b)) in current.iter().zip(previous.iter()).enumerate() {
        if a.abs_diff(*b) < PIXEL_DELTA {
            continue;
        }
        changed += 1;
        let x = (idx % width as usize) as u32;
        let y = (idx / width as usize) as u32;
        left = left.min(x);
        top = top.min(y);
        right = right.max(x + 1);
        bottom = bottom.max(y + 1);
    }
    if changed == 0 {
        return None;
    }

    let fraction = changed as f32 / current.len() as f32;
    let confidence = (fraction / FULL_CONFIDENCE_FRACTION).min(1.0);
    Some(Detection::new(
        0,
        confidence,
        (left as f32, top as f32, right as f32, bottom as f32),
    ))
}

fn to_luma(frame: &Frame) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb_image()?;
    Ok(rgb
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn gray_frame(width: u32, height: u32, block: Option<(u32, u32, u32)>) -> Frame {
        let mut data = vec![20u8; (width * height) as usize];
        if let Some((bx, by, size)) = block {
            for y in by..by + size {
                for x in bx..bx + size {
                    data[(y * width + x) as usize] = 220;
                }
            }
        }
        Frame::new(data, width, height, PixelFormat::Gray8).unwrap()
    }

    #[test]
    fn motion_backend_boxes_changed_region() {
        let mut backend = MotionBackend::new();

        let first = backend.detect(&gray_frame(64, 64, None), 0.5).unwrap();
        assert!(first.is_empty());

        let second = backend
            .detect(&gray_frame(64, 64, Some((20, 30, 10))), 0.5)
            .unwrap();
        assert_eq!(second.len(), 1);
        let d = &second[0];
        assert_eq!((d.left, d.top, d.right, d.bottom), (20.0, 30.0, 30.0, 40.0));
        assert_eq!(d.confidence, 1.0);

        let third = backend
            .detect(&gray_frame(64, 64, Some((20, 30, 10))), 0.5)
            .unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn size_change_resets_baseline() {
        let mut backend = MotionBackend::new();
        backend.detect(&gray_frame(8, 8, None), 0.0).unwrap();
        let result = backend.detect(&gray_frame(16, 16, Some((0, 0, 4))), 0.0).unwrap();
        assert!(result.is_empty());
    }
}

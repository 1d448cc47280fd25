//! Folding detections into one crop rectangle.

use serde::Serialize;

use crate::detect::Detection;

/// Axis-aligned crop rectangle in whole pixels.
///
/// Always satisfies `left <= right < width` and `top <= bottom < height` for
/// the frame it was reduced against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegionOfInterest {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl RegionOfInterest {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Union bounding box of `detections`, truncated to whole pixels and clamped
/// to the frame. Returns `None` for an empty list or a box with zero width or
/// height after clamping.
pub fn reduce(
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
) -> Option<RegionOfInterest> {
    if frame_width == 0 || frame_height == 0 {
        return None;
    }
    let first = detections.first()?;
    let init = (first.left, first.top, first.right, first.bottom);
    let (left, top, right, bottom) = detections.iter().fold(init, |(l, t, r, b), d| {
        (l.min(d.left), t.min(d.top), r.max(d.right), b.max(d.bottom))
    });

    let roi = RegionOfInterest {
        left: clamp_coord(left, frame_width),
        top: clamp_coord(top, frame_height),
        right: clamp_coord(right, frame_width),
        bottom: clamp_coord(bottom, frame_height),
    };
    if roi.right <= roi.left || roi.bottom <= roi.top {
        return None;
    }
    Some(roi)
}

/// Class reported alongside the region: the last detection in iteration order.
pub fn dominant_class(detections: &[Detection]) -> Option<u32> {
    detections.last().map(|d| d.class_id)
}

fn clamp_coord(value: f32, extent: u32) -> u32 {
    // `as` truncates toward zero and maps NaN to 0.
    (value as i64).clamp(0, extent as i64 - 1) as u32
}

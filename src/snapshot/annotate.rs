use std::path::Path;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::rect::Rect;

use crate::detect::{Detection, DetectionResult, Overlay, Pose};
use crate::error::{BridgeError, Result};

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([0, 200, 83]),
    Rgb([41, 121, 255]),
    Rgb([255, 145, 0]),
    Rgb([213, 0, 249]),
    Rgb([255, 23, 68]),
    Rgb([0, 229, 255]),
];
const LINK_COLOR: Rgb<u8> = Rgb([255, 235, 59]);
const KEYPOINT_COLOR: Rgb<u8> = Rgb([0, 229, 255]);
const KEYPOINT_RADIUS: i32 = 3;
const TAG_HEIGHT: u32 = 6;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SIZE: f32 = 14.0;

/// Fonts tried when no label font is configured (L4T ships DejaVu).
pub const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

/// TrueType font used to write class names into label tags.
pub struct LabelFont {
    font: FontVec,
    scale: PxScale,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            BridgeError::config(format!("read label font {}: {}", path.display(), e))
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| {
            BridgeError::config(format!("invalid label font {}: {}", path.display(), e))
        })?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_SIZE),
        })
    }

    /// First loadable entry of `SYSTEM_FONTS`.
    pub fn discover() -> Option<Self> {
        SYSTEM_FONTS
            .iter()
            .find_map(|path| Self::load(Path::new(path)).ok())
    }

    fn line_height(&self) -> u32 {
        self.scale.y.ceil() as u32
    }

    fn text_width(&self, text: &str) -> u32 {
        let scaled = self.font.as_scaled(self.scale);
        let width: f32 = text
            .chars()
            .map(|c| scaled.h_advance(scaled.glyph_id(c)))
            .sum();
        width.ceil() as u32
    }
}

/// Class names for label tags.
type LabelText<'a> = (&'a LabelFont, &'a dyn Fn(u32) -> String);

/// Draw `result` onto `image` according to `overlay`.
///
/// `labels` draws a class-coloured tag above each box and `conf` a bar whose
/// length is the detection confidence times the box width. Tags carry no text;
/// see `annotate_labeled`.
pub fn annotate(image: &mut RgbImage, result: &DetectionResult, overlay: Overlay) {
    draw_result(image, result, overlay, None);
}

/// Like `annotate`, with `label_of(class_id)` written into each label tag.
pub fn annotate_labeled(
    image: &mut RgbImage,
    result: &DetectionResult,
    overlay: Overlay,
    font: &LabelFont,
    label_of: &dyn Fn(u32) -> String,
) {
    draw_result(image, result, overlay, Some((font, label_of)));
}

fn draw_result(
    image: &mut RgbImage,
    result: &DetectionResult,
    overlay: Overlay,
    text: Option<LabelText<'_>>,
) {
    match result {
        DetectionResult::Classification { .. } => {}
        DetectionResult::Detections { detections } => {
            for detection in detections {
                draw_detection(image, detection, overlay, text);
            }
        }
        DetectionResult::Poses { poses } => {
            for pose in poses {
                draw_pose(image, pose, overlay);
            }
        }
    }
}

fn class_color(class_id: u32) -> Rgb<u8> {
    PALETTE[class_id as usize % PALETTE.len()]
}

fn draw_detection(
    image: &mut RgbImage,
    detection: &Detection,
    overlay: Overlay,
    text: Option<LabelText<'_>>,
) {
    let color = class_color(detection.class_id);
    let left = detection.left.max(0.0) as i32;
    let top = detection.top.max(0.0) as i32;
    let width = detection.width().max(0.0) as u32;
    let height = detection.height().max(0.0) as u32;
    if width == 0 || height == 0 {
        return;
    }

    if overlay.boxes {
        draw_hollow_rect_mut(image, Rect::at(left, top).of_size(width, height), color);
    }
    let tag_top = (top - TAG_HEIGHT as i32).max(0);
    if overlay.labels {
        match text {
            Some((font, label_of)) => {
                let label = label_of(detection.class_id);
                let height = font.line_height();
                let text_top = (top - height as i32).max(0);
                let tag_width = (font.text_width(&label) + 2).max(1);
                draw_filled_rect_mut(
                    image,
                    Rect::at(left, text_top).of_size(tag_width, height),
                    color,
                );
                draw_text_mut(image, TEXT_COLOR, left + 1, text_top, font.scale, &font.font, &label);
            }
            None => {
                let tag_width = (width / 3).max(1);
                draw_filled_rect_mut(
                    image,
                    Rect::at(left, tag_top).of_size(tag_width, TAG_HEIGHT),
                    color,
                );
            }
        }
    }
    if overlay.confidence {
        let bar = (detection.confidence.clamp(0.0, 1.0) * width as f32) as u32;
        if bar > 0 {
            draw_filled_rect_mut(image, Rect::at(left, tag_top).of_size(bar, 2), color);
        }
    }
}

fn draw_pose(image: &mut RgbImage, pose: &Pose, overlay: Overlay) {
    if overlay.links {
        for &(a, b) in &pose.links {
            if let (Some(from), Some(to)) = (pose.keypoints.get(a), pose.keypoints.get(b)) {
                draw_line_segment_mut(image, (from.x, from.y), (to.x, to.y), LINK_COLOR);
            }
        }
    }
    if overlay.keypoints {
        for kp in &pose.keypoints {
            draw_filled_circle_mut(
                image,
                (kp.x as i32, kp.y as i32),
                KEYPOINT_RADIUS,
                KEYPOINT_COLOR,
            );
        }
    }
    if overlay.boxes {
        if let Some((l, t, r, b)) = pose.bounds() {
            let (w, h) = ((r - l) as u32, (b - t) as u32);
            if w > 0 && h > 0 {
                draw_hollow_rect_mut(image, Rect::at(l as i32, t as i32).of_size(w, h), LINK_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Keypoint;

    #[test]
    fn box_overlay_paints_outline_only() {
        let mut image = RgbImage::new(32, 32);
        let result = DetectionResult::Detections {
            detections: vec![Detection::new(0, 0.9, (4.0, 8.0, 20.0, 24.0))],
        };
        annotate(&mut image, &result, "box".parse().unwrap());

        assert_eq!(*image.get_pixel(4, 8), PALETTE[0]);
        assert_eq!(*image.get_pixel(12, 16), Rgb([0, 0, 0]));
    }

    #[test]
    fn empty_overlay_leaves_image_untouched() {
        let mut image = RgbImage::new(16, 16);
        let result = DetectionResult::Detections {
            detections: vec![Detection::new(2, 0.9, (1.0, 1.0, 10.0, 10.0))],
        };
        annotate(&mut image, &result, Overlay::none());
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn label_font_rejects_non_font_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"not a font").unwrap();
        assert!(matches!(
            LabelFont::load(file.path()),
            Err(BridgeError::Configuration(_))
        ));
        assert!(matches!(
            LabelFont::load(Path::new("/nonexistent/font.ttf")),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn labeled_tags_carry_class_text() {
        // Needs a TrueType font on the host.
        let Some(font) = LabelFont::discover() else {
            return;
        };
        let mut image = RgbImage::new(96, 64);
        let result = DetectionResult::Detections {
            detections: vec![Detection::new(0, 0.9, (4.0, 30.0, 90.0, 60.0))],
        };
        annotate_labeled(&mut image, &result, "labels".parse().unwrap(), &font, &|id| {
            format!("person{}", id)
        });

        let tag_top = 30 - font.line_height();
        let tag_width = font.text_width("person0") + 2;
        let mut tag = 0;
        let mut text = 0;
        for y in tag_top..30 {
            for x in 4..4 + tag_width {
                match *image.get_pixel(x, y) {
                    p if p == PALETTE[0] => tag += 1,
                    _ => text += 1,
                }
            }
        }
        assert!(tag > 0, "no tag background drawn");
        assert!(text > 0, "no label text drawn");
        // Nothing outside the tag row above the box.
        assert_eq!(*image.get_pixel(4 + tag_width + 2, tag_top), Rgb([0, 0, 0]));
    }

    #[test]
    fn keypoints_are_drawn() {
        let mut image = RgbImage::new(32, 32);
        let pose = Pose {
            keypoints: vec![
                Keypoint { id: 0, x: 8.0, y: 8.0 },
                Keypoint { id: 1, x: 24.0, y: 8.0 },
            ],
            links: vec![(0, 1), (1, 7)],
        };
        let result = DetectionResult::Poses { poses: vec![pose] };
        annotate(&mut image, &result, "links,keypoints".parse().unwrap());

        assert_eq!(*image.get_pixel(8, 8), KEYPOINT_COLOR);
        assert_eq!(*image.get_pixel(16, 8), LINK_COLOR);
    }
}

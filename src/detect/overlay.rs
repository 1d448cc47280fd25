use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Which annotations to draw on an inference reply image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Overlay {
    pub boxes: bool,
    pub labels: bool,
    pub confidence: bool,
    pub links: bool,
    pub keypoints: bool,
}

impl Overlay {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }
}

impl FromStr for Overlay {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut overlay = Overlay::none();
        for flag in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag.to_ascii_lowercase().as_str() {
                "box" | "boxes" | "lines" => overlay.boxes = true,
                "labels" => overlay.labels = true,
                "conf" => overlay.confidence = true,
                "links" => overlay.links = true,
                "keypoints" => overlay.keypoints = true,
                "none" => {}
                other => {
                    return Err(BridgeError::config(format!(
                        "unknown overlay flag '{}'",
                        other
                    )))
                }
            }
        }
        Ok(overlay)
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = [
            (self.boxes, "box"),
            (self.labels, "labels"),
            (self.confidence, "conf"),
            (self.links, "links"),
            (self.keypoints, "keypoints"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
        if flags.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&flags.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_default() {
        let overlay: Overlay = "box,labels,conf".parse().unwrap();
        assert!(overlay.boxes && overlay.labels && overlay.confidence);
        assert!(!overlay.links && !overlay.keypoints);
        assert_eq!(overlay.to_string(), "box,labels,conf");
    }

    #[test]
    fn lines_is_an_alias_for_box() {
        let overlay: Overlay = "lines, labels".parse().unwrap();
        assert!(overlay.boxes);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!("box,mask".parse::<Overlay>().is_err());
    }

    #[test]
    fn none_parses_to_empty() {
        assert!("none".parse::<Overlay>().unwrap().is_empty());
        assert!("".parse::<Overlay>().unwrap().is_empty());
    }
}

use serde::Serialize;

use crate::telemetry::BoardInfo;

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_STATE_PREFIX: &str = "jetson";
pub const DEFAULT_MANUFACTURER: &str = "NVIDIA";

/// Home Assistant device block attached to every discovery document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

impl DeviceInfo {
    /// Device block for `name`, identified by model and serial as read from
    /// the board. Falls back to the name when the board has no serial.
    pub fn from_board(name: &str, board: &BoardInfo) -> Self {
        let model = board.model_or_default();
        let mut identifiers = vec![model.clone()];
        match &board.serial {
            Some(serial) => identifiers.push(serial.clone()),
            None => identifiers.push(name.to_string()),
        }
        Self {
            identifiers,
            name: name.to_string(),
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            model,
            serial_number: board.serial.clone(),
            sw_version: board.l4t_release.clone(),
        }
    }
}

/// Topic roots shared by all entities of one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicScheme {
    pub discovery_prefix: String,
    pub state_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
        }
    }
}

impl TopicScheme {
    pub fn availability_topic(&self) -> String {
        format!("{}/status", self.state_prefix)
    }
}

/// Everything an entity needs to register itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceContext {
    pub device: DeviceInfo,
    /// Stable prefix for unique ids.
    pub device_id: String,
    pub topics: TopicScheme,
}

impl DeviceContext {
    pub fn new(device: DeviceInfo, topics: TopicScheme) -> Self {
        let device_id = sanitize_for_id(&device.identifiers.join("_")).to_lowercase();
        Self {
            device,
            device_id,
            topics,
        }
    }
}

pub fn sanitize_for_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_for_id_replaces_special_chars() {
        assert_eq!(sanitize_for_id("front-door"), "front_door");
        assert_eq!(sanitize_for_id("Cam 1"), "Cam_1");
        assert_eq!(sanitize_for_id("camera_1"), "camera_1");
    }

    #[test]
    fn device_from_board_prefers_serial() {
        let board = BoardInfo {
            model: Some("NVIDIA Jetson Nano Developer Kit".to_string()),
            serial: Some("1422019012345".to_string()),
            l4t_release: Some("32.7.1".to_string()),
        };
        let device = DeviceInfo::from_board("Garage Nano", &board);
        assert_eq!(
            device.identifiers,
            vec!["NVIDIA Jetson Nano Developer Kit", "1422019012345"]
        );
        assert_eq!(device.sw_version.as_deref(), Some("32.7.1"));

        let ctx = DeviceContext::new(device, TopicScheme::default());
        assert_eq!(ctx.device_id, "nvidia_jetson_nano_developer_kit_1422019012345");
        assert_eq!(ctx.topics.availability_topic(), "jetson/status");
    }

    #[test]
    fn device_block_omits_unknown_fields() {
        let device = DeviceInfo::from_board("nano", &BoardInfo::default());
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["model"], "Jetson Nano");
        assert!(json.get("serial_number").is_none());
        assert!(json.get("sw_version").is_none());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use serde::Serialize;

use super::device::{sanitize_for_id, DeviceContext, DeviceInfo};
use crate::error::{BridgeError, Result};
use crate::mqtt::{SharedBus, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Sensor,
    Text,
    Camera,
}

impl EntityKind {
    pub fn component(self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::Text => "text",
            EntityKind::Camera => "camera",
        }
    }
}

/// Per-entity discovery settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityConfig {
    pub kind: EntityKind,
    pub name: String,
    pub object_id: String,
    pub unit: Option<String>,
    pub device_class: Option<String>,
}

impl EntityConfig {
    fn new(kind: EntityKind, name: &str, object_id: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            object_id: sanitize_for_id(object_id),
            unit: None,
            device_class: None,
        }
    }

    pub fn sensor(name: &str, object_id: &str) -> Self {
        Self::new(EntityKind::Sensor, name, object_id)
    }

    pub fn text(name: &str, object_id: &str) -> Self {
        Self::new(EntityKind::Text, name, object_id)
    }

    pub fn camera(name: &str, object_id: &str) -> Self {
        Self::new(EntityKind::Camera, name, object_id)
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        if !unit.is_empty() {
            self.unit = Some(unit.to_string());
        }
        self
    }

    pub fn with_device_class(mut self, device_class: &str) -> Self {
        if !device_class.is_empty() {
            self.device_class = Some(device_class.to_string());
        }
        self
    }
}

/// Home Assistant MQTT discovery document. Which topic fields are present
/// depends on the entity kind.
#[derive(Serialize)]
struct DiscoveryDocument<'a> {
    name: &'a str,
    unique_id: &'a str,
    object_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    availability_topic: &'a str,
    payload_available: &'static str,
    payload_not_available: &'static str,
    device: &'a DeviceInfo,
}

/// A registered Home Assistant entity bound to the shared bus.
///
/// Lives from `register` until `close`, which removes it from Home
/// Assistant and drops its command subscription. All methods take `&self`
/// so the entity can be shared with bus callbacks.
pub struct PublishableEntity {
    bus: SharedBus,
    config: EntityConfig,
    unique_id: String,
    base_topic: String,
    config_topic: String,
    closed: AtomicBool,
}

impl PublishableEntity {
    /// Publish the retained discovery document for `config`.
    pub fn register(bus: SharedBus, ctx: &DeviceContext, config: EntityConfig) -> Result<Self> {
        let component = config.kind.component();
        let unique_id = format!("{}_{}", ctx.device_id, config.object_id);
        let base_topic = format!(
            "{}/{}/{}",
            ctx.topics.state_prefix, component, config.object_id
        );
        let config_topic = format!(
            "{}/{}/{}/config",
            ctx.topics.discovery_prefix, component, config.object_id
        );
        let entity = Self {
            bus,
            config,
            unique_id,
            base_topic,
            config_topic,
            closed: AtomicBool::new(false),
        };

        let availability_topic = ctx.topics.availability_topic();
        let document = entity.discovery_document(&ctx.device, &availability_topic);
        let payload = serde_json::to_vec(&document)
            .map_err(|err| BridgeError::publish(&entity.config_topic, err))?;
        entity.bus.publish(&entity.config_topic, &payload, true)?;
        log::debug!(
            "registered {} {} ({})",
            component,
            entity.config.name,
            entity.unique_id
        );
        Ok(entity)
    }

    fn discovery_document<'a>(
        &'a self,
        device: &'a DeviceInfo,
        availability_topic: &'a str,
    ) -> DiscoveryDocument<'a> {
        let mut document = DiscoveryDocument {
            name: &self.config.name,
            unique_id: &self.unique_id,
            object_id: &self.config.object_id,
            state_topic: None,
            command_topic: None,
            topic: None,
            image_encoding: None,
            mode: None,
            unit_of_measurement: self.config.unit.as_deref(),
            device_class: self.config.device_class.as_deref(),
            availability_topic,
            payload_available: PAYLOAD_ONLINE,
            payload_not_available: PAYLOAD_OFFLINE,
            device,
        };
        match self.config.kind {
            EntityKind::Sensor => document.state_topic = Some(self.state_topic()),
            EntityKind::Text => {
                document.state_topic = Some(self.state_topic());
                document.command_topic = self.command_topic();
                document.mode = Some("text");
            }
            EntityKind::Camera => {
                document.topic = Some(self.image_topic());
                document.image_encoding = Some("b64");
            }
        }
        document
    }

    pub fn kind(&self) -> EntityKind {
        self.config.kind
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn config_topic(&self) -> &str {
        &self.config_topic
    }

    pub fn state_topic(&self) -> String {
        match self.config.kind {
            EntityKind::Text => format!("{}/text/state", self.base_topic),
            EntityKind::Sensor | EntityKind::Camera => format!("{}/state", self.base_topic),
        }
    }

    /// Inbound topic; only text entities accept commands.
    pub fn command_topic(&self) -> Option<String> {
        match self.config.kind {
            EntityKind::Text => Some(format!("{}/text/cmd", self.base_topic)),
            _ => None,
        }
    }

    pub fn image_topic(&self) -> String {
        format!("{}/camera", self.base_topic)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn publish_state(&self, value: &str) -> Result<()> {
        self.bus
            .publish(&self.state_topic(), value.as_bytes(), false)
    }

    /// Publish encoded image bytes as base64 on the camera topic.
    pub fn publish_image(&self, image: &[u8]) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        self.bus
            .publish(&self.image_topic(), encoded.as_bytes(), false)
    }

    /// Remove the entity from Home Assistant. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(cmd) = self.command_topic() {
            self.bus.unsubscribe(&cmd)?;
        }
        self.bus.publish(&self.config_topic, &[], true)
    }
}

impl std::fmt::Debug for PublishableEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishableEntity")
            .field("kind", &self.config.kind)
            .field("unique_id", &self.unique_id)
            .field("base_topic", &self.base_topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::TopicScheme;
    use crate::mqtt::MemoryBus;
    use crate::telemetry::BoardInfo;
    use std::sync::Arc;

    fn context() -> DeviceContext {
        DeviceContext::new(
            DeviceInfo::from_board("nano", &BoardInfo::default()),
            TopicScheme::default(),
        )
    }

    #[test]
    fn sensor_document_carries_unit_and_class() {
        let bus = Arc::new(MemoryBus::new());
        let entity = PublishableEntity::register(
            bus.clone(),
            &context(),
            EntityConfig::sensor("Jetson Temp CPU", "jetson_t_cpu")
                .with_unit("°C")
                .with_device_class("temperature"),
        )
        .unwrap();

        let config = bus.published_to("homeassistant/sensor/jetson_t_cpu/config");
        assert_eq!(config.len(), 1);
        assert!(config[0].retained);
        let doc: serde_json::Value = serde_json::from_slice(&config[0].payload).unwrap();
        assert_eq!(doc["state_topic"], "jetson/sensor/jetson_t_cpu/state");
        assert_eq!(doc["unit_of_measurement"], "°C");
        assert_eq!(doc["device_class"], "temperature");
        assert_eq!(doc["availability_topic"], "jetson/status");
        assert_eq!(doc["unique_id"], entity.unique_id());
        assert!(doc.get("command_topic").is_none());
    }

    #[test]
    fn camera_publishes_base64() {
        let bus = Arc::new(MemoryBus::new());
        let camera =
            PublishableEntity::register(bus.clone(), &context(), EntityConfig::camera("Porch", "jetson_cam_porch"))
                .unwrap();
        camera.publish_image(&[0xFF, 0xD8, 0xFF]).unwrap();

        assert_eq!(
            bus.last_payload("jetson/camera/jetson_cam_porch/camera"),
            Some(b"/9j/".to_vec())
        );
        let doc: serde_json::Value = serde_json::from_slice(
            &bus.last_payload("homeassistant/camera/jetson_cam_porch/config").unwrap(),
        )
        .unwrap();
        assert_eq!(doc["image_encoding"], "b64");
        assert_eq!(doc["topic"], "jetson/camera/jetson_cam_porch/camera");
    }

    #[test]
    fn text_close_unsubscribes_and_clears_config_once() {
        use crate::mqtt::MessageBus;

        let bus = Arc::new(MemoryBus::new());
        let text = PublishableEntity::register(
            bus.clone(),
            &context(),
            EntityConfig::text("Porch Inference", "jetson_inference_porch"),
        )
        .unwrap();
        let cmd = text.command_topic().unwrap();
        assert_eq!(cmd, "jetson/text/jetson_inference_porch/text/cmd");
        bus.subscribe(&cmd).unwrap();

        text.close().unwrap();
        text.close().unwrap();
        assert!(bus.subscriptions().is_empty());
        let config = bus.published_to(text.config_topic());
        assert_eq!(config.len(), 2);
        assert!(config[1].payload.is_empty() && config[1].retained);
    }
}

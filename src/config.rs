use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ModelKind, ModelSpec, Overlay, DEFAULT_THRESHOLD};
use crate::discovery::{
    sanitize_for_id, DeviceInfo, TopicScheme, DEFAULT_DISCOVERY_PREFIX, DEFAULT_STATE_PREFIX,
};
use crate::error::{BridgeError, Result};
use crate::mqtt::{parse_mqtt_endpoint, MqttSettings};
use crate::snapshot::DEFAULT_JPEG_QUALITY;
use crate::telemetry::{BoardInfo, StubTelemetry, SysfsTelemetry, TelemetrySource};
use crate::worker::{
    CameraSettings, Dispatch, ListenerSettings, DEFAULT_CAMERA_INTERVAL,
    DEFAULT_HARDWARE_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};

pub const CONFIG_ENV: &str = "NANO_BRIDGE_CONFIG";

const DEFAULT_DEVICE_NAME: &str = "Jetson Nano";
const DEFAULT_MQTT_BROKER: &str = "mqtt://localhost:1883";
const DEFAULT_CLIENT_ID: &str = "nano-ha-bridge";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_MAX_PACKET_BYTES: u32 = 8 * 1024 * 1024;
const DEFAULT_SYSFS_ROOT: &str = "/";

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    device: Option<DeviceConfigFile>,
    mqtt: Option<MqttConfigFile>,
    hardware: Option<HardwareConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    listeners: Option<Vec<ListenerConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    name: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    serial: Option<String>,
    sw_version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    discovery_prefix: Option<String>,
    state_prefix: Option<String>,
    keep_alive_secs: Option<u64>,
    max_packet_bytes: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct HardwareConfigFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    source: Option<String>,
    sysfs_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    kind: Option<String>,
    network: Option<String>,
    threshold: Option<f32>,
    backend: Option<String>,
    overlay: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    name: String,
    input: String,
    interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    inference: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize)]
struct ListenerConfigFile {
    name: String,
    #[serde(flatten)]
    model: ModelConfigFile,
    dispatch: Option<String>,
    queue_capacity: Option<usize>,
    label_font: Option<PathBuf>,
}

/// Identity published in every discovery document. Unset fields are read
/// from the board.
#[derive(Debug, Clone, Default)]
pub struct DeviceSettings {
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub sw_version: Option<String>,
}

impl DeviceSettings {
    pub fn device_info(&self, board: &BoardInfo) -> DeviceInfo {
        let merged = BoardInfo {
            model: self.model.clone().or_else(|| board.model.clone()),
            serial: self.serial.clone().or_else(|| board.serial.clone()),
            l4t_release: self.sw_version.clone().or_else(|| board.l4t_release.clone()),
        };
        let mut device = DeviceInfo::from_board(&self.name, &merged);
        if let Some(manufacturer) = &self.manufacturer {
            device.manufacturer = manufacturer.clone();
        }
        device
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub discovery_prefix: String,
    pub state_prefix: String,
    pub keep_alive: Duration,
    pub max_packet_bytes: u32,
}

impl MqttConfig {
    pub fn topics(&self) -> TopicScheme {
        TopicScheme {
            discovery_prefix: self.discovery_prefix.clone(),
            state_prefix: self.state_prefix.clone(),
        }
    }

    pub fn settings(&self) -> Result<MqttSettings> {
        Ok(MqttSettings {
            endpoint: parse_mqtt_endpoint(&self.broker)?,
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            max_packet_bytes: self.max_packet_bytes,
            availability_topic: self.topics().availability_topic(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Sysfs,
    Stub,
}

#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub source: TelemetryKind,
    pub sysfs_root: PathBuf,
}

impl HardwareConfig {
    pub fn telemetry_source(&self) -> Box<dyn TelemetrySource> {
        match self.source {
            TelemetryKind::Sysfs => Box::new(SysfsTelemetry::new(&self.sysfs_root)),
            TelemetryKind::Stub => Box::new(StubTelemetry::idle_nano()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device: DeviceSettings,
    pub mqtt: MqttConfig,
    pub hardware: HardwareConfig,
    pub cameras: Vec<CameraSettings>,
    pub listeners: Vec<ListenerSettings>,
}

impl BridgeConfig {
    /// Read the file named by `NANO_BRIDGE_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Read `path` (JSON, or TOML by extension), fill defaults, apply
    /// environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => BridgeConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let device_file = file.device.unwrap_or_default();
        let device = DeviceSettings {
            name: device_file
                .name
                .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            manufacturer: device_file.manufacturer,
            model: device_file.model,
            serial: device_file.serial,
            sw_version: device_file.sw_version,
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttConfig {
            broker: mqtt_file
                .broker
                .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            discovery_prefix: mqtt_file
                .discovery_prefix
                .unwrap_or_else(|| DEFAULT_DISCOVERY_PREFIX.to_string()),
            state_prefix: mqtt_file
                .state_prefix
                .unwrap_or_else(|| DEFAULT_STATE_PREFIX.to_string()),
            keep_alive: Duration::from_secs(
                mqtt_file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            max_packet_bytes: mqtt_file
                .max_packet_bytes
                .unwrap_or(DEFAULT_MAX_PACKET_BYTES),
        };

        let hardware_file = file.hardware.unwrap_or_default();
        let hardware = HardwareConfig {
            enabled: hardware_file.enabled.unwrap_or(true),
            interval: hardware_file
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HARDWARE_INTERVAL),
            source: parse_telemetry_kind(hardware_file.source.as_deref().unwrap_or("sysfs"))?,
            sysfs_root: hardware_file
                .sysfs_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
        };

        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(camera_from_file)
            .collect::<Result<Vec<_>>>()?;
        let listeners = file
            .listeners
            .unwrap_or_default()
            .into_iter()
            .map(listener_from_file)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            mqtt,
            hardware,
            cameras,
            listeners,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(broker) = std::env::var("NANO_BRIDGE_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                self.mqtt.broker = broker;
            }
        }
        if let Ok(name) = std::env::var("NANO_BRIDGE_DEVICE_NAME") {
            if !name.trim().is_empty() {
                self.device.name = name;
            }
        }
        if let Ok(enabled) = std::env::var("NANO_BRIDGE_HW_ENABLED") {
            self.hardware.enabled = parse_bool(&enabled).ok_or_else(|| {
                BridgeError::config("NANO_BRIDGE_HW_ENABLED must be true or false")
            })?;
        }
        if let Ok(interval) = std::env::var("NANO_BRIDGE_HW_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                BridgeError::config(
                    "NANO_BRIDGE_HW_INTERVAL_SECS must be an integer number of seconds",
                )
            })?;
            self.hardware.interval = Duration::from_secs(seconds);
        }
        if let Ok(prefix) = std::env::var("NANO_BRIDGE_DISCOVERY_PREFIX") {
            if !prefix.trim().is_empty() {
                self.mqtt.discovery_prefix = prefix;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            return Err(BridgeError::config("device name must not be empty"));
        }
        parse_mqtt_endpoint(&self.mqtt.broker)?;
        if self.mqtt.discovery_prefix.trim().is_empty() || self.mqtt.state_prefix.trim().is_empty()
        {
            return Err(BridgeError::config("MQTT topic prefixes must not be empty"));
        }
        if self.hardware.enabled && self.hardware.interval.is_zero() {
            return Err(BridgeError::config("hardware interval must be greater than zero"));
        }

        let mut camera_ids = HashSet::new();
        for camera in &self.cameras {
            check_name("camera", &camera.name, &mut camera_ids)?;
            if camera.input.trim().is_empty() {
                return Err(BridgeError::config(format!(
                    "camera {} has no input",
                    camera.name
                )));
            }
            if camera.interval.is_zero() {
                return Err(BridgeError::config(format!(
                    "camera {} interval must be greater than zero",
                    camera.name
                )));
            }
            if !(1..=100).contains(&camera.jpeg_quality) {
                return Err(BridgeError::config(format!(
                    "camera {} jpeg_quality {} is outside 1..=100",
                    camera.name, camera.jpeg_quality
                )));
            }
            if let Some(spec) = &camera.inference {
                spec.validate()?;
            }
        }

        let mut listener_ids = HashSet::new();
        for listener in &self.listeners {
            check_name("listener", &listener.name, &mut listener_ids)?;
            listener.model.validate()?;
            if listener.dispatch == (Dispatch::Queued { capacity: 0 }) {
                return Err(BridgeError::config(format!(
                    "listener {} queue_capacity must be at least 1",
                    listener.name
                )));
            }
        }
        Ok(())
    }
}

/// Names become entity object ids, so two names that sanitize to the same id
/// would collide in Home Assistant.
fn check_name(what: &str, name: &str, seen: &mut HashSet<String>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BridgeError::config(format!("{} name must not be empty", what)));
    }
    if !seen.insert(sanitize_for_id(name)) {
        return Err(BridgeError::config(format!(
            "duplicate {} name '{}'",
            what, name
        )));
    }
    Ok(())
}

fn model_from_file(file: ModelConfigFile, default_network: &str) -> Result<ModelSpec> {
    let kind: ModelKind = file.kind.as_deref().unwrap_or("detector").parse()?;
    let network = file
        .network
        .unwrap_or_else(|| default_network.to_string());
    let mut spec = ModelSpec::new(kind, network)
        .with_threshold(file.threshold.unwrap_or(DEFAULT_THRESHOLD));
    if let Some(backend) = file.backend {
        spec = spec.with_backend(backend);
    }
    if let Some(overlay) = file.overlay {
        spec = spec.with_overlay(overlay.parse::<Overlay>()?);
    }
    Ok(spec)
}

fn camera_from_file(file: CameraConfigFile) -> Result<CameraSettings> {
    let mut camera = CameraSettings::new(file.name, file.input)
        .with_interval(
            file.interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CAMERA_INTERVAL),
        )
        .with_jpeg_quality(file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY));
    if let Some(model) = file.inference {
        camera = camera.with_inference(model_from_file(model, "ssd-mobilenet-v2")?);
    }
    Ok(camera)
}

fn listener_from_file(file: ListenerConfigFile) -> Result<ListenerSettings> {
    let model = model_from_file(file.model, "ssd-mobilenet-v2")?;
    let dispatch = match file.dispatch.as_deref().map(str::trim) {
        None | Some("queued") => Dispatch::Queued {
            capacity: file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        },
        Some("inline") => Dispatch::Inline,
        Some(other) => {
            return Err(BridgeError::config(format!(
                "listener {} has unknown dispatch '{}' (expected inline or queued)",
                file.name, other
            )))
        }
    };
    let mut settings = ListenerSettings::new(file.name, model).with_dispatch(dispatch);
    settings.label_font = file.label_font;
    Ok(settings)
}

fn parse_telemetry_kind(value: &str) -> Result<TelemetryKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "sysfs" => Ok(TelemetryKind::Sysfs),
        "stub" => Ok(TelemetryKind::Stub),
        other => Err(BridgeError::config(format!(
            "unknown hardware source '{}' (expected sysfs or stub)",
            other
        ))),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| BridgeError::config(format!("invalid config file {}: {}", path.display(), e)))
}

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use nano_ha_bridge::config::{BridgeConfig, TelemetryKind};
use nano_ha_bridge::{BridgeError, Dispatch, ModelKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "NANO_BRIDGE_CONFIG",
        "NANO_BRIDGE_MQTT_BROKER",
        "NANO_BRIDGE_DEVICE_NAME",
        "NANO_BRIDGE_HW_ENABLED",
        "NANO_BRIDGE_HW_INTERVAL_SECS",
        "NANO_BRIDGE_DISCOVERY_PREFIX",
    ] {
        std::env::remove_var(key);
    }
}

fn write_json(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_json(
        r#"{
            "device": { "name": "Garage Nano", "manufacturer": "Seeed" },
            "mqtt": { "broker": "mqtt://10.0.0.5:1884", "state_prefix": "garage" },
            "hardware": { "interval_secs": 30, "source": "stub" },
            "cameras": [
                {
                    "name": "driveway",
                    "input": "stub://driveway",
                    "interval_ms": 500,
                    "jpeg_quality": 70,
                    "inference": { "kind": "detectNet", "network": "ssd-mobilenet-v2", "threshold": 0.6 }
                }
            ],
            "listeners": [
                { "name": "porch", "kind": "pose", "network": "resnet18-body", "dispatch": "queued", "queue_capacity": 4, "label_font": "/opt/fonts/label.ttf" },
                { "name": "door", "kind": "classifier", "network": "googlenet", "dispatch": "inline" }
            ]
        }"#,
    );

    std::env::set_var("NANO_BRIDGE_CONFIG", file.path());
    std::env::set_var("NANO_BRIDGE_MQTT_BROKER", "broker.lan");
    std::env::set_var("NANO_BRIDGE_HW_INTERVAL_SECS", "5");
    std::env::set_var("NANO_BRIDGE_DISCOVERY_PREFIX", "ha");

    let cfg = BridgeConfig::load().expect("load config");

    assert_eq!(cfg.device.name, "Garage Nano");
    assert_eq!(cfg.device.manufacturer.as_deref(), Some("Seeed"));
    assert_eq!(cfg.mqtt.broker, "broker.lan");
    assert_eq!(cfg.mqtt.discovery_prefix, "ha");
    assert_eq!(cfg.mqtt.settings().unwrap().availability_topic, "garage/status");
    assert_eq!(cfg.hardware.interval, Duration::from_secs(5));
    assert_eq!(cfg.hardware.source, TelemetryKind::Stub);

    let camera = &cfg.cameras[0];
    assert_eq!(camera.interval, Duration::from_millis(500));
    assert_eq!(camera.jpeg_quality, 70);
    let model = camera.inference.as_ref().unwrap();
    assert_eq!(model.kind, ModelKind::Detector);
    assert!((model.threshold - 0.6).abs() < f32::EPSILON);

    assert_eq!(cfg.listeners[0].model.kind, ModelKind::PoseEstimator);
    assert_eq!(cfg.listeners[0].dispatch, Dispatch::Queued { capacity: 4 });
    assert_eq!(cfg.listeners[1].dispatch, Dispatch::Inline);
    assert_eq!(
        cfg.listeners[0].label_font.as_deref(),
        Some(std::path::Path::new("/opt/fonts/label.ttf"))
    );
    assert!(cfg.listeners[1].label_font.is_none());

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    file.write_all(
        br#"
[device]
name = "Shed"

[hardware]
enabled = false

[[cameras]]
name = "shed"
input = "stub://shed"
"#,
    )
    .expect("write config");

    let cfg = BridgeConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.device.name, "Shed");
    assert!(!cfg.hardware.enabled);
    assert_eq!(cfg.cameras.len(), 1);
    assert!(cfg.cameras[0].inference.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{"cameras": [{"name": "a", "input": "stub://a", "jpeg_quality": 0}]}"#,
        r#"{"cameras": [{"name": "a", "input": "stub://a", "interval_ms": 0}]}"#,
        r#"{"cameras": [{"name": "", "input": "stub://a"}]}"#,
        r#"{"cameras": [{"name": "a", "input": "stub://a", "inference": {"kind": "segNet"}}]}"#,
        r#"{"listeners": [{"name": "a", "threshold": 1.5}]}"#,
        r#"{"listeners": [{"name": "a", "queue_capacity": 0}]}"#,
        r#"{"listeners": [{"name": "a"}, {"name": "a"}]}"#,
        r#"{"mqtt": {"broker": "mqtts://broker:8883"}}"#,
    ] {
        let file = write_json(json);
        let err = BridgeConfig::load_from(Some(file.path())).unwrap_err();
        assert!(
            matches!(err, BridgeError::Configuration(_)),
            "expected configuration error for {}: {}",
            json,
            err
        );
    }

    std::env::set_var("NANO_BRIDGE_HW_ENABLED", "sometimes");
    assert!(matches!(
        BridgeConfig::load_from(None),
        Err(BridgeError::Configuration(_))
    ));

    clear_env();
}

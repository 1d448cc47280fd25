//! Message bus: the trait workers publish through, the rumqttc client
//! behind it, and an in-memory implementation for tests.

pub mod bus;
pub mod callbacks;
pub mod client;
pub mod endpoint;
pub mod memory;

pub use bus::{InboundMessage, MessageBus, MessageHandler, SharedBus};
pub use callbacks::{topic_matches, CallbackTable};
pub use client::{MqttBus, MqttSettings, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
pub use endpoint::{parse_mqtt_endpoint, MqttEndpoint, DEFAULT_MQTT_PORT};
pub use memory::{MemoryBus, PublishedMessage};

//! Home Assistant MQTT discovery: the device block, topic layout and the
//! entities workers publish through.

pub mod device;
pub mod entity;

pub use device::{
    sanitize_for_id, DeviceContext, DeviceInfo, TopicScheme, DEFAULT_DISCOVERY_PREFIX,
    DEFAULT_STATE_PREFIX,
};
pub use entity::{EntityConfig, EntityKind, PublishableEntity};

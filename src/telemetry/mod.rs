//! Hardware telemetry.
//!
//! A `TelemetrySource` answers two questions: is the board still live, and
//! what do the named metrics read right now. Metric names follow the
//! `catalog` keys (`CPU1`, `GPU1`, `fan`, `Temp CPU`, `power cur`, ...).

pub mod board;
pub mod catalog;
pub mod stub;
pub mod sysfs;

use std::collections::BTreeMap;

pub use board::BoardInfo;
pub use catalog::{MetricSpec, Precision, CATALOG};
pub use stub::StubTelemetry;
pub use sysfs::SysfsTelemetry;

/// Sentinel a source reports for a metric whose hardware is switched off.
pub const OFF_SENTINEL: &str = "OFF";

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Number(f64),
    /// The unit is present but powered down (e.g. a parked CPU core).
    Off,
    Text(String),
}

impl MetricValue {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == OFF_SENTINEL {
            return MetricValue::Off;
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => MetricValue::Number(value),
            _ => MetricValue::Text(raw.to_string()),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

/// One poll of every metric the source could read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySnapshot {
    values: BTreeMap<String, MetricValue>,
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetricValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Polling view of the board's sensors.
pub trait TelemetrySource: Send {
    /// False once the source can no longer produce readings.
    fn is_live(&mut self) -> bool;

    fn snapshot(&mut self) -> anyhow::Result<TelemetrySnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognises_off_numbers_and_text() {
        assert_eq!(MetricValue::parse("OFF"), MetricValue::Off);
        assert_eq!(MetricValue::parse(" 42 "), MetricValue::Number(42.0));
        assert_eq!(MetricValue::parse("37.5"), MetricValue::Number(37.5));
        assert_eq!(
            MetricValue::parse("nan"),
            MetricValue::Text("nan".to_string())
        );
        assert_eq!(
            MetricValue::parse("idle"),
            MetricValue::Text("idle".to_string())
        );
    }

    #[test]
    fn snapshot_iterates_in_key_order() {
        let snapshot = TelemetrySnapshot::new()
            .with("fan", 20.0)
            .with("CPU1", 5.0)
            .with("CPU3", MetricValue::Off);
        let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["CPU1", "CPU3", "fan"]);
        assert_eq!(snapshot.get("CPU3"), Some(&MetricValue::Off));
    }
}

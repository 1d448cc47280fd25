//! The fixed set of board metrics published as Home Assistant sensors.

use super::MetricValue;

/// How a metric's value is rendered on its state topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    /// Rounded to an integer.
    Whole,
    /// Fixed number of decimals.
    Fixed(usize),
    /// The source's own rendering.
    Raw,
}

impl Precision {
    /// Render `value`. `Off` becomes `-1` regardless of precision so the
    /// channel stays numeric.
    pub fn format(self, value: &MetricValue) -> String {
        match value {
            MetricValue::Off => "-1".to_string(),
            MetricValue::Text(text) => text.clone(),
            MetricValue::Number(n) => match self {
                Precision::Whole => format!("{:.0}", n),
                Precision::Fixed(decimals) => format!("{:.*}", decimals, n),
                Precision::Raw => n.to_string(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricSpec {
    /// Key in the telemetry snapshot.
    pub key: &'static str,
    pub name: &'static str,
    pub object_id: &'static str,
    pub unit: &'static str,
    pub device_class: &'static str,
    pub precision: Precision,
}

const fn metric(
    key: &'static str,
    name: &'static str,
    object_id: &'static str,
    unit: &'static str,
    device_class: &'static str,
    precision: Precision,
) -> MetricSpec {
    MetricSpec {
        key,
        name,
        object_id,
        unit,
        device_class,
        precision,
    }
}

pub const CATALOG: [MetricSpec; 13] = [
    metric("CPU1", "Jetson CPU1", "jetson_cpu1_pct", "%", "power_factor", Precision::Whole),
    metric("CPU2", "Jetson CPU2", "jetson_cpu2_pct", "%", "power_factor", Precision::Whole),
    metric("CPU3", "Jetson CPU3", "jetson_cpu3_pct", "%", "power_factor", Precision::Whole),
    metric("CPU4", "Jetson CPU4", "jetson_cpu4_pct", "%", "power_factor", Precision::Whole),
    metric("GPU1", "Jetson GPU1", "jetson_gpu1_pct", "%", "power_factor", Precision::Whole),
    metric("fan", "Jetson Fan", "jetson_fan_pct", "%", "power_factor", Precision::Fixed(2)),
    metric("Temp AO", "Jetson Temp AO", "jetson_t_ao", "°C", "temperature", Precision::Fixed(2)),
    metric("Temp CPU", "Jetson Temp CPU", "jetson_t_cpu", "°C", "temperature", Precision::Fixed(2)),
    metric("Temp GPU", "Jetson Temp GPU", "jetson_t_gpu", "°C", "temperature", Precision::Fixed(2)),
    metric("Temp PLL", "Jetson Temp PLL", "jetson_t_pll", "°C", "temperature", Precision::Fixed(2)),
    metric(
        "Temp thermal",
        "Jetson Temp Thermal",
        "jetson_t_thermal",
        "°C",
        "temperature",
        Precision::Fixed(2),
    ),
    metric("power cur", "Jetson Power Current", "jetson_pwr_cur", "mW", "power", Precision::Raw),
    metric("power avg", "Jetson Power Average", "jetson_pwr_avg", "mW", "power", Precision::Raw),
];

pub fn find(key: &str) -> Option<&'static MetricSpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_is_minus_one_for_every_precision() {
        for precision in [Precision::Whole, Precision::Fixed(2), Precision::Raw] {
            assert_eq!(precision.format(&MetricValue::Off), "-1");
        }
    }

    #[test]
    fn numbers_follow_precision() {
        assert_eq!(Precision::Whole.format(&MetricValue::Number(41.6)), "42");
        assert_eq!(Precision::Fixed(2).format(&MetricValue::Number(36.5)), "36.50");
        assert_eq!(Precision::Raw.format(&MetricValue::Number(1234.0)), "1234");
        assert_eq!(Precision::Raw.format(&MetricValue::Number(12.25)), "12.25");
    }

    #[test]
    fn catalog_object_ids_are_unique() {
        let mut ids: Vec<&str> = CATALOG.iter().map(|m| m.object_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
        assert_eq!(find("Temp GPU").map(|m| m.object_id), Some("jetson_t_gpu"));
        assert!(find("CPU9").is_none());
    }
}

//! Jetson telemetry read straight from procfs and sysfs.
//!
//! All paths are resolved under a configurable root so tests can point the
//! reader at a fake tree. Metrics whose files are absent are left out of the
//! snapshot rather than failing it; only an unreadable `/proc/stat` is an
//! error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{MetricValue, TelemetrySnapshot, TelemetrySource};

const CPU_CORES: usize = 4;
const FAN_PWM_MAX: f64 = 255.0;

/// Thermal zone type names on the Nano, mapped to snapshot keys.
const THERMAL_ZONES: &[(&str, &str)] = &[
    ("AO-therm", "Temp AO"),
    ("CPU-therm", "Temp CPU"),
    ("GPU-therm", "Temp GPU"),
    ("PLL-therm", "Temp PLL"),
    ("thermal-fan-est", "Temp thermal"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

pub struct SysfsTelemetry {
    root: PathBuf,
    previous_cpu: HashMap<usize, CpuTimes>,
    power_sum: f64,
    power_samples: u64,
}

impl SysfsTelemetry {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            previous_cpu: HashMap::new(),
            power_sum: 0.0,
            power_samples: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn read_cpu_loads(&mut self, snapshot: &mut TelemetrySnapshot) -> Result<()> {
        let stat_path = self.path("proc/stat");
        let stat = fs::read_to_string(&stat_path)
            .with_context(|| format!("read {}", stat_path.display()))?;
        let times = parse_proc_stat(&stat);

        for core in 0..CPU_CORES {
            let key = format!("CPU{}", core + 1);
            let online_path = self.path(&format!("sys/devices/system/cpu/cpu{}/online", core));
            let offline = read_trimmed(&online_path).is_some_and(|v| v == "0");
            match times.get(&core) {
                _ if offline => snapshot.insert(key, MetricValue::Off),
                Some(&now) => {
                    let load = match self.previous_cpu.insert(core, now) {
                        Some(before) => load_percent(before, now),
                        None => load_percent(CpuTimes::default(), now),
                    };
                    snapshot.insert(key, load);
                }
                // A core missing from /proc/stat is parked.
                None if online_path.exists() => snapshot.insert(key, MetricValue::Off),
                None => {}
            }
        }
        Ok(())
    }

    fn read_gpu_load(&self, snapshot: &mut TelemetrySnapshot) {
        // gpu.0/load is in tenths of a percent.
        if let Some(load) = read_number(&self.path("sys/devices/gpu.0/load")) {
            snapshot.insert("GPU1", load / 10.0);
        }
    }

    fn read_fan(&self, snapshot: &mut TelemetrySnapshot) {
        if let Some(pwm) = read_number(&self.path("sys/devices/pwm-fan/target_pwm")) {
            snapshot.insert("fan", pwm * 100.0 / FAN_PWM_MAX);
        }
    }

    fn read_thermal_zones(&self, snapshot: &mut TelemetrySnapshot) {
        let Ok(entries) = fs::read_dir(self.path("sys/class/thermal")) else {
            return;
        };
        for entry in entries.flatten() {
            let zone = entry.path();
            let is_zone = zone
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("thermal_zone"));
            if !is_zone {
                continue;
            }
            let Some(kind) = read_trimmed(&zone.join("type")) else {
                continue;
            };
            let Some(&(_, key)) = THERMAL_ZONES.iter().find(|(name, _)| *name == kind) else {
                continue;
            };
            if let Some(millidegrees) = read_number(&zone.join("temp")) {
                snapshot.insert(key, millidegrees / 1000.0);
            }
        }
    }

    fn read_power(&mut self, snapshot: &mut TelemetrySnapshot) {
        let Some(path) = find_power_rail(&self.path("sys/bus/i2c/drivers/ina3221x")) else {
            return;
        };
        let Some(milliwatts) = read_number(&path) else {
            return;
        };
        self.power_sum += milliwatts;
        self.power_samples += 1;
        snapshot.insert("power cur", milliwatts);
        snapshot.insert("power avg", (self.power_sum / self.power_samples as f64).round());
    }
}

impl TelemetrySource for SysfsTelemetry {
    fn is_live(&mut self) -> bool {
        self.path("proc/stat").is_file()
    }

    fn snapshot(&mut self) -> Result<TelemetrySnapshot> {
        let mut snapshot = TelemetrySnapshot::new();
        self.read_cpu_loads(&mut snapshot)?;
        self.read_gpu_load(&mut snapshot);
        self.read_fan(&mut snapshot);
        self.read_thermal_zones(&mut snapshot);
        self.read_power(&mut snapshot);
        if snapshot.is_empty() {
            return Err(anyhow!("no metrics readable under {}", self.root.display()));
        }
        Ok(snapshot)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse().ok()
}

fn parse_proc_stat(stat: &str) -> HashMap<usize, CpuTimes> {
    let mut times = HashMap::new();
    for line in stat.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let Some(core) = label.strip_prefix("cpu").and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        // idle + iowait count as not busy.
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total: u64 = values.iter().take(8).sum();
        times.insert(
            core,
            CpuTimes {
                busy: total.saturating_sub(idle),
                total,
            },
        );
    }
    times
}

fn load_percent(before: CpuTimes, now: CpuTimes) -> f64 {
    let total = now.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let busy = now.busy.saturating_sub(before.busy);
    busy as f64 * 100.0 / total as f64
}

/// First `in_power0_input` (the board input rail) under any INA3221 device.
fn find_power_rail(driver_dir: &Path) -> Option<PathBuf> {
    let mut devices: Vec<PathBuf> = fs::read_dir(driver_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .collect();
    devices.sort();
    devices.into_iter().find_map(|device| {
        let mut iio: Vec<PathBuf> = fs::read_dir(&device)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("iio:device"))
            })
            .collect();
        iio.sort();
        iio.into_iter()
            .map(|dir| dir.join("in_power0_input"))
            .find(|path| path.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fake_nano(root: &Path) {
        write(
            root,
            "proc/stat",
            "cpu  40 0 40 120 0 0 0 0\n\
             cpu0 10 0 10 80 0 0 0 0\n\
             cpu1 30 0 30 40 0 0 0 0\n",
        );
        write(root, "sys/devices/system/cpu/cpu2/online", "0\n");
        write(root, "sys/devices/system/cpu/cpu3/online", "0\n");
        write(root, "sys/devices/gpu.0/load", "455\n");
        write(root, "sys/devices/pwm-fan/target_pwm", "51\n");
        write(root, "sys/class/thermal/thermal_zone0/type", "CPU-therm\n");
        write(root, "sys/class/thermal/thermal_zone0/temp", "36500\n");
        write(root, "sys/class/thermal/thermal_zone1/type", "PMIC-Die\n");
        write(root, "sys/class/thermal/thermal_zone1/temp", "100000\n");
        write(
            root,
            "sys/bus/i2c/drivers/ina3221x/6-0040/iio:device0/in_power0_input",
            "2000\n",
        );
    }

    #[test]
    fn reads_fake_jetson_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fake_nano(dir.path());
        let mut telemetry = SysfsTelemetry::new(dir.path());

        assert!(telemetry.is_live());
        let snapshot = telemetry.snapshot()?;
        assert_eq!(snapshot.get("CPU1"), Some(&MetricValue::Number(20.0)));
        assert_eq!(snapshot.get("CPU2"), Some(&MetricValue::Number(60.0)));
        assert_eq!(snapshot.get("CPU3"), Some(&MetricValue::Off));
        assert_eq!(snapshot.get("CPU4"), Some(&MetricValue::Off));
        assert_eq!(snapshot.get("GPU1"), Some(&MetricValue::Number(45.5)));
        assert_eq!(snapshot.get("fan"), Some(&MetricValue::Number(20.0)));
        assert_eq!(snapshot.get("Temp CPU"), Some(&MetricValue::Number(36.5)));
        assert_eq!(snapshot.get("power cur"), Some(&MetricValue::Number(2000.0)));
        Ok(())
    }

    #[test]
    fn cpu_load_uses_deltas_and_power_average_accumulates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fake_nano(dir.path());
        let mut telemetry = SysfsTelemetry::new(dir.path());
        telemetry.snapshot()?;

        write(
            dir.path(),
            "proc/stat",
            "cpu0 20 0 10 90 0 0 0 0\ncpu1 30 0 30 140 0 0 0 0\n",
        );
        write(
            dir.path(),
            "sys/bus/i2c/drivers/ina3221x/6-0040/iio:device0/in_power0_input",
            "3000\n",
        );
        let snapshot = telemetry.snapshot()?;
        assert_eq!(snapshot.get("CPU1"), Some(&MetricValue::Number(50.0)));
        assert_eq!(snapshot.get("CPU2"), Some(&MetricValue::Number(0.0)));
        assert_eq!(snapshot.get("power avg"), Some(&MetricValue::Number(2500.0)));
        Ok(())
    }

    #[test]
    fn missing_proc_stat_is_not_live() {
        let dir = tempfile::tempdir().unwrap();
        let mut telemetry = SysfsTelemetry::new(dir.path());
        assert!(!telemetry.is_live());
        assert!(telemetry.snapshot().is_err());
    }
}

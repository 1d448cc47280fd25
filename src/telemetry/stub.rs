use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{MetricValue, TelemetrySnapshot, TelemetrySource};

/// Fixed-reading telemetry for tests and boards without sysfs.
///
/// Returns the same snapshot on every poll. `live_for(n)` makes the source
/// report itself dead after `n` liveness checks.
pub struct StubTelemetry {
    snapshot: TelemetrySnapshot,
    live_checks: Option<u64>,
    failure: Option<String>,
    polls: Arc<AtomicU64>,
}

impl StubTelemetry {
    pub fn new(snapshot: TelemetrySnapshot) -> Self {
        Self {
            snapshot,
            live_checks: None,
            failure: None,
            polls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A plausible idle Nano with two cores parked.
    pub fn idle_nano() -> Self {
        Self::new(
            TelemetrySnapshot::new()
                .with("CPU1", 12.0)
                .with("CPU2", 7.0)
                .with("CPU3", MetricValue::Off)
                .with("CPU4", MetricValue::Off)
                .with("GPU1", 0.0)
                .with("fan", 0.0)
                .with("Temp AO", 38.5)
                .with("Temp CPU", 31.0)
                .with("Temp GPU", 30.5)
                .with("Temp PLL", 29.0)
                .with("Temp thermal", 30.75)
                .with("power cur", 1372.0)
                .with("power avg", 1410.0),
        )
    }

    pub fn live_for(mut self, checks: u64) -> Self {
        self.live_checks = Some(checks);
        self
    }

    /// Every snapshot fails with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Shared count of snapshots taken, readable after the source is moved
    /// into a worker.
    pub fn poll_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.polls)
    }
}

impl Default for StubTelemetry {
    fn default() -> Self {
        Self::idle_nano()
    }
}

impl TelemetrySource for StubTelemetry {
    fn is_live(&mut self) -> bool {
        match self.live_checks.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    fn snapshot(&mut self) -> Result<TelemetrySnapshot> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.snapshot.clone()),
        }
    }
}

//! Fixed-cadence board telemetry publisher.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::lifecycle::{Lifecycle, LoopControl, LoopExit, Worker, WorkerEvent, WorkerState};
use crate::discovery::{DeviceContext, EntityConfig, PublishableEntity};
use crate::error::{BridgeError, Result};
use crate::mqtt::SharedBus;
use crate::telemetry::{MetricSpec, TelemetrySource, CATALOG};

pub const DEFAULT_HARDWARE_INTERVAL: Duration = Duration::from_secs(10);

type MetricEntities = Arc<Vec<(MetricSpec, PublishableEntity)>>;

struct HardwarePipeline {
    telemetry: Box<dyn TelemetrySource>,
    entities: MetricEntities,
}

impl HardwarePipeline {
    fn publish_snapshot(&mut self) -> Result<()> {
        let snapshot = self
            .telemetry
            .snapshot()
            .map_err(|err| BridgeError::capture("telemetry", err))?;
        let mut published = 0;
        for (spec, entity) in self.entities.iter() {
            let Some(value) = snapshot.get(spec.key) else {
                continue;
            };
            entity.publish_state(&spec.precision.format(value))?;
            published += 1;
        }
        log::debug!("hardware: published {} of {} metrics", published, self.entities.len());
        Ok(())
    }

    fn run(&mut self, control: &LoopControl, interval: Duration) -> LoopExit {
        while self.telemetry.is_live() {
            if control.should_stop() {
                return LoopExit::Stopped;
            }
            if let Err(err) = self.publish_snapshot() {
                return LoopExit::Failed(Arc::new(err));
            }
            if control.pause(interval) {
                return LoopExit::Stopped;
            }
        }
        log::info!("hardware: telemetry source is no longer live");
        LoopExit::Finished
    }
}

/// Publishes every catalog metric the telemetry source reports.
pub struct HardwareSensorWorker {
    bus: SharedBus,
    ctx: DeviceContext,
    interval: Duration,
    telemetry: Option<Box<dyn TelemetrySource>>,
    entities: Option<MetricEntities>,
    lifecycle: Lifecycle<HardwarePipeline>,
}

impl HardwareSensorWorker {
    pub fn new(
        bus: SharedBus,
        ctx: DeviceContext,
        telemetry: Box<dyn TelemetrySource>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            ctx,
            interval,
            telemetry: Some(telemetry),
            entities: None,
            lifecycle: Lifecycle::new("hardware"),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_exit(&self) -> Option<LoopExit> {
        self.lifecycle.last_exit()
    }

    fn close_entities(entities: &[(MetricSpec, PublishableEntity)]) -> Result<()> {
        let mut first_err = None;
        for (_, entity) in entities {
            if let Err(err) = entity.close() {
                log::warn!("failed to close entity {}: {}", entity.unique_id(), err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Worker for HardwareSensorWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn initialize(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(BridgeError::config("hardware interval must be non-zero"));
        }
        let telemetry = self
            .telemetry
            .take()
            .ok_or_else(|| BridgeError::config("hardware is already initialized"))?;

        let mut entities = Vec::with_capacity(CATALOG.len());
        for spec in CATALOG {
            let config = EntityConfig::sensor(spec.name, spec.object_id)
                .with_unit(spec.unit)
                .with_device_class(spec.device_class);
            match PublishableEntity::register(self.bus.clone(), &self.ctx, config) {
                Ok(entity) => entities.push((spec, entity)),
                Err(err) => {
                    // Leave no half-registered device behind.
                    let _ = Self::close_entities(&entities);
                    self.telemetry = Some(telemetry);
                    return Err(err);
                }
            }
        }
        let entities = Arc::new(entities);
        self.entities = Some(Arc::clone(&entities));
        self.lifecycle.set_ready(HardwarePipeline {
            telemetry,
            entities,
        })
    }

    fn start(&mut self) -> Result<()> {
        let interval = self.interval;
        self.lifecycle
            .start(move |pipeline, control| pipeline.run(control, interval))
    }

    fn request_stop(&mut self) -> Result<()> {
        self.lifecycle.signal_stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.lifecycle.stop()
    }

    fn close(&mut self) -> Result<()> {
        let stopped = self.lifecycle.close().map(drop);
        let closed = match self.entities.take() {
            Some(entities) => Self::close_entities(&entities),
            None => Ok(()),
        };
        stopped.and(closed)
    }

    fn attach_events(&mut self, events: Sender<WorkerEvent>) {
        self.lifecycle.attach_events(events);
    }
}

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::lifecycle::{Worker, WorkerEvent, WorkerState};
use crate::error::{BridgeError, Result};

/// Owns every worker of the bridge and collects their events.
pub struct Supervisor {
    workers: Vec<Box<dyn Worker>>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            workers: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn add(&mut self, mut worker: Box<dyn Worker>) {
        worker.attach_events(self.events_tx.clone());
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Initialize workers in insertion order. Stops at the first failure;
    /// workers already initialized stay `Ready` and are released by `shutdown`.
    pub fn initialize_all(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.initialize().map_err(|err| {
                log::error!("{}: initialize failed: {}", worker.name(), err);
                err
            })?;
        }
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.start()?;
        }
        log::info!("supervisor: {} workers running", self.workers.len());
        Ok(())
    }

    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.name().to_string(), w.state()))
            .collect()
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events_rx
    }

    /// Next worker event, or `None` when `timeout` passes first.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Signal every running loop, then join each one, then close all
    /// workers in reverse order. Returns the first error seen.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_err: Option<BridgeError> = None;

        for worker in &mut self.workers {
            if worker.state() == WorkerState::Running {
                if let Err(err) = worker.request_stop() {
                    log::warn!("{}: stop request failed: {}", worker.name(), err);
                }
            }
        }
        for worker in &mut self.workers {
            match worker.stop() {
                Ok(()) | Err(BridgeError::NotRunning(_)) => {}
                Err(err) => {
                    log::error!("{}: stop failed: {}", worker.name(), err);
                    first_err.get_or_insert(err);
                }
            }
        }
        for worker in self.workers.iter_mut().rev() {
            if let Err(err) = worker.close() {
                log::error!("{}: close failed: {}", worker.name(), err);
                first_err.get_or_insert(err);
            }
        }
        log::info!("supervisor: all workers closed");
        first_err.map_or(Ok(()), Err)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DeviceContext, DeviceInfo, TopicScheme};
    use crate::mqtt::MemoryBus;
    use crate::telemetry::{BoardInfo, StubTelemetry};
    use crate::worker::{HardwareSensorWorker, LoopExit};
    use std::sync::Arc;

    fn context() -> DeviceContext {
        DeviceContext::new(
            DeviceInfo::from_board("nano", &BoardInfo::default()),
            TopicScheme::default(),
        )
    }

    #[test]
    fn finished_loop_is_reported_and_shutdown_clears_entities() -> Result<()> {
        let bus = Arc::new(MemoryBus::new());
        let mut supervisor = Supervisor::new();
        supervisor.add(Box::new(HardwareSensorWorker::new(
            bus.clone(),
            context(),
            Box::new(StubTelemetry::idle_nano().live_for(1)),
            Duration::from_millis(5),
        )));
        supervisor.initialize_all()?;
        supervisor.start_all()?;

        let event = supervisor
            .recv_event_timeout(Duration::from_secs(5))
            .expect("exit event");
        assert!(matches!(
            event,
            WorkerEvent::Exited {
                reason: LoopExit::Finished,
                ..
            }
        ));

        supervisor.shutdown()?;
        assert_eq!(supervisor.states()[0].1, WorkerState::Closed);
        let cleared = bus
            .published()
            .into_iter()
            .filter(|m| m.topic.ends_with("/config") && m.payload.is_empty())
            .count();
        assert_eq!(cleared, crate::telemetry::CATALOG.len());
        Ok(())
    }
}

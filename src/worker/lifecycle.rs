//! Worker state machine and loop thread ownership.
//!
//! `Lifecycle<T>` owns a worker's state and, while running, its loop thread.
//! The resources the loop needs (`T`: capture source, model, telemetry
//! reader) move into the thread on `start` and come back on join, so a
//! stopped worker can be started again without re-initializing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{BridgeError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Ready,
    Running,
    Stopping,
    Stopped,
    /// Entities removed and resources released. Terminal.
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninitialized => "uninitialized",
            WorkerState::Ready => "ready",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a worker loop returned.
#[derive(Clone, Debug)]
pub enum LoopExit {
    /// `stop` was requested.
    Stopped,
    /// The loop ran out of work, e.g. telemetry went offline.
    Finished,
    Failed(Arc<BridgeError>),
}

/// Notifications a supervisor receives from its workers.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    Exited { worker: String, reason: LoopExit },
    /// A listener request failed; the listener keeps running.
    RequestFailed { worker: String, error: Arc<BridgeError> },
}

#[derive(Clone, Debug)]
pub(crate) struct StateCell(Arc<Mutex<WorkerState>>);

impl StateCell {
    fn new(state: WorkerState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> WorkerState {
        *self.lock()
    }

    pub fn set(&self, state: WorkerState) {
        *self.lock() = state;
    }

    /// Move `from -> to`. False if the state was not `from`.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let mut state = self.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }
}

/// Marks the worker stopped when the loop thread ends, panics included.
struct ExitGuard(StateCell);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set(WorkerState::Stopped);
    }
}

/// Loop-side view of a stop request.
pub struct LoopControl {
    flag: Arc<AtomicBool>,
    signal: Receiver<()>,
}

impl LoopControl {
    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `interval` or until stop is requested. Returns true when the
    /// loop should exit.
    pub fn pause(&self, interval: Duration) -> bool {
        if self.should_stop() {
            return true;
        }
        match self.signal.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.should_stop(),
        }
    }

    /// Becomes ready when stop is requested; for `select!` alongside work queues.
    pub fn stop_signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

struct StopSignal {
    flag: Arc<AtomicBool>,
    tx: Sender<()>,
}

impl StopSignal {
    fn pair() -> (Self, LoopControl) {
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);
        (
            Self {
                flag: Arc::clone(&flag),
                tx,
            },
            LoopControl { flag, signal: rx },
        )
    }

    fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }
}

struct RunningLoop<T> {
    stop: StopSignal,
    /// None for workers that run on the bus dispatch context.
    join: Option<JoinHandle<T>>,
}

pub struct Lifecycle<T: Send + 'static> {
    name: String,
    state: StateCell,
    resources: Option<T>,
    running: Option<RunningLoop<T>>,
    events: Option<Sender<WorkerEvent>>,
    last_exit: Arc<Mutex<Option<LoopExit>>>,
}

impl<T: Send + 'static> Lifecycle<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StateCell::new(WorkerState::Uninitialized),
            resources: None,
            running: None,
            events: None,
            last_exit: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn attach_events(&mut self, events: Sender<WorkerEvent>) {
        self.events = Some(events);
    }

    pub fn events(&self) -> Option<Sender<WorkerEvent>> {
        self.events.clone()
    }

    /// `Uninitialized -> Ready`, taking ownership of the loop resources.
    pub fn set_ready(&mut self, resources: T) -> Result<()> {
        if self.state() != WorkerState::Uninitialized {
            return Err(BridgeError::config(format!(
                "{} is already initialized ({})",
                self.name,
                self.state()
            )));
        }
        self.resources = Some(resources);
        self.state.set(WorkerState::Ready);
        log::info!("{}: ready", self.name);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn take_resources(&mut self) -> Option<T> {
        self.resources.take()
    }

    /// Exit reason of the most recent loop run.
    pub fn last_exit(&self) -> Option<LoopExit> {
        self.last_exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_startable(&mut self) -> Result<()> {
        match self.state() {
            WorkerState::Running | WorkerState::Stopping => {
                Err(BridgeError::AlreadyRunning(self.name.clone()))
            }
            WorkerState::Uninitialized => Err(BridgeError::config(format!(
                "{} must be initialized before start",
                self.name
            ))),
            WorkerState::Closed => Err(BridgeError::config(format!(
                "{} is closed",
                self.name
            ))),
            WorkerState::Ready | WorkerState::Stopped => self.reap(),
        }
    }

    /// Start the loop thread. `body` runs until it returns a `LoopExit`.
    pub fn start<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut T, &LoopControl) -> LoopExit + Send + 'static,
    {
        self.check_startable()?;
        let mut resources = self.resources.take().ok_or_else(|| {
            BridgeError::config(format!("{} lost its resources in a failed run", self.name))
        })?;
        let (stop, control) = StopSignal::pair();
        self.state.set(WorkerState::Running);

        let name = self.name.clone();
        let guard_state = self.state.clone();
        let events = self.events.clone();
        let last_exit = Arc::clone(&self.last_exit);
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = ExitGuard(guard_state);
                let reason = body(&mut resources, &control);
                match &reason {
                    LoopExit::Failed(err) => log::error!("{}: loop failed: {}", name, err),
                    LoopExit::Stopped => log::info!("{}: loop stopped", name),
                    LoopExit::Finished => log::info!("{}: loop finished", name),
                }
                *last_exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
                if let Some(events) = events {
                    let _ = events.send(WorkerEvent::Exited {
                        worker: name,
                        reason,
                    });
                }
                resources
            });
        match spawned {
            Ok(join) => {
                self.running = Some(RunningLoop {
                    stop,
                    join: Some(join),
                });
                log::info!("{}: running", self.name);
                Ok(())
            }
            Err(err) => {
                self.state.set(WorkerState::Stopped);
                Err(err.into())
            }
        }
    }

    /// Enter `Running` without a loop thread, for work driven by bus callbacks.
    pub fn start_idle(&mut self) -> Result<()> {
        self.check_startable()?;
        let (stop, _control) = StopSignal::pair();
        self.running = Some(RunningLoop { stop, join: None });
        self.state.set(WorkerState::Running);
        log::info!("{}: running", self.name);
        Ok(())
    }

    /// Request the loop to stop without waiting for it.
    pub fn signal_stop(&self) -> Result<()> {
        if self.state.transition(WorkerState::Running, WorkerState::Stopping) {
            if let Some(running) = &self.running {
                running.stop.raise();
            }
            log::info!("{}: stopping", self.name);
            return Ok(());
        }
        match self.state() {
            WorkerState::Stopping => Ok(()),
            _ => Err(BridgeError::NotRunning(self.name.clone())),
        }
    }

    /// Wait for the loop thread to exit and reclaim its resources.
    pub fn join(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        match running.join {
            Some(join) => match join.join() {
                Ok(resources) => self.resources = Some(resources),
                Err(_) => {
                    self.state.set(WorkerState::Stopped);
                    return Err(BridgeError::WorkerPanicked(self.name.clone()));
                }
            },
            None => self.state.set(WorkerState::Stopped),
        }
        log::info!("{}: stopped", self.name);
        Ok(())
    }

    /// Join a loop that already ended on its own.
    fn reap(&mut self) -> Result<()> {
        if self.state() == WorkerState::Stopped && self.running.is_some() {
            self.join()?;
        }
        Ok(())
    }

    /// Signal and join. Blocks until the in-flight iteration completes; there
    /// is no timeout.
    pub fn stop(&mut self) -> Result<()> {
        if let Err(err) = self.signal_stop() {
            self.reap()?;
            return Err(err);
        }
        self.join()
    }

    /// Stop if needed and enter `Closed`. Returns the loop resources for the
    /// worker to release.
    pub fn close(&mut self) -> Result<Option<T>> {
        if self.state() == WorkerState::Closed {
            return Ok(None);
        }
        match self.stop() {
            Ok(()) | Err(BridgeError::NotRunning(_)) => {}
            Err(err) => {
                self.state.set(WorkerState::Closed);
                return Err(err);
            }
        }
        self.state.set(WorkerState::Closed);
        log::info!("{}: closed", self.name);
        Ok(self.resources.take())
    }
}

/// Common contract of camera, hardware and listener workers.
pub trait Worker: Send {
    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Open sources, load models and register entities.
    fn initialize(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Ask the worker to stop without waiting.
    fn request_stop(&mut self) -> Result<()>;

    /// Stop and wait for the in-flight iteration to finish.
    fn stop(&mut self) -> Result<()>;

    /// Stop, unregister entities and release resources.
    fn close(&mut self) -> Result<()>;

    fn attach_events(&mut self, events: Sender<WorkerEvent>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_for_state(lifecycle: &Lifecycle<usize>, state: WorkerState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while lifecycle.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {}", state);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn counting_loop(ticks: Arc<AtomicUsize>) -> impl FnOnce(&mut usize, &LoopControl) -> LoopExit {
        move |runs: &mut usize, control: &LoopControl| {
            *runs += 1;
            loop {
                ticks.fetch_add(1, Ordering::SeqCst);
                if control.pause(Duration::from_millis(5)) {
                    return LoopExit::Stopped;
                }
            }
        }
    }

    #[test]
    fn start_requires_initialize() {
        let mut lifecycle: Lifecycle<usize> = Lifecycle::new("w");
        let err = lifecycle.start(|_, _| LoopExit::Finished).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn second_start_is_rejected_and_stop_returns_resources() {
        let mut lifecycle = Lifecycle::new("w");
        lifecycle.set_ready(0usize).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        lifecycle.start(counting_loop(ticks.clone())).unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Running);

        let err = lifecycle.start(|_, _| LoopExit::Finished).unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyRunning(_)));

        lifecycle.stop().unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Stopped);
        let after_stop = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);

        // Restart from Stopped reuses the returned resources.
        lifecycle.start(counting_loop(ticks)).unwrap();
        lifecycle.stop().unwrap();
        assert_eq!(lifecycle.close().unwrap(), Some(2));
        assert_eq!(lifecycle.state(), WorkerState::Closed);
    }

    #[test]
    fn stop_when_not_running_is_not_running_error() {
        let mut lifecycle = Lifecycle::new("w");
        lifecycle.set_ready(0usize).unwrap();
        assert!(matches!(lifecycle.stop(), Err(BridgeError::NotRunning(_))));
        assert_eq!(lifecycle.state(), WorkerState::Ready);
    }

    #[test]
    fn self_terminating_loop_reports_exit_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut lifecycle = Lifecycle::new("w");
        lifecycle.attach_events(tx);
        lifecycle.set_ready(0usize).unwrap();
        lifecycle
            .start(|_, _| LoopExit::Failed(Arc::new(BridgeError::config("boom"))))
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            event,
            WorkerEvent::Exited {
                reason: LoopExit::Failed(_),
                ..
            }
        ));
        wait_for_state(&lifecycle, WorkerState::Stopped);
        assert!(matches!(lifecycle.stop(), Err(BridgeError::NotRunning(_))));
        // The finished thread was reaped, so a restart works.
        lifecycle.start(|_, _| LoopExit::Finished).unwrap();
    }

    #[test]
    fn closed_lifecycle_cannot_start() {
        let mut lifecycle = Lifecycle::new("w");
        lifecycle.set_ready(0usize).unwrap();
        lifecycle.close().unwrap();
        assert!(matches!(
            lifecycle.start(|_, _| LoopExit::Finished),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn idle_lifecycle_runs_without_thread() {
        let mut lifecycle: Lifecycle<()> = Lifecycle::new("listener");
        lifecycle.set_ready(()).unwrap();
        lifecycle.start_idle().unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Running);
        assert!(matches!(
            lifecycle.start_idle(),
            Err(BridgeError::AlreadyRunning(_))
        ));
        lifecycle.stop().unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Stopped);
    }
}

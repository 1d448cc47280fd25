//! nano_bridged - Jetson Nano to Home Assistant bridge daemon.
//!
//! This daemon:
//! 1. Connects to the MQTT broker and marks the device online
//! 2. Registers hardware, camera and listener entities via MQTT discovery
//! 3. Runs one worker per camera and listener plus the telemetry poller
//! 4. On Ctrl-C stops every worker and removes its entities

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use std::path::PathBuf;
use std::sync::Arc;

use nano_ha_bridge::{
    worker::LoopExit, BoardInfo, BridgeConfig, CameraWorker, DeviceContext, HardwareSensorWorker,
    InferenceListener, MqttBus, SharedBus, Supervisor, WorkerEvent,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish Jetson Nano cameras, inference and telemetry to Home Assistant"
)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "NANO_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address, overrides the configuration file.
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Do not publish board telemetry.
    #[arg(long)]
    no_hardware: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = BridgeConfig::load_from(args.config.as_deref())?;
    if let Some(broker) = args.mqtt_broker {
        cfg.mqtt.broker = broker;
    }
    if args.no_hardware {
        cfg.hardware.enabled = false;
    }

    let board = BoardInfo::detect(&cfg.hardware.sysfs_root);
    let ctx = DeviceContext::new(cfg.device.device_info(&board), cfg.mqtt.topics());
    let settings = cfg.mqtt.settings()?;
    log::info!(
        "connecting to {}:{} as {}",
        settings.endpoint.host,
        settings.endpoint.port,
        settings.client_id
    );
    let mqtt = Arc::new(MqttBus::connect(&settings)?);
    let bus: SharedBus = mqtt.clone();

    let mut supervisor = Supervisor::new();
    if cfg.hardware.enabled {
        supervisor.add(Box::new(HardwareSensorWorker::new(
            bus.clone(),
            ctx.clone(),
            cfg.hardware.telemetry_source(),
            cfg.hardware.interval,
        )));
    }
    for camera in cfg.cameras {
        supervisor.add(Box::new(CameraWorker::new(camera, bus.clone(), ctx.clone())));
    }
    for listener in cfg.listeners {
        supervisor.add(Box::new(InferenceListener::new(
            listener,
            bus.clone(),
            ctx.clone(),
        )));
    }
    if supervisor.is_empty() {
        log::warn!("no workers configured; only availability will be published");
    }

    if let Err(err) = supervisor
        .initialize_all()
        .and_then(|()| supervisor.start_all())
    {
        let _ = supervisor.shutdown();
        let _ = mqtt.shutdown();
        return Err(err.into());
    }

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("{} waiting for shutdown signal (Ctrl-C)...", ctx.device.name);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(supervisor.events()) -> event => match event {
                Ok(event) => log_event(event),
                Err(_) => break,
            },
        }
    }

    log::info!("shutdown signal received, stopping workers...");
    if let Err(err) = supervisor.shutdown() {
        log::error!("worker shutdown incomplete: {}", err);
    }
    mqtt.shutdown()?;
    Ok(())
}

fn log_event(event: WorkerEvent) {
    match event {
        WorkerEvent::Exited {
            worker,
            reason: LoopExit::Failed(err),
        } => log::error!("{} stopped after an error: {}", worker, err),
        WorkerEvent::Exited {
            worker,
            reason: LoopExit::Finished,
        } => log::warn!("{} has no more work and stopped", worker),
        WorkerEvent::Exited { worker, .. } => log::info!("{} stopped", worker),
        WorkerEvent::RequestFailed { worker, error } => {
            log::warn!("{} request failed: {}", worker, error)
        }
    }
}

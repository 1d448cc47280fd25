//! rumqttc-backed message bus.
//!
//! One background thread drives the rumqttc connection. It republishes
//! availability and restores subscriptions after every (re)connect, and keeps
//! polling after connection errors so rumqttc can reconnect.
//!
//! Inbound publishes are handed to a second thread that runs the callback
//! table. The connection thread is the only consumer of the client's request
//! queue, so it never runs handlers: a handler that publishes would otherwise
//! wait on a queue nobody drains.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};

use super::bus::{InboundMessage, MessageBus, MessageHandler};
use super::callbacks::CallbackTable;
use super::endpoint::MqttEndpoint;
use crate::error::{BridgeError, Result};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

const REQUEST_CAPACITY: usize = 64;
/// Inbound messages waiting for the dispatch thread. Overflow is dropped.
const DISPATCH_CAPACITY: usize = 32;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound for inbound and outbound packets; camera frames are large.
    pub max_packet_bytes: u32,
    /// Retained `online`/`offline` topic, also used as the last will.
    pub availability_topic: String,
}

struct SharedState {
    callbacks: Arc<CallbackTable>,
    subscriptions: Mutex<BTreeSet<String>>,
    shutdown: AtomicBool,
}

pub struct MqttBus {
    client: Client,
    state: Arc<SharedState>,
    availability_topic: String,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let mut options = MqttOptions::new(
            &settings.client_id,
            &settings.endpoint.host,
            settings.endpoint.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        options.set_max_packet_size(Some(settings.max_packet_bytes));
        let will = LastWill::new(
            &settings.availability_topic,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let state = Arc::new(SharedState {
            callbacks: Arc::new(CallbackTable::new()),
            subscriptions: Mutex::new(BTreeSet::new()),
            shutdown: AtomicBool::new(false),
        });

        let (inbound, dispatch_handle) =
            spawn_dispatcher(Arc::clone(&state.callbacks), DISPATCH_CAPACITY)?;
        let handle = {
            let client = client.clone();
            let state = Arc::clone(&state);
            let availability_topic = settings.availability_topic.clone();
            std::thread::Builder::new()
                .name("mqtt-connection".to_string())
                .spawn(move || {
                    run_connection(connection, client, state, inbound, availability_topic)
                })?
        };

        log::info!(
            "MqttBus: connecting to {}:{} as {}",
            settings.endpoint.host,
            settings.endpoint.port,
            settings.client_id
        );
        Ok(Self {
            client,
            state,
            availability_topic: settings.availability_topic.clone(),
            connection_handle: Mutex::new(Some(handle)),
            dispatch_handle: Mutex::new(Some(dispatch_handle)),
        })
    }

    /// Publish `offline`, disconnect and join the connection thread.
    pub fn shutdown(&self) -> Result<()> {
        if self.state.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let offline = self.publish(&self.availability_topic, PAYLOAD_OFFLINE.as_bytes(), true);
        if let Err(err) = self.client.disconnect() {
            log::warn!("MqttBus: disconnect failed: {}", err);
        }
        // The dispatch thread ends once the connection thread drops its sender.
        for (name, slot) in [
            ("mqtt-connection", &self.connection_handle),
            ("mqtt-dispatch", &self.dispatch_handle),
        ] {
            let handle = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    return Err(BridgeError::WorkerPanicked(name.to_string()));
                }
            }
        }
        log::info!("MqttBus: disconnected");
        offline
    }
}

impl MessageBus for MqttBus {
    fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retained, payload.to_vec())
            .map_err(|err| BridgeError::publish(topic, err))
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|err| BridgeError::publish(topic, err))?;
        self.state
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.state
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.client
            .unsubscribe(topic)
            .map_err(|err| BridgeError::publish(topic, err))
    }

    fn register_callback(&self, filter: &str, handler: MessageHandler) {
        self.state.callbacks.insert(filter, handler);
    }

    fn remove_callback(&self, filter: &str) {
        self.state.callbacks.remove(filter);
    }
}

fn spawn_dispatcher(
    callbacks: Arc<CallbackTable>,
    capacity: usize,
) -> std::io::Result<(Sender<InboundMessage>, JoinHandle<()>)> {
    let (tx, rx) = bounded(capacity);
    let handle = std::thread::Builder::new()
        .name("mqtt-dispatch".to_string())
        .spawn(move || run_dispatcher(&callbacks, rx))?;
    Ok((tx, handle))
}

fn run_dispatcher(callbacks: &CallbackTable, inbound: Receiver<InboundMessage>) {
    for message in inbound.iter() {
        for result in callbacks.dispatch(&message) {
            if let Err(err) = result {
                log::warn!("MqttBus: handler for {} failed: {}", message.topic, err);
            }
        }
    }
}

/// Queue `message` for the dispatch thread without blocking. Returns false
/// when it was dropped.
fn forward(inbound: &Sender<InboundMessage>, message: InboundMessage) -> bool {
    match inbound.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            log::warn!("MqttBus: dispatch queue full, dropping message on {}", message.topic);
            false
        }
        Err(TrySendError::Disconnected(message)) => {
            log::warn!("MqttBus: dispatcher gone, dropping message on {}", message.topic);
            false
        }
    }
}

fn run_connection(
    mut connection: Connection,
    client: Client,
    state: Arc<SharedState>,
    inbound: Sender<InboundMessage>,
    availability_topic: String,
) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("MqttBus: connected");
                on_connected(&client, &state, &availability_topic);
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic.to_string(),
                    Err(e) => {
                        log::warn!("Skipping publish with invalid topic: {}", e);
                        continue;
                    }
                };
                forward(&inbound, InboundMessage::new(topic, publish.payload.to_vec()));
            }
            Ok(_) => {}
            // rumqttc reports the sent disconnect as an error.
            Err(e) => {
                if state.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

fn on_connected(client: &Client, state: &SharedState, availability_topic: &str) {
    if let Err(err) = client.try_publish(
        availability_topic,
        QoS::AtLeastOnce,
        true,
        PAYLOAD_ONLINE.as_bytes().to_vec(),
    ) {
        log::warn!("MqttBus: failed to publish availability: {}", err);
    }
    let topics: Vec<String> = state
        .subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    for topic in topics {
        if let Err(err) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            log::warn!("MqttBus: failed to restore subscription {}: {}", topic, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn message() -> InboundMessage {
        InboundMessage::new("cmd", b"frame".to_vec())
    }

    #[test]
    fn slow_handler_does_not_block_forwarding() {
        let callbacks = Arc::new(CallbackTable::new());
        let handled = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        {
            let handled = Arc::clone(&handled);
            callbacks.insert(
                "cmd",
                Arc::new(move |_: &InboundMessage| {
                    let _ = entered_tx.send(());
                    let _ = release_rx.recv();
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        let (inbound, handle) = spawn_dispatcher(callbacks, 2).unwrap();

        assert!(forward(&inbound, message()));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Handler is stuck: two more fit, the next is dropped at once.
        assert!(forward(&inbound, message()));
        assert!(forward(&inbound, message()));
        assert!(!forward(&inbound, message()));

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        drop(inbound);
        handle.join().unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handler_stuck_on_full_request_queue_leaves_connection_side_free() {
        // Nothing polls this connection, so the single request slot fills.
        let options = MqttOptions::new("dispatch-test", "localhost", 1883);
        let (client, connection) = Client::new(options, 1);
        let callbacks = Arc::new(CallbackTable::new());
        let (published_tx, published_rx) = crossbeam_channel::unbounded();
        callbacks.insert(
            "cmd",
            Arc::new(move |_: &InboundMessage| {
                let sent = client.publish("reply", QoS::AtLeastOnce, false, b"ok".to_vec());
                let _ = published_tx.send(sent.is_ok());
                Ok(())
            }),
        );
        let (inbound, handle) = spawn_dispatcher(callbacks, 4).unwrap();

        assert!(forward(&inbound, message()));
        assert_eq!(published_rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        let started = Instant::now();
        assert!(forward(&inbound, message()));
        assert!(forward(&inbound, message()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(published_rx.recv_timeout(Duration::from_millis(100)).is_err());

        // Dropping the connection fails the blocked publish.
        drop(connection);
        assert_eq!(published_rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        drop(inbound);
        handle.join().unwrap();
    }
}

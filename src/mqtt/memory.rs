use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;

use super::bus::{InboundMessage, MessageBus, MessageHandler};
use super::callbacks::{topic_matches, CallbackTable};
use crate::error::{BridgeError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

#[derive(Default)]
struct MemoryState {
    published: Vec<PublishedMessage>,
    subscriptions: BTreeSet<String>,
    fail_publishes: bool,
}

/// In-process bus that records every publish.
///
/// `inject` plays the broker: a message is delivered only when its topic
/// matches an active subscription, and then only to matching callbacks.
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<MemoryState>,
    callbacks: CallbackTable,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following publish fail until switched off again.
    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.published_to(topic).pop().map(|m| m.payload)
    }

    pub fn clear(&self) {
        self.state().published.clear();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state().subscriptions.iter().cloned().collect()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Deliver a message as the broker would. Returns how many handlers ran,
    /// or the first handler error.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        let subscribed = self
            .state()
            .subscriptions
            .iter()
            .any(|filter| topic_matches(filter, topic));
        if !subscribed {
            return Ok(0);
        }
        let results = self
            .callbacks
            .dispatch(&InboundMessage::new(topic, payload.to_vec()));
        let delivered = results.len();
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(delivered)
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> Result<()> {
        let mut state = self.state();
        if state.fail_publishes {
            return Err(BridgeError::publish(topic, anyhow!("bus unavailable")));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retained,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.state().subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.state().subscriptions.remove(topic);
        Ok(())
    }

    fn register_callback(&self, filter: &str, handler: MessageHandler) {
        self.callbacks.insert(filter, handler);
    }

    fn remove_callback(&self, filter: &str) {
        self.callbacks.remove(filter);
    }
}

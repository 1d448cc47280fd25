use std::sync::{PoisonError, RwLock};

use super::bus::{InboundMessage, MessageHandler};
use crate::error::Result;

/// Topic filter to handler routing shared by the bus implementations.
#[derive(Default)]
pub struct CallbackTable {
    handlers: RwLock<Vec<(String, MessageHandler)>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filter: &str, handler: MessageHandler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|(existing, _)| existing != filter);
        handlers.push((filter.to_string(), handler));
    }

    pub fn remove(&self, filter: &str) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| existing != filter);
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every handler whose filter matches `message.topic`.
    ///
    /// Handlers are cloned out of the table first so a handler may register
    /// or remove callbacks without deadlocking.
    pub fn dispatch(&self, message: &InboundMessage) -> Vec<Result<()>> {
        let matching: Vec<MessageHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .map(|(_, handler)| handler.clone())
            .collect();
        matching.iter().map(|handler| handler(message)).collect()
    }
}

/// MQTT topic filter matching with `+` and trailing `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

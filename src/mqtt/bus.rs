use std::sync::Arc;

use crate::error::Result;

/// A message delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Handler invoked on the bus dispatch context for each matching message.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) -> Result<()> + Send + Sync>;

/// The publish/subscribe surface every worker and entity talks to.
///
/// Implementations are shared across worker threads and must serialize
/// access internally.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> Result<()>;

    fn subscribe(&self, topic: &str) -> Result<()>;

    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Route messages whose topic matches `filter` to `handler`. Replaces any
    /// handler already registered for the same filter.
    fn register_callback(&self, filter: &str, handler: MessageHandler);

    fn remove_callback(&self, filter: &str);
}

pub type SharedBus = Arc<dyn MessageBus>;

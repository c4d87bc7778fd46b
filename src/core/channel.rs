// In-process pub/sub channel carrying named JSON events.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

/// One message on the bus: an event name plus its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub event: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChannelMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a payload under `event`. Returns how many subscribers
    /// received it; zero is not an error.
    pub fn publish(&self, event: &str, payload: Value) -> usize {
        self.send(ChannelMessage {
            event: event.to_string(),
            payload,
        })
    }

    pub fn send(&self, message: ChannelMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Subscribe to messages named `event`. Only messages published after
    /// this call are delivered.
    pub fn subscribe(&self, event: &str) -> Subscription {
        Subscription {
            event: event.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct Subscription {
    event: String,
    rx: broadcast::Receiver<ChannelMessage>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Wait for the next matching payload. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(message) if message.event == self.event => return Some(message.payload),
                Ok(message) => {
                    debug!("Ignoring '{}' message on '{}' subscription", message.event, self.event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscription '{}' lagged, {} messages dropped", self.event, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

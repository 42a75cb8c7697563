//! Publish/subscribe channel carrying finished enrichment results.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::RelayError;

const DEFAULT_CAPACITY: usize = 256;

#[async_trait]
pub trait ResultSubscription: Send {
    /// Suspends until the next payload arrives.
    async fn next_message(&mut self) -> Result<String, RelayError>;

    /// Release the subscription. Safe to call more than once.
    async fn close(&mut self);
}

#[async_trait]
pub trait ResultChannel: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ResultSubscription>, RelayError>;
}

/// In-process bus of named broadcast channels.
pub struct LocalResultBus {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl Default for LocalResultBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalResultBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Publish a raw payload. Returns how many subscribers received it.
    pub fn publish(&self, channel: &str, payload: String) -> usize {
        match self.sender(channel).send(payload) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(
                    component = "pubsub",
                    event = "pubsub.no_subscribers",
                    channel,
                    "Published with no subscribers"
                );
                0
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl ResultChannel for LocalResultBus {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ResultSubscription>, RelayError> {
        if channel.trim().is_empty() {
            return Err(RelayError::Subscribe {
                channel: channel.to_string(),
                reason: "empty channel name".into(),
            });
        }
        Ok(Box::new(LocalSubscription {
            channel: channel.to_string(),
            rx: Some(self.sender(channel).subscribe()),
        }))
    }
}

struct LocalSubscription {
    channel: String,
    rx: Option<broadcast::Receiver<String>>,
}

#[async_trait]
impl ResultSubscription for LocalSubscription {
    async fn next_message(&mut self) -> Result<String, RelayError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(RelayError::Receive(format!(
                "subscription to {} already closed",
                self.channel
            )));
        };
        loop {
            match rx.recv().await {
                Ok(payload) => return Ok(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "pubsub",
                        event = "pubsub.lagged",
                        channel = %self.channel,
                        skipped,
                        "Subscriber lagged, results skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RelayError::ChannelClosed),
            }
        }
    }

    async fn close(&mut self) {
        if self.rx.take().is_some() {
            debug!(
                component = "pubsub",
                event = "pubsub.unsubscribed",
                channel = %self.channel,
                "Subscription closed"
            );
        }
    }
}

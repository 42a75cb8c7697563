//! Registry of live observer connections and fan-out to all of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use donebell_protocol::ServerMessage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SendError;

/// The one capability the hub needs from a transport.
#[async_trait]
pub trait ObserverConnection: Send + Sync {
    /// Unique for the lifetime of the process.
    fn id(&self) -> u64;

    async fn send(&self, message: &ServerMessage) -> Result<(), SendError>;
}

#[derive(Default)]
pub struct BroadcastHub {
    connections: Mutex<HashMap<u64, Arc<dyn ObserverConnection>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Arc<dyn ObserverConnection>) {
        let id = connection.id();
        let mut connections = self.connections.lock().await;
        connections.insert(id, connection);
        info!(
            component = "broadcast",
            event = "broadcast.observer_registered",
            connection_id = id,
            observers = connections.len(),
            "Observer registered"
        );
    }

    /// Returns false when the connection was already gone (e.g. evicted).
    pub async fn unregister(&self, connection_id: u64) -> bool {
        let mut connections = self.connections.lock().await;
        let removed = connections.remove(&connection_id).is_some();
        if removed {
            info!(
                component = "broadcast",
                event = "broadcast.observer_unregistered",
                connection_id,
                observers = connections.len(),
                "Observer unregistered"
            );
        }
        removed
    }

    /// Send to every registered connection. Connections whose send fails are
    /// removed after the sweep. Returns how many sends succeeded.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut connections = self.connections.lock().await;
        if connections.is_empty() {
            debug!(
                component = "broadcast",
                event = "broadcast.no_observers",
                "No observers connected, message dropped"
            );
            return 0;
        }

        let mut failed = Vec::new();
        let mut delivered = 0usize;
        for (id, connection) in connections.iter() {
            match connection.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        component = "broadcast",
                        event = "broadcast.send_failed",
                        connection_id = *id,
                        error = %e,
                        "Observer send failed, dropping connection"
                    );
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            connections.remove(id);
        }

        debug!(
            component = "broadcast",
            event = "broadcast.sent",
            delivered,
            dropped = failed.len(),
            "Broadcast complete"
        );
        delivered
    }

    pub async fn count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

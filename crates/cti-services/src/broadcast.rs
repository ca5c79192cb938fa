//! Fan-out of call state deltas to connected clients

use crate::messages::ClientMessage;
use async_trait::async_trait;
use cti_core::AppResult;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound half of a client connection
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send_text(&self, text: &str) -> AppResult<()>;
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Arc<dyn ClientSink>>,
    identities: HashMap<String, ConnectionId>,
}

impl Registry {
    fn remove(&mut self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        self.identities.retain(|_, owner| *owner != id);
        removed
    }
}

/// Registered client connections, optionally addressable by identity
#[derive(Default)]
pub struct BroadcastHub {
    registry: Mutex<Registry>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A later connection under the same identity
    /// takes over addressed delivery; the earlier one still gets broadcasts.
    pub fn connect(&self, sink: Arc<dyn ClientSink>, identity: Option<&str>) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut registry = self.registry.lock();
        registry.connections.insert(id, sink);
        if let Some(identity) = identity {
            registry.identities.insert(identity.to_string(), id);
        }
        info!(
            connection_id = %id,
            identity = identity.unwrap_or("-"),
            total = registry.connections.len(),
            "Client connected"
        );
        id
    }

    /// Remove a connection. Safe to call more than once.
    pub fn disconnect(&self, id: ConnectionId, identity: Option<&str>) {
        let mut registry = self.registry.lock();
        let removed = registry.remove(id);
        if let Some(identity) = identity {
            if registry.identities.get(identity) == Some(&id) {
                registry.identities.remove(identity);
            }
        }
        if removed {
            info!(connection_id = %id, total = registry.connections.len(), "Client disconnected");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    pub fn has_identity(&self, identity: &str) -> bool {
        self.registry.lock().identities.contains_key(identity)
    }

    /// Deliver `message` to every connection, pruning the ones whose send
    /// fails. Returns the number of successful deliveries.
    pub async fn broadcast(&self, message: &ClientMessage) -> usize {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let targets: Vec<(ConnectionId, Arc<dyn ClientSink>)> = self
            .registry
            .lock()
            .connections
            .iter()
            .map(|(id, sink)| (*id, sink.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let results = join_all(targets.iter().map(|(id, sink)| {
            let text = text.as_str();
            async move { (*id, sink.send_text(text).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Dropping unreachable client");
                    failed.push(id);
                }
            }
        }
        self.prune(&failed);

        debug!(kind = message.kind(), delivered, pruned = failed.len(), "Broadcast sent");
        delivered
    }

    /// Deliver to the connection registered under `identity`, if any
    pub async fn send_to(&self, identity: &str, message: &ClientMessage) -> bool {
        let target = self.registry.lock().identities.get(identity).copied();
        match target {
            Some(id) => self.send_to_connection(id, message).await,
            None => {
                debug!(identity, kind = message.kind(), "No connection for identity");
                false
            }
        }
    }

    pub async fn send_to_connection(&self, id: ConnectionId, message: &ClientMessage) -> bool {
        let sink = self.registry.lock().connections.get(&id).cloned();
        let Some(sink) = sink else {
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "Failed to serialize message");
                return false;
            }
        };

        match sink.send_text(&text).await {
            Ok(()) => true,
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Addressed send failed, pruning");
                self.prune(&[id]);
                false
            }
        }
    }

    fn prune(&self, ids: &[ConnectionId]) {
        if ids.is_empty() {
            return;
        }
        let mut registry = self.registry.lock();
        for id in ids {
            registry.remove(*id);
        }
    }
}

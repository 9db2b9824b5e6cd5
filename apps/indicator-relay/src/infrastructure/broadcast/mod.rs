//! Broadcast Channel Adapter
//!
//! Fan-out of published payloads to downstream consumers over a tokio
//! broadcast channel.
//!
//! # Delivery
//!
//! Publishing never blocks and never fails. A consumer that falls more than
//! `capacity` messages behind loses the oldest ones (`RecvError::Lagged`)
//! and continues from the newest; publishing with no consumers drops the
//! message.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::application::ports::{BroadcastPort, EventKind};

/// One published message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Broadcast {
    /// Event name.
    pub event: EventKind,
    /// Event payload.
    pub payload: Value,
}

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Messages buffered per consumer before it starts lagging.
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 4_096 }
    }
}

/// Hub distributing published payloads.
#[derive(Debug)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Arc<Broadcast>>,
}

impl BroadcastHub {
    /// Create a hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            tx: broadcast::channel(config.capacity.max(1)).0,
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// New consumer, receiving everything published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Broadcast>> {
        self.tx.subscribe()
    }

    /// Number of connected consumers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl BroadcastPort for BroadcastHub {
    fn publish(&self, event: EventKind, payload: Value) {
        if self.tx.send(Arc::new(Broadcast { event, payload })).is_err() {
            tracing::trace!(event = %event, "No broadcast consumers");
        }
    }
}

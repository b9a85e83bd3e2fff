//! Per-websocket-connection state, owned exclusively by the gateway actor
//! (see `gateway::mod`). Grounded on the `connections` / `subscribed_connections`
//! / `address_connections` bookkeeping in
//! `original_source/hathor/websocket/factory.py`.
//!
//! Rate limiting and buffering are deliberately *not* tracked here: per spec
//! section 3 (`RateBucket`, `BufferDeque`) and the factory's own
//! `self.rate_limiter` / `self.buffer_deques`, both are single,
//! gateway-wide instances keyed by `EventKind`, shared across every
//! connection a message fans out to — not per-connection state. See
//! `GatewayActor::buffers` / `GatewayActor::rate_limiter` in `gateway::mod`.

use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound messages handed to a connection's websocket send task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Value),
    Close,
}

/// One connected client, as tracked by the gateway actor.
pub struct Connection {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<Outbound>,
    /// Addresses this connection has subscribed to (spec 4.4), paired with
    /// whether the address had history at subscribe time (used to enforce
    /// `WS_MAX_SUBS_ADDRS_EMPTY`).
    pub subscribed_addresses: HashSet<String>,
    addresses_without_history: HashSet<String>,
    /// Named channels this connection has subscribed to (spec 4.4); once
    /// subscribed, subscription is terminal until disconnect (spec section 9,
    /// Open Question 2).
    pub subscribed_channels: HashSet<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            sender,
            subscribed_addresses: HashSet::new(),
            addresses_without_history: HashSet::new(),
            subscribed_channels: HashSet::new(),
        }
    }

    pub fn total_subscribed_addresses(&self) -> usize {
        self.subscribed_addresses.len()
    }

    pub fn empty_address_subscriptions(&self) -> usize {
        self.addresses_without_history.len()
    }

    pub fn subscribe_address(&mut self, address: String, has_history: bool) {
        if !has_history {
            self.addresses_without_history.insert(address.clone());
        }
        self.subscribed_addresses.insert(address);
    }

    pub fn unsubscribe_address(&mut self, address: &str) {
        self.subscribed_addresses.remove(address);
        self.addresses_without_history.remove(address);
    }

    /// Still in the default broadcast set, i.e. never joined a channel
    /// (spec section 9, Open Question 2: channel membership is terminal).
    pub fn in_default_set(&self) -> bool {
        self.subscribed_channels.is_empty()
    }
}

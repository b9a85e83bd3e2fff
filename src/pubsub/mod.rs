//! The process-internal publish/subscribe bus (spec section 4.2).
//!
//! Ported per the REDESIGN FLAGS note in spec section 9: instead of the
//! original `EventArguments` dynamic attribute bag and runtime thread-id
//! introspection, `EventKind`/`EventPayload` are a closed tagged union and
//! the bus exposes three explicit entry points plus one convenience method
//! that picks among them using a [`DispatchContext`] token.

pub mod serializer;

use crate::domain::SpentOutput;
use crate::domain::Transaction;
use crate::domain::TokenUid;
use crate::domain::UnspentOutput;
use crate::domain::WalletBalance;
use crate::reactor::DispatchContext;
use crate::reactor::Reactor;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// A closed enumeration of event names. Wire tags match
/// `original_source/hathor/pubsub.py`'s `HathorEvents` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ManagerOnStart,
    ManagerOnStop,
    NetworkPeerConnected,
    NetworkPeerDisconnected,
    NetworkNewTxAccepted,
    StorageTxVoided,
    StorageTxWinner,
    WalletOutputReceived,
    WalletInputSpent,
    WalletBalanceUpdated,
    WalletKeysGenerated,
    WalletGapLimit,
    WalletHistoryUpdated,
    WalletAddressHistory,
    WalletElementWinner,
    WalletElementVoided,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ManagerOnStart => "manager:on_start",
            EventKind::ManagerOnStop => "manager:on_stop",
            EventKind::NetworkPeerConnected => "network:peer_connected",
            EventKind::NetworkPeerDisconnected => "network:peer_disconnected",
            EventKind::NetworkNewTxAccepted => "network:new_tx_accepted",
            EventKind::StorageTxVoided => "storage:tx_voided",
            EventKind::StorageTxWinner => "storage:tx_winner",
            EventKind::WalletOutputReceived => "wallet:output_received",
            EventKind::WalletInputSpent => "wallet:output_spent",
            EventKind::WalletBalanceUpdated => "wallet:balance_updated",
            EventKind::WalletKeysGenerated => "wallet:keys_generated",
            EventKind::WalletGapLimit => "wallet:gap_limit",
            EventKind::WalletHistoryUpdated => "wallet:history_updated",
            EventKind::WalletAddressHistory => "wallet:address_history",
            EventKind::WalletElementWinner => "wallet:element_winner",
            EventKind::WalletElementVoided => "wallet:element_voided",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event-specific payload data. One variant per [`EventKind`]; the
/// passthrough kinds (`WALLET_KEYS_GENERATED` & friends) still carry a
/// typed address/fields shape rather than a fully dynamic bag, per the
/// REDESIGN FLAGS in spec section 9.
#[derive(Debug, Clone)]
pub enum EventPayload {
    ManagerOnStart,
    ManagerOnStop,
    NetworkPeerConnected { peer: Map<String, Value> },
    NetworkPeerDisconnected { peer: Map<String, Value> },
    NetworkNewTxAccepted { tx: Transaction },
    StorageTxVoided { tx: Transaction },
    StorageTxWinner { tx: Transaction },
    WalletOutputReceived { total: u64, output: UnspentOutput },
    WalletInputSpent { output_spent: SpentOutput },
    WalletBalanceUpdated { balance: HashMap<TokenUid, WalletBalance> },
    WalletKeysGenerated { fields: Map<String, Value> },
    WalletGapLimit { fields: Map<String, Value> },
    WalletHistoryUpdated { fields: Map<String, Value> },
    WalletAddressHistory { address: String, fields: Map<String, Value> },
    WalletElementWinner { address: String, fields: Map<String, Value> },
    WalletElementVoided { address: String, fields: Map<String, Value> },
}

impl EventPayload {
    /// The `EventKind` this payload was built for. Used to guard against a
    /// publisher attaching the wrong payload variant to a kind — the
    /// "should never enter here" branch from `serialize_message_data`
    /// becomes this check instead of a fallthrough match arm.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ManagerOnStart => EventKind::ManagerOnStart,
            EventPayload::ManagerOnStop => EventKind::ManagerOnStop,
            EventPayload::NetworkPeerConnected { .. } => EventKind::NetworkPeerConnected,
            EventPayload::NetworkPeerDisconnected { .. } => EventKind::NetworkPeerDisconnected,
            EventPayload::NetworkNewTxAccepted { .. } => EventKind::NetworkNewTxAccepted,
            EventPayload::StorageTxVoided { .. } => EventKind::StorageTxVoided,
            EventPayload::StorageTxWinner { .. } => EventKind::StorageTxWinner,
            EventPayload::WalletOutputReceived { .. } => EventKind::WalletOutputReceived,
            EventPayload::WalletInputSpent { .. } => EventKind::WalletInputSpent,
            EventPayload::WalletBalanceUpdated { .. } => EventKind::WalletBalanceUpdated,
            EventPayload::WalletKeysGenerated { .. } => EventKind::WalletKeysGenerated,
            EventPayload::WalletGapLimit { .. } => EventKind::WalletGapLimit,
            EventPayload::WalletHistoryUpdated { .. } => EventKind::WalletHistoryUpdated,
            EventPayload::WalletAddressHistory { .. } => EventKind::WalletAddressHistory,
            EventPayload::WalletElementWinner { .. } => EventKind::WalletElementWinner,
            EventPayload::WalletElementVoided { .. } => EventKind::WalletElementVoided,
        }
    }
}

/// A subscribed handler. Dispatch policy (spec 4.2) decides whether this
/// runs synchronously, deferred on the reactor, or handed off from a
/// worker; failures are caught and logged per-handler (spec section 7) so
/// one bad subscriber never blocks the rest.
pub type Handler = Arc<dyn Fn(EventKind, EventPayload) + Send + Sync>;

struct Subscription {
    handler: Handler,
}

/// Dispatches typed events to registered handlers, per spec section 4.2.
#[derive(Clone)]
pub struct Bus {
    reactor: Reactor,
    subscribers: Arc<Mutex<HashMap<EventKind, Vec<Subscription>>>>,
}

impl Bus {
    pub fn new(reactor: Reactor) -> Self {
        Self {
            reactor,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Idempotent by `(kind, handler)` identity: subscribing the same `Arc`
    /// twice for the same kind is a no-op.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        let slot = subscribers.entry(kind).or_default();
        if !slot.iter().any(|s| Arc::ptr_eq(&s.handler, &handler)) {
            slot.push(Subscription { handler });
        }
    }

    /// No-op if `(kind, handler)` was never subscribed.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        if let Some(slot) = subscribers.get_mut(&kind) {
            slot.retain(|s| !Arc::ptr_eq(&s.handler, handler));
        }
    }

    fn subscribers_for(&self, kind: EventKind) -> Vec<Handler> {
        let subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers
            .get(&kind)
            .map(|slot| slot.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Dispatches to every current subscriber of `payload.kind()`, using the
    /// delivery policy appropriate for `context` (spec 4.2).
    pub fn publish(&self, context: DispatchContext, payload: EventPayload) {
        match context {
            DispatchContext::NotRunning => self.publish_now(payload),
            DispatchContext::OnReactor => self.publish_on_reactor(payload),
            DispatchContext::OnWorker => self.publish_from_worker(payload),
        }
    }

    /// Invokes every handler synchronously in the caller. Used when the
    /// reactor isn't running yet (tests, boot).
    pub fn publish_now(&self, payload: EventPayload) {
        let kind = payload.kind();
        for handler in self.subscribers_for(kind) {
            invoke_handler(&handler, kind, payload.clone());
        }
    }

    /// Defers each handler via `schedule_later(0, ...)` so publication never
    /// reenters a publisher synchronously. Dispatch order equals
    /// subscription order; each handler still eventually runs on the
    /// reactor, interleaved with other reactor work.
    pub fn publish_on_reactor(&self, payload: EventPayload) {
        let kind = payload.kind();
        for handler in self.subscribers_for(kind) {
            let payload = payload.clone();
            self.reactor
                .schedule_later(std::time::Duration::ZERO, move || {
                    invoke_handler(&handler, kind, payload);
                });
        }
    }

    /// Hands each handler invocation off to the reactor via
    /// `submit_from_worker`. Used when the caller is on a worker thread.
    pub fn publish_from_worker(&self, payload: EventPayload) {
        let kind = payload.kind();
        for handler in self.subscribers_for(kind) {
            let payload = payload.clone();
            self.reactor.submit_from_worker(move || {
                invoke_handler(&handler, kind, payload);
            });
        }
    }
}

fn invoke_handler(handler: &Handler, kind: EventKind, payload: EventPayload) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(kind, payload)));
    if let Err(panic) = result {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%kind, %message, "subscriber panicked while handling event");
    }
}

/// Address-scoped event kinds, delivered only to subscribers of that
/// specific address (spec 4.4). Exposed here because the serializer also
/// needs to know which kinds carry an `address` field.
pub fn is_address_scoped(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::WalletAddressHistory | EventKind::WalletElementWinner | EventKind::WalletElementVoided
    )
}

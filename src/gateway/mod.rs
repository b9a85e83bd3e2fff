//! The websocket gateway actor (spec section 5).
//!
//! All mutable gateway state — connections, subscriptions, buffers, rate
//! limiters — is owned exclusively by one task with an mpsc inbox, the same
//! shape as the teacher's `notification::start` actor. This gives the
//! "mutated only on the reactor" invariant from spec section 2 without a
//! literal single OS thread: nothing outside this module ever reaches the
//! state directly, it only ever goes through [`GatewayHandle`].

pub mod buffer;
pub mod config;
pub mod connection;
pub mod websocket;

use crate::gateway::buffer::BufferDeque;
use crate::gateway::config::GatewayConfig;
use crate::gateway::connection::Connection;
use crate::gateway::connection::ConnectionId;
use crate::gateway::connection::Outbound;
use crate::domain::WalletIndex;
use crate::metrics::MetricsSource;
use crate::pubsub::serializer;
use crate::pubsub::is_address_scoped;
use crate::pubsub::Bus;
use crate::pubsub::EventKind;
use crate::pubsub::EventPayload;
use crate::rate_limiter::RateLimiter;
use crate::reactor::Reactor;
use serde_json::json;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A decoded inbound client message (spec 4.4's `handle_message` dispatch).
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Ping,
    SubscribeAddress { address: String },
    UnsubscribeAddress { address: String },
    SubscribeChannel { channel: String },
}

enum Command {
    Connect { id: ConnectionId, sender: mpsc::Sender<Outbound> },
    Disconnect { id: ConnectionId },
    ClientMessage { id: ConnectionId, message: ClientMessage },
    Event { kind: EventKind, payload: EventPayload },
    DrainBuffer { kind: EventKind },
    Tick,
}

/// A lightweight, cloneable front-door to the gateway actor.
#[derive(Clone)]
pub struct GatewayHandle {
    commands: mpsc::Sender<Command>,
}

impl GatewayHandle {
    /// Registers a new connection and returns the id the caller should
    /// associate with it.
    pub fn connect(&self, sender: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = Uuid::new_v4();
        let _ = self.commands.try_send(Command::Connect { id, sender });
        id
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        let _ = self.commands.send(Command::Disconnect { id }).await;
    }

    pub async fn client_message(&self, id: ConnectionId, message: ClientMessage) {
        let _ = self.commands.send(Command::ClientMessage { id, message }).await;
    }

    /// A non-blocking forward into the gateway actor's inbox. Uses
    /// `try_send` rather than spawning a task per call: since this closure
    /// itself runs in subscription order (spec 4.2), spawning a separate
    /// task per invocation would let the gateway's scheduler reorder
    /// same-kind events relative to publish order; a direct `try_send`
    /// preserves it.
    fn publish_handler(&self) -> Arc<dyn Fn(EventKind, EventPayload) + Send + Sync> {
        let commands = self.commands.clone();
        Arc::new(move |kind, payload| {
            if let Err(err) = commands.try_send(Command::Event { kind, payload }) {
                tracing::warn!(%kind, %err, "dropping event: gateway inbox full or closed");
            }
        })
    }
}

const INTERESTING_KINDS: &[EventKind] = &[
    EventKind::NetworkNewTxAccepted,
    EventKind::StorageTxVoided,
    EventKind::StorageTxWinner,
    EventKind::WalletOutputReceived,
    EventKind::WalletInputSpent,
    EventKind::WalletBalanceUpdated,
    EventKind::WalletKeysGenerated,
    EventKind::WalletGapLimit,
    EventKind::WalletHistoryUpdated,
    EventKind::WalletAddressHistory,
    EventKind::WalletElementWinner,
    EventKind::WalletElementVoided,
];

/// Starts the gateway actor task and its 1s dashboard-metrics broadcaster,
/// subscribing to the bus for every kind the gateway cares about.
/// Mirrors `HathorAdminWebsocketFactory.start` /
/// `_schedule_and_send_metric` in `original_source/hathor/websocket/factory.py`.
pub fn start(
    config: GatewayConfig,
    wallet_index: Arc<dyn WalletIndex>,
    metrics_source: Arc<dyn MetricsSource>,
    bus: Bus,
    reactor: Reactor,
) -> GatewayHandle {
    let (tx, rx) = mpsc::channel(1024);
    let handle = GatewayHandle { commands: tx.clone() };

    for kind in INTERESTING_KINDS {
        bus.subscribe(*kind, handle.publish_handler());
    }

    // Mirrors `_setup_rate_limit` in `original_source/hathor/websocket/factory.py`:
    // one rate limit and one buffer deque per controlled kind, installed
    // once at start, shared by every connection that kind fans out to.
    let mut rate_limiter = RateLimiter::new();
    let mut buffers = HashMap::new();
    for (kind, tuning) in &config.controlled_types {
        rate_limiter.set_limit(kind.as_str(), tuning.max_hits, tuning.hits_window_seconds);
        buffers.insert(*kind, BufferDeque::new(tuning.buffer_size));
    }

    let mut actor = GatewayActor {
        config,
        wallet_index,
        metrics_source,
        reactor: reactor.clone(),
        commands: tx.clone(),
        connections: HashMap::new(),
        rate_limiter,
        buffers,
    };
    tokio::spawn(async move { actor.run(rx).await });

    let tick_tx = tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tick_tx.send(Command::Tick).await.is_err() {
                break;
            }
        }
    });

    handle
}

struct GatewayActor {
    config: GatewayConfig,
    wallet_index: Arc<dyn WalletIndex>,
    metrics_source: Arc<dyn MetricsSource>,
    reactor: Reactor,
    commands: mpsc::Sender<Command>,
    connections: HashMap<ConnectionId, Connection>,
    /// Gateway-wide, one per controlled `EventKind` (spec 4.1, 4.4): not
    /// per-connection state. `add_hit`/buffering decisions are made once
    /// per published event, then the single resulting message (with its one
    /// `throttled` value) fans out to every recipient.
    rate_limiter: RateLimiter,
    buffers: HashMap<EventKind, BufferDeque<Value>>,
}

impl GatewayActor {
    async fn run(&mut self, mut inbox: mpsc::Receiver<Command>) {
        while let Some(command) = inbox.recv().await {
            match command {
                Command::Connect { id, sender } => self.on_connect(id, sender),
                Command::Disconnect { id } => self.on_disconnect(id),
                Command::ClientMessage { id, message } => self.on_client_message(id, message).await,
                Command::Event { kind, payload } => self.broadcast_message(kind, &payload).await,
                Command::DrainBuffer { kind } => self.process_deque(kind).await,
                Command::Tick => self.send_dashboard_metrics().await,
            }
        }
    }

    fn on_connect(&mut self, id: ConnectionId, sender: mpsc::Sender<Outbound>) {
        let connection = Connection::new(id, sender);
        self.connections.insert(id, connection);
        tracing::debug!(%id, total = self.connections.len(), "connection opened");
    }

    fn on_disconnect(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        tracing::debug!(%id, total = self.connections.len(), "connection closed");
    }

    async fn on_client_message(&mut self, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Ping => self.handle_ping(id).await,
            ClientMessage::SubscribeAddress { address } => self.handle_subscribe_address(id, address).await,
            ClientMessage::UnsubscribeAddress { address } => self.handle_unsubscribe_address(id, address).await,
            ClientMessage::SubscribeChannel { channel } => self.handle_subscribe_channel(id, channel).await,
        }
    }

    async fn handle_ping(&mut self, id: ConnectionId) {
        self.execute_send(id, json!({"type": "pong"})).await;
    }

    /// Enforces `WS_MAX_SUBS_ADDRS_CONN` / `WS_MAX_SUBS_ADDRS_EMPTY` (spec
    /// 4.4). Re-subscribing an address this connection already holds is a
    /// no-op success and never counts against either cap (spec section 8:
    /// "never exceeds limits falsely").
    async fn handle_subscribe_address(&mut self, id: ConnectionId, address: String) {
        let (accepted, reason) = {
            let Some(connection) = self.connections.get(&id) else { return };
            if connection.subscribed_addresses.contains(&address) {
                (true, String::new())
            } else if connection.total_subscribed_addresses() >= self.config.max_subs_addrs_conn {
                (
                    false,
                    format!(
                        "Reached maximum number of subscribed addresses ({}).",
                        self.config.max_subs_addrs_conn
                    ),
                )
            } else if !self.wallet_index.has_history(&address)
                && connection.empty_address_subscriptions() >= self.config.max_subs_addrs_empty
            {
                (
                    false,
                    format!(
                        "Reached maximum number of subscribed addresses without output ({}).",
                        self.config.max_subs_addrs_empty
                    ),
                )
            } else {
                (true, String::new())
            }
        };

        if accepted {
            if let Some(connection) = self.connections.get_mut(&id) {
                let has_history = self.wallet_index.has_history(&address);
                connection.subscribe_address(address.clone(), has_history);
            }
        }

        let response = if accepted {
            json!({"type": "subscribe_address", "success": true})
        } else {
            json!({"type": "subscribe_address", "success": false, "message": reason})
        };
        self.execute_send(id, response).await;
    }

    /// Mirrors `_handle_unsubscribe_address`: only replies when the address
    /// was actually subscribed on this connection.
    async fn handle_unsubscribe_address(&mut self, id: ConnectionId, address: String) {
        let was_subscribed = self
            .connections
            .get(&id)
            .is_some_and(|c| c.subscribed_addresses.contains(&address));
        if !was_subscribed {
            return;
        }
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.unsubscribe_address(&address);
        }
        self.execute_send(id, json!({"type": "unsubscribe_address", "success": true})).await;
    }

    /// Subscription to a channel is terminal until disconnect (spec section
    /// 9, Open Question 2) — there is no unsubscribe-from-channel message.
    /// Mirrors `_handle_subscribe_channel`: the success reply is sent
    /// unconditionally, but the connection only actually moves into the
    /// channel's set when the channel name is known.
    async fn handle_subscribe_channel(&mut self, id: ConnectionId, channel: String) {
        if self.config.channel_kinds(&channel).is_some() {
            if let Some(connection) = self.connections.get_mut(&id) {
                connection.subscribed_channels.insert(channel.clone());
            }
        }
        self.execute_send(id, json!({"type": "subscribed", "channel": channel, "success": true})).await;
    }

    fn channels_for_kind(&self, kind: EventKind) -> impl Iterator<Item = &'static str> + '_ {
        self.config
            .channels
            .iter()
            .filter(move |(_, kinds)| kinds.contains(&kind))
            .map(|(name, _)| *name)
    }

    /// Recipients for the default delivery path (`send_message` in
    /// `original_source/hathor/websocket/factory.py`): address-scoped kinds
    /// go only to that address's subscribers, everything else broadcasts to
    /// every connection still in the default set (spec 4.4, section 9 Open
    /// Question 2 — a connection that joined a channel never receives
    /// broadcast traffic again).
    fn default_recipients(&self, kind: EventKind, message: &Value) -> Vec<ConnectionId> {
        if is_address_scoped(kind) {
            let Some(address) = message.get("address").and_then(Value::as_str) else {
                return Vec::new();
            };
            return self
                .connections
                .values()
                .filter(|c| c.subscribed_addresses.contains(address))
                .map(|c| c.id)
                .collect();
        }

        self.connections
            .values()
            .filter(|c| c.in_default_set())
            .map(|c| c.id)
            .collect()
    }

    fn channel_recipients(&self, channel: &str) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.subscribed_channels.contains(channel))
            .map(|c| c.id)
            .collect()
    }

    async fn send_message(&mut self, kind: EventKind, message: Value) {
        for id in self.default_recipients(kind, &message) {
            self.execute_send(id, message.clone()).await;
        }
    }

    /// Builds the wire message, then either sends it now or enqueues it in
    /// the gateway-wide per-kind buffer (spec 4.4's delivery pipeline), and
    /// independently fans it out to any channel whose event set contains
    /// `kind` (channel delivery is not rate-limited). Mirrors
    /// `handle_publish` / `send_or_enqueue` in
    /// `original_source/hathor/websocket/factory.py`.
    async fn broadcast_message(&mut self, kind: EventKind, payload: &EventPayload) {
        let mut message = match serializer::serialize_message(kind, payload, &self.config.hathor_token_uid) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(%kind, %err, "dropping event with mismatched payload");
                return;
            }
        };

        if let Some(tuning) = self.config.controlled(kind) {
            let buffer_non_empty = self.buffers.get(&kind).map_or(false, |b| !b.is_empty());
            if buffer_non_empty || !self.rate_limiter.add_hit(kind.as_str()) {
                // Mirrors `factory.py` mutating the same dict to
                // `throttled=True` in `enqueue_for_later` before the channel
                // fan-out loop below runs, so channel recipients see the
                // same throttled value as the buffered copy.
                set_throttled(&mut message, true);
                self.enqueue_for_later(kind, message.clone(), tuning.time_buffering);
            } else {
                set_throttled(&mut message, false);
                self.send_message(kind, message.clone()).await;
            }
        } else {
            self.send_message(kind, message.clone()).await;
        }

        for channel in self.channels_for_kind(kind).collect::<Vec<_>>() {
            for id in self.channel_recipients(channel) {
                self.execute_send(id, message.clone()).await;
            }
        }
    }

    /// Pushes `message` (marked `throttled: true`) onto `kind`'s buffer,
    /// arming a drain exactly once on the empty-to-non-empty transition
    /// (spec section 9, Open Question 1).
    fn enqueue_for_later(&mut self, kind: EventKind, mut message: Value, time_buffering: f64) {
        set_throttled(&mut message, true);
        let Some(buffer) = self.buffers.get_mut(&kind) else { return };
        let armed = buffer.push(message);
        if armed {
            let commands = self.commands.clone();
            let delay = Duration::from_secs_f64(time_buffering);
            self.reactor.schedule_later(delay, move || {
                let commands = commands.clone();
                tokio::spawn(async move {
                    let _ = commands.send(Command::DrainBuffer { kind }).await;
                });
            });
        }
    }

    /// Drains `kind`'s buffer as far as the rate limiter allows, re-arming
    /// itself when it runs out of hits before the buffer empties. Mirrors
    /// `process_deque` in `original_source/hathor/websocket/factory.py`.
    async fn process_deque(&mut self, kind: EventKind) {
        let Some(tuning) = self.config.controlled(kind) else { return };
        loop {
            let is_empty = self.buffers.get(&kind).map_or(true, |b| b.is_empty());
            if is_empty {
                return;
            }

            if !self.rate_limiter.add_hit(kind.as_str()) {
                let commands = self.commands.clone();
                let delay = Duration::from_secs_f64(tuning.time_buffering);
                self.reactor.schedule_later(delay, move || {
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        let _ = commands.send(Command::DrainBuffer { kind }).await;
                    });
                });
                return;
            }

            let Some(buffer) = self.buffers.get_mut(&kind) else { return };
            let Some(mut message) = pop_front(buffer) else { return };
            if buffer.is_empty() {
                set_throttled(&mut message, false);
            }
            self.send_message(kind, message).await;
        }
    }

    /// Broadcasts to the default set only (spec 4.4: "broadcast ... to
    /// `connections`"); a connection that joined a channel is permanently
    /// out of that set (section 9, Open Question 2) and must not receive
    /// it, mirroring `_schedule_and_send_metric` fanning out over
    /// `self.connections` in `original_source/hathor/websocket/factory.py`.
    async fn send_dashboard_metrics(&mut self) {
        let ids: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.in_default_set())
            .map(|c| c.id)
            .collect();
        if ids.is_empty() {
            return;
        }
        let snapshot = self.metrics_source.snapshot();
        let message = snapshot.to_json();
        for id in ids {
            self.execute_send(id, message.clone()).await;
        }
    }

    async fn execute_send(&mut self, id: ConnectionId, message: Value) {
        let Some(connection) = self.connections.get(&id) else { return };
        if connection.sender.send(Outbound::Text(message)).await.is_err() {
            self.connections.remove(&id);
        }
    }
}

fn set_throttled(message: &mut Value, throttled: bool) {
    if let Value::Object(map) = message {
        map.insert("throttled".to_string(), Value::Bool(throttled));
    }
}

fn pop_front(buffer: &mut BufferDeque<Value>) -> Option<Value> {
    buffer.pop_front()
}

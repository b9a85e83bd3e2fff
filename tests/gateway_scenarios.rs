//! End-to-end scenarios from spec section 8, driven directly against
//! `GatewayHandle` (the gateway's public front door) instead of a real TCP
//! listener — the websocket framing itself is exercised by the unit tests in
//! `gateway::websocket`, so these integration tests focus on the
//! publish -> fan-out -> deliver pipeline the spec actually describes.

use dag_node_gateway::domain::InMemoryWalletIndex;
use dag_node_gateway::domain::NullWalletIndex;
use dag_node_gateway::domain::Transaction;
use dag_node_gateway::domain::WalletBalance;
use dag_node_gateway::gateway;
use dag_node_gateway::gateway::config::GatewayConfig;
use dag_node_gateway::gateway::connection::ConnectionId;
use dag_node_gateway::gateway::connection::Outbound;
use dag_node_gateway::gateway::ClientMessage;
use dag_node_gateway::gateway::GatewayHandle;
use dag_node_gateway::metrics::CountingMetricsSource;
use dag_node_gateway::pubsub::Bus;
use dag_node_gateway::pubsub::EventPayload;
use dag_node_gateway::reactor::DispatchContext;
use dag_node_gateway::reactor::Reactor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

fn new_gateway(config: GatewayConfig) -> (GatewayHandle, Bus) {
    let reactor = Reactor::new(tokio::runtime::Handle::current());
    let bus = Bus::new(reactor.clone());
    let wallet_index = Arc::new(NullWalletIndex);
    let metrics_source = Arc::new(CountingMetricsSource::new());
    let handle = gateway::start(config, wallet_index, metrics_source, bus.clone(), reactor);
    (handle, bus)
}

async fn connect(handle: &GatewayHandle) -> (ConnectionId, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(64);
    let id = handle.connect(tx);
    // Let the Connect command land before the test proceeds.
    tokio::task::yield_now().await;
    (id, rx)
}

async fn recv_text(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
    match timeout(RECV_TIMEOUT, rx.recv()).await {
        Ok(Some(Outbound::Text(value))) => value,
        Ok(Some(Outbound::Close)) => panic!("expected a text message, got a close"),
        Ok(None) => panic!("channel closed before a message arrived"),
        Err(_) => panic!("timed out waiting for a message"),
    }
}

fn sample_tx() -> Transaction {
    Transaction {
        hash: Some("deadbeef".to_string()),
        nonce: 1,
        timestamp: 10,
        version: 1,
        weight: 1.0,
        parents: vec![],
        inputs: vec![],
        outputs: vec![],
        is_block: false,
    }
}

#[tokio::test]
async fn scenario_1_ping_pong() {
    let (handle, _bus) = new_gateway(GatewayConfig::default());
    let (id, mut rx) = connect(&handle).await;

    handle.client_message(id, ClientMessage::Ping).await;

    let message = recv_text(&mut rx).await;
    assert_eq!(message["type"], "pong");
}

#[tokio::test]
async fn scenario_2_broadcast_accepted_tx_reaches_every_default_client() {
    let (handle, bus) = new_gateway(GatewayConfig::default());
    let (_id_a, mut rx_a) = connect(&handle).await;
    let (_id_b, mut rx_b) = connect(&handle).await;

    bus.publish(DispatchContext::NotRunning, EventPayload::NetworkNewTxAccepted { tx: sample_tx() });

    for rx in [&mut rx_a, &mut rx_b] {
        let message = recv_text(rx).await;
        assert_eq!(message["type"], "network:new_tx_accepted");
        assert_eq!(message["throttled"], false);
    }
}

#[tokio::test]
async fn scenario_3_rate_limited_balance_updates_drain_in_order() {
    // Matches the default WALLET_BALANCE_UPDATED tuning: max_hits=3,
    // window=1s, buffer_size=3, time_buffering=0.4s.
    let (handle, bus) = new_gateway(GatewayConfig::default());
    let (_id, mut rx) = connect(&handle).await;

    for locked in 0..5u64 {
        let mut balance = HashMap::new();
        balance.insert("00".to_string(), WalletBalance { locked, available: 0 });
        bus.publish(DispatchContext::NotRunning, EventPayload::WalletBalanceUpdated { balance });
        tokio::task::yield_now().await;
    }

    // First three admit immediately: #1 bypassed the deque entirely
    // (throttled=false), #2 and #3 land after the buffer already holds
    // something... but since the rate limiter admits all three before any
    // enqueue happens, all three of #1-3 send immediately, each still
    // inside the 1s window's hit budget.
    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(recv_text(&mut rx).await);
    }
    for message in &received {
        assert_eq!(message["type"], "wallet:balance_updated");
        assert_eq!(message["throttled"], false);
    }

    // #4 and #5 exceeded the 3-hits-per-second cap and were enqueued. The
    // drain re-arms every 0.4s but keeps finding the 1s window still full
    // until the original three hits age out (~1s in), so both land together
    // a little after the 1s mark; the second flips to throttled=false as it
    // empties the buffer.
    let long_timeout = Duration::from_secs(3);
    let fourth = match timeout(long_timeout, rx.recv()).await {
        Ok(Some(Outbound::Text(value))) => value,
        other => panic!("expected the 4th balance update, got {other:?}"),
    };
    assert_eq!(fourth["throttled"], true);
    assert_eq!(fourth["balance"]["locked"], 3);

    let fifth = match timeout(long_timeout, rx.recv()).await {
        Ok(Some(Outbound::Text(value))) => value,
        other => panic!("expected the 5th balance update, got {other:?}"),
    };
    assert_eq!(fifth["throttled"], false);
    assert_eq!(fifth["balance"]["locked"], 4);
}

#[tokio::test]
async fn scenario_4_address_scoping_delivers_only_to_the_subscriber() {
    let (handle, bus) = new_gateway(GatewayConfig::default());
    let (id_a, mut rx_a) = connect(&handle).await;
    let (id_b, mut rx_b) = connect(&handle).await;

    handle.client_message(id_a, ClientMessage::SubscribeAddress { address: "X".to_string() }).await;
    handle.client_message(id_b, ClientMessage::SubscribeAddress { address: "Y".to_string() }).await;
    assert_eq!(recv_text(&mut rx_a).await["success"], true);
    assert_eq!(recv_text(&mut rx_b).await["success"], true);

    bus.publish(
        DispatchContext::NotRunning,
        EventPayload::WalletAddressHistory {
            address: "X".to_string(),
            fields: serde_json::Map::new(),
        },
    );

    let message = recv_text(&mut rx_a).await;
    assert_eq!(message["type"], "wallet:address_history");
    assert_eq!(message["address"], "X");

    // B never receives anything for address X.
    assert!(timeout(Duration::from_millis(150), rx_b.recv()).await.is_err());
}

#[tokio::test]
async fn scenario_5_channel_routing_has_no_duplicate_delivery() {
    let (handle, bus) = new_gateway(GatewayConfig::default());
    let (_id_c, mut rx_c) = connect(&handle).await;
    let (_id_d, mut rx_d) = connect(&handle).await;

    handle.client_message(_id_c, ClientMessage::SubscribeChannel { channel: "wallet-service".to_string() }).await;
    let subscribed = recv_text(&mut rx_c).await;
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["channel"], "wallet-service");

    bus.publish(DispatchContext::NotRunning, EventPayload::NetworkNewTxAccepted { tx: sample_tx() });

    // D is still in the default broadcast set.
    let via_broadcast = recv_text(&mut rx_d).await;
    assert_eq!(via_broadcast["type"], "network:new_tx_accepted");

    // C receives exactly once, via the channel path.
    let via_channel = recv_text(&mut rx_c).await;
    assert_eq!(via_channel["type"], "network:new_tx_accepted");
    assert!(timeout(Duration::from_millis(150), rx_c.recv()).await.is_err());
}

#[tokio::test]
async fn scenario_7_subscription_cap_rejects_the_third_address() {
    let config = GatewayConfig { max_subs_addrs_conn: 2, ..GatewayConfig::default() };
    let (handle, _bus) = new_gateway(config);
    let (id, mut rx) = connect(&handle).await;

    handle.client_message(id, ClientMessage::SubscribeAddress { address: "a".to_string() }).await;
    assert_eq!(recv_text(&mut rx).await["success"], true);

    handle.client_message(id, ClientMessage::SubscribeAddress { address: "b".to_string() }).await;
    assert_eq!(recv_text(&mut rx).await["success"], true);

    handle.client_message(id, ClientMessage::SubscribeAddress { address: "c".to_string() }).await;
    let rejected = recv_text(&mut rx).await;
    assert_eq!(rejected["success"], false);
    assert!(rejected["message"].as_str().unwrap().contains("maximum"));
}

#[tokio::test]
async fn idempotent_subscribe_address_never_double_counts() {
    let config = GatewayConfig { max_subs_addrs_conn: 1, ..GatewayConfig::default() };
    let (handle, _bus) = new_gateway(config);
    let (id, mut rx) = connect(&handle).await;

    handle.client_message(id, ClientMessage::SubscribeAddress { address: "a".to_string() }).await;
    assert_eq!(recv_text(&mut rx).await["success"], true);

    // Re-subscribing the same address a connection already holds must not
    // consume a second slot against the cap.
    handle.client_message(id, ClientMessage::SubscribeAddress { address: "a".to_string() }).await;
    assert_eq!(recv_text(&mut rx).await["success"], true);
}

#[tokio::test]
async fn address_with_no_subscribers_is_dropped_silently() {
    let (handle, bus) = new_gateway(GatewayConfig::default());
    let (_id, mut rx) = connect(&handle).await;

    bus.publish(
        DispatchContext::NotRunning,
        EventPayload::WalletElementVoided {
            address: "nobody-subscribed".to_string(),
            fields: serde_json::Map::new(),
        },
    );

    assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
}

#[tokio::test]
async fn wallet_index_with_history_does_not_count_against_the_empty_cap() {
    let mut wallet_index = InMemoryWalletIndex::new();
    wallet_index.record_history("has-history");
    let wallet_index = Arc::new(wallet_index);

    let reactor = Reactor::new(tokio::runtime::Handle::current());
    let bus = Bus::new(reactor.clone());
    let metrics_source = Arc::new(CountingMetricsSource::new());
    let config = GatewayConfig { max_subs_addrs_empty: 0, ..GatewayConfig::default() };
    let handle = gateway::start(config, wallet_index, metrics_source, bus, reactor);

    let (id, mut rx) = connect(&handle).await;
    handle.client_message(id, ClientMessage::SubscribeAddress { address: "has-history".to_string() }).await;

    // The address has known history, so it doesn't count against
    // `max_subs_addrs_empty`, even though that cap is zero.
    assert_eq!(recv_text(&mut rx).await["success"], true);
}

//! The `dashboard:metrics` periodic broadcast (spec 4.4), grounded on
//! `_schedule_and_send_metric` in
//! `original_source/hathor/websocket/factory.py`, which samples the node
//! every second and fans the snapshot out to every connected client
//! regardless of subscription state.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use time::OffsetDateTime;

/// A single sample of node-wide counters, sent to every connected client
/// once a second.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardMetrics {
    pub transactions: u64,
    pub blocks: u64,
    pub best_block_height: u64,
    pub hash_rate: f64,
    pub block_hash_rate: f64,
    pub tx_hash_rate: f64,
    pub network_hash_rate: f64,
    pub peers: u64,
    pub time: i64,
}

impl DashboardMetrics {
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String("dashboard:metrics".to_string()));
        }
        value
    }
}

/// The seam the gateway needs to sample node-wide counters. Real metric
/// collection (mempool size, peer count, consensus height) is out of scope
/// (spec section 1); this trait is what a node wires its own counters
/// through.
pub trait MetricsSource: Send + Sync {
    fn snapshot(&self) -> DashboardMetrics;
}

/// A `MetricsSource` with counters a caller can update directly, useful for
/// a node with no separate metrics subsystem wired up yet, and for tests.
#[derive(Debug, Default)]
pub struct CountingMetricsSource {
    transactions: AtomicU64,
    blocks: AtomicU64,
    best_block_height: AtomicU64,
    peers: AtomicU64,
}

impl CountingMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self, height: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.best_block_height.store(height, Ordering::Relaxed);
    }

    pub fn set_peers(&self, peers: u64) {
        self.peers.store(peers, Ordering::Relaxed);
    }
}

impl MetricsSource for CountingMetricsSource {
    fn snapshot(&self) -> DashboardMetrics {
        DashboardMetrics {
            transactions: self.transactions.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            best_block_height: self.best_block_height.load(Ordering::Relaxed),
            hash_rate: 0.0,
            block_hash_rate: 0.0,
            tx_hash_rate: 0.0,
            network_hash_rate: 0.0,
            peers: self.peers.load(Ordering::Relaxed),
            time: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_the_dashboard_metrics_type_tag() {
        let source = CountingMetricsSource::new();
        source.record_transaction();
        source.record_block(7);
        source.set_peers(3);

        let json = source.snapshot().to_json();
        assert_eq!(json["type"], "dashboard:metrics");
        assert_eq!(json["transactions"], 1);
        assert_eq!(json["best_block_height"], 7);
        assert_eq!(json["peers"], 3);
    }
}

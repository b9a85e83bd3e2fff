//! Static tuning tables for the gateway, ported verbatim from
//! `original_source/hathor/websocket/factory.py`'s `CONTROLLED_TYPES`,
//! `CHANNELS` and `ADDRESS_EVENTS`.

use crate::pubsub::EventKind;
use std::collections::HashMap;

/// Per-kind buffering and rate-limit tuning (spec 4.1).
#[derive(Debug, Clone, Copy)]
pub struct ControlledTypeConfig {
    /// Max number of buffered messages held while a kind is being drained.
    pub buffer_size: usize,
    /// Delay, in seconds, before the buffered backlog is drained.
    pub time_buffering: f64,
    /// Max hits admitted per `hits_window_seconds` by the rate limiter.
    pub max_hits: usize,
    pub hits_window_seconds: f64,
}

/// Bundles every piece of static gateway tuning: which kinds are buffered
/// and rate-limited and how, which kinds fan out over named channels
/// instead of (or in addition to) the default broadcast, and the
/// per-connection/per-process address-subscription caps (spec 4.4).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub controlled_types: HashMap<EventKind, ControlledTypeConfig>,
    pub channels: HashMap<&'static str, Vec<EventKind>>,
    pub max_subs_addrs_conn: usize,
    pub max_subs_addrs_empty: usize,
    pub hathor_token_uid: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut controlled_types = HashMap::new();
        controlled_types.insert(
            EventKind::NetworkNewTxAccepted,
            ControlledTypeConfig { buffer_size: 20, time_buffering: 0.1, max_hits: 20, hits_window_seconds: 2.0 },
        );
        controlled_types.insert(
            EventKind::WalletOutputReceived,
            ControlledTypeConfig { buffer_size: 20, time_buffering: 0.1, max_hits: 10, hits_window_seconds: 2.0 },
        );
        controlled_types.insert(
            EventKind::WalletInputSpent,
            ControlledTypeConfig { buffer_size: 20, time_buffering: 0.1, max_hits: 10, hits_window_seconds: 2.0 },
        );
        controlled_types.insert(
            EventKind::WalletBalanceUpdated,
            ControlledTypeConfig { buffer_size: 3, time_buffering: 0.4, max_hits: 3, hits_window_seconds: 1.0 },
        );

        let mut channels = HashMap::new();
        channels.insert("wallet-service", vec![EventKind::NetworkNewTxAccepted]);

        Self {
            controlled_types,
            channels,
            max_subs_addrs_conn: 40,
            max_subs_addrs_empty: 20,
            hathor_token_uid: "00".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn controlled(&self, kind: EventKind) -> Option<ControlledTypeConfig> {
        self.controlled_types.get(&kind).copied()
    }

    pub fn channel_kinds(&self, channel: &str) -> Option<&[EventKind]> {
        self.channels.get(channel).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_documented_tuning_table() {
        let config = GatewayConfig::default();

        let balance = config.controlled(EventKind::WalletBalanceUpdated).unwrap();
        assert_eq!(balance.buffer_size, 3);
        assert_eq!(balance.time_buffering, 0.4);
        assert_eq!(balance.max_hits, 3);
        assert_eq!(balance.hits_window_seconds, 1.0);

        let tx = config.controlled(EventKind::NetworkNewTxAccepted).unwrap();
        assert_eq!(tx.buffer_size, 20);
        assert_eq!(tx.max_hits, 20);

        assert_eq!(
            config.channel_kinds("wallet-service"),
            Some([EventKind::NetworkNewTxAccepted].as_slice())
        );
        assert!(config.channel_kinds("no-such-channel").is_none());
    }
}

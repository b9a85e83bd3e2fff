//! Wire-format rules for turning an [`EventPayload`] into the JSON object a
//! websocket client actually receives. Ported field-for-field from
//! `original_source/hathor/websocket/factory.py`'s `serialize_message_data`.

use crate::pubsub::EventKind;
use crate::pubsub::EventPayload;
use serde_json::Map;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("payload for {0} does not match its own kind {1}")]
    KindMismatch(&'static str, &'static str),
}

/// Serializes `payload` for delivery under `kind`. The `type` tag itself is
/// added by the caller (the gateway), matching the factory's own
/// `message['type'] = event.value` assignment outside `serialize_message_data`.
pub fn serialize(kind: EventKind, payload: &EventPayload, hathor_token_uid: &str) -> Result<Map<String, Value>, SerializeError> {
    if payload.kind() != kind {
        return Err(SerializeError::KindMismatch(kind.as_str(), payload.kind().as_str()));
    }

    let mut data = Map::new();

    match payload {
        EventPayload::ManagerOnStart | EventPayload::ManagerOnStop => {}

        EventPayload::NetworkPeerConnected { peer } | EventPayload::NetworkPeerDisconnected { peer } => {
            data.insert("peer".to_string(), Value::Object(peer.clone()));
        }

        EventPayload::NetworkNewTxAccepted { tx } => {
            let mut tx_json = tx.to_json_extended();
            tx_json.insert("is_block".to_string(), Value::Bool(tx.is_block));
            data.insert("tx".to_string(), Value::Object(tx_json));
        }

        EventPayload::StorageTxVoided { tx } | EventPayload::StorageTxWinner { tx } => {
            data.insert("tx".to_string(), Value::Object(tx.to_json_extended()));
        }

        EventPayload::WalletOutputReceived { total, output } => {
            data.insert("total".to_string(), Value::from(*total));
            let output_json = serde_json::to_value(output).unwrap_or(Value::Null);
            data.insert("output".to_string(), output_json);
        }

        EventPayload::WalletInputSpent { output_spent } => {
            let output_json = serde_json::to_value(output_spent).unwrap_or(Value::Null);
            data.insert("output_spent".to_string(), output_json);
        }

        EventPayload::WalletBalanceUpdated { balance } => {
            // Only the configured token is reported, matching the factory's
            // `balance[settings.HATHOR_TOKEN_UID]` lookup.
            if let Some(token_balance) = balance.get(hathor_token_uid) {
                let balance_json = serde_json::to_value(token_balance).unwrap_or(Value::Null);
                data.insert("balance".to_string(), balance_json);
            }
        }

        EventPayload::WalletKeysGenerated { fields }
        | EventPayload::WalletGapLimit { fields }
        | EventPayload::WalletHistoryUpdated { fields } => {
            data.extend(fields.clone());
        }

        EventPayload::WalletAddressHistory { address, fields }
        | EventPayload::WalletElementWinner { address, fields }
        | EventPayload::WalletElementVoided { address, fields } => {
            data.insert("address".to_string(), Value::String(address.clone()));
            data.extend(fields.clone());
        }
    }

    Ok(data)
}

/// Builds the full envelope (`{"type": ..., ...data}`) sent on the wire.
pub fn serialize_message(kind: EventKind, payload: &EventPayload, hathor_token_uid: &str) -> Result<Value, SerializeError> {
    let mut message = serialize(kind, payload, hathor_token_uid)?;
    message.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    Ok(Value::Object(message))
}

//! Minimal stand-ins for the external collaborators this subsystem talks to:
//! transaction binary format, DAG consensus (tip selection) and the wallet's
//! address index. None of these implement real validation or balances —
//! that is explicitly out of scope (spec section 1) — they exist only so
//! the pub/sub payloads, the serializer and the mining handler have
//! something concrete to carry and are unit-testable in isolation.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashSet;

pub type Address = String;
pub type TokenUid = String;

/// A transaction or block in the DAG ledger. Real nodes attach a binary
/// struct, run PoW, and validate parents/weight; here we carry just enough
/// fields for the mining handler and the serializer's
/// `NETWORK_NEW_TX_ACCEPTED` rule to do their jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub hash: Option<String>,
    pub nonce: u64,
    pub timestamp: i64,
    pub version: u32,
    pub weight: f64,
    pub parents: Vec<String>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub is_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
    pub tx_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    pub value: u64,
    pub address: Address,
}

impl Transaction {
    pub fn decode_from_hex(tx_hex: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(tx_hex)?;
        let tx: Transaction = serde_json::from_slice(&bytes)?;
        Ok(tx)
    }

    /// The extended JSON form referenced by
    /// `original_source/hathor/websocket/factory.py`'s
    /// `serialize_message_data` rule for `NETWORK_NEW_TX_ACCEPTED`: the full
    /// transaction, plus whatever "extended" accounting fields a real node
    /// would add (accumulated weight, height, ...). We only need `is_block`
    /// at the call site, so the extension point here is left as a map any
    /// caller can enrich before publishing.
    pub fn to_json_extended(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Cooperative placeholder for the real PoW loop: spins until
    /// `should_stop` returns true or a nonce "solves" the toy difficulty.
    /// Proof-of-work itself is out of scope (spec section 1); this exists so
    /// the mining handler's cancellation path (spec 4.5, scenario 6) is
    /// exercised end-to-end.
    pub fn mine(&mut self, mut should_stop: impl FnMut() -> bool) -> Result<(), MiningCancelled> {
        loop {
            if should_stop() {
                return Err(MiningCancelled);
            }
            self.nonce = self.nonce.wrapping_add(1);
            if self.nonce % 4096 == 0 {
                self.hash = Some(format!("{:016x}", self.nonce));
                return Ok(());
            }
        }
    }

    pub fn verify(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.hash.is_some(), "transaction was never mined");
        Ok(())
    }
}

#[derive(Debug)]
pub struct MiningCancelled;

impl std::fmt::Display for MiningCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mining was cancelled")
    }
}

impl std::error::Error for MiningCancelled {}

/// An unspent transaction output, as reported on `WALLET_OUTPUT_RECEIVED`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnspentOutput {
    pub tx_id: String,
    pub index: u32,
    pub address: Address,
    pub value: u64,
    pub token_uid: TokenUid,
}

/// A spent transaction output, as reported on `WALLET_INPUT_SPENT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpentOutput {
    pub tx_id: String,
    pub index: u32,
    pub address: Address,
    pub value: u64,
    pub token_uid: TokenUid,
}

/// One token's balance record, as reported on `WALLET_BALANCE_UPDATED`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletBalance {
    pub locked: u64,
    pub available: u64,
}

/// Looks up whether an address has any known ledger history. Used to
/// enforce `WS_MAX_SUBS_ADDRS_EMPTY` (spec 4.4). Tip selection, balances and
/// the rest of the wallet index are out of scope; this trait is the single
/// seam the gateway needs from it.
pub trait WalletIndex: Send + Sync {
    fn has_history(&self, address: &Address) -> bool;
}

/// A `WalletIndex` that reports every address as empty. Used where no real
/// wallet index is wired up (e.g. a node running without the wallet
/// indexer), matching `wallet_index: Optional[WalletIndex]` in
/// `original_source/hathor/websocket/factory.py`.
#[derive(Debug, Default)]
pub struct NullWalletIndex;

impl WalletIndex for NullWalletIndex {
    fn has_history(&self, _address: &Address) -> bool {
        false
    }
}

/// An in-memory `WalletIndex` useful for tests.
#[derive(Debug, Default)]
pub struct InMemoryWalletIndex {
    addresses_with_history: HashSet<Address>,
}

impl InMemoryWalletIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_history(&mut self, address: impl Into<Address>) {
        self.addresses_with_history.insert(address.into());
    }
}

impl WalletIndex for InMemoryWalletIndex {
    fn has_history(&self, address: &Address) -> bool {
        self.addresses_with_history.contains(address)
    }
}

/// Selects parents for a new transaction at `timestamp`. Tip selection and
/// DAG consensus are out of scope (spec section 1); this trait is the
/// seam the mining handler needs to decide `tx.parents`.
pub trait TipSelector: Send + Sync {
    fn select_parents(&self, timestamp: i64) -> Vec<String>;
}

/// A `TipSelector` that always returns a fixed pair, useful for tests and
/// for nodes bootstrapping against the genesis block.
#[derive(Debug, Clone)]
pub struct FixedTipSelector(pub Vec<String>);

impl TipSelector for FixedTipSelector {
    fn select_parents(&self, _timestamp: i64) -> Vec<String> {
        self.0.clone()
    }
}

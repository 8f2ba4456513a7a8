//! JSON views for the query boundary
//!
//! Digests and byte strings are `0x`-prefixed hex. Numbers, capacities and
//! cycles are decimal strings. Internal types never leave the crate through
//! the query boundary without going through one of these views.

use crate::cell::CellMeta;
use crate::error::{Error, Result};
use crate::network::{NodeInfo, PeerInfo, PeerState};
use crate::tx_pool::TxPoolInfo;
use crate::types::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

fn parse_hex(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidParams(format!("hex string must start with 0x: {}", value)))?;
    hex::decode(digits)
        .map_err(|err| Error::InvalidParams(format!("invalid hex {}: {}", value, err)))
}

/// 32-byte digest as `0x` hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct H256(pub Hash);

impl FromStr for H256 {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let bytes = parse_hex(value)?;
        let hash: Hash = bytes
            .try_into()
            .map_err(|_| Error::InvalidParams(format!("expected 32 bytes: {}", value)))?;
        Ok(H256(hash))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<Hash> for H256 {
    fn from(hash: Hash) -> Self {
        H256(hash)
    }
}

/// Arbitrary bytes as `0x` hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonBytes(pub Bytes);

impl FromStr for JsonBytes {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        parse_hex(value).map(JsonBytes)
    }
}

impl fmt::Display for JsonBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Unsigned integer as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Uint64(pub u64);

impl FromStr for Uint64 {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        value
            .parse()
            .map(Uint64)
            .map_err(|err| Error::InvalidParams(format!("invalid number {}: {}", value, err)))
    }
}

impl fmt::Display for Uint64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Uint64 {
    fn from(value: u64) -> Self {
        Uint64(value)
    }
}

macro_rules! string_serde {
    ($($ty:ty),*) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                value.parse().map_err(de::Error::custom)
            }
        }
    )*};
}

string_serde!(H256, JsonBytes, Uint64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonOutPoint {
    pub tx_hash: H256,
    pub index: Uint64,
}

impl From<&OutPoint> for JsonOutPoint {
    fn from(out_point: &OutPoint) -> Self {
        JsonOutPoint {
            tx_hash: H256(out_point.tx_hash),
            index: Uint64(u64::from(out_point.index)),
        }
    }
}

impl TryFrom<JsonOutPoint> for OutPoint {
    type Error = Error;

    fn try_from(json: JsonOutPoint) -> Result<Self> {
        let index = u32::try_from(json.index.0)
            .map_err(|_| {
                Error::InvalidParams(format!("out-point index {} out of range", json.index))
            })?;
        Ok(OutPoint::new(json.tx_hash.0, index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonScript {
    pub code_hash: H256,
    pub args: Vec<JsonBytes>,
}

impl From<&Script> for JsonScript {
    fn from(script: &Script) -> Self {
        JsonScript {
            code_hash: H256(script.code_hash),
            args: script.args.iter().cloned().map(JsonBytes).collect(),
        }
    }
}

impl From<JsonScript> for Script {
    fn from(json: JsonScript) -> Self {
        Script::new(json.code_hash.0, json.args.into_iter().map(|arg| arg.0).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonCellOutput {
    pub capacity: Uint64,
    pub data: JsonBytes,
    pub lock: JsonScript,
    #[serde(rename = "type")]
    pub type_: Option<JsonScript>,
}

impl From<&CellOutput> for JsonCellOutput {
    fn from(output: &CellOutput) -> Self {
        JsonCellOutput {
            capacity: Uint64(output.capacity),
            data: JsonBytes(output.data.clone()),
            lock: (&output.lock).into(),
            type_: output.type_.as_ref().map(JsonScript::from),
        }
    }
}

impl From<JsonCellOutput> for CellOutput {
    fn from(json: JsonCellOutput) -> Self {
        CellOutput::new(
            json.capacity.0,
            json.data.0,
            json.lock.into(),
            json.type_.map(Script::from),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonCellInput {
    pub previous_output: JsonOutPoint,
    pub since: Uint64,
}

/// Transaction as submitted by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonTransaction {
    pub version: Uint64,
    pub deps: Vec<JsonOutPoint>,
    pub inputs: Vec<JsonCellInput>,
    pub outputs: Vec<JsonCellOutput>,
    pub witnesses: Vec<Vec<JsonBytes>>,
}

impl From<&Transaction> for JsonTransaction {
    fn from(tx: &Transaction) -> Self {
        JsonTransaction {
            version: Uint64(u64::from(tx.version)),
            deps: tx.deps.iter().map(JsonOutPoint::from).collect(),
            inputs: tx
                .inputs
                .iter()
                .map(|input| JsonCellInput {
                    previous_output: (&input.previous_output).into(),
                    since: Uint64(input.since),
                })
                .collect(),
            outputs: tx.outputs.iter().map(JsonCellOutput::from).collect(),
            witnesses: tx
                .witnesses
                .iter()
                .map(|witness| witness.iter().cloned().map(JsonBytes).collect())
                .collect(),
        }
    }
}

impl TryFrom<JsonTransaction> for Transaction {
    type Error = Error;

    fn try_from(json: JsonTransaction) -> Result<Self> {
        let version = u32::try_from(json.version.0)
            .map_err(|_| Error::InvalidParams(format!("version {} out of range", json.version)))?;
        let deps = json
            .deps
            .into_iter()
            .map(OutPoint::try_from)
            .collect::<Result<Vec<_>>>()?;
        let inputs = json
            .inputs
            .into_iter()
            .map(|input| Ok(CellInput::new(input.previous_output.try_into()?, input.since.0)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Transaction {
            version,
            deps,
            inputs,
            outputs: json.outputs.into_iter().map(CellOutput::from).collect(),
            witnesses: json
                .witnesses
                .into_iter()
                .map(|witness| witness.into_iter().map(|item| item.0).collect())
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub inner: JsonTransaction,
    pub hash: H256,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        TransactionView { inner: tx.into(), hash: H256(tx.hash()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonSeal {
    pub nonce: Uint64,
    pub proof: JsonBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderView {
    pub version: Uint64,
    pub parent_hash: H256,
    pub timestamp: Uint64,
    pub number: Uint64,
    pub transactions_root: H256,
    pub witnesses_root: H256,
    pub proposals_hash: H256,
    pub uncles_hash: H256,
    pub uncles_count: Uint64,
    pub epoch: Uint64,
    pub difficulty: Uint64,
    pub seal: JsonSeal,
    pub hash: H256,
}

impl From<&Header> for HeaderView {
    fn from(header: &Header) -> Self {
        HeaderView {
            version: Uint64(u64::from(header.version)),
            parent_hash: H256(header.parent_hash),
            timestamp: Uint64(header.timestamp),
            number: Uint64(header.number),
            transactions_root: H256(header.transactions_root),
            witnesses_root: H256(header.witnesses_root),
            proposals_hash: H256(header.proposals_hash),
            uncles_hash: H256(header.uncles_hash),
            uncles_count: Uint64(u64::from(header.uncles_count)),
            epoch: Uint64(header.epoch),
            difficulty: Uint64(header.difficulty),
            seal: JsonSeal {
                nonce: Uint64(header.seal.nonce),
                proof: JsonBytes(header.seal.proof.clone()),
            },
            hash: H256(header.hash()),
        }
    }
}

fn short_id_hex(id: &ProposalShortId) -> JsonBytes {
    JsonBytes(id.0.to_vec())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncleBlockView {
    pub header: HeaderView,
    pub proposals: Vec<JsonBytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub header: HeaderView,
    pub uncles: Vec<UncleBlockView>,
    pub transactions: Vec<TransactionView>,
    pub proposals: Vec<JsonBytes>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            header: (&block.header).into(),
            uncles: block
                .uncles
                .iter()
                .map(|uncle| UncleBlockView {
                    header: (&uncle.header).into(),
                    proposals: uncle.proposals.iter().map(short_id_hex).collect(),
                })
                .collect(),
            transactions: block.transactions.iter().map(TransactionView::from).collect(),
            proposals: block.proposals.iter().map(short_id_hex).collect(),
        }
    }
}

/// `get_live_cell` result. `cell` is set only when `status` is `live`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWithStatus {
    pub cell: Option<JsonCellOutput>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutputWithOutPoint {
    pub out_point: JsonOutPoint,
    pub capacity: Uint64,
    pub lock: JsonScript,
    pub block_number: Option<Uint64>,
}

impl From<&CellMeta> for CellOutputWithOutPoint {
    fn from(meta: &CellMeta) -> Self {
        CellOutputWithOutPoint {
            out_point: (&meta.out_point).into(),
            capacity: Uint64(meta.capacity()),
            lock: (&meta.cell_output.lock).into(),
            block_number: meta.block_number().map(Uint64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPointView {
    pub block_number: Uint64,
    pub tx_hash: H256,
    pub index: Uint64,
}

impl From<&TransactionPoint> for TransactionPointView {
    fn from(point: &TransactionPoint) -> Self {
        TransactionPointView {
            block_number: Uint64(point.block_number),
            tx_hash: H256(point.tx_hash),
            index: Uint64(u64::from(point.index)),
        }
    }
}

/// A cell of a lock hash with the transactions that created and consumed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTransaction {
    pub created_by: Option<TransactionPointView>,
    pub consumed_by: Option<TransactionPointView>,
}

impl From<&CellMeta> for CellTransaction {
    fn from(meta: &CellMeta) -> Self {
        CellTransaction {
            created_by: meta.created_by.as_ref().map(TransactionPointView::from),
            consumed_by: meta.consumed_by.as_ref().map(TransactionPointView::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochView {
    pub number: Uint64,
    pub start_number: Uint64,
    pub length: Uint64,
    pub difficulty: Uint64,
    pub block_reward: Uint64,
    pub remainder_reward: Uint64,
}

impl From<&EpochExt> for EpochView {
    fn from(epoch: &EpochExt) -> Self {
        EpochView {
            number: Uint64(epoch.number),
            start_number: Uint64(epoch.start_number),
            length: Uint64(epoch.length),
            difficulty: Uint64(epoch.difficulty),
            block_reward: Uint64(epoch.block_reward),
            remainder_reward: Uint64(epoch.remainder_reward),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub status: String,
    pub block_hash: Option<H256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWithStatus {
    pub transaction: Option<TransactionView>,
    pub tx_status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPoolInfoView {
    pub pending: Uint64,
    pub proposed: Uint64,
    pub orphan: Uint64,
    pub last_txs_updated_at: Uint64,
    pub total_tx_size: Uint64,
    pub total_tx_cycles: Uint64,
}

impl From<&TxPoolInfo> for TxPoolInfoView {
    fn from(info: &TxPoolInfo) -> Self {
        TxPoolInfoView {
            pending: Uint64(info.pending as u64),
            proposed: Uint64(info.proposed as u64),
            orphan: Uint64(info.orphan as u64),
            last_txs_updated_at: Uint64(info.last_txs_updated_at),
            total_tx_size: Uint64(info.total_tx_size as u64),
            total_tx_cycles: Uint64(info.total_tx_cycles),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunResult {
    pub cycles: Uint64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub tip_number: Uint64,
    pub tip_hash: H256,
    pub epoch: Uint64,
    pub difficulty: Uint64,
    pub median_time: Uint64,
    pub is_initial_block_download: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddressView {
    pub address: String,
    pub score: Uint64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub version: String,
    pub node_id: String,
    pub addresses: Vec<NodeAddressView>,
    pub is_outbound: Option<bool>,
}

impl From<&NodeInfo> for NodeView {
    fn from(node: &NodeInfo) -> Self {
        NodeView {
            version: node.version.clone(),
            node_id: node.node_id.clone(),
            addresses: node
                .addresses
                .iter()
                .map(|addr| NodeAddressView {
                    address: addr.address.clone(),
                    score: Uint64(addr.score),
                })
                .collect(),
            is_outbound: None,
        }
    }
}

impl From<&PeerInfo> for NodeView {
    fn from(peer: &PeerInfo) -> Self {
        NodeView { is_outbound: Some(peer.is_outbound), ..NodeView::from(&peer.node) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStateView {
    pub peer: String,
    pub last_updated: Uint64,
    pub blocks_in_flight: Uint64,
}

impl From<&PeerState> for PeerStateView {
    fn from(state: &PeerState) -> Self {
        PeerStateView {
            peer: state.peer_id.clone(),
            last_updated: Uint64(state.last_updated),
            blocks_in_flight: Uint64(u64::from(state.blocks_in_flight)),
        }
    }
}

//! Core cell-ledger types

use crate::constants::*;
use crate::hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash type: 256-bit digest
pub type Hash = [u8; 32];

/// Byte string type
pub type Bytes = Vec<u8>;

/// Capacity in shannons
pub type Capacity = u64;

pub type BlockNumber = u64;

pub type EpochNumber = u64;

/// Metered script execution cost
pub type Cycle = u64;

/// Witness items attached to one input
pub type Witness = Vec<Bytes>;

/// OutPoint: identifies the creation site of a cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: Hash, index: u32) -> Self {
        OutPoint { tx_hash, index }
    }

    /// The out-point referenced by a cellbase input.
    pub fn null() -> Self {
        OutPoint { tx_hash: [0; 32], index: NULL_OUT_POINT_INDEX }
    }

    pub fn is_null(&self) -> bool {
        self.tx_hash == [0; 32] && self.index == NULL_OUT_POINT_INDEX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}:{}", hex::encode(self.tx_hash), self.index)
    }
}

/// Script: program reference plus arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: Hash,
    pub args: Vec<Bytes>,
}

impl Script {
    pub fn new(code_hash: Hash, args: Vec<Bytes>) -> Self {
        Script { code_hash, args }
    }

    /// Script hash. For a lock script this is the lock hash.
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::new();
        hash::serialize_script(self, &mut bytes);
        hash::sha256(&bytes)
    }

    /// Bytes this script occupies inside a cell.
    pub fn occupied_size(&self) -> u64 {
        32 + self.args.iter().map(|arg| arg.len() as u64).sum::<u64>()
    }
}

/// CellOutput: capacity, data and guard scripts of a cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    pub capacity: Capacity,
    pub data: Bytes,
    pub lock: Script,
    pub type_: Option<Script>,
}

impl CellOutput {
    pub fn new(capacity: Capacity, data: Bytes, lock: Script, type_: Option<Script>) -> Self {
        CellOutput { capacity, data, lock, type_ }
    }

    pub fn data_hash(&self) -> Hash {
        hash::sha256(&self.data)
    }

    /// Minimal capacity the cell must carry to pay for its own storage.
    pub fn occupied_capacity(&self) -> Option<Capacity> {
        let bytes = CAPACITY_FIELD_SIZE
            + self.data.len() as u64
            + self.lock.occupied_size()
            + self.type_.as_ref().map(Script::occupied_size).unwrap_or(0);
        bytes.checked_mul(ONE_CKB)
    }

    pub fn is_lack_of_capacity(&self) -> bool {
        match self.occupied_capacity() {
            Some(occupied) => occupied > self.capacity,
            None => true,
        }
    }
}

/// CellInput: reference to a spent cell plus a since constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    pub previous_output: OutPoint,
    pub since: u64,
}

impl CellInput {
    pub fn new(previous_output: OutPoint, since: u64) -> Self {
        CellInput { previous_output, since }
    }

    pub fn new_cellbase_input(block_number: BlockNumber) -> Self {
        CellInput { previous_output: OutPoint::null(), since: block_number }
    }
}

/// Transaction. Witnesses are excluded from `hash()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub deps: Vec<OutPoint>,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::new();
        hash::serialize_raw_transaction(self, &mut bytes);
        hash::sha256(&bytes)
    }

    /// Hash over the full transaction including witnesses.
    pub fn witness_hash(&self) -> Hash {
        let mut bytes = Vec::new();
        hash::serialize_transaction(self, &mut bytes);
        hash::sha256(&bytes)
    }

    pub fn serialized_size(&self) -> usize {
        let mut bytes = Vec::new();
        hash::serialize_transaction(self, &mut bytes);
        bytes.len()
    }

    pub fn is_cellbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    pub fn proposal_short_id(&self) -> ProposalShortId {
        ProposalShortId::from_tx_hash(&self.hash())
    }

    pub fn input_pts(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|input| &input.previous_output)
    }

    pub fn output_pts(&self) -> Vec<OutPoint> {
        let tx_hash = self.hash();
        (0..self.outputs.len() as u32).map(|index| OutPoint::new(tx_hash, index)).collect()
    }

    pub fn outputs_capacity(&self) -> Option<Capacity> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.capacity))
    }
}

/// Proposal short id: the first bytes of a transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalShortId(pub [u8; PROPOSAL_SHORT_ID_LENGTH]);

impl ProposalShortId {
    pub fn from_tx_hash(tx_hash: &Hash) -> Self {
        let mut id = [0u8; PROPOSAL_SHORT_ID_LENGTH];
        id.copy_from_slice(&tx_hash[..PROPOSAL_SHORT_ID_LENGTH]);
        ProposalShortId(id)
    }
}

/// Seal produced by the proof-of-work collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    pub nonce: u64,
    pub proof: Bytes,
}

/// Block header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub parent_hash: Hash,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub number: BlockNumber,
    pub transactions_root: Hash,
    pub witnesses_root: Hash,
    pub proposals_hash: Hash,
    pub uncles_hash: Hash,
    pub uncles_count: u32,
    pub epoch: EpochNumber,
    pub difficulty: u64,
    pub seal: Seal,
}

impl Header {
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::new();
        hash::serialize_header(self, &mut bytes);
        hash::sha256(&bytes)
    }
}

/// Uncle block: a header plus its proposals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncleBlock {
    pub header: Header,
    pub proposals: Vec<ProposalShortId>,
}

/// Block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub uncles: Vec<UncleBlock>,
    pub transactions: Vec<Transaction>,
    pub proposals: Vec<ProposalShortId>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Proposal ids carried by this block and its uncles.
    pub fn union_proposal_ids(&self) -> impl Iterator<Item = &ProposalShortId> {
        self.proposals
            .iter()
            .chain(self.uncles.iter().flat_map(|uncle| uncle.proposals.iter()))
    }
}

/// Epoch schedule entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochExt {
    pub number: EpochNumber,
    pub start_number: BlockNumber,
    pub length: BlockNumber,
    pub difficulty: u64,
    pub block_reward: Capacity,
    pub remainder_reward: Capacity,
    pub last_block_hash_in_previous_epoch: Hash,
}

impl EpochExt {
    pub fn end_number(&self) -> BlockNumber {
        self.start_number + self.length - 1
    }

    pub fn contains(&self, number: BlockNumber) -> bool {
        number >= self.start_number && number <= self.end_number()
    }
}

/// Position of a transaction (or an input/output within it) on the main chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPoint {
    pub block_number: BlockNumber,
    pub tx_hash: Hash,
    pub index: u32,
}

/// Where a committed transaction lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAddress {
    pub block_hash: Hash,
    pub block_number: BlockNumber,
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            version: 0,
            deps: vec![OutPoint::new([9; 32], 0)],
            inputs: vec![CellInput::new(OutPoint::new([1; 32], 0), 0)],
            outputs: vec![CellOutput::new(
                100 * ONE_CKB,
                vec![],
                Script::new([2; 32], vec![]),
                None,
            )],
            witnesses: vec![vec![vec![1, 2, 3]]],
        }
    }

    #[test]
    fn test_witnesses_excluded_from_hash() {
        let tx = sample_transaction();
        let mut signed = tx.clone();
        signed.witnesses = vec![vec![vec![7; 64]]];

        assert_eq!(tx.hash(), signed.hash());
        assert_ne!(tx.witness_hash(), signed.witness_hash());
    }

    #[test]
    fn test_hash_covers_outputs() {
        let tx = sample_transaction();
        let mut other = tx.clone();
        other.outputs[0].capacity += 1;
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn test_cellbase_detection() {
        let mut tx = sample_transaction();
        assert!(!tx.is_cellbase());
        tx.inputs = vec![CellInput::new_cellbase_input(5)];
        assert!(tx.is_cellbase());
    }

    #[test]
    fn test_occupied_capacity() {
        let lock = Script::new([0; 32], vec![vec![0; 20]]);
        let output = CellOutput::new(60 * ONE_CKB, vec![], lock, None);
        assert_eq!(output.occupied_capacity(), Some(60 * ONE_CKB));
        assert!(!output.is_lack_of_capacity());

        let mut small = output.clone();
        small.capacity = 59 * ONE_CKB;
        assert!(small.is_lack_of_capacity());
    }

    #[test]
    fn test_proposal_short_id_is_hash_prefix() {
        let tx = sample_transaction();
        let id = tx.proposal_short_id();
        assert_eq!(&id.0[..], &tx.hash()[..PROPOSAL_SHORT_ID_LENGTH]);
    }

    #[test]
    fn test_epoch_contains() {
        let epoch = EpochExt {
            number: 1,
            start_number: 100,
            length: 50,
            difficulty: 1,
            block_reward: 1,
            remainder_reward: 0,
            last_block_hash_in_previous_epoch: [0; 32],
        };
        assert_eq!(epoch.end_number(), 149);
        assert!(epoch.contains(100));
        assert!(epoch.contains(149));
        assert!(!epoch.contains(150));
    }
}

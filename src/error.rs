//! Error types for the cell ledger and transaction pool

use crate::types::{Hash, OutPoint};
use std::fmt;
use thiserror::Error;

/// Which script of a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptGroupType {
    Lock,
    Type,
}

/// Identifies the script group that produced a [`Error::ScriptFailure`].
///
/// `index` is the first input (lock groups, or type groups that appear in
/// inputs) or output (type groups only present in outputs) of the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRef {
    pub group_type: ScriptGroupType,
    pub script_hash: Hash,
    pub index: usize,
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.group_type {
            ScriptGroupType::Lock => "lock",
            ScriptGroupType::Type => "type",
        };
        write!(f, "{} script 0x{} at index {}", kind, hex::encode(self.script_hash), self.index)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Double spend of {0}")]
    DoubleSpend(OutPoint),

    #[error("Script failure: exit code {exit_code} in {script_ref}")]
    ScriptFailure { exit_code: i8, script_ref: ScriptRef },

    #[error("Conflict on {0}")]
    Conflict(OutPoint),

    #[error("Orphan block: unknown parent 0x{}", hex::encode(.parent_hash))]
    OrphanBlock { parent_hash: Hash },

    #[error("Block validation failed: {0}")]
    InvalidBlock(String),

    #[error("Transaction validation failed: {0}")]
    InvalidTransaction(String),

    #[error("Duplicate transaction 0x{}", hex::encode(.0))]
    Duplicate(Hash),

    #[error("Immature input {out_point}: spendable from block {spendable_at}")]
    Immature { out_point: OutPoint, spendable_at: u64 },

    #[error("Insufficient capacity: inputs {inputs} < outputs {outputs}")]
    InsufficientCapacity { inputs: u64, outputs: u64 },

    #[error("Fee rate too low: fee {fee} < minimum {minimum}")]
    LowFeeRate { fee: u64, minimum: u64 },

    #[error("Transaction pool is full")]
    PoolFull,

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node is shut down")]
    Shutdown,
}

impl Error {
    /// Consistency violations inside the chain index or cell set. These point at
    /// an upstream validation bug and must never be swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DoubleSpend(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

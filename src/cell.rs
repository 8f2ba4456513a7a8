//! Cell records and transaction resolution
//!
//! A transaction is *resolved* by looking up every dep and input out-point
//! through a [`CellProvider`]. The chain's [`CellSet`](crate::cell_set::CellSet)
//! is the canonical provider; the transaction pool layers its own unconfirmed
//! outputs on top of it.

use crate::error::{Error, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Everything known about one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMeta {
    pub out_point: OutPoint,
    pub cell_output: CellOutput,
    /// Created by a cellbase transaction.
    pub cellbase: bool,
    /// `None` for an unconfirmed output served by the pool.
    pub created_by: Option<TransactionPoint>,
    pub consumed_by: Option<TransactionPoint>,
}

impl CellMeta {
    pub fn capacity(&self) -> Capacity {
        self.cell_output.capacity
    }

    pub fn lock_hash(&self) -> Hash {
        self.cell_output.lock.hash()
    }

    pub fn block_number(&self) -> Option<BlockNumber> {
        self.created_by.as_ref().map(|point| point.block_number)
    }

    pub fn is_live(&self) -> bool {
        self.consumed_by.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellStatus {
    Live(CellMeta),
    /// Created and later consumed on the main chain.
    Dead,
    /// Never created on the main chain.
    Unknown,
}

impl CellStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, CellStatus::Live(_))
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, CellStatus::Dead)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CellStatus::Unknown)
    }

    pub fn live_cell(self) -> Option<CellMeta> {
        match self {
            CellStatus::Live(meta) => Some(meta),
            _ => None,
        }
    }

    /// Lower-case name used at the query boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Live(_) => "live",
            CellStatus::Dead => "dead",
            CellStatus::Unknown => "unknown",
        }
    }
}

/// Source of cell statuses used for resolution and script execution.
pub trait CellProvider {
    fn cell(&self, out_point: &OutPoint) -> CellStatus;
}

/// A transaction together with the cells its deps and inputs point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransaction<'a> {
    pub transaction: &'a Transaction,
    pub resolved_deps: Vec<CellMeta>,
    pub resolved_inputs: Vec<CellMeta>,
}

impl<'a> ResolvedTransaction<'a> {
    pub fn inputs_capacity(&self) -> Option<Capacity> {
        self.resolved_inputs
            .iter()
            .try_fold(0u64, |total, meta| total.checked_add(meta.capacity()))
    }

    /// Inputs minus outputs. Fails when outputs exceed inputs.
    pub fn fee(&self) -> Result<Capacity> {
        let inputs = self
            .inputs_capacity()
            .ok_or_else(|| Error::InvalidTransaction("input capacity overflow".to_string()))?;
        let outputs = self
            .transaction
            .outputs_capacity()
            .ok_or_else(|| Error::InvalidTransaction("output capacity overflow".to_string()))?;
        inputs
            .checked_sub(outputs)
            .ok_or(Error::InsufficientCapacity { inputs, outputs })
    }
}

/// Outcome of resolving against a provider when unknown cells are tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Resolved(ResolvedTransaction<'a>),
    /// Hashes of the transactions that should produce the unknown cells.
    Missing(HashSet<Hash>),
}

/// ResolveTransaction: every dep and input must be live.
///
/// Dead cells fail with `Conflict`, unknown cells with `NotFound`.
pub fn resolve_transaction<'a, P: CellProvider + ?Sized>(
    transaction: &'a Transaction,
    provider: &P,
) -> Result<ResolvedTransaction<'a>> {
    match resolve_with_missing(transaction, provider)? {
        Resolution::Resolved(resolved) => Ok(resolved),
        Resolution::Missing(_) => {
            let out_point = transaction
                .deps
                .iter()
                .chain(transaction.input_pts())
                .find(|out_point| provider.cell(out_point).is_unknown())
                .cloned()
                .unwrap_or_else(OutPoint::null);
            Err(Error::NotFound(format!("cell {}", out_point)))
        }
    }
}

/// Like [`resolve_transaction`], but collects the parents of unknown cells
/// instead of failing on them. Dead cells still fail with `Conflict`.
pub fn resolve_with_missing<'a, P: CellProvider + ?Sized>(
    transaction: &'a Transaction,
    provider: &P,
) -> Result<Resolution<'a>> {
    let mut missing = HashSet::new();
    let mut resolved_deps = Vec::with_capacity(transaction.deps.len());
    let mut resolved_inputs = Vec::with_capacity(transaction.inputs.len());

    for dep in &transaction.deps {
        match provider.cell(dep) {
            CellStatus::Live(meta) => resolved_deps.push(meta),
            CellStatus::Dead => return Err(Error::Conflict(dep.clone())),
            CellStatus::Unknown => {
                missing.insert(dep.tx_hash);
            }
        }
    }

    for out_point in transaction.input_pts() {
        match provider.cell(out_point) {
            CellStatus::Live(meta) => resolved_inputs.push(meta),
            CellStatus::Dead => return Err(Error::Conflict(out_point.clone())),
            CellStatus::Unknown => {
                missing.insert(out_point.tx_hash);
            }
        }
    }

    if missing.is_empty() {
        Ok(Resolution::Resolved(ResolvedTransaction {
            transaction,
            resolved_deps,
            resolved_inputs,
        }))
    } else {
        Ok(Resolution::Missing(missing))
    }
}

/// Provider that overlays unconfirmed outputs on top of a base provider.
///
/// Outputs of `overlay` transactions are live unless one of `spent` consumes
/// them; everything else falls through to `base`.
pub struct OverlayCellProvider<'a, B: CellProvider + ?Sized> {
    base: &'a B,
    outputs: std::collections::HashMap<OutPoint, CellOutput>,
    spent: HashSet<OutPoint>,
}

impl<'a, B: CellProvider + ?Sized> OverlayCellProvider<'a, B> {
    pub fn new(base: &'a B) -> Self {
        OverlayCellProvider {
            base,
            outputs: std::collections::HashMap::new(),
            spent: HashSet::new(),
        }
    }

    pub fn add_transaction(&mut self, transaction: &Transaction) {
        let tx_hash = transaction.hash();
        for (index, output) in transaction.outputs.iter().enumerate() {
            self.outputs
                .insert(OutPoint::new(tx_hash, index as u32), output.clone());
        }
        for out_point in transaction.input_pts() {
            self.spent.insert(out_point.clone());
        }
    }
}

impl<'a, B: CellProvider + ?Sized> CellProvider for OverlayCellProvider<'a, B> {
    fn cell(&self, out_point: &OutPoint) -> CellStatus {
        if self.spent.contains(out_point) {
            return CellStatus::Dead;
        }
        match self.outputs.get(out_point) {
            Some(output) => CellStatus::Live(CellMeta {
                out_point: out_point.clone(),
                cell_output: output.clone(),
                cellbase: false,
                created_by: None,
                consumed_by: None,
            }),
            None => self.base.cell(out_point),
        }
    }
}

//! Transaction validation

use crate::cell::ResolvedTransaction;
use crate::cell_set::CellSet;
use crate::error::{Error, Result};
use crate::types::*;
use std::collections::HashSet;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (v, deps, ins, outs, ws) may enter the pool iff:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. tx is not a cellbase
/// 3. no out-point is spent twice by ins
/// 4. ∀o ∈ outs: o.capacity ≥ occupied(o)
/// 5. |tx| ≤ max_size
pub fn check_transaction(tx: &Transaction, max_size: usize) -> Result<()> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(Error::InvalidTransaction("empty inputs or outputs".to_string()));
    }

    if tx.is_cellbase() {
        return Err(Error::InvalidTransaction("cellbase is only valid in a block".to_string()));
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for out_point in tx.input_pts() {
        if out_point.is_null() {
            return Err(Error::InvalidTransaction("null out-point in input".to_string()));
        }
        if !seen.insert(out_point) {
            return Err(Error::InvalidTransaction(format!("duplicate input {}", out_point)));
        }
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.is_lack_of_capacity() {
            return Err(Error::InvalidTransaction(format!(
                "output {} capacity {} below occupied capacity",
                i, output.capacity
            )));
        }
    }

    let size = tx.serialized_size();
    if size > max_size {
        return Err(Error::InvalidTransaction(format!(
            "transaction too large: {} > {} bytes",
            size, max_size
        )));
    }

    Ok(())
}

/// CheckTxInputs: ResolvedTx → ℕ
///
/// Σ input capacity ≥ Σ output capacity; returns the difference as fee.
pub fn check_tx_inputs(resolved: &ResolvedTransaction<'_>) -> Result<Capacity> {
    resolved.fee()
}

/// CheckSince: every input must be spendable in block `tip + 1`.
///
/// A non-zero `since` is the first block number the input may be spent in.
/// Cellbase outputs additionally wait `cellbase_maturity` blocks; the
/// genesis cellbase is exempt.
pub fn check_since(
    resolved: &ResolvedTransaction<'_>,
    tip_number: BlockNumber,
    cellbase_maturity: u64,
) -> Result<()> {
    let next_number = tip_number + 1;
    for (input, meta) in resolved.transaction.inputs.iter().zip(&resolved.resolved_inputs) {
        if input.since != 0 && next_number < input.since {
            return Err(Error::Immature {
                out_point: input.previous_output.clone(),
                spendable_at: input.since,
            });
        }

        if meta.cellbase {
            let created = meta.block_number().unwrap_or(next_number);
            if created > 0 && next_number < created + cellbase_maturity {
                return Err(Error::Immature {
                    out_point: input.previous_output.clone(),
                    spendable_at: created + cellbase_maturity,
                });
            }
        }
    }
    Ok(())
}

/// Minimum fee for `size` bytes at `fee_rate` shannons per 1000 bytes.
pub fn min_fee(size: usize, fee_rate: u64) -> Capacity {
    (size as u64).saturating_mul(fee_rate) / 1000
}

pub fn check_fee_rate(fee: Capacity, size: usize, fee_rate: u64) -> Result<()> {
    let minimum = min_fee(size, fee_rate);
    if fee < minimum {
        return Err(Error::LowFeeRate { fee, minimum });
    }
    Ok(())
}

/// CheckBlockReward: ℬ × ℕ × 𝒞𝒮 → {valid, invalid}
///
/// Checked against `cells` after the block was applied, so every input
/// resolves whether it was spent by this block or not:
/// 1. each non-cellbase transaction pays for its outputs
/// 2. Σ cellbase outputs ≤ `reward` + Σ fees
pub fn check_block_reward(block: &Block, reward: Capacity, cells: &CellSet) -> Result<()> {
    let overflow = || Error::InvalidBlock("capacity overflow".to_string());
    let mut fees: Capacity = 0;
    let mut claimed: Capacity = 0;

    for tx in &block.transactions {
        let outputs = tx.outputs_capacity().ok_or_else(overflow)?;
        if tx.is_cellbase() {
            claimed = claimed.checked_add(outputs).ok_or_else(overflow)?;
            continue;
        }

        let mut inputs: Capacity = 0;
        for out_point in tx.input_pts() {
            let meta = cells
                .get_cell(out_point)
                .ok_or_else(|| Error::InvalidBlock(format!("input {} does not exist", out_point)))?;
            inputs = inputs.checked_add(meta.capacity()).ok_or_else(overflow)?;
        }
        let fee = inputs.checked_sub(outputs).ok_or_else(|| {
            Error::InvalidBlock(format!(
                "tx 0x{} outputs {} exceed inputs {}",
                hex::encode(tx.hash()),
                outputs,
                inputs
            ))
        })?;
        fees = fees.checked_add(fee).ok_or_else(overflow)?;
    }

    let limit = reward.checked_add(fees).ok_or_else(overflow)?;
    if claimed > limit {
        return Err(Error::InvalidBlock(format!(
            "cellbase claims {} but reward {} plus fees {} is {}",
            claimed, reward, fees, limit
        )));
    }
    Ok(())
}

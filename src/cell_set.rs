//! Live cell set
//!
//! Cell records are keyed by out-point. Two per-lock-hash indexes, ordered by
//! chain position, point back at them: one over live cells, one over every
//! cell ever created for that lock. All three are persistent maps, so a
//! snapshot clone is constant time and applying a block copies only the
//! entries it touches.

use crate::cell::{CellMeta, CellProvider, CellStatus};
use crate::chain::ChainIndex;
use crate::error::{Error, Result};
use crate::logger::LOG_TARGET_CELL_SET;
use crate::types::*;
use im::{HashMap, OrdMap};
use std::collections::HashSet;
use tracing::{debug, error};

/// Chain position of a cell: (block number, tx index in block, output index).
pub type CellKey = (BlockNumber, u32, u32);

type LockIndex = HashMap<Hash, OrdMap<CellKey, OutPoint>>;

#[derive(Debug, Clone)]
struct CellRecord {
    meta: CellMeta,
    key: CellKey,
    lock_hash: Hash,
}

#[derive(Debug, Clone, Default)]
pub struct CellSet {
    records: HashMap<OutPoint, CellRecord>,
    live_by_lock: LockIndex,
    history_by_lock: LockIndex,
    live_count: usize,
}

impl CellSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells ever recorded, live or dead.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    fn record(&self, out_point: &OutPoint) -> Option<&CellRecord> {
        self.records.get(out_point)
    }

    pub fn cell_status(&self, out_point: &OutPoint) -> CellStatus {
        match self.record(out_point) {
            Some(record) if record.meta.is_live() => CellStatus::Live(record.meta.clone()),
            Some(_) => CellStatus::Dead,
            None => CellStatus::Unknown,
        }
    }

    /// Record of a cell, live or dead.
    pub fn get_cell(&self, out_point: &OutPoint) -> Option<&CellMeta> {
        self.record(out_point).map(|record| &record.meta)
    }

    pub fn get_live_cell(&self, out_point: &OutPoint) -> Option<CellMeta> {
        self.cell_status(out_point).live_cell()
    }

    /// Cell status as of the state right after main-chain block `block_hash`.
    /// Cells created later are unknown at that point.
    pub fn cell_status_at(
        &self,
        chain: &ChainIndex,
        out_point: &OutPoint,
        block_hash: &Hash,
    ) -> CellStatus {
        let (Some(number), Some(record)) =
            (chain.block_number(block_hash), self.record(out_point))
        else {
            return CellStatus::Unknown;
        };
        match record.meta.block_number() {
            Some(created) if created <= number => {}
            _ => return CellStatus::Unknown,
        }
        match &record.meta.consumed_by {
            Some(point) if point.block_number <= number => CellStatus::Dead,
            _ => CellStatus::Live(CellMeta { consumed_by: None, ..record.meta.clone() }),
        }
    }

    pub fn get_live_cell_at(
        &self,
        chain: &ChainIndex,
        out_point: &OutPoint,
        block_hash: &Hash,
    ) -> Option<CellMeta> {
        self.cell_status_at(chain, out_point, block_hash).live_cell()
    }

    /// Live cells locked by `lock_hash` created in blocks `[from, to]`,
    /// ordered by chain position.
    pub fn get_cells_by_lock_hash(
        &self,
        lock_hash: &Hash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Vec<CellMeta> {
        self.collect_range(&self.live_by_lock, lock_hash, from, to)
    }

    /// Every cell, live or dead, ever created for `lock_hash` in `[from, to]`.
    pub fn get_transactions_by_lock_hash(
        &self,
        lock_hash: &Hash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Vec<CellMeta> {
        self.collect_range(&self.history_by_lock, lock_hash, from, to)
    }

    fn collect_range(
        &self,
        index: &LockIndex,
        lock_hash: &Hash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Vec<CellMeta> {
        if from > to {
            return Vec::new();
        }
        match index.get(lock_hash) {
            Some(cells) => cells
                .range((from, 0, 0)..=(to, u32::MAX, u32::MAX))
                .filter_map(|(_, out_point)| self.records.get(out_point))
                .map(|record| record.meta.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// ApplyBlock: 𝒞𝒮 × ℬ → 𝒞𝒮
    ///
    /// 1. Validate every dep and input against the set plus earlier
    ///    transactions of the same block
    /// 2. Mark inputs dead, in transaction order
    /// 3. Insert outputs live
    ///
    /// Nothing is mutated unless validation passes.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        self.validate_apply(block)?;

        let number = block.number();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let tx_hash = tx.hash();
            if !tx.is_cellbase() {
                for (input_index, out_point) in tx.input_pts().enumerate() {
                    self.consume(
                        out_point,
                        TransactionPoint {
                            block_number: number,
                            tx_hash,
                            index: input_index as u32,
                        },
                    );
                }
            }
            let cellbase = tx.is_cellbase();
            for (output_index, output) in tx.outputs.iter().enumerate() {
                self.insert(
                    CellMeta {
                        out_point: OutPoint::new(tx_hash, output_index as u32),
                        cell_output: output.clone(),
                        cellbase,
                        created_by: Some(TransactionPoint {
                            block_number: number,
                            tx_hash,
                            index: output_index as u32,
                        }),
                        consumed_by: None,
                    },
                    (number, tx_index as u32, output_index as u32),
                );
            }
        }

        debug!(
            target: LOG_TARGET_CELL_SET,
            "applied block {} ({} txs), live cells {}",
            number,
            block.transactions.len(),
            self.live_count
        );
        Ok(())
    }

    fn validate_apply(&self, block: &Block) -> Result<()> {
        let mut created: HashSet<OutPoint> = HashSet::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();

        for tx in &block.transactions {
            for dep in &tx.deps {
                let live = created.contains(dep) || self.cell_status(dep).is_live();
                if spent.contains(dep) || !live {
                    return Err(Error::InvalidBlock(format!("dep {} is not live", dep)));
                }
            }

            if !tx.is_cellbase() {
                for out_point in tx.input_pts() {
                    if spent.contains(out_point) {
                        return Err(self.double_spend(block, out_point));
                    }
                    if !created.contains(out_point) {
                        match self.cell_status(out_point) {
                            CellStatus::Live(_) => {}
                            CellStatus::Dead => return Err(self.double_spend(block, out_point)),
                            CellStatus::Unknown => {
                                return Err(Error::InvalidBlock(format!(
                                    "input {} does not exist",
                                    out_point
                                )))
                            }
                        }
                    }
                    spent.insert(out_point.clone());
                }
            }

            for out_point in tx.output_pts() {
                if self.records.contains_key(&out_point) || !created.insert(out_point.clone()) {
                    return Err(Error::InvalidBlock(format!("duplicate out-point {}", out_point)));
                }
            }
        }
        Ok(())
    }

    fn double_spend(&self, block: &Block, out_point: &OutPoint) -> Error {
        error!(
            target: LOG_TARGET_CELL_SET,
            "double spend of {} in block {} 0x{}",
            out_point,
            block.number(),
            hex::encode(block.hash())
        );
        Error::DoubleSpend(out_point.clone())
    }

    /// RollbackBlock: exact inverse of [`CellSet::apply_block`] for the
    /// block at the top of the applied history.
    pub fn rollback_block(&mut self, block: &Block) -> Result<()> {
        self.validate_rollback(block)?;

        for tx in block.transactions.iter().rev() {
            for out_point in tx.output_pts() {
                self.remove(&out_point);
            }
            if !tx.is_cellbase() {
                for out_point in tx.input_pts() {
                    self.restore(out_point);
                }
            }
        }

        debug!(
            target: LOG_TARGET_CELL_SET,
            "rolled back block {}, live cells {}",
            block.number(),
            self.live_count
        );
        Ok(())
    }

    fn validate_rollback(&self, block: &Block) -> Result<()> {
        let number = block.number();
        for tx in &block.transactions {
            let tx_hash = tx.hash();
            for out_point in tx.output_pts() {
                let record = self.record(&out_point).ok_or_else(|| {
                    Error::InvalidBlock(format!("rollback of unknown output {}", out_point))
                })?;
                if let Some(point) = &record.meta.consumed_by {
                    if point.block_number != number {
                        return Err(Error::InvalidBlock(format!(
                            "output {} is spent by block {}",
                            out_point, point.block_number
                        )));
                    }
                }
            }
            if !tx.is_cellbase() {
                for out_point in tx.input_pts() {
                    let consumer = self
                        .record(out_point)
                        .and_then(|record| record.meta.consumed_by.as_ref());
                    match consumer {
                        Some(point) if point.tx_hash == tx_hash => {}
                        _ => {
                            return Err(Error::InvalidBlock(format!(
                                "input {} was not consumed by 0x{}",
                                out_point,
                                hex::encode(tx_hash)
                            )))
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, meta: CellMeta, key: CellKey) {
        let lock_hash = meta.lock_hash();
        let out_point = meta.out_point.clone();
        insert_key(&mut self.live_by_lock, lock_hash, key, out_point.clone());
        insert_key(&mut self.history_by_lock, lock_hash, key, out_point.clone());
        self.records.insert(out_point, CellRecord { meta, key, lock_hash });
        self.live_count += 1;
    }

    fn consume(&mut self, out_point: &OutPoint, point: TransactionPoint) {
        let Some(record) = self.records.get_mut(out_point) else {
            return;
        };
        record.meta.consumed_by = Some(point);
        let (lock_hash, key) = (record.lock_hash, record.key);
        remove_key(&mut self.live_by_lock, &lock_hash, &key);
        self.live_count -= 1;
    }

    fn restore(&mut self, out_point: &OutPoint) {
        let Some(record) = self.records.get_mut(out_point) else {
            return;
        };
        if record.meta.consumed_by.take().is_some() {
            let (lock_hash, key) = (record.lock_hash, record.key);
            insert_key(&mut self.live_by_lock, lock_hash, key, out_point.clone());
            self.live_count += 1;
        }
    }

    fn remove(&mut self, out_point: &OutPoint) {
        let Some(record) = self.records.remove(out_point) else {
            return;
        };
        if record.meta.is_live() {
            remove_key(&mut self.live_by_lock, &record.lock_hash, &record.key);
            self.live_count -= 1;
        }
        remove_key(&mut self.history_by_lock, &record.lock_hash, &record.key);
    }
}

fn insert_key(index: &mut LockIndex, lock_hash: Hash, key: CellKey, out_point: OutPoint) {
    let mut cells = index.get(&lock_hash).cloned().unwrap_or_default();
    cells.insert(key, out_point);
    index.insert(lock_hash, cells);
}

fn remove_key(index: &mut LockIndex, lock_hash: &Hash, key: &CellKey) {
    let Some(mut cells) = index.get(lock_hash).cloned() else {
        return;
    };
    cells.remove(key);
    if cells.is_empty() {
        index.remove(lock_hash);
    } else {
        index.insert(*lock_hash, cells);
    }
}

impl CellProvider for CellSet {
    fn cell(&self, out_point: &OutPoint) -> CellStatus {
        self.cell_status(out_point)
    }
}

/// Compares cell records; index layout is ignored.
impl PartialEq for CellSet {
    fn eq(&self, other: &Self) -> bool {
        self.live_count == other.live_count
            && self.records.len() == other.records.len()
            && self.records.keys().all(|out_point| {
                match (self.record(out_point), other.record(out_point)) {
                    (Some(a), Some(b)) => a.meta == b.meta && a.key == b.key,
                    _ => false,
                }
            })
    }
}

impl Eq for CellSet {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ONE_CKB;

    fn lock(tag: u8) -> Script {
        Script::new([tag; 32], vec![])
    }

    fn cellbase(number: BlockNumber, lock_tag: u8) -> Transaction {
        Transaction {
            inputs: vec![CellInput::new_cellbase_input(number)],
            outputs: vec![CellOutput::new(1000 * ONE_CKB, vec![], lock(lock_tag), None)],
            ..Default::default()
        }
    }

    fn spend(out_point: OutPoint, lock_tag: u8) -> Transaction {
        Transaction {
            inputs: vec![CellInput::new(out_point, 0)],
            outputs: vec![CellOutput::new(900 * ONE_CKB, vec![], lock(lock_tag), None)],
            ..Default::default()
        }
    }

    fn block(number: BlockNumber, transactions: Vec<Transaction>) -> Block {
        Block {
            header: Header { number, ..Default::default() },
            transactions,
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_block_kills_inputs_and_adds_outputs() {
        let mut cells = CellSet::new();
        let genesis_cb = cellbase(0, 1);
        let funding = OutPoint::new(genesis_cb.hash(), 0);
        cells.apply_block(&block(0, vec![genesis_cb])).unwrap();
        assert!(cells.get_live_cell(&funding).is_some());

        let tx = spend(funding.clone(), 2);
        let created = OutPoint::new(tx.hash(), 0);
        cells.apply_block(&block(1, vec![cellbase(1, 1), tx])).unwrap();

        assert_eq!(cells.cell_status(&funding), CellStatus::Dead);
        let meta = cells.get_live_cell(&created).unwrap();
        assert_eq!(meta.block_number(), Some(1));
        assert!(!meta.cellbase);
        assert_eq!(cells.live_count(), 3);
    }

    #[test]
    fn test_spend_within_same_block() {
        let mut cells = CellSet::new();
        let cb = cellbase(0, 1);
        let first = spend(OutPoint::new(cb.hash(), 0), 2);
        let second = spend(OutPoint::new(first.hash(), 0), 3);
        let first_out = OutPoint::new(first.hash(), 0);
        let second_out = OutPoint::new(second.hash(), 0);

        cells.apply_block(&block(0, vec![cb, first, second])).unwrap();
        assert!(cells.cell_status(&first_out).is_dead());
        assert!(cells.get_live_cell(&second_out).is_some());
    }

    #[test]
    fn test_double_spend_is_rejected_atomically() {
        let mut cells = CellSet::new();
        let cb = cellbase(0, 1);
        let funding = OutPoint::new(cb.hash(), 0);
        cells.apply_block(&block(0, vec![cb])).unwrap();
        cells.apply_block(&block(1, vec![spend(funding.clone(), 2)])).unwrap();
        let before = cells.clone();

        let result = cells.apply_block(&block(2, vec![cellbase(2, 1), spend(funding.clone(), 3)]));
        assert_eq!(result, Err(Error::DoubleSpend(funding)));
        assert_eq!(cells, before);
    }

    #[test]
    fn test_dep_spent_earlier_in_block_is_rejected() {
        let mut cells = CellSet::new();
        let mut cb = cellbase(0, 1);
        cb.outputs.push(CellOutput::new(1000 * ONE_CKB, vec![], lock(1), None));
        let funding = OutPoint::new(cb.hash(), 0);
        let other = OutPoint::new(cb.hash(), 1);
        cells.apply_block(&block(0, vec![cb])).unwrap();
        let before = cells.clone();

        let mut reader = spend(other, 3);
        reader.deps.push(funding.clone());
        let result = cells.apply_block(&block(1, vec![spend(funding, 2), reader]));
        assert!(matches!(result, Err(Error::InvalidBlock(_))));
        assert_eq!(cells, before);
    }

    #[test]
    fn test_unknown_input_is_invalid_block() {
        let mut cells = CellSet::new();
        let result = cells.apply_block(&block(0, vec![spend(OutPoint::new([9; 32], 0), 1)]));
        assert!(matches!(result, Err(Error::InvalidBlock(_))));
        assert!(cells.is_empty());
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut cells = CellSet::new();
        let cb = cellbase(0, 1);
        let funding = OutPoint::new(cb.hash(), 0);
        cells.apply_block(&block(0, vec![cb])).unwrap();
        let before = cells.clone();

        let tx = spend(funding, 2);
        let chained = spend(OutPoint::new(tx.hash(), 0), 3);
        let b1 = block(1, vec![cellbase(1, 1), tx, chained]);
        cells.apply_block(&b1).unwrap();
        assert_ne!(cells, before);

        cells.rollback_block(&b1).unwrap();
        assert_eq!(cells, before);
    }

    #[test]
    fn test_rollback_rejects_buried_block() {
        let mut cells = CellSet::new();
        let cb = cellbase(0, 1);
        let b0 = block(0, vec![cb.clone()]);
        cells.apply_block(&b0).unwrap();
        cells.apply_block(&block(1, vec![spend(OutPoint::new(cb.hash(), 0), 2)])).unwrap();

        assert!(matches!(cells.rollback_block(&b0), Err(Error::InvalidBlock(_))));
    }

    #[test]
    fn test_cells_by_lock_hash_range() {
        let mut cells = CellSet::new();
        for number in 0..8 {
            cells.apply_block(&block(number, vec![cellbase(number, 7)])).unwrap();
        }
        let lock_hash = lock(7).hash();

        let found = cells.get_cells_by_lock_hash(&lock_hash, 2, 5);
        let numbers: Vec<_> = found.iter().filter_map(CellMeta::block_number).collect();
        assert_eq!(numbers, vec![2, 3, 4, 5]);

        assert!(cells.get_cells_by_lock_hash(&lock_hash, 5, 2).is_empty());
        assert!(cells.get_cells_by_lock_hash(&lock(8).hash(), 0, 10).is_empty());
    }

    #[test]
    fn test_history_keeps_dead_cells() {
        let mut cells = CellSet::new();
        let cb = cellbase(0, 1);
        let funding = OutPoint::new(cb.hash(), 0);
        cells.apply_block(&block(0, vec![cb])).unwrap();
        cells.apply_block(&block(1, vec![spend(funding.clone(), 2)])).unwrap();

        let lock_hash = lock(1).hash();
        assert!(cells.get_cells_by_lock_hash(&lock_hash, 0, 1).is_empty());
        let history = cells.get_transactions_by_lock_hash(&lock_hash, 0, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].out_point, funding);
        assert_eq!(history[0].consumed_by.as_ref().map(|p| p.block_number), Some(1));
    }
}

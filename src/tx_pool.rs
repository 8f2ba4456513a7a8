//! Staged transaction pool
//!
//! Entries move through `Orphan → Pending → Proposed` and leave the pool when
//! committed or evicted:
//!
//! - **Orphan**: some input or dep is not on chain yet. It is produced by a
//!   pool entry or by a transaction the pool has never seen.
//! - **Pending**: every input is a live cell and scripts passed.
//! - **Proposed**: pending, and its short id is inside the commit window.
//!
//! Pending and proposed entries never spend the same out-point. The `spent`
//! index enforces it at admission and promotion.

use crate::cell::{
    resolve_transaction, resolve_with_missing, CellStatus, OverlayCellProvider, Resolution,
};
use crate::cell_set::CellSet;
use crate::config::{EvictionTieBreak, TxPoolConfig};
use crate::error::{Error, Result};
use crate::logger::LOG_TARGET_TX_POOL;
use crate::script::ScriptCycleEstimator;
use crate::shared::Snapshot;
use crate::transaction::{check_fee_rate, check_since, check_transaction, check_tx_inputs};
use crate::types::*;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStage {
    Orphan,
    Pending,
    Proposed,
}

#[derive(Debug, Clone)]
pub struct TxEntry {
    pub transaction: Arc<Transaction>,
    pub hash: Hash,
    pub short_id: ProposalShortId,
    pub stage: TxStage,
    /// Set once scripts ran; reused on re-admission.
    pub cycles: Option<Cycle>,
    pub size: usize,
    /// Zero for an orphan until its inputs can be resolved.
    pub fee: Capacity,
    /// Unix milliseconds.
    pub inserted_at: u64,
    pub seq: u64,
    /// Parents an orphan is still waiting for.
    pub missing: HashSet<Hash>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPoolInfo {
    pub pending: usize,
    pub proposed: usize,
    pub orphan: usize,
    pub last_txs_updated_at: u64,
    pub total_tx_size: usize,
    pub total_tx_cycles: Cycle,
}

/// Pool changes caused by a committed block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: Vec<Hash>,
    pub promoted: Vec<Hash>,
    pub evicted: Vec<(Hash, Error)>,
}

#[derive(Debug, Default)]
struct PoolViewInner {
    entries: DashMap<Hash, (TxStage, Arc<Transaction>)>,
    info: ArcSwap<TxPoolInfo>,
}

/// Read side of the pool. Queries go here instead of taking the pool lock.
#[derive(Debug, Clone, Default)]
pub struct PoolView {
    inner: Arc<PoolViewInner>,
}

impl PoolView {
    pub fn get(&self, hash: &Hash) -> Option<(TxStage, Arc<Transaction>)> {
        self.inner.entries.get(hash).map(|entry| entry.value().clone())
    }

    pub fn stage(&self, hash: &Hash) -> Option<TxStage> {
        self.inner.entries.get(hash).map(|entry| entry.value().0)
    }

    pub fn info(&self) -> TxPoolInfo {
        TxPoolInfo::clone(&self.inner.info.load())
    }

    fn set(&self, hash: Hash, stage: TxStage, transaction: Arc<Transaction>) {
        self.inner.entries.insert(hash, (stage, transaction));
    }

    fn remove(&self, hash: &Hash) {
        self.inner.entries.remove(hash);
    }

    fn clear(&self) {
        self.inner.entries.clear();
    }

    fn publish(&self, info: TxPoolInfo) {
        self.inner.info.store(Arc::new(info));
    }
}

pub struct TxPool {
    config: TxPoolConfig,
    cellbase_maturity: u64,
    entries: HashMap<Hash, TxEntry>,
    by_short_id: HashMap<ProposalShortId, Hash>,
    /// Out-points spent by pending and proposed entries.
    spent: HashMap<OutPoint, Hash>,
    /// Parent hash → orphans waiting for it.
    waiting: HashMap<Hash, HashSet<Hash>>,
    /// Commit window: short id → proposing block number.
    proposals: HashMap<ProposalShortId, BlockNumber>,
    next_seq: u64,
    pending_count: usize,
    proposed_count: usize,
    orphan_count: usize,
    total_size: usize,
    total_cycles: Cycle,
    last_txs_updated_at: u64,
    view: PoolView,
}

impl TxPool {
    pub fn new(config: TxPoolConfig, cellbase_maturity: u64) -> Self {
        TxPool {
            config,
            cellbase_maturity,
            entries: HashMap::new(),
            by_short_id: HashMap::new(),
            spent: HashMap::new(),
            waiting: HashMap::new(),
            proposals: HashMap::new(),
            next_seq: 0,
            pending_count: 0,
            proposed_count: 0,
            orphan_count: 0,
            total_size: 0,
            total_cycles: 0,
            last_txs_updated_at: 0,
            view: PoolView::default(),
        }
    }

    pub fn config(&self) -> &TxPoolConfig {
        &self.config
    }

    pub fn view(&self) -> PoolView {
        self.view.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&TxEntry> {
        self.entries.get(hash)
    }

    pub fn get_by_short_id(&self, short_id: &ProposalShortId) -> Option<&TxEntry> {
        self.by_short_id.get(short_id).and_then(|hash| self.entries.get(hash))
    }

    pub fn stage(&self, hash: &Hash) -> Option<TxStage> {
        self.entries.get(hash).map(|entry| entry.stage)
    }

    /// Entry spending `out_point`, among pending and proposed entries.
    pub fn spender(&self, out_point: &OutPoint) -> Option<Hash> {
        self.spent.get(out_point).copied()
    }

    pub fn info(&self) -> TxPoolInfo {
        TxPoolInfo {
            pending: self.pending_count,
            proposed: self.proposed_count,
            orphan: self.orphan_count,
            last_txs_updated_at: self.last_txs_updated_at,
            total_tx_size: self.total_size,
            total_tx_cycles: self.total_cycles,
        }
    }

    /// AcceptToPool: 𝒯𝒳 × Snapshot → {orphan, pending, proposed}
    ///
    /// 1. Reject duplicates (pooled or committed) and malformed transactions
    /// 2. Classify deps and inputs: dead or pool-spent cells conflict, unknown
    ///    cells make the transaction an orphan
    /// 3. Check since, capacity and fee rate, then run scripts
    /// 4. Stage as pending, or proposed when already in the commit window
    /// 5. Evict the cheapest entries while the pool is over its limits
    pub fn submit(
        &mut self,
        transaction: Transaction,
        snapshot: &Snapshot,
        estimator: &ScriptCycleEstimator,
    ) -> Result<TxStage> {
        self.admit(Arc::new(transaction), snapshot, estimator, None, None)
    }

    fn admit(
        &mut self,
        transaction: Arc<Transaction>,
        snapshot: &Snapshot,
        estimator: &ScriptCycleEstimator,
        cached_cycles: Option<Cycle>,
        inserted_at: Option<u64>,
    ) -> Result<TxStage> {
        let hash = transaction.hash();
        if self.entries.contains_key(&hash) || snapshot.chain().contains_transaction(&hash) {
            return Err(Error::Duplicate(hash));
        }
        check_transaction(&transaction, self.config.max_tx_size)?;

        let size = transaction.serialized_size();
        let missing = self.classify(&transaction, snapshot)?;
        let inserted_at = inserted_at.unwrap_or_else(unix_time_ms);

        if !missing.is_empty() {
            let resolved =
                self.resolve_in_pool(&transaction, snapshot.cells(), estimator, cached_cycles)?;
            let (cycles, fee) = match resolved {
                Some((cycles, fee)) => (Some(cycles), fee),
                None => (None, 0),
            };
            let entry = self.new_entry(
                transaction,
                TxStage::Orphan,
                cycles,
                size,
                fee,
                inserted_at,
                missing,
            );
            self.insert_entry(entry);
            debug!(target: LOG_TARGET_TX_POOL, "orphan tx 0x{}", hex::encode(hash));

            self.limit_orphans();
            self.touch();
            if !self.entries.contains_key(&hash) {
                return Err(Error::PoolFull);
            }
            return Ok(TxStage::Orphan);
        }

        let resolved = resolve_transaction(&transaction, snapshot.cells())?;
        check_since(&resolved, snapshot.chain().tip_number(), self.cellbase_maturity)?;
        let fee = check_tx_inputs(&resolved)?;
        check_fee_rate(fee, size, self.config.min_fee_rate)?;
        let cycles = match cached_cycles {
            Some(cycles) => cycles,
            None => estimator.estimate(&resolved)?,
        };

        let stage = if self.proposals.contains_key(&transaction.proposal_short_id()) {
            TxStage::Proposed
        } else {
            TxStage::Pending
        };
        let entry = self.new_entry(
            transaction,
            stage,
            Some(cycles),
            size,
            fee,
            inserted_at,
            HashSet::new(),
        );
        self.insert_entry(entry);
        debug!(
            target: LOG_TARGET_TX_POOL,
            "{:?} tx 0x{} fee {} cycles {}",
            stage,
            hex::encode(hash),
            fee,
            cycles
        );

        self.enforce_limits();
        self.touch();
        if !self.entries.contains_key(&hash) {
            return Err(Error::PoolFull);
        }
        self.refresh_orphans(&hash, snapshot.cells(), estimator);
        Ok(stage)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_entry(
        &mut self,
        transaction: Arc<Transaction>,
        stage: TxStage,
        cycles: Option<Cycle>,
        size: usize,
        fee: Capacity,
        inserted_at: u64,
        missing: HashSet<Hash>,
    ) -> TxEntry {
        let seq = self.next_seq;
        self.next_seq += 1;
        TxEntry {
            hash: transaction.hash(),
            short_id: transaction.proposal_short_id(),
            transaction,
            stage,
            cycles,
            size,
            fee,
            inserted_at,
            seq,
            missing,
        }
    }

    /// Returns the parents of cells not on chain. Dead cells and inputs
    /// already spent in the pool conflict; an unknown output of a committed
    /// transaction never existed.
    fn classify(&self, transaction: &Transaction, snapshot: &Snapshot) -> Result<HashSet<Hash>> {
        let mut missing = HashSet::new();

        for dep in &transaction.deps {
            match snapshot.cells().cell_status(dep) {
                CellStatus::Live(_) => {}
                CellStatus::Dead => return Err(Error::Conflict(dep.clone())),
                CellStatus::Unknown => {
                    self.check_unknown_output(dep, snapshot)?;
                    missing.insert(dep.tx_hash);
                }
            }
        }

        for out_point in transaction.input_pts() {
            if self.spent.contains_key(out_point) {
                return Err(Error::Conflict(out_point.clone()));
            }
            match snapshot.cells().cell_status(out_point) {
                CellStatus::Live(_) => {}
                CellStatus::Dead => return Err(Error::Conflict(out_point.clone())),
                CellStatus::Unknown => {
                    self.check_unknown_output(out_point, snapshot)?;
                    missing.insert(out_point.tx_hash);
                }
            }
        }

        Ok(missing)
    }

    fn check_unknown_output(&self, out_point: &OutPoint, snapshot: &Snapshot) -> Result<()> {
        let outputs = match self.entries.get(&out_point.tx_hash) {
            Some(parent) => parent.transaction.outputs.len(),
            None if snapshot.chain().contains_transaction(&out_point.tx_hash) => 0,
            None => return Ok(()),
        };
        if out_point.index as usize >= outputs {
            return Err(Error::InvalidTransaction(format!("output {} does not exist", out_point)));
        }
        Ok(())
    }

    /// Pool entries the transaction depends on, transitively.
    fn ancestors(&self, transaction: &Transaction) -> Vec<Arc<Transaction>> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Hash> = transaction
            .deps
            .iter()
            .chain(transaction.input_pts())
            .map(|out_point| out_point.tx_hash)
            .collect();

        while let Some(hash) = queue.pop_front() {
            if !visited.insert(hash) {
                continue;
            }
            if let Some(entry) = self.entries.get(&hash) {
                let parent = &entry.transaction;
                queue.extend(parent.deps.iter().chain(parent.input_pts()).map(|op| op.tx_hash));
                found.push(parent.clone());
            }
        }
        found
    }

    /// Resolve through the pool's unconfirmed outputs. `None` while some
    /// ancestor is still unseen.
    fn resolve_in_pool(
        &self,
        transaction: &Transaction,
        cells: &CellSet,
        estimator: &ScriptCycleEstimator,
        cached_cycles: Option<Cycle>,
    ) -> Result<Option<(Cycle, Capacity)>> {
        let mut overlay = OverlayCellProvider::new(cells);
        for ancestor in self.ancestors(transaction) {
            overlay.add_transaction(&ancestor);
        }

        match resolve_with_missing(transaction, &overlay)? {
            Resolution::Missing(_) => Ok(None),
            Resolution::Resolved(resolved) => {
                let fee = check_tx_inputs(&resolved)?;
                check_fee_rate(fee, transaction.serialized_size(), self.config.min_fee_rate)?;
                let cycles = match cached_cycles {
                    Some(cycles) => cycles,
                    None => estimator.estimate(&resolved)?,
                };
                Ok(Some((cycles, fee)))
            }
        }
    }

    /// Orphans waiting on `parent` compute cycles once all their parents
    /// are pooled.
    fn refresh_orphans(
        &mut self,
        parent: &Hash,
        cells: &CellSet,
        estimator: &ScriptCycleEstimator,
    ) {
        let children: Vec<Hash> = match self.waiting.get(parent) {
            Some(children) => children.iter().copied().collect(),
            None => return,
        };

        for child in children {
            let transaction = match self.entries.get(&child) {
                Some(entry)
                    if entry.cycles.is_none()
                        && entry.missing.iter().all(|hash| self.entries.contains_key(hash)) =>
                {
                    entry.transaction.clone()
                }
                _ => continue,
            };
            match self.resolve_in_pool(&transaction, cells, estimator, None) {
                Ok(Some((cycles, fee))) => {
                    if let Some(entry) = self.entries.get_mut(&child) {
                        entry.cycles = Some(cycles);
                        entry.fee = fee;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(
                    target: LOG_TARGET_TX_POOL,
                    "orphan 0x{} not verifiable yet: {}",
                    hex::encode(child),
                    err
                ),
            }
        }
    }

    fn insert_entry(&mut self, entry: TxEntry) {
        let hash = entry.hash;
        self.by_short_id.insert(entry.short_id, hash);
        self.entries.insert(hash, entry);
        self.attach(&hash);
    }

    fn remove_entry(&mut self, hash: &Hash) -> Option<TxEntry> {
        if !self.entries.contains_key(hash) {
            return None;
        }
        self.detach(hash);
        self.view.remove(hash);
        let entry = self.entries.remove(hash)?;
        if self.by_short_id.get(&entry.short_id) == Some(hash) {
            self.by_short_id.remove(&entry.short_id);
        }
        Some(entry)
    }

    fn set_stage(&mut self, hash: &Hash, stage: TxStage) {
        self.detach(hash);
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.stage = stage;
        }
        self.attach(hash);
    }

    /// Add an entry's stage to counters and indexes.
    fn attach(&mut self, hash: &Hash) {
        let Some(entry) = self.entries.get(hash) else {
            return;
        };
        match entry.stage {
            TxStage::Orphan => {
                self.orphan_count += 1;
                for parent in &entry.missing {
                    self.waiting.entry(*parent).or_default().insert(*hash);
                }
            }
            stage => {
                if stage == TxStage::Pending {
                    self.pending_count += 1;
                } else {
                    self.proposed_count += 1;
                }
                for out_point in entry.transaction.input_pts() {
                    self.spent.insert(out_point.clone(), *hash);
                }
                self.total_size += entry.size;
                self.total_cycles += entry.cycles.unwrap_or(0);
            }
        }
        self.view.set(*hash, entry.stage, entry.transaction.clone());
    }

    /// Inverse of [`TxPool::attach`].
    fn detach(&mut self, hash: &Hash) {
        let Some(entry) = self.entries.get(hash) else {
            return;
        };
        match entry.stage {
            TxStage::Orphan => {
                self.orphan_count -= 1;
                for parent in &entry.missing {
                    if let Some(children) = self.waiting.get_mut(parent) {
                        children.remove(hash);
                        if children.is_empty() {
                            self.waiting.remove(parent);
                        }
                    }
                }
            }
            stage => {
                if stage == TxStage::Pending {
                    self.pending_count -= 1;
                } else {
                    self.proposed_count -= 1;
                }
                for out_point in entry.transaction.input_pts() {
                    if self.spent.get(out_point) == Some(hash) {
                        self.spent.remove(out_point);
                    }
                }
                self.total_size -= entry.size;
                self.total_cycles -= entry.cycles.unwrap_or(0);
            }
        }
    }

    /// Evict `hash` and every orphan waiting on it, transitively.
    fn evict_with_descendants(&mut self, hash: &Hash, reason: Error) -> Vec<(Hash, Error)> {
        let mut evicted = Vec::new();
        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.waiting.remove(&current) {
                stack.extend(children);
            }
            if self.remove_entry(&current).is_some() {
                evicted.push((current, reason.clone()));
            }
        }
        for (hash, reason) in &evicted {
            info!(target: LOG_TARGET_TX_POOL, "evict tx 0x{}: {}", hex::encode(hash), reason);
        }
        evicted
    }

    fn over_limits(&self) -> bool {
        self.pending_count + self.proposed_count > self.config.max_tx_count
            || self.total_size > self.config.max_pool_size
            || self.total_cycles > self.config.max_pool_cycles
    }

    /// Lower fee-per-cycle first, then age per the tie-break, then hash.
    fn eviction_order(&self, a: &TxEntry, b: &TxEntry) -> Ordering {
        let a_cycles = u128::from(a.cycles.unwrap_or(0).max(1));
        let b_cycles = u128::from(b.cycles.unwrap_or(0).max(1));
        let by_rate = (u128::from(a.fee) * b_cycles).cmp(&(u128::from(b.fee) * a_cycles));
        let by_age = a.inserted_at.cmp(&b.inserted_at).then(a.seq.cmp(&b.seq));
        let by_age = match self.config.eviction_tie_break {
            EvictionTieBreak::OldestFirst => by_age,
            EvictionTieBreak::NewestFirst => by_age.reverse(),
        };
        by_rate.then(by_age).then_with(|| a.hash.cmp(&b.hash))
    }

    fn enforce_limits(&mut self) -> Vec<(Hash, Error)> {
        let mut evicted = Vec::new();
        while self.over_limits() {
            let victim = self
                .entries
                .values()
                .filter(|entry| entry.stage != TxStage::Orphan)
                .min_by(|a, b| self.eviction_order(a, b))
                .map(|entry| entry.hash);
            match victim {
                Some(victim) => {
                    evicted.extend(self.evict_with_descendants(&victim, Error::PoolFull))
                }
                None => break,
            }
        }
        evicted
    }

    fn limit_orphans(&mut self) {
        while self.orphan_count > self.config.max_orphans {
            let oldest = self
                .entries
                .values()
                .filter(|entry| entry.stage == TxStage::Orphan)
                .min_by_key(|entry| entry.seq)
                .map(|entry| entry.hash);
            match oldest {
                Some(oldest) => {
                    self.evict_with_descendants(&oldest, Error::PoolFull);
                }
                None => break,
            }
        }
    }

    /// Orphan → pending once every input is live on chain.
    fn promote(
        &mut self,
        hash: &Hash,
        snapshot: &Snapshot,
        estimator: &ScriptCycleEstimator,
    ) -> Result<TxStage> {
        let (transaction, cached_cycles, size) = match self.entries.get(hash) {
            Some(entry) if entry.stage == TxStage::Orphan => {
                (entry.transaction.clone(), entry.cycles, entry.size)
            }
            Some(entry) => return Ok(entry.stage),
            None => return Err(Error::NotFound(format!("tx 0x{}", hex::encode(hash)))),
        };

        for out_point in transaction.input_pts() {
            if self.spent.contains_key(out_point) {
                return Err(Error::Conflict(out_point.clone()));
            }
        }
        let resolved = resolve_transaction(&transaction, snapshot.cells())?;
        check_since(&resolved, snapshot.chain().tip_number(), self.cellbase_maturity)?;
        let fee = check_tx_inputs(&resolved)?;
        check_fee_rate(fee, size, self.config.min_fee_rate)?;
        let cycles = match cached_cycles {
            Some(cycles) => cycles,
            None => estimator.estimate(&resolved)?,
        };

        if let Some(entry) = self.entries.get_mut(hash) {
            entry.cycles = Some(cycles);
            entry.fee = fee;
        }
        let stage = if self.proposals.contains_key(&transaction.proposal_short_id()) {
            TxStage::Proposed
        } else {
            TxStage::Pending
        };
        self.set_stage(hash, stage);
        debug!(target: LOG_TARGET_TX_POOL, "promote orphan 0x{} to {:?}", hex::encode(hash), stage);

        self.refresh_orphans(hash, snapshot.cells(), estimator);
        Ok(stage)
    }

    /// Reconcile with a block just committed on top of `snapshot`:
    ///
    /// 1. Committed transactions leave the pool
    /// 2. Entries spending an input the block consumed are evicted with
    ///    their orphan descendants
    /// 3. Orphans whose last missing parent was committed are promoted
    pub fn on_block_committed(
        &mut self,
        block: &Block,
        snapshot: &Snapshot,
        estimator: &ScriptCycleEstimator,
    ) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        let committed: Vec<Hash> = block.transactions.iter().map(Transaction::hash).collect();

        for hash in &committed {
            if self.remove_entry(hash).is_some() {
                outcome.committed.push(*hash);
            }
        }

        for tx in block.transactions.iter().filter(|tx| !tx.is_cellbase()) {
            for out_point in tx.input_pts() {
                if let Some(holder) = self.spent.get(out_point).copied() {
                    let reason = Error::Conflict(out_point.clone());
                    outcome.evicted.extend(self.evict_with_descendants(&holder, reason));
                }
            }
        }

        let mut ready = Vec::new();
        for hash in &committed {
            let Some(children) = self.waiting.remove(hash) else {
                continue;
            };
            for child in children {
                if let Some(entry) = self.entries.get_mut(&child) {
                    entry.missing.remove(hash);
                    if entry.missing.is_empty() {
                        ready.push((entry.seq, child));
                    }
                }
            }
        }
        ready.sort();
        ready.dedup();

        for (_, child) in ready {
            if !self.entries.contains_key(&child) {
                continue;
            }
            match self.promote(&child, snapshot, estimator) {
                Ok(_) => outcome.promoted.push(child),
                Err(err) => outcome.evicted.extend(self.evict_with_descendants(&child, err)),
            }
        }

        outcome.evicted.extend(self.enforce_limits());
        self.touch();
        info!(
            target: LOG_TARGET_TX_POOL,
            "block {} committed {} pooled txs, promoted {}, evicted {}",
            block.number(),
            outcome.committed.len(),
            outcome.promoted.len(),
            outcome.evicted.len()
        );
        outcome
    }

    /// Replace the commit window. Pending entries inside it become proposed;
    /// proposed entries outside it fall back to pending.
    pub fn update_proposals(&mut self, window: HashMap<ProposalShortId, BlockNumber>) {
        self.proposals = window;
        let changes: Vec<(Hash, TxStage)> = self
            .entries
            .values()
            .filter_map(|entry| {
                let in_window = self.proposals.contains_key(&entry.short_id);
                match entry.stage {
                    TxStage::Pending if in_window => Some((entry.hash, TxStage::Proposed)),
                    TxStage::Proposed if !in_window => Some((entry.hash, TxStage::Pending)),
                    _ => None,
                }
            })
            .collect();

        for (hash, stage) in &changes {
            self.set_stage(hash, *stage);
        }
        if !changes.is_empty() {
            self.touch();
        } else {
            self.publish();
        }
    }

    pub fn proposals(&self) -> &HashMap<ProposalShortId, BlockNumber> {
        &self.proposals
    }

    /// Rebuild the pool after a reorg: detached transactions first, oldest
    /// block first, then the previous entries in insertion order with their
    /// cached cycles. Failures are dropped.
    pub fn readmit_after_reorg(
        &mut self,
        detached: &[Arc<Block>],
        snapshot: &Snapshot,
        estimator: &ScriptCycleEstimator,
    ) -> Vec<Hash> {
        let mut previous: Vec<TxEntry> = self.clear();
        previous.sort_by_key(|entry| entry.seq);

        let mut readmitted = Vec::new();
        for block in detached.iter().rev() {
            for tx in block.transactions.iter().filter(|tx| !tx.is_cellbase()) {
                let hash = tx.hash();
                match self.admit(Arc::new(tx.clone()), snapshot, estimator, None, None) {
                    Ok(_) => readmitted.push(hash),
                    Err(Error::Duplicate(_)) => {}
                    Err(err) => warn!(
                        target: LOG_TARGET_TX_POOL,
                        "drop detached tx 0x{}: {}",
                        hex::encode(hash),
                        err
                    ),
                }
            }
        }

        for entry in previous {
            let inserted_at = Some(entry.inserted_at);
            match self.admit(entry.transaction, snapshot, estimator, entry.cycles, inserted_at) {
                Ok(_) => readmitted.push(entry.hash),
                Err(Error::Duplicate(_)) => {}
                Err(err) => warn!(
                    target: LOG_TARGET_TX_POOL,
                    "drop pooled tx 0x{} after reorg: {}",
                    hex::encode(entry.hash),
                    err
                ),
            }
        }

        self.touch();
        readmitted
    }

    fn clear(&mut self) -> Vec<TxEntry> {
        self.by_short_id.clear();
        self.spent.clear();
        self.waiting.clear();
        self.pending_count = 0;
        self.proposed_count = 0;
        self.orphan_count = 0;
        self.total_size = 0;
        self.total_cycles = 0;
        self.view.clear();
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Explicitly drop an entry. Orphans waiting on it stay and wait for it
    /// as an unseen parent.
    pub fn remove(&mut self, hash: &Hash) -> Option<TxEntry> {
        let entry = self.remove_entry(hash)?;
        if entry.stage != TxStage::Orphan {
            for child in self.waiting.get(hash).cloned().unwrap_or_default() {
                if let Some(child) = self.entries.get_mut(&child) {
                    child.cycles = None;
                }
            }
        }
        self.touch();
        Some(entry)
    }

    /// Pending entries not yet in the commit window, oldest first.
    pub fn propose_candidates(&self, limit: usize) -> Vec<ProposalShortId> {
        let mut candidates: Vec<&TxEntry> = self
            .entries
            .values()
            .filter(|entry| entry.stage == TxStage::Pending)
            .collect();
        candidates.sort_by_key(|entry| entry.seq);
        candidates.into_iter().take(limit).map(|entry| entry.short_id).collect()
    }

    /// Proposed entries fitting the block budgets, oldest first.
    pub fn package_txs(&self, max_cycles: Cycle, max_size: usize) -> Vec<TxEntry> {
        let mut proposed: Vec<&TxEntry> = self
            .entries
            .values()
            .filter(|entry| entry.stage == TxStage::Proposed)
            .collect();
        proposed.sort_by_key(|entry| entry.seq);

        let mut cycles: Cycle = 0;
        let mut size = 0usize;
        let mut package = Vec::new();
        for entry in proposed {
            let entry_cycles = entry.cycles.unwrap_or(0);
            if cycles + entry_cycles > max_cycles || size + entry.size > max_size {
                continue;
            }
            cycles += entry_cycles;
            size += entry.size;
            package.push(entry.clone());
        }
        package
    }

    fn touch(&mut self) {
        self.last_txs_updated_at = unix_time_ms();
        self.publish();
    }

    fn publish(&self) {
        self.view.publish(self.info());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, TransactionBuilder};
    use crate::config::EpochParams;
    use crate::constants::*;
    use crate::hash::sha256;
    use crate::script::always_success_program;

    struct Fixture {
        snapshot: Snapshot,
        estimator: ScriptCycleEstimator,
        dep: OutPoint,
        funds: Vec<OutPoint>,
        lock: Script,
    }

    fn fixture(funds: u32) -> Fixture {
        let program = always_success_program();
        let lock = Script::new(sha256(&program), vec![]);
        let mut genesis_tx = TransactionBuilder::default()
            .output(CellOutput::new(100 * ONE_CKB, program, lock.clone(), None));
        for _ in 0..funds {
            let output = CellOutput::new(500_000 * ONE_CKB, vec![], lock.clone(), None);
            genesis_tx = genesis_tx.output(output);
        }
        let genesis_tx = genesis_tx.build();
        let tx_hash = genesis_tx.hash();
        let genesis = BlockBuilder::default().transaction(genesis_tx).build();

        Fixture {
            snapshot: Snapshot::new(genesis, EpochParams::default()).unwrap(),
            estimator: ScriptCycleEstimator::default(),
            dep: OutPoint::new(tx_hash, 0),
            funds: (1..=funds).map(|i| OutPoint::new(tx_hash, i)).collect(),
            lock,
        }
    }

    impl Fixture {
        fn spend(&self, input: &OutPoint, capacity: Capacity) -> Transaction {
            TransactionBuilder::default()
                .dep(self.dep.clone())
                .input(CellInput::new(input.clone(), 0))
                .output(CellOutput::new(capacity, vec![], self.lock.clone(), None))
                .build()
        }

        fn commit(&mut self, pool: &mut TxPool, txs: Vec<Transaction>) -> CommitOutcome {
            let block = BlockBuilder::next(self.snapshot.chain()).transactions(txs).build();
            self.snapshot = self.snapshot.process_block(block.clone()).unwrap();
            pool.on_block_committed(&block, &self.snapshot, &self.estimator)
        }
    }

    fn pool() -> TxPool {
        TxPool::new(TxPoolConfig::default(), DEFAULT_CELLBASE_MATURITY)
    }

    #[test]
    fn test_submit_pending() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);

        let stage = pool.submit(tx.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        assert_eq!(stage, TxStage::Pending);

        let entry = pool.get(&tx.hash()).unwrap();
        assert_eq!(entry.cycles, Some(2));
        assert_eq!(entry.fee, 100_000 * ONE_CKB);
        assert_eq!(pool.info().pending, 1);
        assert_eq!(pool.view().stage(&tx.hash()), Some(TxStage::Pending));
        assert_eq!(pool.view().info().pending, 1);
    }

    #[test]
    fn test_submit_duplicate() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        pool.submit(tx.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        let result = pool.submit(tx.clone(), &fixture.snapshot, &fixture.estimator);
        assert_eq!(result, Err(Error::Duplicate(tx.hash())));
    }

    #[test]
    fn test_pool_conflict_rejected() {
        let fixture = fixture(1);
        let mut pool = pool();
        let first = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        let second = fixture.spend(&fixture.funds[0], 300_000 * ONE_CKB);
        pool.submit(first, &fixture.snapshot, &fixture.estimator).unwrap();

        let result = pool.submit(second.clone(), &fixture.snapshot, &fixture.estimator);
        assert_eq!(result, Err(Error::Conflict(fixture.funds[0].clone())));
        assert!(!pool.contains(&second.hash()));
    }

    #[test]
    fn test_insufficient_capacity() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 600_000 * ONE_CKB);
        let result = pool.submit(tx, &fixture.snapshot, &fixture.estimator);
        assert!(matches!(result, Err(Error::InsufficientCapacity { .. })));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_low_fee_rejected() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 500_000 * ONE_CKB);
        let result = pool.submit(tx, &fixture.snapshot, &fixture.estimator);
        assert!(matches!(result, Err(Error::LowFeeRate { fee: 0, .. })));
    }

    #[test]
    fn test_orphan_promoted_when_parent_commits() {
        let mut fixture = fixture(1);
        let mut pool = pool();
        let parent = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        let child = fixture.spend(&OutPoint::new(parent.hash(), 0), 300_000 * ONE_CKB);

        // child first: parent unseen
        let result = pool.submit(child.clone(), &fixture.snapshot, &fixture.estimator);
        assert_eq!(result, Ok(TxStage::Orphan));
        assert_eq!(pool.get(&child.hash()).unwrap().cycles, None);

        // parent arrives: child can be verified through the pool
        let result = pool.submit(parent.clone(), &fixture.snapshot, &fixture.estimator);
        assert_eq!(result, Ok(TxStage::Pending));
        let orphan = pool.get(&child.hash()).unwrap();
        assert_eq!(orphan.stage, TxStage::Orphan);
        assert_eq!(orphan.cycles, Some(2));
        assert_eq!(orphan.fee, 100_000 * ONE_CKB);

        let outcome = fixture.commit(&mut pool, vec![parent.clone()]);
        assert_eq!(outcome.committed, vec![parent.hash()]);
        assert_eq!(outcome.promoted, vec![child.hash()]);
        assert_eq!(pool.stage(&child.hash()), Some(TxStage::Pending));
        assert_eq!(pool.info().orphan, 0);
    }

    #[test]
    fn test_commit_evicts_conflicts_and_descendants() {
        let mut fixture = fixture(1);
        let mut pool = pool();
        let pooled = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        let orphan = fixture.spend(&OutPoint::new(pooled.hash(), 0), 300_000 * ONE_CKB);
        let mined = fixture.spend(&fixture.funds[0], 450_000 * ONE_CKB);
        pool.submit(pooled.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        pool.submit(orphan.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        let outcome = fixture.commit(&mut pool, vec![mined]);
        let evicted: Vec<Hash> = outcome.evicted.iter().map(|(hash, _)| *hash).collect();
        assert!(evicted.contains(&pooled.hash()));
        assert!(evicted.contains(&orphan.hash()));
        assert_eq!(outcome.evicted[0].1, Error::Conflict(fixture.funds[0].clone()));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_update_proposals_moves_stages() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        pool.submit(tx.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        pool.update_proposals(HashMap::from([(tx.proposal_short_id(), 1)]));
        assert_eq!(pool.stage(&tx.hash()), Some(TxStage::Proposed));
        assert_eq!(pool.info().proposed, 1);

        pool.update_proposals(HashMap::new());
        assert_eq!(pool.stage(&tx.hash()), Some(TxStage::Pending));
    }

    #[test]
    fn test_submit_directly_proposed() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        pool.update_proposals(HashMap::from([(tx.proposal_short_id(), 1)]));

        assert_eq!(pool.submit(tx, &fixture.snapshot, &fixture.estimator), Ok(TxStage::Proposed));
    }

    #[test]
    fn test_eviction_lowest_fee_rate() {
        let fixture = fixture(3);
        let config = TxPoolConfig { max_tx_count: 2, ..Default::default() };
        let mut pool = TxPool::new(config, DEFAULT_CELLBASE_MATURITY);
        let cheap = fixture.spend(&fixture.funds[0], 499_000 * ONE_CKB);
        let rich = fixture.spend(&fixture.funds[1], 400_000 * ONE_CKB);
        let middle = fixture.spend(&fixture.funds[2], 450_000 * ONE_CKB);

        pool.submit(cheap.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        pool.submit(rich.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        pool.submit(middle.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        assert!(!pool.contains(&cheap.hash()));
        assert!(pool.contains(&rich.hash()));
        assert!(pool.contains(&middle.hash()));
    }

    #[test]
    fn test_eviction_of_new_entry_is_pool_full() {
        let fixture = fixture(2);
        let config = TxPoolConfig { max_tx_count: 1, ..Default::default() };
        let mut pool = TxPool::new(config, DEFAULT_CELLBASE_MATURITY);
        let rich = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        let cheap = fixture.spend(&fixture.funds[1], 499_000 * ONE_CKB);

        pool.submit(rich.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        let result = pool.submit(cheap.clone(), &fixture.snapshot, &fixture.estimator);
        assert_eq!(result, Err(Error::PoolFull));
        assert!(pool.contains(&rich.hash()));
        assert!(!pool.contains(&cheap.hash()));
    }

    #[test]
    fn test_eviction_tie_break() {
        let cases = [(EvictionTieBreak::OldestFirst, 1usize), (EvictionTieBreak::NewestFirst, 0)];
        for (tie_break, survivor) in cases {
            let fixture = fixture(2);
            let config = TxPoolConfig {
                max_tx_count: 1,
                eviction_tie_break: tie_break,
                ..Default::default()
            };
            let mut pool = TxPool::new(config, DEFAULT_CELLBASE_MATURITY);
            let txs = [
                fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB),
                fixture.spend(&fixture.funds[1], 400_000 * ONE_CKB),
            ];

            let first = pool.submit(txs[0].clone(), &fixture.snapshot, &fixture.estimator);
            let second = pool.submit(txs[1].clone(), &fixture.snapshot, &fixture.estimator);
            assert!(first.is_ok());
            assert_eq!(second.is_ok(), survivor == 1);
            assert!(pool.contains(&txs[survivor].hash()));
            assert_eq!(pool.len(), 1);
        }
    }

    #[test]
    fn test_missing_output_of_committed_tx_rejected() {
        let fixture = fixture(1);
        let mut pool = pool();
        let absent = OutPoint::new(fixture.dep.tx_hash, 7);

        let spend = fixture.spend(&absent, 100 * ONE_CKB);
        let result = pool.submit(spend, &fixture.snapshot, &fixture.estimator);
        assert!(matches!(result, Err(Error::InvalidTransaction(_))));

        let mut with_dep = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        with_dep.deps.push(absent);
        let result = pool.submit(with_dep, &fixture.snapshot, &fixture.estimator);
        assert!(matches!(result, Err(Error::InvalidTransaction(_))));

        assert!(pool.is_empty());
        assert_eq!(pool.info().orphan, 0);
    }

    #[test]
    fn test_orphan_limit() {
        let fixture = fixture(0);
        let config = TxPoolConfig { max_orphans: 1, ..Default::default() };
        let mut pool = TxPool::new(config, DEFAULT_CELLBASE_MATURITY);
        let first = fixture.spend(&OutPoint::new([1; 32], 0), 100 * ONE_CKB);
        let second = fixture.spend(&OutPoint::new([2; 32], 0), 100 * ONE_CKB);

        pool.submit(first.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        pool.submit(second.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        assert!(!pool.contains(&first.hash()));
        assert!(pool.contains(&second.hash()));
        assert_eq!(pool.info().orphan, 1);
    }

    #[test]
    fn test_package_and_candidates() {
        let fixture = fixture(2);
        let mut pool = pool();
        let a = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        let b = fixture.spend(&fixture.funds[1], 400_000 * ONE_CKB);
        pool.submit(a.clone(), &fixture.snapshot, &fixture.estimator).unwrap();
        pool.submit(b.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        assert_eq!(pool.propose_candidates(1), vec![a.proposal_short_id()]);
        let window = HashMap::from([(a.proposal_short_id(), 1), (b.proposal_short_id(), 1)]);
        pool.update_proposals(window);

        let package = pool.package_txs(DEFAULT_MAX_TX_VERIFY_CYCLES, DEFAULT_MAX_TX_SIZE);
        assert_eq!(package.len(), 2);
        assert_eq!(package[0].hash, a.hash());
        assert_eq!(pool.package_txs(3, DEFAULT_MAX_TX_SIZE).len(), 1);
    }

    #[test]
    fn test_remove() {
        let fixture = fixture(1);
        let mut pool = pool();
        let tx = fixture.spend(&fixture.funds[0], 400_000 * ONE_CKB);
        pool.submit(tx.clone(), &fixture.snapshot, &fixture.estimator).unwrap();

        assert!(pool.remove(&tx.hash()).is_some());
        assert!(pool.spender(&fixture.funds[0]).is_none());
        assert_eq!(pool.view().stage(&tx.hash()), None);
        let last_txs_updated_at = pool.info().last_txs_updated_at;
        assert_eq!(pool.info(), TxPoolInfo { last_txs_updated_at, ..Default::default() });
    }
}

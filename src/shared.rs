//! Node state shared between the write path and queries
//!
//! Chain index and cell set are published together as one immutable
//! [`Snapshot`] behind an `ArcSwap`. Writers build the next snapshot from a
//! clone and swap it in; readers load whatever is current and never block.
//!
//! Locking:
//! - block commit and reorg hold the write lock, then the pool lock
//! - admission holds only the pool lock
//! - dry runs and queries take no lock

use crate::builder::create_block_template;
use crate::cell_set::CellSet;
use crate::chain::{BlockId, ChainIndex};
use crate::config::{EpochParams, NodeConfig, ProposalWindow};
use crate::constants::*;
use crate::error::{Error, Result};
use crate::logger::LOG_TARGET_CHAIN;
use crate::network::{NetworkController, NodeInfo, StaticNetwork};
use crate::script::ScriptCycleEstimator;
use crate::transaction::check_block_reward;
use crate::tx_pool::{unix_time_ms, CommitOutcome, PoolView, TxPool, TxStage};
use crate::types::*;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Chain index and cell set at the same tip.
#[derive(Debug, Clone)]
pub struct Snapshot {
    chain: ChainIndex,
    cells: CellSet,
}

impl Snapshot {
    pub fn new(genesis: Block, params: EpochParams) -> Result<Self> {
        let chain = ChainIndex::new(genesis, params)?;
        let mut cells = CellSet::new();
        cells.apply_block(chain.tip())?;
        Ok(Snapshot { chain, cells })
    }

    pub fn chain(&self) -> &ChainIndex {
        &self.chain
    }

    pub fn cells(&self) -> &CellSet {
        &self.cells
    }

    /// Snapshot with `block` appended. `self` is left untouched; the clone
    /// shares structure with it.
    pub fn process_block(&self, block: Block) -> Result<Snapshot> {
        let mut next = self.clone();
        next.chain.append(block)?;
        let tip = Arc::clone(next.chain.tip());
        next.apply_cells(&tip)?;
        Ok(next)
    }

    /// Apply a main-chain block to the cell set and check its cellbase.
    fn apply_cells(&mut self, block: &Block) -> Result<()> {
        self.cells.apply_block(block)?;
        let reward = self
            .chain
            .block_reward(block.number())
            .ok_or_else(|| Error::NotFound(format!("reward of block {}", block.number())))?;
        check_block_reward(block, reward, &self.cells)
    }

    /// Snapshot with every block above `ancestor` replaced by `new_chain`,
    /// plus the detached blocks, tip first.
    pub fn reorg_to(
        &self,
        ancestor: &Hash,
        new_chain: Vec<Block>,
    ) -> Result<(Snapshot, Vec<Arc<Block>>)> {
        let mut next = self.clone();
        let detached = next.chain.reorg_to(ancestor, new_chain)?;
        for block in &detached {
            next.cells.rollback_block(block)?;
        }

        let ancestor_number = detached
            .last()
            .map(|block| block.number() - 1)
            .unwrap_or_else(|| next.chain.block_number(ancestor).unwrap_or_default());
        for number in ancestor_number + 1..=next.chain.tip_number() {
            let block = next
                .chain
                .get_block(&BlockId::Number(number))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("block {}", number)))?;
            next.apply_cells(&block)?;
        }
        Ok((next, detached))
    }

    /// Commit window for block `tip + 1`: proposals of main-chain blocks and
    /// their uncles within `window`.
    pub fn proposal_window(
        &self,
        window: &ProposalWindow,
    ) -> HashMap<ProposalShortId, BlockNumber> {
        let mut proposals = HashMap::new();
        let Some((start, end)) = window.proposing_range(self.chain.tip_number() + 1) else {
            return proposals;
        };
        for number in start..=end {
            if let Some(block) = self.chain.get_block(&BlockId::Number(number)) {
                for id in block.union_proposal_ids() {
                    proposals.entry(*id).or_insert(number);
                }
            }
        }
        proposals
    }
}

/// Pool changes after a reorg.
#[derive(Debug, Clone, Default)]
pub struct ReorgOutcome {
    pub detached: Vec<Arc<Block>>,
    pub readmitted: Vec<Hash>,
}

struct SharedInner {
    config: NodeConfig,
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    tx_pool: Mutex<TxPool>,
    pool_view: PoolView,
    estimator: ScriptCycleEstimator,
    network: Arc<dyn NetworkController>,
    stopped: AtomicBool,
}

/// Handle to the running node state. Cheap to clone.
#[derive(Clone)]
pub struct Shared {
    inner: Arc<SharedInner>,
}

impl Shared {
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Current snapshot. Stays valid and unchanged while held.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn pool_view(&self) -> &PoolView {
        &self.inner.pool_view
    }

    pub fn tx_pool(&self) -> MutexGuard<'_, TxPool> {
        self.inner.tx_pool.lock()
    }

    pub fn estimator(&self) -> &ScriptCycleEstimator {
        &self.inner.estimator
    }

    pub fn network(&self) -> &Arc<dyn NetworkController> {
        &self.inner.network
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting writes. Queries keep answering from the last snapshot.
    pub fn shutdown(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            info!(target: LOG_TARGET_CHAIN, "shared state shut down");
        }
    }

    fn alert(&self, err: Error) -> Error {
        if err.is_fatal() {
            error!(target: LOG_TARGET_CHAIN, "fatal ledger inconsistency, stopping: {}", err);
            self.shutdown();
        }
        err
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    /// Append `block` to the main chain and reconcile the pool.
    ///
    /// A fatal error stops the node: the published snapshot is kept and
    /// every later write fails with [`Error::Shutdown`].
    pub fn process_block(&self, block: Block) -> Result<CommitOutcome> {
        self.ensure_running()?;
        let _write = self.inner.write_lock.lock();
        let next = self.snapshot().process_block(block).map_err(|err| self.alert(err))?;
        let next = Arc::new(next);

        let mut pool = self.inner.tx_pool.lock();
        self.inner.snapshot.store(Arc::clone(&next));
        let outcome = pool.on_block_committed(next.chain().tip(), &next, &self.inner.estimator);
        pool.update_proposals(next.proposal_window(&self.inner.config.consensus.proposal_window));
        Ok(outcome)
    }

    /// Replace the chain above `ancestor` with `new_chain`, then rebuild the
    /// pool on top of the new tip.
    pub fn reorg_to(&self, ancestor: &Hash, new_chain: Vec<Block>) -> Result<ReorgOutcome> {
        self.ensure_running()?;
        let _write = self.inner.write_lock.lock();
        let (next, detached) = self
            .snapshot()
            .reorg_to(ancestor, new_chain)
            .map_err(|err| self.alert(err))?;
        let next = Arc::new(next);

        let mut pool = self.inner.tx_pool.lock();
        self.inner.snapshot.store(Arc::clone(&next));
        let readmitted = pool.readmit_after_reorg(&detached, &next, &self.inner.estimator);
        pool.update_proposals(next.proposal_window(&self.inner.config.consensus.proposal_window));
        Ok(ReorgOutcome { detached, readmitted })
    }

    /// Admit `transaction` into the pool against the current snapshot.
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<TxStage> {
        self.ensure_running()?;
        let mut pool = self.inner.tx_pool.lock();
        let snapshot = self.snapshot();
        pool.submit(transaction, &snapshot, &self.inner.estimator)
    }

    /// Cycles `transaction` would consume against the current live cells.
    pub fn dry_run(&self, transaction: &Transaction) -> Result<Cycle> {
        let snapshot = self.snapshot();
        self.inner.estimator.dry_run(transaction, snapshot.cells())
    }

    /// Block template on top of the tip: proposed entries are committed,
    /// pending entries are proposed.
    pub fn assemble_block(&self, lock: Script) -> Result<Block> {
        self.ensure_running()?;
        let pool = self.inner.tx_pool.lock();
        let snapshot = self.snapshot();

        let entries = pool.package_txs(MAX_BLOCK_CYCLES, MAX_BLOCK_BYTES);
        let fees = entries.iter().map(|entry| entry.fee).sum();
        let transactions =
            entries.iter().map(|entry| Transaction::clone(&entry.transaction)).collect();
        let proposals = pool.propose_candidates(MAX_BLOCK_PROPOSALS);

        Ok(create_block_template(
            snapshot.chain(),
            lock,
            fees,
            transactions,
            proposals,
            unix_time_ms(),
        ))
    }
}

/// Initializes [`Shared`] from a config and a genesis block.
#[derive(Default)]
pub struct SharedBuilder {
    config: NodeConfig,
    genesis: Option<Block>,
    network: Option<Arc<dyn NetworkController>>,
}

impl SharedBuilder {
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn genesis(mut self, genesis: Block) -> Self {
        self.genesis = Some(genesis);
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkController>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> Result<Shared> {
        self.config.validate()?;
        let genesis = self
            .genesis
            .ok_or_else(|| Error::Config("genesis block is required".to_string()))?;
        let snapshot = Snapshot::new(genesis, self.config.consensus.epoch.clone())?;

        let network = self.network.unwrap_or_else(|| {
            warn!(target: LOG_TARGET_CHAIN, "no network controller given, running without peers");
            Arc::new(StaticNetwork::new(NodeInfo::default()))
        });

        let mut tx_pool =
            TxPool::new(self.config.tx_pool.clone(), self.config.consensus.cellbase_maturity);
        tx_pool.update_proposals(snapshot.proposal_window(&self.config.consensus.proposal_window));
        let pool_view = tx_pool.view();

        info!(
            target: LOG_TARGET_CHAIN,
            "chain {} starts at genesis 0x{}",
            self.config.chain.name,
            hex::encode(snapshot.chain().tip_hash())
        );

        Ok(Shared {
            inner: Arc::new(SharedInner {
                estimator: ScriptCycleEstimator::new(self.config.script.max_cycles),
                config: self.config,
                snapshot: ArcSwap::from_pointee(snapshot),
                write_lock: Mutex::new(()),
                tx_pool: Mutex::new(tx_pool),
                pool_view,
                network,
                stopped: AtomicBool::new(false),
            }),
        })
    }
}

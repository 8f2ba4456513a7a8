//! Main chain index
//!
//! Holds the committed main chain: blocks by hash, the number → hash index,
//! the committed transaction index and the epoch schedule. Fork choice is made
//! elsewhere; this index only appends to the tip or replaces a suffix.
//!
//! Every index is a persistent collection, so a clone shares structure with
//! its source and an append copies only the paths it touches.

use crate::config::EpochParams;
use crate::epoch;
use crate::error::{Error, Result};
use crate::hash;
use crate::logger::LOG_TARGET_CHAIN;
use crate::types::*;
use im::{HashMap, Vector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifies a main-chain block by hash or by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockId {
    Hash(Hash),
    Number(BlockNumber),
}

impl From<Hash> for BlockId {
    fn from(hash: Hash) -> Self {
        BlockId::Hash(hash)
    }
}

impl From<BlockNumber> for BlockId {
    fn from(number: BlockNumber) -> Self {
        BlockId::Number(number)
    }
}

#[derive(Debug, Clone)]
pub struct ChainIndex {
    params: EpochParams,
    tip: Arc<Block>,
    blocks: HashMap<Hash, Arc<Block>>,
    /// Main-chain hashes indexed by block number.
    hashes: Vector<Hash>,
    tx_addresses: HashMap<Hash, TransactionAddress>,
    /// Epochs indexed by epoch number; the last one contains the tip.
    epochs: Vector<EpochExt>,
}

impl ChainIndex {
    /// Index a chain holding only `genesis`.
    pub fn new(genesis: Block, params: EpochParams) -> Result<Self> {
        if genesis.number() != 0 {
            return Err(Error::InvalidBlock(format!(
                "genesis must have number 0, got {}",
                genesis.number()
            )));
        }
        if genesis.header.epoch != 0 {
            return Err(Error::InvalidBlock("genesis must be in epoch 0".to_string()));
        }
        verify_roots(&genesis)?;

        let genesis_epoch = epoch::genesis_epoch(&params, &genesis.header);
        let genesis = Arc::new(genesis);
        let mut chain = ChainIndex {
            params,
            tip: Arc::clone(&genesis),
            blocks: HashMap::new(),
            hashes: Vector::new(),
            tx_addresses: HashMap::new(),
            epochs: Vector::unit(genesis_epoch),
        };
        chain.insert(genesis);
        Ok(chain)
    }

    pub fn params(&self) -> &EpochParams {
        &self.params
    }

    /// Number of main-chain blocks, genesis included.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn tip_number(&self) -> BlockNumber {
        (self.hashes.len() - 1) as BlockNumber
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip.hash()
    }

    pub fn tip(&self) -> &Arc<Block> {
        &self.tip
    }

    pub fn tip_header(&self) -> &Header {
        &self.tip().header
    }

    pub fn get_block_hash(&self, number: BlockNumber) -> Option<Hash> {
        self.hashes.get(usize::try_from(number).ok()?).copied()
    }

    /// Number of a main-chain block.
    pub fn block_number(&self, hash: &Hash) -> Option<BlockNumber> {
        self.blocks.get(hash).map(|block| block.number())
    }

    pub fn get_block(&self, id: &BlockId) -> Option<&Arc<Block>> {
        let hash = match id {
            BlockId::Hash(hash) => *hash,
            BlockId::Number(number) => self.get_block_hash(*number)?,
        };
        self.blocks.get(&hash)
    }

    pub fn get_header(&self, id: &BlockId) -> Option<&Header> {
        self.get_block(id).map(|block| &block.header)
    }

    /// A committed transaction and where it lives.
    pub fn get_transaction(&self, tx_hash: &Hash) -> Option<(&Transaction, &TransactionAddress)> {
        let address = self.tx_addresses.get(tx_hash)?;
        let block = self.blocks.get(&address.block_hash)?;
        let transaction = block.transactions.get(address.index)?;
        Some((transaction, address))
    }

    pub fn contains_transaction(&self, tx_hash: &Hash) -> bool {
        self.tx_addresses.contains_key(tx_hash)
    }

    pub fn epoch(&self, number: EpochNumber) -> Option<&EpochExt> {
        self.epochs.get(usize::try_from(number).ok()?)
    }

    /// Epoch containing the tip.
    pub fn current_epoch(&self) -> &EpochExt {
        &self.epochs[self.epochs.len() - 1]
    }

    /// Epoch containing main-chain block `number`.
    pub fn epoch_of_block(&self, number: BlockNumber) -> Option<&EpochExt> {
        if number > self.tip_number() {
            return None;
        }
        self.epochs.iter().rev().find(|epoch| epoch.start_number <= number)
    }

    /// Epoch of block `tip + 1`, retargeted when the tip closes its epoch.
    pub fn next_epoch_ext(&self) -> EpochExt {
        let current = self.current_epoch();
        let next_number = self.tip_number() + 1;
        if current.contains(next_number) {
            return current.clone();
        }

        let start_timestamp = match current.start_number {
            0 => self.tip_timestamp_at(0),
            start => self.tip_timestamp_at(start - 1),
        };
        let elapsed = self.tip_header().timestamp.saturating_sub(start_timestamp);
        epoch::next_epoch(&self.params, current, elapsed, self.tip_hash())
    }

    fn tip_timestamp_at(&self, number: BlockNumber) -> u64 {
        self.get_header(&BlockId::Number(number))
            .map(|header| header.timestamp)
            .unwrap_or_default()
    }

    /// Median timestamp of the last `count` main-chain blocks up to the tip.
    pub fn median_time(&self, count: usize) -> u64 {
        let start = self.hashes.len().saturating_sub(count.max(1));
        let mut timestamps: Vec<u64> = self
            .hashes
            .iter()
            .skip(start)
            .filter_map(|hash| self.blocks.get(hash))
            .map(|block| block.header.timestamp)
            .collect();
        timestamps.sort_unstable();
        timestamps.get(timestamps.len() / 2).copied().unwrap_or_default()
    }

    /// Primary issuance of block `number`, for main-chain blocks and `tip + 1`.
    pub fn block_reward(&self, number: BlockNumber) -> Option<Capacity> {
        if number == self.tip_number() + 1 {
            return Some(epoch::block_reward(&self.next_epoch_ext(), number));
        }
        self.epoch_of_block(number)
            .map(|epoch| epoch::block_reward(epoch, number))
    }

    /// Append: ℬ → ChainIndex
    ///
    /// 1. The parent must be the tip, otherwise `OrphanBlock`
    /// 2. Number must be tip + 1 and epoch must match the schedule
    /// 3. Header roots must commit to the body
    /// 4. Index the block, its transactions and a newly started epoch
    pub fn append(&mut self, block: Block) -> Result<()> {
        let tip_hash = self.tip_hash();
        if block.header.parent_hash != tip_hash {
            return Err(Error::OrphanBlock { parent_hash: block.header.parent_hash });
        }

        let expected_number = self.tip_number() + 1;
        if block.number() != expected_number {
            return Err(Error::InvalidBlock(format!(
                "expected number {}, got {}",
                expected_number,
                block.number()
            )));
        }

        let next_epoch = self.next_epoch_ext();
        if block.header.epoch != next_epoch.number {
            return Err(Error::InvalidBlock(format!(
                "expected epoch {}, got {}",
                next_epoch.number, block.header.epoch
            )));
        }

        verify_roots(&block)?;

        if next_epoch.number as usize == self.epochs.len() {
            info!(
                target: LOG_TARGET_CHAIN,
                "epoch {} starts at block {}: length {}, difficulty {}",
                next_epoch.number,
                next_epoch.start_number,
                next_epoch.length,
                next_epoch.difficulty
            );
            self.epochs.push_back(next_epoch);
        }

        let block = Arc::new(block);
        info!(
            target: LOG_TARGET_CHAIN,
            "append block {} 0x{} ({} txs)",
            block.number(),
            hex::encode(block.hash()),
            block.transactions.len()
        );
        self.insert(block);
        Ok(())
    }

    fn insert(&mut self, block: Arc<Block>) {
        let block_hash = block.hash();
        for (index, tx) in block.transactions.iter().enumerate() {
            self.tx_addresses.insert(
                tx.hash(),
                TransactionAddress { block_hash, block_number: block.number(), index },
            );
        }
        self.hashes.push_back(block_hash);
        self.blocks.insert(block_hash, Arc::clone(&block));
        self.tip = block;
    }

    /// Detach the tip block. Genesis is never detached.
    fn detach_tip(&mut self) -> Option<Arc<Block>> {
        if self.hashes.len() <= 1 {
            return None;
        }
        let parent = self.blocks.get(&self.tip.header.parent_hash).cloned()?;
        let block = std::mem::replace(&mut self.tip, parent);
        let hash = block.hash();
        self.hashes.pop_back();
        self.blocks.remove(&hash);
        for tx in &block.transactions {
            self.tx_addresses.remove(&tx.hash());
        }
        let tip_number = self.tip_number();
        while self.epochs.len() > 1 && self.current_epoch().start_number > tip_number {
            self.epochs.pop_back();
        }
        debug!(target: LOG_TARGET_CHAIN, "detach block {} 0x{}", block.number(), hex::encode(hash));
        Some(block)
    }

    /// ReorgTo: replace every block above `ancestor` with `new_chain`.
    ///
    /// Returns the detached blocks, tip first. All-or-nothing: on error the
    /// index is unchanged.
    pub fn reorg_to(&mut self, ancestor: &Hash, new_chain: Vec<Block>) -> Result<Vec<Arc<Block>>> {
        let ancestor_number = self.block_number(ancestor).ok_or_else(|| {
            Error::NotFound(format!(
                "ancestor 0x{} is not on the main chain",
                hex::encode(ancestor)
            ))
        })?;

        let mut next = self.clone();
        let mut detached = Vec::new();
        while next.tip_number() > ancestor_number {
            match next.detach_tip() {
                Some(block) => detached.push(block),
                None => break,
            }
        }
        for block in new_chain {
            next.append(block)?;
        }

        info!(
            target: LOG_TARGET_CHAIN,
            "reorg at block {}: detached {}, new tip {} 0x{}",
            ancestor_number,
            detached.len(),
            next.tip_number(),
            hex::encode(next.tip_hash())
        );
        *self = next;
        Ok(detached)
    }
}

/// Header roots must commit to the block body.
pub fn verify_roots(block: &Block) -> Result<()> {
    let header = &block.header;
    if header.transactions_root != hash::transactions_root(&block.transactions) {
        return Err(Error::InvalidBlock("transactions root mismatch".to_string()));
    }
    if header.witnesses_root != hash::witnesses_root(&block.transactions) {
        return Err(Error::InvalidBlock("witnesses root mismatch".to_string()));
    }
    if header.proposals_hash != hash::proposals_hash(&block.proposals) {
        return Err(Error::InvalidBlock("proposals hash mismatch".to_string()));
    }
    if header.uncles_hash != hash::uncles_hash(&block.uncles)
        || header.uncles_count as usize != block.uncles.len()
    {
        return Err(Error::InvalidBlock("uncles mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BlockBuilder;

    fn params() -> EpochParams {
        EpochParams {
            genesis_length: 4,
            min_length: 2,
            max_length: 8,
            duration_target: 4_000,
            reward: 1_000,
        }
    }

    fn genesis() -> Block {
        BlockBuilder::default().timestamp(0).difficulty(100).build()
    }

    fn extend(chain: &mut ChainIndex, count: usize, interval: u64) {
        for _ in 0..count {
            let block = BlockBuilder::next(chain)
                .timestamp(chain.tip_header().timestamp + interval)
                .build();
            chain.append(block).unwrap();
        }
    }

    #[test]
    fn test_new_rejects_non_zero_genesis() {
        let block = BlockBuilder::default().number(1).build();
        assert!(matches!(ChainIndex::new(block, params()), Err(Error::InvalidBlock(_))));
    }

    #[test]
    fn test_append_and_lookup() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        extend(&mut chain, 3, 1_000);

        assert_eq!(chain.tip_number(), 3);
        for number in 0..=3 {
            let hash = chain.get_block_hash(number).unwrap();
            let block = chain.get_block(&BlockId::Hash(hash)).unwrap();
            assert_eq!(block.number(), number);
        }
        assert!(chain.get_block_hash(4).is_none());
    }

    #[test]
    fn test_median_time() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        assert_eq!(chain.median_time(37), 0);
        extend(&mut chain, 4, 1_000);

        assert_eq!(chain.median_time(37), 2_000);
        assert_eq!(chain.median_time(2), 4_000);
    }

    #[test]
    fn test_append_orphan_block() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        let mut block = BlockBuilder::next(&chain).build();
        block.header.parent_hash = [9; 32];

        let result = chain.append(block);
        assert_eq!(result, Err(Error::OrphanBlock { parent_hash: [9; 32] }));
        assert_eq!(chain.tip_number(), 0);
    }

    #[test]
    fn test_append_rejects_bad_roots() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        let mut block = BlockBuilder::next(&chain).build();
        block.proposals.push(ProposalShortId([1; 10]));

        assert!(matches!(chain.append(block), Err(Error::InvalidBlock(_))));
    }

    #[test]
    fn test_epoch_retarget_on_boundary() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        // Epoch 0 covers blocks 0..=3 and finishes in 3 * 500ms, well under target.
        extend(&mut chain, 3, 500);
        let next = chain.next_epoch_ext();
        assert_eq!(next.number, 1);
        assert_eq!(next.start_number, 4);
        assert_eq!(next.length, 8);

        extend(&mut chain, 1, 500);
        assert_eq!(chain.current_epoch().number, 1);
        assert_eq!(chain.epoch(1), Some(&next));
        assert_eq!(chain.tip_header().epoch, 1);
    }

    #[test]
    fn test_block_reward_per_block() {
        let chain = ChainIndex::new(genesis(), params()).unwrap();
        assert_eq!(chain.block_reward(0), Some(250));
        assert_eq!(chain.block_reward(1), Some(250));
        assert_eq!(chain.block_reward(5), None);
    }

    #[test]
    fn test_reorg_replaces_suffix() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        extend(&mut chain, 3, 1_000);
        let ancestor = chain.get_block_hash(1).unwrap();
        let old_tip = chain.tip_hash();

        let mut fork = chain.clone();
        fork.reorg_to(&ancestor, vec![]).unwrap();
        let replacement = BlockBuilder::next(&fork).timestamp(99_999).build();
        let replacement_hash = replacement.hash();

        let detached = chain.reorg_to(&ancestor, vec![replacement]).unwrap();
        assert_eq!(detached.len(), 2);
        assert_eq!(detached[0].hash(), old_tip);
        assert_eq!(chain.tip_number(), 2);
        assert_eq!(chain.tip_hash(), replacement_hash);
        assert!(chain.block_number(&old_tip).is_none());
    }

    #[test]
    fn test_reorg_unknown_ancestor() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        assert!(matches!(chain.reorg_to(&[7; 32], vec![]), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_reorg_leaves_chain_untouched() {
        let mut chain = ChainIndex::new(genesis(), params()).unwrap();
        extend(&mut chain, 2, 1_000);
        let before_tip = chain.tip_hash();
        let ancestor = chain.get_block_hash(0).unwrap();

        let bad = BlockBuilder::default().number(1).parent_hash([5; 32]).build();
        assert!(chain.reorg_to(&ancestor, vec![bad]).is_err());
        assert_eq!(chain.tip_hash(), before_tip);
        assert_eq!(chain.tip_number(), 2);
    }
}

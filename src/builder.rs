//! Block and transaction assembly

use crate::chain::ChainIndex;
use crate::epoch;
use crate::hash;
use crate::types::*;

/// Builds a block and fills in every header root from the body.
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    header: Header,
    uncles: Vec<UncleBlock>,
    transactions: Vec<Transaction>,
    proposals: Vec<ProposalShortId>,
}

impl BlockBuilder {
    /// Start a block on top of `chain`'s tip, in the scheduled epoch.
    pub fn next(chain: &ChainIndex) -> Self {
        let parent = chain.tip_header();
        let epoch = chain.next_epoch_ext();
        BlockBuilder::default()
            .parent_hash(chain.tip_hash())
            .number(parent.number + 1)
            .timestamp(parent.timestamp + 1)
            .epoch(epoch.number)
            .difficulty(epoch.difficulty)
    }

    pub fn version(mut self, version: u32) -> Self {
        self.header.version = version;
        self
    }

    pub fn parent_hash(mut self, parent_hash: Hash) -> Self {
        self.header.parent_hash = parent_hash;
        self
    }

    pub fn number(mut self, number: BlockNumber) -> Self {
        self.header.number = number;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    pub fn epoch(mut self, epoch: EpochNumber) -> Self {
        self.header.epoch = epoch;
        self
    }

    pub fn difficulty(mut self, difficulty: u64) -> Self {
        self.header.difficulty = difficulty;
        self
    }

    pub fn seal(mut self, seal: Seal) -> Self {
        self.header.seal = seal;
        self
    }

    pub fn transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn transactions<I: IntoIterator<Item = Transaction>>(mut self, transactions: I) -> Self {
        self.transactions.extend(transactions);
        self
    }

    pub fn proposal(mut self, proposal: ProposalShortId) -> Self {
        self.proposals.push(proposal);
        self
    }

    pub fn proposals<I: IntoIterator<Item = ProposalShortId>>(mut self, proposals: I) -> Self {
        self.proposals.extend(proposals);
        self
    }

    pub fn uncle(mut self, uncle: UncleBlock) -> Self {
        self.uncles.push(uncle);
        self
    }

    pub fn build(self) -> Block {
        let mut header = self.header;
        header.transactions_root = hash::transactions_root(&self.transactions);
        header.witnesses_root = hash::witnesses_root(&self.transactions);
        header.proposals_hash = hash::proposals_hash(&self.proposals);
        header.uncles_hash = hash::uncles_hash(&self.uncles);
        header.uncles_count = self.uncles.len() as u32;

        Block {
            header,
            uncles: self.uncles,
            transactions: self.transactions,
            proposals: self.proposals,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.transaction.version = version;
        self
    }

    pub fn dep(mut self, dep: OutPoint) -> Self {
        self.transaction.deps.push(dep);
        self
    }

    pub fn input(mut self, input: CellInput) -> Self {
        self.transaction.inputs.push(input);
        self
    }

    pub fn output(mut self, output: CellOutput) -> Self {
        self.transaction.outputs.push(output);
        self
    }

    pub fn witness(mut self, witness: Witness) -> Self {
        self.transaction.witnesses.push(witness);
        self
    }

    pub fn build(self) -> Transaction {
        self.transaction
    }
}

/// CreateCellbase: one null input tagged with the block number, one output.
pub fn create_cellbase_transaction(
    number: BlockNumber,
    capacity: Capacity,
    lock: Script,
) -> Transaction {
    TransactionBuilder::default()
        .input(CellInput::new_cellbase_input(number))
        .output(CellOutput::new(capacity, Vec::new(), lock, None))
        .build()
}

/// CreateBlockTemplate: 𝒞 × 𝒯𝒳* × 𝒫* → ℬ
///
/// 1. Schedule the block at `tip + 1` in the next epoch
/// 2. Cellbase pays the block reward plus `fees` to `lock`
/// 3. Append the committed transactions and proposals, compute the roots
pub fn create_block_template(
    chain: &ChainIndex,
    lock: Script,
    fees: Capacity,
    transactions: Vec<Transaction>,
    proposals: Vec<ProposalShortId>,
    timestamp: u64,
) -> Block {
    let number = chain.tip_number() + 1;
    let epoch = chain.next_epoch_ext();
    let reward = epoch::block_reward(&epoch, number).saturating_add(fees);
    let timestamp = timestamp.max(chain.tip_header().timestamp + 1);

    BlockBuilder::next(chain)
        .timestamp(timestamp)
        .transaction(create_cellbase_transaction(number, reward, lock))
        .transactions(transactions)
        .proposals(proposals)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_roots;
    use crate::config::EpochParams;

    #[test]
    fn test_build_fills_roots() {
        let tx = TransactionBuilder::default()
            .input(CellInput::new(OutPoint::new([1; 32], 0), 0))
            .output(CellOutput::new(1, vec![], Script::default(), None))
            .witness(vec![vec![1]])
            .build();
        let block = BlockBuilder::default()
            .transaction(tx)
            .proposal(ProposalShortId([3; 10]))
            .build();

        assert_ne!(block.header.transactions_root, [0; 32]);
        assert_ne!(block.header.proposals_hash, [0; 32]);
        assert_eq!(block.header.uncles_hash, [0; 32]);
        assert!(verify_roots(&block).is_ok());
    }

    #[test]
    fn test_block_template_extends_tip() {
        let chain =
            ChainIndex::new(BlockBuilder::default().build(), EpochParams::default()).unwrap();
        let lock = Script::new([4; 32], vec![]);
        let block = create_block_template(&chain, lock.clone(), 7, vec![], vec![], 0);

        assert_eq!(block.number(), 1);
        assert_eq!(block.header.parent_hash, chain.tip_hash());
        let cellbase = &block.transactions[0];
        assert!(cellbase.is_cellbase());
        assert_eq!(cellbase.outputs[0].lock, lock);
        assert_eq!(cellbase.outputs[0].capacity, chain.block_reward(1).unwrap() + 7);

        let mut chain = chain;
        chain.append(block).unwrap();
        assert_eq!(chain.tip_number(), 1);
    }
}

//! Shared fixtures for integration tests
#![allow(dead_code)]

use cell_ledger::builder::{create_block_template, BlockBuilder, TransactionBuilder};
use cell_ledger::config::NodeConfig;
use cell_ledger::hash::sha256;
use cell_ledger::rpc::QueryFacade;
use cell_ledger::script::always_success_program;
use cell_ledger::shared::{Shared, SharedBuilder};
use cell_ledger::tx_pool::CommitOutcome;
use cell_ledger::*;

/// 500,000 CKB, the capacity of every funding cell.
pub const FUNDING_CAPACITY: Capacity = 50_000_000_000_000;

pub fn always_success_lock() -> Script {
    Script::new(sha256(&always_success_program()), vec![])
}

pub struct Node {
    pub shared: Shared,
    pub facade: QueryFacade,
    /// Dep cell carrying the always-success program.
    pub dep: OutPoint,
    /// Genesis transaction whose outputs are the funding cells.
    pub funding_tx: Hash,
}

/// Genesis with a program cell and `funds` funding cells, all locked by
/// the always-success lock.
pub fn genesis(funds: u32) -> Block {
    let system = TransactionBuilder::default()
        .output(CellOutput::new(
            100 * ONE_CKB,
            always_success_program(),
            always_success_lock(),
            None,
        ))
        .build();
    let mut funding = TransactionBuilder::default();
    for _ in 0..funds {
        let output = CellOutput::new(FUNDING_CAPACITY, vec![], always_success_lock(), None);
        funding = funding.output(output);
    }
    BlockBuilder::default()
        .transaction(system)
        .transaction(funding.build())
        .build()
}

pub fn node(funds: u32) -> Node {
    node_with_config(NodeConfig::default(), funds)
}

pub fn node_with_config(config: NodeConfig, funds: u32) -> Node {
    let genesis = genesis(funds);
    let dep = OutPoint::new(genesis.transactions[0].hash(), 0);
    let funding_tx = genesis.transactions[1].hash();
    let shared = SharedBuilder::default().config(config).genesis(genesis).build().unwrap();
    Node { facade: QueryFacade::new(shared.clone()), shared, dep, funding_tx }
}

impl Node {
    pub fn fund(&self, index: u32) -> OutPoint {
        OutPoint::new(self.funding_tx, index)
    }

    /// Spend `inputs` into one always-success cell of `capacity`.
    pub fn spend(&self, inputs: &[OutPoint], capacity: Capacity) -> Transaction {
        let mut builder = TransactionBuilder::default().dep(self.dep.clone());
        for input in inputs {
            builder = builder.input(CellInput::new(input.clone(), 0));
        }
        builder
            .output(CellOutput::new(capacity, vec![], always_success_lock(), None))
            .build()
    }

    /// Next block on the tip with a cellbase and `transactions`.
    pub fn next_block(&self, transactions: Vec<Transaction>) -> Block {
        let snapshot = self.shared.snapshot();
        create_block_template(snapshot.chain(), always_success_lock(), 0, transactions, vec![], 0)
    }

    pub fn commit(&self, transactions: Vec<Transaction>) -> CommitOutcome {
        self.shared.process_block(self.next_block(transactions)).unwrap()
    }

    pub fn mine(&self, count: usize) {
        for _ in 0..count {
            self.commit(vec![]);
        }
    }
}

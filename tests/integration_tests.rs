//! End-to-end flows through the query facade

mod common;

use cell_ledger::json::*;
use cell_ledger::network::{NetworkState, NodeInfo, PeerInfo, PeerState, StaticNetwork};
use cell_ledger::shared::SharedBuilder;
use cell_ledger::*;
use common::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn out_point_json(out_point: &OutPoint) -> Value {
    serde_json::to_value(JsonOutPoint::from(out_point)).unwrap()
}

fn tx_json(tx: &Transaction) -> Value {
    serde_json::to_value(JsonTransaction::from(tx)).unwrap()
}

#[test]
fn test_block_hash_then_block_matches_number() {
    let node = node(0);
    node.mine(5);

    for number in 0..=5u64 {
        let hash = node.facade.get_block_hash(Uint64(number)).unwrap();
        let block = node.facade.get_block(hash).unwrap();
        assert_eq!(block.header.number, Uint64(number));
        assert_eq!(block.header.hash, hash);
        assert_eq!(node.facade.get_block_by_number(Uint64(number)).unwrap(), block);
    }
    assert!(node.facade.get_block_hash(Uint64(6)).is_none());
}

#[test]
fn test_send_transaction_then_commit() {
    let node = node(1);
    let tx = node.spend(&[node.fund(0)], 400_000 * ONE_CKB);
    let funding = node.shared.snapshot().cells().get_live_cell(&node.fund(0)).unwrap();
    assert_eq!(funding.capacity(), FUNDING_CAPACITY);

    let before = node.facade.tx_pool_info();
    let hash = node.facade.handle("send_transaction", json!([tx_json(&tx)])).unwrap();
    assert_eq!(hash, json!(H256(tx.hash()).to_string()));

    let info = node.facade.tx_pool_info();
    assert_eq!(info.pending.0, before.pending.0 + 1);
    assert_eq!(node.facade.get_transaction(H256(tx.hash())).tx_status.status, "pending");

    node.commit(vec![tx.clone()]);

    let cell = node.facade.get_live_cell(JsonOutPoint::from(&node.fund(0)), None).unwrap();
    assert_eq!(cell.status, "dead");
    assert!(cell.cell.is_none());
    assert_eq!(node.facade.tx_pool_info().pending.0, before.pending.0);

    let committed = node.facade.get_transaction(H256(tx.hash()));
    assert_eq!(committed.tx_status.status, "committed");
    assert_eq!(committed.tx_status.block_hash, node.facade.get_block_hash(Uint64(1)));
}

#[test]
fn test_dry_run_does_not_change_cells() {
    let node = node(1);
    let tx = node.spend(&[node.fund(0)], 400_000 * ONE_CKB);
    let out_point = out_point_json(&node.fund(0));
    let before = node.facade.handle("get_live_cell", json!([out_point.clone()])).unwrap();

    let result = node.facade.handle("dry_run_transaction", json!([tx_json(&tx)])).unwrap();
    assert_eq!(result, json!({ "cycles": "2" }));

    let after = node.facade.handle("get_live_cell", json!([out_point])).unwrap();
    assert_eq!(before, after);
    assert_eq!(after["status"], json!("live"));
    assert_eq!(node.facade.get_transaction(H256(tx.hash())).tx_status.status, "unknown");
}

#[test]
fn test_spending_dead_input_is_rejected() {
    let node = node(1);
    let first = node.spend(&[node.fund(0)], 400_000 * ONE_CKB);
    node.commit(vec![first]);

    let second = node.spend(&[node.fund(0)], 300_000 * ONE_CKB);
    let result = node.facade.send_transaction(JsonTransaction::from(&second));
    assert_eq!(result, Err(Error::Conflict(node.fund(0))));
    assert!(node.shared.pool_view().get(&second.hash()).is_none());
    assert_eq!(node.facade.tx_pool_info().pending.0, 0);
}

#[test]
fn test_live_cell_at_historical_block() {
    let node = node(1);
    let genesis_hash = node.facade.get_block_hash(Uint64(0)).unwrap();
    node.commit(vec![node.spend(&[node.fund(0)], 400_000 * ONE_CKB)]);

    let out_point = JsonOutPoint::from(&node.fund(0));
    let then = node.facade.get_live_cell(out_point.clone(), Some(genesis_hash)).unwrap();
    assert_eq!(then.status, "live");
    assert_eq!(then.cell.unwrap().capacity, Uint64(FUNDING_CAPACITY));

    let off_chain = node.facade.get_live_cell(out_point, Some(H256([5; 32]))).unwrap();
    assert_eq!(off_chain.status, "unknown");
    assert!(off_chain.cell.is_none());
}

#[test]
fn test_cells_by_lock_hash_query() {
    let node = node(0);
    node.mine(6);
    let lock_hash = H256(always_success_lock().hash());

    let cells = node
        .facade
        .handle("get_cells_by_lock_hash", json!([lock_hash.to_string(), "2", "5"]))
        .unwrap();
    let numbers: Vec<Value> =
        cells.as_array().unwrap().iter().map(|cell| cell["block_number"].clone()).collect();
    assert_eq!(numbers, vec![json!("2"), json!("3"), json!("4"), json!("5")]);

    let empty = node.facade.get_cells_by_lock_hash(lock_hash, Uint64(5), Uint64(2));
    assert!(empty.is_empty());
}

#[test]
fn test_epoch_and_chain_info() {
    let node = node(0);
    node.mine(3);

    let epoch = node.facade.get_current_epoch();
    assert_eq!(epoch.number, Uint64(0));
    assert_eq!(epoch.length, Uint64(DEFAULT_EPOCH_LENGTH));
    // 191_780_821_917_808 shannons over 1250 blocks
    assert_eq!(epoch.block_reward, Uint64(153_424_657_534));
    assert_eq!(epoch.remainder_reward, Uint64(308));
    assert_eq!(node.facade.get_epoch_by_number(Uint64(0)), Some(epoch));
    assert!(node.facade.get_epoch_by_number(Uint64(1)).is_none());

    let info = node.facade.get_blockchain_info();
    assert_eq!(info.chain, "ckb_dev");
    assert_eq!(info.tip_number, Uint64(3));
    assert_eq!(info.tip_hash, node.facade.get_tip_header().hash);
    assert_eq!(info.median_time, Uint64(2));
    assert!(!info.is_initial_block_download);
}

#[test]
fn test_peers_from_network_snapshot() {
    let local = NodeInfo { node_id: "local".to_string(), ..Default::default() };
    let network = Arc::new(StaticNetwork::new(local));
    let shared = SharedBuilder::default()
        .genesis(genesis(0))
        .network(network.clone())
        .build()
        .unwrap();
    let facade = QueryFacade::new(shared);
    assert!(facade.get_peers().is_empty());

    network.replace(NetworkState {
        local: NodeInfo { node_id: "local".to_string(), ..Default::default() },
        peers: vec![PeerInfo {
            node: NodeInfo { node_id: "peer-1".to_string(), ..Default::default() },
            is_outbound: true,
        }],
        peers_state: vec![PeerState {
            peer_id: "peer-1".to_string(),
            last_updated: 10,
            blocks_in_flight: 3,
        }],
        initial_block_download: true,
    });

    assert_eq!(facade.local_node_info().node_id, "local");
    assert_eq!(facade.get_peers()[0].node_id, "peer-1");
    assert_eq!(facade.get_peers()[0].is_outbound, Some(true));
    assert_eq!(facade.get_peers_state()[0].blocks_in_flight, Uint64(3));
    assert!(facade.get_blockchain_info().is_initial_block_download);
}

#[test]
fn test_queries_survive_shutdown() {
    let node = node(1);
    node.shared.shutdown();

    let tx = node.spend(&[node.fund(0)], 400_000 * ONE_CKB);
    assert_eq!(node.facade.send_transaction(JsonTransaction::from(&tx)), Err(Error::Shutdown));
    assert_eq!(node.facade.get_tip_block_number(), Uint64(0));
}

#[test]
fn test_readers_never_see_chain_ahead_of_cells() {
    let node = node(0);
    let lock_hash = H256(always_success_lock().hash());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let facade = node.facade.clone();
            let shared = node.shared.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_tip = 0;
                let mut rounds = 0usize;
                while !done.load(Ordering::Acquire) || rounds == 0 {
                    rounds += 1;

                    let tip = facade.get_tip_block_number().0;
                    assert!(tip >= last_tip);
                    last_tip = tip;
                    if tip > 0 {
                        let cells =
                            facade.get_cells_by_lock_hash(lock_hash, Uint64(tip), Uint64(tip));
                        assert_eq!(cells.len(), 1, "no cellbase cell for block {}", tip);
                    }

                    let snapshot = shared.snapshot();
                    let tip_block = snapshot.chain().tip();
                    if tip_block.number() > 0 {
                        let cellbase = OutPoint::new(tip_block.transactions[0].hash(), 0);
                        assert!(snapshot.cells().get_live_cell(&cellbase).is_some());
                    }
                }
                last_tip
            })
        })
        .collect();

    node.mine(30);
    done.store(true, Ordering::Release);

    for reader in readers {
        let seen = reader.join().unwrap();
        assert!(seen <= 30);
    }
    assert_eq!(node.facade.get_tip_block_number(), Uint64(30));
}

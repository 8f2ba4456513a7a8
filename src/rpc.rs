//! Query facade
//!
//! Each query loads one snapshot and answers from it alone, so a response
//! never mixes two chain tips. Pool state comes from the pool's read view.

use crate::cell::CellProvider;
use crate::chain::BlockId;
use crate::constants::MEDIAN_TIME_BLOCK_COUNT;
use crate::error::{Error, Result};
use crate::json::*;
use crate::shared::Shared;
use crate::tx_pool::TxStage;
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Methods answered by [`QueryFacade::handle`].
pub const METHODS: &[&str] = &[
    "get_block",
    "get_block_by_number",
    "get_block_hash",
    "get_live_cell",
    "get_cells_by_lock_hash",
    "get_transactions_by_lock_hash",
    "get_current_epoch",
    "get_epoch_by_number",
    "get_tip_block_number",
    "get_tip_header",
    "get_transaction",
    "send_transaction",
    "tx_pool_info",
    "dry_run_transaction",
    "get_blockchain_info",
    "get_peers_state",
    "get_peers",
    "local_node_info",
];

#[derive(Clone)]
pub struct QueryFacade {
    shared: Shared,
}

impl QueryFacade {
    pub fn new(shared: Shared) -> Self {
        QueryFacade { shared }
    }

    pub fn get_block(&self, hash: H256) -> Option<BlockView> {
        let snapshot = self.shared.snapshot();
        let block = snapshot.chain().get_block(&BlockId::Hash(hash.0))?;
        Some(BlockView::from(block.as_ref()))
    }

    pub fn get_block_by_number(&self, number: Uint64) -> Option<BlockView> {
        let snapshot = self.shared.snapshot();
        let block = snapshot.chain().get_block(&BlockId::Number(number.0))?;
        Some(BlockView::from(block.as_ref()))
    }

    pub fn get_block_hash(&self, number: Uint64) -> Option<H256> {
        self.shared.snapshot().chain().get_block_hash(number.0).map(H256)
    }

    /// Cell status now, or right after main-chain block `block_hash`. A block
    /// off the main chain answers `unknown`.
    pub fn get_live_cell(
        &self,
        out_point: JsonOutPoint,
        block_hash: Option<H256>,
    ) -> Result<CellWithStatus> {
        let out_point = OutPoint::try_from(out_point)?;
        let snapshot = self.shared.snapshot();
        let status = match block_hash {
            Some(hash) => snapshot.cells().cell_status_at(snapshot.chain(), &out_point, &hash.0),
            None => snapshot.cells().cell(&out_point),
        };

        Ok(CellWithStatus {
            status: status.as_str().to_string(),
            cell: status.live_cell().map(|meta| JsonCellOutput::from(&meta.cell_output)),
        })
    }

    pub fn get_cells_by_lock_hash(
        &self,
        lock_hash: H256,
        from: Uint64,
        to: Uint64,
    ) -> Vec<CellOutputWithOutPoint> {
        self.shared
            .snapshot()
            .cells()
            .get_cells_by_lock_hash(&lock_hash.0, from.0, to.0)
            .iter()
            .map(CellOutputWithOutPoint::from)
            .collect()
    }

    pub fn get_transactions_by_lock_hash(
        &self,
        lock_hash: H256,
        from: Uint64,
        to: Uint64,
    ) -> Vec<CellTransaction> {
        self.shared
            .snapshot()
            .cells()
            .get_transactions_by_lock_hash(&lock_hash.0, from.0, to.0)
            .iter()
            .map(CellTransaction::from)
            .collect()
    }

    pub fn get_current_epoch(&self) -> EpochView {
        EpochView::from(self.shared.snapshot().chain().current_epoch())
    }

    pub fn get_epoch_by_number(&self, number: Uint64) -> Option<EpochView> {
        self.shared.snapshot().chain().epoch(number.0).map(EpochView::from)
    }

    pub fn get_tip_block_number(&self) -> Uint64 {
        Uint64(self.shared.snapshot().chain().tip_number())
    }

    pub fn get_tip_header(&self) -> HeaderView {
        HeaderView::from(self.shared.snapshot().chain().tip_header())
    }

    /// Pool first, then chain: an entry leaves the pool only after the
    /// snapshot committing it is published.
    pub fn get_transaction(&self, hash: H256) -> TransactionWithStatus {
        if let Some((stage, tx)) = self.shared.pool_view().get(&hash.0) {
            // An orphan sits in the pool but cannot be committed yet.
            let status = match stage {
                TxStage::Orphan | TxStage::Pending => "pending",
                TxStage::Proposed => "proposed",
            };
            return TransactionWithStatus {
                transaction: Some(TransactionView::from(tx.as_ref())),
                tx_status: TxStatus { status: status.to_string(), block_hash: None },
            };
        }

        let snapshot = self.shared.snapshot();
        match snapshot.chain().get_transaction(&hash.0) {
            Some((tx, address)) => TransactionWithStatus {
                transaction: Some(TransactionView::from(tx)),
                tx_status: TxStatus {
                    status: "committed".to_string(),
                    block_hash: Some(H256(address.block_hash)),
                },
            },
            None => TransactionWithStatus {
                transaction: None,
                tx_status: TxStatus { status: "unknown".to_string(), block_hash: None },
            },
        }
    }

    pub fn send_transaction(&self, transaction: JsonTransaction) -> Result<H256> {
        let transaction = Transaction::try_from(transaction)?;
        let hash = transaction.hash();
        self.shared.submit_transaction(transaction)?;
        Ok(H256(hash))
    }

    pub fn tx_pool_info(&self) -> TxPoolInfoView {
        TxPoolInfoView::from(&self.shared.pool_view().info())
    }

    pub fn dry_run_transaction(&self, transaction: JsonTransaction) -> Result<DryRunResult> {
        let transaction = Transaction::try_from(transaction)?;
        let cycles = self.shared.dry_run(&transaction)?;
        Ok(DryRunResult { cycles: Uint64(cycles) })
    }

    pub fn get_blockchain_info(&self) -> ChainInfo {
        let snapshot = self.shared.snapshot();
        let chain = snapshot.chain();
        ChainInfo {
            chain: self.shared.config().chain.name.clone(),
            tip_number: Uint64(chain.tip_number()),
            tip_hash: H256(chain.tip_hash()),
            epoch: Uint64(chain.current_epoch().number),
            difficulty: Uint64(chain.tip_header().difficulty),
            median_time: Uint64(chain.median_time(MEDIAN_TIME_BLOCK_COUNT)),
            is_initial_block_download: self.shared.network().is_initial_block_download(),
        }
    }

    pub fn get_peers_state(&self) -> Vec<PeerStateView> {
        self.shared.network().peers_state().iter().map(PeerStateView::from).collect()
    }

    pub fn get_peers(&self) -> Vec<NodeView> {
        self.shared.network().connected_peers().iter().map(NodeView::from).collect()
    }

    pub fn local_node_info(&self) -> NodeView {
        NodeView::from(&self.shared.network().local_node_info())
    }

    /// Dispatch a call with positional `params` to the matching method.
    pub fn handle(&self, method: &str, params: Value) -> Result<Value> {
        debug!("query {}", method);
        let mut params = Params::new(method, params)?;
        match method {
            "get_block" => to_value(self.get_block(params.next()?)),
            "get_block_by_number" => to_value(self.get_block_by_number(params.next()?)),
            "get_block_hash" => to_value(self.get_block_hash(params.next()?)),
            "get_live_cell" => {
                let out_point = params.next()?;
                to_value(self.get_live_cell(out_point, params.next_optional()?)?)
            }
            "get_cells_by_lock_hash" => {
                let (lock_hash, from, to) = (params.next()?, params.next()?, params.next()?);
                to_value(self.get_cells_by_lock_hash(lock_hash, from, to))
            }
            "get_transactions_by_lock_hash" => {
                let (lock_hash, from, to) = (params.next()?, params.next()?, params.next()?);
                to_value(self.get_transactions_by_lock_hash(lock_hash, from, to))
            }
            "get_current_epoch" => to_value(self.get_current_epoch()),
            "get_epoch_by_number" => to_value(self.get_epoch_by_number(params.next()?)),
            "get_tip_block_number" => to_value(self.get_tip_block_number()),
            "get_tip_header" => to_value(self.get_tip_header()),
            "get_transaction" => to_value(self.get_transaction(params.next()?)),
            "send_transaction" => to_value(self.send_transaction(params.next()?)?),
            "tx_pool_info" => to_value(self.tx_pool_info()),
            "dry_run_transaction" => to_value(self.dry_run_transaction(params.next()?)?),
            "get_blockchain_info" => to_value(self.get_blockchain_info()),
            "get_peers_state" => to_value(self.get_peers_state()),
            "get_peers" => to_value(self.get_peers()),
            "local_node_info" => to_value(self.local_node_info()),
            _ => Err(Error::InvalidParams(format!("unknown method {}", method))),
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| Error::InvalidParams(err.to_string()))
}

/// Positional parameters of one call.
struct Params<'a> {
    method: &'a str,
    values: std::vec::IntoIter<Value>,
}

impl<'a> Params<'a> {
    fn new(method: &'a str, params: Value) -> Result<Self> {
        let values = match params {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => {
                return Err(Error::InvalidParams(format!(
                    "{} expects positional params, got {}",
                    method, other
                )))
            }
        };
        Ok(Params { method, values: values.into_iter() })
    }

    fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self
            .values
            .next()
            .ok_or_else(|| Error::InvalidParams(format!("{}: missing param", self.method)))?;
        serde_json::from_value(value)
            .map_err(|err| Error::InvalidParams(format!("{}: {}", self.method, err)))
    }

    fn next_optional<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| Error::InvalidParams(format!("{}: {}", self.method, err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, TransactionBuilder};
    use crate::constants::ONE_CKB;
    use crate::hash::sha256;
    use crate::script::always_success_program;
    use crate::shared::SharedBuilder;
    use serde_json::json;

    fn facade() -> (QueryFacade, Hash) {
        let lock = Script::new(sha256(&always_success_program()), vec![]);
        let tx = TransactionBuilder::default()
            .output(CellOutput::new(100 * ONE_CKB, always_success_program(), lock.clone(), None))
            .output(CellOutput::new(500_000 * ONE_CKB, vec![], lock, None))
            .build();
        let tx_hash = tx.hash();
        let genesis = BlockBuilder::default().transaction(tx).build();
        let shared = SharedBuilder::default().genesis(genesis).build().unwrap();
        (QueryFacade::new(shared), tx_hash)
    }

    #[test]
    fn test_tip_queries() {
        let (facade, _) = facade();
        assert_eq!(facade.handle("get_tip_block_number", json!([])).unwrap(), json!("0"));

        let hash = facade.handle("get_block_hash", json!(["0"])).unwrap();
        let block = facade.handle("get_block", json!([hash.clone()])).unwrap();
        assert_eq!(block["header"]["number"], json!("0"));
        assert_eq!(block["header"]["hash"], hash);
        assert_eq!(facade.handle("get_block_hash", json!(["1"])).unwrap(), Value::Null);
    }

    #[test]
    fn test_live_cell_status() {
        let (facade, tx_hash) = facade();
        let out_point = json!({ "tx_hash": H256(tx_hash).to_string(), "index": "1" });
        let cell = facade.handle("get_live_cell", json!([out_point])).unwrap();
        assert_eq!(cell["status"], json!("live"));
        assert_eq!(cell["cell"]["capacity"], json!((500_000 * ONE_CKB).to_string()));

        let missing = json!({ "tx_hash": H256([7; 32]).to_string(), "index": "0" });
        let cell = facade.handle("get_live_cell", json!([missing])).unwrap();
        assert_eq!(cell["status"], json!("unknown"));
        assert_eq!(cell["cell"], Value::Null);
    }

    #[test]
    fn test_live_cell_at_unknown_block() {
        let (facade, tx_hash) = facade();
        let out_point = JsonOutPoint { tx_hash: H256(tx_hash), index: Uint64(1) };
        let cell = facade.get_live_cell(out_point, Some(H256([5; 32]))).unwrap();
        assert_eq!(cell.status, "unknown");
        assert!(cell.cell.is_none());
    }

    #[test]
    fn test_orphan_reported_as_pending() {
        let (facade, tx_hash) = facade();
        let lock = Script::new(sha256(&always_success_program()), vec![]);
        let orphan = TransactionBuilder::default()
            .dep(OutPoint::new(tx_hash, 0))
            .input(CellInput::new(OutPoint::new([9; 32], 0), 0))
            .output(CellOutput::new(100 * ONE_CKB, vec![], lock, None))
            .build();
        assert_eq!(facade.shared.submit_transaction(orphan.clone()), Ok(TxStage::Orphan));

        let result = facade.get_transaction(H256(orphan.hash()));
        assert_eq!(result.tx_status.status, "pending");
        assert!(result.tx_status.block_hash.is_none());
        assert!(result.transaction.is_some());
    }

    #[test]
    fn test_invalid_params() {
        let (facade, _) = facade();
        let invalid = |result: Result<Value>| matches!(result, Err(Error::InvalidParams(_)));
        assert!(invalid(facade.handle("get_block", json!(["0x12"]))));
        assert!(invalid(facade.handle("get_block_hash", json!([]))));
        assert!(invalid(facade.handle("get_block_hash", json!({"n": 1}))));
        assert!(invalid(facade.handle("no_such_method", json!([]))));
    }

    #[test]
    fn test_unknown_transaction() {
        let (facade, _) = facade();
        let result = facade.get_transaction(H256([3; 32]));
        assert_eq!(result.tx_status.status, "unknown");
        assert!(result.transaction.is_none());
    }

    #[test]
    fn test_every_method_dispatches() {
        let (facade, _) = facade();
        for method in [
            "get_current_epoch",
            "get_tip_header",
            "tx_pool_info",
            "get_blockchain_info",
            "get_peers",
            "get_peers_state",
            "local_node_info",
        ] {
            assert!(METHODS.contains(&method));
            assert!(facade.handle(method, Value::Null).is_ok(), "{}", method);
        }
    }
}

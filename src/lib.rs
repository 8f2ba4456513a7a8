//! # Cell-Ledger
//!
//! Ledger core of a cell-model blockchain node: the main chain index, the
//! live cell set, script cycle estimation and the staged transaction pool,
//! exposed through a query facade.
//!
//! ## Architecture
//!
//! - `chain` / `epoch`: main-chain blocks, transactions and the epoch schedule
//! - `cell_set`: live and historical cells, indexed by out-point and lock hash
//! - `script`: metered stack VM that verifies lock and type scripts
//! - `tx_pool`: `Orphan → Pending → Proposed` staging with fee-per-cycle eviction
//! - `shared`: copy-on-write snapshots of chain + cells and the write path
//! - `rpc` / `json`: read-only queries and transaction submission
//!
//! ## Usage
//!
//! ```rust
//! use cell_ledger::builder::{BlockBuilder, TransactionBuilder};
//! use cell_ledger::rpc::QueryFacade;
//! use cell_ledger::shared::SharedBuilder;
//! use cell_ledger::types::*;
//!
//! let genesis_tx = TransactionBuilder::default()
//!     .output(CellOutput::new(1_000 * cell_ledger::ONE_CKB, vec![], Script::default(), None))
//!     .build();
//! let genesis = BlockBuilder::default().transaction(genesis_tx).build();
//!
//! let shared = SharedBuilder::default().genesis(genesis).build().unwrap();
//! let facade = QueryFacade::new(shared);
//! assert_eq!(facade.get_tip_block_number().0, 0);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod hash;
pub mod config;
pub mod logger;
pub mod cell;
pub mod cell_set;
pub mod epoch;
pub mod chain;
pub mod builder;
pub mod transaction;
pub mod script;
pub mod tx_pool;
pub mod shared;
pub mod network;
pub mod json;
pub mod rpc;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{Error, Result};
pub use cell::{CellMeta, CellProvider, CellStatus};
pub use cell_set::CellSet;
pub use chain::{BlockId, ChainIndex};
pub use config::NodeConfig;
pub use script::ScriptCycleEstimator;
pub use shared::{Shared, SharedBuilder, Snapshot};
pub use tx_pool::{TxPool, TxStage};
pub use rpc::QueryFacade;

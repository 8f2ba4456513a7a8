//! Node configuration
//!
//! Every section deserializes with per-field defaults, so a config file only
//! needs the keys it overrides:
//!
//! ```toml
//! [chain]
//! name = "dev"
//!
//! [consensus.epoch]
//! genesis_length = 100
//!
//! [tx_pool]
//! max_tx_count = 500
//! eviction_tie_break = "newest_first"
//!
//! [script]
//! max_cycles = 1000000
//!
//! [logger]
//! filter = "info,tx_pool=debug"
//! ```

use crate::constants::*;
use crate::error::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain: ChainConfig,
    pub consensus: ConsensusParams,
    pub tx_pool: TxPoolConfig,
    pub script: ScriptConfig,
    pub logger: LogConfig,
}

impl NodeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: NodeConfig =
            toml::from_str(content).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let epoch = &self.consensus.epoch;
        if epoch.genesis_length == 0 || epoch.min_length == 0 {
            return Err(Error::Config("epoch length must be positive".to_string()));
        }
        if epoch.min_length > epoch.max_length {
            return Err(Error::Config(format!(
                "epoch min_length {} exceeds max_length {}",
                epoch.min_length, epoch.max_length
            )));
        }
        if epoch.duration_target == 0 {
            return Err(Error::Config("epoch duration_target must be positive".to_string()));
        }
        let window = &self.consensus.proposal_window;
        if window.closest == 0 || window.closest > window.farthest {
            return Err(Error::Config(format!(
                "invalid proposal window [{}, {}]",
                window.closest, window.farthest
            )));
        }
        if self.script.max_cycles == 0 {
            return Err(Error::Config("script max_cycles must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub name: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig { name: "ckb_dev".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    pub epoch: EpochParams,
    pub proposal_window: ProposalWindow,
    /// Blocks a cellbase output waits before it can be spent.
    pub cellbase_maturity: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            epoch: EpochParams::default(),
            proposal_window: ProposalWindow::default(),
            cellbase_maturity: DEFAULT_CELLBASE_MATURITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochParams {
    pub genesis_length: u64,
    pub min_length: u64,
    pub max_length: u64,
    /// Milliseconds.
    pub duration_target: u64,
    pub reward: u64,
}

impl Default for EpochParams {
    fn default() -> Self {
        EpochParams {
            genesis_length: DEFAULT_EPOCH_LENGTH,
            min_length: MIN_EPOCH_LENGTH,
            max_length: MAX_EPOCH_LENGTH,
            duration_target: DEFAULT_EPOCH_DURATION_TARGET,
            reward: DEFAULT_EPOCH_REWARD,
        }
    }
}

/// Blocks after the proposing block in which a proposal may be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalWindow {
    pub closest: u64,
    pub farthest: u64,
}

impl Default for ProposalWindow {
    fn default() -> Self {
        ProposalWindow {
            closest: DEFAULT_PROPOSAL_WINDOW_CLOSEST,
            farthest: DEFAULT_PROPOSAL_WINDOW_FARTHEST,
        }
    }
}

impl ProposalWindow {
    /// Range of proposing block numbers whose proposals block `number` may commit.
    pub fn proposing_range(&self, number: u64) -> Option<(u64, u64)> {
        if number < self.closest {
            return None;
        }
        let start = number.saturating_sub(self.farthest);
        let end = number - self.closest;
        Some((start, end))
    }
}

/// Order among entries with the same fee-per-cycle when evicting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionTieBreak {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPoolConfig {
    pub max_tx_count: usize,
    pub max_pool_size: usize,
    pub max_pool_cycles: u64,
    pub max_orphans: usize,
    pub max_tx_size: usize,
    /// Shannons per 1000 bytes.
    pub min_fee_rate: u64,
    pub eviction_tie_break: EvictionTieBreak,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        TxPoolConfig {
            max_tx_count: DEFAULT_MAX_TX_COUNT,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_pool_cycles: DEFAULT_MAX_POOL_CYCLES,
            max_orphans: DEFAULT_MAX_ORPHANS,
            max_tx_size: DEFAULT_MAX_TX_SIZE,
            min_fee_rate: DEFAULT_MIN_FEE_RATE,
            eviction_tie_break: EvictionTieBreak::OldestFirst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub max_cycles: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig { max_cycles: DEFAULT_MAX_TX_VERIFY_CYCLES }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG` when set.
    pub filter: String,
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { filter: "info".to_string(), color: true }
    }
}

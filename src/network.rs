//! Network collaborator seen from the node
//!
//! Peer management lives outside the ledger. The node only reads what the
//! network layer last reported through [`NetworkController`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub address: String,
    pub score: u64,
}

/// Identity a node advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub version: String,
    pub addresses: Vec<NodeAddress>,
}

/// Connected peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node: NodeInfo,
    pub is_outbound: bool,
}

/// Sync progress with a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerState {
    pub peer_id: String,
    /// Unix milliseconds.
    pub last_updated: u64,
    pub blocks_in_flight: u32,
}

pub trait NetworkController: Send + Sync {
    fn local_node_info(&self) -> NodeInfo;

    fn connected_peers(&self) -> Vec<PeerInfo>;

    fn peers_state(&self) -> Vec<PeerState>;

    fn is_initial_block_download(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub local: NodeInfo,
    pub peers: Vec<PeerInfo>,
    pub peers_state: Vec<PeerState>,
    pub initial_block_download: bool,
}

/// Network state the network layer replaces wholesale. Readers always see
/// one consistent report.
#[derive(Debug, Default)]
pub struct StaticNetwork {
    state: RwLock<NetworkState>,
}

impl StaticNetwork {
    pub fn new(local: NodeInfo) -> Self {
        StaticNetwork {
            state: RwLock::new(NetworkState { local, ..Default::default() }),
        }
    }

    pub fn replace(&self, state: NetworkState) {
        *self.state.write() = state;
    }

    pub fn state(&self) -> NetworkState {
        self.state.read().clone()
    }
}

impl NetworkController for StaticNetwork {
    fn local_node_info(&self) -> NodeInfo {
        self.state.read().local.clone()
    }

    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.state.read().peers.clone()
    }

    fn peers_state(&self) -> Vec<PeerState> {
        self.state.read().peers_state.clone()
    }

    fn is_initial_block_download(&self) -> bool {
        self.state.read().initial_block_download
    }
}

use libp2p::{Multiaddr, PeerId};

use super::KadMode;

/// Information about a running node.
#[derive(Debug, Clone)]
pub struct Info {
    pub(crate) peer_id: PeerId,
    pub(crate) listen_addrs: Vec<Multiaddr>,
    pub(crate) external_addrs: Vec<Multiaddr>,
    pub(crate) connected_peers: Vec<PeerId>,
    pub(crate) kad_mode: KadMode,
}

impl Info {
    /// This node's [PeerId]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
    /// Addresses this node is listening on, without the `/p2p/` suffix.
    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }
    /// Addresses confirmed reachable from outside.
    pub fn external_addrs(&self) -> &[Multiaddr] {
        &self.external_addrs
    }
    pub fn connected_peers(&self) -> &[PeerId] {
        &self.connected_peers
    }
    pub fn kad_mode(&self) -> KadMode {
        self.kad_mode
    }
}

#[derive(Debug, Clone)]
/// What identify learned about a remote peer.
pub struct PeerInfoUpdate {
    pub peer_id: PeerId,
    pub listen_addrs: Vec<Multiaddr>,
    pub protocols: Vec<String>,
    pub agent_version: String,
}

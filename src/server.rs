//! Answering inbound direct queries.

use std::{fmt::Debug, str::FromStr};

use libp2p::{
    kad::{self, store::MemoryStore},
    Multiaddr, PeerId,
};
use tracing::debug;

use crate::{
    common::without_peer_id,
    protocol::{Request, Response},
};

/// Direct query server that can handle incoming requests.
pub trait Server: Debug + Send {
    /// Handle an incoming request from `from`.
    ///
    /// This function runs on the node's event loop, it needs to be fast
    /// and must not block.
    fn handle_request(
        &mut self,
        routing_table: &mut RoutingTable<'_>,
        from: &PeerId,
        request: &Request,
    ) -> Response;
}

/// Read access to the local Kademlia routing table while answering a request.
pub struct RoutingTable<'a> {
    kad: &'a mut kad::Behaviour<MemoryStore>,
    local_peer_id: PeerId,
    local_addresses: &'a [Multiaddr],
}

impl<'a> RoutingTable<'a> {
    pub(crate) fn new(
        kad: &'a mut kad::Behaviour<MemoryStore>,
        local_peer_id: PeerId,
        local_addresses: &'a [Multiaddr],
    ) -> Self {
        Self {
            kad,
            local_peer_id,
            local_addresses,
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// External addresses of this node, or its listen addresses if none
    /// were confirmed.
    pub fn local_addresses(&self) -> &[Multiaddr] {
        self.local_addresses
    }

    /// Addresses known for `peer`, without their `/p2p/` suffix.
    ///
    /// Returns None if `peer` has no entry in the routing table. The local
    /// peer is answered with [Self::local_addresses].
    pub fn addresses_of(&mut self, peer: &PeerId) -> Option<Vec<Multiaddr>> {
        if peer == &self.local_peer_id {
            return Some(self.local_addresses.iter().map(without_peer_id).collect());
        }

        let bucket = self.kad.kbucket(*peer)?;

        let addresses = bucket
            .iter()
            .find(|entry| entry.node.key.preimage() == peer)
            .map(|entry| entry.node.value.iter().map(without_peer_id).collect());
        addresses
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Default implementation of [Server] trait.
///
/// Answers from the routing table only, it never starts a DHT traversal.
pub struct DefaultServer;

impl Server for DefaultServer {
    fn handle_request(
        &mut self,
        routing_table: &mut RoutingTable<'_>,
        from: &PeerId,
        request: &Request,
    ) -> Response {
        let Ok(peer) = PeerId::from_str(&request.peer) else {
            debug!(%from, peer = %request.peer, "Direct query for an invalid peer id");
            return Response::not_found(request.peer.clone());
        };

        match routing_table.addresses_of(&peer) {
            Some(addresses) => {
                debug!(%from, %peer, count = addresses.len(), "Answering direct query");
                Response::found(&peer, &addresses)
            }
            None => {
                debug!(%from, %peer, "Direct query for an unknown peer");
                Response::not_found(request.peer.clone())
            }
        }
    }
}

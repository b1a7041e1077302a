//! Peer addresses: a multiaddress that ends with the peer's identity.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

use crate::{Error, Result};

/// Returns the peer id of the trailing `/p2p/<peer id>` component, if any.
pub fn extract_peer_id(address: &Multiaddr) -> Option<PeerId> {
    match address.iter().last() {
        Some(Protocol::P2p(peer_id)) => Some(peer_id),
        _ => None,
    }
}

/// Returns `address` without its trailing `/p2p/<peer id>` component.
pub fn without_peer_id(address: &Multiaddr) -> Multiaddr {
    let mut address = address.clone();
    if let Some(Protocol::P2p(_)) = address.iter().last() {
        address.pop();
    }

    address
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A network address with an embedded peer identity, for example
/// `/ip4/127.0.0.1/tcp/64001/p2p/12D3KooW...`.
pub struct PeerAddress {
    address: Multiaddr,
    peer_id: PeerId,
}

impl PeerAddress {
    /// Appends `/p2p/<peer_id>` to `address` unless it already ends with it.
    pub fn new(address: Multiaddr, peer_id: PeerId) -> Self {
        let address = match extract_peer_id(&address) {
            Some(existing) if existing == peer_id => address,
            _ => address.with(Protocol::P2p(peer_id)),
        };

        Self { address, peer_id }
    }

    /// The identity of the peer behind this address.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The full multiaddress, including the `/p2p/` component.
    pub fn multiaddr(&self) -> &Multiaddr {
        &self.address
    }

    pub fn into_multiaddr(self) -> Multiaddr {
        self.address
    }
}

impl TryFrom<Multiaddr> for PeerAddress {
    type Error = Error;

    fn try_from(address: Multiaddr) -> Result<Self> {
        match extract_peer_id(&address) {
            Some(peer_id) => Ok(Self { address, peer_id }),
            None => Err(Error::InvalidAddress {
                address: address.to_string(),
                reason: "missing trailing /p2p/<peer id> component".to_string(),
            }),
        }
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let address = Multiaddr::from_str(s).map_err(|error| Error::InvalidAddress {
            address: s.to_string(),
            reason: error.to_string(),
        })?;

        Self::try_from(address)
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Parse a comma separated list of bootstrap addresses.
///
/// Empty segments are skipped, order and duplicates are preserved.
/// Any malformed segment fails the whole list.
pub fn parse_bootnodes(input: &str) -> Result<Vec<PeerAddress>> {
    let bootnodes = input
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(PeerAddress::from_str)
        .collect::<Result<Vec<_>>>()?;

    if bootnodes.is_empty() {
        return Err(Error::MissingArgument("bootnodes"));
    }

    Ok(bootnodes)
}

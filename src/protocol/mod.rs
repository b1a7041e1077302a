//! Direct query protocol: one request, one response, over a dedicated stream.
//!
//! Used when the DHT traversal is skipped, the requester asks a single known
//! peer what it knows about a target peer.

mod codec;

use std::fmt::{self, Display, Formatter};

use libp2p::{Multiaddr, PeerId, StreamProtocol};
use serde::{Deserialize, Serialize};

pub use codec::{decode, encode, LpCbor, MAX_MESSAGE_SIZE};

/// Stream protocol negotiated for direct queries.
pub const PROTOCOL_NAME: StreamProtocol = StreamProtocol::new("/rr/1.0.0");

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Ask a peer for the addresses it knows for `peer` (base58 string form).
pub struct Request {
    pub peer: String,
}

impl Request {
    pub fn new(peer: &PeerId) -> Self {
        Self {
            peer: peer.to_base58(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Answer to a [Request].
pub enum Response {
    Found {
        peer: String,
        addresses: Vec<String>,
    },
    NotFound {
        peer: String,
    },
}

impl Response {
    pub fn found(peer: &PeerId, addresses: &[Multiaddr]) -> Self {
        Self::Found {
            peer: peer.to_base58(),
            addresses: addresses.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn not_found(peer: impl Into<String>) -> Self {
        Self::NotFound { peer: peer.into() }
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Response::Found { peer, addresses } => {
                write!(f, "found: {peer} [{}]", addresses.join(", "))
            }
            Response::NotFound { peer } => write!(f, "not found: {peer}"),
        }
    }
}

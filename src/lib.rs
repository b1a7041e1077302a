#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod common;
mod error;
mod report;
mod testnet;

#[cfg(feature = "async")]
pub mod async_node;
pub mod node;
pub mod protocol;
pub mod query;
pub mod server;

pub use crate::common::{
    extract_peer_id, parse_bootnodes, parse_identity, PeerAddress, PeerIdentity,
};
pub use error::{Error, Result};
pub use node::{Config, Info, KadMode, Node, NodeBuilder, PeerInfoUpdate, Transports};
pub use query::{
    DhtLookup, DirectQuery, DirectQueryError, Lookup, LookupKind, LookupRequest, LookupResult,
    Phase, Query, QueryOutcome, QueryStrategy, Record,
};
pub use report::Reporter;
pub use server::{DefaultServer, Server};
pub use testnet::Testnet;

pub use libp2p::{Multiaddr, PeerId};

use std::time::Duration;

use libp2p::{identity::Keypair, kad, Multiaddr};

use crate::{common::PeerAddress, server::Server};

/// Default request-response timeout for direct queries.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default duration a connection without active streams is kept open.
pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default protocol string advertised by identify.
pub const DEFAULT_IDENTIFY_PROTOCOL: &str = "/kad-query/id/1.0.0";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
/// Kademlia participation mode.
pub enum KadMode {
    /// Query the DHT without answering DHT requests.
    #[default]
    Client,
    /// Query the DHT and answer DHT requests from other peers.
    Server,
}

impl From<KadMode> for kad::Mode {
    fn from(mode: KadMode) -> Self {
        match mode {
            KadMode::Client => kad::Mode::Client,
            KadMode::Server => kad::Mode::Server,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Enabled transports. At least one must be enabled.
pub struct Transports {
    pub tcp: bool,
    pub websocket: bool,
}

impl Default for Transports {
    fn default() -> Self {
        Self {
            tcp: true,
            websocket: true,
        }
    }
}

#[derive(Debug)]
/// Node Configurations
pub struct Config {
    /// Bootstrap nodes, seeded into the Kademlia routing table.
    ///
    /// Defaults to none.
    pub bootstrap: Vec<PeerAddress>,
    /// Dial every bootstrap node while the node starts.
    ///
    /// Defaults to `true`.
    pub dial_bootstrap: bool,
    /// Addresses to listen on.
    ///
    /// Defaults to none, the node only dials out.
    pub listen: Vec<Multiaddr>,
    /// Defaults to [KadMode::Client]
    pub kad_mode: KadMode,
    /// Defaults to [Transports::default], both enabled.
    pub transports: Transports,
    /// Node identity.
    ///
    /// Defaults to None, where a fresh ed25519 keypair is generated.
    pub identity: Option<Keypair>,
    /// Direct query request timeout, enforced by the transport layer
    /// independently of any deadline passed to a query.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Defaults to [DEFAULT_IDLE_CONNECTION_TIMEOUT]
    pub idle_connection_timeout: Duration,
    /// Defaults to [DEFAULT_IDENTIFY_PROTOCOL]
    pub identify_protocol: String,
    /// Server to answer incoming direct queries.
    ///
    /// Defaults to None, where inbound direct queries aren't accepted.
    pub server: Option<Box<dyn Server>>,
    /// Publish a peer record into the DHT for every Kademlia capable
    /// peer identify reports.
    ///
    /// Defaults to `false`.
    pub publish_peer_records: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            dial_bootstrap: true,
            listen: Vec::new(),
            kad_mode: KadMode::default(),
            transports: Transports::default(),
            identity: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_connection_timeout: DEFAULT_IDLE_CONNECTION_TIMEOUT,
            identify_protocol: DEFAULT_IDENTIFY_PROTOCOL.to_string(),
            server: None,
            publish_peer_records: false,
        }
    }
}

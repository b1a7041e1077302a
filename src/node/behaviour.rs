//! Swarm construction: transports, protocols and the composed behaviour.

use std::time::Duration;

use libp2p::{
    core::{muxing::StreamMuxerBox, transport::Boxed, upgrade::Version},
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    noise,
    request_response::{self, ProtocolSupport},
    swarm::{self, NetworkBehaviour},
    tcp, websocket, yamux, PeerId, Swarm, Transport,
};
use tracing::debug;

use crate::{
    protocol::{LpCbor, Request, Response, PROTOCOL_NAME},
    Error, Result,
};

use super::config::{Config, Transports};

pub(crate) type DirectQueryBehaviour = request_response::Behaviour<LpCbor<Request, Response>>;

#[derive(NetworkBehaviour)]
pub(crate) struct Behaviour {
    pub(crate) identify: identify::Behaviour,
    pub(crate) kad: kad::Behaviour<MemoryStore>,
    pub(crate) rr: DirectQueryBehaviour,
}

impl Behaviour {
    fn new(keypair: &Keypair, config: &Config) -> Self {
        let local_peer_id = keypair.public().to_peer_id();

        let identify = identify::Behaviour::new(identify::Config::new(
            config.identify_protocol.clone(),
            keypair.public(),
        ));

        let mut kad = kad::Behaviour::new(local_peer_id, MemoryStore::new(local_peer_id));
        kad.set_mode(Some(config.kad_mode.into()));

        for bootnode in &config.bootstrap {
            debug!(%bootnode, "Adding bootstrap node to the routing table");
            kad.add_address(bootnode.peer_id(), bootnode.multiaddr().clone());
        }

        let support = if config.server.is_some() {
            ProtocolSupport::Full
        } else {
            ProtocolSupport::Outbound
        };

        let rr = request_response::Behaviour::new(
            [(PROTOCOL_NAME, support)],
            request_response::Config::default().with_request_timeout(config.request_timeout),
        );

        Self { identify, kad, rr }
    }
}

pub(crate) fn build_swarm(keypair: &Keypair, config: &Config) -> Result<Swarm<Behaviour>> {
    let transport = transport(keypair, &config.transports, config.request_timeout)?;
    let behaviour = Behaviour::new(keypair, config);

    Ok(Swarm::new(
        transport,
        behaviour,
        keypair.public().to_peer_id(),
        swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(config.idle_connection_timeout),
    ))
}

/// Dialing, security and multiplexing together must finish within `timeout`.
fn transport(
    keypair: &Keypair,
    transports: &Transports,
    timeout: Duration,
) -> Result<Boxed<(PeerId, StreamMuxerBox)>> {
    let noise = noise::Config::new(keypair)
        .map_err(|error| Error::Bootstrap(format!("noise handshake setup failed: {error}")))?;
    let tcp_config = tcp::Config::default();

    let transport = match (transports.tcp, transports.websocket) {
        (true, true) => websocket::WsConfig::new(tcp::tokio::Transport::new(tcp_config.clone()))
            .or_transport(tcp::tokio::Transport::new(tcp_config))
            .upgrade(Version::V1Lazy)
            .authenticate(noise)
            .multiplex(yamux::Config::default())
            .timeout(timeout)
            .boxed(),
        (true, false) => tcp::tokio::Transport::new(tcp_config)
            .upgrade(Version::V1Lazy)
            .authenticate(noise)
            .multiplex(yamux::Config::default())
            .timeout(timeout)
            .boxed(),
        (false, true) => websocket::WsConfig::new(tcp::tokio::Transport::new(tcp_config))
            .upgrade(Version::V1Lazy)
            .authenticate(noise)
            .multiplex(yamux::Config::default())
            .timeout(timeout)
            .boxed(),
        (false, false) => return Err(Error::Bootstrap("no transport enabled".to_string())),
    };

    Ok(transport)
}

use std::time::Duration;

use libp2p::Multiaddr;
use tracing::debug;

use crate::{
    common::PeerAddress,
    node::{Node, Transports},
    server::DefaultServer,
    Error, Result,
};

/// How long each node gets to connect to the first one.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
/// Create a testnet of server mode nodes on localhost to run tests against.
///
/// Every node answers direct queries and is bootstrapped from the first one.
pub struct Testnet {
    /// Address of the first node, usable as a bootstrap list.
    pub bootstrap: Vec<PeerAddress>,
    pub nodes: Vec<Node>,
}

impl Testnet {
    pub fn new(count: usize) -> Result<Testnet> {
        let mut nodes: Vec<Node> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let node = Node::builder()
                .server_mode()
                .transports(Transports {
                    tcp: true,
                    websocket: false,
                })
                .listen_on(localhost())
                .bootstrap(&bootstrap)
                .server(Box::new(DefaultServer))
                .build()?;

            if i == 0 {
                let info = node.info()?;
                let address = info.listen_addrs().first().cloned().ok_or_else(|| {
                    Error::Bootstrap("testnet node has no listen address".to_string())
                })?;

                bootstrap.push(PeerAddress::new(address, *info.peer_id()));
            } else if !node.bootstrapped(BOOTSTRAP_TIMEOUT)? {
                return Err(Error::Bootstrap(format!(
                    "testnet node {i} could not connect to {}",
                    bootstrap[0]
                )));
            }

            nodes.push(node);
        }

        debug!(count, "Testnet ready");

        Ok(Self { bootstrap, nodes })
    }
}

fn localhost() -> Multiaddr {
    Multiaddr::empty()
        .with(std::net::Ipv4Addr::LOCALHOST.into())
        .with(libp2p::multiaddr::Protocol::Tcp(0))
}

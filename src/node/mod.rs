//! Node handle and its actor thread.

mod actor;
mod behaviour;
mod config;
mod info;

use std::{thread, time::Duration};

use flume::{Receiver, RecvTimeoutError, Sender};
use libp2p::{identity::Keypair, kad::RecordKey, Multiaddr, PeerId};
use tokio_util::sync::CancellationToken;

use crate::{
    common::PeerAddress,
    protocol::{Request, Response},
    query::{peer_record, Lookup, LookupRequest},
    server::Server,
    Error, Result,
};

pub(crate) use actor::{ActorMessage, DirectQueryMessage};

pub use config::{
    Config, KadMode, Transports, DEFAULT_IDENTIFY_PROTOCOL, DEFAULT_IDLE_CONNECTION_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use info::{Info, PeerInfoUpdate};

#[derive(Debug, Clone)]
/// Handle to a libp2p node running on its own thread.
///
/// The node shuts down when [Node::shutdown] is called or when the last
/// handle is dropped.
pub struct Node(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default)]
/// A builder for [Node].
pub struct NodeBuilder(Config);

impl NodeBuilder {
    /// Set bootstrap nodes.
    pub fn bootstrap(mut self, bootstrap: &[PeerAddress]) -> Self {
        self.0.bootstrap = bootstrap.to_vec();

        self
    }

    /// Whether to dial the bootstrap nodes while starting.
    pub fn dial_bootstrap(mut self, dial: bool) -> Self {
        self.0.dial_bootstrap = dial;

        self
    }

    /// Add an address to listen on.
    pub fn listen_on(mut self, address: Multiaddr) -> Self {
        self.0.listen.push(address);

        self
    }

    /// Add addresses to listen on.
    pub fn listen(mut self, addresses: &[Multiaddr]) -> Self {
        self.0.listen.extend_from_slice(addresses);

        self
    }

    pub fn kad_mode(mut self, mode: KadMode) -> Self {
        self.0.kad_mode = mode;

        self
    }

    /// Answer DHT requests from other peers.
    pub fn server_mode(self) -> Self {
        self.kad_mode(KadMode::Server)
    }

    pub fn transports(mut self, transports: Transports) -> Self {
        self.0.transports = transports;

        self
    }

    /// Use a fixed identity instead of a fresh one.
    pub fn identity(mut self, keypair: Keypair) -> Self {
        self.0.identity = Some(keypair);

        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.0.request_timeout = timeout;

        self
    }

    pub fn idle_connection_timeout(mut self, timeout: Duration) -> Self {
        self.0.idle_connection_timeout = timeout;

        self
    }

    pub fn identify_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.0.identify_protocol = protocol.into();

        self
    }

    /// Answer inbound direct queries with `server`.
    pub fn server(mut self, server: Box<dyn Server>) -> Self {
        self.0.server = Some(server);

        self
    }

    /// Publish a peer record for every Kademlia capable peer identified.
    pub fn publish_peer_records(mut self, publish: bool) -> Self {
        self.0.publish_peer_records = publish;

        self
    }

    /// Create a Node with the current configuration.
    pub fn build(self) -> Result<Node> {
        Node::new(self.0)
    }
}

impl Node {
    /// Returns a builder to edit settings before creating a Node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Create a client node bootstrapped from `bootstrap`.
    pub fn client(bootstrap: &[PeerAddress]) -> Result<Self> {
        Node::builder().bootstrap(bootstrap).build()
    }

    /// Create a new node, blocking until it listens on every configured address.
    pub fn new(config: Config) -> Result<Self> {
        let (sender, receiver) = flume::unbounded();
        let (ready_sender, ready_receiver) = flume::bounded::<Result<()>>(1);

        thread::Builder::new()
            .name("kad-query".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = ready_sender.send(Err(error.into()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    match actor::Actor::new(config, receiver) {
                        Ok(actor) => actor.run(ready_sender).await,
                        Err(error) => {
                            let _ = ready_sender.send(Err(error));
                        }
                    }
                });
            })?;

        ready_receiver
            .recv()
            .map_err(|_| Error::NodeWasShutdown)??;

        Ok(Node(sender))
    }

    // === Getters ===

    /// Information about this node.
    pub fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)
    }

    /// Wait up to `timeout` until this node has at least one connection.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn bootstrapped(&self, timeout: Duration) -> Result<bool> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.send(ActorMessage::Bootstrapped(sender))?;

        match receiver.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(Error::NodeWasShutdown),
        }
    }

    /// Receive what identify learns about every peer from now on.
    pub fn subscribe_peer_info(&self) -> Result<Receiver<PeerInfoUpdate>> {
        let (sender, receiver) = flume::unbounded();

        self.send(ActorMessage::SubscribePeerInfo(sender))?;

        Ok(receiver)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop, waiting until every connection is closed.
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Start a DHT lookup, returning its lazy sequence of records.
    pub fn lookup(&self, request: LookupRequest) -> Result<Lookup> {
        // Unbounded so the actor never blocks on a slow consumer.
        let (sender, receiver) = flume::unbounded();
        let token = CancellationToken::new();

        self.send(ActorMessage::Lookup(request, sender, token.clone()))?;

        Ok(Lookup::new(receiver, token, self.clone()))
    }

    /// Send `request` to the peer at `address` and wait for its response.
    ///
    /// Fails with [Error::DirectQuery] if nothing was received, including
    /// when `deadline` elapsed.
    pub fn direct_query(
        &self,
        address: &PeerAddress,
        request: Request,
        deadline: Option<Duration>,
    ) -> Result<Response> {
        let (sender, receiver) = flume::bounded(1);
        let token = CancellationToken::new();
        let _cancel_on_return = token.clone().drop_guard();

        self.send(ActorMessage::DirectQuery(DirectQueryMessage {
            address: address.clone(),
            request,
            deadline,
            sender,
            token,
        }))?;

        receiver
            .recv()
            .map_err(|_| Error::NodeWasShutdown)?
            .map_err(Error::from)
    }

    /// Publish a peer record advertising `addresses` for `peer`.
    ///
    /// Blocks until at least one remote peer stored it.
    pub fn put_peer_record(&self, peer: &PeerId, addresses: &[Multiaddr]) -> Result<()> {
        let record = peer_record(peer, addresses)?;
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::Put(record, sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)?
    }

    /// Announce this node as a provider of `key`.
    pub fn start_providing(&self, key: RecordKey) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::StartProviding(key, sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)?
    }

    // === Private Methods ===

    fn send(&self, message: ActorMessage) -> Result<()> {
        self.0.send(message).map_err(|_| Error::NodeWasShutdown)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn local_node() -> Node {
        Node::builder()
            .listen_on("/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .transports(Transports {
                tcp: true,
                websocket: false,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn info_reports_listen_addresses() {
        let node = local_node();

        let info = node.info().unwrap();

        assert!(!info.listen_addrs().is_empty());
        assert_eq!(info.kad_mode(), KadMode::Client);
        assert!(info.connected_peers().is_empty());
    }

    #[test]
    fn shutdown() {
        let node = local_node();
        let clone = node.clone();

        node.shutdown();

        assert!(matches!(clone.info(), Err(Error::NodeWasShutdown)));
    }

    #[test]
    fn not_bootstrapped_without_peers() {
        let node = local_node();

        assert!(!node.bootstrapped(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn invalid_listen_address_fails_startup() {
        let result = Node::builder()
            .listen_on("/ip4/127.0.0.1/udp/0/quic-v1".parse().unwrap())
            .build();

        assert!(matches!(result, Err(Error::Bootstrap(_))));
    }

    #[test]
    fn no_transport_fails_startup() {
        let result = Node::builder()
            .transports(Transports {
                tcp: false,
                websocket: false,
            })
            .build();

        assert!(matches!(result, Err(Error::Bootstrap(_))));
    }
}

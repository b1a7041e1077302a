//! AsyncNode handle.

use std::time::Duration;

use libp2p::{kad::RecordKey, Multiaddr, PeerId};
use tokio_util::sync::CancellationToken;

use crate::{
    common::PeerAddress,
    node::{ActorMessage, DirectQueryMessage, Info, Node},
    protocol::{Request, Response},
    query::{peer_record, Lookup, LookupRequest},
    Error, Result,
};

impl Node {
    /// Return an async version of the Node handle.
    pub fn as_async(self) -> AsyncNode {
        AsyncNode(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the [Node] handle.
pub struct AsyncNode(Node);

impl AsyncNode {
    // === Getters ===

    /// Information about this node.
    pub async fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv_async().await.map_err(|_| Error::NodeWasShutdown)
    }

    /// Wait until this node has at least one connection.
    pub async fn bootstrapped(&self) -> Result<()> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.send(ActorMessage::Bootstrapped(sender))?;

        receiver.recv_async().await.map_err(|_| Error::NodeWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Start a DHT lookup, consume it with [Lookup::next_async].
    pub fn lookup(&self, request: LookupRequest) -> Result<Lookup> {
        self.0.lookup(request)
    }

    /// Async version of [Node::direct_query].
    pub async fn direct_query(
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
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
            .map_err(Error::from)
    }

    /// Async version of [Node::put_peer_record].
    pub async fn put_peer_record(&self, peer: &PeerId, addresses: &[Multiaddr]) -> Result<()> {
        let record = peer_record(peer, addresses)?;
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::Put(record, sender))?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
    }

    /// Async version of [Node::start_providing].
    pub async fn start_providing(&self, key: RecordKey) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::StartProviding(key, sender))?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
    }

    /// Returns the blocking handle.
    pub fn as_blocking(&self) -> &Node {
        &self.0
    }

    fn send(&self, message: ActorMessage) -> Result<()> {
        self.0 .0.send(message).map_err(|_| Error::NodeWasShutdown)
    }
}

#[cfg(test)]
mod test {
    use crate::{common::PeerIdentity, node::Transports, LookupKind, Testnet};

    use super::*;

    #[test]
    fn shutdown() {
        async fn test() {
            let node = Node::builder()
                .transports(Transports {
                    tcp: true,
                    websocket: false,
                })
                .build()
                .unwrap()
                .as_async();
            let clone = node.clone();

            node.shutdown().await;

            assert!(matches!(clone.info().await, Err(Error::NodeWasShutdown)));
        }
        futures::executor::block_on(test());
    }

    #[test]
    fn lookup_unknown_provider_is_empty() {
        async fn test() {
            let testnet = Testnet::new(3).unwrap();

            let client = Node::client(&testnet.bootstrap).unwrap().as_async();
            client.bootstrapped().await.unwrap();

            let target = PeerIdentity::from(PeerId::random());
            let lookup = client
                .lookup(
                    LookupRequest::new(target.record_key())
                        .with_kind(LookupKind::Providers)
                        .with_deadline(Duration::from_secs(5)),
                )
                .unwrap();

            let result = lookup.into_result_async().await.unwrap();

            assert!(result.records.is_empty());
        }
        futures::executor::block_on(test());
    }

    #[test]
    fn direct_query_to_testnet_node() {
        async fn test() {
            let testnet = Testnet::new(2).unwrap();

            let client = Node::client(&testnet.bootstrap).unwrap().as_async();
            let bootnode = &testnet.bootstrap[0];

            let response = client
                .direct_query(
                    bootnode,
                    Request::new(bootnode.peer_id()),
                    Some(Duration::from_secs(5)),
                )
                .await
                .unwrap();

            assert!(matches!(response, Response::Found { .. }));
        }
        futures::executor::block_on(test());
    }
}

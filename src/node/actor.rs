//! The event loop that owns a node's swarm.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use flume::{Receiver, Sender};
use futures::StreamExt;
use libp2p::{
    core::transport::ListenerId,
    identify,
    identity::Keypair,
    kad::{
        self, GetProvidersOk, GetRecordError, GetRecordOk, QueryId, QueryResult, Quorum,
        RecordKey,
    },
    request_response::{self, OutboundRequestId, ResponseChannel},
    swarm::{dial_opts::DialOpts, ConnectionId, DialError, SwarmEvent},
    Multiaddr, PeerId, Swarm,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    common::PeerAddress,
    protocol::{Request, Response},
    query::{peer_record, DirectQueryError, LookupEvent, LookupKind, LookupRequest, Phase, Record},
    server::{RoutingTable, Server},
    Error, Result,
};

use super::{
    behaviour::{build_swarm, Behaviour, BehaviourEvent},
    Config, Info, KadMode, PeerInfoUpdate,
};

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    Bootstrapped(Sender<()>),
    Lookup(LookupRequest, Sender<LookupEvent>, CancellationToken),
    DirectQuery(DirectQueryMessage),
    Put(kad::Record, Sender<Result<()>>),
    StartProviding(RecordKey, Sender<Result<()>>),
    SubscribePeerInfo(Sender<PeerInfoUpdate>),
    Shutdown(Sender<()>),
}

#[derive(Debug)]
pub(crate) struct DirectQueryMessage {
    pub(crate) address: PeerAddress,
    pub(crate) request: Request,
    pub(crate) deadline: Option<Duration>,
    pub(crate) sender: Sender<std::result::Result<Response, DirectQueryError>>,
    pub(crate) token: CancellationToken,
}

#[derive(Debug)]
struct PendingLookup {
    sender: Sender<LookupEvent>,
    token: CancellationToken,
}

#[derive(Debug)]
struct PendingDirect {
    ticket: u64,
    address: PeerAddress,
    request: Request,
    sender: Sender<std::result::Result<Response, DirectQueryError>>,
}

#[derive(Debug, Clone, Copy)]
enum Watched {
    Lookup(QueryId),
    Direct(u64),
}

#[derive(Debug)]
struct Expired {
    watched: Watched,
    timed_out: bool,
}

pub(crate) struct Actor {
    swarm: Swarm<Behaviour>,
    receiver: Receiver<ActorMessage>,
    kad_mode: KadMode,
    server: Option<Box<dyn Server>>,
    publish_peer_records: bool,

    ready: Option<Sender<Result<()>>>,
    pending_listeners: HashSet<ListenerId>,
    bootstrap_dials: HashMap<ConnectionId, Multiaddr>,
    bootstrapped_senders: Vec<Sender<()>>,
    peer_info_senders: Vec<Sender<PeerInfoUpdate>>,

    lookups: HashMap<QueryId, PendingLookup>,
    publishes: HashMap<QueryId, Sender<Result<()>>>,

    next_ticket: u64,
    /// Direct queries waiting for a connection to their peer.
    dialing: HashMap<PeerId, Vec<PendingDirect>>,
    inflight: HashMap<OutboundRequestId, PendingDirect>,

    expired_sender: Sender<Expired>,
    expired_receiver: Receiver<Expired>,
}

impl Actor {
    /// Build the swarm, start listening and dial the bootstrap nodes.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn new(config: Config, receiver: Receiver<ActorMessage>) -> Result<Self> {
        let keypair = config
            .identity
            .clone()
            .unwrap_or_else(Keypair::generate_ed25519);

        let mut swarm = build_swarm(&keypair, &config)?;

        info!(peer_id = %swarm.local_peer_id(), mode = ?config.kad_mode, "Node created");

        let mut pending_listeners = HashSet::new();
        for address in &config.listen {
            let listener_id = swarm.listen_on(address.clone()).map_err(|error| {
                Error::Bootstrap(format!("failed to listen on {address}: {error}"))
            })?;

            pending_listeners.insert(listener_id);
        }

        let mut bootstrap_dials = HashMap::new();
        if config.dial_bootstrap {
            for bootnode in &config.bootstrap {
                let opts = DialOpts::from(bootnode.multiaddr().clone());
                let connection_id = opts.connection_id();

                info!(address = %bootnode, "Dialing bootstrap node");

                // A failed dial is logged and never aborts startup.
                match swarm.dial(opts) {
                    Ok(()) => {
                        bootstrap_dials.insert(connection_id, bootnode.multiaddr().clone());
                    }
                    Err(error) => warn!(address = %bootnode, %error, "Failed to dial bootstrap node"),
                }
            }
        }

        if !config.bootstrap.is_empty() {
            if let Err(error) = swarm.behaviour_mut().kad.bootstrap() {
                warn!(%error, "Could not start Kademlia bootstrap");
            }
        }

        let (expired_sender, expired_receiver) = flume::unbounded();

        Ok(Self {
            swarm,
            receiver,
            kad_mode: config.kad_mode,
            server: config.server,
            publish_peer_records: config.publish_peer_records,

            ready: None,
            pending_listeners,
            bootstrap_dials,
            bootstrapped_senders: Vec::new(),
            peer_info_senders: Vec::new(),

            lookups: HashMap::new(),
            publishes: HashMap::new(),

            next_ticket: 0,
            dialing: HashMap::new(),
            inflight: HashMap::new(),

            expired_sender,
            expired_receiver,
        })
    }

    /// Run until shutdown or until every [crate::Node] handle is dropped.
    ///
    /// `ready` is answered once every listener reported an address.
    pub(crate) async fn run(mut self, ready: Sender<Result<()>>) {
        if self.pending_listeners.is_empty() {
            let _ = ready.send(Ok(()));
        } else {
            self.ready = Some(ready);
        }

        let shutdown = loop {
            tokio::select! {
                message = self.receiver.recv_async() => match message {
                    Ok(ActorMessage::Shutdown(sender)) => break Some(sender),
                    Ok(message) => self.on_message(message),
                    Err(_) => {
                        debug!("Node handles were dropped, shutting down the actor");
                        break None;
                    }
                },
                event = self.swarm.select_next_some() => self.on_swarm_event(event),
                Ok(expired) = self.expired_receiver.recv_async() => self.on_expired(expired),
            }
        };

        // Close every connection before confirming the shutdown.
        drop(self);

        info!("Node shut down");

        if let Some(sender) = shutdown {
            let _ = sender.send(());
        }
    }

    // === Messages ===

    fn on_message(&mut self, message: ActorMessage) {
        match message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.info());
            }
            ActorMessage::Bootstrapped(sender) => {
                if self.swarm.connected_peers().next().is_some() {
                    let _ = sender.send(());
                } else {
                    // Callers that gave up waiting dropped their receiver.
                    self.bootstrapped_senders
                        .retain(|sender| !sender.is_disconnected());
                    self.bootstrapped_senders.push(sender);
                }
            }
            ActorMessage::Lookup(request, sender, token) => self.start_lookup(request, sender, token),
            ActorMessage::DirectQuery(message) => self.start_direct_query(message),
            ActorMessage::Put(record, sender) => {
                match self.swarm.behaviour_mut().kad.put_record(record, Quorum::One) {
                    Ok(query_id) => {
                        self.publishes.insert(query_id, sender);
                    }
                    Err(error) => {
                        let _ = sender.send(Err(Error::Publish(error.to_string())));
                    }
                }
            }
            ActorMessage::StartProviding(key, sender) => {
                match self.swarm.behaviour_mut().kad.start_providing(key) {
                    Ok(query_id) => {
                        self.publishes.insert(query_id, sender);
                    }
                    Err(error) => {
                        let _ = sender.send(Err(Error::Publish(error.to_string())));
                    }
                }
            }
            ActorMessage::SubscribePeerInfo(sender) => self.peer_info_senders.push(sender),
            // Handled by the run loop.
            ActorMessage::Shutdown(_) => {}
        }
    }

    fn info(&self) -> Info {
        Info {
            peer_id: *self.swarm.local_peer_id(),
            listen_addrs: self.swarm.listeners().cloned().collect(),
            external_addrs: self.swarm.external_addresses().cloned().collect(),
            connected_peers: self.swarm.connected_peers().copied().collect(),
            kad_mode: self.kad_mode,
        }
    }

    fn local_addresses(&self) -> Vec<Multiaddr> {
        let external: Vec<Multiaddr> = self.swarm.external_addresses().cloned().collect();

        if external.is_empty() {
            self.swarm.listeners().cloned().collect()
        } else {
            external
        }
    }

    // === Deadlines ===

    /// Report `watched` as expired once `deadline` elapses or `token` is cancelled.
    fn watch(&self, watched: Watched, deadline: Option<Duration>, token: CancellationToken) {
        let sender = self.expired_sender.clone();

        tokio::spawn(async move {
            let timed_out = match deadline {
                Some(deadline) => tokio::select! {
                    _ = tokio::time::sleep(deadline) => true,
                    _ = token.cancelled() => false,
                },
                None => {
                    token.cancelled().await;
                    false
                }
            };

            let _ = sender.send(Expired { watched, timed_out });
        });
    }

    fn on_expired(&mut self, Expired { watched, timed_out }: Expired) {
        match watched {
            Watched::Lookup(query_id) => {
                let Some(lookup) = self.lookups.remove(&query_id) else {
                    return;
                };

                if let Some(mut query) = self.swarm.behaviour_mut().kad.query_mut(&query_id) {
                    query.finish();
                }

                if timed_out {
                    debug!(?query_id, "Lookup deadline elapsed");
                } else {
                    debug!(?query_id, "Lookup cancelled");
                }

                let _ = lookup.sender.send(LookupEvent::Finished { timed_out });
            }
            Watched::Direct(ticket) => {
                let Some((pending, phase)) = self.take_direct(ticket) else {
                    return;
                };

                if timed_out {
                    warn!(address = %pending.address, %phase, "Direct query deadline elapsed");

                    let _ = pending.sender.send(Err(DirectQueryError::timed_out(
                        pending.address.into_multiaddr(),
                        phase,
                    )));
                }
            }
        }
    }

    // === Lookups ===

    fn start_lookup(
        &mut self,
        request: LookupRequest,
        sender: Sender<LookupEvent>,
        token: CancellationToken,
    ) {
        let kad = &mut self.swarm.behaviour_mut().kad;

        let query_id = match request.kind {
            LookupKind::Record => kad.get_record(request.key),
            LookupKind::Providers => kad.get_providers(request.key),
        };

        debug!(?query_id, kind = ?request.kind, "Lookup started");

        self.watch(Watched::Lookup(query_id), request.deadline, token.clone());
        self.lookups.insert(query_id, PendingLookup { sender, token });
    }

    fn finish_lookup(&mut self, query_id: QueryId, timed_out: bool) {
        if let Some(lookup) = self.lookups.remove(&query_id) {
            lookup.token.cancel();
            let _ = lookup.sender.send(LookupEvent::Finished { timed_out });
        }
    }

    fn on_get_record(
        &mut self,
        query_id: QueryId,
        result: std::result::Result<GetRecordOk, GetRecordError>,
        last: bool,
    ) {
        let Some(lookup) = self.lookups.get(&query_id) else {
            return;
        };

        match result {
            Ok(GetRecordOk::FoundRecord(peer_record)) => {
                trace!(?query_id, from = ?peer_record.peer, "Found record");

                let _ = lookup
                    .sender
                    .send(LookupEvent::Record(Record::from(peer_record.record)));
            }
            Ok(GetRecordOk::FinishedWithNoAdditionalRecord { .. }) => {}
            Err(GetRecordError::NotFound { .. }) => {
                debug!(?query_id, "No record found");
            }
            Err(GetRecordError::Timeout { .. }) => {
                debug!(?query_id, "Record lookup timed out");
                return self.finish_lookup(query_id, true);
            }
            Err(error) => warn!(?query_id, %error, "Record lookup failed"),
        }

        if last {
            self.finish_lookup(query_id, false);
        }
    }

    fn on_get_providers(
        &mut self,
        query_id: QueryId,
        result: std::result::Result<GetProvidersOk, kad::GetProvidersError>,
        last: bool,
    ) {
        let Some(lookup) = self.lookups.get(&query_id) else {
            return;
        };

        match result {
            Ok(GetProvidersOk::FoundProviders { providers, .. }) => {
                for provider in providers {
                    let _ = lookup.sender.send(LookupEvent::Record(Record::Provider { provider }));
                }
            }
            Ok(GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => {}
            Err(error) => {
                debug!(?query_id, %error, "Providers lookup timed out");
                return self.finish_lookup(query_id, true);
            }
        }

        if last {
            self.finish_lookup(query_id, false);
        }
    }

    fn on_published(&mut self, query_id: QueryId, result: Result<()>) {
        match self.publishes.remove(&query_id) {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => match result {
                Ok(()) => debug!(?query_id, "Published peer record"),
                Err(error) => debug!(?query_id, %error, "Failed to publish peer record"),
            },
        }
    }

    fn publish_peer_record(&mut self, peer_id: &PeerId, addresses: &[Multiaddr]) {
        let record = match peer_record(peer_id, addresses) {
            Ok(record) => record,
            Err(error) => {
                warn!(%peer_id, %error, "Failed to encode peer record");
                return;
            }
        };

        match self.swarm.behaviour_mut().kad.put_record(record, Quorum::One) {
            Ok(query_id) => debug!(%peer_id, ?query_id, "Publishing peer record"),
            Err(error) => warn!(%peer_id, %error, "Failed to store peer record"),
        }
    }

    // === Direct queries ===

    fn start_direct_query(&mut self, message: DirectQueryMessage) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        self.watch(Watched::Direct(ticket), message.deadline, message.token);

        let pending = PendingDirect {
            ticket,
            address: message.address,
            request: message.request,
            sender: message.sender,
        };
        let peer_id = *pending.address.peer_id();

        if self.swarm.is_connected(&peer_id) {
            debug!(%peer_id, "Reusing connection for direct query");
            return self.send_direct(pending);
        }

        let opts = DialOpts::peer_id(peer_id)
            .addresses(vec![pending.address.multiaddr().clone()])
            .build();

        match self.swarm.dial(opts) {
            Ok(()) => {
                debug!(address = %pending.address, "Dialing for direct query");
                self.dialing.entry(peer_id).or_default().push(pending);
            }
            // Another dial to this peer is in progress, wait for it.
            Err(DialError::DialPeerConditionFalse(_)) => {
                self.dialing.entry(peer_id).or_default().push(pending);
            }
            Err(error) => {
                warn!(address = %pending.address, %error, "Direct query dial failed");

                let _ = pending.sender.send(Err(DirectQueryError::failed(
                    pending.address.into_multiaddr(),
                    Phase::Dial,
                    error,
                )));
            }
        }
    }

    fn send_direct(&mut self, pending: PendingDirect) {
        let request_id = self
            .swarm
            .behaviour_mut()
            .rr
            .send_request(pending.address.peer_id(), pending.request.clone());

        trace!(?request_id, address = %pending.address, "Direct query request sent");

        self.inflight.insert(request_id, pending);
    }

    /// Remove a pending direct query, returning the phase it was in.
    fn take_direct(&mut self, ticket: u64) -> Option<(PendingDirect, Phase)> {
        let request_id = self
            .inflight
            .iter()
            .find(|(_, pending)| pending.ticket == ticket)
            .map(|(request_id, _)| *request_id);

        if let Some(request_id) = request_id {
            return self
                .inflight
                .remove(&request_id)
                .map(|pending| (pending, Phase::Exchange));
        }

        let mut taken = None;
        for pending in self.dialing.values_mut() {
            if let Some(index) = pending.iter().position(|p| p.ticket == ticket) {
                taken = Some((pending.swap_remove(index), Phase::Dial));
                break;
            }
        }
        self.dialing.retain(|_, pending| !pending.is_empty());

        taken
    }

    fn answer_direct_query(
        &mut self,
        peer: PeerId,
        request: Request,
        channel: ResponseChannel<Response>,
    ) {
        let local_peer_id = *self.swarm.local_peer_id();
        let local_addresses = self.local_addresses();

        let Some(server) = self.server.as_mut() else {
            debug!(%peer, "No server configured, ignoring direct query");
            return;
        };

        let mut routing_table = RoutingTable::new(
            &mut self.swarm.behaviour_mut().kad,
            local_peer_id,
            &local_addresses,
        );
        let response = server.handle_request(&mut routing_table, &peer, &request);

        if self
            .swarm
            .behaviour_mut()
            .rr
            .send_response(channel, response)
            .is_err()
        {
            debug!(%peer, "Requester went away before the response was sent");
        }
    }

    // === Swarm events ===

    fn on_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(BehaviourEvent::Identify(event)) => self.on_identify_event(event),
            SwarmEvent::Behaviour(BehaviourEvent::Kad(event)) => self.on_kad_event(event),
            SwarmEvent::Behaviour(BehaviourEvent::Rr(event)) => self.on_direct_query_event(event),
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                info!(%address, "Listening");

                self.pending_listeners.remove(&listener_id);
                if self.pending_listeners.is_empty() {
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                }
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                warn!(?listener_id, ?reason, "Listener closed");
                self.on_listener_failed(listener_id, format!("{reason:?}"));
            }
            SwarmEvent::ListenerError { listener_id, error } => {
                warn!(?listener_id, %error, "Listener error");
                self.on_listener_failed(listener_id, error.to_string());
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                match self.bootstrap_dials.remove(&connection_id) {
                    Some(address) => info!(%peer_id, %address, "Connected to bootstrap node"),
                    None => debug!(%peer_id, address = %endpoint.get_remote_address(), "Connection established"),
                }

                for sender in self.bootstrapped_senders.drain(..) {
                    let _ = sender.send(());
                }

                if let Some(pending) = self.dialing.remove(&peer_id) {
                    for pending in pending {
                        self.send_direct(pending);
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                match self.bootstrap_dials.remove(&connection_id) {
                    Some(address) => warn!(%address, %error, "Failed to connect to bootstrap node"),
                    None => debug!(?peer_id, %error, "Outgoing connection failed"),
                }

                let Some(peer_id) = peer_id else {
                    return;
                };

                if self.swarm.is_connected(&peer_id) {
                    return;
                }

                for pending in self.dialing.remove(&peer_id).unwrap_or_default() {
                    warn!(address = %pending.address, %error, "Direct query dial failed");

                    let _ = pending.sender.send(Err(DirectQueryError::failed(
                        pending.address.into_multiaddr(),
                        Phase::Dial,
                        &error,
                    )));
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "Connection closed");
            }
            other => trace!(?other, "Swarm event"),
        }
    }

    fn on_listener_failed(&mut self, listener_id: ListenerId, reason: String) {
        if self.pending_listeners.remove(&listener_id) {
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(Error::Bootstrap(format!("listener failed: {reason}"))));
            }
        }
    }

    fn on_identify_event(&mut self, event: identify::Event) {
        match event {
            identify::Event::Received { peer_id, info, .. } => {
                let kad_capable = info
                    .protocols
                    .iter()
                    .any(|protocol| protocol == &kad::PROTOCOL_NAME);

                debug!(%peer_id, agent = %info.agent_version, kad_capable, "Identified peer");

                if kad_capable {
                    for address in &info.listen_addrs {
                        self.swarm
                            .behaviour_mut()
                            .kad
                            .add_address(&peer_id, address.clone());
                    }

                    if self.publish_peer_records {
                        self.publish_peer_record(&peer_id, &info.listen_addrs);
                    }
                }

                let update = PeerInfoUpdate {
                    peer_id,
                    listen_addrs: info.listen_addrs,
                    protocols: info.protocols.iter().map(ToString::to_string).collect(),
                    agent_version: info.agent_version,
                };

                self.peer_info_senders
                    .retain(|sender| sender.send(update.clone()).is_ok());
            }
            other => trace!(?other, "Identify event"),
        }
    }

    fn on_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            } => self.on_query_progressed(id, result, step.last),
            kad::Event::RoutingUpdated {
                peer, is_new_peer, ..
            } => debug!(%peer, is_new_peer, "Routing table updated"),
            other => trace!(?other, "Kademlia event"),
        }
    }

    fn on_query_progressed(&mut self, query_id: QueryId, result: QueryResult, last: bool) {
        match result {
            QueryResult::GetRecord(result) => self.on_get_record(query_id, result, last),
            QueryResult::GetProviders(result) => self.on_get_providers(query_id, result, last),
            QueryResult::PutRecord(result) => self.on_published(
                query_id,
                result
                    .map(|_| ())
                    .map_err(|error| Error::Publish(error.to_string())),
            ),
            QueryResult::StartProviding(result) => self.on_published(
                query_id,
                result
                    .map(|_| ())
                    .map_err(|error| Error::Publish(error.to_string())),
            ),
            QueryResult::Bootstrap(Ok(ok)) => {
                debug!(peer = %ok.peer, remaining = ok.num_remaining, "Bootstrap progressed")
            }
            QueryResult::Bootstrap(Err(error)) => warn!(%error, "Bootstrap failed"),
            other => trace!(?other, "Query progressed"),
        }
    }

    fn on_direct_query_event(&mut self, event: request_response::Event<Request, Response>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => self.answer_direct_query(peer, request, channel),
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(pending) = self.inflight.remove(&request_id) {
                        debug!(address = %pending.address, %response, "Direct query answered");

                        let _ = pending.sender.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(pending) = self.inflight.remove(&request_id) {
                    let error =
                        DirectQueryError::from_outbound_failure(pending.address.into_multiaddr(), &error);

                    warn!(%error, "Direct query failed");

                    let _ = pending.sender.send(Err(error));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!(%peer, %error, "Inbound direct query failed")
            }
            request_response::Event::ResponseSent { peer, .. } => {
                trace!(%peer, "Direct query response sent")
            }
        }
    }
}

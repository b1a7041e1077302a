//! DHT lookups: a lazy, cancellable sequence of records.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use flume::Receiver;
use libp2p::{
    kad::{self, RecordKey},
    Multiaddr, PeerId,
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{protocol, Error, Node, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
/// What to ask the DHT for.
pub enum LookupKind {
    /// Records stored under the key (`GET_VALUE`).
    #[default]
    Record,
    /// Peers announcing that they provide the key (`GET_PROVIDERS`).
    Providers,
}

#[derive(Clone, Debug)]
/// A DHT lookup for one key, optionally bounded by a deadline.
pub struct LookupRequest {
    pub(crate) key: RecordKey,
    pub(crate) kind: LookupKind,
    pub(crate) deadline: Option<Duration>,
}

impl LookupRequest {
    /// A record lookup without a deadline.
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            kind: LookupKind::default(),
            deadline: None,
        }
    }

    pub fn with_kind(mut self, kind: LookupKind) -> Self {
        self.kind = kind;
        self
    }

    /// Stop the traversal once `deadline` elapsed and keep whatever was found.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A single record discovered by a lookup.
pub enum Record {
    /// Contact information published under a peer's identity.
    Peer {
        peer: PeerId,
        addresses: Vec<Multiaddr>,
    },
    /// A peer that provides the looked up key.
    Provider { provider: PeerId },
    /// A record whose key or value is not a peer identity and address list.
    Opaque { key: Vec<u8>, value: Vec<u8> },
}

impl From<kad::Record> for Record {
    fn from(record: kad::Record) -> Self {
        let key = record.key.to_vec();

        let peer = PeerId::from_bytes(&key).ok();
        let addresses = protocol::decode::<Vec<Multiaddr>>(&record.value).ok();

        match (peer, addresses) {
            (Some(peer), Some(addresses)) => Record::Peer { peer, addresses },
            _ => Record::Opaque {
                key,
                value: record.value,
            },
        }
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Record::Peer { peer, addresses } => {
                let addresses: Vec<String> = addresses.iter().map(ToString::to_string).collect();
                write!(f, "peer {peer} [{}]", addresses.join(", "))
            }
            Record::Provider { provider } => write!(f, "provider {provider}"),
            Record::Opaque { key, value } => {
                write!(f, "record {} = {}", to_hex(key), to_hex(value))
            }
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Build the DHT record advertising `addresses` for `peer`.
///
/// The key is the peer's multihash, the value a CBOR list of multiaddresses.
pub fn peer_record(peer: &PeerId, addresses: &[Multiaddr]) -> Result<kad::Record> {
    let value = protocol::encode(&addresses).map_err(|error| Error::Encoding(error.to_string()))?;

    Ok(kad::Record::new(peer.to_bytes(), value))
}

#[derive(Debug)]
pub(crate) enum LookupEvent {
    Record(Record),
    Finished { timed_out: bool },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Everything a lookup produced.
///
/// An empty result and an empty timed out result are different outcomes.
pub struct LookupResult {
    /// Records in the order the DHT produced them.
    pub records: Vec<Record>,
    /// The deadline (or the DHT's own query timeout) fired before the
    /// traversal finished, `records` may be partial.
    pub timed_out: bool,
}

/// The lazy sequence of records produced by [crate::Node::lookup].
///
/// Iterating blocks until the next record arrives. The sequence is finite and
/// can't be restarted, issue a new lookup to retry. Dropping it cancels the
/// traversal.
///
/// A lookup keeps its node running until it is dropped. If the node is shut
/// down anyway, the sequence ends and [Lookup::into_result] fails with
/// [Error::NodeWasShutdown].
pub struct Lookup {
    receiver: Receiver<LookupEvent>,
    finished: bool,
    timed_out: bool,
    shutdown: bool,
    _cancel_on_drop: DropGuard,
    _node: Node,
}

impl Lookup {
    pub(crate) fn new(receiver: Receiver<LookupEvent>, token: CancellationToken, node: Node) -> Self {
        Self {
            receiver,
            finished: false,
            timed_out: false,
            shutdown: false,
            _cancel_on_drop: token.drop_guard(),
            _node: node,
        }
    }

    /// Returns `true` once the sequence ended because a deadline fired.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Returns `true` once no more records will arrive.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns `true` if the node shut down before the lookup finished.
    pub fn was_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Drain the rest of the sequence.
    pub fn into_result(mut self) -> Result<LookupResult> {
        let records = self.by_ref().collect();

        self.result(records)
    }

    fn result(&self, records: Vec<Record>) -> Result<LookupResult> {
        if self.shutdown {
            return Err(Error::NodeWasShutdown);
        }

        Ok(LookupResult {
            records,
            timed_out: self.timed_out,
        })
    }

    fn on_event(&mut self, event: Option<LookupEvent>) -> Option<Record> {
        match event {
            Some(LookupEvent::Record(record)) => Some(record),
            Some(LookupEvent::Finished { timed_out }) => {
                self.finished = true;
                self.timed_out = timed_out;
                None
            }
            None => {
                self.finished = true;
                self.shutdown = true;
                None
            }
        }
    }

    #[cfg(feature = "async")]
    /// Async version of [Iterator::next].
    pub async fn next_async(&mut self) -> Option<Record> {
        if self.finished {
            return None;
        }

        let event = self.receiver.recv_async().await.ok();
        self.on_event(event)
    }

    #[cfg(feature = "async")]
    /// Async version of [Lookup::into_result].
    pub async fn into_result_async(mut self) -> Result<LookupResult> {
        let mut records = Vec::new();

        while let Some(record) = self.next_async().await {
            records.push(record);
        }

        self.result(records)
    }
}

impl Iterator for Lookup {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let event = self.receiver.recv().ok();
        self.on_event(event)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A handle whose actor never answers.
    fn detached_node() -> Node {
        Node(flume::unbounded().0)
    }

    fn lookup() -> (flume::Sender<LookupEvent>, Lookup) {
        let (sender, receiver) = flume::unbounded();

        (sender, Lookup::new(receiver, CancellationToken::new(), detached_node()))
    }

    #[test]
    fn peer_record_decodes_to_peer() {
        let peer = PeerId::random();
        let addresses: Vec<Multiaddr> = vec![
            "/ip4/127.0.0.1/tcp/64001".parse().unwrap(),
            "/ip4/127.0.0.1/tcp/64002/ws".parse().unwrap(),
        ];

        let record = Record::from(peer_record(&peer, &addresses).unwrap());

        assert_eq!(record, Record::Peer { peer, addresses });
    }

    #[test]
    fn foreign_record_is_opaque() {
        let record = Record::from(kad::Record::new(b"some key".to_vec(), vec![1, 2, 3]));

        assert_eq!(
            record,
            Record::Opaque {
                key: b"some key".to_vec(),
                value: vec![1, 2, 3]
            }
        );
        assert_eq!(record.to_string(), "record 736f6d65206b6579 = 010203");
    }

    #[test]
    fn empty_and_timed_out_are_distinct() {
        let (sender, empty) = lookup();
        sender
            .send(LookupEvent::Finished { timed_out: false })
            .unwrap();

        let (sender, timed_out) = lookup();
        sender.send(LookupEvent::Finished { timed_out: true }).unwrap();

        assert_eq!(empty.into_result().unwrap(), LookupResult::default());
        assert_eq!(
            timed_out.into_result().unwrap(),
            LookupResult {
                records: vec![],
                timed_out: true
            }
        );
    }

    #[test]
    fn keeps_partial_records_on_timeout() {
        let provider = PeerId::random();
        let (sender, lookup) = lookup();

        sender
            .send(LookupEvent::Record(Record::Provider { provider }))
            .unwrap();
        sender
            .send(LookupEvent::Record(Record::Provider { provider }))
            .unwrap();
        sender.send(LookupEvent::Finished { timed_out: true }).unwrap();

        let result = lookup.into_result().unwrap();

        // No deduplication.
        assert_eq!(result.records.len(), 2);
        assert!(result.timed_out);
    }

    #[test]
    fn not_restartable() {
        let (sender, mut lookup) = lookup();
        sender
            .send(LookupEvent::Finished { timed_out: false })
            .unwrap();
        sender
            .send(LookupEvent::Record(Record::Provider {
                provider: PeerId::random(),
            }))
            .unwrap();

        assert!(lookup.next().is_none());
        assert!(lookup.is_finished());
        assert!(lookup.next().is_none());
    }

    #[test]
    fn drop_cancels() {
        let token = CancellationToken::new();
        let (_sender, receiver) = flume::unbounded();

        drop(Lookup::new(receiver, token.clone(), detached_node()));

        assert!(token.is_cancelled());
    }

    #[test]
    fn actor_gone_ends_sequence() {
        let (sender, mut lookup) = lookup();
        drop(sender);

        assert!(lookup.next().is_none());
        assert!(lookup.was_shutdown());
        assert!(!lookup.timed_out());
    }

    #[test]
    fn actor_gone_is_not_an_empty_result() {
        let (sender, lookup) = lookup();
        sender
            .send(LookupEvent::Record(Record::Provider {
                provider: PeerId::random(),
            }))
            .unwrap();
        drop(sender);

        assert!(matches!(lookup.into_result(), Err(Error::NodeWasShutdown)));
    }
}

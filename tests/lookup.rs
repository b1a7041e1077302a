//! DHT lookups against a local testnet.

use std::{
    collections::HashSet,
    net::TcpListener,
    time::{Duration, Instant},
};

use kad_query::{
    DefaultServer, Error, LookupKind, LookupRequest, Multiaddr, Node, PeerAddress, PeerId,
    PeerIdentity, Record, Testnet, Transports,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn client(testnet: &Testnet) -> Node {
    let client = Node::client(&testnet.bootstrap).unwrap();
    assert!(client.bootstrapped(DEADLINE).unwrap());

    client
}

#[test]
fn published_peer_record_is_found() {
    let testnet = Testnet::new(5).unwrap();

    let subject = PeerId::random();
    let addresses: Vec<Multiaddr> = vec!["/ip4/10.0.0.1/tcp/4001".parse().unwrap()];

    testnet.nodes[1]
        .put_peer_record(&subject, &addresses)
        .unwrap();

    let target = PeerIdentity::from(subject);
    let result = client(&testnet)
        .lookup(LookupRequest::new(target.record_key()).with_deadline(DEADLINE))
        .unwrap()
        .into_result()
        .unwrap();

    assert!(result.records.contains(&Record::Peer {
        peer: subject,
        addresses
    }));
}

#[test]
fn provider_is_found() {
    let testnet = Testnet::new(5).unwrap();

    let target = PeerIdentity::from(PeerId::random());
    let provider = *testnet.nodes[2].info().unwrap().peer_id();

    testnet.nodes[2]
        .start_providing(target.record_key())
        .unwrap();

    let result = client(&testnet)
        .lookup(
            LookupRequest::new(target.record_key())
                .with_kind(LookupKind::Providers)
                .with_deadline(DEADLINE),
        )
        .unwrap()
        .into_result()
        .unwrap();

    assert!(result.records.contains(&Record::Provider { provider }));
}

#[test]
fn missing_record_is_empty_not_timed_out() {
    let testnet = Testnet::new(3).unwrap();
    let target = PeerIdentity::from(PeerId::random());

    let result = client(&testnet)
        .lookup(LookupRequest::new(target.record_key()).with_deadline(DEADLINE))
        .unwrap()
        .into_result()
        .unwrap();

    assert!(result.records.is_empty());
    assert!(!result.timed_out);
}

#[test]
fn repeated_lookups_agree() {
    let testnet = Testnet::new(5).unwrap();

    let subject = PeerId::random();
    let addresses: Vec<Multiaddr> = vec!["/ip4/10.0.0.2/tcp/4001".parse().unwrap()];
    testnet.nodes[3]
        .put_peer_record(&subject, &addresses)
        .unwrap();

    let client = client(&testnet);
    let target = PeerIdentity::from(subject);

    let lookup = || -> HashSet<Record> {
        client
            .lookup(LookupRequest::new(target.record_key()).with_deadline(DEADLINE))
            .unwrap()
            .collect()
    };

    assert_eq!(lookup(), lookup());
}

#[test]
fn deadline_against_silent_bootnode() {
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let bootnode: PeerAddress = format!(
        "/ip4/127.0.0.1/tcp/{}/p2p/{}",
        silent.local_addr().unwrap().port(),
        PeerId::random()
    )
    .parse()
    .unwrap();

    let client = Node::client(&[bootnode]).unwrap();
    let target = PeerIdentity::from(PeerId::random());

    let start = Instant::now();
    let result = client
        .lookup(
            LookupRequest::new(target.record_key()).with_deadline(Duration::from_millis(300)),
        )
        .unwrap()
        .into_result()
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(result.timed_out);
    assert!(result.records.is_empty());
}

#[test]
fn lookup_keeps_its_node_running() {
    let testnet = Testnet::new(3).unwrap();
    let target = PeerIdentity::from(PeerId::random());

    // The handle is a temporary, only the lookup holds the node.
    let result = Node::client(&testnet.bootstrap)
        .unwrap()
        .lookup(LookupRequest::new(target.record_key()).with_deadline(DEADLINE))
        .unwrap()
        .into_result();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn shutdown_during_lookup_is_an_error() {
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let bootnode: PeerAddress = format!(
        "/ip4/127.0.0.1/tcp/{}/p2p/{}",
        silent.local_addr().unwrap().port(),
        PeerId::random()
    )
    .parse()
    .unwrap();

    let client = Node::client(&[bootnode]).unwrap();
    let target = PeerIdentity::from(PeerId::random());

    let lookup = client
        .lookup(LookupRequest::new(target.record_key()))
        .unwrap();

    client.shutdown();

    assert!(matches!(lookup.into_result(), Err(Error::NodeWasShutdown)));
}

#[test]
fn identified_peers_get_published_records() {
    let testnet = Testnet::new(3).unwrap();

    let publisher = Node::builder()
        .bootstrap(&testnet.bootstrap)
        .listen_on("/ip4/127.0.0.1/tcp/0".parse().unwrap())
        .transports(Transports {
            tcp: true,
            websocket: false,
        })
        .server_mode()
        .server(Box::<DefaultServer>::default())
        .publish_peer_records(true)
        .build()
        .unwrap();
    assert!(publisher.bootstrapped(DEADLINE).unwrap());

    let subject = testnet.bootstrap[0].peer_id();
    let target = PeerIdentity::from(*subject);
    let client = client(&testnet);

    // Identify and the put both run after the first connection.
    let found = (0..20).any(|_| {
        let records = client
            .lookup(LookupRequest::new(target.record_key()).with_deadline(DEADLINE))
            .unwrap()
            .into_result()
            .unwrap()
            .records;

        let published = records.iter().any(|record| match record {
            Record::Peer { peer, addresses } => peer == subject && !addresses.is_empty(),
            _ => false,
        });

        if !published {
            std::thread::sleep(Duration::from_millis(250));
        }

        published
    });

    assert!(found);
}

#[test]
fn peer_info_updates_after_connecting() {
    let testnet = Testnet::new(1).unwrap();

    let client = Node::builder()
        .bootstrap(&testnet.bootstrap)
        .dial_bootstrap(false)
        .build()
        .unwrap();
    let updates = client.subscribe_peer_info().unwrap();

    let bootnode = testnet.bootstrap[0].clone();
    client
        .direct_query(
            &bootnode,
            kad_query::protocol::Request::new(bootnode.peer_id()),
            Some(DEADLINE),
        )
        .unwrap();

    let update = updates.recv_timeout(DEADLINE).unwrap();

    assert_eq!(update.peer_id, *bootnode.peer_id());
    assert!(!update.listen_addrs.is_empty());
    assert!(update
        .protocols
        .iter()
        .any(|protocol| protocol == "/ipfs/kad/1.0.0"));
}

//! Direct queries against a local testnet and against unreachable peers.

use std::{
    net::TcpListener,
    time::{Duration, Instant},
};

use kad_query::{
    protocol::{Request, Response},
    DirectQuery, Error, Node, PeerAddress, PeerId, PeerIdentity, Phase, Query, QueryOutcome,
    Testnet, Transports,
};

fn address_on(port: u16, peer_id: PeerId) -> PeerAddress {
    format!("/ip4/127.0.0.1/tcp/{port}/p2p/{peer_id}")
        .parse()
        .unwrap()
}

/// An address nobody listens on.
fn closed_address() -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    address_on(port, PeerId::random())
}

#[test]
fn server_answers_for_itself() {
    let testnet = Testnet::new(2).unwrap();
    let client = Node::client(&testnet.bootstrap).unwrap();
    let bootnode = &testnet.bootstrap[0];

    let response = client
        .direct_query(
            bootnode,
            Request::new(bootnode.peer_id()),
            Some(Duration::from_secs(10)),
        )
        .unwrap();

    match response {
        Response::Found { peer, addresses } => {
            assert_eq!(peer, bootnode.peer_id().to_base58());
            assert!(!addresses.is_empty());
        }
        other => panic!("expected Found, got {other:?}"),
    }
}

#[test]
fn unknown_peer_is_not_found() {
    let testnet = Testnet::new(2).unwrap();
    let client = Node::client(&testnet.bootstrap).unwrap();
    let unknown = PeerId::random();

    let response = client
        .direct_query(
            &testnet.bootstrap[0],
            Request::new(&unknown),
            Some(Duration::from_secs(10)),
        )
        .unwrap();

    assert_eq!(response, Response::not_found(unknown.to_base58()));
}

#[test]
fn closed_port_fails_while_dialing() {
    let client = Node::builder().build().unwrap();
    let address = closed_address();

    let error = client
        .direct_query(
            &address,
            Request::new(&PeerId::random()),
            Some(Duration::from_secs(10)),
        )
        .unwrap_err();

    match error {
        Error::DirectQuery(error) => {
            assert_eq!(error.phase, Phase::Dial);
            assert!(!error.is_timeout());
            assert_eq!(&error.address, address.multiaddr());
        }
        other => panic!("expected a direct query error, got {other:?}"),
    }
}

#[test]
fn silent_peer_times_out() {
    // Accepts TCP connections in the backlog but never handshakes.
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = address_on(silent.local_addr().unwrap().port(), PeerId::random());

    let client = Node::builder().build().unwrap();

    let start = Instant::now();
    let error = client
        .direct_query(
            &address,
            Request::new(&PeerId::random()),
            Some(Duration::from_millis(300)),
        )
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(5));

    match error {
        Error::DirectQuery(error) => assert!(error.is_timeout(), "{error}"),
        other => panic!("expected a direct query error, got {other:?}"),
    }
}

#[test]
fn silent_peer_without_deadline_fails_while_dialing() {
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = address_on(silent.local_addr().unwrap().port(), PeerId::random());

    let client = Node::builder()
        .request_timeout(Duration::from_millis(500))
        .build()
        .unwrap();

    let (sender, receiver) = flume::bounded(1);
    let query_address = address.clone();
    std::thread::spawn(move || {
        let result = client.direct_query(&query_address, Request::new(&PeerId::random()), None);
        let _ = sender.send(result);
    });

    let error = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("direct query without a deadline never returned")
        .unwrap_err();

    match error {
        Error::DirectQuery(error) => {
            assert_eq!(error.phase, Phase::Dial, "{error}");
            assert_eq!(&error.address, address.multiaddr());
        }
        other => panic!("expected a direct query error, got {other:?}"),
    }
}

#[test]
fn peer_without_server_fails_negotiation() {
    let listener = Node::builder()
        .listen_on("/ip4/127.0.0.1/tcp/0".parse().unwrap())
        .transports(Transports {
            tcp: true,
            websocket: false,
        })
        .server_mode()
        .build()
        .unwrap();
    let info = listener.info().unwrap();
    let address = PeerAddress::new(info.listen_addrs()[0].clone(), *info.peer_id());

    let client = Node::builder().build().unwrap();

    let error = client
        .direct_query(
            &address,
            Request::new(info.peer_id()),
            Some(Duration::from_secs(10)),
        )
        .unwrap_err();

    match error {
        Error::DirectQuery(error) => {
            assert_eq!(error.phase, Phase::Negotiate, "{error}");
            assert!(!error.is_timeout());
        }
        other => panic!("expected a direct query error, got {other:?}"),
    }
}

#[test]
fn falls_back_to_next_candidate() {
    let testnet = Testnet::new(1).unwrap();
    let client = Node::builder().build().unwrap();
    let bootnode = testnet.bootstrap[0].clone();

    let query = DirectQuery {
        candidates: vec![closed_address(), bootnode.clone()],
        deadline: Some(Duration::from_secs(10)),
    };

    let outcome = query
        .execute(&client, &PeerIdentity::from(*bootnode.peer_id()))
        .unwrap();

    match outcome {
        QueryOutcome::Direct { from, response } => {
            assert_eq!(from, bootnode);
            assert!(matches!(response, Response::Found { .. }));
        }
        other => panic!("expected a direct outcome, got {other:?}"),
    }
}

#[test]
fn last_error_is_reported_when_every_candidate_fails() {
    let client = Node::builder().build().unwrap();
    let last = closed_address();

    let query = DirectQuery {
        candidates: vec![closed_address(), last.clone()],
        deadline: Some(Duration::from_secs(10)),
    };

    let error = query
        .execute(&client, &PeerIdentity::from(PeerId::random()))
        .unwrap_err();

    match error {
        Error::DirectQuery(error) => assert_eq!(&error.address, last.multiaddr()),
        other => panic!("expected a direct query error, got {other:?}"),
    }
}

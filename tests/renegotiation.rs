//! Secure renegotiation (RFC 5746) on established sessions.

mod common;

use std::time::Instant;

use common::*;
use tlsession::{Error, RenegotiationState, Session, Transport, TransportKind};

/// Run reads on both sides until neither has anything left to say.
fn settle<T: Transport>(
    a: &mut Session<T>,
    b: &mut Session<T>,
    now: Instant,
    idle: impl Fn() -> bool,
) -> (Vec<u8>, Vec<u8>) {
    let mut got_a = Vec::new();
    let mut got_b = Vec::new();
    let mut buf = [0u8; 1024];
    for _ in 0..100 {
        for (s, got) in [(&mut *a, &mut got_a), (&mut *b, &mut got_b)] {
            loop {
                match s.read(&mut buf, now) {
                    Ok(n) => got.extend_from_slice(&buf[..n]),
                    Err(Error::WouldBlock) => break,
                    Err(e) => panic!("read failed: {}", e),
                }
            }
        }
        if idle() {
            break;
        }
    }
    (got_a, got_b)
}

#[test]
fn client_initiated_stream() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = stream_pair(33);
    let (mut client, mut server) = pair(
        psk(TransportKind::Stream).renegotiation(true),
        psk(TransportKind::Stream).renegotiation(true),
        c,
        s,
    );
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    let first = client.transcript_hash().unwrap().to_vec();
    assert_eq!(client.renegotiation_state(), RenegotiationState::Initial);

    client.renegotiate(now).unwrap();
    assert_eq!(client.renegotiation_state(), RenegotiationState::InProgress);
    assert!(matches!(
        client.renegotiate(now),
        Err(Error::RenegotiationInProgress)
    ));

    let now = connect(&mut client, &mut server, now, idle).unwrap();
    assert_eq!(client.renegotiation_state(), RenegotiationState::Done);
    assert_eq!(server.renegotiation_state(), RenegotiationState::Done);

    let second = client.transcript_hash().unwrap().to_vec();
    assert_ne!(first, second);
    assert_eq!(server.transcript_hash(), Some(&second[..]));

    let got = transfer(&mut client, &mut server, b"after renegotiation", now);
    assert_eq!(got, b"after renegotiation");
}

#[test]
fn server_initiated_datagram() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = datagram_pair();
    let (mut client, mut server) = pair(
        psk(TransportKind::Datagram).renegotiation(true),
        psk(TransportKind::Datagram).renegotiation(true),
        c,
        s,
    );
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    let first = server.transcript_hash().unwrap().to_vec();

    server.renegotiate(now).unwrap();
    assert_eq!(server.renegotiation_state(), RenegotiationState::Pending);
    assert!(matches!(
        server.renegotiate(now),
        Err(Error::RenegotiationInProgress)
    ));

    connect(&mut client, &mut server, now, idle).unwrap();
    // The server is established throughout, make sure the client's
    // handshake really ran to the end on both sides.
    settle(&mut client, &mut server, now, idle);

    assert_eq!(client.renegotiation_state(), RenegotiationState::Done);
    assert_eq!(server.renegotiation_state(), RenegotiationState::Done);
    assert_ne!(server.transcript_hash(), Some(&first[..]));
    assert_eq!(client.transcript_hash(), server.transcript_hash());
}

#[test]
fn client_refuses_hello_request() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = stream_pair(512);
    let (mut client, mut server) = pair(
        psk(TransportKind::Stream),
        psk(TransportKind::Stream).renegotiation(true),
        c,
        s,
    );
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();

    server.renegotiate(now).unwrap();
    assert_eq!(server.renegotiation_state(), RenegotiationState::Pending);

    client.write(b"still here").unwrap();
    let (to_client, to_server) = settle(&mut client, &mut server, now, idle);
    assert!(to_client.is_empty());
    assert_eq!(to_server, b"still here");

    assert_eq!(server.renegotiation_state(), RenegotiationState::Done);
    assert_eq!(client.renegotiation_state(), RenegotiationState::Initial);
    assert!(server.is_established());
    assert!(client.is_established());
}

#[test]
fn server_refuses_client_hello() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = datagram_pair();
    let (mut client, mut server) = pair(
        psk(TransportKind::Datagram).renegotiation(true),
        psk(TransportKind::Datagram),
        c,
        s,
    );
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    let first = client.transcript_hash().unwrap().to_vec();

    client.renegotiate(now).unwrap();
    settle(&mut client, &mut server, now, idle);

    assert_eq!(client.renegotiation_state(), RenegotiationState::Done);
    assert_eq!(server.renegotiation_state(), RenegotiationState::Initial);
    assert_eq!(client.transcript_hash(), Some(&first[..]));
    assert_eq!(client.poll_timeout(), None);

    let got = transfer(&mut client, &mut server, b"same keys", now);
    assert_eq!(got, b"same keys");
}

#[test]
fn renegotiate_needs_configuration() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = stream_pair(512);
    let (mut client, mut server) =
        pair(psk(TransportKind::Stream), psk(TransportKind::Stream), c, s);

    let now = Instant::now();
    assert!(matches!(client.renegotiate(now), Err(Error::BadInput(_))));

    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, now, idle).unwrap();
    assert!(matches!(client.renegotiate(now), Err(Error::BadInput(_))));
    assert_eq!(client.renegotiation_state(), RenegotiationState::Initial);
}

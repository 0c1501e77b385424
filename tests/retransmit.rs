//! Lossy datagram links.

mod common;

use std::time::{Duration, Instant};

use common::*;
use tlsession::{Error, TransportKind};

#[test]
fn converges_when_every_other_datagram_is_lost() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = datagram_pair();
    c2s.borrow_mut().drop_every = Some(2);
    s2c.borrow_mut().drop_every = Some(2);

    let (mut client, mut server) = pair(
        psk(TransportKind::Datagram).max_retransmissions(8),
        psk(TransportKind::Datagram).max_retransmissions(8),
        c,
        s,
    );

    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    connect(&mut client, &mut server, Instant::now(), idle).expect("handshake");

    assert_eq!(client.transcript_hash(), server.transcript_hash());
    assert!(c2s.borrow().sent > 3);
}

#[test]
fn lost_server_flight_is_resent() {
    let _ = env_logger::try_init();

    let (c, s, c2s, s2c) = datagram_pair();
    let (mut client, mut server) = pair(
        psk(TransportKind::Datagram),
        psk(TransportKind::Datagram).dtls_cookies(false),
        c,
        s,
    );

    let now = Instant::now();
    assert!(matches!(client.handshake(now), Err(Error::WouldBlock)));

    // Lose the server's first flight.
    s2c.borrow_mut().blocked = true;
    assert!(matches!(server.handshake(now), Err(Error::WouldBlock)));
    s2c.borrow_mut().blocked = false;
    assert!(s2c.borrow().is_empty());

    let deadline = server.poll_timeout().expect("server timer");
    assert!(deadline > now);
    assert!(deadline - now <= Duration::from_secs(1));

    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    connect(&mut client, &mut server, now, idle).expect("handshake");
    assert_eq!(client.transcript_hash(), server.transcript_hash());
}

#[test]
fn gives_up_after_retransmissions() {
    let _ = env_logger::try_init();

    let (c, s, c2s, _s2c) = datagram_pair();
    c2s.borrow_mut().blocked = true;
    let (mut client, _server) = pair(
        psk(TransportKind::Datagram)
            .max_retransmissions(2)
            .retransmit_min(Duration::from_millis(100)),
        psk(TransportKind::Datagram),
        c,
        s,
    );

    let mut now = Instant::now();
    assert!(matches!(client.handshake(now), Err(Error::WouldBlock)));

    let mut timeouts = 0;
    let err = loop {
        let deadline = client.poll_timeout().expect("timer while waiting");
        assert!(deadline > now);
        now = deadline;
        match client.handle_timeout(now) {
            Ok(()) => timeouts += 1,
            Err(e) => break e,
        }
    };

    assert_eq!(timeouts, 2);
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(c2s.borrow().sent, 3);
    assert_eq!(client.poll_timeout(), None);
    assert!(matches!(client.handshake(now), Err(Error::ConnectionClosed)));
}

#[test]
fn retransmit_timer_backs_off() {
    let _ = env_logger::try_init();

    let (c, s, c2s, _s2c) = datagram_pair();
    c2s.borrow_mut().blocked = true;
    let (mut client, _server) = pair(
        psk(TransportKind::Datagram)
            .retransmit_min(Duration::from_millis(100))
            .retransmit_max(Duration::from_millis(300)),
        psk(TransportKind::Datagram),
        c,
        s,
    );

    let start = Instant::now();
    assert!(matches!(client.handshake(start), Err(Error::WouldBlock)));

    let mut now = start;
    let mut waits = Vec::new();
    for _ in 0..4 {
        let deadline = client.poll_timeout().unwrap();
        waits.push(deadline - now);
        now = deadline;
        client.handle_timeout(now).unwrap();
    }

    assert_eq!(
        waits,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
            Duration::from_millis(300),
        ]
    );
}

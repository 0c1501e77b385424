//! Abbreviated handshakes from a server side session cache.

mod common;

use std::sync::Arc;
use std::time::Instant;

use common::*;
use tlsession::{AlertDescription, Config, Error, MemorySessionCache, Role, Session, TransportKind};

fn server_config(kind: TransportKind, cache: &Arc<MemorySessionCache>) -> Arc<Config> {
    let config = server_with_cert(kind)
        .session_cache(cache.clone())
        .build()
        .unwrap();
    Arc::new(config)
}

#[test]
fn datagram_resumes_cached_session() {
    let _ = env_logger::try_init();

    let cache = Arc::new(MemorySessionCache::new(8));
    let server_config = server_config(TransportKind::Datagram, &cache);
    let client_config = Arc::new(Config::builder(TransportKind::Datagram).build().unwrap());

    let (c, s, c2s, s2c) = datagram_pair();
    let mut client = Session::new(client_config.clone(), Role::Client, c);
    let mut server = Session::new(server_config.clone(), Role::Server, s);
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    assert!(!client.is_resumed());
    let saved = client.saved_session().expect("session to resume");

    let (c, s, c2s, s2c) = datagram_pair();
    let mut client = Session::new(client_config, Role::Client, c);
    client.set_saved_session(saved);
    let mut server = Session::new(server_config, Role::Server, s);
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, now, idle).unwrap();

    assert!(client.is_resumed());
    assert!(server.is_resumed());
    assert_eq!(client.transcript_hash(), server.transcript_hash());
    // No certificate travels in an abbreviated handshake.
    assert!(client.peer_certificates().is_empty());

    let got = transfer(&mut server, &mut client, b"welcome back", now);
    assert_eq!(got, b"welcome back");
}

#[test]
fn stream_falls_back_to_full_handshake_for_unknown_session() {
    let _ = env_logger::try_init();

    let cache = Arc::new(MemorySessionCache::new(8));
    let first_server = server_config(TransportKind::Stream, &cache);
    let client_config = Arc::new(Config::builder(TransportKind::Stream).build().unwrap());

    let (c, s, c2s, s2c) = stream_pair(100);
    let mut client = Session::new(client_config.clone(), Role::Client, c);
    let mut server = Session::new(first_server, Role::Server, s);
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    let saved = client.saved_session().unwrap();

    // A different server that never saw the session.
    let other_cache = Arc::new(MemorySessionCache::new(8));
    let (c, s, c2s, s2c) = stream_pair(100);
    let mut client = Session::new(client_config, Role::Client, c);
    client.set_saved_session(saved.clone());
    let mut server = Session::new(
        server_config(TransportKind::Stream, &other_cache),
        Role::Server,
        s,
    );
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    connect(&mut client, &mut server, now, idle).unwrap();

    assert!(!client.is_resumed());
    assert!(!server.is_resumed());
    assert_eq!(client.transcript_hash(), server.transcript_hash());
    assert_ne!(client.saved_session(), Some(saved));
}

#[test]
fn server_aborts_resumption_without_extended_master_secret() {
    let _ = env_logger::try_init();

    let cache = Arc::new(MemorySessionCache::new(8));
    let server_config = server_config(TransportKind::Stream, &cache);
    let client_config = Arc::new(Config::builder(TransportKind::Stream).build().unwrap());

    let (c, s, c2s, s2c) = stream_pair(100);
    let mut client = Session::new(client_config, Role::Client, c);
    let mut server = Session::new(server_config.clone(), Role::Server, s);
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let now = connect(&mut client, &mut server, Instant::now(), idle).unwrap();
    let saved = client.saved_session().unwrap();
    assert!(saved.extended_master_secret);

    // Same session offered by a client that no longer sends the extension.
    let legacy = Arc::new(
        Config::builder(TransportKind::Stream)
            .extended_master_secret(false)
            .build()
            .unwrap(),
    );
    let (c, s, c2s, s2c) = stream_pair(100);
    let mut client = Session::new(legacy, Role::Client, c);
    client.set_saved_session(saved);
    let mut server = Session::new(server_config, Role::Server, s);
    let idle = || c2s.borrow().is_empty() && s2c.borrow().is_empty();
    let err = connect(&mut client, &mut server, now, idle).unwrap_err();

    assert!(matches!(
        err,
        Error::ProtocolViolation {
            alert: AlertDescription::HandshakeFailure,
            ..
        }
    ));
    assert!(!server.is_resumed());
}

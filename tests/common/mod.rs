//! Shared helpers for the integration tests: in-memory transports and a
//! handshake driver with a simulated clock.

#![allow(unused)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tlsession::{generate_self_signed_certificate, Config, ConfigBuilder, Error, Role};
use tlsession::{Session, Transport, TransportKind};

pub const PSK_IDENTITY: &[u8] = b"client-1";
pub const PSK_KEY: &[u8] = b"0123456789abcdef";

/// One direction of a datagram link.
#[derive(Debug, Default)]
pub struct Link {
    queue: VecDeque<Vec<u8>>,
    /// Datagrams handed to this link so far.
    pub sent: usize,
    /// Drop every n:th datagram.
    pub drop_every: Option<usize>,
    /// Drop everything.
    pub blocked: bool,
}

impl Link {
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub type Shared<T> = Rc<RefCell<T>>;

pub struct DatagramEnd {
    tx: Shared<Link>,
    rx: Shared<Link>,
}

impl Transport for DatagramEnd {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut link = self.tx.borrow_mut();
        link.sent += 1;
        let dropped = link.blocked
            || link
                .drop_every
                .map(|n| link.sent % n == 0)
                .unwrap_or(false);
        if !dropped {
            link.queue.push_back(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.borrow_mut().queue.pop_front() {
            Some(d) => {
                buf[..d.len()].copy_from_slice(&d);
                Ok(d.len())
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

/// A datagram pipe: client end, server end, then the client-to-server and
/// server-to-client links.
pub fn datagram_pair() -> (DatagramEnd, DatagramEnd, Shared<Link>, Shared<Link>) {
    let c2s: Shared<Link> = Rc::default();
    let s2c: Shared<Link> = Rc::default();
    let client = DatagramEnd {
        tx: c2s.clone(),
        rx: s2c.clone(),
    };
    let server = DatagramEnd {
        tx: s2c.clone(),
        rx: c2s.clone(),
    };
    (client, server, c2s, s2c)
}

/// Byte pipe end that hands out at most `chunk` bytes per read, so records
/// arrive split and coalesced.
pub struct StreamEnd {
    tx: Shared<VecDeque<u8>>,
    rx: Shared<VecDeque<u8>>,
    chunk: usize,
}

impl Transport for StreamEnd {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.borrow_mut().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.borrow_mut();
        if rx.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = rx.len().min(buf.len()).min(self.chunk);
        for (i, b) in rx.drain(..n).enumerate() {
            buf[i] = b;
        }
        Ok(n)
    }
}

/// A byte pipe: client end, server end, then the client-to-server and
/// server-to-client buffers.
pub fn stream_pair(
    chunk: usize,
) -> (
    StreamEnd,
    StreamEnd,
    Shared<VecDeque<u8>>,
    Shared<VecDeque<u8>>,
) {
    let c2s: Shared<VecDeque<u8>> = Rc::default();
    let s2c: Shared<VecDeque<u8>> = Rc::default();
    let client = StreamEnd {
        tx: c2s.clone(),
        rx: s2c.clone(),
        chunk,
    };
    let server = StreamEnd {
        tx: s2c.clone(),
        rx: c2s.clone(),
        chunk,
    };
    (client, server, c2s, s2c)
}

/// Server config with a fresh self-signed ECDSA certificate.
pub fn server_with_cert(kind: TransportKind) -> ConfigBuilder {
    let cert = generate_self_signed_certificate(&["localhost"]).expect("certificate");
    Config::builder(kind).key_cert(vec![cert.certificate], cert.private_key)
}

pub fn psk(kind: TransportKind) -> ConfigBuilder {
    Config::builder(kind).psk(PSK_IDENTITY, PSK_KEY)
}

pub fn pair<T: Transport>(
    client: ConfigBuilder,
    server: ConfigBuilder,
    client_end: T,
    server_end: T,
) -> (Session<T>, Session<T>) {
    let client = Session::new(
        Arc::new(client.build().expect("client config")),
        Role::Client,
        client_end,
    );
    let server = Session::new(
        Arc::new(server.build().expect("server config")),
        Role::Server,
        server_end,
    );
    (client, server)
}

fn pending(r: Result<(), Error>) -> Result<bool, Error> {
    match r {
        Ok(()) => Ok(false),
        Err(Error::WouldBlock) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Drive both handshakes to completion. When neither side has anything
/// to say the clock jumps to the earliest retransmission deadline.
///
/// `idle` tells whether the network holds undelivered data.
pub fn connect<T: Transport>(
    client: &mut Session<T>,
    server: &mut Session<T>,
    mut now: Instant,
    idle: impl Fn() -> bool,
) -> Result<Instant, Error> {
    for _ in 0..1000 {
        let c = pending(client.handshake(now))?;
        let s = pending(server.handshake(now))?;
        if !c && !s {
            return Ok(now);
        }
        if idle() {
            let next = [client.poll_timeout(), server.poll_timeout()]
                .into_iter()
                .flatten()
                .min();
            let Some(next) = next else {
                panic!("handshake stalled without timers");
            };
            now = next.max(now);
            client.handle_timeout(now)?;
            server.handle_timeout(now)?;
        }
    }
    panic!("handshake did not converge");
}

/// Write `data` on `from` and read at `to` until all of it arrived.
pub fn transfer<T: Transport>(
    from: &mut Session<T>,
    to: &mut Session<T>,
    data: &[u8],
    now: Instant,
) -> Vec<u8> {
    from.write(data).expect("write");
    let mut got = Vec::new();
    let mut buf = [0u8; 4096];
    for _ in 0..100 {
        match to.read(&mut buf, now) {
            Ok(n) => got.extend_from_slice(&buf[..n]),
            Err(Error::WouldBlock) => {
                if got.len() >= data.len() {
                    break;
                }
                // Let the sender process anything the receiver answered.
                let _ = from.read(&mut buf, now);
            }
            Err(e) => panic!("read failed: {}", e),
        }
        if got.len() >= data.len() {
            break;
        }
    }
    got
}

//! TLS 1.2 and DTLS 1.2 sessions over a caller supplied transport.
//!
//! A [`Session`] owns a [`Transport`] and is driven by the caller: every
//! call reads what is available, advances the handshake or decrypts
//! application data, and returns. There are no threads or callbacks. On
//! datagram transport lost flights are resent from
//! [`Session::handle_timeout`], which the caller schedules from
//! [`Session::poll_timeout`].
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use tlsession::{Config, Error, Role, Session, TransportKind};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! socket.connect("192.0.2.1:4433").unwrap();
//!
//! let config = Config::builder(TransportKind::Datagram)
//!     .psk(b"client-1", b"not so secret")
//!     .build()
//!     .unwrap();
//! let mut session = Session::new(Arc::new(config), Role::Client, socket);
//!
//! loop {
//!     match session.handshake(Instant::now()) {
//!         Ok(()) => break,
//!         Err(Error::WouldBlock) => {
//!             // Wait for the socket or session.poll_timeout(), then
//!             // session.handle_timeout(Instant::now()).
//!         }
//!         Err(e) => panic!("handshake failed: {}", e),
//!     }
//! }
//! session.write(b"hello").unwrap();
//! ```
//!
//! Supported cipher suites are ECDHE_ECDSA and PSK with AES-GCM, and their
//! AES-CBC HMAC-SHA2 counterparts. The [`kdf`] module carries the PKCS#12
//! key derivation and password based encryption used for key containers.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
mod certificate;
mod config;
pub mod crypto;
mod error;
mod flight;
mod handshake;
pub mod kdf;
mod message;
mod record;
mod rng;
mod session;
mod timer;
mod transform;
mod transport;
mod types;
mod util;
mod window;

pub use buffer::Buf;
pub use certificate::{calculate_fingerprint, certificate_dns_names, format_fingerprint};
pub use certificate::{generate_self_signed_certificate, GeneratedCertificate};
pub use certificate::{CertUsage, CertVerifier, CertificateError};
pub use certificate::{DefaultCertVerifier, FingerprintVerifier};
pub use config::{Config, ConfigBuilder, Psk};
pub use error::Error;
pub use handshake::{KeyCert, KeyCertChain, MemorySessionCache, SavedSession, SessionCache};
pub use session::{RenegotiationState, Session};
pub use transport::Transport;
pub use types::{AlertDescription, AlertLevel, CipherSuite, ContentType, HashAlgorithm};
pub use types::{NamedGroup, ProtocolVersion, Role, SignatureAlgorithm, SignatureAndHash};
pub use types::TransportKind;

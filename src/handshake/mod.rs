//! Handshake state machines.
//!
//! [`Handshake`] is one handshake in progress, initial or renegotiation. It
//! consumes whole handshake messages and ChangeCipherSpec signals and
//! answers with an [`Outbox`]: the messages of our next flight plus the
//! points where the write side switches to the new keys. It never touches
//! the transport. The session owns the record layer and the flight, and
//! applies the outbox to them.

mod client;
mod key_cert;
mod resume;
mod server;
mod sig_hash;

use std::fmt;
use std::sync::Arc;

use subtle::ConstantTimeEq;

pub use key_cert::{KeyCert, KeyCertChain};
pub use resume::{MemorySessionCache, SavedSession, SessionCache};
pub(crate) use sig_hash::SigHashSet;

pub(crate) use client::ClientHandshake;
pub(crate) use server::ServerHandshake;

use crate::buffer::Buf;
use crate::crypto::hash::Transcript;
use crate::crypto::prf::{self, VERIFY_DATA_LEN};
use crate::crypto::ActiveKeyExchange;
use crate::flight::HandshakeMessage;
use crate::message::{encode_message, Finished, MessageType, RANDOM_LEN};
use crate::rng::SeededRng;
use crate::transform::Transform;
use crate::types::{AlertDescription, CipherSuite, HashAlgorithm, NamedGroup, Role};
use crate::types::{SignatureAlgorithm, TransportKind};
use crate::util::parse_all;
use crate::{Config, Error};

/// One step of output from a handshake.
pub(crate) enum Out {
    Message(Buf),
    ChangeCipherSpec,
    /// Switch the write side to the next epoch.
    WriteTransform(Arc<Transform>),
}

impl fmt::Debug for Out {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Out::Message(m) => write!(f, "Message({} bytes)", m.len()),
            Out::ChangeCipherSpec => write!(f, "ChangeCipherSpec"),
            Out::WriteTransform(t) => write!(f, "WriteTransform({:?})", t.suite()),
        }
    }
}

/// Our next flight.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub items: Vec<Out>,
    /// Nothing more is expected from the peer after this flight.
    pub is_final: bool,
    /// Sent once and forgotten (HelloVerifyRequest).
    pub stateless: bool,
}

/// What a handshake handler needs besides its own state.
pub(crate) struct Ctx<'a> {
    pub config: &'a Config,
    pub rng: &'a mut SeededRng,
    pub out: &'a mut Outbox,
}

/// Finished values of the last completed handshake, carried into a
/// renegotiation (RFC 5746).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RenegotiationInfo {
    pub client_verify: Vec<u8>,
    pub server_verify: Vec<u8>,
}

impl RenegotiationInfo {
    /// `renegotiated_connection` as the server sends it.
    pub fn both(&self) -> Vec<u8> {
        let mut v = self.client_verify.clone();
        v.extend_from_slice(&self.server_verify);
        v
    }
}

/// Result of a completed handshake.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub suite: CipherSuite,
    pub session: SavedSession,
    pub peer_certificates: Vec<Vec<u8>>,
    pub secure_renegotiation: bool,
    pub verify: RenegotiationInfo,
    pub resumed: bool,
    pub transcript_hash: Buf,
}

/// Short-lived state of one handshake. Secrets are wiped when it drops.
pub(crate) struct Params {
    kind: TransportKind,
    transcript: Transcript,
    send_seq: u16,
    pub client_random: [u8; RANDOM_LEN],
    pub server_random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub suite: Option<CipherSuite>,
    pub kx: Option<Box<dyn ActiveKeyExchange>>,
    pub premaster: Buf,
    pub master: Buf,
    pub extended_master_secret: bool,
    pub peer_certificates: Vec<Vec<u8>>,
    pub sig_hashes: SigHashSet,
    pub resumed: bool,
    pub secure_renegotiation: bool,
    pub verify: RenegotiationInfo,
    /// Read transform waiting for the peer's ChangeCipherSpec.
    pub pending_read: Option<Arc<Transform>>,
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("kind", &self.kind)
            .field("send_seq", &self.send_seq)
            .field("suite", &self.suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("resumed", &self.resumed)
            .finish_non_exhaustive()
    }
}

impl Params {
    pub fn new(kind: TransportKind) -> Self {
        Params {
            kind,
            transcript: Transcript::new(),
            send_seq: 0,
            client_random: [0; RANDOM_LEN],
            server_random: [0; RANDOM_LEN],
            session_id: Vec::new(),
            suite: None,
            kx: None,
            premaster: Buf::new(),
            master: Buf::new(),
            extended_master_secret: false,
            peer_certificates: Vec::new(),
            sig_hashes: SigHashSet::new(),
            resumed: false,
            secure_renegotiation: false,
            verify: RenegotiationInfo::default(),
            pending_read: None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Encode a message with the next `message_seq`, hash it and queue it.
    ///
    /// HelloRequest always goes out as sequence 0, stays out of the
    /// transcript and does not advance the counter.
    pub fn send(&mut self, out: &mut Outbox, msg_type: MessageType, body: &[u8]) {
        let seq = match msg_type {
            MessageType::HelloRequest => 0,
            _ => self.send_seq,
        };
        let raw = encode_message(self.kind, msg_type, seq, body);
        if msg_type != MessageType::HelloRequest {
            self.send_seq = self.send_seq.wrapping_add(1);
            self.transcript.update(&raw);
        }
        trace!("Queue {:?} seq {}", msg_type, seq);
        out.items.push(Out::Message(raw));
    }

    /// Our sequence counter continues from the peer's (DTLS ServerHello
    /// after a cookie exchange).
    pub fn set_send_seq(&mut self, seq: u16) {
        self.send_seq = seq;
    }

    pub fn receive(&mut self, msg: &HandshakeMessage) {
        self.transcript.update(&msg.raw);
    }

    pub fn reset_transcript(&mut self) {
        self.transcript.reset();
    }

    pub fn suite(&self) -> Result<CipherSuite, Error> {
        self.suite.ok_or_else(|| {
            Error::violation(AlertDescription::InternalError, "no cipher suite negotiated")
        })
    }

    pub fn prf_hash(&self) -> Result<HashAlgorithm, Error> {
        Ok(self.suite()?.hash_algorithm())
    }

    pub fn transcript_hash(&self) -> Result<Buf, Error> {
        self.transcript.digest(self.prf_hash()?)
    }

    /// Digest of the transcript so far with an explicit hash.
    pub fn transcript_digest(&self, hash: HashAlgorithm) -> Result<Buf, Error> {
        self.transcript.digest(hash)
    }

    /// Turn the premaster secret into the master secret and wipe it.
    pub fn compute_master(&mut self) -> Result<(), Error> {
        let hash = self.prf_hash()?;
        self.master = if self.extended_master_secret {
            let session_hash = self.transcript_hash()?;
            prf::extended_master_secret(&self.premaster, &session_hash, hash)?
        } else {
            prf::master_secret(
                &self.premaster,
                &self.client_random,
                &self.server_random,
                hash,
            )?
        };
        self.premaster.clear();
        Ok(())
    }

    pub fn derive_transform(&self, config: &Config, role: Role) -> Result<Arc<Transform>, Error> {
        let transform = Transform::derive(
            config.crypto_provider(),
            self.suite()?,
            &self.master,
            &self.client_random,
            &self.server_random,
            role,
        )?;
        Ok(Arc::new(transform))
    }

    /// verify_data of the Finished message `sender` sends, at this point of
    /// the transcript.
    pub fn finished_for(&self, sender: Role) -> Result<[u8; VERIFY_DATA_LEN], Error> {
        let label = match sender {
            Role::Client => "client finished",
            Role::Server => "server finished",
        };
        let hash = self.transcript_hash()?;
        prf::verify_data(&self.master, label, &hash, self.prf_hash()?)
    }

    /// Queue our Finished and remember its verify_data.
    pub fn send_finished(&mut self, out: &mut Outbox, us: Role) -> Result<(), Error> {
        let verify_data = self.finished_for(us)?;
        let mut body = Buf::new();
        Finished { verify_data }.serialize(&mut body);
        self.send(out, MessageType::Finished, &body);
        self.store_verify(us, &verify_data);
        Ok(())
    }

    /// Check the peer's Finished and add it to the transcript.
    pub fn check_finished(&mut self, msg: &HandshakeMessage, peer: Role) -> Result<(), Error> {
        let finished = parse_all(msg.body(), "Finished", Finished::parse)?;
        let expected = self.finished_for(peer)?;
        if !bool::from(expected[..].ct_eq(&finished.verify_data[..])) {
            return Err(Error::AuthenticationFailed);
        }
        self.receive(msg);
        self.store_verify(peer, &finished.verify_data);
        Ok(())
    }

    fn store_verify(&mut self, sender: Role, verify_data: &[u8]) {
        match sender {
            Role::Client => self.verify.client_verify = verify_data.to_vec(),
            Role::Server => self.verify.server_verify = verify_data.to_vec(),
        }
    }

    /// Queue CCS, the write switch and our Finished.
    pub fn send_ccs_finished(
        &mut self,
        out: &mut Outbox,
        transform: Arc<Transform>,
        us: Role,
    ) -> Result<(), Error> {
        out.items.push(Out::ChangeCipherSpec);
        out.items.push(Out::WriteTransform(transform));
        self.send_finished(out, us)
    }

    pub fn outcome(&self) -> Result<Outcome, Error> {
        let suite = self.suite()?;
        Ok(Outcome {
            suite,
            session: SavedSession {
                id: self.session_id.clone(),
                suite,
                master: zeroize::Zeroizing::new(self.master.to_vec()),
                extended_master_secret: self.extended_master_secret,
            },
            peer_certificates: self.peer_certificates.clone(),
            secure_renegotiation: self.secure_renegotiation,
            verify: self.verify.clone(),
            resumed: self.resumed,
            transcript_hash: self.transcript_hash()?,
        })
    }
}

/// `len(other) ‖ other ‖ len(psk) ‖ psk` (RFC 4279). Plain PSK uses zeros
/// for `other`.
pub(crate) fn psk_premaster(other: Option<&[u8]>, psk: &[u8]) -> Buf {
    let zeros;
    let other = match other {
        Some(o) => o,
        None => {
            zeros = vec![0u8; psk.len()];
            &zeros
        }
    };
    let mut out = Buf::with_capacity(4 + other.len() + psk.len());
    out.put_vec16(other);
    out.put_vec16(psk);
    out
}

/// Run the peer chain through the configured verifier.
pub(crate) fn verify_peer_chain(
    config: &Config,
    chain: &[Vec<u8>],
    peer: Role,
    suite: CipherSuite,
) -> Result<(), Error> {
    let usage = config.cert_verifier().verify(chain, peer).map_err(|reason| {
        Error::violation(AlertDescription::BadCertificate, reason)
    })?;
    if suite.signature_algorithm() == Some(SignatureAlgorithm::ECDSA) && !usage.digital_signature
    {
        return Err(Error::violation(
            AlertDescription::UnsupportedCertificate,
            "certificate not valid for signing",
        ));
    }
    Ok(())
}

/// Start an ephemeral key exchange on `group`.
pub(crate) fn start_kx(
    config: &Config,
    group: NamedGroup,
) -> Result<Box<dyn ActiveKeyExchange>, Error> {
    let kx = config
        .crypto_provider()
        .find_kx_group(group)
        .ok_or_else(|| Error::Unavailable(format!("group {:?}", group)))?;
    kx.start_exchange().map_err(Error::CryptoError)
}

/// Finish an exchange against the peer's point.
pub(crate) fn complete_kx(
    kx: Option<Box<dyn ActiveKeyExchange>>,
    peer: &[u8],
) -> Result<Buf, Error> {
    let kx = kx.ok_or_else(|| {
        Error::violation(AlertDescription::InternalError, "no key exchange in progress")
    })?;
    let mut shared = Buf::new();
    kx.complete(peer, &mut shared)
        .map_err(|e| Error::illegal_parameter(format!("peer key share: {}", e)))?;
    Ok(shared)
}

/// One handshake, client or server side.
#[derive(Debug)]
pub(crate) enum Handshake {
    Client(ClientHandshake),
    Server(ServerHandshake),
}

impl Handshake {
    /// Produce the first flight, if this side speaks first.
    pub fn start(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        match self {
            Handshake::Client(c) => c.start(ctx),
            Handshake::Server(_) => Ok(()),
        }
    }

    pub fn handle_message(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        match self {
            Handshake::Client(c) => c.handle_message(ctx, msg),
            Handshake::Server(s) => s.handle_message(ctx, msg),
        }
    }

    /// Whether a ChangeCipherSpec is acceptable right now.
    pub fn expects_ccs(&self) -> bool {
        match self {
            Handshake::Client(c) => c.expects_ccs(),
            Handshake::Server(s) => s.expects_ccs(),
        }
    }

    /// The peer switched its write side. Returns the transform to read with.
    pub fn handle_ccs(&mut self) -> Result<Arc<Transform>, Error> {
        match self {
            Handshake::Client(c) => c.handle_ccs(),
            Handshake::Server(s) => s.handle_ccs(),
        }
    }

    /// A server that has not yet accepted a ClientHello.
    pub fn awaiting_hello(&self) -> bool {
        match self {
            Handshake::Client(_) => false,
            Handshake::Server(s) => s.awaiting_hello(),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Handshake::Client(c) => c.is_complete(),
            Handshake::Server(s) => s.is_complete(),
        }
    }

    pub fn take_outcome(&mut self) -> Option<Outcome> {
        match self {
            Handshake::Client(c) => c.take_outcome(),
            Handshake::Server(s) => s.take_outcome(),
        }
    }
}

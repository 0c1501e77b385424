//! Server side of the handshake.
//!
//! The server speaks second. On datagram transport the first ClientHello
//! without a valid cookie is answered with a HelloVerifyRequest and
//! forgotten, so no state is kept for unverified peers.

use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::{complete_kx, psk_premaster, start_kx, verify_peer_chain};
use super::{Ctx, Out, Outcome, Params, RenegotiationInfo, SigHashSet};
use crate::buffer::Buf;
use crate::crypto::hash::{digest, hmac};
use crate::crypto::SigningKey;
use crate::flight::HandshakeMessage;
use crate::message::{encode_message, Certificate, CertificateRequest, ClientHello};
use crate::message::{ClientKeyExchange, DigitallySigned, EcdheParams, Extensions};
use crate::message::{HelloVerifyRequest, MessageType, ServerHello, ServerKeyExchange};
use crate::message::{CERT_TYPE_ECDSA_SIGN, COMPRESSION_NULL, POINT_FORMAT_UNCOMPRESSED};
use crate::rng::SeededRng;
use crate::transform::Transform;
use crate::types::{AlertDescription, CipherSuite, HashAlgorithm, KeyExchange, NamedGroup};
use crate::types::{ProtocolVersion, Role, SignatureAlgorithm, SignatureAndHash};
use crate::types::TransportKind;
use crate::util::parse_all;
use crate::{Config, Error};

const COOKIE_SECRET_LEN: usize = 32;
const SESSION_ID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    AwaitClientCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitClientCcs,
    AwaitClientFinished,
    Complete,
}

pub(crate) struct ServerHandshake {
    state: State,
    params: Params,
    renegotiation: Option<RenegotiationInfo>,
    cookie_secret: [u8; COOKIE_SECRET_LEN],
    /// Write keys for our Finished after a full handshake.
    write_transform: Option<Arc<Transform>>,
    outcome: Option<Outcome>,
}

impl std::fmt::Debug for ServerHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandshake")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("renegotiation", &self.renegotiation.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.cookie_secret);
    }
}

/// What the ClientHello resolved to.
struct Selected {
    suite: CipherSuite,
    group: Option<NamedGroup>,
}

impl ServerHandshake {
    pub fn new(
        kind: TransportKind,
        renegotiation: Option<RenegotiationInfo>,
        rng: &mut SeededRng,
    ) -> Self {
        let mut cookie_secret = [0; COOKIE_SECRET_LEN];
        rng.fill(&mut cookie_secret);
        ServerHandshake {
            state: State::AwaitClientHello,
            params: Params::new(kind),
            renegotiation,
            cookie_secret,
            write_transform: None,
            outcome: None,
        }
    }

    fn set_state(&mut self, next: State) {
        trace!("Server {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn key_exchange(&self) -> Result<KeyExchange, Error> {
        let suite = self.params.suite()?;
        suite
            .key_exchange()
            .ok_or_else(|| Error::Unavailable(format!("cipher suite {:?}", suite)))
    }

    pub fn handle_message(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        match (self.state, msg.msg_type) {
            (State::AwaitClientHello, MessageType::ClientHello) => self.on_client_hello(ctx, msg),
            (State::AwaitClientCertificate, MessageType::Certificate) => {
                self.on_certificate(ctx, msg)
            }
            (State::AwaitClientKeyExchange, MessageType::ClientKeyExchange) => {
                self.on_client_key_exchange(ctx, msg)
            }
            (State::AwaitCertificateVerify, MessageType::CertificateVerify) => {
                self.on_certificate_verify(ctx, msg)
            }
            (State::AwaitClientFinished, MessageType::Finished) => self.on_finished(ctx, msg),
            (state, msg_type) => Err(Error::unexpected(format!(
                "{:?} while in {:?}",
                msg_type, state
            ))),
        }
    }

    fn check_client_version(&self, version: ProtocolVersion) -> Result<(), Error> {
        // DTLS versions count downwards.
        let ok = match self.params.kind() {
            TransportKind::Stream => version.as_u16() >= ProtocolVersion::TLS1_2.as_u16(),
            TransportKind::Datagram => version.as_u16() <= ProtocolVersion::DTLS1_2.as_u16(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::violation(
                AlertDescription::ProtocolVersion,
                format!("client version {}", version),
            ))
        }
    }

    fn cookie(&self, hello: &ClientHello) -> Result<Buf, Error> {
        let mut input = Buf::new();
        hello.cookie_input(&mut input);
        hmac(HashAlgorithm::SHA256, &self.cookie_secret, &[&input[..]])
    }

    /// Whether the hello must first prove it can receive at its address.
    fn needs_cookie(&self, config: &Config, hello: &ClientHello) -> Result<bool, Error> {
        if !self.params.kind().is_datagram()
            || !config.dtls_cookies()
            || self.renegotiation.is_some()
        {
            return Ok(false);
        }
        let expected = self.cookie(hello)?;
        Ok(hello.cookie.is_empty() || !bool::from(expected[..].ct_eq(&hello.cookie[..])))
    }

    fn send_hello_verify_request(
        &mut self,
        ctx: &mut Ctx,
        hello: &ClientHello,
        message_seq: u16,
    ) -> Result<(), Error> {
        let hvr = HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_0,
            cookie: self.cookie(hello)?.to_vec(),
        };
        let mut body = Buf::new();
        hvr.serialize(&mut body);
        let raw = encode_message(
            self.params.kind(),
            MessageType::HelloVerifyRequest,
            message_seq,
            &body,
        );
        ctx.out.items.push(Out::Message(raw));
        ctx.out.stateless = true;
        debug!("Sent HelloVerifyRequest");
        Ok(())
    }

    fn on_client_hello(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        let kind = self.params.kind();
        let hello = parse_all(msg.body(), "ClientHello", |i| ClientHello::parse(i, kind))?;
        let config = ctx.config;

        self.check_client_version(hello.client_version)?;
        if !hello.compression_methods.contains(&COMPRESSION_NULL) {
            return Err(Error::illegal_parameter("null compression not offered"));
        }

        if self.needs_cookie(config, &hello)? {
            return self.send_hello_verify_request(ctx, &hello, msg.message_seq);
        }

        self.params.set_send_seq(msg.message_seq);
        self.params.receive(msg);
        self.params.client_random = hello.random;

        let scsv = hello
            .cipher_suites
            .contains(&CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);
        let info = &hello.extensions.renegotiation_info;
        self.params.secure_renegotiation = match &self.renegotiation {
            None => {
                if info.as_ref().map(|i| !i.is_empty()).unwrap_or(false) {
                    return Err(Error::handshake_failure(
                        "renegotiation_info not empty on initial handshake",
                    ));
                }
                scsv || info.is_some()
            }
            Some(prev) => {
                if scsv {
                    return Err(Error::handshake_failure("SCSV during renegotiation"));
                }
                if info.as_deref() != Some(&prev.client_verify[..]) {
                    return Err(Error::handshake_failure("renegotiation_info mismatch"));
                }
                true
            }
        };

        self.params.sig_hashes = SigHashSet::from_offered(
            hello
                .extensions
                .signature_algorithms
                .as_deref()
                .unwrap_or(&[]),
        );
        self.params.extended_master_secret =
            config.extended_master_secret() && hello.extensions.extended_master_secret;
        ctx.rng.fill(&mut self.params.server_random);

        if self.try_resume(ctx, &hello)? {
            return Ok(());
        }

        let selected = select(config, &hello)?;
        self.params.suite = Some(selected.suite);
        self.params.session_id = match config.session_cache() {
            Some(_) => {
                let mut id = vec![0; SESSION_ID_LEN];
                ctx.rng.fill(&mut id);
                id
            }
            None => Vec::new(),
        };
        debug!(
            "Selected {:?} group {:?} (extended master secret: {})",
            selected.suite, selected.group, self.params.extended_master_secret
        );

        self.send_server_hello(ctx, &hello)?;
        self.send_full_flight(ctx, &hello, selected)
    }

    /// Abbreviated handshake from the session cache.
    fn try_resume(&mut self, ctx: &mut Ctx, hello: &ClientHello) -> Result<bool, Error> {
        let config = ctx.config;
        let Some(cache) = config.session_cache() else {
            return Ok(false);
        };
        if hello.session_id.is_empty() {
            return Ok(false);
        }
        let Some(saved) = cache.get(&hello.session_id) else {
            trace!("Session id not in cache");
            return Ok(false);
        };
        // RFC 7627 5.3: a session bound to the extended master secret never
        // resumes without it.
        if saved.extended_master_secret && !hello.extensions.extended_master_secret {
            return Err(Error::handshake_failure(
                "extended master secret missing on resumption",
            ));
        }
        // A legacy session is not resumed under the extended master secret.
        if !hello.cipher_suites.contains(&saved.suite)
            || !config.cipher_suites().contains(&saved.suite)
            || saved.extended_master_secret != self.params.extended_master_secret
        {
            debug!("Cached session not resumable, doing a full handshake");
            return Ok(false);
        }

        debug!("Resuming session with {:?}", saved.suite);
        self.params.suite = Some(saved.suite);
        self.params.session_id = saved.id.clone();
        self.params.master = Buf::from_slice(&saved.master);
        self.params.resumed = true;

        self.send_server_hello(ctx, hello)?;
        let transform = self.params.derive_transform(config, Role::Server)?;
        self.params.pending_read = Some(transform.clone());
        self.params
            .send_ccs_finished(ctx.out, transform, Role::Server)?;
        self.set_state(State::AwaitClientCcs);
        Ok(true)
    }

    fn send_server_hello(&mut self, ctx: &mut Ctx, hello: &ClientHello) -> Result<(), Error> {
        let suite = self.params.suite()?;
        let uses_ecdhe = suite.key_exchange().map(|k| k.uses_ecdhe()).unwrap_or(false);

        let renegotiation_info = match (&self.renegotiation, self.params.secure_renegotiation) {
            (_, false) => None,
            (None, true) => Some(Vec::new()),
            (Some(prev), true) => Some(prev.both()),
        };
        let sh = ServerHello {
            server_version: self.params.kind().version(),
            random: self.params.server_random,
            session_id: self.params.session_id.clone(),
            cipher_suite: suite,
            compression_method: COMPRESSION_NULL,
            extensions: Extensions {
                server_name: None,
                supported_groups: None,
                ec_point_formats: (uses_ecdhe && hello.extensions.ec_point_formats.is_some())
                    .then(|| vec![POINT_FORMAT_UNCOMPRESSED]),
                signature_algorithms: None,
                extended_master_secret: self.params.extended_master_secret,
                renegotiation_info,
            },
        };
        let mut body = Buf::new();
        sh.serialize(&mut body);
        self.params.send(ctx.out, MessageType::ServerHello, &body);
        Ok(())
    }

    fn send_full_flight(
        &mut self,
        ctx: &mut Ctx,
        hello: &ClientHello,
        selected: Selected,
    ) -> Result<(), Error> {
        let config = ctx.config;
        let kx = self.key_exchange()?;

        let mut signer: Option<Arc<dyn SigningKey>> = None;
        if kx.uses_certificate() {
            let entry = config
                .key_certs()
                .select(hello.extensions.server_name.as_deref())
                .ok_or_else(|| Error::handshake_failure("no certificate configured"))?;
            let mut body = Buf::new();
            Certificate {
                chain: entry.chain.clone(),
            }
            .serialize(&mut body);
            self.params.send(ctx.out, MessageType::Certificate, &body);
            signer = Some(entry.key.clone());
        }

        let hint = config.psk().and_then(|p| p.hint()).map(<[u8]>::to_vec);
        let mut ske = ServerKeyExchange {
            psk_hint: None,
            params: None,
            signature: None,
        };
        if kx.uses_psk() {
            ske.psk_hint = Some(hint.clone().unwrap_or_default());
        }
        if kx.uses_ecdhe() {
            let group = selected
                .group
                .ok_or_else(|| Error::handshake_failure("no common group"))?;
            let active = start_kx(config, group)?;
            let params = EcdheParams {
                group,
                public: active.pub_key().to_vec(),
            };
            self.params.kx = Some(active);

            if let Some(key) = &signer {
                let hash = self.params.sig_hashes.find_or_default(SignatureAlgorithm::ECDSA);
                let mut encoded = Buf::new();
                params.serialize(&mut encoded);
                let d = digest(
                    hash,
                    &[
                        &self.params.client_random[..],
                        &self.params.server_random[..],
                        &encoded[..],
                    ],
                )?;
                let signature = key.sign_digest(&d).map_err(Error::CryptoError)?;
                ske.signature = Some(DigitallySigned {
                    algorithm: SignatureAndHash::new(hash, SignatureAlgorithm::ECDSA),
                    signature,
                });
            }
            ske.params = Some(params);
        }
        // Plain PSK sends ServerKeyExchange only to carry a hint.
        if kx != KeyExchange::Psk || hint.is_some() {
            let mut body = Buf::new();
            ske.serialize(&mut body);
            self.params.send(ctx.out, MessageType::ServerKeyExchange, &body);
        }

        let request_certificate = config.require_client_certificate() && kx.uses_certificate();
        if request_certificate {
            let request = CertificateRequest {
                certificate_types: vec![CERT_TYPE_ECDSA_SIGN],
                signature_algorithms: SignatureAndHash::supported().to_vec(),
                authorities: Vec::new(),
            };
            let mut body = Buf::new();
            request.serialize(&mut body);
            self.params.send(ctx.out, MessageType::CertificateRequest, &body);
        }

        self.params.send(ctx.out, MessageType::ServerHelloDone, &[]);

        if request_certificate {
            self.set_state(State::AwaitClientCertificate);
        } else {
            self.set_state(State::AwaitClientKeyExchange);
        }
        Ok(())
    }

    fn on_certificate(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.receive(msg);
        let certificate = parse_all(msg.body(), "Certificate", Certificate::parse)?;
        if certificate.chain.is_empty() {
            if ctx.config.require_client_certificate() {
                return Err(Error::handshake_failure("client sent no certificate"));
            }
        } else {
            verify_peer_chain(
                ctx.config,
                &certificate.chain,
                Role::Client,
                self.params.suite()?,
            )?;
            self.params.peer_certificates = certificate.chain;
        }
        self.set_state(State::AwaitClientKeyExchange);
        Ok(())
    }

    fn on_client_key_exchange(
        &mut self,
        ctx: &mut Ctx,
        msg: &HandshakeMessage,
    ) -> Result<(), Error> {
        self.params.receive(msg);
        let config = ctx.config;
        let kx = self.key_exchange()?;
        let cke = parse_all(msg.body(), "ClientKeyExchange", |i| {
            ClientKeyExchange::parse(i, kx)
        })?;

        let psk = match (&cke.psk_identity, config.psk()) {
            (None, _) => None,
            (Some(identity), Some(psk)) if identity[..] == *psk.identity() => Some(psk),
            (Some(_), _) => {
                return Err(Error::violation(
                    AlertDescription::UnknownPskIdentity,
                    "unknown PSK identity",
                ))
            }
        };

        let shared = match &cke.public {
            Some(public) => Some(complete_kx(self.params.kx.take(), public)?),
            None => None,
        };
        self.params.premaster = match (shared, psk) {
            (Some(shared), Some(psk)) => psk_premaster(Some(&shared), psk.key()),
            (Some(shared), None) => shared,
            (None, Some(psk)) => psk_premaster(None, psk.key()),
            (None, None) => return Err(Error::decode("empty ClientKeyExchange")),
        };
        self.params.compute_master()?;

        let transform = self.params.derive_transform(config, Role::Server)?;
        self.params.pending_read = Some(transform.clone());
        self.write_transform = Some(transform);

        if self.params.peer_certificates.is_empty() {
            self.set_state(State::AwaitClientCcs);
        } else {
            self.set_state(State::AwaitCertificateVerify);
        }
        Ok(())
    }

    fn on_certificate_verify(
        &mut self,
        ctx: &mut Ctx,
        msg: &HandshakeMessage,
    ) -> Result<(), Error> {
        let signed = parse_all(msg.body(), "CertificateVerify", DigitallySigned::parse)?;
        let alg = signed.algorithm;
        if !SignatureAndHash::supported().contains(&alg) {
            return Err(Error::illegal_parameter(format!(
                "signature algorithm {:?}",
                alg
            )));
        }
        let Some(leaf) = self.params.peer_certificates.first() else {
            return Err(Error::unexpected("CertificateVerify without a certificate"));
        };
        // Signed over every message before this one.
        let d = self.params.transcript_digest(alg.hash)?;
        ctx.config
            .crypto_provider()
            .signature_verification
            .verify_digest(leaf, &d, &signed.signature, alg.hash, alg.signature)
            .map_err(|e| {
                debug!("CertificateVerify rejected: {}", e);
                Error::AuthenticationFailed
            })?;

        self.params.receive(msg);
        self.set_state(State::AwaitClientCcs);
        Ok(())
    }

    pub fn expects_ccs(&self) -> bool {
        self.state == State::AwaitClientCcs
    }

    pub fn handle_ccs(&mut self) -> Result<Arc<Transform>, Error> {
        if self.state != State::AwaitClientCcs {
            return Err(Error::unexpected(format!(
                "ChangeCipherSpec while in {:?}",
                self.state
            )));
        }
        let transform = self.params.pending_read.take().ok_or_else(|| {
            Error::violation(AlertDescription::InternalError, "no pending read keys")
        })?;
        self.set_state(State::AwaitClientFinished);
        Ok(transform)
    }

    fn on_finished(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.check_finished(msg, Role::Client)?;

        if !self.params.resumed {
            let transform = self.write_transform.take().ok_or_else(|| {
                Error::violation(AlertDescription::InternalError, "no pending write keys")
            })?;
            self.params
                .send_ccs_finished(ctx.out, transform, Role::Server)?;
            ctx.out.is_final = true;
        }

        let outcome = self.params.outcome()?;
        if !self.params.resumed && !outcome.session.id.is_empty() {
            if let Some(cache) = ctx.config.session_cache() {
                cache.put(outcome.session.clone());
            }
        }
        self.outcome = Some(outcome);
        self.set_state(State::Complete);
        Ok(())
    }

    pub fn awaiting_hello(&self) -> bool {
        self.state == State::AwaitClientHello
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }
}

/// Pick the cipher suite in our preference order, and the group if the
/// suite needs one.
fn select(config: &Config, hello: &ClientHello) -> Result<Selected, Error> {
    let point_ok = hello
        .extensions
        .ec_point_formats
        .as_ref()
        .map(|f| f.contains(&POINT_FORMAT_UNCOMPRESSED))
        .unwrap_or(true);
    let group = match &hello.extensions.supported_groups {
        Some(offered) => config
            .groups()
            .iter()
            .copied()
            .find(|g| offered.contains(g)),
        None => config.groups().first().copied(),
    };

    for &suite in config.cipher_suites() {
        if !hello.cipher_suites.contains(&suite) {
            continue;
        }
        let Some(kx) = suite.key_exchange() else {
            continue;
        };
        if kx.uses_ecdhe() && (group.is_none() || !point_ok) {
            continue;
        }
        if kx.uses_certificate() && config.key_certs().is_empty() {
            continue;
        }
        if kx.uses_psk() && config.psk().is_none() {
            continue;
        }
        return Ok(Selected {
            suite,
            group: if kx.uses_ecdhe() { group } else { None },
        });
    }
    Err(Error::handshake_failure("no shared cipher suite"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{MemorySessionCache, Outbox, SavedSession, SessionCache};

    fn hello(kind: TransportKind, suites: Vec<CipherSuite>) -> ClientHello {
        ClientHello {
            client_version: kind.version(),
            random: [5; 32],
            session_id: Vec::new(),
            cookie: Vec::new(),
            cipher_suites: suites,
            compression_methods: vec![COMPRESSION_NULL],
            extensions: Extensions {
                renegotiation_info: Some(Vec::new()),
                ..Extensions::default()
            },
        }
    }

    fn message(kind: TransportKind, seq: u16, hello: &ClientHello) -> HandshakeMessage {
        let mut body = Buf::new();
        hello.serialize(kind, &mut body);
        let raw = encode_message(kind, MessageType::ClientHello, seq, &body);
        HandshakeMessage::new(kind, MessageType::ClientHello, seq, raw)
    }

    fn types(out: &Outbox, kind: TransportKind) -> Vec<MessageType> {
        out.items
            .iter()
            .filter_map(|o| match o {
                Out::Message(m) => {
                    Some(crate::message::Header::parse(m, kind).unwrap().1.msg_type)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn cookie_exchange_is_stateless() {
        let kind = TransportKind::Datagram;
        let config = Config::builder(kind).psk(b"id", b"secret").build().unwrap();
        let mut rng = SeededRng::new(Some(3));
        let mut hs = ServerHandshake::new(kind, None, &mut rng);

        let mut ch = hello(kind, vec![CipherSuite::PSK_AES128_GCM_SHA256]);
        let mut out = Outbox::default();
        hs.handle_message(
            &mut Ctx {
                config: &config,
                rng: &mut rng,
                out: &mut out,
            },
            &message(kind, 0, &ch),
        )
        .unwrap();
        assert!(out.stateless);
        assert_eq!(types(&out, kind), vec![MessageType::HelloVerifyRequest]);
        assert!(hs.awaiting_hello());

        ch.cookie = hs.cookie(&ch).unwrap().to_vec();
        let mut out = Outbox::default();
        hs.handle_message(
            &mut Ctx {
                config: &config,
                rng: &mut rng,
                out: &mut out,
            },
            &message(kind, 1, &ch),
        )
        .unwrap();
        assert!(!out.stateless);
        assert_eq!(
            types(&out, kind),
            vec![MessageType::ServerHello, MessageType::ServerHelloDone]
        );
        assert!(!hs.awaiting_hello());
    }

    #[test]
    fn rejects_without_shared_suite() {
        let kind = TransportKind::Stream;
        let config = Config::builder(kind).build().unwrap();
        let mut rng = SeededRng::new(Some(4));
        let mut hs = ServerHandshake::new(kind, None, &mut rng);
        let ch = hello(kind, vec![CipherSuite::PSK_AES128_GCM_SHA256]);
        let mut out = Outbox::default();
        let err = hs
            .handle_message(
                &mut Ctx {
                    config: &config,
                    rng: &mut rng,
                    out: &mut out,
                },
                &message(kind, 0, &ch),
            )
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
    }

    #[test]
    fn rejects_old_stream_version() {
        let kind = TransportKind::Stream;
        let config = Config::builder(kind).psk(b"id", b"secret").build().unwrap();
        let mut rng = SeededRng::new(Some(5));
        let mut hs = ServerHandshake::new(kind, None, &mut rng);
        let mut ch = hello(kind, vec![CipherSuite::PSK_AES128_GCM_SHA256]);
        ch.client_version = ProtocolVersion::TLS1_0;
        let mut out = Outbox::default();
        let err = hs
            .handle_message(
                &mut Ctx {
                    config: &config,
                    rng: &mut rng,
                    out: &mut out,
                },
                &message(kind, 0, &ch),
            )
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::ProtocolVersion));
    }

    fn resuming(ems_session: bool, ems_hello: bool) -> (Result<(), Error>, Outbox) {
        let kind = TransportKind::Stream;
        let cache = Arc::new(MemorySessionCache::new(4));
        cache.put(SavedSession {
            id: vec![1; 32],
            suite: CipherSuite::PSK_AES128_GCM_SHA256,
            master: zeroize::Zeroizing::new(vec![7; 48]),
            extended_master_secret: ems_session,
        });
        let config = Config::builder(kind)
            .psk(b"id", b"secret")
            .session_cache(cache)
            .build()
            .unwrap();
        let mut rng = SeededRng::new(Some(7));
        let mut hs = ServerHandshake::new(kind, None, &mut rng);
        let mut ch = hello(kind, vec![CipherSuite::PSK_AES128_GCM_SHA256]);
        ch.session_id = vec![1; 32];
        ch.extensions.extended_master_secret = ems_hello;
        let mut out = Outbox::default();
        let result = hs.handle_message(
            &mut Ctx {
                config: &config,
                rng: &mut rng,
                out: &mut out,
            },
            &message(kind, 0, &ch),
        );
        (result, out)
    }

    #[test]
    fn resumption_without_extended_master_secret_aborts() {
        let (result, _) = resuming(true, false);
        let err = result.unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
    }

    #[test]
    fn legacy_session_gets_full_handshake_under_extended_master_secret() {
        let (result, out) = resuming(false, true);
        result.unwrap();
        assert_eq!(
            types(&out, TransportKind::Stream),
            vec![MessageType::ServerHello, MessageType::ServerHelloDone]
        );
    }

    #[test]
    fn matching_session_resumes() {
        let (result, out) = resuming(true, true);
        result.unwrap();
        assert!(out.items.iter().any(|o| matches!(o, Out::ChangeCipherSpec)));
        assert_eq!(types(&out, TransportKind::Stream)[0], MessageType::ServerHello);
        assert!(!types(&out, TransportKind::Stream).contains(&MessageType::ServerHelloDone));
    }

    #[test]
    fn renegotiation_requires_matching_info() {
        let kind = TransportKind::Stream;
        let config = Config::builder(kind).psk(b"id", b"secret").build().unwrap();
        let mut rng = SeededRng::new(Some(6));
        let prev = RenegotiationInfo {
            client_verify: vec![1; 12],
            server_verify: vec![2; 12],
        };
        let mut hs = ServerHandshake::new(kind, Some(prev), &mut rng);
        let ch = hello(kind, vec![CipherSuite::PSK_AES128_GCM_SHA256]);
        let mut out = Outbox::default();
        let err = hs
            .handle_message(
                &mut Ctx {
                    config: &config,
                    rng: &mut rng,
                    out: &mut out,
                },
                &message(kind, 0, &ch),
            )
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
    }
}

//! Client side of the handshake.
//!
//! ```text
//! ClientHello            -->
//!                        <--  HelloVerifyRequest (datagram, optional)
//! ClientHello + cookie   -->
//!                        <--  ServerHello
//!                             Certificate*
//!                             ServerKeyExchange*
//!                             CertificateRequest*
//!                             ServerHelloDone
//! Certificate*
//! ClientKeyExchange
//! CertificateVerify*
//! [ChangeCipherSpec]
//! Finished               -->
//!                        <--  [ChangeCipherSpec]
//!                             Finished
//! ```
//!
//! On resumption the server answers ServerHello with its ChangeCipherSpec
//! and Finished right away and the client closes with its own.

use std::sync::Arc;

use super::{complete_kx, psk_premaster, start_kx, verify_peer_chain};
use super::{Ctx, Outcome, Params, RenegotiationInfo, SavedSession, SigHashSet};
use crate::buffer::Buf;
use crate::crypto::hash::digest;
use crate::flight::HandshakeMessage;
use crate::message::{Certificate, CertificateRequest, ClientHello, ClientKeyExchange};
use crate::message::{DigitallySigned, Extensions, HelloVerifyRequest, MessageType};
use crate::message::{ServerHello, ServerKeyExchange};
use crate::message::{CERT_TYPE_ECDSA_SIGN, COMPRESSION_NULL, POINT_FORMAT_UNCOMPRESSED};
use crate::transform::Transform;
use crate::types::{AlertDescription, CipherSuite, KeyExchange, NamedGroup, ProtocolVersion};
use crate::types::{Role, SignatureAlgorithm, SignatureAndHash, TransportKind};
use crate::util::parse_all;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitServerHelloDone,
    AwaitServerCcs,
    AwaitServerFinished,
    Complete,
}

#[derive(Debug)]
pub(crate) struct ClientHandshake {
    state: State,
    params: Params,
    /// Our last ClientHello, resent with the cookie.
    hello: Option<ClientHello>,
    offered_session: Option<SavedSession>,
    renegotiation: Option<RenegotiationInfo>,
    server_point: Option<(NamedGroup, Vec<u8>)>,
    certificate_request: Option<CertificateRequest>,
    /// Resumption: the write keys, switched to after the server's Finished.
    write_transform: Option<Arc<Transform>>,
    outcome: Option<Outcome>,
}

impl ClientHandshake {
    pub fn new(
        kind: TransportKind,
        offered_session: Option<SavedSession>,
        renegotiation: Option<RenegotiationInfo>,
    ) -> Self {
        ClientHandshake {
            state: State::SendClientHello,
            params: Params::new(kind),
            hello: None,
            offered_session,
            renegotiation,
            server_point: None,
            certificate_request: None,
            write_transform: None,
            outcome: None,
        }
    }

    fn set_state(&mut self, next: State) {
        trace!("Client {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn key_exchange(&self) -> Result<KeyExchange, Error> {
        let suite = self.params.suite()?;
        suite
            .key_exchange()
            .ok_or_else(|| Error::Unavailable(format!("cipher suite {:?}", suite)))
    }

    pub fn start(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
        if self.state != State::SendClientHello {
            return Err(Error::violation(
                AlertDescription::InternalError,
                "client handshake already started",
            ));
        }
        let config = ctx.config;
        let has_psk = config.psk().is_some();
        let has_groups = !config.groups().is_empty();

        let suites: Vec<CipherSuite> = config
            .cipher_suites()
            .iter()
            .copied()
            .filter(|s| match s.key_exchange() {
                Some(kx) => (has_psk || !kx.uses_psk()) && (has_groups || !kx.uses_ecdhe()),
                None => false,
            })
            .collect();
        if suites.is_empty() {
            return Err(Error::Unavailable(
                "no cipher suite usable with this configuration".to_string(),
            ));
        }
        let offers_ecdhe = suites
            .iter()
            .any(|s| s.key_exchange().map(|kx| kx.uses_ecdhe()).unwrap_or(false));

        let session_id = match &self.offered_session {
            Some(s) if !s.id.is_empty() && suites.contains(&s.suite) => s.id.clone(),
            _ => {
                self.offered_session = None;
                Vec::new()
            }
        };

        ctx.rng.fill(&mut self.params.client_random);

        let renegotiation_info = match &self.renegotiation {
            Some(r) => r.client_verify.clone(),
            None => Vec::new(),
        };
        let extensions = Extensions {
            server_name: config.server_name().map(str::to_string),
            supported_groups: offers_ecdhe.then(|| config.groups().to_vec()),
            ec_point_formats: offers_ecdhe.then(|| vec![POINT_FORMAT_UNCOMPRESSED]),
            signature_algorithms: Some(SignatureAndHash::supported().to_vec()),
            extended_master_secret: config.extended_master_secret(),
            renegotiation_info: Some(renegotiation_info),
        };

        let hello = ClientHello {
            client_version: self.params.kind().version(),
            random: self.params.client_random,
            session_id,
            cookie: Vec::new(),
            cipher_suites: suites,
            compression_methods: vec![COMPRESSION_NULL],
            extensions,
        };
        self.send_hello(ctx, hello);
        self.set_state(State::AwaitServerHello);
        Ok(())
    }

    fn send_hello(&mut self, ctx: &mut Ctx, hello: ClientHello) {
        let mut body = Buf::new();
        hello.serialize(self.params.kind(), &mut body);
        self.params.send(ctx.out, MessageType::ClientHello, &body);
        self.hello = Some(hello);
    }

    pub fn handle_message(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        let skips_key_exchange = self.params.suite.and_then(|s| s.key_exchange())
            == Some(KeyExchange::Psk);

        match (self.state, msg.msg_type) {
            (State::AwaitServerHello, MessageType::HelloVerifyRequest) => {
                self.on_hello_verify_request(ctx, msg)
            }
            (State::AwaitServerHello, MessageType::ServerHello) => self.on_server_hello(ctx, msg),
            (State::AwaitCertificate, MessageType::Certificate) => self.on_certificate(ctx, msg),
            (State::AwaitServerKeyExchange, MessageType::ServerKeyExchange) => {
                self.on_server_key_exchange(ctx, msg)
            }
            // A plain PSK server without an identity hint skips ServerKeyExchange.
            (
                State::AwaitServerKeyExchange,
                MessageType::CertificateRequest | MessageType::ServerHelloDone,
            ) if skips_key_exchange => {
                self.set_state(State::AwaitServerHelloDone);
                self.handle_message(ctx, msg)
            }
            (State::AwaitServerHelloDone, MessageType::CertificateRequest) => {
                self.on_certificate_request(msg)
            }
            (State::AwaitServerHelloDone, MessageType::ServerHelloDone) => {
                self.on_server_hello_done(ctx, msg)
            }
            (State::AwaitServerFinished, MessageType::Finished) => self.on_finished(ctx, msg),
            (state, msg_type) => Err(Error::unexpected(format!(
                "{:?} while in {:?}",
                msg_type, state
            ))),
        }
    }

    fn on_hello_verify_request(
        &mut self,
        ctx: &mut Ctx,
        msg: &HandshakeMessage,
    ) -> Result<(), Error> {
        if !self.params.kind().is_datagram() {
            return Err(Error::unexpected("HelloVerifyRequest on a stream"));
        }
        let hvr = parse_all(msg.body(), "HelloVerifyRequest", HelloVerifyRequest::parse)?;
        if !matches!(
            hvr.server_version,
            ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2
        ) {
            return Err(Error::violation(
                AlertDescription::ProtocolVersion,
                format!("HelloVerifyRequest version {}", hvr.server_version),
            ));
        }
        if hvr.cookie.is_empty() {
            return Err(Error::illegal_parameter("empty cookie"));
        }
        let Some(mut hello) = self.hello.take() else {
            return Err(Error::violation(
                AlertDescription::InternalError,
                "no ClientHello to repeat",
            ));
        };
        if !hello.cookie.is_empty() {
            return Err(Error::unexpected("second HelloVerifyRequest"));
        }

        debug!("Repeating ClientHello with {} byte cookie", hvr.cookie.len());
        hello.cookie = hvr.cookie;
        // The first ClientHello and the HelloVerifyRequest are not hashed.
        self.params.reset_transcript();
        self.send_hello(ctx, hello);
        Ok(())
    }

    fn on_server_hello(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.receive(msg);
        let sh = parse_all(msg.body(), "ServerHello", ServerHello::parse)?;

        if sh.server_version != self.params.kind().version() {
            return Err(Error::violation(
                AlertDescription::ProtocolVersion,
                format!("server version {}", sh.server_version),
            ));
        }

        let (offered_suite, offered_ems) = match &self.hello {
            Some(h) => (
                h.cipher_suites.contains(&sh.cipher_suite),
                h.extensions.extended_master_secret,
            ),
            None => (false, false),
        };
        if !offered_suite || !sh.cipher_suite.is_supported() {
            return Err(Error::illegal_parameter(format!(
                "server chose {:?} which was not offered",
                sh.cipher_suite
            )));
        }
        if sh.compression_method != COMPRESSION_NULL {
            return Err(Error::illegal_parameter("compression"));
        }
        if sh.extensions.extended_master_secret && !offered_ems {
            return Err(Error::violation(
                AlertDescription::HandshakeFailure,
                "unsolicited extended_master_secret",
            ));
        }

        self.params.secure_renegotiation =
            match (&self.renegotiation, &sh.extensions.renegotiation_info) {
                (None, None) => false,
                (None, Some(info)) if info.is_empty() => true,
                (None, Some(_)) => {
                    return Err(Error::handshake_failure(
                        "renegotiation_info not empty on initial handshake",
                    ))
                }
                (Some(prev), Some(info)) if *info == prev.both() => true,
                (Some(_), _) => {
                    return Err(Error::handshake_failure("renegotiation_info mismatch"));
                }
            };

        let suite = sh.cipher_suite;
        self.params.suite = Some(suite);
        self.params.server_random = sh.random;
        self.params.session_id = sh.session_id.clone();
        self.params.extended_master_secret = sh.extensions.extended_master_secret;
        debug!(
            "Server chose {:?} (extended master secret: {})",
            suite, self.params.extended_master_secret
        );

        if let Some(saved) = self.offered_session.take() {
            if !sh.session_id.is_empty() && sh.session_id == saved.id {
                if saved.suite != suite {
                    return Err(Error::illegal_parameter(
                        "resumed session with a different cipher suite",
                    ));
                }
                if saved.extended_master_secret != self.params.extended_master_secret {
                    return Err(Error::handshake_failure(
                        "extended master secret changed on resumption",
                    ));
                }
                debug!("Resuming session");
                self.params.master = Buf::from_slice(&saved.master);
                self.params.resumed = true;
                let transform = self.params.derive_transform(ctx.config, Role::Client)?;
                self.params.pending_read = Some(transform.clone());
                self.write_transform = Some(transform);
                self.set_state(State::AwaitServerCcs);
                return Ok(());
            }
        }

        if self.key_exchange()?.uses_certificate() {
            self.set_state(State::AwaitCertificate);
        } else {
            self.set_state(State::AwaitServerKeyExchange);
        }
        Ok(())
    }

    fn on_certificate(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.receive(msg);
        let certificate = parse_all(msg.body(), "Certificate", Certificate::parse)?;
        if certificate.chain.is_empty() {
            return Err(Error::handshake_failure("server sent no certificate"));
        }
        verify_peer_chain(
            ctx.config,
            &certificate.chain,
            Role::Server,
            self.params.suite()?,
        )?;
        self.params.peer_certificates = certificate.chain;
        self.set_state(State::AwaitServerKeyExchange);
        Ok(())
    }

    fn on_server_key_exchange(
        &mut self,
        ctx: &mut Ctx,
        msg: &HandshakeMessage,
    ) -> Result<(), Error> {
        self.params.receive(msg);
        let kx = self.key_exchange()?;
        let ske = parse_all(msg.body(), "ServerKeyExchange", |i| {
            ServerKeyExchange::parse(i, kx)
        })?;

        if let Some(params) = &ske.params {
            if !ctx.config.groups().contains(&params.group) {
                return Err(Error::illegal_parameter(format!(
                    "server chose group {:?} which was not offered",
                    params.group
                )));
            }
        }

        if kx.uses_certificate() {
            let (Some(params), Some(signed)) = (&ske.params, &ske.signature) else {
                return Err(Error::decode("ServerKeyExchange without signed params"));
            };
            let alg = signed.algorithm;
            if !SignatureAndHash::supported().contains(&alg) {
                return Err(Error::illegal_parameter(format!(
                    "signature algorithm {:?}",
                    alg
                )));
            }
            let Some(leaf) = self.params.peer_certificates.first() else {
                return Err(Error::unexpected("ServerKeyExchange before Certificate"));
            };

            let mut encoded = Buf::new();
            params.serialize(&mut encoded);
            let d = digest(
                alg.hash,
                &[
                    &self.params.client_random[..],
                    &self.params.server_random[..],
                    &encoded[..],
                ],
            )?;
            ctx.config
                .crypto_provider()
                .signature_verification
                .verify_digest(leaf, &d, &signed.signature, alg.hash, alg.signature)
                .map_err(|e| {
                    debug!("ServerKeyExchange signature rejected: {}", e);
                    Error::AuthenticationFailed
                })?;
        }

        if let Some(hint) = &ske.psk_hint {
            trace!("PSK identity hint of {} bytes", hint.len());
        }
        if let Some(params) = ske.params {
            self.server_point = Some((params.group, params.public));
        }
        self.set_state(State::AwaitServerHelloDone);
        Ok(())
    }

    fn on_certificate_request(&mut self, msg: &HandshakeMessage) -> Result<(), Error> {
        if !self.key_exchange()?.uses_certificate() {
            return Err(Error::unexpected("CertificateRequest on a PSK suite"));
        }
        self.params.receive(msg);
        let request = parse_all(msg.body(), "CertificateRequest", CertificateRequest::parse)?;
        self.certificate_request = Some(request);
        Ok(())
    }

    fn on_server_hello_done(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.receive(msg);
        if !msg.body().is_empty() {
            return Err(Error::decode("ServerHelloDone with a body"));
        }
        let config = ctx.config;
        let kx = self.key_exchange()?;

        // Client certificate, possibly an empty chain.
        let mut signer = None;
        if let Some(request) = self.certificate_request.take() {
            let entry = if request.certificate_types.contains(&CERT_TYPE_ECDSA_SIGN) {
                config.key_certs().select(None)
            } else {
                None
            };
            let chain = entry.map(|e| e.chain.clone()).unwrap_or_default();
            let mut body = Buf::new();
            Certificate { chain }.serialize(&mut body);
            self.params.send(ctx.out, MessageType::Certificate, &body);

            if let Some(entry) = entry {
                let hash = SigHashSet::from_offered(&request.signature_algorithms)
                    .find_or_default(SignatureAlgorithm::ECDSA);
                signer = Some((entry.key.clone(), hash));
            }
        }

        let psk = || {
            config
                .psk()
                .ok_or_else(|| Error::handshake_failure("PSK suite without a configured key"))
        };

        let mut cke = ClientKeyExchange {
            psk_identity: None,
            public: None,
        };
        if kx.uses_psk() {
            cke.psk_identity = Some(psk()?.identity().to_vec());
        }
        if kx.uses_ecdhe() {
            let Some((group, point)) = self.server_point.take() else {
                return Err(Error::unexpected("ServerHelloDone before ServerKeyExchange"));
            };
            let active = start_kx(config, group)?;
            cke.public = Some(active.pub_key().to_vec());
            let shared = complete_kx(Some(active), &point)?;
            self.params.premaster = match kx {
                KeyExchange::EcdhePsk => psk_premaster(Some(&shared), psk()?.key()),
                _ => shared,
            };
        } else {
            self.params.premaster = psk_premaster(None, psk()?.key());
        }

        let mut body = Buf::new();
        cke.serialize(&mut body);
        self.params.send(ctx.out, MessageType::ClientKeyExchange, &body);

        self.params.compute_master()?;

        if let Some((key, hash)) = signer {
            let d = self.params.transcript_digest(hash)?;
            let signature = key.sign_digest(&d).map_err(Error::CryptoError)?;
            let signed = DigitallySigned {
                algorithm: SignatureAndHash::new(hash, SignatureAlgorithm::ECDSA),
                signature,
            };
            let mut body = Buf::new();
            signed.serialize(&mut body);
            self.params.send(ctx.out, MessageType::CertificateVerify, &body);
        }

        let transform = self.params.derive_transform(config, Role::Client)?;
        self.params.pending_read = Some(transform.clone());
        self.params.send_ccs_finished(ctx.out, transform, Role::Client)?;
        self.set_state(State::AwaitServerCcs);
        Ok(())
    }

    pub fn expects_ccs(&self) -> bool {
        self.state == State::AwaitServerCcs
    }

    pub fn handle_ccs(&mut self) -> Result<Arc<Transform>, Error> {
        if self.state != State::AwaitServerCcs {
            return Err(Error::unexpected(format!(
                "ChangeCipherSpec while in {:?}",
                self.state
            )));
        }
        let transform = self.params.pending_read.take().ok_or_else(|| {
            Error::violation(AlertDescription::InternalError, "no pending read keys")
        })?;
        self.set_state(State::AwaitServerFinished);
        Ok(transform)
    }

    fn on_finished(&mut self, ctx: &mut Ctx, msg: &HandshakeMessage) -> Result<(), Error> {
        self.params.check_finished(msg, Role::Server)?;

        if self.params.resumed {
            let transform = self.write_transform.take().ok_or_else(|| {
                Error::violation(AlertDescription::InternalError, "no pending write keys")
            })?;
            self.params
                .send_ccs_finished(ctx.out, transform, Role::Client)?;
            ctx.out.is_final = true;
        }

        self.outcome = Some(self.params.outcome()?);
        self.set_state(State::Complete);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }
}

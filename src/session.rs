//! A TLS 1.2 or DTLS 1.2 session over an injected transport.
//!
//! The session is driven entirely by the caller. Every public operation
//! reads what the transport has, advances the handshake, writes what is
//! due and returns. Nothing blocks: "no input yet" comes back as
//! [`Error::WouldBlock`] and retransmission timers are exposed through
//! [`Session::poll_timeout`] and [`Session::handle_timeout`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::Buf;
use crate::flight::{Flight, FlightState, HandshakeMessage, ItemKind, Reassembler};
use crate::handshake::{ClientHandshake, Ctx, Handshake, Out, Outbox, Outcome};
use crate::handshake::{SavedSession, ServerHandshake};
use crate::message::{encode_message, Alert, MessageType, CHANGE_CIPHER_SPEC};
use crate::record::{Record, RecordLayer};
use crate::rng::SeededRng;
use crate::transport::Transport;
use crate::types::{AlertDescription, CipherSuite, ContentType, Role};
use crate::util::parse_all;
use crate::{Config, Error};

/// Where the session stands with respect to renegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegotiationState {
    /// Only the initial handshake has run.
    Initial,
    /// A renegotiation handshake is running.
    InProgress,
    /// The last renegotiation completed or was refused.
    Done,
    /// We sent HelloRequest and wait for the client's ClientHello.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshaking,
    Established,
    Closed,
    Failed,
}

pub struct Session<T: Transport> {
    config: Arc<Config>,
    role: Role,
    record: RecordLayer<T>,
    flight: Flight,
    reassembler: Reassembler,
    handshake: Option<Handshake>,
    rng: SeededRng,
    state: State,
    renegotiation: RenegotiationState,
    established: Option<Outcome>,
    saved_session: Option<SavedSession>,
    app_in: VecDeque<Buf>,
    peer_closed: bool,
    started: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(config: Arc<Config>, role: Role, transport: T) -> Self {
        let kind = config.transport();
        let mut rng = SeededRng::new(config.rng_seed());
        let handshake = match role {
            Role::Client => None,
            Role::Server => Some(Handshake::Server(ServerHandshake::new(kind, None, &mut rng))),
        };
        Session {
            record: RecordLayer::new(&config, transport),
            flight: Flight::new(&config, role),
            reassembler: Reassembler::new(kind, role),
            config,
            role,
            handshake,
            rng,
            state: State::Handshaking,
            renegotiation: RenegotiationState::Initial,
            established: None,
            saved_session: None,
            app_in: VecDeque::new(),
            peer_closed: false,
            started: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Drive the handshake. `Ok(())` once the session is established and no
    /// renegotiation is running, otherwise `Err(WouldBlock)`.
    pub fn handshake(&mut self, now: Instant) -> Result<(), Error> {
        self.check_usable()?;
        let r = self.drive(now);
        self.check(r)?;
        if self.state == State::Established && self.handshake.is_none() {
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    /// Send application data. Returns the number of bytes taken, which is
    /// all of `data`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.check_usable()?;
        if self.state != State::Established {
            return Err(Error::BadInput("handshake not complete"));
        }
        let r = self.write_app_data(data);
        self.check(r)
    }

    fn write_app_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        let epoch = self.record.write_epoch();
        let max = self.record.max_record_payload(epoch);
        for chunk in data.chunks(max) {
            self.record
                .write_record(ContentType::ApplicationData, epoch, chunk)?;
        }
        self.flush_quiet()?;
        Ok(data.len())
    }

    /// Read application data into `buf`.
    ///
    /// Also advances any handshake in progress. `Err(WouldBlock)` when
    /// nothing is available, `Err(ConnectionClosed)` after the peer's
    /// close_notify.
    pub fn read(&mut self, buf: &mut [u8], now: Instant) -> Result<usize, Error> {
        self.check_usable()?;
        if let Some(n) = self.take_app_data(buf) {
            return Ok(n);
        }
        let r = self.drive(now);
        self.check(r)?;
        if let Some(n) = self.take_app_data(buf) {
            return Ok(n);
        }
        if self.peer_closed {
            self.state = State::Closed;
            return Err(Error::ConnectionClosed);
        }
        Err(Error::WouldBlock)
    }

    fn take_app_data(&mut self, buf: &mut [u8]) -> Option<usize> {
        let front = self.app_in.front_mut()?;
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        if n == front.len() {
            self.app_in.pop_front();
        } else {
            front.consume(n);
        }
        Some(n)
    }

    /// Push buffered output to the transport.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.check_usable()?;
        let r = self.record.flush();
        self.check(r)
    }

    /// When [`Session::handle_timeout`] should be called next.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match self.state {
            State::Handshaking | State::Established => self.flight.poll_timeout(),
            State::Closed | State::Failed => None,
        }
    }

    /// Resend the last flight if its timer expired. Fails with `Timeout`
    /// when the resend budget is spent.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.check_usable()?;
        let r = self
            .flight
            .handle_timeout(&mut self.record, now)
            .and_then(|_| self.flush_quiet());
        self.check(r)
    }

    /// Start a renegotiation handshake.
    ///
    /// A client sends a new ClientHello. A server sends HelloRequest and
    /// waits in [`RenegotiationState::Pending`] for the client to answer.
    pub fn renegotiate(&mut self, now: Instant) -> Result<(), Error> {
        self.check_usable()?;
        if self.state != State::Established {
            return Err(Error::BadInput("handshake not complete"));
        }
        if matches!(
            self.renegotiation,
            RenegotiationState::InProgress | RenegotiationState::Pending
        ) || self.handshake.is_some()
        {
            return Err(Error::RenegotiationInProgress);
        }
        if !self.config.renegotiation() {
            return Err(Error::BadInput("renegotiation is disabled"));
        }
        if !self.secure_renegotiation() {
            return Err(Error::BadInput("peer did not indicate secure renegotiation"));
        }
        let r = match self.role {
            Role::Client => self.start_client_renegotiation(now),
            Role::Server => self.send_hello_request(now),
        };
        self.check(r)
    }

    pub fn renegotiation_state(&self) -> RenegotiationState {
        self.renegotiation
    }

    /// Send a close_notify warning. The session is closed afterwards.
    pub fn close_notify(&mut self) -> Result<(), Error> {
        self.check_usable()?;
        debug!("Sending close_notify");
        let r = self
            .record
            .write_alert(Alert::warning(AlertDescription::CloseNotify))
            .and_then(|_| self.flush_quiet());
        self.state = State::Closed;
        self.handshake = None;
        r
    }

    /// Suite of the last completed handshake.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.established.as_ref().map(|o| o.suite)
    }

    /// The peer's DER certificate chain, leaf first. Empty for PSK.
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        self.established
            .as_ref()
            .map(|o| &o.peer_certificates[..])
            .unwrap_or(&[])
    }

    /// Whether the last handshake was an abbreviated one.
    pub fn is_resumed(&self) -> bool {
        self.established.as_ref().map(|o| o.resumed).unwrap_or(false)
    }

    /// Hash of the last completed handshake's transcript. Both peers arrive
    /// at the same value.
    pub fn transcript_hash(&self) -> Option<&[u8]> {
        self.established.as_ref().map(|o| &o.transcript_hash[..])
    }

    /// State to resume this session with on a later connection.
    pub fn saved_session(&self) -> Option<SavedSession> {
        self.saved_session.clone()
    }

    /// Offer `session` for resumption. Takes effect for the client's next
    /// initial ClientHello.
    pub fn set_saved_session(&mut self, session: SavedSession) {
        self.saved_session = Some(session);
    }

    pub fn transport(&self) -> &T {
        self.record.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.record.transport_mut()
    }

    fn check_usable(&self) -> Result<(), Error> {
        match self.state {
            State::Handshaking | State::Established => Ok(()),
            State::Closed | State::Failed => Err(Error::ConnectionClosed),
        }
    }

    /// Tear the session down on fatal errors.
    fn check<R>(&mut self, r: Result<R, Error>) -> Result<R, Error> {
        if let Err(e) = &r {
            if e.is_fatal() {
                self.fail(e);
            }
        }
        r
    }

    fn fail(&mut self, e: &Error) {
        match e {
            Error::ConnectionClosed => debug!("Connection closed"),
            _ => warn!("Session failed: {}", e),
        }
        if let Some(description) = e.alert() {
            // Best effort, the session is unusable either way.
            if self.record.write_alert(Alert::fatal(description)).is_ok() {
                let _ = self.record.flush();
            }
        }
        self.state = match e {
            Error::ConnectionClosed => State::Closed,
            _ => State::Failed,
        };
        self.handshake = None;
        self.flight.discard();
        self.app_in.clear();
    }

    fn secure_renegotiation(&self) -> bool {
        self.established
            .as_ref()
            .map(|o| o.secure_renegotiation)
            .unwrap_or(false)
    }

    fn drive(&mut self, now: Instant) -> Result<(), Error> {
        if !self.started {
            self.started = true;
            if self.role == Role::Client {
                let offered = self.saved_session.clone();
                self.start_client(offered, None, now)?;
            }
        }
        self.pump(now)
    }

    fn start_client(
        &mut self,
        offered: Option<SavedSession>,
        renegotiation: Option<crate::handshake::RenegotiationInfo>,
        now: Instant,
    ) -> Result<(), Error> {
        let kind = self.config.transport();
        let mut hs = Handshake::Client(ClientHandshake::new(kind, offered, renegotiation));
        let config = self.config.clone();
        let mut out = Outbox::default();
        hs.start(&mut Ctx {
            config: &config,
            rng: &mut self.rng,
            out: &mut out,
        })?;
        self.handshake = Some(hs);
        self.emit(out, now)
    }

    fn start_client_renegotiation(&mut self, now: Instant) -> Result<(), Error> {
        let verify = self
            .established
            .as_ref()
            .map(|o| o.verify.clone())
            .unwrap_or_default();
        info!("Starting renegotiation");
        self.reassembler.restart();
        self.renegotiation = RenegotiationState::InProgress;
        self.start_client(None, Some(verify), now)
    }

    fn send_hello_request(&mut self, now: Instant) -> Result<(), Error> {
        info!("Requesting renegotiation");
        let raw = encode_message(self.record.kind(), MessageType::HelloRequest, 0, &[]);
        self.flight.begin();
        self.flight
            .push(ItemKind::Handshake, self.record.write_epoch(), raw);
        self.flight.transmit(&mut self.record)?;
        self.flight.sent(now, false);
        self.renegotiation = RenegotiationState::Pending;
        self.flush_quiet()
    }

    fn send_warning(&mut self, description: AlertDescription) -> Result<(), Error> {
        debug!("Sending warning {:?}", description);
        self.record.write_alert(Alert::warning(description))?;
        self.flush_quiet()
    }

    fn flush_quiet(&mut self) -> Result<(), Error> {
        match self.record.flush() {
            Ok(()) | Err(Error::WouldBlock) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Put a handshake's output on the wire.
    fn emit(&mut self, out: Outbox, now: Instant) -> Result<(), Error> {
        if out.items.is_empty() {
            return Ok(());
        }
        let is_final = out.is_final;

        if out.stateless {
            for item in out.items {
                if let Out::Message(m) = item {
                    let epoch = self.record.write_epoch();
                    self.record.write_handshake(epoch, &m)?;
                }
            }
            return self.flush_quiet();
        }

        self.flight.begin();
        for item in out.items {
            let epoch = self.record.write_epoch();
            match item {
                Out::Message(m) => self.flight.push(ItemKind::Handshake, epoch, m),
                Out::ChangeCipherSpec => {
                    self.flight
                        .push(ItemKind::ChangeCipherSpec, epoch, Buf::new())
                }
                Out::WriteTransform(transform) => {
                    // Everything before the switch goes out under the old keys.
                    self.flight.transmit(&mut self.record)?;
                    self.record.set_write_transform(transform);
                }
            }
        }
        self.flight.transmit(&mut self.record)?;
        self.flight.sent(now, is_final);
        self.flush_quiet()
    }

    /// Process everything the transport has.
    fn pump(&mut self, now: Instant) -> Result<(), Error> {
        while let Some(record) = self.record.read_record()? {
            self.handle_record(record, now)?;
            if self.peer_closed {
                break;
            }
        }
        self.flush_quiet()
    }

    fn handle_record(&mut self, record: Record, now: Instant) -> Result<(), Error> {
        match record.content_type {
            ContentType::Handshake => self.on_handshake_record(record, now),
            ContentType::ChangeCipherSpec => self.on_change_cipher_spec(record),
            ContentType::Alert => self.on_alert(record),
            ContentType::ApplicationData => self.on_application_data(record),
            ContentType::Unknown(t) => self.drop_or_fail(format!("record content type {}", t)),
        }
    }

    /// Datagram peers may send garbage without consequence. On a stream it
    /// is fatal.
    fn drop_or_fail(&mut self, reason: String) -> Result<(), Error> {
        if self.record.kind().is_datagram() {
            debug!("Dropping {}", reason);
            Ok(())
        } else {
            Err(Error::unexpected(reason))
        }
    }

    fn on_handshake_record(&mut self, record: Record, now: Instant) -> Result<(), Error> {
        self.reassembler.push(&record.fragment)?;

        if let Some(old) = self.reassembler.take_old() {
            let last_of_flight = matches!(
                old,
                MessageType::ClientHello | MessageType::ServerHelloDone | MessageType::Finished
            );
            if last_of_flight && self.flight.is_retained() {
                self.flight.resend(&mut self.record, "peer retransmission")?;
            }
        }

        if self.reassembler.has_pending() {
            self.flight.peer_progress();
        }

        while let Some(msg) = self.reassembler.pop()? {
            self.on_message(msg, now)?;
            if self.state != State::Handshaking && self.state != State::Established {
                return Ok(());
            }
        }

        // Flagged on push for datagrams, on pop for streams.
        if self.reassembler.take_hello_request() {
            self.on_hello_request(now)?;
        }
        Ok(())
    }

    fn on_message(&mut self, msg: HandshakeMessage, now: Instant) -> Result<(), Error> {
        if self.handshake.is_none() {
            if self.role == Role::Server && msg.msg_type == MessageType::ClientHello {
                self.on_renegotiation_hello()?;
                if self.handshake.is_none() {
                    self.reassembler.idle();
                    return Ok(());
                }
            } else {
                self.reassembler.idle();
                return self.drop_or_fail(format!("{:?} outside a handshake", msg.msg_type));
            }
        }

        let config = self.config.clone();
        let mut out = Outbox::default();
        let (awaiting_hello, complete) = {
            let Some(hs) = self.handshake.as_mut() else {
                return Ok(());
            };
            hs.handle_message(
                &mut Ctx {
                    config: &config,
                    rng: &mut self.rng,
                    out: &mut out,
                },
                &msg,
            )?;
            (hs.awaiting_hello(), hs.is_complete())
        };

        self.emit(out, now)?;
        if awaiting_hello {
            self.reassembler.expect_hello();
        }
        if complete {
            self.complete()?;
        }
        Ok(())
    }

    /// An established server got a ClientHello.
    fn on_renegotiation_hello(&mut self) -> Result<(), Error> {
        if !self.config.renegotiation() || !self.secure_renegotiation() {
            info!("Refusing renegotiation");
            self.renegotiation = match self.renegotiation {
                RenegotiationState::Initial => RenegotiationState::Initial,
                _ => RenegotiationState::Done,
            };
            return self.send_warning(AlertDescription::NoRenegotiation);
        }
        let verify = self
            .established
            .as_ref()
            .map(|o| o.verify.clone())
            .unwrap_or_default();
        info!("Client started renegotiation");
        let kind = self.config.transport();
        self.handshake = Some(Handshake::Server(ServerHandshake::new(
            kind,
            Some(verify),
            &mut self.rng,
        )));
        self.renegotiation = RenegotiationState::InProgress;
        Ok(())
    }

    fn on_hello_request(&mut self, now: Instant) -> Result<(), Error> {
        if self.role == Role::Server {
            return self.drop_or_fail("HelloRequest sent to a server".to_string());
        }
        if self.handshake.is_some() || self.state != State::Established {
            trace!("Ignoring HelloRequest during a handshake");
            return Ok(());
        }
        if !self.config.renegotiation() || !self.secure_renegotiation() {
            info!("Refusing renegotiation requested by server");
            return self.send_warning(AlertDescription::NoRenegotiation);
        }
        self.start_client_renegotiation(now)
    }

    fn complete(&mut self) -> Result<(), Error> {
        let outcome = self
            .handshake
            .take()
            .and_then(|mut hs| hs.take_outcome())
            .ok_or_else(|| {
                Error::violation(AlertDescription::InternalError, "handshake without outcome")
            })?;

        self.reassembler.idle();
        if !self.flight.is_retained() {
            self.record.drop_prev_write();
        }

        info!(
            "Handshake complete: {:?}{}",
            outcome.suite,
            if outcome.resumed { " (resumed)" } else { "" }
        );

        if self.role == Role::Client && !outcome.session.id.is_empty() {
            self.saved_session = Some(outcome.session.clone());
        }
        if self.renegotiation == RenegotiationState::InProgress {
            self.renegotiation = RenegotiationState::Done;
        }
        self.state = State::Established;
        self.established = Some(outcome);
        Ok(())
    }

    fn on_change_cipher_spec(&mut self, record: Record) -> Result<(), Error> {
        if record.fragment[..] != [CHANGE_CIPHER_SPEC] {
            if self.record.kind().is_datagram() {
                debug!("Dropping malformed ChangeCipherSpec");
                return Ok(());
            }
            return Err(Error::decode("ChangeCipherSpec"));
        }
        match self.handshake.as_mut() {
            Some(hs) if hs.expects_ccs() => {
                let transform = hs.handle_ccs()?;
                self.record.set_read_transform(transform);
                Ok(())
            }
            _ => self.drop_or_fail("unexpected ChangeCipherSpec".to_string()),
        }
    }

    fn on_alert(&mut self, record: Record) -> Result<(), Error> {
        let alert = match parse_all(&record.fragment, "Alert", Alert::parse) {
            Ok(alert) => alert,
            Err(e) if self.record.kind().is_datagram() => {
                debug!("Dropping malformed alert: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if alert.is_fatal() {
            return Err(Error::AlertReceived(alert.description));
        }

        match alert.description {
            AlertDescription::CloseNotify => {
                debug!("Peer sent close_notify");
                self.peer_closed = true;
            }
            AlertDescription::NoRenegotiation
                if self.renegotiation == RenegotiationState::Pending =>
            {
                info!("Client refused renegotiation");
                self.flight.discard();
                self.renegotiation = RenegotiationState::Done;
            }
            AlertDescription::NoRenegotiation
                if self.renegotiation == RenegotiationState::InProgress
                    && self.role == Role::Client =>
            {
                info!("Server refused renegotiation");
                self.flight.discard();
                self.handshake = None;
                self.reassembler.idle();
                self.renegotiation = RenegotiationState::Done;
            }
            other => warn!("Ignoring warning alert {:?}", other),
        }
        Ok(())
    }

    fn on_application_data(&mut self, record: Record) -> Result<(), Error> {
        if self.established.is_none() || record.epoch == 0 {
            return self.drop_or_fail("application data before the handshake".to_string());
        }
        if self.flight.state() == FlightState::Finished && self.flight.is_retained() {
            trace!("Peer is on the new epoch, dropping final flight");
            self.flight.discard();
            self.record.drop_prev_write();
        }
        if !record.fragment.is_empty() {
            self.app_in.push_back(record.fragment);
        }
        Ok(())
    }
}

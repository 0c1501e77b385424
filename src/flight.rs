//! Flight/Retransmission Manager.
//!
//! A [`Flight`] holds every handshake message (and ChangeCipherSpec) one side
//! sends before it is the peer's turn. On datagram transport the flight is
//! resent under an exponential backoff until the peer's next flight shows up.
//!
//! The [`Reassembler`] is the receiving half: it puts fragmented and
//! reordered handshake messages back together and hands them out strictly by
//! `message_seq`.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::buffer::Buf;
use crate::message::{Header, MessageType, CHANGE_CIPHER_SPEC};
use crate::record::RecordLayer;
use crate::timer::ExponentialBackoff;
use crate::transport::Transport;
use crate::types::{ContentType, Role, TransportKind};
use crate::{Config, Error};

/// Largest handshake message we reassemble.
const MAX_HANDSHAKE_LEN: usize = 1 << 17;

/// How far past the expected `message_seq` we buffer.
const SEQ_HORIZON: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlightState {
    /// Building the next flight.
    Preparing,
    /// Resending a flight.
    Sending,
    /// Flight sent, timer running.
    Waiting,
    /// Nothing outstanding. A final flight may still be retained.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Handshake,
    ChangeCipherSpec,
}

#[derive(Debug)]
struct FlightItem {
    kind: ItemKind,
    epoch: u16,
    bytes: Buf,
    next: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct Flight {
    state: FlightState,
    datagram: bool,
    items: Vec<FlightItem>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Next item not yet handed to the record layer.
    cursor: Option<usize>,
    backoff: ExponentialBackoff,
    deadline: Option<Instant>,
}

impl Flight {
    /// The client prepares its first flight right away. The server is idle
    /// until a ClientHello arrives.
    pub fn new(config: &Config, role: Role) -> Self {
        let state = match role {
            Role::Client => FlightState::Preparing,
            Role::Server => FlightState::Finished,
        };
        Flight {
            state,
            datagram: config.transport().is_datagram(),
            items: Vec::new(),
            head: None,
            tail: None,
            cursor: None,
            backoff: ExponentialBackoff::new(
                config.retransmit_min(),
                config.retransmit_max(),
                config.max_retransmissions(),
            ),
            deadline: None,
        }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    fn set_state(&mut self, next: FlightState) {
        if self.state != next {
            trace!("Flight {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Replace the previous flight with an empty one.
    pub fn begin(&mut self) {
        self.items.clear();
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.deadline = None;
        self.backoff.reset();
        self.set_state(FlightState::Preparing);
    }

    pub fn push(&mut self, kind: ItemKind, epoch: u16, bytes: Buf) {
        let idx = self.items.len();
        self.items.push(FlightItem {
            kind,
            epoch,
            bytes,
            next: None,
        });
        match self.tail {
            Some(t) => self.items[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        if self.cursor.is_none() {
            self.cursor = Some(idx);
        }
    }

    /// Hand every item from the cursor on to the record layer.
    pub fn transmit<T: Transport>(&mut self, record: &mut RecordLayer<T>) -> Result<(), Error> {
        while let Some(idx) = self.cursor {
            let item = &self.items[idx];
            write_item(record, item)?;
            self.cursor = item.next;
        }
        Ok(())
    }

    /// The flight is fully handed over.
    ///
    /// A final flight is retained without a timer so it can be resent if the
    /// peer repeats its own last flight. Streams keep nothing.
    pub fn sent(&mut self, now: Instant, is_final: bool) {
        if !self.datagram {
            self.discard();
            self.set_state(FlightState::Finished);
            return;
        }
        if is_final {
            self.deadline = None;
            self.set_state(FlightState::Finished);
        } else {
            self.deadline = Some(now + self.backoff.rto());
            self.set_state(FlightState::Waiting);
        }
        debug!(
            "Sent flight of {} messages{}",
            self.items.len(),
            if is_final { " (final)" } else { "" }
        );
    }

    /// Resend the whole flight.
    pub fn resend<T: Transport>(
        &mut self,
        record: &mut RecordLayer<T>,
        reason: &str,
    ) -> Result<(), Error> {
        if self.head.is_none() {
            return Ok(());
        }
        debug!("Resending flight due to {}", reason);
        let resume = self.state;
        self.set_state(FlightState::Sending);

        let mut at = self.head;
        while let Some(idx) = at {
            let item = &self.items[idx];
            write_item(record, item)?;
            at = item.next;
        }
        self.cursor = None;
        self.set_state(resume);
        Ok(())
    }

    /// Next retransmission deadline.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match self.state {
            FlightState::Waiting => self.deadline,
            _ => None,
        }
    }

    /// Fire the timer if due. Fails with `Timeout` once the resend budget
    /// is spent.
    pub fn handle_timeout<T: Transport>(
        &mut self,
        record: &mut RecordLayer<T>,
        now: Instant,
    ) -> Result<(), Error> {
        let Some(deadline) = self.poll_timeout() else {
            return Ok(());
        };
        if now < deadline {
            return Ok(());
        }
        if !self.backoff.can_retry() {
            return Err(Error::Timeout("handshake flight"));
        }
        self.backoff.attempt();
        self.deadline = Some(now + self.backoff.rto());
        debug!(
            "Re-arm flight timeout in {:.03}s (attempt {})",
            self.backoff.rto().as_secs_f32(),
            self.backoff.attempts()
        );
        self.resend(record, "flight timeout")
    }

    /// The peer's next flight has started to arrive.
    pub fn peer_progress(&mut self) {
        if self.state == FlightState::Waiting {
            self.discard();
            self.set_state(FlightState::Finished);
        }
    }

    /// Whether a resend would put anything on the wire.
    pub fn is_retained(&self) -> bool {
        self.head.is_some()
    }

    /// Drop a retained final flight.
    pub fn discard(&mut self) {
        self.items.clear();
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.deadline = None;
    }
}

fn write_item<T: Transport>(record: &mut RecordLayer<T>, item: &FlightItem) -> Result<(), Error> {
    match item.kind {
        ItemKind::Handshake => record.write_handshake(item.epoch, &item.bytes),
        ItemKind::ChangeCipherSpec => {
            record.write_record(ContentType::ChangeCipherSpec, item.epoch, &[CHANGE_CIPHER_SPEC])
        }
    }
}

/// A complete handshake message in canonical (unfragmented) encoding.
#[derive(Debug)]
pub(crate) struct HandshakeMessage {
    pub msg_type: MessageType,
    pub message_seq: u16,
    /// Header plus body, exactly as it enters the transcript.
    pub raw: Buf,
    header_len: usize,
}

impl HandshakeMessage {
    #[cfg(test)]
    pub fn new(kind: TransportKind, msg_type: MessageType, message_seq: u16, raw: Buf) -> Self {
        HandshakeMessage {
            msg_type,
            message_seq,
            raw,
            header_len: kind.handshake_header_len(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }
}

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    body: Vec<u8>,
    filled: Vec<bool>,
    missing: usize,
}

/// What the reassembler accepts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Messages from `next_seq` on.
    InOrder,
    /// A server waiting for a ClientHello takes any sequence number.
    Hello,
    /// Between handshakes: only a ClientHello with sequence 0 starts a new
    /// one. `next_seq` still marks what the finished handshake used.
    Idle,
}

/// Incoming handshake reassembly.
#[derive(Debug)]
pub(crate) struct Reassembler {
    kind: TransportKind,
    expect: Expect,
    next_seq: u16,
    pending: BTreeMap<u16, Partial>,
    stream: Buf,
    old: Option<MessageType>,
    hello_request: bool,
}

impl Reassembler {
    pub fn new(kind: TransportKind, role: Role) -> Self {
        Reassembler {
            kind,
            expect: match role {
                Role::Client => Expect::InOrder,
                Role::Server => Expect::Hello,
            },
            next_seq: 0,
            pending: BTreeMap::new(),
            stream: Buf::new(),
            old: None,
            hello_request: false,
        }
    }

    /// Accept a ClientHello with any sequence number.
    pub fn expect_hello(&mut self) {
        self.expect = Expect::Hello;
        self.pending.clear();
    }

    /// The handshake is over. Only a new ClientHello passes.
    pub fn idle(&mut self) {
        self.expect = Expect::Idle;
        self.pending.clear();
    }

    /// A new handshake starts from sequence 0 in both directions.
    pub fn restart(&mut self) {
        self.expect = Expect::InOrder;
        self.next_seq = 0;
        self.pending.clear();
    }

    /// Type of an already processed message seen again, if any.
    pub fn take_old(&mut self) -> Option<MessageType> {
        self.old.take()
    }

    pub fn take_hello_request(&mut self) -> bool {
        std::mem::take(&mut self.hello_request)
    }

    /// Feed the plaintext of one handshake record.
    pub fn push(&mut self, mut fragment: &[u8]) -> Result<(), Error> {
        if !self.kind.is_datagram() {
            if self.stream.len() + fragment.len() > MAX_HANDSHAKE_LEN + 4 {
                return Err(Error::decode("handshake message too long"));
            }
            self.stream.extend_from_slice(fragment);
            return Ok(());
        }

        while !fragment.is_empty() {
            let Ok((rest, header)) = Header::parse(fragment, self.kind) else {
                warn!("Dropping malformed handshake fragment");
                return Ok(());
            };
            let len = header.fragment_length as usize;
            if rest.len() < len || !header.is_consistent() {
                warn!("Dropping inconsistent handshake fragment");
                return Ok(());
            }
            let (body, rest) = rest.split_at(len);
            self.push_fragment(header, body);
            fragment = rest;
        }
        Ok(())
    }

    fn push_fragment(&mut self, header: Header, body: &[u8]) {
        if header.msg_type == MessageType::HelloRequest {
            if header.length == 0 {
                self.hello_request = true;
            }
            return;
        }
        if header.length as usize > MAX_HANDSHAKE_LEN {
            warn!("Dropping oversized handshake message {:?}", header.msg_type);
            return;
        }

        let seq = header.message_seq;
        match self.expect {
            Expect::Hello => {
                if header.msg_type != MessageType::ClientHello {
                    debug!("Dropping {:?} while waiting for ClientHello", header.msg_type);
                    return;
                }
                self.expect = Expect::InOrder;
                self.next_seq = seq;
                self.pending.clear();
            }
            Expect::Idle => {
                // A new handshake always opens with ClientHello seq 0.
                if seq != 0 || header.msg_type != MessageType::ClientHello {
                    if seq < self.next_seq {
                        self.old = Some(header.msg_type);
                    }
                    return;
                }
                self.expect = Expect::InOrder;
                self.next_seq = 0;
                self.pending.clear();
            }
            Expect::InOrder => {}
        }

        if seq < self.next_seq {
            trace!("Old handshake {:?} seq {}", header.msg_type, seq);
            self.old = Some(header.msg_type);
            return;
        }
        if seq - self.next_seq > SEQ_HORIZON {
            debug!("Dropping handshake seq {} beyond horizon", seq);
            return;
        }

        let total = header.length as usize;
        let partial = self.pending.entry(seq).or_insert_with(|| Partial {
            msg_type: header.msg_type,
            body: vec![0; total],
            filled: vec![false; total],
            missing: total,
        });
        if partial.msg_type != header.msg_type || partial.body.len() != total {
            warn!("Dropping fragment disagreeing with earlier fragments of seq {}", seq);
            return;
        }

        let start = header.fragment_offset as usize;
        for (i, b) in body.iter().enumerate() {
            let at = start + i;
            if !partial.filled[at] {
                partial.filled[at] = true;
                partial.body[at] = *b;
                partial.missing -= 1;
            }
        }
    }

    /// The next complete in-order message.
    pub fn pop(&mut self) -> Result<Option<HandshakeMessage>, Error> {
        match self.kind {
            TransportKind::Stream => self.pop_stream(),
            TransportKind::Datagram => Ok(self.pop_datagram()),
        }
    }

    fn pop_stream(&mut self) -> Result<Option<HandshakeMessage>, Error> {
        loop {
            if self.stream.len() < 4 {
                return Ok(None);
            }
            let Ok((_, header)) = Header::parse(&self.stream, self.kind) else {
                return Err(Error::decode("handshake header"));
            };
            let total = 4 + header.length as usize;
            if header.length as usize > MAX_HANDSHAKE_LEN {
                return Err(Error::decode("handshake message too long"));
            }
            if self.stream.len() < total {
                return Ok(None);
            }
            let raw = self.stream.take_front(total);
            if header.msg_type == MessageType::HelloRequest {
                if header.length != 0 {
                    return Err(Error::decode("HelloRequest with body"));
                }
                self.hello_request = true;
                continue;
            }
            return Ok(Some(HandshakeMessage {
                msg_type: header.msg_type,
                message_seq: 0,
                raw,
                header_len: 4,
            }));
        }
    }

    fn pop_datagram(&mut self) -> Option<HandshakeMessage> {
        if self.expect != Expect::InOrder {
            return None;
        }
        let ready = self
            .pending
            .get(&self.next_seq)
            .map(|p| p.missing == 0)
            .unwrap_or(false);
        if !ready {
            return None;
        }
        let seq = self.next_seq;
        let partial = self.pending.remove(&seq)?;
        self.next_seq = seq.wrapping_add(1);

        let header_len = self.kind.handshake_header_len();
        let mut raw = Buf::with_capacity(header_len + partial.body.len());
        Header::whole(partial.msg_type, partial.body.len() as u32, seq)
            .serialize(self.kind, &mut raw);
        raw.extend_from_slice(&partial.body);

        Some(HandshakeMessage {
            msg_type: partial.msg_type,
            message_seq: seq,
            raw,
            header_len,
        })
    }

    /// Whether the peer's flight has started: a whole or partial message at
    /// the expected sequence, or anything buffered beyond it.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.stream.len() >= 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::encode_message;

    fn fragment(msg_type: MessageType, seq: u16, body: &[u8], offset: usize, len: usize) -> Buf {
        let header = Header {
            msg_type,
            length: body.len() as u32,
            message_seq: seq,
            fragment_offset: offset as u32,
            fragment_length: len as u32,
        };
        let mut out = Buf::new();
        header.serialize(TransportKind::Datagram, &mut out);
        out.extend_from_slice(&body[offset..offset + len]);
        out
    }

    #[test]
    fn reorders_and_defragments() {
        let mut r = Reassembler::new(TransportKind::Datagram, Role::Client);
        let body: Vec<u8> = (0..100).collect();

        // seq 1 arrives first, whole
        r.push(&encode_message(TransportKind::Datagram, MessageType::ServerHelloDone, 1, &[]))
            .unwrap();
        assert!(r.pop().unwrap().is_none());

        // seq 0 in overlapping pieces, last piece first
        r.push(&fragment(MessageType::Certificate, 0, &body, 60, 40)).unwrap();
        r.push(&fragment(MessageType::Certificate, 0, &body, 0, 30)).unwrap();
        assert!(r.pop().unwrap().is_none());
        r.push(&fragment(MessageType::Certificate, 0, &body, 20, 45)).unwrap();

        let m = r.pop().unwrap().unwrap();
        assert_eq!(m.msg_type, MessageType::Certificate);
        assert_eq!(m.body(), &body[..]);
        assert_eq!(
            m.raw,
            encode_message(TransportKind::Datagram, MessageType::Certificate, 0, &body)
        );

        let m = r.pop().unwrap().unwrap();
        assert_eq!(m.msg_type, MessageType::ServerHelloDone);
        assert!(r.pop().unwrap().is_none());
    }

    #[test]
    fn old_messages_are_reported() {
        let mut r = Reassembler::new(TransportKind::Datagram, Role::Client);
        let fin = encode_message(TransportKind::Datagram, MessageType::Finished, 0, &[0; 12]);
        r.push(&fin).unwrap();
        assert!(r.pop().unwrap().is_some());
        assert_eq!(r.take_old(), None);

        r.push(&fin).unwrap();
        assert!(r.pop().unwrap().is_none());
        assert_eq!(r.take_old(), Some(MessageType::Finished));
    }

    #[test]
    fn hello_mode_takes_any_seq() {
        let mut r = Reassembler::new(TransportKind::Datagram, Role::Server);
        r.push(&encode_message(TransportKind::Datagram, MessageType::Finished, 0, &[1]))
            .unwrap();
        assert!(r.pop().unwrap().is_none());

        r.push(&encode_message(TransportKind::Datagram, MessageType::ClientHello, 1, &[7]))
            .unwrap();
        let m = r.pop().unwrap().unwrap();
        assert_eq!(m.message_seq, 1);
    }

    #[test]
    fn idle_reports_old_and_starts_on_zero() {
        let mut r = Reassembler::new(TransportKind::Datagram, Role::Server);
        for (seq, t) in [(0, MessageType::ClientHello), (1, MessageType::Finished)] {
            r.push(&encode_message(TransportKind::Datagram, t, seq, &[0])).unwrap();
            assert!(r.pop().unwrap().is_some());
        }
        r.idle();

        r.push(&encode_message(TransportKind::Datagram, MessageType::Finished, 1, &[0]))
            .unwrap();
        assert!(r.pop().unwrap().is_none());
        assert_eq!(r.take_old(), Some(MessageType::Finished));

        r.push(&encode_message(TransportKind::Datagram, MessageType::ClientHello, 0, &[0]))
            .unwrap();
        assert_eq!(r.pop().unwrap().unwrap().msg_type, MessageType::ClientHello);
    }

    #[test]
    fn hello_request_is_flagged() {
        let mut r = Reassembler::new(TransportKind::Datagram, Role::Client);
        r.push(&encode_message(TransportKind::Datagram, MessageType::HelloRequest, 0, &[]))
            .unwrap();
        assert!(r.pop().unwrap().is_none());
        assert!(r.take_hello_request());
        assert!(!r.take_hello_request());
    }

    #[test]
    fn stream_messages_span_records() {
        let mut r = Reassembler::new(TransportKind::Stream, Role::Client);
        let a = encode_message(TransportKind::Stream, MessageType::ServerHello, 0, &[5; 40]);
        let b = encode_message(TransportKind::Stream, MessageType::ServerHelloDone, 0, &[]);
        let mut all = a.to_vec();
        all.extend_from_slice(&b);

        r.push(&all[..10]).unwrap();
        assert!(r.pop().unwrap().is_none());
        r.push(&all[10..]).unwrap();
        assert_eq!(r.pop().unwrap().unwrap().body(), &[5; 40][..]);
        assert_eq!(r.pop().unwrap().unwrap().msg_type, MessageType::ServerHelloDone);
        assert!(r.pop().unwrap().is_none());
    }

    #[test]
    fn flight_backoff_and_timeout() {
        use std::time::Duration;

        let config = Config::builder(TransportKind::Datagram)
            .retransmit_min(Duration::from_secs(1))
            .retransmit_max(Duration::from_secs(4))
            .max_retransmissions(2)
            .build()
            .unwrap();
        let mut record = RecordLayer::new(&config, Sink::default());
        let mut flight = Flight::new(&config, Role::Client);
        assert_eq!(flight.state(), FlightState::Preparing);

        let now = Instant::now();
        flight.push(
            ItemKind::Handshake,
            0,
            encode_message(TransportKind::Datagram, MessageType::ClientHello, 0, &[1; 10]),
        );
        flight.transmit(&mut record).unwrap();
        record.flush().unwrap();
        flight.sent(now, false);
        assert_eq!(flight.state(), FlightState::Waiting);
        assert_eq!(flight.poll_timeout(), Some(now + Duration::from_secs(1)));
        assert_eq!(record.transport().sent, 1);

        flight.handle_timeout(&mut record, now).unwrap();
        record.flush().unwrap();
        assert_eq!(record.transport().sent, 1);

        let t1 = now + Duration::from_secs(1);
        flight.handle_timeout(&mut record, t1).unwrap();
        record.flush().unwrap();
        assert_eq!(record.transport().sent, 2);
        assert_eq!(flight.poll_timeout(), Some(t1 + Duration::from_secs(2)));

        let t2 = t1 + Duration::from_secs(2);
        flight.handle_timeout(&mut record, t2).unwrap();
        let t3 = t2 + Duration::from_secs(4);
        assert!(matches!(
            flight.handle_timeout(&mut record, t3),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn final_flight_is_retained() {
        let config = Config::builder(TransportKind::Datagram).build().unwrap();
        let mut record = RecordLayer::new(&config, Sink::default());
        let mut flight = Flight::new(&config, Role::Server);
        assert_eq!(flight.state(), FlightState::Finished);

        flight.begin();
        flight.push(ItemKind::ChangeCipherSpec, 0, Buf::new());
        flight.transmit(&mut record).unwrap();
        flight.sent(Instant::now(), true);
        assert_eq!(flight.state(), FlightState::Finished);
        assert!(flight.poll_timeout().is_none());
        assert!(flight.is_retained());

        flight.resend(&mut record, "test").unwrap();
        record.flush().unwrap();
        assert_eq!(record.transport().sent, 1);
        flight.discard();
        assert!(!flight.is_retained());
    }

    #[derive(Default)]
    struct Sink {
        sent: usize,
    }

    impl Transport for Sink {
        fn send(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent += 1;
            Ok(buf.len())
        }

        fn recv(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::WouldBlock.into())
        }
    }
}

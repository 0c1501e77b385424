//! Record layer over an injected [`Transport`].
//!
//! Outgoing records are protected with the write [`Transform`] of their
//! epoch and buffered until [`RecordLayer::flush`]. On datagram transport
//! records are packed into datagrams up to the MTU and handshake messages
//! are fragmented to fit; on stream transport everything is appended to one
//! byte buffer.
//!
//! Incoming records are read one at a time. A datagram record that fails
//! any check (header, epoch, replay window, decryption) is dropped and
//! logged. On stream transport the same failures are fatal.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::Buf;
use crate::error::io_error;
use crate::message::{Alert, Header, RecordHeader};
use crate::transform::Transform;
use crate::transport::Transport;
use crate::types::{AlertDescription, ContentType, ProtocolVersion, Sequence, TransportKind};
use crate::window::ReplayWindow;
use crate::{Config, Error};

/// Largest plaintext fragment (2^14).
pub(crate) const MAX_PLAINTEXT_LEN: usize = 16384;

/// Allowed growth of a protected record over its plaintext.
const MAX_EXPANSION: usize = 2048;

/// Largest datagram we accept.
const MAX_DATAGRAM_LEN: usize = 1 << 16;

/// A decrypted record.
#[derive(Debug)]
pub(crate) struct Record {
    pub content_type: ContentType,
    pub epoch: u16,
    pub fragment: Buf,
}

#[derive(Debug)]
struct ReadState {
    epoch: u16,
    seq: u64,
    transform: Option<Arc<Transform>>,
    window: ReplayWindow,
}

#[derive(Debug)]
struct WriteState {
    epoch: u16,
    seq: u64,
    transform: Option<Arc<Transform>>,
}

pub(crate) struct RecordLayer<T> {
    transport: T,
    kind: TransportKind,
    mtu: usize,
    max_fragment_len: usize,
    window_size: u32,

    read: ReadState,
    write: WriteState,
    /// Datagram only: the write state of the previous epoch, kept while a
    /// flight holding messages of that epoch may be resent.
    prev_write: Option<WriteState>,

    /// Stream: accumulated bytes. Datagram: rest of the current datagram.
    rx: Buf,
    scratch: Vec<u8>,
    /// Legacy record versions are tolerated until the first record is read.
    first_record: bool,

    /// Datagram being packed, or stream bytes not yet sent.
    tx: Buf,
    /// Packed datagrams waiting for the transport.
    tx_queue: VecDeque<Buf>,
}

impl<T: Transport> RecordLayer<T> {
    pub fn new(config: &Config, transport: T) -> Self {
        let kind = config.transport();
        RecordLayer {
            transport,
            kind,
            mtu: config.mtu(),
            max_fragment_len: config.max_fragment_len(),
            window_size: config.replay_window(),
            read: ReadState {
                epoch: 0,
                seq: 0,
                transform: None,
                window: ReplayWindow::new(config.replay_window()),
            },
            write: WriteState {
                epoch: 0,
                seq: 0,
                transform: None,
            },
            prev_write: None,
            rx: Buf::new(),
            scratch: vec![0; MAX_DATAGRAM_LEN],
            first_record: true,
            tx: Buf::new(),
            tx_queue: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn read_epoch(&self) -> u16 {
        self.read.epoch
    }

    pub fn write_epoch(&self) -> u16 {
        self.write.epoch
    }

    /// Switch the write side to the next epoch under `transform`.
    pub fn set_write_transform(&mut self, transform: Arc<Transform>) {
        let next = WriteState {
            epoch: self.write.epoch.wrapping_add(1),
            seq: 0,
            transform: Some(transform),
        };
        let prev = std::mem::replace(&mut self.write, next);
        if self.kind.is_datagram() {
            self.prev_write = Some(prev);
        }
        debug!("Write epoch {}", self.write.epoch);
    }

    /// Switch the read side to the next epoch under `transform`.
    pub fn set_read_transform(&mut self, transform: Arc<Transform>) {
        self.read = ReadState {
            epoch: self.read.epoch.wrapping_add(1),
            seq: 0,
            transform: Some(transform),
            window: ReplayWindow::new(self.window_size),
        };
        debug!("Read epoch {}", self.read.epoch);
    }

    /// Forget the previous epoch's write state.
    pub fn drop_prev_write(&mut self) {
        if self.prev_write.take().is_some() {
            trace!("Dropped write state of previous epoch");
        }
    }

    fn write_state(&mut self, epoch: u16) -> Result<&mut WriteState, Error> {
        if epoch == self.write.epoch {
            return Ok(&mut self.write);
        }
        match &mut self.prev_write {
            Some(prev) if prev.epoch == epoch => Ok(prev),
            _ => Err(Error::violation(
                AlertDescription::InternalError,
                format!("no write state for epoch {}", epoch),
            )),
        }
    }

    /// Largest plaintext that fits one record of `epoch`.
    pub fn max_record_payload(&self, epoch: u16) -> usize {
        match self.kind {
            TransportKind::Stream => self.max_fragment_len,
            TransportKind::Datagram => {
                let transform = if epoch == self.write.epoch {
                    self.write.transform.as_ref()
                } else {
                    self.prev_write.as_ref().and_then(|p| p.transform.as_ref())
                };
                let overhead = transform.map(|t| t.overhead()).unwrap_or(0);
                (self.mtu - self.kind.record_header_len() - overhead).min(self.max_fragment_len)
            }
        }
    }

    /// Protect and buffer one record.
    pub fn write_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        payload: &[u8],
    ) -> Result<(), Error> {
        let kind = self.kind;
        let state = self.write_state(epoch)?;

        let limit = match kind {
            TransportKind::Stream => u64::MAX,
            TransportKind::Datagram => Sequence::MAX_DATAGRAM_SEQ,
        };
        if state.seq >= limit {
            return Err(Error::violation(
                AlertDescription::InternalError,
                "record sequence number exhausted",
            ));
        }

        let sequence = Sequence {
            epoch: state.epoch,
            sequence_number: state.seq,
        };
        let seq64 = match kind {
            TransportKind::Stream => state.seq,
            TransportKind::Datagram => sequence.as_u64(),
        };
        let version = kind.version();

        let mut body = Buf::with_capacity(payload.len() + 64);
        match &state.transform {
            Some(t) => t.encrypt(seq64, content_type, version, payload, &mut body)?,
            None => body.extend_from_slice(payload),
        }
        state.seq += 1;

        let header = RecordHeader {
            content_type,
            version,
            sequence: match kind {
                TransportKind::Stream => Sequence::default(),
                TransportKind::Datagram => sequence,
            },
            length: body.len() as u16,
        };

        let mut record = Buf::with_capacity(kind.record_header_len() + body.len());
        header.serialize(kind, &mut record);
        record.extend_from_slice(&body);

        if kind.is_datagram() && !self.tx.is_empty() && self.tx.len() + record.len() > self.mtu {
            let full = std::mem::take(&mut self.tx);
            self.tx_queue.push_back(full);
        }
        self.tx.extend_from_slice(&record);

        Ok(())
    }

    /// Buffer a complete handshake message (header included), fragmenting
    /// as needed.
    pub fn write_handshake(&mut self, epoch: u16, message: &[u8]) -> Result<(), Error> {
        match self.kind {
            TransportKind::Stream => {
                for chunk in message.chunks(self.max_fragment_len) {
                    self.write_record(ContentType::Handshake, epoch, chunk)?;
                }
                Ok(())
            }
            TransportKind::Datagram => self.write_handshake_datagram(epoch, message),
        }
    }

    fn write_handshake_datagram(&mut self, epoch: u16, message: &[u8]) -> Result<(), Error> {
        let header_len = self.kind.handshake_header_len();
        let max = self.max_record_payload(epoch);

        if message.len() <= max {
            return self.write_record(ContentType::Handshake, epoch, message);
        }

        let Ok((body, header)) = Header::parse(message, self.kind) else {
            return Err(Error::violation(
                AlertDescription::InternalError,
                "malformed outgoing handshake message",
            ));
        };

        let chunk_len = max - header_len;
        let mut fragment = Buf::with_capacity(max);
        for (i, chunk) in body.chunks(chunk_len).enumerate() {
            let h = Header {
                fragment_offset: (i * chunk_len) as u32,
                fragment_length: chunk.len() as u32,
                ..header
            };
            fragment.clear();
            h.serialize(self.kind, &mut fragment);
            fragment.extend_from_slice(chunk);
            self.write_record(ContentType::Handshake, epoch, &fragment)?;
        }
        Ok(())
    }

    /// Buffer an alert on the current write epoch.
    pub fn write_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let mut body = Buf::new();
        alert.serialize(&mut body);
        let epoch = self.write.epoch;
        self.write_record(ContentType::Alert, epoch, &body)
    }

    /// Push buffered output to the transport.
    ///
    /// Returns `WouldBlock` if the transport did not take everything. The
    /// remainder is kept for the next call.
    pub fn flush(&mut self) -> Result<(), Error> {
        match self.kind {
            TransportKind::Stream => {
                while !self.tx.is_empty() {
                    let n = self.transport.send(&self.tx).map_err(io_error)?;
                    if n == 0 {
                        return Err(Error::ConnectionClosed);
                    }
                    self.tx.consume(n);
                }
            }
            TransportKind::Datagram => {
                if !self.tx.is_empty() {
                    let last = std::mem::take(&mut self.tx);
                    self.tx_queue.push_back(last);
                }
                while let Some(datagram) = self.tx_queue.front() {
                    self.transport.send(datagram).map_err(io_error)?;
                    self.tx_queue.pop_front();
                }
            }
        }
        Ok(())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.tx.is_empty() || !self.tx_queue.is_empty()
    }

    fn version_ok(&self, version: ProtocolVersion) -> bool {
        version == self.kind.version()
            || (self.first_record && version.is_hello_compatible(self.kind))
    }

    /// Read the next record.
    ///
    /// `Ok(None)` means the transport has nothing more right now.
    pub fn read_record(&mut self) -> Result<Option<Record>, Error> {
        match self.kind {
            TransportKind::Stream => self.read_stream(),
            TransportKind::Datagram => self.read_datagram(),
        }
    }

    fn read_stream(&mut self) -> Result<Option<Record>, Error> {
        let header_len = self.kind.record_header_len();
        loop {
            if self.rx.len() >= header_len {
                let (_, header) = RecordHeader::parse(&self.rx, self.kind)
                    .map_err(|_| Error::decode("record header"))?;

                if header.length as usize > self.max_fragment_len + MAX_EXPANSION {
                    return Err(Error::violation(
                        AlertDescription::RecordOverflow,
                        format!("record of {} bytes", header.length),
                    ));
                }

                let total = header_len + header.length as usize;
                if self.rx.len() >= total {
                    let raw = self.rx.take_front(total);
                    return self.open_stream(header, &raw[header_len..]).map(Some);
                }
            }

            let n = match self.transport.recv(&mut self.scratch) {
                Ok(n) => n,
                Err(e) => match io_error(e) {
                    Error::WouldBlock => return Ok(None),
                    e => return Err(e),
                },
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.rx.extend_from_slice(&self.scratch[..n]);
        }
    }

    fn open_stream(&mut self, header: RecordHeader, payload: &[u8]) -> Result<Record, Error> {
        if !self.version_ok(header.version) {
            return Err(Error::violation(
                AlertDescription::ProtocolVersion,
                format!("record version {}", header.version),
            ));
        }
        if let ContentType::Unknown(t) = header.content_type {
            return Err(Error::unexpected(format!("record content type {}", t)));
        }
        if self.read.seq == u64::MAX {
            return Err(Error::violation(
                AlertDescription::InternalError,
                "record sequence number exhausted",
            ));
        }

        let fragment = match &self.read.transform {
            Some(t) => t.decrypt(self.read.seq, header.content_type, header.version, payload)?,
            None => Buf::from_slice(payload),
        };
        if fragment.len() > self.max_fragment_len.max(MAX_PLAINTEXT_LEN) {
            return Err(Error::violation(
                AlertDescription::RecordOverflow,
                "plaintext too long",
            ));
        }

        self.read.seq += 1;
        self.first_record = false;
        Ok(Record {
            content_type: header.content_type,
            epoch: self.read.epoch,
            fragment,
        })
    }

    fn read_datagram(&mut self) -> Result<Option<Record>, Error> {
        let header_len = self.kind.record_header_len();
        loop {
            if self.rx.is_empty() {
                let n = match self.transport.recv(&mut self.scratch) {
                    Ok(n) => n,
                    Err(e) => match io_error(e) {
                        Error::WouldBlock => return Ok(None),
                        e => return Err(e),
                    },
                };
                if n == 0 {
                    return Ok(None);
                }
                self.rx = Buf::from_slice(&self.scratch[..n]);
            }

            let Ok((_, header)) = RecordHeader::parse(&self.rx, self.kind) else {
                warn!("Dropping {} bytes: bad record header", self.rx.len());
                self.rx.clear();
                continue;
            };
            let total = header_len + header.length as usize;
            if self.rx.len() < total {
                warn!("Dropping truncated record of {} bytes", self.rx.len());
                self.rx.clear();
                continue;
            }
            let raw = self.rx.take_front(total);

            if let Some(record) = self.open_datagram(header, &raw[header_len..]) {
                return Ok(Some(record));
            }
        }
    }

    fn open_datagram(&mut self, header: RecordHeader, payload: &[u8]) -> Option<Record> {
        let seq = header.sequence;

        if !self.version_ok(header.version) {
            warn!("Dropping record with version {}", header.version);
            return None;
        }
        if let ContentType::Unknown(t) = header.content_type {
            warn!("Dropping record with content type {}", t);
            return None;
        }
        if seq.epoch != self.read.epoch {
            debug!(
                "Dropping record of epoch {} (reading {})",
                seq.epoch, self.read.epoch
            );
            return None;
        }
        if !self.read.window.check(seq.sequence_number) {
            debug!("Dropping replayed record {}", seq);
            return None;
        }

        let fragment = match &self.read.transform {
            Some(t) => {
                match t.decrypt(seq.as_u64(), header.content_type, header.version, payload) {
                    Ok(f) => f,
                    Err(_) => {
                        warn!("Dropping record {} that failed to decrypt", seq);
                        return None;
                    }
                }
            }
            None => Buf::from_slice(payload),
        };
        if fragment.len() > MAX_PLAINTEXT_LEN {
            warn!("Dropping oversized record {}", seq);
            return None;
        }

        self.read.window.update(seq.sequence_number);
        self.first_record = false;
        Some(Record {
            content_type: header.content_type,
            epoch: seq.epoch,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::crypto::rust_crypto;
    use crate::message::{encode_message, MessageType};
    use crate::types::{CipherSuite, Role};

    /// Loopback transport: everything sent is received back.
    #[derive(Clone, Default)]
    struct Loop(Rc<RefCell<VecDeque<Vec<u8>>>>);

    impl Transport for Loop {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().push_back(buf.to_vec());
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.borrow_mut().pop_front() {
                Some(d) => {
                    buf[..d.len()].copy_from_slice(&d);
                    Ok(d.len())
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    fn layer(kind: TransportKind) -> (RecordLayer<Loop>, Loop) {
        let config = Config::builder(kind).mtu(300).build().unwrap();
        let pipe = Loop::default();
        (RecordLayer::new(&config, pipe.clone()), pipe)
    }

    fn transforms() -> (Arc<Transform>, Arc<Transform>) {
        let provider = rust_crypto::default_provider();
        let suite = CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256;
        let m = [9u8; 48];
        let c = Transform::derive(&provider, suite, &m, &[1; 32], &[2; 32], Role::Client).unwrap();
        let s = Transform::derive(&provider, suite, &m, &[1; 32], &[2; 32], Role::Server).unwrap();
        (Arc::new(c), Arc::new(s))
    }

    #[test]
    fn plaintext_records_are_packed() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        rl.write_record(ContentType::Handshake, 0, &[1; 100]).unwrap();
        rl.write_record(ContentType::Handshake, 0, &[2; 100]).unwrap();
        rl.write_record(ContentType::Handshake, 0, &[3; 100]).unwrap();
        rl.flush().unwrap();

        // 113 + 113 fit 300, the third starts a new datagram.
        let sent: Vec<usize> = pipe.0.borrow().iter().map(|d| d.len()).collect();
        assert_eq!(sent, vec![226, 113]);

        for expect in [1u8, 2, 3] {
            let r = rl.read_record().unwrap().unwrap();
            assert_eq!(r.content_type, ContentType::Handshake);
            assert_eq!(&*r.fragment, &[expect; 100][..]);
        }
        assert!(rl.read_record().unwrap().is_none());
    }

    #[test]
    fn replayed_datagram_dropped() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        rl.write_record(ContentType::Alert, 0, &[1, 0]).unwrap();
        rl.flush().unwrap();
        let copy = pipe.0.borrow()[0].clone();
        pipe.0.borrow_mut().push_back(copy);

        assert!(rl.read_record().unwrap().is_some());
        assert!(rl.read_record().unwrap().is_none());
    }

    #[test]
    fn large_handshake_is_fragmented() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        let body = vec![0x5A; 1000];
        let msg = encode_message(TransportKind::Datagram, MessageType::Certificate, 2, &body);
        rl.write_handshake(0, &msg).unwrap();
        rl.flush().unwrap();
        assert!(pipe.0.borrow().iter().all(|d| d.len() <= 300));

        let mut got = Vec::new();
        while let Some(r) = rl.read_record().unwrap() {
            let (frag, h) = Header::parse(&r.fragment, TransportKind::Datagram).unwrap();
            assert_eq!(h.length, 1000);
            assert_eq!(h.message_seq, 2);
            assert_eq!(h.fragment_offset as usize, got.len());
            got.extend_from_slice(frag);
        }
        assert_eq!(got, body);
    }

    #[test]
    fn encrypted_epoch() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        let (client, server) = transforms();
        // Loopback: write as the client, read as the server.
        rl.set_write_transform(client);
        rl.set_read_transform(server);
        rl.write_record(ContentType::ApplicationData, 1, b"secret").unwrap();
        rl.flush().unwrap();
        assert!(!pipe.0.borrow()[0].windows(6).any(|w| w == b"secret"));

        let r = rl.read_record().unwrap().unwrap();
        assert_eq!(r.epoch, 1);
        assert_eq!(&*r.fragment, b"secret");
    }

    #[test]
    fn stale_epoch_record_is_dropped() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        let (client, server) = transforms();
        rl.write_record(ContentType::Handshake, 0, &[7; 20]).unwrap();
        rl.flush().unwrap();
        rl.set_read_transform(server);
        assert_eq!(rl.read_epoch(), 1);

        assert!(rl.read_record().unwrap().is_none());
        assert!(pipe.0.borrow().is_empty());

        rl.set_write_transform(client);
        rl.write_record(ContentType::ApplicationData, 1, b"next").unwrap();
        rl.flush().unwrap();
        let r = rl.read_record().unwrap().unwrap();
        assert_eq!(r.epoch, 1);
        assert_eq!(&*r.fragment, b"next");
    }

    #[test]
    fn tampered_record_does_not_advance_window() {
        let (mut rl, pipe) = layer(TransportKind::Datagram);
        let (client, server) = transforms();
        rl.set_write_transform(client);
        rl.set_read_transform(server);
        rl.write_record(ContentType::ApplicationData, 1, b"secret").unwrap();
        rl.flush().unwrap();

        let original = pipe.0.borrow_mut().pop_front().unwrap();
        let mut tampered = original.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x80;

        pipe.0.borrow_mut().push_back(tampered);
        assert!(rl.read_record().unwrap().is_none());

        // Same epoch and sequence number, intact this time.
        pipe.0.borrow_mut().push_back(original.clone());
        let r = rl.read_record().unwrap().unwrap();
        assert_eq!(&*r.fragment, b"secret");

        pipe.0.borrow_mut().push_back(original);
        assert!(rl.read_record().unwrap().is_none());
    }

    #[test]
    fn previous_epoch_is_writable_until_dropped() {
        let (mut rl, _pipe) = layer(TransportKind::Datagram);
        let (client, _) = transforms();
        rl.set_write_transform(client);
        assert!(rl.write_record(ContentType::Handshake, 0, &[0; 4]).is_ok());
        rl.drop_prev_write();
        assert!(rl.write_record(ContentType::Handshake, 0, &[0; 4]).is_err());
    }

    #[test]
    fn stream_records_are_reassembled() {
        let (mut rl, pipe) = layer(TransportKind::Stream);
        rl.write_record(ContentType::ApplicationData, 0, b"abc").unwrap();
        rl.flush().unwrap();
        let bytes = pipe.0.borrow_mut().pop_front().unwrap();
        // Deliver one byte at a time.
        for b in bytes {
            pipe.0.borrow_mut().push_back(vec![b]);
        }
        let r = rl.read_record().unwrap().unwrap();
        assert_eq!(&*r.fragment, b"abc");
    }

    #[test]
    fn stream_overflow_is_fatal() {
        let (mut rl, pipe) = layer(TransportKind::Stream);
        pipe.0.borrow_mut().push_back(vec![23, 3, 3, 0xFF, 0xFF]);
        assert!(matches!(
            rl.read_record(),
            Err(Error::ProtocolViolation {
                alert: AlertDescription::RecordOverflow,
                ..
            })
        ));
    }

    #[test]
    fn stream_eof_closes() {
        struct Eof;
        impl Transport for Eof {
            fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn recv(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let config = Config::builder(TransportKind::Stream).build().unwrap();
        let mut rl = RecordLayer::new(&config, Eof);
        assert!(matches!(rl.read_record(), Err(Error::ConnectionClosed)));
    }
}

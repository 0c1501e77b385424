use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    #[default]
    Unknown,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::HelloRequest,
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            11 => MessageType::Certificate,
            12 => MessageType::ServerKeyExchange,
            13 => MessageType::CertificateRequest,
            14 => MessageType::ServerHelloDone,
            15 => MessageType::CertificateVerify,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            _ => MessageType::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::HelloRequest => 0,
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::Unknown => 255,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

/// Handshake message header.
///
/// On stream transport only `msg_type` and `length` are on the wire; the
/// remaining fields describe the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    /// Header of an unfragmented message.
    pub fn whole(msg_type: MessageType, length: u32, message_seq: u16) -> Self {
        Header {
            msg_type,
            length,
            message_seq,
            fragment_offset: 0,
            fragment_length: length,
        }
    }

    pub fn parse(input: &[u8], transport: TransportKind) -> IResult<&[u8], Header> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;

        if transport == TransportKind::Stream {
            return Ok((input, Header::whole(msg_type, length, 0)));
        }

        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, transport: TransportKind, output: &mut Buf) {
        output.push(self.msg_type.as_u8());
        output.put_u24(self.length);
        if transport.is_datagram() {
            output.put_u16(self.message_seq);
            output.put_u24(self.fragment_offset);
            output.put_u24(self.fragment_length);
        }
    }

    /// Whether this fragment lies within the message.
    pub fn is_consistent(&self) -> bool {
        self.fragment_offset as u64 + self.fragment_length as u64 <= self.length as u64
    }

    pub fn is_whole(&self) -> bool {
        self.fragment_offset == 0 && self.fragment_length == self.length
    }
}

/// Serialize a complete message: header plus body.
pub fn encode_message(
    transport: TransportKind,
    msg_type: MessageType,
    message_seq: u16,
    body: &[u8],
) -> Buf {
    let mut out = Buf::with_capacity(transport.handshake_header_len() + body.len());
    Header::whole(msg_type, body.len() as u32, message_seq).serialize(transport, &mut out);
    out.extend_from_slice(body);
    out
}

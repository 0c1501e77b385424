//! Wire codecs for records and handshake messages.
//!
//! Parsers are nom functions over borrowed input returning owned messages;
//! serializers append to a [`Buf`](crate::buffer::Buf). Framing that differs
//! between stream and datagram transport takes a
//! [`TransportKind`](crate::TransportKind).

mod alert;
mod certificate;
mod extension;
mod finished;
mod handshake;
mod hello;
mod key_exchange;
mod record;

pub use alert::Alert;
pub use certificate::{Certificate, CertificateRequest, CERT_TYPE_ECDSA_SIGN};
pub use extension::{ExtensionType, Extensions, POINT_FORMAT_UNCOMPRESSED};
pub use finished::Finished;
pub use handshake::{encode_message, Header, MessageType};
pub use hello::{ClientHello, HelloVerifyRequest, ServerHello};
pub use hello::{COMPRESSION_NULL, MAX_SESSION_ID_LEN, RANDOM_LEN};
pub use key_exchange::{ClientKeyExchange, DigitallySigned, EcdheParams, ServerKeyExchange};
pub use record::RecordHeader;

/// The single byte body of a ChangeCipherSpec record.
pub const CHANGE_CIPHER_SPEC: u8 = 1;

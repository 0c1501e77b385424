//! Wire-level enums shared by the record layer and the handshake.

use std::cmp::Ordering;
use std::fmt;

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;

/// Framing of the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Reliable ordered byte stream (TLS).
    Stream,
    /// Unreliable datagrams (DTLS).
    Datagram,
}

impl TransportKind {
    /// Record header length for this transport.
    pub fn record_header_len(&self) -> usize {
        match self {
            TransportKind::Stream => 5,
            TransportKind::Datagram => 13,
        }
    }

    /// Handshake message header length for this transport.
    pub fn handshake_header_len(&self) -> usize {
        match self {
            TransportKind::Stream => 4,
            TransportKind::Datagram => 12,
        }
    }

    /// The protocol version spoken on this transport.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            TransportKind::Stream => ProtocolVersion::TLS1_2,
            TransportKind::Datagram => ProtocolVersion::DTLS1_2,
        }
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self, TransportKind::Datagram)
    }
}

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

// ============================================================================
// Protocol Version
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum ProtocolVersion {
    TLS1_0,
    TLS1_2,
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0301 => ProtocolVersion::TLS1_0,
            0x0303 => ProtocolVersion::TLS1_2,
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    /// Versions tolerated in the record header of an initial ClientHello.
    pub fn is_hello_compatible(&self, transport: TransportKind) -> bool {
        match transport {
            TransportKind::Stream => {
                matches!(self, ProtocolVersion::TLS1_0 | ProtocolVersion::TLS1_2)
            }
            TransportKind::Datagram => {
                matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
            }
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Content Type
// ============================================================================

/// Record content types, the four logical channels of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

// ============================================================================
// Sequence Number
// ============================================================================

/// Epoch and sequence number of a datagram record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence {
    pub epoch: u16,
    /// Sequence number within the epoch (48 bits on the wire).
    pub sequence_number: u64,
}

impl Sequence {
    pub const MAX_DATAGRAM_SEQ: u64 = (1 << 48) - 1;

    pub fn new(epoch: u16) -> Self {
        Self {
            epoch,
            sequence_number: 0,
        }
    }

    /// The 64-bit value used in MAC input and AEAD nonces.
    pub fn as_u64(&self) -> u64 {
        ((self.epoch as u64) << 48) | (self.sequence_number & Self::MAX_DATAGRAM_SEQ)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[epoch: {}, sequence_number: {}]",
            self.epoch, self.sequence_number,
        )
    }
}

impl Ord for Sequence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then(self.sequence_number.cmp(&other.sequence_number))
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Named Groups
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
    Secp521r1,
    X25519,
    X448,
    Unknown(u16),
}

impl NamedGroup {
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedGroup::Secp256r1,
            24 => NamedGroup::Secp384r1,
            25 => NamedGroup::Secp521r1,
            29 => NamedGroup::X25519,
            30 => NamedGroup::X448,
            _ => NamedGroup::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Secp384r1 => 24,
            NamedGroup::Secp521r1 => 25,
            NamedGroup::X25519 => 29,
            NamedGroup::X448 => 30,
            NamedGroup::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedGroup> {
        let (input, value) = be_u16(input)?;
        Ok((input, NamedGroup::from_u16(value)))
    }

    /// Groups with a key exchange implementation, in preference order.
    pub const fn supported() -> &'static [NamedGroup; 3] {
        &[
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
        ]
    }

    pub fn is_supported(&self) -> bool {
        Self::supported().contains(self)
    }
}

// ============================================================================
// Hash and Signature Algorithms
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum HashAlgorithm {
    None,
    MD5,
    SHA1,
    SHA224,
    SHA256,
    SHA384,
    SHA512,
    Unknown(u8),
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl HashAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HashAlgorithm::None,
            1 => HashAlgorithm::MD5,
            2 => HashAlgorithm::SHA1,
            3 => HashAlgorithm::SHA224,
            4 => HashAlgorithm::SHA256,
            5 => HashAlgorithm::SHA384,
            6 => HashAlgorithm::SHA512,
            _ => HashAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::None => 0,
            HashAlgorithm::MD5 => 1,
            HashAlgorithm::SHA1 => 2,
            HashAlgorithm::SHA224 => 3,
            HashAlgorithm::SHA256 => 4,
            HashAlgorithm::SHA384 => 5,
            HashAlgorithm::SHA512 => 6,
            HashAlgorithm::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HashAlgorithm> {
        let (input, value) = be_u8(input)?;
        Ok((input, HashAlgorithm::from_u8(value)))
    }

    /// Digest length in bytes, for the hashes we can compute.
    pub fn output_len(&self) -> Option<usize> {
        match self {
            HashAlgorithm::SHA256 => Some(32),
            HashAlgorithm::SHA384 => Some(48),
            HashAlgorithm::SHA512 => Some(64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SignatureAlgorithm {
    Anonymous,
    RSA,
    DSA,
    ECDSA,
    Unknown(u8),
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl SignatureAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SignatureAlgorithm::Anonymous,
            1 => SignatureAlgorithm::RSA,
            2 => SignatureAlgorithm::DSA,
            3 => SignatureAlgorithm::ECDSA,
            _ => SignatureAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureAlgorithm::Anonymous => 0,
            SignatureAlgorithm::RSA => 1,
            SignatureAlgorithm::DSA => 2,
            SignatureAlgorithm::ECDSA => 3,
            SignatureAlgorithm::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAlgorithm> {
        let (input, value) = be_u8(input)?;
        Ok((input, SignatureAlgorithm::from_u8(value)))
    }
}

/// A TLS 1.2 `SignatureAndHashAlgorithm` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignatureAndHash {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl SignatureAndHash {
    pub const fn new(hash: HashAlgorithm, signature: SignatureAlgorithm) -> Self {
        SignatureAndHash { hash, signature }
    }

    /// Pairs we can verify and produce, in preference order.
    pub const fn supported() -> &'static [SignatureAndHash; 2] {
        const SUPPORTED: [SignatureAndHash; 2] = [
            SignatureAndHash::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA),
            SignatureAndHash::new(HashAlgorithm::SHA384, SignatureAlgorithm::ECDSA),
        ];
        &SUPPORTED
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAndHash> {
        let (input, hash) = HashAlgorithm::parse(input)?;
        let (input, signature) = SignatureAlgorithm::parse(input)?;
        Ok((input, SignatureAndHash { hash, signature }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.hash.as_u8());
        output.push(self.signature.as_u8());
    }
}

// ============================================================================
// Cipher Suites
// ============================================================================

/// How the premaster secret is established and the server authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchange {
    EcdheEcdsa,
    Psk,
    EcdhePsk,
}

impl KeyExchange {
    pub fn uses_ecdhe(&self) -> bool {
        matches!(self, KeyExchange::EcdheEcdsa | KeyExchange::EcdhePsk)
    }

    pub fn uses_psk(&self) -> bool {
        matches!(self, KeyExchange::Psk | KeyExchange::EcdhePsk)
    }

    pub fn uses_certificate(&self) -> bool {
        matches!(self, KeyExchange::EcdheEcdsa)
    }
}

/// TLS 1.2 cipher suites known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    /// 0xC02B
    ECDHE_ECDSA_AES128_GCM_SHA256,
    /// 0xC02C
    ECDHE_ECDSA_AES256_GCM_SHA384,
    /// 0xC023
    ECDHE_ECDSA_AES128_CBC_SHA256,
    /// 0xC024
    ECDHE_ECDSA_AES256_CBC_SHA384,
    /// 0x00A8
    PSK_AES128_GCM_SHA256,
    /// 0x00A9
    PSK_AES256_GCM_SHA384,
    /// 0xC037
    ECDHE_PSK_AES128_CBC_SHA256,
    /// 0x00FF, signalling value, never negotiated.
    EMPTY_RENEGOTIATION_INFO_SCSV,
    Unknown(u16),
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0xC023 => CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
            0xC024 => CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384,
            0x00A8 => CipherSuite::PSK_AES128_GCM_SHA256,
            0x00A9 => CipherSuite::PSK_AES256_GCM_SHA384,
            0xC037 => CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
            0x00FF => CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256 => 0xC023,
            CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384 => 0xC024,
            CipherSuite::PSK_AES128_GCM_SHA256 => 0x00A8,
            CipherSuite::PSK_AES256_GCM_SHA384 => 0x00A9,
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256 => 0xC037,
            CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV => 0x00FF,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    /// Negotiable suites in default preference order.
    pub const fn all() -> &'static [CipherSuite; 7] {
        &[
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
            CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384,
            CipherSuite::PSK_AES128_GCM_SHA256,
            CipherSuite::PSK_AES256_GCM_SHA384,
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
        ]
    }

    pub fn is_supported(&self) -> bool {
        Self::all().contains(self)
    }

    /// PRF and transcript hash of the suite.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
            | CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384
            | CipherSuite::PSK_AES256_GCM_SHA384 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::SHA256,
        }
    }

    pub fn key_exchange(&self) -> Option<KeyExchange> {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
            | CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
            | CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256
            | CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384 => Some(KeyExchange::EcdheEcdsa),
            CipherSuite::PSK_AES128_GCM_SHA256 | CipherSuite::PSK_AES256_GCM_SHA384 => {
                Some(KeyExchange::Psk)
            }
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256 => Some(KeyExchange::EcdhePsk),
            _ => None,
        }
    }

    /// AES-GCM suites. The rest use AES-CBC with HMAC.
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
                | CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
                | CipherSuite::PSK_AES128_GCM_SHA256
                | CipherSuite::PSK_AES256_GCM_SHA384
        )
    }

    /// Signature algorithm of the server certificate, if the suite uses one.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        match self.key_exchange() {
            Some(KeyExchange::EcdheEcdsa) => Some(SignatureAlgorithm::ECDSA),
            _ => None,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDescription {
    CloseNotify,
    UnexpectedMessage,
    BadRecordMac,
    RecordOverflow,
    HandshakeFailure,
    BadCertificate,
    UnsupportedCertificate,
    CertificateExpired,
    CertificateUnknown,
    IllegalParameter,
    DecodeError,
    DecryptError,
    ProtocolVersion,
    InsufficientSecurity,
    InternalError,
    NoRenegotiation,
    UnknownPskIdentity,
    Unknown(u8),
}

impl AlertDescription {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMac,
            22 => AlertDescription::RecordOverflow,
            40 => AlertDescription::HandshakeFailure,
            42 => AlertDescription::BadCertificate,
            43 => AlertDescription::UnsupportedCertificate,
            45 => AlertDescription::CertificateExpired,
            46 => AlertDescription::CertificateUnknown,
            47 => AlertDescription::IllegalParameter,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            70 => AlertDescription::ProtocolVersion,
            71 => AlertDescription::InsufficientSecurity,
            80 => AlertDescription::InternalError,
            100 => AlertDescription::NoRenegotiation,
            115 => AlertDescription::UnknownPskIdentity,
            _ => AlertDescription::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertDescription::CloseNotify => 0,
            AlertDescription::UnexpectedMessage => 10,
            AlertDescription::BadRecordMac => 20,
            AlertDescription::RecordOverflow => 22,
            AlertDescription::HandshakeFailure => 40,
            AlertDescription::BadCertificate => 42,
            AlertDescription::UnsupportedCertificate => 43,
            AlertDescription::CertificateExpired => 45,
            AlertDescription::CertificateUnknown => 46,
            AlertDescription::IllegalParameter => 47,
            AlertDescription::DecodeError => 50,
            AlertDescription::DecryptError => 51,
            AlertDescription::ProtocolVersion => 70,
            AlertDescription::InsufficientSecurity => 71,
            AlertDescription::InternalError => 80,
            AlertDescription::NoRenegotiation => 100,
            AlertDescription::UnknownPskIdentity => 115,
            AlertDescription::Unknown(value) => *value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_suite_wire_values() {
        for suite in CipherSuite::all() {
            assert_eq!(CipherSuite::from_u16(suite.as_u16()), *suite);
            assert!(suite.key_exchange().is_some());
        }
        assert_eq!(CipherSuite::from_u16(0x1301), CipherSuite::Unknown(0x1301));
        assert_eq!(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV.key_exchange(), None);
    }

    #[test]
    fn suite_metadata() {
        let s = CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384;
        assert_eq!(s.hash_algorithm(), HashAlgorithm::SHA384);
        assert_eq!(s.signature_algorithm(), Some(SignatureAlgorithm::ECDSA));

        let p = CipherSuite::PSK_AES128_GCM_SHA256;
        assert_eq!(p.key_exchange(), Some(KeyExchange::Psk));
        assert_eq!(p.signature_algorithm(), None);
    }

    #[test]
    fn sequence_packs_epoch() {
        let s = Sequence {
            epoch: 2,
            sequence_number: 5,
        };
        assert_eq!(s.as_u64(), 0x0002_0000_0000_0005);
        assert!(Sequence::new(3) > s);
    }
}

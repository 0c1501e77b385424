use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::multi::many0;
use nom::number::complete::be_u8;
use nom::IResult;

use super::Extensions;
use crate::buffer::Buf;
use crate::types::{CipherSuite, ProtocolVersion, TransportKind};
use crate::util::{fail, vec16, vec8};

pub const RANDOM_LEN: usize = 32;
pub const MAX_SESSION_ID_LEN: usize = 32;
pub const COMPRESSION_NULL: u8 = 0;

fn random(input: &[u8]) -> IResult<&[u8], [u8; RANDOM_LEN]> {
    let (input, bytes) = take(RANDOM_LEN)(input)?;
    let mut out = [0u8; RANDOM_LEN];
    out.copy_from_slice(bytes);
    Ok((input, out))
}

fn session_id(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (rest, id) = vec8(input)?;
    if id.len() > MAX_SESSION_ID_LEN {
        return fail(input, ErrorKind::TooLarge);
    }
    Ok((rest, id.to_vec()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    /// Datagram transport only.
    pub cookie: Vec<u8>,
    /// As offered, unknown values included.
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Extensions,
}

impl ClientHello {
    pub fn parse(input: &[u8], transport: TransportKind) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = random(input)?;
        let (input, session_id) = session_id(input)?;

        let (input, cookie) = match transport {
            TransportKind::Stream => (input, Vec::new()),
            TransportKind::Datagram => {
                let (input, cookie) = vec8(input)?;
                (input, cookie.to_vec())
            }
        };

        let (input, suites) = vec16(input)?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return fail(suites, ErrorKind::LengthValue);
        }
        let (_, cipher_suites) = many0(CipherSuite::parse)(suites)?;

        let (input, compression) = vec8(input)?;
        if compression.is_empty() {
            return fail(compression, ErrorKind::LengthValue);
        }

        let (input, extensions) = Extensions::parse(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods: compression.to_vec(),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, transport: TransportKind, output: &mut Buf) {
        self.client_version.serialize(output);
        output.extend_from_slice(&self.random);
        output.put_vec8(&self.session_id);
        if transport.is_datagram() {
            output.put_vec8(&self.cookie);
        }
        output.put_u16(self.cipher_suites.len() as u16 * 2);
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }
        output.put_vec8(&self.compression_methods);
        self.extensions.serialize(output);
    }

    /// The fields a HelloVerifyRequest cookie is bound to.
    pub fn cookie_input(&self, output: &mut Buf) {
        self.client_version.serialize(output);
        output.extend_from_slice(&self.random);
        output.put_vec8(&self.session_id);
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Extensions,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = random(input)?;
        let (input, session_id) = session_id(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = Extensions::parse(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.server_version.serialize(output);
        output.extend_from_slice(&self.random);
        output.put_vec8(&self.session_id);
        self.cipher_suite.serialize(output);
        output.push(self.compression_method);
        self.extensions.serialize(output);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = vec8(input)?;
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie: cookie.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.server_version.serialize(output);
        output.put_vec8(&self.cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_HELLO: &[u8] = &[
        0xFE, 0xFD, // DTLS 1.2
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, // random
        0x00, // session id
        0x02, 0xAA, 0xBB, // cookie
        0x00, 0x04, 0xC0, 0x2B, 0x13, 0x01, // suites, one unknown
        0x01, 0x00, // null compression
        0x00, 0x04, 0x00, 0x17, 0x00, 0x00, // extended_master_secret
    ];

    #[test]
    fn client_hello_datagram() {
        let (rest, ch) = ClientHello::parse(CLIENT_HELLO, TransportKind::Datagram).unwrap();
        assert!(rest.is_empty());
        assert_eq!(ch.client_version, ProtocolVersion::DTLS1_2);
        assert_eq!(ch.cookie, vec![0xAA, 0xBB]);
        assert_eq!(
            ch.cipher_suites,
            vec![
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
                CipherSuite::Unknown(0x1301)
            ]
        );
        assert!(ch.extensions.extended_master_secret);

        let mut out = Buf::new();
        ch.serialize(TransportKind::Datagram, &mut out);
        assert_eq!(&*out, CLIENT_HELLO);
    }

    #[test]
    fn client_hello_stream_has_no_cookie() {
        let mut stream = CLIENT_HELLO[..35].to_vec();
        stream[0] = 0x03;
        stream[1] = 0x03;
        stream.extend_from_slice(&CLIENT_HELLO[38..]);
        let (_, ch) = ClientHello::parse(&stream, TransportKind::Stream).unwrap();
        assert_eq!(ch.client_version, ProtocolVersion::TLS1_2);
        assert!(ch.cookie.is_empty());
        assert_eq!(ch.compression_methods, vec![COMPRESSION_NULL]);
    }

    #[test]
    fn client_hello_odd_suite_list() {
        let mut bad = CLIENT_HELLO.to_vec();
        bad[39] = 0x03;
        assert!(ClientHello::parse(&bad, TransportKind::Datagram).is_err());
    }

    #[test]
    fn server_hello() {
        let sh = ServerHello {
            server_version: ProtocolVersion::TLS1_2,
            random: [7; 32],
            session_id: vec![1; 32],
            cipher_suite: CipherSuite::PSK_AES128_GCM_SHA256,
            compression_method: COMPRESSION_NULL,
            extensions: Extensions {
                renegotiation_info: Some(vec![]),
                ..Default::default()
            },
        };
        let mut out = Buf::new();
        sh.serialize(&mut out);
        assert_eq!(out.len(), 2 + 32 + 33 + 2 + 1 + 7);
        let (_, back) = ServerHello::parse(&out).unwrap();
        assert_eq!(back, sh);
    }

    #[test]
    fn hello_verify_request() {
        let data = [0xFE, 0xFF, 0x03, 1, 2, 3];
        let (rest, hvr) = HelloVerifyRequest::parse(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(hvr.server_version, ProtocolVersion::DTLS1_0);
        assert_eq!(hvr.cookie, vec![1, 2, 3]);
    }

    #[test]
    fn oversized_session_id() {
        let mut data = vec![0x03, 0x03];
        data.extend_from_slice(&[0; 32]);
        data.push(33);
        data.extend_from_slice(&[0; 33]);
        assert!(ServerHello::parse(&data).is_err());
    }
}

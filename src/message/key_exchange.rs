//! ServerKeyExchange, ClientKeyExchange and signatures.

use nom::error::ErrorKind;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{KeyExchange, NamedGroup, SignatureAndHash};
use crate::util::{fail, vec16, vec8};

/// `ECCurveType.named_curve`
pub const CURVE_TYPE_NAMED: u8 = 3;

/// Ephemeral ECDH parameters on a named curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdheParams {
    pub group: NamedGroup,
    pub public: Vec<u8>,
}

impl EcdheParams {
    pub fn parse(input: &[u8]) -> IResult<&[u8], EcdheParams> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != CURVE_TYPE_NAMED {
            return fail(input, ErrorKind::Tag);
        }
        let (input, group) = NamedGroup::parse(input)?;
        let (input, public) = vec8(input)?;
        if public.is_empty() {
            return fail(input, ErrorKind::LengthValue);
        }
        Ok((
            input,
            EcdheParams {
                group,
                public: public.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(CURVE_TYPE_NAMED);
        output.put_u16(self.group.as_u16());
        output.put_vec8(&self.public);
    }
}

/// A signature with the algorithm pair that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub algorithm: SignatureAndHash,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn parse(input: &[u8]) -> IResult<&[u8], DigitallySigned> {
        let (input, algorithm) = SignatureAndHash::parse(input)?;
        let (input, signature) = vec16(input)?;
        Ok((
            input,
            DigitallySigned {
                algorithm,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.algorithm.serialize(output);
        output.put_vec16(&self.signature);
    }
}

/// ServerKeyExchange for the supported key exchange methods.
///
/// - ECDHE_ECDSA: params, signature
/// - PSK: identity hint
/// - ECDHE_PSK: identity hint, params
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub psk_hint: Option<Vec<u8>>,
    pub params: Option<EcdheParams>,
    pub signature: Option<DigitallySigned>,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchange) -> IResult<&[u8], ServerKeyExchange> {
        let (input, psk_hint) = if kx.uses_psk() {
            let (input, hint) = vec16(input)?;
            (input, Some(hint.to_vec()))
        } else {
            (input, None)
        };

        let (input, params) = if kx.uses_ecdhe() {
            let (input, params) = EcdheParams::parse(input)?;
            (input, Some(params))
        } else {
            (input, None)
        };

        let (input, signature) = if kx.uses_certificate() {
            let (input, signature) = DigitallySigned::parse(input)?;
            (input, Some(signature))
        } else {
            (input, None)
        };

        Ok((
            input,
            ServerKeyExchange {
                psk_hint,
                params,
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        if let Some(hint) = &self.psk_hint {
            output.put_vec16(hint);
        }
        if let Some(params) = &self.params {
            params.serialize(output);
        }
        if let Some(signature) = &self.signature {
            signature.serialize(output);
        }
    }
}

/// ClientKeyExchange for the supported key exchange methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub psk_identity: Option<Vec<u8>>,
    pub public: Option<Vec<u8>>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchange) -> IResult<&[u8], ClientKeyExchange> {
        let (input, psk_identity) = if kx.uses_psk() {
            let (input, identity) = vec16(input)?;
            (input, Some(identity.to_vec()))
        } else {
            (input, None)
        };

        let (input, public) = if kx.uses_ecdhe() {
            let (input, public) = vec8(input)?;
            if public.is_empty() {
                return fail(input, ErrorKind::LengthValue);
            }
            (input, Some(public.to_vec()))
        } else {
            (input, None)
        };

        Ok((
            input,
            ClientKeyExchange {
                psk_identity,
                public,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        if let Some(identity) = &self.psk_identity {
            output.put_vec16(identity);
        }
        if let Some(public) = &self.public {
            output.put_vec8(public);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HashAlgorithm, SignatureAlgorithm};

    const ECDHE_ECDSA_SKE: &[u8] = &[
        0x03, // named_curve
        0x00, 0x1D, // x25519
        0x04, 0xA1, 0xA2, 0xA3, 0xA4, // point
        0x04, 0x03, // sha256, ecdsa
        0x00, 0x03, 0x30, 0x01, 0x02, // signature
    ];

    #[test]
    fn signed_server_key_exchange() {
        let (rest, ske) =
            ServerKeyExchange::parse(ECDHE_ECDSA_SKE, KeyExchange::EcdheEcdsa).unwrap();
        assert!(rest.is_empty());
        assert!(ske.psk_hint.is_none());
        let params = ske.params.as_ref().unwrap();
        assert_eq!(params.group, NamedGroup::X25519);
        assert_eq!(params.public, vec![0xA1, 0xA2, 0xA3, 0xA4]);
        let sig = ske.signature.as_ref().unwrap();
        assert_eq!(
            sig.algorithm,
            SignatureAndHash::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA)
        );

        let mut out = Buf::new();
        ske.serialize(&mut out);
        assert_eq!(&*out, ECDHE_ECDSA_SKE);
    }

    #[test]
    fn psk_server_key_exchange() {
        let data = [0x00, 0x02, b'h', b'i', 0x03, 0x00, 0x17, 0x01, 0x04];
        let (rest, ske) = ServerKeyExchange::parse(&data, KeyExchange::EcdhePsk).unwrap();
        assert!(rest.is_empty());
        assert_eq!(ske.psk_hint.as_deref(), Some(&b"hi"[..]));
        assert_eq!(ske.params.unwrap().group, NamedGroup::Secp256r1);
        assert!(ske.signature.is_none());
    }

    #[test]
    fn explicit_curves_rejected() {
        let data = [0x01, 0x00, 0x1D, 0x01, 0x04];
        assert!(EcdheParams::parse(&data).is_err());
    }

    #[test]
    fn client_key_exchange() {
        let cke = ClientKeyExchange {
            psk_identity: Some(b"client".to_vec()),
            public: Some(vec![4; 65]),
        };
        let mut out = Buf::new();
        cke.serialize(&mut out);
        assert_eq!(out.len(), 2 + 6 + 1 + 65);
        let (_, back) = ClientKeyExchange::parse(&out, KeyExchange::EcdhePsk).unwrap();
        assert_eq!(back, cke);

        let (_, plain) = ClientKeyExchange::parse(&[0, 1, b'x'], KeyExchange::Psk).unwrap();
        assert_eq!(plain.psk_identity, Some(b"x".to_vec()));
        assert!(plain.public.is_none());
    }
}

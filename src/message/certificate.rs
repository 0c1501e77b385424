use nom::error::ErrorKind;
use nom::multi::many0;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::SignatureAndHash;
use crate::util::{fail, vec16, vec24, vec8};

/// `ClientCertificateType.ecdsa_sign`
pub const CERT_TYPE_ECDSA_SIGN: u8 = 64;

/// A certificate chain, leaf first. May be empty when a client has nothing
/// to offer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub chain: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (rest, mut list) = vec24(input)?;
        let mut chain = Vec::new();
        while !list.is_empty() {
            let (after, cert) = vec24(list)?;
            if cert.is_empty() {
                return fail(list, ErrorKind::LengthValue);
            }
            chain.push(cert.to_vec());
            list = after;
        }
        Ok((rest, Certificate { chain }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let total: usize = self.chain.iter().map(|c| c.len() + 3).sum();
        output.put_u24(total as u32);
        for cert in &self.chain {
            output.put_vec24(cert);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<SignatureAndHash>,
    /// Opaque DER distinguished names.
    pub authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types) = vec8(input)?;
        if types.is_empty() {
            return fail(input, ErrorKind::LengthValue);
        }

        let (input, algs) = vec16(input)?;
        if algs.len() % 2 != 0 {
            return fail(algs, ErrorKind::LengthValue);
        }
        let (_, signature_algorithms) = many0(SignatureAndHash::parse)(algs)?;

        let (input, mut names) = vec16(input)?;
        let mut authorities = Vec::new();
        while !names.is_empty() {
            let (after, dn) = vec16(names)?;
            authorities.push(dn.to_vec());
            names = after;
        }

        Ok((
            input,
            CertificateRequest {
                certificate_types: types.to_vec(),
                signature_algorithms,
                authorities,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.put_vec8(&self.certificate_types);
        output.put_u16(self.signature_algorithms.len() as u16 * 2);
        for alg in &self.signature_algorithms {
            alg.serialize(output);
        }
        let names = output.begin_len16();
        for dn in &self.authorities {
            output.put_vec16(dn);
        }
        output.fill_len16(names);
    }
}

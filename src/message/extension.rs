//! Hello extensions.
//!
//! Known extensions are decoded into [`Extensions`]; unknown ones are
//! skipped. A repeated extension is a decode error.

use nom::error::ErrorKind;
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{NamedGroup, SignatureAndHash};
use crate::util::{fail, vec16, vec8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    ExtendedMasterSecret,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ExtensionType::ServerName,
            10 => ExtensionType::SupportedGroups,
            11 => ExtensionType::EcPointFormats,
            13 => ExtensionType::SignatureAlgorithms,
            23 => ExtensionType::ExtendedMasterSecret,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0,
            ExtensionType::SupportedGroups => 10,
            ExtensionType::EcPointFormats => 11,
            ExtensionType::SignatureAlgorithms => 13,
            ExtensionType::ExtendedMasterSecret => 23,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }
}

/// The only point format we produce or accept.
pub const POINT_FORMAT_UNCOMPRESSED: u8 = 0;

const SNI_HOST_NAME: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extensions {
    pub server_name: Option<String>,
    pub supported_groups: Option<Vec<NamedGroup>>,
    pub ec_point_formats: Option<Vec<u8>>,
    pub signature_algorithms: Option<Vec<SignatureAndHash>>,
    pub extended_master_secret: bool,
    /// `renegotiated_connection` of RFC 5746.
    pub renegotiation_info: Option<Vec<u8>>,
}

impl Extensions {
    /// Parse the optional extension block at the end of a hello.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Extensions> {
        let mut ext = Extensions::default();
        if input.is_empty() {
            return Ok((input, ext));
        }

        let (rest, mut block) = vec16(input)?;
        let mut seen: Vec<u16> = Vec::new();

        while !block.is_empty() {
            let (after, ext_type) = be_u16(block)?;
            let (after, data) = vec16(after)?;

            if seen.contains(&ext_type) {
                return fail(block, ErrorKind::Verify);
            }
            seen.push(ext_type);

            match ExtensionType::from_u16(ext_type) {
                ExtensionType::ServerName => {
                    ext.server_name = parse_server_name(data)?;
                }
                ExtensionType::SupportedGroups => {
                    let (_, list) = only(vec16)(data)?;
                    let (_, groups) = only(many0(NamedGroup::parse))(list)?;
                    ext.supported_groups = Some(groups);
                }
                ExtensionType::EcPointFormats => {
                    let (_, list) = only(vec8)(data)?;
                    ext.ec_point_formats = Some(list.to_vec());
                }
                ExtensionType::SignatureAlgorithms => {
                    let (_, list) = only(vec16)(data)?;
                    let (_, algs) = only(many0(SignatureAndHash::parse))(list)?;
                    ext.signature_algorithms = Some(algs);
                }
                ExtensionType::ExtendedMasterSecret => {
                    if !data.is_empty() {
                        return fail(data, ErrorKind::Verify);
                    }
                    ext.extended_master_secret = true;
                }
                ExtensionType::RenegotiationInfo => {
                    let (_, info) = only(vec8)(data)?;
                    ext.renegotiation_info = Some(info.to_vec());
                }
                ExtensionType::Unknown(_) => {}
            }

            block = after;
        }

        Ok((rest, ext))
    }

    /// Serialize the extension block. Nothing is written when empty.
    pub fn serialize(&self, output: &mut Buf) {
        if self.is_empty() {
            return;
        }
        let block = output.begin_len16();

        if let Some(name) = &self.server_name {
            output.put_u16(ExtensionType::ServerName.as_u16());
            let ext = output.begin_len16();
            let list = output.begin_len16();
            output.push(SNI_HOST_NAME);
            output.put_vec16(name.as_bytes());
            output.fill_len16(list);
            output.fill_len16(ext);
        }

        if let Some(groups) = &self.supported_groups {
            output.put_u16(ExtensionType::SupportedGroups.as_u16());
            output.put_u16(groups.len() as u16 * 2 + 2);
            output.put_u16(groups.len() as u16 * 2);
            for g in groups {
                output.put_u16(g.as_u16());
            }
        }

        if let Some(formats) = &self.ec_point_formats {
            output.put_u16(ExtensionType::EcPointFormats.as_u16());
            output.put_u16(formats.len() as u16 + 1);
            output.put_vec8(formats);
        }

        if let Some(algs) = &self.signature_algorithms {
            output.put_u16(ExtensionType::SignatureAlgorithms.as_u16());
            output.put_u16(algs.len() as u16 * 2 + 2);
            output.put_u16(algs.len() as u16 * 2);
            for a in algs {
                a.serialize(output);
            }
        }

        if self.extended_master_secret {
            output.put_u16(ExtensionType::ExtendedMasterSecret.as_u16());
            output.put_u16(0);
        }

        if let Some(info) = &self.renegotiation_info {
            output.put_u16(ExtensionType::RenegotiationInfo.as_u16());
            output.put_u16(info.len() as u16 + 1);
            output.put_vec8(info);
        }

        output.fill_len16(block);
    }

    pub fn is_empty(&self) -> bool {
        self.server_name.is_none()
            && self.supported_groups.is_none()
            && self.ec_point_formats.is_none()
            && self.signature_algorithms.is_none()
            && !self.extended_master_secret
            && self.renegotiation_info.is_none()
    }
}

/// Apply `f` and require it to consume all input.
fn only<'a, T, F>(mut f: F) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>
where
    F: FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
{
    move |input: &'a [u8]| {
        let (rest, value) = f(input)?;
        if !rest.is_empty() {
            return fail(rest, ErrorKind::LengthValue);
        }
        Ok((rest, value))
    }
}

/// First host_name entry of a server_name list.
fn parse_server_name(data: &[u8]) -> Result<Option<String>, nom::Err<nom::error::Error<&[u8]>>> {
    // A server may echo an empty extension.
    if data.is_empty() {
        return Ok(None);
    }
    let (_, mut list) = only(vec16)(data)?;
    while !list.is_empty() {
        let (rest, name_type) = be_u8(list)?;
        let (rest, name) = vec16(rest)?;
        if name_type == SNI_HOST_NAME {
            let Ok(name) = std::str::from_utf8(name) else {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    name,
                    ErrorKind::Char,
                )));
            };
            return Ok(Some(name.to_string()));
        }
        list = rest;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HashAlgorithm, SignatureAlgorithm};

    fn full() -> Extensions {
        Extensions {
            server_name: Some("example.com".to_string()),
            supported_groups: Some(vec![NamedGroup::X25519, NamedGroup::Secp256r1]),
            ec_point_formats: Some(vec![POINT_FORMAT_UNCOMPRESSED]),
            signature_algorithms: Some(vec![SignatureAndHash::new(
                HashAlgorithm::SHA256,
                SignatureAlgorithm::ECDSA,
            )]),
            extended_master_secret: true,
            renegotiation_info: Some(vec![]),
        }
    }

    #[test]
    fn supported_groups_wire_format() {
        let ext = Extensions {
            supported_groups: Some(vec![NamedGroup::X25519, NamedGroup::Secp256r1]),
            ..Default::default()
        };
        let mut out = Buf::new();
        ext.serialize(&mut out);
        assert_eq!(
            &*out,
            &[0x00, 0x0A, 0x00, 0x0A, 0x00, 0x06, 0x00, 0x04, 0x00, 0x1D, 0x00, 0x17]
        );
    }

    #[test]
    fn parse_what_we_write() {
        let ext = full();
        let mut out = Buf::new();
        ext.serialize(&mut out);
        let (rest, parsed) = Extensions::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        // session_ticket (35) with 2 bytes, then extended_master_secret
        let data = [0x00, 0x0A, 0x00, 0x23, 0x00, 0x02, 0xAB, 0xCD, 0x00, 0x17, 0x00, 0x00];
        let (_, ext) = Extensions::parse(&data).unwrap();
        assert!(ext.extended_master_secret);
        assert!(ext.server_name.is_none());
    }

    #[test]
    fn duplicate_extension_rejected() {
        let data = [0x00, 0x08, 0x00, 0x17, 0x00, 0x00, 0x00, 0x17, 0x00, 0x00];
        assert!(Extensions::parse(&data).is_err());
    }

    #[test]
    fn empty_block_writes_nothing() {
        let mut out = Buf::new();
        Extensions::default().serialize(&mut out);
        assert!(out.is_empty());
        let (_, ext) = Extensions::parse(&[]).unwrap();
        assert!(ext.is_empty());
    }
}

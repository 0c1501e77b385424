//! PKCS#12 password based encryption with AES-CBC.

use der::asn1::OctetStringRef;
use der::{Decode, Encode, Sequence};
use spki::ObjectIdentifier;
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

use super::{pkcs12_derivation, DerivationId};
use crate::crypto::rust_crypto::aes_cbc;
use crate::types::HashAlgorithm;
use crate::Error;

/// Longest password accepted before transcoding.
pub const MAX_PASSWORD_LEN: usize = 128;

const BLOCK_LEN: usize = 16;

const OID_AES128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const OID_AES256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

/// ```text
/// pkcs-12PbeParams ::= SEQUENCE {
///     salt        OCTET STRING,
///     iterations  INTEGER
/// }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Pkcs12PbeParams<'a> {
    pub salt: OctetStringRef<'a>,
    pub iterations: u32,
}

impl<'a> Pkcs12PbeParams<'a> {
    pub fn new(salt: &'a [u8], iterations: u32) -> Result<Self, Error> {
        let salt = OctetStringRef::new(salt).map_err(|_| Error::BadInput("pbe salt too long"))?;
        Ok(Pkcs12PbeParams { salt, iterations })
    }

    pub fn parse(der: &'a [u8]) -> Result<Self, Error> {
        Self::from_der(der).map_err(|_| Error::BadInput("malformed pkcs-12PbeParams"))
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        self.to_der()
            .map_err(|_| Error::BadInput("cannot encode pkcs-12PbeParams"))
    }
}

/// Bulk ciphers usable for PBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbeCipher {
    Aes128Cbc,
    Aes256Cbc,
}

impl PbeCipher {
    /// Map a cipher OID. Anything but AES-CBC is [`Error::Unavailable`].
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self, Error> {
        match *oid {
            OID_AES128_CBC => Ok(PbeCipher::Aes128Cbc),
            OID_AES256_CBC => Ok(PbeCipher::Aes256Cbc),
            _ => Err(Error::Unavailable(format!("pbe cipher {}", oid))),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            PbeCipher::Aes128Cbc => 16,
            PbeCipher::Aes256Cbc => 32,
        }
    }
}

/// Transcode a password to the two byte big-endian form with a trailing
/// zero terminator.
pub fn bmp_password(password: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(Error::BadInput("password longer than 128 bytes"));
    }
    let mut out = Zeroizing::new(Vec::with_capacity(password.len() * 2 + 2));
    for &b in password {
        out.push(0);
        out.push(b);
    }
    out.extend_from_slice(&[0, 0]);
    Ok(out)
}

type KeyIv = (Zeroizing<Vec<u8>>, Zeroizing<[u8; BLOCK_LEN]>);

fn derive_key_iv(
    cipher: PbeCipher,
    hash: HashAlgorithm,
    params_der: &[u8],
    password: &[u8],
) -> Result<KeyIv, Error> {
    let params = Pkcs12PbeParams::parse(params_der)?;
    let secret = bmp_password(password)?;

    let mut key = Zeroizing::new(vec![0u8; cipher.key_len()]);
    let mut iv = Zeroizing::new([0u8; BLOCK_LEN]);
    let salt = params.salt.as_bytes();

    pkcs12_derivation(
        &mut key,
        &secret,
        salt,
        hash,
        DerivationId::Key,
        params.iterations,
    )?;
    pkcs12_derivation(
        &mut iv[..],
        &secret,
        salt,
        hash,
        DerivationId::Iv,
        params.iterations,
    )?;

    Ok((key, iv))
}

/// Encrypt `data` with PKCS#7 padding.
pub fn pkcs12_pbe_encrypt(
    cipher: PbeCipher,
    hash: HashAlgorithm,
    params_der: &[u8],
    password: &[u8],
    data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let (key, iv) = derive_key_iv(cipher, hash, params_der, password)?;
    let block = aes_cbc(&key).map_err(Error::CryptoError)?;

    let pad = BLOCK_LEN - data.len() % BLOCK_LEN;
    let mut out = Zeroizing::new(Vec::with_capacity(data.len() + pad));
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);

    block
        .encrypt_cbc(&iv[..], &mut out)
        .map_err(Error::CryptoError)?;
    Ok(out)
}

/// Decrypt `data` and strip the PKCS#7 padding.
///
/// A wrong password shows up as bad padding: [`Error::PasswordMismatch`].
pub fn pkcs12_pbe_decrypt(
    cipher: PbeCipher,
    hash: HashAlgorithm,
    params_der: &[u8],
    password: &[u8],
    data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let (key, iv) = derive_key_iv(cipher, hash, params_der, password)?;
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(Error::PasswordMismatch);
    }
    let block = aes_cbc(&key).map_err(Error::CryptoError)?;

    let mut out = Zeroizing::new(data.to_vec());
    block
        .decrypt_cbc(&iv[..], &mut out)
        .map_err(Error::CryptoError)?;

    let pad = out[out.len() - 1];
    let mut good = !pad.ct_eq(&0) & Choice::from((pad as usize <= BLOCK_LEN) as u8);
    for (i, b) in out.iter().rev().take(BLOCK_LEN).enumerate() {
        let in_pad = Choice::from(((i as u8) < pad) as u8);
        good &= !in_pad | b.ct_eq(&pad);
    }

    if !bool::from(good) {
        return Err(Error::PasswordMismatch);
    }
    let len = out.len() - pad as usize;
    out.truncate(len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<u8> {
        Pkcs12PbeParams::new(&[0x0a, 0x58, 0xcf, 0x64, 0x53, 0x0d, 0x82, 0x3f], 2048)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn params_der_layout() {
        let der = params();
        // SEQUENCE { OCTET STRING (8), INTEGER 2048 }
        assert_eq!(
            der,
            [0x30, 0x0e, 0x04, 0x08, 0x0a, 0x58, 0xcf, 0x64, 0x53, 0x0d, 0x82, 0x3f, 0x02, 0x02, 0x08, 0x00]
        );
        let back = Pkcs12PbeParams::parse(&der).unwrap();
        assert_eq!(back.iterations, 2048);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut der = params();
        der.push(0);
        assert!(Pkcs12PbeParams::parse(&der).is_err());
    }

    #[test]
    fn bmp_transcoding() {
        assert_eq!(
            &bmp_password(b"smeg").unwrap()[..],
            &[0, b's', 0, b'm', 0, b'e', 0, b'g', 0, 0]
        );
        assert!(matches!(
            bmp_password(&[b'a'; 129]),
            Err(Error::BadInput(_))
        ));
    }

    #[test]
    fn encrypt_then_decrypt() {
        let p = params();
        for cipher in [PbeCipher::Aes128Cbc, PbeCipher::Aes256Cbc] {
            let ct = pkcs12_pbe_encrypt(cipher, HashAlgorithm::SHA256, &p, b"secret", b"private key bytes")
                .unwrap();
            assert_eq!(ct.len(), 32);
            let pt = pkcs12_pbe_decrypt(cipher, HashAlgorithm::SHA256, &p, b"secret", &ct).unwrap();
            assert_eq!(&pt[..], b"private key bytes");
        }
    }

    #[test]
    fn full_block_gets_full_padding() {
        let p = params();
        let ct = pkcs12_pbe_encrypt(PbeCipher::Aes128Cbc, HashAlgorithm::SHA384, &p, b"pw", &[7u8; 16])
            .unwrap();
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn wrong_password_is_mismatch() {
        let p = params();
        let ct = pkcs12_pbe_encrypt(PbeCipher::Aes128Cbc, HashAlgorithm::SHA256, &p, b"right", b"data")
            .unwrap();
        // One in ~256 wrong keys decrypts to a valid single-byte pad, so try a few.
        let mismatches = [&b"wrong"[..], b"wrong2", b"wrong3", b"wrong4"]
            .iter()
            .filter(|pw| {
                matches!(
                    pkcs12_pbe_decrypt(PbeCipher::Aes128Cbc, HashAlgorithm::SHA256, &p, pw, &ct),
                    Err(Error::PasswordMismatch)
                )
            })
            .count();
        assert!(mismatches >= 3);
    }

    #[test]
    fn legacy_cipher_unavailable() {
        let triple_des = ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.3");
        assert!(matches!(
            PbeCipher::from_oid(&triple_des),
            Err(Error::Unavailable(_))
        ));
        assert_eq!(
            PbeCipher::from_oid(&OID_AES256_CBC).unwrap(),
            PbeCipher::Aes256Cbc
        );
    }
}

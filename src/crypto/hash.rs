//! Digest and HMAC helpers plus the running handshake transcript.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::{ConditionallySelectable, ConstantTimeEq};

use crate::buffer::Buf;
use crate::types::HashAlgorithm;
use crate::Error;

/// Incremental hash selected by [`HashAlgorithm`].
#[derive(Clone)]
pub(crate) enum HashContext {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl HashContext {
    pub fn new(hash: HashAlgorithm) -> Result<Self, Error> {
        match hash {
            HashAlgorithm::SHA256 => Ok(HashContext::Sha256(Sha256::new())),
            HashAlgorithm::SHA384 => Ok(HashContext::Sha384(Sha384::new())),
            HashAlgorithm::SHA512 => Ok(HashContext::Sha512(Sha512::new())),
            _ => Err(Error::Unavailable(format!("hash {:?}", hash))),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashContext::Sha256(ctx) => ctx.update(data),
            HashContext::Sha384(ctx) => ctx.update(data),
            HashContext::Sha512(ctx) => ctx.update(data),
        }
    }

    pub fn finalize_into(self, out: &mut Buf) {
        out.clear();
        match self {
            HashContext::Sha256(ctx) => out.extend_from_slice(&ctx.finalize()),
            HashContext::Sha384(ctx) => out.extend_from_slice(&ctx.finalize()),
            HashContext::Sha512(ctx) => out.extend_from_slice(&ctx.finalize()),
        }
    }
}

/// One-shot digest over the concatenation of `parts`.
pub(crate) fn digest(hash: HashAlgorithm, parts: &[&[u8]]) -> Result<Buf, Error> {
    let mut ctx = HashContext::new(hash)?;
    for p in parts {
        ctx.update(p);
    }
    let mut out = Buf::new();
    ctx.finalize_into(&mut out);
    Ok(out)
}

fn mac_parts<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<M, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::CryptoError("hmac key length".to_string()))?;
    for p in parts {
        mac.update(p);
    }
    Ok(mac)
}

/// HMAC over the concatenation of `parts`.
pub(crate) fn hmac(hash: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> Result<Buf, Error> {
    let out = match hash {
        HashAlgorithm::SHA256 => {
            Buf::from_slice(&mac_parts::<Hmac<Sha256>>(key, parts)?.finalize().into_bytes())
        }
        HashAlgorithm::SHA384 => {
            Buf::from_slice(&mac_parts::<Hmac<Sha384>>(key, parts)?.finalize().into_bytes())
        }
        _ => return Err(Error::Unavailable(format!("hmac {:?}", hash))),
    };
    Ok(out)
}

/// Constant time HMAC check over the concatenation of `parts`.
pub(crate) fn hmac_verify(
    hash: HashAlgorithm,
    key: &[u8],
    parts: &[&[u8]],
    tag: &[u8],
) -> Result<bool, Error> {
    let ok = match hash {
        HashAlgorithm::SHA256 => mac_parts::<Hmac<Sha256>>(key, parts)?
            .verify_slice(tag)
            .is_ok(),
        HashAlgorithm::SHA384 => mac_parts::<Hmac<Sha384>>(key, parts)?
            .verify_slice(tag)
            .is_ok(),
        _ => return Err(Error::Unavailable(format!("hmac {:?}", hash))),
    };
    Ok(ok)
}

/// HMAC over `prefix ‖ data[..len]` where `len` is secret and lies in
/// `min_len..=data.len()`.
///
/// The inner hash is finalized once for every candidate length and the
/// matching one is picked with a constant time select, so the number of
/// compression rounds depends only on `min_len` and `data.len()`.
pub(crate) fn hmac_ct(
    hash: HashAlgorithm,
    key: &[u8],
    prefix: &[u8],
    data: &[u8],
    min_len: usize,
    len: usize,
) -> Result<Buf, Error> {
    let block_len = match hash {
        HashAlgorithm::SHA256 => 64,
        HashAlgorithm::SHA384 => 128,
        _ => return Err(Error::Unavailable(format!("hmac {:?}", hash))),
    };
    if min_len > data.len() {
        return Err(Error::CryptoError("hmac span".to_string()));
    }

    let mut key_block = if key.len() > block_len {
        digest(hash, &[key])?
    } else {
        Buf::from_slice(key)
    };
    key_block.resize(block_len, 0);

    let mut pad = key_block.clone();
    pad.iter_mut().for_each(|b| *b ^= 0x36);
    let mut inner = HashContext::new(hash)?;
    inner.update(&pad);
    inner.update(prefix);
    inner.update(&data[..min_len]);

    let mut tag = Buf::new();
    let mut candidate = Buf::new();
    for i in min_len..=data.len() {
        inner.clone().finalize_into(&mut candidate);
        tag.resize(candidate.len(), 0);
        let hit = (i as u64).ct_eq(&(len as u64));
        for (t, c) in tag.iter_mut().zip(candidate.iter()) {
            t.conditional_assign(c, hit);
        }
        if i < data.len() {
            inner.update(&data[i..i + 1]);
        }
    }

    let mut pad = key_block;
    pad.iter_mut().for_each(|b| *b ^= 0x5c);
    let mut outer = HashContext::new(hash)?;
    outer.update(&pad);
    outer.update(&tag);
    let mut out = Buf::new();
    outer.finalize_into(&mut out);
    Ok(out)
}

/// Running hash of every handshake byte.
///
/// Both SHA-256 and SHA-384 are fed from the first message because the
/// PRF hash is only known once ServerHello picks the suite.
#[derive(Clone)]
pub(crate) struct Transcript {
    sha256: Sha256,
    sha384: Sha384,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript {
            sha256: Sha256::new(),
            sha384: Sha384::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.sha384.update(data);
    }

    /// Hash of everything so far. The running state is left untouched.
    pub fn digest(&self, hash: HashAlgorithm) -> Result<Buf, Error> {
        match hash {
            HashAlgorithm::SHA256 => Ok(Buf::from_slice(&self.sha256.clone().finalize())),
            HashAlgorithm::SHA384 => Ok(Buf::from_slice(&self.sha384.clone().finalize())),
            _ => Err(Error::Unavailable(format!("transcript hash {:?}", hash))),
        }
    }

    pub fn reset(&mut self) {
        *self = Transcript::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(b: &[u8]) -> String {
        b.iter().map(|x| format!("{:02x}", x)).collect()
    }

    #[test]
    fn transcript_matches_one_shot() {
        let mut t = Transcript::new();
        t.update(b"abc");
        let a = t.digest(HashAlgorithm::SHA256).unwrap();
        assert_eq!(
            hex(&a),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        t.update(b"def");
        let b = t.digest(HashAlgorithm::SHA384).unwrap();
        let one = digest(HashAlgorithm::SHA384, &[b"abc", b"def"]).unwrap();
        assert_eq!(b, one);
    }

    #[test]
    fn hmac_verify_detects_change() {
        let tag = hmac(HashAlgorithm::SHA256, b"key", &[b"data"]).unwrap();
        assert!(hmac_verify(HashAlgorithm::SHA256, b"key", &[b"data"], &tag).unwrap());
        assert!(!hmac_verify(HashAlgorithm::SHA256, b"key", &[b"datb"], &tag).unwrap());
    }

    #[test]
    fn hmac_ct_agrees_with_hmac_for_every_length() {
        let data: Vec<u8> = (0..120u8).collect();
        for hash in [HashAlgorithm::SHA256, HashAlgorithm::SHA384] {
            for len in 40..=data.len() {
                let plain = hmac(hash, b"mac key", &[b"header", &data[..len]]).unwrap();
                let ct = hmac_ct(hash, b"mac key", b"header", &data, 40, len).unwrap();
                assert_eq!(ct, plain, "{:?} len {}", hash, len);
            }
        }
    }

    #[test]
    fn hmac_ct_hashes_long_keys() {
        let key = [0x0b; 200];
        let plain = hmac(HashAlgorithm::SHA256, &key, &[b"abc"]).unwrap();
        let ct = hmac_ct(HashAlgorithm::SHA256, &key, b"", b"abc", 0, 3).unwrap();
        assert_eq!(ct, plain);
        assert!(hmac_ct(HashAlgorithm::SHA256, &key, b"", b"abc", 4, 3).is_err());
    }

    #[test]
    fn unsupported_hash_is_unavailable() {
        assert!(matches!(
            HashContext::new(HashAlgorithm::MD5),
            Err(Error::Unavailable(_))
        ));
    }
}

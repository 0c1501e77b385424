//! PKCS#12 key derivation (RFC 7292 appendix B).
//!
//! Derives key, IV or MAC material from a secret and a salt by iterated
//! hashing. The same engine backs the password based encryption helpers in
//! [`pbe`].

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::hash::HashContext;
use crate::types::HashAlgorithm;
use crate::Error;

pub mod pbe;

pub use pbe::{bmp_password, pkcs12_pbe_decrypt, pkcs12_pbe_encrypt, PbeCipher, Pkcs12PbeParams};

/// Largest secret or salt accepted by [`pkcs12_derivation`].
pub const MAX_INPUT_LEN: usize = 64;

/// Largest output produced by one [`pkcs12_derivation`] call.
pub const MAX_OUTPUT_LEN: usize = 128;

/// Diversifier selecting what the derived bytes are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationId {
    Key = 1,
    Iv = 2,
    Mac = 3,
}

impl DerivationId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DerivationId::Key),
            2 => Some(DerivationId::Iv),
            3 => Some(DerivationId::Mac),
            _ => None,
        }
    }
}

/// Fill `out` with repeated copies of `filler`, truncating the last one.
fn fill_buffer(out: &mut [u8], filler: &[u8]) {
    for chunk in out.chunks_mut(filler.len()) {
        let n = chunk.len();
        chunk.copy_from_slice(&filler[..n]);
    }
}

/// `block += b` as big-endian integers, dropping the final carry.
fn add_big_endian(block: &mut [u8], b: &[u8]) {
    let mut carry = 0u16;
    for (x, y) in block.iter_mut().rev().zip(b.iter().rev()) {
        let sum = *x as u16 + *y as u16 + carry;
        *x = sum as u8;
        carry = sum >> 8;
    }
}

/// Derive `out.len()` bytes from `secret` and `salt`.
///
/// `secret` is used as is. For passwords, transcode with
/// [`bmp_password`] first.
pub fn pkcs12_derivation(
    out: &mut [u8],
    secret: &[u8],
    salt: &[u8],
    hash: HashAlgorithm,
    id: DerivationId,
    iterations: u32,
) -> Result<(), Error> {
    if out.len() > MAX_OUTPUT_LEN {
        return Err(Error::BadInput("pkcs12 output longer than 128 bytes"));
    }
    if secret.is_empty() || secret.len() > MAX_INPUT_LEN {
        return Err(Error::BadInput("pkcs12 secret must be 1..=64 bytes"));
    }
    if salt.is_empty() || salt.len() > MAX_INPUT_LEN {
        return Err(Error::BadInput("pkcs12 salt must be 1..=64 bytes"));
    }
    if iterations == 0 {
        return Err(Error::BadInput("pkcs12 iteration count is zero"));
    }

    let hlen = match hash {
        HashAlgorithm::SHA256 | HashAlgorithm::SHA384 | HashAlgorithm::SHA512 => hash
            .output_len()
            .ok_or_else(|| Error::Unavailable(format!("pkcs12 hash {:?}", hash)))?,
        _ => return Err(Error::Unavailable(format!("pkcs12 hash {:?}", hash))),
    };
    let v = if hlen <= 32 { 64 } else { 128 };

    let mut diversifier = Zeroizing::new([0u8; 128]);
    let mut salt_block = Zeroizing::new([0u8; 128]);
    let mut secret_block = Zeroizing::new([0u8; 128]);
    let mut hash_block = Zeroizing::new([0u8; 128]);
    let mut digest = Buf::new();

    diversifier[..v].fill(id as u8);
    fill_buffer(&mut salt_block[..v], salt);
    fill_buffer(&mut secret_block[..v], secret);

    let mut pos = 0;
    while pos < out.len() {
        let mut ctx = HashContext::new(hash)?;
        ctx.update(&diversifier[..v]);
        ctx.update(&salt_block[..v]);
        ctx.update(&secret_block[..v]);
        ctx.finalize_into(&mut digest);

        for _ in 1..iterations {
            let mut ctx = HashContext::new(hash)?;
            ctx.update(&digest);
            ctx.finalize_into(&mut digest);
        }

        let n = (out.len() - pos).min(hlen);
        out[pos..pos + n].copy_from_slice(&digest[..n]);
        pos += n;

        if pos == out.len() {
            break;
        }

        // B = digest repeated to v bytes, plus one.
        fill_buffer(&mut hash_block[..v], &digest);
        for b in hash_block[..v].iter_mut().rev() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }

        add_big_endian(&mut salt_block[..v], &hash_block[..v]);
        add_big_endian(&mut secret_block[..v], &hash_block[..v]);
    }

    Ok(())
}

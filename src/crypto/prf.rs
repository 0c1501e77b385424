//! TLS 1.2 PRF (RFC 5246 section 5) and the secrets derived from it.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::types::HashAlgorithm;
use crate::Error;

pub(crate) const MASTER_SECRET_LEN: usize = 48;
pub(crate) const VERIFY_DATA_LEN: usize = 12;

/// PRF(secret, label, seed) = P_<hash>(secret, label + seed), filling `out`.
///
/// The hash is decided once from the negotiated suite and passed in as a
/// tag, so there is no runtime function pointer.
pub(crate) fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    out: &mut [u8],
    hash: HashAlgorithm,
) -> Result<(), Error> {
    match hash {
        HashAlgorithm::SHA256 => p_hash::<Hmac<Sha256>>(secret, label.as_bytes(), seed, out),
        HashAlgorithm::SHA384 => p_hash::<Hmac<Sha384>>(secret, label.as_bytes(), seed, out),
        _ => Err(Error::Unavailable(format!("PRF hash {:?}", hash))),
    }
}

fn p_hash<M: Mac + KeyInit + Clone>(
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let key = <M as KeyInit>::new_from_slice(secret)
        .map_err(|_| Error::CryptoError("PRF key".to_string()))?;

    // A(1) = HMAC(secret, A(0)), A(0) = label + seed
    let mut m = key.clone();
    m.update(label);
    m.update(seed);
    let mut a = m.finalize().into_bytes();

    let mut pos = 0;
    while pos < out.len() {
        let mut m = key.clone();
        m.update(&a);
        m.update(label);
        m.update(seed);
        let mut block = m.finalize().into_bytes();

        let n = (out.len() - pos).min(block.len());
        out[pos..pos + n].copy_from_slice(&block[..n]);
        pos += n;
        block.as_mut_slice().zeroize();

        let mut m = key.clone();
        m.update(&a);
        let next = m.finalize().into_bytes();
        a.as_mut_slice().zeroize();
        a = next;
    }
    a.as_mut_slice().zeroize();

    Ok(())
}

/// master_secret = PRF(pre_master_secret, "master secret", client_random + server_random)
pub(crate) fn master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    hash: HashAlgorithm,
) -> Result<Buf, Error> {
    let mut seed = Buf::with_capacity(64);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    let mut out = Buf::new();
    out.resize(MASTER_SECRET_LEN, 0);
    prf_tls12(pre_master_secret, "master secret", &seed, &mut out, hash)?;
    Ok(out)
}

/// Extended master secret (RFC 7627).
///
/// master_secret = PRF(pre_master_secret, "extended master secret", session_hash)
pub(crate) fn extended_master_secret(
    pre_master_secret: &[u8],
    session_hash: &[u8],
    hash: HashAlgorithm,
) -> Result<Buf, Error> {
    let mut out = Buf::new();
    out.resize(MASTER_SECRET_LEN, 0);
    prf_tls12(
        pre_master_secret,
        "extended master secret",
        session_hash,
        &mut out,
        hash,
    )?;
    Ok(out)
}

/// key_block = PRF(master_secret, "key expansion", server_random + client_random)
pub(crate) fn key_block(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    len: usize,
    hash: HashAlgorithm,
) -> Result<Buf, Error> {
    let mut seed = Buf::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let mut out = Buf::new();
    out.resize(len, 0);
    prf_tls12(master_secret, "key expansion", &seed, &mut out, hash)?;
    Ok(out)
}

/// Finished verify_data for the given label ("client finished"/"server finished").
pub(crate) fn verify_data(
    master_secret: &[u8],
    label: &str,
    transcript_hash: &[u8],
    hash: HashAlgorithm,
) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let mut out = [0u8; VERIFY_DATA_LEN];
    prf_tls12(master_secret, label, transcript_hash, &mut out, hash)?;
    Ok(out)
}

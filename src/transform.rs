//! Negotiated record protection for one epoch.
//!
//! A [`Transform`] holds the keyed bulk ciphers and MAC keys for both
//! directions. It is built once from the master secret and never changes;
//! a rekey produces a new one.
//!
//! AES-GCM records carry `explicit_nonce(8) ‖ ciphertext ‖ tag(16)`. The
//! nonce is the 4 byte implicit IV followed by the explicit part, which is
//! the record sequence number.
//!
//! AES-CBC records carry `IV(16) ‖ E(plaintext ‖ MAC ‖ padding)` with a
//! fresh random IV per record (MAC-then-encrypt, RFC 5246 6.2.3.2).

use std::fmt;

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeGreater};

use crate::buffer::Buf;
use crate::crypto::hash::{hmac, hmac_ct};
use crate::crypto::prf::key_block;
use crate::crypto::{BlockCipher, BulkCipher, Cipher, CryptoProvider, SecureRandom};
use crate::types::{CipherSuite, ContentType, HashAlgorithm, ProtocolVersion, Role};
use crate::Error;

const EXPLICIT_NONCE_LEN: usize = 8;
const GCM_TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Longest padding a CBC record can carry.
const MAX_PAD: usize = 256;

struct Keys {
    cipher: BulkCipher,
    mac_key: Buf,
    /// Implicit nonce part. Unused by CBC.
    fixed_iv: Buf,
}

pub(crate) struct Transform {
    suite: CipherSuite,
    mac_hash: HashAlgorithm,
    mac_len: usize,
    encrypt: Keys,
    decrypt: Keys,
    random: &'static dyn SecureRandom,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

/// The 13 byte header that is both GCM AAD and CBC MAC prefix.
fn pseudo_header(
    seq: u64,
    content_type: ContentType,
    version: ProtocolVersion,
    len: usize,
) -> [u8; 13] {
    let mut h = [0u8; 13];
    h[..8].copy_from_slice(&seq.to_be_bytes());
    h[8] = content_type.as_u8();
    h[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    h[11..].copy_from_slice(&(len as u16).to_be_bytes());
    h
}

impl Transform {
    /// Expand `master` into keys for both directions and assign them by role.
    pub fn derive(
        provider: &CryptoProvider,
        suite: CipherSuite,
        master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        role: Role,
    ) -> Result<Transform, Error> {
        let cs = provider
            .find_cipher_suite(suite)
            .ok_or_else(|| Error::Unavailable(format!("cipher suite {:?}", suite)))?;
        let hash = cs.hash_algorithm();
        let (mac_len, enc_len, iv_len) = cs.key_lengths();

        let block = key_block(
            master,
            client_random,
            server_random,
            2 * (mac_len + enc_len + iv_len),
            hash,
        )?;

        // client_mac, server_mac, client_key, server_key, client_iv, server_iv
        let (client_mac, rest) = block.split_at(mac_len);
        let (server_mac, rest) = rest.split_at(mac_len);
        let (client_key, rest) = rest.split_at(enc_len);
        let (server_key, rest) = rest.split_at(enc_len);
        let (client_iv, server_iv) = rest.split_at(iv_len);

        let keys = |mac: &[u8], key: &[u8], iv: &[u8]| -> Result<Keys, Error> {
            Ok(Keys {
                cipher: cs.create_cipher(key).map_err(Error::CryptoError)?,
                mac_key: Buf::from_slice(mac),
                fixed_iv: Buf::from_slice(iv),
            })
        };
        let client = keys(client_mac, client_key, client_iv)?;
        let server = keys(server_mac, server_key, server_iv)?;

        let (encrypt, decrypt) = match role {
            Role::Client => (client, server),
            Role::Server => (server, client),
        };

        Ok(Transform {
            suite,
            mac_hash: hash,
            mac_len,
            encrypt,
            decrypt,
            random: provider.secure_random,
        })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Largest growth of a record payload under this transform.
    pub fn overhead(&self) -> usize {
        match self.encrypt.cipher {
            BulkCipher::Aead(_) => EXPLICIT_NONCE_LEN + GCM_TAG_LEN,
            BulkCipher::Block(_) => BLOCK_LEN + self.mac_len + BLOCK_LEN,
        }
    }

    /// Shortest protected payload that can possibly decrypt.
    pub fn min_ciphertext_len(&self) -> usize {
        match self.decrypt.cipher {
            BulkCipher::Aead(_) => EXPLICIT_NONCE_LEN + GCM_TAG_LEN,
            BulkCipher::Block(_) => {
                BLOCK_LEN + (self.mac_len + 1).div_ceil(BLOCK_LEN) * BLOCK_LEN
            }
        }
    }

    /// Protect `plaintext`, appending the record payload to `out`.
    ///
    /// `seq` is the 64 bit record sequence (epoch and sequence number for
    /// datagrams).
    pub fn encrypt(
        &self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), Error> {
        let header = pseudo_header(seq, content_type, version, plaintext.len());

        match &self.encrypt.cipher {
            BulkCipher::Aead(cipher) => {
                let explicit = seq.to_be_bytes();
                let nonce = nonce(&self.encrypt.fixed_iv, &explicit);
                let mut data = Buf::from_slice(plaintext);
                cipher
                    .encrypt(&mut data, &header, &nonce)
                    .map_err(Error::CryptoError)?;
                out.extend_from_slice(&explicit);
                out.extend_from_slice(&data);
            }
            BulkCipher::Block(cipher) => {
                let mut iv = [0u8; BLOCK_LEN];
                self.random.fill(&mut iv).map_err(Error::CryptoError)?;

                let mac = hmac(
                    self.mac_hash,
                    &self.encrypt.mac_key,
                    &[&header[..], plaintext],
                )?;
                let mut data = Buf::with_capacity(plaintext.len() + mac.len() + BLOCK_LEN);
                data.extend_from_slice(plaintext);
                data.extend_from_slice(&mac);
                let pad = BLOCK_LEN - 1 - data.len() % BLOCK_LEN;
                for _ in 0..=pad {
                    data.push(pad as u8);
                }

                cipher
                    .encrypt_cbc(&iv, &mut data)
                    .map_err(Error::CryptoError)?;
                out.extend_from_slice(&iv);
                out.extend_from_slice(&data);
            }
        }
        Ok(())
    }

    /// Open a record payload. Every failure is [`Error::AuthenticationFailed`].
    pub fn decrypt(
        &self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        record: &[u8],
    ) -> Result<Buf, Error> {
        if record.len() < self.min_ciphertext_len() {
            return Err(Error::AuthenticationFailed);
        }

        match &self.decrypt.cipher {
            BulkCipher::Aead(cipher) => {
                let (explicit, sealed) = record.split_at(EXPLICIT_NONCE_LEN);
                let nonce = nonce(&self.decrypt.fixed_iv, explicit);
                let header =
                    pseudo_header(seq, content_type, version, sealed.len() - GCM_TAG_LEN);
                let mut data = Buf::from_slice(sealed);
                cipher
                    .decrypt(&mut data, &header, &nonce)
                    .map_err(|_| Error::AuthenticationFailed)?;
                Ok(data)
            }
            BulkCipher::Block(cipher) => {
                let (iv, sealed) = record.split_at(BLOCK_LEN);
                if sealed.len() % BLOCK_LEN != 0 {
                    return Err(Error::AuthenticationFailed);
                }
                let mut data = Buf::from_slice(sealed);
                cipher
                    .decrypt_cbc(iv, &mut data)
                    .map_err(|_| Error::AuthenticationFailed)?;
                self.open_cbc(seq, content_type, version, data)
            }
        }
    }

    /// Check padding and MAC of a decrypted CBC payload without branching
    /// on which one failed. The MAC work is the same for every padding
    /// value, valid or not.
    fn open_cbc(
        &self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        mut data: Buf,
    ) -> Result<Buf, Error> {
        let n = data.len();
        let mac_len = self.mac_len;
        let max_plain = n - mac_len;
        let min_plain = max_plain.saturating_sub(MAX_PAD);
        let pad = data[n - 1] as u64;

        // Padding plus MAC must fit.
        let mut good = !(pad + 1 + mac_len as u64).ct_gt(&(n as u64));

        // Every padding byte must equal pad. Scan the maximum span so the
        // work done does not depend on pad.
        for i in 0..MAX_PAD.min(n) {
            let in_pad = !(i as u64).ct_gt(&pad);
            let byte_ok = data[n - 1 - i].ct_eq(&(pad as u8));
            good &= !in_pad | byte_ok;
        }

        // With bad padding fall back to no padding and still check a MAC.
        let strip = u64::conditional_select(&0, &(pad + 1), good) as usize;
        let plain_len = max_plain - strip;

        let header = pseudo_header(seq, content_type, version, plain_len);
        let expected = hmac_ct(
            self.mac_hash,
            &self.decrypt.mac_key,
            &header,
            &data[..max_plain],
            min_plain,
            plain_len,
        )?;

        // Gather the received MAC from every offset it could start at.
        let mut received = Buf::from_slice(&data[max_plain..]);
        for off in min_plain..max_plain {
            let hit = (off as u64).ct_eq(&(plain_len as u64));
            for (j, r) in received.iter_mut().enumerate() {
                r.conditional_assign(&data[off + j], hit);
            }
        }
        let mac_ok: Choice = expected.ct_eq(&received[..]);

        if !bool::from(good & mac_ok) {
            return Err(Error::AuthenticationFailed);
        }
        data.truncate(plain_len);
        Ok(data)
    }
}

fn nonce(fixed_iv: &[u8], explicit: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(fixed_iv);
    nonce[4..].copy_from_slice(explicit);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;

    fn pair(suite: CipherSuite) -> (Transform, Transform) {
        let provider = rust_crypto::default_provider();
        let master = [0x42u8; 48];
        let cr = [1u8; 32];
        let sr = [2u8; 32];
        let client = Transform::derive(&provider, suite, &master, &cr, &sr, Role::Client).unwrap();
        let server = Transform::derive(&provider, suite, &master, &cr, &sr, Role::Server).unwrap();
        (client, server)
    }

    const V: ProtocolVersion = ProtocolVersion::DTLS1_2;
    const APP: ContentType = ContentType::ApplicationData;

    #[test]
    fn every_suite_opens_what_the_peer_sealed() {
        for suite in CipherSuite::all() {
            let (client, server) = pair(*suite);
            for len in [0usize, 1, 15, 16, 17, 300] {
                let msg: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let mut rec = Buf::new();
                client.encrypt(7, APP, V, &msg, &mut rec).unwrap();
                assert!(rec.len() <= len + client.overhead(), "{:?}", suite);
                let back = server.decrypt(7, APP, V, &rec).unwrap();
                assert_eq!(&*back, &msg[..], "{:?} len {}", suite, len);
            }
        }
    }

    #[test]
    fn gcm_record_layout() {
        let (client, _) = pair(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        let mut rec = Buf::new();
        client
            .encrypt(0x0001_0000_0000_0003, APP, V, b"hello", &mut rec)
            .unwrap();
        assert_eq!(rec.len(), 8 + 5 + 16);
        assert_eq!(&rec[..8], &[0, 1, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn wrong_sequence_fails() {
        for suite in [
            CipherSuite::PSK_AES128_GCM_SHA256,
            CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
        ] {
            let (client, server) = pair(suite);
            let mut rec = Buf::new();
            client.encrypt(1, APP, V, b"data", &mut rec).unwrap();
            assert!(matches!(
                server.decrypt(2, APP, V, &rec),
                Err(Error::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn same_direction_does_not_open() {
        let (client, _) = pair(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384);
        let mut rec = Buf::new();
        client.encrypt(0, APP, V, b"data", &mut rec).unwrap();
        assert!(client.decrypt(0, APP, V, &rec).is_err());
    }

    #[test]
    fn cbc_tampering_is_one_error() {
        let (client, server) = pair(CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256);
        let mut rec = Buf::new();
        client.encrypt(9, APP, V, &[0xAB; 40], &mut rec).unwrap();

        // Flip a byte in the last block's IV position: corrupts the padding.
        let mut bad_pad = rec.to_vec();
        let n = bad_pad.len();
        bad_pad[n - 17] ^= 0x01;
        // Flip a plaintext byte: corrupts the MAC.
        let mut bad_mac = rec.to_vec();
        bad_mac[0] ^= 0x01;

        for bad in [bad_pad, bad_mac] {
            assert!(matches!(
                server.decrypt(9, APP, V, &bad),
                Err(Error::AuthenticationFailed)
            ));
        }
    }

    /// CBC record built by hand with the given padding bytes.
    fn seal_with_padding(t: &Transform, seq: u64, msg: &[u8], padding: &[u8]) -> Vec<u8> {
        let header = pseudo_header(seq, APP, V, msg.len());
        let mac = hmac(t.mac_hash, &t.encrypt.mac_key, &[&header[..], msg]).unwrap();
        let mut data = msg.to_vec();
        data.extend_from_slice(&mac);
        data.extend_from_slice(padding);
        assert_eq!(data.len() % BLOCK_LEN, 0);

        let BulkCipher::Block(cipher) = &t.encrypt.cipher else {
            panic!("not a CBC suite");
        };
        let iv = [5u8; BLOCK_LEN];
        cipher.encrypt_cbc(&iv, &mut data).unwrap();
        let mut rec = iv.to_vec();
        rec.extend_from_slice(&data);
        rec
    }

    #[test]
    fn cbc_accepts_maximum_padding() {
        let (client, server) = pair(CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256);
        let msg = [0x5A; 48];
        let rec = seal_with_padding(&client, 3, &msg, &[255; 256]);
        assert_eq!(rec.len(), 16 + 48 + 32 + 256);
        let back = server.decrypt(3, APP, V, &rec).unwrap();
        assert_eq!(&*back, &msg[..]);
    }

    #[test]
    fn cbc_inconsistent_padding_fails_with_valid_mac() {
        let (client, server) = pair(CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256);
        let msg = [0x11; 16];
        let good = seal_with_padding(&client, 4, &msg, &[15; 16]);
        assert!(server.decrypt(4, APP, V, &good).is_ok());

        // One byte inside the padding run disagrees with the length byte.
        let mut padding = [15u8; 16];
        padding[7] = 14;
        let bad = seal_with_padding(&client, 4, &msg, &padding);
        assert!(matches!(
            server.decrypt(4, APP, V, &bad),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn short_records_rejected() {
        let (_, server) = pair(CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256);
        assert_eq!(server.min_ciphertext_len(), 16 + 48);
        assert!(server.decrypt(0, APP, V, &[0; 63]).is_err());
        assert!(server.decrypt(0, APP, V, &[0; 70]).is_err());
    }
}

//! Self tests run on a provider before a [`Config`](crate::Config) accepts it.

use crate::buffer::Buf;
use crate::crypto::provider::{BulkCipher, CryptoProvider, SupportedCipherSuite, SupportedKxGroup};
use crate::Error;

impl CryptoProvider {
    /// Cipher suites of this provider that the engine knows how to run.
    pub fn supported_cipher_suites(
        &self,
    ) -> impl Iterator<Item = &'static dyn SupportedCipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .filter(|cs| cs.suite().is_supported())
    }

    /// Key exchange groups of this provider that the engine knows how to run.
    pub fn supported_kx_groups(&self) -> impl Iterator<Item = &'static dyn SupportedKxGroup> {
        self.kx_groups
            .iter()
            .copied()
            .filter(|kx| kx.name().is_supported())
    }

    /// Run the provider self tests.
    ///
    /// - at least one supported cipher suite
    /// - known answers for every AEAD and CBC cipher offered
    /// - a full key agreement on every group
    /// - the random source fills a buffer
    ///
    /// Returns `Error::ConfigError` on the first failure.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_cipher_suites()?;
        self.validate_kx_groups()?;
        self.validate_random()?;
        Ok(())
    }

    fn validate_cipher_suites(&self) -> Result<(), Error> {
        if self.supported_cipher_suites().count() == 0 {
            return Err(Error::ConfigError(
                "CryptoProvider has no supported cipher suites".to_string(),
            ));
        }

        for cs in self.supported_cipher_suites() {
            let (_, enc_len, _) = cs.key_lengths();
            let vector = CIPHER_TEST_VECTORS
                .iter()
                .find(|v| v.block_key.len() == enc_len)
                .ok_or_else(|| {
                    Error::ConfigError(format!("No test vector for {:?} key length", cs.suite()))
                })?;
            let fail = |e: String| Error::ConfigError(format!("{:?}: {}", cs.suite(), e));

            let zero_key = [0u8; 32];
            let key = if cs.suite().is_aead() {
                &zero_key[..enc_len]
            } else {
                vector.block_key
            };

            let ok = match cs.create_cipher(key).map_err(fail)? {
                BulkCipher::Aead(c) => {
                    let mut data = Buf::from_slice(&[0u8; 16]);
                    c.encrypt(&mut data, &[], &[0u8; 12]).map_err(fail)?;
                    data.as_ref() == &vector.gcm_zero[..]
                }
                BulkCipher::Block(c) => {
                    let mut data = BLOCK_PLAINTEXT;
                    c.encrypt_cbc(&[0u8; 16], &mut data).map_err(fail)?;
                    data == vector.block
                }
            };

            if !ok {
                return Err(Error::ConfigError(format!(
                    "Cipher for {:?} produced incorrect result",
                    cs.suite()
                )));
            }
        }
        Ok(())
    }

    fn validate_kx_groups(&self) -> Result<(), Error> {
        let needs_ecdhe = self.supported_cipher_suites().any(|cs| {
            cs.suite()
                .key_exchange()
                .map(|kx| kx.uses_ecdhe())
                .unwrap_or(false)
        });
        if needs_ecdhe && self.supported_kx_groups().count() == 0 {
            return Err(Error::ConfigError(
                "CryptoProvider has ECDHE cipher suites but no key exchange groups".to_string(),
            ));
        }

        for kx in self.supported_kx_groups() {
            agree(kx).map_err(|e| {
                Error::ConfigError(format!("Key agreement failed for {:?}: {}", kx.name(), e))
            })?;
        }
        Ok(())
    }

    fn validate_random(&self) -> Result<(), Error> {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        self.secure_random
            .fill(&mut a)
            .and_then(|_| self.secure_random.fill(&mut b))
            .map_err(|e| Error::ConfigError(format!("SecureRandom failed: {}", e)))?;
        if a == b {
            return Err(Error::ConfigError(
                "SecureRandom returned the same bytes twice".to_string(),
            ));
        }
        Ok(())
    }
}

fn agree(kx: &dyn SupportedKxGroup) -> Result<(), String> {
    let a = kx.start_exchange()?;
    let b = kx.start_exchange()?;
    if a.group() != kx.name() {
        return Err(format!("exchange reports {:?}", a.group()));
    }
    let a_pub = Buf::from_slice(a.pub_key());
    let b_pub = Buf::from_slice(b.pub_key());
    let mut s1 = Buf::new();
    let mut s2 = Buf::new();
    a.complete(&b_pub, &mut s1)?;
    b.complete(&a_pub, &mut s2)?;
    if s1.is_empty() || s1 != s2 {
        return Err("shared secrets differ".to_string());
    }
    Ok(())
}

struct CipherVector {
    block_key: &'static [u8],
    /// One AES block of `BLOCK_PLAINTEXT` under `block_key` (FIPS-197 appendix C).
    block: [u8; 16],
    /// AES-GCM of 16 zero bytes under an all zero key and nonce: ciphertext then tag.
    gcm_zero: [u8; 32],
}

const BLOCK_PLAINTEXT: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

const CIPHER_TEST_VECTORS: &[CipherVector] = &[
    CipherVector {
        block_key: &[
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ],
        block: [
            0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4,
            0xc5, 0x5a,
        ],
        gcm_zero: [
            0x03, 0x88, 0xda, 0xce, 0x60, 0xb6, 0xa3, 0x92, 0xf3, 0x28, 0xc2, 0xb9, 0x71, 0xb2,
            0xfe, 0x78, 0xab, 0x6e, 0x47, 0xd4, 0x2c, 0xec, 0x13, 0xbd, 0xf5, 0x3a, 0x67, 0xb2,
            0x12, 0x57, 0xbd, 0xdf,
        ],
    },
    CipherVector {
        block_key: &[
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b,
            0x1c, 0x1d, 0x1e, 0x1f,
        ],
        block: [
            0x8e, 0xa2, 0xb7, 0xca, 0x51, 0x67, 0x45, 0xbf, 0xea, 0xfc, 0x49, 0x90, 0x4b, 0x49,
            0x60, 0x89,
        ],
        gcm_zero: [
            0xce, 0xa7, 0x40, 0x3d, 0x4d, 0x60, 0x6b, 0x6e, 0x07, 0x4e, 0xc5, 0xd3, 0xba, 0xf3,
            0x9d, 0x18, 0xd0, 0xd1, 0xc8, 0xa7, 0x99, 0x99, 0x6b, 0xf0, 0x26, 0x5b, 0x98, 0xb5,
            0xd4, 0x8a, 0xb9, 0x19,
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;
    use crate::types::{CipherSuite, NamedGroup};

    #[test]
    fn default_provider_validates() {
        let provider = rust_crypto::default_provider();
        provider.validate().unwrap();
    }

    #[test]
    fn default_provider_inventory() {
        let provider = rust_crypto::default_provider();
        assert_eq!(provider.supported_cipher_suites().count(), 7);
        assert_eq!(provider.supported_kx_groups().count(), 3);
        assert!(provider
            .find_cipher_suite(CipherSuite::ECDHE_PSK_AES128_CBC_SHA256)
            .is_some());
        assert!(provider.find_kx_group(NamedGroup::X25519).is_some());
        assert!(provider.find_kx_group(NamedGroup::X448).is_none());
    }

    #[test]
    fn provider_without_suites_is_rejected() {
        let mut provider = rust_crypto::default_provider();
        provider.cipher_suites = &[];
        assert!(matches!(provider.validate(), Err(Error::ConfigError(_))));
    }
}

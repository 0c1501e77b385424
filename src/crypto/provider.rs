//! Cryptographic provider traits.
//!
//! The engine never calls a primitive directly. Ciphers, key exchange,
//! signatures and randomness are reached through a [`CryptoProvider`]: a
//! plain struct of `&'static dyn` component references, built once and then
//! only read. The [`Config`](crate::Config) holds one and hands it to every
//! session by reference.
//!
//! # Components
//!
//! - **Cipher suites** ([`SupportedCipherSuite`]): factory for bulk ciphers,
//!   either AEAD ([`Cipher`]) or CBC ([`BlockCipher`]).
//! - **Key exchange groups** ([`SupportedKxGroup`]): ephemeral ECDH.
//! - **Signature verification** ([`SignatureVerifier`]): check a signature
//!   against the key in a DER certificate.
//! - **Key provider** ([`KeyProvider`]): load private signing keys.
//! - **Secure random** ([`SecureRandom`]).
//!
//! # Thread Safety
//!
//! All component traits require `Send + Sync + UnwindSafe + RefUnwindSafe`.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

use once_cell::sync::OnceCell;

use crate::buffer::Buf;
use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, SignatureAlgorithm};

/// Marker trait for types that are safe to use in crypto provider components.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

// ============================================================================
// Instance traits
// ============================================================================

/// AEAD cipher keyed for one direction.
pub trait Cipher: CryptoSafe {
    /// Encrypt in place, appending the tag.
    fn encrypt(&self, data: &mut Buf, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String>;

    /// Decrypt in place, verifying and removing the tag.
    fn decrypt(&self, data: &mut Buf, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String>;

    /// Tag length in bytes.
    fn tag_len(&self) -> usize {
        16
    }
}

/// Raw block cipher in CBC mode. Padding and MAC are the caller's business.
pub trait BlockCipher: CryptoSafe {
    fn block_len(&self) -> usize {
        16
    }

    /// Encrypt whole blocks in place.
    fn encrypt_cbc(&self, iv: &[u8], data: &mut [u8]) -> Result<(), String>;

    /// Decrypt whole blocks in place.
    fn decrypt_cbc(&self, iv: &[u8], data: &mut [u8]) -> Result<(), String>;
}

/// A keyed bulk cipher as produced by [`SupportedCipherSuite::create_cipher`].
#[derive(Debug)]
pub enum BulkCipher {
    Aead(Box<dyn Cipher>),
    Block(Box<dyn BlockCipher>),
}

/// Private key able to produce signatures over a pre-computed digest.
pub trait SigningKey: CryptoSafe {
    /// Sign `digest` and return the DER encoded signature.
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, String>;

    fn algorithm(&self) -> SignatureAlgorithm;

    /// Natural hash for the key's curve.
    fn hash_algorithm(&self) -> HashAlgorithm;
}

/// One ephemeral key exchange.
pub trait ActiveKeyExchange: CryptoSafe {
    /// Our public key in wire format.
    fn pub_key(&self) -> &[u8];

    /// Complete the exchange, writing the shared secret into `out`.
    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String>;

    fn group(&self) -> NamedGroup;
}

// ============================================================================
// Factory traits
// ============================================================================

pub trait SupportedCipherSuite: CryptoSafe {
    fn suite(&self) -> CipherSuite;

    /// PRF hash of the suite.
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Key material lengths: (mac_key_len, enc_key_len, fixed_iv_len).
    fn key_lengths(&self) -> (usize, usize, usize);

    fn create_cipher(&self, key: &[u8]) -> Result<BulkCipher, String>;
}

pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

pub trait SignatureVerifier: CryptoSafe {
    /// Verify `signature` over `digest` with the public key of `cert_der`.
    fn verify_digest(
        &self,
        cert_der: &[u8],
        digest: &[u8],
        signature: &[u8],
        hash_alg: HashAlgorithm,
        sig_alg: SignatureAlgorithm,
    ) -> Result<(), String>;
}

pub trait KeyProvider: CryptoSafe {
    /// Parse a private key from PKCS#8 DER, SEC1 DER or PEM.
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

pub trait SecureRandom: CryptoSafe {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

// ============================================================================
// Provider
// ============================================================================

/// Read-only registry of cryptographic components.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// Supported cipher suites, in no particular order.
    pub cipher_suites: &'static [&'static dyn SupportedCipherSuite],

    /// Supported key exchange groups.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    pub signature_verification: &'static dyn SignatureVerifier,

    pub key_provider: &'static dyn KeyProvider,

    pub secure_random: &'static dyn SecureRandom,
}

static DEFAULT: OnceCell<CryptoProvider> = OnceCell::new();

impl CryptoProvider {
    /// Install a process wide default provider.
    ///
    /// Returns the provider back if a default was already installed.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// The installed default provider, if any.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    pub fn find_cipher_suite(&self, suite: CipherSuite) -> Option<&'static dyn SupportedCipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .find(|cs| cs.suite() == suite)
    }

    pub fn find_kx_group(&self, group: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|kx| kx.name() == group)
    }
}

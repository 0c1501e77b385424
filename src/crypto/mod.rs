//! Cryptographic primitives and helpers used by the session engine.

pub(crate) mod hash;
pub(crate) mod prf;
pub mod provider;
pub mod rust_crypto;
mod validation;

pub use provider::{ActiveKeyExchange, BlockCipher, BulkCipher, Cipher, CryptoProvider};
pub use provider::{CryptoSafe, KeyProvider, SecureRandom, SignatureVerifier, SigningKey};
pub use provider::{SupportedCipherSuite, SupportedKxGroup};

pub use crate::types::{HashAlgorithm, NamedGroup, SignatureAlgorithm};

//! Pure Rust crypto provider built on the RustCrypto crates.
//!
//! ```
//! use std::sync::Arc;
//! use tlsession::crypto::rust_crypto;
//! use tlsession::{Config, TransportKind};
//!
//! let config = Arc::new(
//!     Config::builder(TransportKind::Datagram)
//!         .with_crypto_provider(rust_crypto::default_provider())
//!         .build()
//!         .unwrap(),
//! );
//! assert_eq!(config.mtu(), 1150);
//! ```

mod cipher_suite;
mod kx_group;
mod random;
mod sign;

pub(crate) use cipher_suite::aes_cbc;

use crate::crypto::provider::CryptoProvider;

/// The RustCrypto based provider.
///
/// # Cipher suites
///
/// - `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256` (0xC02B)
/// - `TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384` (0xC02C)
/// - `TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256` (0xC023)
/// - `TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384` (0xC024)
/// - `TLS_PSK_WITH_AES_128_GCM_SHA256` (0x00A8)
/// - `TLS_PSK_WITH_AES_256_GCM_SHA384` (0x00A9)
/// - `TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256` (0xC037)
///
/// # Key exchange groups
///
/// - `x25519`
/// - `secp256r1`
/// - `secp384r1`
///
/// # Keys
///
/// ECDSA P-256 and P-384 private keys in PKCS#8 DER, SEC1 DER or PEM.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: cipher_suite::ALL_CIPHER_SUITES,
        kx_groups: kx_group::ALL_KX_GROUPS,
        signature_verification: &sign::SIGNATURE_VERIFIER,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &random::SECURE_RANDOM,
    }
}

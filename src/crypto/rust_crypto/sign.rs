//! ECDSA signing, key loading and certificate signature checks.

use std::str;

use der::Decode;
use pkcs8::DecodePrivateKey;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey as SigningKeyTrait};
use crate::types::{HashAlgorithm, NamedGroup, SignatureAlgorithm};

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

enum EcdsaSigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EcdsaSigningKey::P256(_) => f.debug_tuple("EcdsaSigningKey::P256").finish(),
            EcdsaSigningKey::P384(_) => f.debug_tuple("EcdsaSigningKey::P384").finish(),
        }
    }
}

impl SigningKeyTrait for EcdsaSigningKey {
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            EcdsaSigningKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|_| "Signing failed".to_string())?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            EcdsaSigningKey::P384(key) => {
                let signature: p384::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|_| "Signing failed".to_string())?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::ECDSA
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            EcdsaSigningKey::P256(_) => HashAlgorithm::SHA256,
            EcdsaSigningKey::P384(_) => HashAlgorithm::SHA384,
        }
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKeyTrait>, String> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key)));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key)));
        }

        // SEC1 "EC PRIVATE KEY", as written by OpenSSL.
        if let Ok(secret) = p256::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(secret.into())));
        }
        if let Ok(secret) = p384::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(secret.into())));
        }

        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return self.load_private_key(doc.as_bytes());
                }
            }
        }

        Err("Failed to parse private key in any supported format".to_string())
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_digest(
        &self,
        cert_der: &[u8],
        digest: &[u8],
        signature: &[u8],
        hash_alg: HashAlgorithm,
        sig_alg: SignatureAlgorithm,
    ) -> Result<(), String> {
        if sig_alg != SignatureAlgorithm::ECDSA {
            return Err(format!("Unsupported signature algorithm: {:?}", sig_alg));
        }
        if !matches!(hash_alg, HashAlgorithm::SHA256 | HashAlgorithm::SHA384) {
            return Err(format!("Unsupported hash algorithm: {:?}", hash_alg));
        }
        if Some(digest.len()) != hash_alg.output_len() {
            return Err(format!("Digest length {} for {:?}", digest.len(), hash_alg));
        }

        let cert = X509Certificate::from_der(cert_der)
            .map_err(|e| format!("Failed to parse certificate: {e}"))?;
        let spki = &cert.tbs_certificate.subject_public_key_info;

        if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(format!(
                "Unsupported public key algorithm: {}",
                spki.algorithm.oid
            ));
        }

        let pubkey_bytes = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;

        let curve_oid: ObjectIdentifier = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or("Missing EC curve parameter in certificate")?
            .decode_as()
            .map_err(|_| "Invalid EC curve parameter in certificate".to_string())?;

        let group = match curve_oid {
            OID_P256 => NamedGroup::Secp256r1,
            OID_P384 => NamedGroup::Secp384r1,
            _ => return Err(format!("Unsupported EC curve: {}", curve_oid)),
        };

        let failed = |_| format!("ECDSA signature verification failed for {:?}", hash_alg);

        match group {
            NamedGroup::Secp256r1 => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(pubkey_bytes)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify_prehash(digest, &sig).map_err(failed)
            }
            _ => {
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(pubkey_bytes)
                    .map_err(|_| "Invalid P-384 public key".to_string())?;
                let sig = p384::ecdsa::Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify_prehash(digest, &sig).map_err(failed)
            }
        }
    }
}

pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;

pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;

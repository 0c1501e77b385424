//! Self-signed certificates, fingerprints and peer certificate checks.
//!
//! Trust chain validation is not done here. A [`CertVerifier`] is the black
//! box the handshake asks about a peer chain; it answers with the key usages
//! of the leaf or rejects the chain.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use der::Decode;
use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{KeyUsage, SubjectAltName};
use x509_cert::Certificate as X509Certificate;

use crate::types::Role;

/// Certificate utility errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("invalid certificate format")]
    InvalidFormat,
    #[error("certificate generation failed")]
    GenerationFailed,
}

/// A DER certificate and its DER (PKCS#8) private key.
#[derive(Clone)]
pub struct GeneratedCertificate {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Generate a self-signed P-256 certificate valid for one year.
///
/// `names` become the subject alternative names; the first one is also the
/// common name.
pub fn generate_self_signed_certificate(
    names: &[&str],
) -> Result<GeneratedCertificate, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let common_name = names
        .first()
        .cloned()
        .unwrap_or_else(|| "tlsession".to_string());

    let mut params = CertificateParams::new(names);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "tlsession".to_string());
    distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name = distinguished_name;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert =
        RcgenCertificate::from_params(params).map_err(|_| CertificateError::GenerationFailed)?;

    let certificate = cert
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;
    let private_key = cert.serialize_private_key_der();

    Ok(GeneratedCertificate {
        certificate,
        private_key,
    })
}

/// SHA-256 over the DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

/// Format a fingerprint as colon separated hex, "AF:12:F6:...".
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl GeneratedCertificate {
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for GeneratedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCertificate")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// DNS names a certificate is valid for: SAN dNSName entries.
pub fn certificate_dns_names(cert_der: &[u8]) -> Result<Vec<String>, CertificateError> {
    let cert = X509Certificate::from_der(cert_der).map_err(|_| CertificateError::InvalidFormat)?;
    let san = cert
        .tbs_certificate
        .get::<SubjectAltName>()
        .map_err(|_| CertificateError::InvalidFormat)?;

    let mut names = Vec::new();
    if let Some((_, SubjectAltName(general_names))) = san {
        for name in general_names {
            if let GeneralName::DnsName(dns) = name {
                names.push(dns.as_str().to_string());
            }
        }
    }
    Ok(names)
}

/// Key usages of a peer leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertUsage {
    pub digital_signature: bool,
    pub key_agreement: bool,
}

impl CertUsage {
    /// A certificate without a key usage extension may be used for anything.
    pub const UNRESTRICTED: CertUsage = CertUsage {
        digital_signature: true,
        key_agreement: true,
    };
}

/// Decides whether a peer certificate chain is acceptable.
pub trait CertVerifier: Send + Sync + fmt::Debug {
    /// `chain` is leaf first, DER encoded. `peer_role` is the role of the
    /// endpoint that sent it.
    fn verify(&self, chain: &[Vec<u8>], peer_role: Role) -> Result<CertUsage, String>;
}

/// Parse the leaf key usage and check its validity period.
///
/// Does not build a trust chain.
#[derive(Debug, Default)]
pub struct DefaultCertVerifier;

fn leaf_usage(leaf: &[u8]) -> Result<CertUsage, String> {
    let cert = X509Certificate::from_der(leaf).map_err(|e| format!("bad certificate: {e}"))?;

    let validity = &cert.tbs_certificate.validity;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock before 1970".to_string())?;
    if now < validity.not_before.to_unix_duration() {
        return Err("certificate not yet valid".to_string());
    }
    if now > validity.not_after.to_unix_duration() {
        return Err("certificate expired".to_string());
    }

    let usage = cert
        .tbs_certificate
        .get::<KeyUsage>()
        .map_err(|e| format!("bad key usage: {e}"))?;

    Ok(match usage {
        Some((_, ku)) => CertUsage {
            digital_signature: ku.digital_signature(),
            key_agreement: ku.key_agreement(),
        },
        None => CertUsage::UNRESTRICTED,
    })
}

impl CertVerifier for DefaultCertVerifier {
    fn verify(&self, chain: &[Vec<u8>], _peer_role: Role) -> Result<CertUsage, String> {
        let leaf = chain.first().ok_or("empty certificate chain")?;
        leaf_usage(leaf)
    }
}

/// Accept exactly the peer whose leaf has a known SHA-256 fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintVerifier {
    fingerprint: Vec<u8>,
}

impl FingerprintVerifier {
    pub fn new(fingerprint: Vec<u8>) -> Self {
        FingerprintVerifier { fingerprint }
    }
}

impl CertVerifier for FingerprintVerifier {
    fn verify(&self, chain: &[Vec<u8>], _peer_role: Role) -> Result<CertUsage, String> {
        let leaf = chain.first().ok_or("empty certificate chain")?;
        let actual = calculate_fingerprint(leaf);
        if !bool::from(actual.ct_eq(&self.fingerprint)) {
            return Err(format!(
                "fingerprint mismatch: {}",
                format_fingerprint(&actual)
            ));
        }
        leaf_usage(leaf)
    }
}

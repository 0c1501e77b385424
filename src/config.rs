use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::certificate::{certificate_dns_names, CertVerifier, DefaultCertVerifier};
use crate::crypto::{rust_crypto, CryptoProvider};
use crate::handshake::{KeyCertChain, SessionCache};
use crate::types::{CipherSuite, NamedGroup, TransportKind};
use crate::Error;

/// Pre-shared key and the identity it is known by.
pub struct Psk {
    identity: Vec<u8>,
    key: Zeroizing<Vec<u8>>,
    hint: Option<Vec<u8>>,
}

impl Psk {
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Identity hint a server sends in ServerKeyExchange.
    pub fn hint(&self) -> Option<&[u8]> {
        self.hint.as_deref()
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Psk")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .finish_non_exhaustive()
    }
}

/// Session configuration.
///
/// Immutable once built. Share it between sessions with an `Arc`.
pub struct Config {
    transport: TransportKind,
    mtu: usize,
    max_fragment_len: usize,
    retransmit_min: Duration,
    retransmit_max: Duration,
    max_retransmissions: usize,
    replay_window: u32,
    cipher_suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    extended_master_secret: bool,
    renegotiation: bool,
    require_client_certificate: bool,
    dtls_cookies: bool,
    server_name: Option<String>,
    key_certs: KeyCertChain,
    psk: Option<Psk>,
    cert_verifier: Arc<dyn CertVerifier>,
    session_cache: Option<Arc<dyn SessionCache>>,
    rng_seed: Option<u64>,
    crypto_provider: CryptoProvider,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("transport", &self.transport)
            .field("mtu", &self.mtu)
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("renegotiation", &self.renegotiation)
            .field("psk", &self.psk)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new configuration builder for the given transport.
    pub fn builder(transport: TransportKind) -> ConfigBuilder {
        ConfigBuilder {
            transport,
            mtu: 1150,
            max_fragment_len: 16384,
            retransmit_min: Duration::from_secs(1),
            retransmit_max: Duration::from_secs(60),
            max_retransmissions: 6,
            replay_window: 64,
            cipher_suites: CipherSuite::all().to_vec(),
            groups: NamedGroup::supported().to_vec(),
            extended_master_secret: true,
            renegotiation: false,
            require_client_certificate: false,
            dtls_cookies: true,
            server_name: None,
            key_certs: Vec::new(),
            psk: None,
            cert_verifier: None,
            session_cache: None,
            rng_seed: None,
            crypto_provider: None,
        }
    }

    /// Stream (TLS) or datagram (DTLS).
    #[inline(always)]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Max transmission unit.
    ///
    /// The largest datagram we will produce. Ignored for streams.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest plaintext per record.
    #[inline(always)]
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment_len
    }

    /// First retransmission timeout of every flight.
    #[inline(always)]
    pub fn retransmit_min(&self) -> Duration {
        self.retransmit_min
    }

    /// Ceiling the doubling timeout stops at.
    #[inline(always)]
    pub fn retransmit_max(&self) -> Duration {
        self.retransmit_max
    }

    /// Resends of one flight before the handshake fails with a timeout.
    #[inline(always)]
    pub fn max_retransmissions(&self) -> usize {
        self.max_retransmissions
    }

    /// Size in records of the datagram anti-replay window.
    #[inline(always)]
    pub fn replay_window(&self) -> u32 {
        self.replay_window
    }

    /// Cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Key exchange groups in preference order.
    #[inline(always)]
    pub fn groups(&self) -> &[NamedGroup] {
        &self.groups
    }

    /// Whether to offer and accept Extended Master Secret (RFC 7627).
    #[inline(always)]
    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    /// Whether renegotiation may be started or accepted.
    #[inline(always)]
    pub fn renegotiation(&self) -> bool {
        self.renegotiation
    }

    /// For a server, require a client certificate on ECDSA suites.
    ///
    /// This will cause the server to send a CertificateRequest message and
    /// fail the handshake if the client sends an empty chain.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// For a datagram server, answer a ClientHello without a valid cookie
    /// with a HelloVerifyRequest.
    #[inline(always)]
    pub fn dtls_cookies(&self) -> bool {
        self.dtls_cookies
    }

    /// Host name a client sends in the server_name extension.
    #[inline(always)]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Local certificate chains and keys.
    #[inline(always)]
    pub fn key_certs(&self) -> &KeyCertChain {
        &self.key_certs
    }

    #[inline(always)]
    pub fn psk(&self) -> Option<&Psk> {
        self.psk.as_ref()
    }

    /// Judge of the peer certificate chain.
    #[inline(always)]
    pub fn cert_verifier(&self) -> &dyn CertVerifier {
        &*self.cert_verifier
    }

    /// Server side cache of resumable sessions.
    #[inline(always)]
    pub fn session_cache(&self) -> Option<&dyn SessionCache> {
        self.session_cache.as_deref()
    }

    /// Seed making hello randoms and session ids reproducible.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    transport: TransportKind,
    mtu: usize,
    max_fragment_len: usize,
    retransmit_min: Duration,
    retransmit_max: Duration,
    max_retransmissions: usize,
    replay_window: u32,
    cipher_suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    extended_master_secret: bool,
    renegotiation: bool,
    require_client_certificate: bool,
    dtls_cookies: bool,
    server_name: Option<String>,
    key_certs: Vec<(Vec<Vec<u8>>, Vec<u8>, Option<Vec<String>>)>,
    psk: Option<Psk>,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    session_cache: Option<Arc<dyn SessionCache>>,
    rng_seed: Option<u64>,
    crypto_provider: Option<CryptoProvider>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150. At least 256.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the largest plaintext per record.
    ///
    /// Defaults to 16384. Between 512 and 16384.
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len;
        self
    }

    /// Set the first retransmission timeout.
    ///
    /// Defaults to 1 second.
    pub fn retransmit_min(mut self, rto: Duration) -> Self {
        self.retransmit_min = rto;
        self
    }

    /// Set the retransmission timeout ceiling.
    ///
    /// Defaults to 60 seconds.
    pub fn retransmit_max(mut self, rto: Duration) -> Self {
        self.retransmit_max = rto;
        self
    }

    /// Set how many times a flight is resent before giving up.
    ///
    /// Defaults to 6.
    pub fn max_retransmissions(mut self, n: usize) -> Self {
        self.max_retransmissions = n;
        self
    }

    /// Set the anti-replay window size.
    ///
    /// Defaults to 64. Between 1 and 64.
    pub fn replay_window(mut self, size: u32) -> Self {
        self.replay_window = size;
        self
    }

    /// Set the cipher suites, most preferred first.
    ///
    /// Defaults to every supported suite.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Set the key exchange groups, most preferred first.
    ///
    /// Defaults to x25519, secp256r1, secp384r1.
    pub fn groups(mut self, groups: &[NamedGroup]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    /// Set whether to use Extended Master Secret (RFC 7627).
    ///
    /// Defaults to true.
    pub fn extended_master_secret(mut self, enabled: bool) -> Self {
        self.extended_master_secret = enabled;
        self
    }

    /// Set whether renegotiation is allowed.
    ///
    /// Defaults to false.
    pub fn renegotiation(mut self, enabled: bool) -> Self {
        self.renegotiation = enabled;
        self
    }

    /// Set whether a server requires a client certificate.
    ///
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set whether a datagram server demands a cookie exchange.
    ///
    /// Defaults to true.
    pub fn dtls_cookies(mut self, enabled: bool) -> Self {
        self.dtls_cookies = enabled;
        self
    }

    /// Set the host name a client asks for.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Add a certificate chain (DER, leaf first) and its private key.
    ///
    /// The key is PKCS#8 DER, SEC1 DER or PEM. The host names of the entry
    /// are read from the leaf's subject alternative names.
    pub fn key_cert(mut self, chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        self.key_certs.push((chain, private_key, None));
        self
    }

    /// Add a certificate chain and key answering for explicit host names.
    pub fn key_cert_with_names(
        mut self,
        chain: Vec<Vec<u8>>,
        private_key: Vec<u8>,
        names: &[&str],
    ) -> Self {
        let names = names.iter().map(|n| n.to_string()).collect();
        self.key_certs.push((chain, private_key, Some(names)));
        self
    }

    /// Set the pre-shared key and identity.
    pub fn psk(mut self, identity: &[u8], key: &[u8]) -> Self {
        let hint = self.psk.take().and_then(|p| p.hint);
        self.psk = Some(Psk {
            identity: identity.to_vec(),
            key: Zeroizing::new(key.to_vec()),
            hint,
        });
        self
    }

    /// Set the identity hint a server sends. Requires [`ConfigBuilder::psk`].
    pub fn psk_identity_hint(mut self, hint: &[u8]) -> Self {
        if let Some(psk) = &mut self.psk {
            psk.hint = Some(hint.to_vec());
        }
        self
    }

    /// Set the peer certificate verifier.
    ///
    /// Defaults to [`DefaultCertVerifier`].
    pub fn cert_verifier(mut self, verifier: Arc<dyn CertVerifier>) -> Self {
        self.cert_verifier = Some(verifier);
        self
    }

    /// Set the cache a server stores resumable sessions in.
    pub fn session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    /// Seed the random source for hello randoms and session ids.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set a custom crypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Build the configuration.
    ///
    /// The crypto provider is selected in the following priority order:
    /// 1. Explicit provider set via `with_crypto_provider()`
    /// 2. Default provider installed via `CryptoProvider::install_default()`
    /// 3. The RustCrypto provider
    ///
    /// The provider is self-tested before the configuration is returned.
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .unwrap_or_else(rust_crypto::default_provider);

        if !(1..=64).contains(&self.replay_window) {
            return Err(Error::ConfigError(format!(
                "replay window {} not in 1..=64",
                self.replay_window
            )));
        }
        if self.retransmit_min.is_zero() || self.retransmit_min > self.retransmit_max {
            return Err(Error::ConfigError(
                "retransmit timeouts must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.mtu < 256 {
            return Err(Error::ConfigError(format!("mtu {} below 256", self.mtu)));
        }
        if !(512..=16384).contains(&self.max_fragment_len) {
            return Err(Error::ConfigError(format!(
                "max fragment length {} not in 512..=16384",
                self.max_fragment_len
            )));
        }
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError("no cipher suites".to_string()));
        }
        for suite in &self.cipher_suites {
            if !suite.is_supported() || crypto_provider.find_cipher_suite(*suite).is_none() {
                return Err(Error::Unavailable(format!("cipher suite {:?}", suite)));
            }
        }
        for group in &self.groups {
            if !group.is_supported() || crypto_provider.find_kx_group(*group).is_none() {
                return Err(Error::Unavailable(format!("group {:?}", group)));
            }
        }

        crypto_provider.validate()?;

        let mut key_certs = KeyCertChain::new();
        for (chain, key_der, names) in self.key_certs {
            let Some(leaf) = chain.first() else {
                return Err(Error::ConfigError("empty certificate chain".to_string()));
            };
            let names = match names {
                Some(n) => n,
                None => certificate_dns_names(leaf)
                    .map_err(|e| Error::ConfigError(format!("certificate: {}", e)))?,
            };
            let key = crypto_provider
                .key_provider
                .load_private_key(&key_der)
                .map_err(|e| Error::ConfigError(format!("private key: {}", e)))?;
            key_certs.push(chain, Arc::from(key), names);
        }

        let cert_verifier = self
            .cert_verifier
            .unwrap_or_else(|| Arc::new(DefaultCertVerifier));

        Ok(Config {
            transport: self.transport,
            mtu: self.mtu,
            max_fragment_len: self.max_fragment_len,
            retransmit_min: self.retransmit_min,
            retransmit_max: self.retransmit_max,
            max_retransmissions: self.max_retransmissions,
            replay_window: self.replay_window,
            cipher_suites: self.cipher_suites,
            groups: self.groups,
            extended_master_secret: self.extended_master_secret,
            renegotiation: self.renegotiation,
            require_client_certificate: self.require_client_certificate,
            dtls_cookies: self.dtls_cookies,
            server_name: self.server_name,
            key_certs,
            psk: self.psk,
            cert_verifier,
            session_cache: self.session_cache,
            rng_seed: self.rng_seed,
            crypto_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;

    #[test]
    fn defaults() {
        let c = Config::builder(TransportKind::Datagram).build().unwrap();
        assert_eq!(c.mtu(), 1150);
        assert_eq!(c.max_retransmissions(), 6);
        assert_eq!(c.cipher_suites().len(), 7);
        assert_eq!(c.groups()[0], NamedGroup::X25519);
        assert!(c.extended_master_secret());
        assert!(!c.renegotiation());
        assert!(c.key_certs().is_empty());
    }

    #[test]
    fn rejects_bad_settings() {
        let b = || Config::builder(TransportKind::Stream);
        assert!(matches!(b().replay_window(0).build(), Err(Error::ConfigError(_))));
        assert!(matches!(b().replay_window(65).build(), Err(Error::ConfigError(_))));
        assert!(matches!(b().mtu(100).build(), Err(Error::ConfigError(_))));
        assert!(matches!(
            b().retransmit_min(Duration::from_secs(5))
                .retransmit_max(Duration::from_secs(1))
                .build(),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(b().cipher_suites(&[]).build(), Err(Error::ConfigError(_))));
        assert!(matches!(
            b().cipher_suites(&[CipherSuite::Unknown(0x1301)]).build(),
            Err(Error::Unavailable(_))
        ));
        assert!(matches!(
            b().groups(&[NamedGroup::Unknown(29999)]).build(),
            Err(Error::Unavailable(_))
        ));
    }

    #[test]
    fn key_cert_names_from_certificate() {
        let cert = generate_self_signed_certificate(&["server.test"]).unwrap();
        let c = Config::builder(TransportKind::Datagram)
            .key_cert(vec![cert.certificate.clone()], cert.private_key.clone())
            .build()
            .unwrap();
        let entry = c.key_certs().select(Some("server.test")).unwrap();
        assert_eq!(entry.names, vec!["server.test".to_string()]);
    }

    #[test]
    fn psk_hint_survives_builder_order() {
        let c = Config::builder(TransportKind::Stream)
            .psk(b"id", b"secret")
            .psk_identity_hint(b"hint")
            .build()
            .unwrap();
        let psk = c.psk().unwrap();
        assert_eq!(psk.identity(), b"id");
        assert_eq!(psk.hint(), Some(&b"hint"[..]));
        assert!(!format!("{:?}", psk).contains("secret"));
    }
}

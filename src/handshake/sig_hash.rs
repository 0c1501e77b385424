//! Negotiated hash per signature algorithm.

use crate::types::{HashAlgorithm, SignatureAlgorithm, SignatureAndHash};

/// At most one hash per signature algorithm. Adding a second pair for the
/// same algorithm replaces the first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigHashSet {
    rsa: Option<HashAlgorithm>,
    ecdsa: Option<HashAlgorithm>,
}

impl SigHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill from a peer's signature_algorithms list, most preferred first.
    /// Pairs with hashes the transcript does not keep are skipped.
    pub fn from_offered(offered: &[SignatureAndHash]) -> Self {
        let mut set = Self::new();
        // Walk backwards so the peer's first choice is written last.
        for pair in offered.iter().rev() {
            if matches!(pair.hash, HashAlgorithm::SHA256 | HashAlgorithm::SHA384) {
                set.add(pair.signature, pair.hash);
            }
        }
        set
    }

    pub fn add(&mut self, signature: SignatureAlgorithm, hash: HashAlgorithm) {
        match signature {
            SignatureAlgorithm::RSA => self.rsa = Some(hash),
            SignatureAlgorithm::ECDSA => self.ecdsa = Some(hash),
            _ => {}
        }
    }

    pub fn find(&self, signature: SignatureAlgorithm) -> Option<HashAlgorithm> {
        match signature {
            SignatureAlgorithm::RSA => self.rsa,
            SignatureAlgorithm::ECDSA => self.ecdsa,
            _ => None,
        }
    }

    /// The hash to sign with, SHA-256 when the peer expressed nothing.
    pub fn find_or_default(&self, signature: SignatureAlgorithm) -> HashAlgorithm {
        self.find(signature).unwrap_or(HashAlgorithm::SHA256)
    }
}

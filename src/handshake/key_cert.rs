//! Server identities selectable by SNI.

use std::fmt;
use std::sync::Arc;

use crate::crypto::SigningKey;

/// One certificate chain with its private key.
pub struct KeyCert {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    pub key: Arc<dyn SigningKey>,
    /// Host names this entry answers for. `*.` wildcards match one label.
    pub names: Vec<String>,
    next: Option<usize>,
}

impl fmt::Debug for KeyCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCert")
            .field("chain", &self.chain.len())
            .field("key", &self.key.algorithm())
            .field("names", &self.names)
            .finish()
    }
}

/// Arena list of [`KeyCert`] entries, linked by index in insertion order.
#[derive(Debug, Default)]
pub struct KeyCertChain {
    entries: Vec<KeyCert>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl KeyCertChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chain: Vec<Vec<u8>>, key: Arc<dyn SigningKey>, names: Vec<String>) {
        let idx = self.entries.len();
        self.entries.push(KeyCert {
            chain,
            key,
            names,
            next: None,
        });
        match self.tail {
            Some(t) => self.entries[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyCert> {
        let mut at = self.head;
        std::iter::from_fn(move || {
            let entry = &self.entries[at?];
            at = entry.next;
            Some(entry)
        })
    }

    /// The first entry matching `server_name`, otherwise the head.
    pub fn select(&self, server_name: Option<&str>) -> Option<&KeyCert> {
        if let Some(name) = server_name {
            let found = self
                .iter()
                .find(|e| e.names.iter().any(|n| name_matches(n, name)));
            if found.is_some() {
                return found;
            }
        }
        self.head.map(|h| &self.entries[h])
    }
}

fn name_matches(pattern: &str, name: &str) -> bool {
    let name = name.trim_end_matches('.');
    if let Some(suffix) = pattern.strip_prefix("*.") {
        match name.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(name)
    }
}

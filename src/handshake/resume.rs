//! Session-ID resumption state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::types::CipherSuite;

/// What is needed to resume a session with an abbreviated handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SavedSession {
    pub id: Vec<u8>,
    pub suite: CipherSuite,
    pub master: Zeroizing<Vec<u8>>,
    pub extended_master_secret: bool,
}

impl fmt::Debug for SavedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedSession")
            .field("id", &self.id)
            .field("suite", &self.suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .finish_non_exhaustive()
    }
}

/// Server side store of resumable sessions, shared between sessions.
pub trait SessionCache: Send + Sync + fmt::Debug {
    fn put(&self, session: SavedSession);

    fn get(&self, id: &[u8]) -> Option<SavedSession>;

    fn remove(&self, id: &[u8]);
}

/// Bounded in-memory cache. The oldest entry is evicted first.
#[derive(Debug)]
pub struct MemorySessionCache {
    capacity: usize,
    entries: Mutex<VecDeque<SavedSession>>,
}

impl MemorySessionCache {
    pub fn new(capacity: usize) -> Self {
        MemorySessionCache {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn put(&self, session: SavedSession) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.retain(|s| s.id != session.id);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(session);
    }

    fn get(&self, id: &[u8]) -> Option<SavedSession> {
        let entries = self.entries.lock().ok()?;
        entries.iter().find(|s| s.id == id).cloned()
    }

    fn remove(&self, id: &[u8]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|s| s.id != id);
        }
    }
}

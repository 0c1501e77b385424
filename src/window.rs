/// Sliding anti-replay window for datagram record sequence numbers.
///
/// Keeps the highest accepted sequence number and a bitmap of the `size`
/// numbers at or below it. Anything behind the low edge or already marked is
/// rejected. One window per read epoch; the record layer resets it when the
/// read epoch changes.
#[derive(Debug)]
pub struct ReplayWindow {
    size: u32,
    max_seq: u64,
    window: u64,
    empty: bool,
}

impl ReplayWindow {
    pub const MAX_SIZE: u32 = 64;

    /// Create a window tracking `size` sequence numbers, clamped to 1..=64.
    pub fn new(size: u32) -> Self {
        Self {
            size: size.clamp(1, Self::MAX_SIZE),
            max_seq: 0,
            window: 0,
            empty: true,
        }
    }

    /// Whether `seqno` would be accepted, without recording it.
    ///
    /// Records are checked before decryption and only marked once they
    /// authenticate, so a forged record cannot poison the window.
    pub fn check(&self, seqno: u64) -> bool {
        if self.empty || seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= self.size as u64 {
            return false;
        }
        self.window & (1u64 << offset) == 0
    }

    /// Mark `seqno` as seen, sliding the window on a new maximum.
    pub fn update(&mut self, seqno: u64) {
        if self.empty {
            self.empty = false;
            self.max_seq = seqno;
            self.window = 1;
            return;
        }
        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= 64 { 0 } else { self.window << delta };
            self.window |= 1;
            self.max_seq = seqno;
        } else {
            let offset = self.max_seq - seqno;
            if offset < self.size as u64 {
                self.window |= 1u64 << offset;
            }
        }
    }

    /// Check and mark in one step. Returns true if fresh.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.check(seqno) {
            return false;
        }
        self.update(seqno);
        true
    }
}

//! Byte buffer used for records, handshake messages and secrets.
//!
//! [`Buf`] wraps `Vec<u8>` and wipes its whole allocation when dropped, so
//! plaintext and key material never outlive their owner in memory.

use std::fmt;
use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// Growable byte buffer, zeroized on drop.
#[derive(Default, Clone)]
pub struct Buf(Vec<u8>);

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Buf(Vec::with_capacity(capacity))
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Buf(data.to_vec())
    }

    /// Clear the buffer, wiping the old contents.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }

    pub fn extend_from_slice(&mut self, other: &[u8]) {
        self.0.extend_from_slice(other);
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn resize(&mut self, len: usize, value: u8) {
        self.0.resize(len, value);
    }

    /// Truncate the buffer to `len`, wiping the removed tail.
    pub fn truncate(&mut self, len: usize) {
        if len < self.0.len() {
            self.0[len..].zeroize();
        }
        self.0.truncate(len);
    }

    /// Remove the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.0.len());
        self.0[..n].zeroize();
        self.0.drain(..n);
    }

    /// Split off and return the first `n` bytes.
    pub fn take_front(&mut self, n: usize) -> Buf {
        let front = Buf::from_slice(&self.0[..n.min(self.0.len())]);
        self.consume(n);
        front
    }

    /// Convert into the underlying `Vec<u8>`. The caller owns the wiping.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }

    /// Append a u16 big-endian.
    pub fn put_u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Append the low 24 bits of `v` big-endian.
    pub fn put_u24(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes()[1..]);
    }

    /// Append the low 48 bits of `v` big-endian.
    pub fn put_u48(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes()[2..]);
    }

    /// Append `data` prefixed with a one byte length.
    pub fn put_vec8(&mut self, data: &[u8]) {
        self.0.push(data.len() as u8);
        self.0.extend_from_slice(data);
    }

    /// Append `data` prefixed with a two byte length.
    pub fn put_vec16(&mut self, data: &[u8]) {
        self.put_u16(data.len() as u16);
        self.0.extend_from_slice(data);
    }

    /// Append `data` prefixed with a three byte length.
    pub fn put_vec24(&mut self, data: &[u8]) {
        self.put_u24(data.len() as u32);
        self.0.extend_from_slice(data);
    }

    /// Reserve a two byte length slot, returning its position for [`Buf::fill_len16`].
    pub fn begin_len16(&mut self) -> usize {
        let at = self.0.len();
        self.0.extend_from_slice(&[0, 0]);
        at
    }

    /// Write the length of everything after the slot at `at`.
    pub fn fill_len16(&mut self, at: usize) {
        let len = (self.0.len() - at - 2) as u16;
        self.0[at..at + 2].copy_from_slice(&len.to_be_bytes());
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<'a> Extend<&'a u8> for Buf {
    fn extend<T: IntoIterator<Item = &'a u8>>(&mut self, iter: T) {
        self.0.extend(iter.into_iter().copied());
    }
}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl PartialEq for Buf {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Buf {}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf").field("len", &self.0.len()).finish()
    }
}

/// In-place AEAD operations append the tag through this trait.
impl aes_gcm::aead::Buffer for Buf {
    fn extend_from_slice(&mut self, other: &[u8]) -> Result<(), aes_gcm::aead::Error> {
        self.0.extend_from_slice(other);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        Buf::truncate(self, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixes() {
        let mut b = Buf::new();
        b.put_vec8(&[1, 2]);
        b.put_vec16(&[3]);
        b.put_vec24(&[]);
        assert_eq!(&*b, &[2, 1, 2, 0, 1, 3, 0, 0, 0]);

        let mut b = Buf::new();
        let at = b.begin_len16();
        b.extend_from_slice(&[9; 5]);
        b.fill_len16(at);
        assert_eq!(&b[..2], &[0, 5]);
    }

    #[test]
    fn consume_and_take_front() {
        let mut b = Buf::from_slice(&[1, 2, 3, 4, 5]);
        let front = b.take_front(2);
        assert_eq!(&*front, &[1, 2]);
        assert_eq!(&*b, &[3, 4, 5]);
        b.consume(10);
        assert!(b.is_empty());
    }
}

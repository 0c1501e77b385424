//! Seedable random source for handshake randoms and session ids.
//!
//! When a seed is configured via [`ConfigBuilder::rng_seed`](crate::ConfigBuilder::rng_seed)
//! hello randoms and session ids become reproducible, which makes handshake
//! transcripts comparable in tests. Without a seed the thread-local CSPRNG is used.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    pub fn fill(&mut self, out: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(out),
            None => rand::thread_rng().fill_bytes(out),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_makes_output_reproducible() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        SeededRng::new(Some(12345)).fill(&mut a);
        SeededRng::new(Some(12345)).fill(&mut b);
        assert_eq!(a, b);

        SeededRng::new(Some(54321)).fill(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn unseeded_draws_differ() {
        let mut rng = SeededRng::new(None);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rng.fill(&mut a);
        rng.fill(&mut b);
        assert_ne!(a, b);
    }
}

//! Initial Send Sequence number generator (SPEC_FULL.md §4.9).
//!
//! The teacher spawns a background thread that bumps an `Arc<AtomicU32>` ISS counter every
//! 4ms (`NetStack::new`, `src/lib.rs`); this core has no threads of its own (§5), so the same
//! "monotonic counter advanced by the clock" idea is driven directly by `tcp_ticks` instead.
//! The seed itself comes from `rand::thread_rng()` at construction, rather than a fixed
//! literal, so that two processes (or two runs of the same process) do not hand out
//! identical ISS sequences — the "stronger source" the spec's §4.9 anticipates.

use rand::RngCore;

#[derive(Debug)]
pub struct IssGenerator {
    seed: u32,
}

impl IssGenerator {
    pub fn new() -> Self {
        IssGenerator {
            seed: rand::thread_rng().next_u32(),
        }
    }

    /// Advance the seed by the current tick count and an additional random increment, and
    /// return the new ISS. Strictly increasing while `tcp_ticks` increases, per the testable
    /// property in §8 (mod 2^32 wraparound aside, which RFC 793 sequence arithmetic already
    /// tolerates).
    pub fn next_iss(&mut self, tcp_ticks: u32) -> u32 {
        let bump = tcp_ticks.wrapping_add(1 + (rand::thread_rng().next_u32() % 4));
        self.seed = self.seed.wrapping_add(bump);
        self.seed
    }
}

impl Default for IssGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing_with_rising_ticks() {
        let mut gen = IssGenerator::new();
        let mut last = gen.next_iss(0);
        for tick in 1..50u32 {
            let next = gen.next_iss(tick);
            assert_ne!(next, last);
            last = next;
        }
    }
}

//! Proof strategy extension point.
//!
//! A block's `proof` is carried and hashed but never checked. A
//! [`ProofStrategy`] suggests a proof for the next block of a chain given its
//! tip hash. The only shipped strategy is [`TrivialProof`].

use std::fmt::Debug;

pub trait ProofStrategy: Send + Sync + Debug {
    /// Proof to use for a block appended after `prev_hash`.
    fn solve(&self, prev_hash: &str) -> f64;

    /// Short name reported alongside proof hints.
    fn name(&self) -> &'static str;
}

/// Always answers `0.0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrivialProof;

impl ProofStrategy for TrivialProof {
    fn solve(&self, _prev_hash: &str) -> f64 {
        0.0
    }

    fn name(&self) -> &'static str {
        "trivial"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_proof_is_zero() {
        let strategy = TrivialProof;
        assert_eq!(strategy.solve("anything"), 0.0);
        assert_eq!(strategy.solve(""), 0.0);
        assert_eq!(strategy.name(), "trivial");
    }
}

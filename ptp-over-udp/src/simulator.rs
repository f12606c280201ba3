//! Loss simulator.
//!
//! Real networks drop packets; to exercise the reliability mechanisms without
//! depending on actual network conditions, the receiver passes every segment
//! through a [`LossSimulator`] at the point it crosses the network boundary:
//!
//! | Direction | Segments              | Decision point              |
//! |-----------|-----------------------|-----------------------------|
//! | forward   | DATA, SYN, FIN, RESET | on arrival, before handling |
//! | reverse   | ACK                   | just before transmission    |
//!
//! Each decision is an independent Bernoulli trial.  A dropped segment is
//! gone: the simulator never retries, that is the sender's job.
//!
//! With a seed configured the drop pattern is reproducible, which keeps lossy
//! integration tests deterministic on the receiver side.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-direction drop probabilities, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossModel {
    /// Forward-loss probability.
    pub flp: f64,
    /// Reverse-loss probability.
    pub rlp: f64,
}

impl LossModel {
    /// A transparent pass-through.
    pub const NONE: LossModel = LossModel { flp: 0.0, rlp: 0.0 };
}

/// Independent random drop for both directions.
#[derive(Debug)]
pub struct LossSimulator {
    model: LossModel,
    rng: StdRng,
}

impl LossSimulator {
    /// Create a simulator; `seed` makes the drop sequence reproducible.
    pub fn new(model: LossModel, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { model, rng }
    }

    pub fn model(&self) -> LossModel {
        self.model
    }

    /// Should an arriving forward-direction segment be dropped?
    pub fn forward_drop(&mut self) -> bool {
        trial(&mut self.rng, self.model.flp)
    }

    /// Should an outgoing ACK be dropped?
    pub fn reverse_drop(&mut self) -> bool {
        trial(&mut self.rng, self.model.rlp)
    }
}

fn trial(rng: &mut StdRng, p: f64) -> bool {
    rng.random::<f64>() < p
}

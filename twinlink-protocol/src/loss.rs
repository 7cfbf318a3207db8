//! Simulated packet loss
//!
//! The receiver runs every inbound packet through a [`LossSimulator`] before
//! any protocol logic sees it. A dropped packet is never acknowledged, so the
//! sender's retransmission timer has to recover it, which exercises the ARQ
//! path without a genuinely lossy network.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Drop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossStats {
    /// Packets that passed the trial
    pub passed: u64,
    /// Packets discarded by the trial
    pub dropped: u64,
}

/// Independent Bernoulli trial per inbound packet
pub struct LossSimulator<R = StdRng> {
    probability: f64,
    rng: R,
    stats: LossStats,
}

impl LossSimulator<StdRng> {
    /// Simulator with a deterministic generator
    pub fn seeded(probability: f64, seed: u64) -> Self {
        LossSimulator::new(probability, StdRng::seed_from_u64(seed))
    }

    /// Simulator seeded from the operating system
    pub fn from_entropy(probability: f64) -> Self {
        LossSimulator::new(probability, StdRng::from_os_rng())
    }

    /// Simulator that never drops
    pub fn disabled() -> Self {
        LossSimulator::seeded(0.0, 0)
    }
}

impl<R: Rng> LossSimulator<R> {
    /// Create a simulator around an arbitrary generator
    ///
    /// The probability is clamped to `[0, 1]`.
    pub fn new(probability: f64, rng: R) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        LossSimulator {
            probability,
            rng,
            stats: LossStats::default(),
        }
    }

    /// Run one trial; `true` means the packet must be discarded
    pub fn should_drop(&mut self) -> bool {
        let drop = self.rng.random_bool(self.probability);
        if drop {
            self.stats.dropped += 1;
        } else {
            self.stats.passed += 1;
        }
        drop
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn stats(&self) -> LossStats {
        self.stats
    }
}
